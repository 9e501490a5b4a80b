/*
Copyright 2024 The Mockstack Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

// Splits a "major-minor-patch" revision label into its numeric parts.
// Anything that is not exactly three hyphen-delimited integers is not a
// revision label.
fn parse_revision(label: &str) -> Option<(u64, u64, u64)> {
    let parts: Vec<&str> = label.split('-').collect();
    if parts.len() != 3 {
        return None;
    }
    let major = parts[0].parse().ok()?;
    let minor = parts[1].parse().ok()?;
    let patch = parts[2].parse().ok()?;
    Some((major, minor, patch))
}

/// Picks the highest revision label, comparing the three parts numerically
/// position by position.
///
/// Labels that do not parse are skipped rather than treated as errors: while
/// istio is being upgraded the istiod pool can briefly carry transient or
/// test labels. Ties keep the first label seen, in input order.
pub fn select_latest<'a, I>(labels: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut latest: Option<(&str, (u64, u64, u64))> = None;
    for label in labels {
        let parsed = match parse_revision(label) {
            Some(parsed) => parsed,
            None => continue,
        };
        match latest {
            Some((_, max)) if parsed <= max => {}
            _ => latest = Some((label, parsed)),
        }
    }
    latest.map(|(label, _)| label)
}
