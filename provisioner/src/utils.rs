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

// Returns true if the provided error is an already-exists (HTTP 409) error.
pub fn is_already_exists(error: &kube::Error) -> bool {
    if let kube::Error::Api(response) = error {
        if response.code == 409 {
            return true;
        }
    }
    false
}

// Returns true if the provided error is a not-found (HTTP 404) error.
pub fn is_not_found(error: &kube::Error) -> bool {
    if let kube::Error::Api(response) = error {
        if response.code == 404 {
            return true;
        }
    }
    false
}
