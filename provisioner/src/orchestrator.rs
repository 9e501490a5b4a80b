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

use async_trait::async_trait;
use tracing::info;

use crate::{Error, Outcome, Result};

/// One idempotent create/delete pair against a single external system.
///
/// Implementations absorb already-exists and not-found conditions and report
/// them as success [`Outcome`]s; anything returned as `Err` aborts the
/// sequence the step runs in.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    fn name(&self) -> &'static str;
    async fn create(&self) -> Result<Outcome>;
    async fn delete(&self) -> Result<Outcome>;
}

/// Runs lifecycles in a fixed order: front-to-back on create, back-to-front
/// on delete, so dependents are always torn down before their dependencies.
///
/// The first failure aborts the run without touching the remaining steps and
/// without rolling back the completed ones; whatever was applied stays in
/// place for the next idempotent run to reconcile.
pub struct Orchestrator {
    steps: Vec<Box<dyn Lifecycle>>,
}

impl Orchestrator {
    pub fn new(steps: Vec<Box<dyn Lifecycle>>) -> Self {
        Self { steps }
    }

    pub async fn create_all(&self) -> Result<Vec<(&'static str, Outcome)>> {
        let mut outcomes = Vec::with_capacity(self.steps.len());
        for step in self.steps.iter() {
            let outcome = step.create().await.map_err(|source| Error::Step {
                step: step.name(),
                source: Box::new(source),
            })?;
            info!("{} create finished: {outcome}", step.name());
            outcomes.push((step.name(), outcome));
        }
        Ok(outcomes)
    }

    pub async fn delete_all(&self) -> Result<Vec<(&'static str, Outcome)>> {
        let mut outcomes = Vec::with_capacity(self.steps.len());
        for step in self.steps.iter().rev() {
            let outcome = step.delete().await.map_err(|source| Error::Step {
                step: step.name(),
                source: Box::new(source),
            })?;
            info!("{} delete finished: {outcome}", step.name());
            outcomes.push((step.name(), outcome));
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    struct Recorded {
        name: &'static str,
        calls: Arc<Mutex<Vec<String>>>,
        fail_create: bool,
        fail_delete: bool,
    }

    #[async_trait]
    impl Lifecycle for Recorded {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn create(&self) -> Result<Outcome> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}.create", self.name));
            if self.fail_create {
                return Err(Error::Registry("injected failure".to_string()));
            }
            Ok(Outcome::Created)
        }

        async fn delete(&self) -> Result<Outcome> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}.delete", self.name));
            if self.fail_delete {
                return Err(Error::Registry("injected failure".to_string()));
            }
            Ok(Outcome::Deleted)
        }
    }

    fn step(
        name: &'static str,
        calls: &Arc<Mutex<Vec<String>>>,
        fail_create: bool,
        fail_delete: bool,
    ) -> Box<dyn Lifecycle> {
        Box::new(Recorded {
            name,
            calls: calls.clone(),
            fail_create,
            fail_delete,
        })
    }

    fn orchestrator(
        calls: &Arc<Mutex<Vec<String>>>,
        fail_create: &'static str,
        fail_delete: &'static str,
    ) -> Orchestrator {
        Orchestrator::new(vec![
            step("registry", calls, fail_create == "registry", fail_delete == "registry"),
            step("cluster", calls, fail_create == "cluster", fail_delete == "cluster"),
            step("mesh", calls, fail_create == "mesh", fail_delete == "mesh"),
        ])
    }

    #[tokio::test]
    async fn create_runs_front_to_back() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let outcomes = orchestrator(&calls, "", "").create_all().await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            ["registry.create", "cluster.create", "mesh.create"]
        );
        assert_eq!(
            outcomes,
            [
                ("registry", Outcome::Created),
                ("cluster", Outcome::Created),
                ("mesh", Outcome::Created),
            ]
        );
    }

    #[tokio::test]
    async fn delete_runs_back_to_front() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        orchestrator(&calls, "", "").delete_all().await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            ["mesh.delete", "cluster.delete", "registry.delete"]
        );
    }

    #[tokio::test]
    async fn create_failure_aborts_without_rollback() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let err = orchestrator(&calls, "cluster", "")
            .create_all()
            .await
            .unwrap_err();

        // The registry step ran and its state stays; the mesh step never ran.
        assert_eq!(*calls.lock().unwrap(), ["registry.create", "cluster.create"]);
        match err {
            Error::Step { step, .. } => assert_eq!(step, "cluster"),
            other => panic!("expected a step error, got {other}"),
        }
    }

    #[tokio::test]
    async fn delete_failure_aborts_remaining_steps() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let err = orchestrator(&calls, "", "cluster")
            .delete_all()
            .await
            .unwrap_err();

        assert_eq!(*calls.lock().unwrap(), ["mesh.delete", "cluster.delete"]);
        match err {
            Error::Step { step, .. } => assert_eq!(step, "cluster"),
            other => panic!("expected a step error, got {other}"),
        }
    }
}
