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

use std::fmt;

use thiserror::Error;

pub use orchestrator::{Lifecycle, Orchestrator};

pub mod cluster;
pub mod command;
pub mod config;
pub mod consts;
pub mod mesh;
pub mod orchestrator;
pub mod registry;
pub mod version;

mod utils;

use config::Config;

#[derive(Error, Debug)]
pub enum Error {
    #[error("kube error: {0}")]
    Kube(#[source] kube::Error),
    #[error("registry error: {0}")]
    Registry(String),
    #[error("command error: {0}")]
    Command(#[from] command::CommandError),
    #[error("invalid configuration: `{0}`")]
    InvalidConfig(String),
    #[error("{step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Success outcome of one lifecycle step. Failures travel as [`Error`].
///
/// `AlreadyExists` and `NotFound` are the expected signature of re-running
/// create or delete against partially provisioned state and are treated as
/// success everywhere.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Created,
    AlreadyExists,
    Deleted,
    NotFound,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Outcome::Created => "created",
            Outcome::AlreadyExists => "already exists",
            Outcome::Deleted => "deleted",
            Outcome::NotFound => "not found",
        };
        f.write_str(text)
    }
}

/// Immutable input bundle for one create or delete run.
///
/// Built once at startup and shared read-only by every lifecycle; nothing
/// mutates it after construction.
#[derive(Clone, Debug)]
pub struct Request {
    /// Name shared by the repository, deployment, service, routing object
    /// and image.
    pub resource_name: String,
    /// Namespace everything except the repository lives in.
    pub namespace_name: String,
    /// Registry host (`<account>.dkr.ecr.<region>.amazonaws.com`); `None`
    /// in test mode, where no cloud account is resolved.
    pub registry_host: Option<String>,
    pub is_test: bool,
    pub config: Config,
}

impl Request {
    pub fn new(config: Config, registry_host: Option<String>, is_test: bool) -> Self {
        let resource_name = format!("{}{}", config.microservice_name, config.mock_suffix);
        let namespace_name = format!("{}{}", config.microservice_namespace, config.mock_suffix);
        Request {
            resource_name,
            namespace_name,
            registry_host,
            is_test,
            config,
        }
    }

    /// Image reference the deployment runs: the registry copy, or the fixed
    /// local image in test mode.
    pub fn image_reference(&self) -> String {
        match (&self.registry_host, self.is_test) {
            (Some(host), false) => format!("{host}/{}", self.resource_name),
            _ => consts::LOCAL_MOCK_IMAGE.to_string(),
        }
    }

    /// Cluster-local hostname the mock service answers on.
    pub fn service_host(&self) -> String {
        format!(
            "{}.{}.svc.cluster.local",
            self.resource_name, self.namespace_name
        )
    }
}
