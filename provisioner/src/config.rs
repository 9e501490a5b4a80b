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

use std::fs;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Affinity;
use serde::Deserialize;

use crate::{Error, Result};

/// Runtime configuration for one provisioning run, loaded from a single
/// YAML document.
///
/// Every field is validated in its own explicit check before any external
/// call is made; a bad configuration never reaches the cluster or the
/// registry.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub microservice_name: String,
    pub microservice_namespace: String,
    /// Suffix appended to the microservice name and namespace to derive the
    /// names of everything this tool owns.
    pub mock_suffix: String,
    /// Port the mock container listens on.
    pub mock_port: i32,
    pub mock_cpu: String,
    pub mock_memory: String,
    /// Limits handed to the injected sidecar via annotations.
    pub proxy_cpu: String,
    pub proxy_memory: String,
    /// Value of the CostEnv tag attached to the image repository.
    pub cost_env: String,
    /// Overall deadline for a whole create or delete run.
    pub timeout_seconds: u64,
    #[serde(default)]
    pub priority_class_name: Option<String>,
    /// Scheduling constraints copied verbatim onto the mock deployment.
    #[serde(default)]
    pub affinity: Option<Affinity>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let doc = fs::read_to_string(path).map_err(|err| {
            Error::InvalidConfig(format!("failed to open {}: {err}", path.display()))
        })?;
        Self::from_yaml(&doc)
    }

    pub fn from_yaml(doc: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(doc)
            .map_err(|err| Error::InvalidConfig(format!("failed to decode config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.microservice_name.is_empty() {
            return Err(Error::InvalidConfig("microserviceName is empty".to_string()));
        }
        if self.microservice_namespace.is_empty() {
            return Err(Error::InvalidConfig(
                "microserviceNamespace is empty".to_string(),
            ));
        }
        if self.mock_suffix.is_empty() {
            return Err(Error::InvalidConfig("mockSuffix is empty".to_string()));
        }
        if self.mock_port <= 0 {
            return Err(Error::InvalidConfig(
                "mockPort must be a positive port number".to_string(),
            ));
        }
        if self.mock_cpu.is_empty() {
            return Err(Error::InvalidConfig("mockCpu is empty".to_string()));
        }
        if self.mock_memory.is_empty() {
            return Err(Error::InvalidConfig("mockMemory is empty".to_string()));
        }
        if self.proxy_cpu.is_empty() {
            return Err(Error::InvalidConfig("proxyCpu is empty".to_string()));
        }
        if self.proxy_memory.is_empty() {
            return Err(Error::InvalidConfig("proxyMemory is empty".to_string()));
        }
        if self.cost_env.is_empty() {
            return Err(Error::InvalidConfig("costEnv is empty".to_string()));
        }
        if self.timeout_seconds == 0 {
            return Err(Error::InvalidConfig("timeoutSeconds is zero".to_string()));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
