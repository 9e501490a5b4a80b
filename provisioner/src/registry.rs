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

use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_ecr::types::Tag;
use base64::prelude::*;
use tracing::{info, warn};

use crate::command::AsyncCommand;
use crate::consts::MOCK_DOCKERFILE;
use crate::orchestrator::Lifecycle;
use crate::{Error, Outcome, Request, Result};

// Tag keys attached to the repository for cost attribution.
const COST_ENV_TAG_KEY: &str = "CostEnv";
const COST_SERVICE_TAG_KEY: &str = "CostService";

/// Creates and deletes the image repository holding the mock image.
///
/// Creating the repository also builds the local image and tags, logs in
/// and pushes it; each of those is a hard dependency of the create step and
/// fails it verbatim. A repository possibly created before a push failure is
/// not rolled back; the next run reconciles it.
pub struct RegistryLifecycle {
    client: aws_sdk_ecr::Client,
    request: Arc<Request>,
}

impl RegistryLifecycle {
    pub fn new(client: aws_sdk_ecr::Client, request: Arc<Request>) -> Self {
        Self { client, request }
    }

    fn registry_host(&self) -> Result<&str> {
        self.request
            .registry_host
            .as_deref()
            .ok_or_else(|| Error::Registry("no registry host resolved".to_string()))
    }

    fn cost_tag(key: &str, value: &str) -> Result<Tag> {
        Tag::builder()
            .key(key)
            .value(value)
            .build()
            .map_err(|err| Error::Registry(format!("invalid repository tag: {err}")))
    }

    async fn create_repository(&self) -> Result<Outcome> {
        let result = self
            .client
            .create_repository()
            .repository_name(&self.request.resource_name)
            .tags(Self::cost_tag(COST_ENV_TAG_KEY, &self.request.config.cost_env)?)
            .tags(Self::cost_tag(
                COST_SERVICE_TAG_KEY,
                &self.request.config.microservice_name,
            )?)
            .send()
            .await;

        match result {
            Ok(_) => {
                info!("repository {} created", self.request.resource_name);
                Ok(Outcome::Created)
            }
            Err(err) => {
                let err = err.into_service_error();
                if err.is_repository_already_exists_exception() {
                    warn!("the repository already exists");
                    Ok(Outcome::AlreadyExists)
                } else {
                    Err(Error::Registry(format!(
                        "failed to create repository: {err}"
                    )))
                }
            }
        }
    }

    async fn login(&self) -> Result<()> {
        let output = self
            .client
            .get_authorization_token()
            .send()
            .await
            .map_err(|err| {
                Error::Registry(format!(
                    "failed to get authorization token: {}",
                    err.into_service_error()
                ))
            })?;
        let auth = output
            .authorization_data()
            .first()
            .ok_or_else(|| Error::Registry("no authorization data returned".to_string()))?;
        let token = auth
            .authorization_token()
            .ok_or_else(|| Error::Registry("authorization data carries no token".to_string()))?;
        let endpoint = auth.proxy_endpoint().ok_or_else(|| {
            Error::Registry("authorization data carries no proxy endpoint".to_string())
        })?;

        let (username, password) = parse_authorization_token(token)?;
        AsyncCommand::new(
            "docker",
            &[
                "login",
                "--username",
                username.as_str(),
                "--password-stdin",
                endpoint,
            ],
        )
        .run_with_stdin(&password)
        .await?;
        Ok(())
    }

    async fn build_and_push(&self) -> Result<Outcome> {
        let local_tag = local_image_tag(&self.request.resource_name);
        AsyncCommand::new(
            "docker",
            &["build", "-f", MOCK_DOCKERFILE, "-t", local_tag.as_str(), "."],
        )
        .run()
        .await?;
        info!("mock image built");

        let outcome = self.create_repository().await?;

        let remote_tag = remote_image_tag(self.registry_host()?, &self.request.resource_name);
        AsyncCommand::new("docker", &["tag", local_tag.as_str(), remote_tag.as_str()])
            .run()
            .await?;
        info!("mock image tagged for the registry");

        self.login().await?;
        info!("logged in to the registry");

        AsyncCommand::new("docker", &["push", remote_tag.as_str()])
            .run()
            .await?;
        info!("mock image pushed");

        Ok(outcome)
    }
}

#[async_trait]
impl Lifecycle for RegistryLifecycle {
    fn name(&self) -> &'static str {
        "registry"
    }

    async fn create(&self) -> Result<Outcome> {
        self.build_and_push().await
    }

    async fn delete(&self) -> Result<Outcome> {
        // Force delete removes any images still in the repository.
        let result = self
            .client
            .delete_repository()
            .repository_name(&self.request.resource_name)
            .force(true)
            .send()
            .await;

        match result {
            Ok(_) => {
                info!("repository {} deleted", self.request.resource_name);
                Ok(Outcome::Deleted)
            }
            Err(err) => {
                let err = err.into_service_error();
                if err.is_repository_not_found_exception() {
                    warn!("the repository is not found");
                    Ok(Outcome::NotFound)
                } else {
                    Err(Error::Registry(format!(
                        "failed to delete repository: {err}"
                    )))
                }
            }
        }
    }
}

fn local_image_tag(name: &str) -> String {
    format!("{name}:latest")
}

fn remote_image_tag(host: &str, name: &str) -> String {
    format!("{host}/{name}:latest")
}

// The authorization token is base64 over "user:password".
fn parse_authorization_token(token: &str) -> Result<(String, String)> {
    let decoded = BASE64_STANDARD
        .decode(token)
        .map_err(|err| Error::Registry(format!("invalid authorization token encoding: {err}")))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|err| Error::Registry(format!("invalid authorization token contents: {err}")))?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| Error::Registry("invalid authorization token format".to_string()))?;
    Ok((username.to_string(), password.to_string()))
}
