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

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context as _};
use clap::{Parser, Subcommand};
use kube::Client;
use tracing::info;

use provisioner::cluster::ClusterLifecycle;
use provisioner::config::Config;
use provisioner::consts::OPENAPI_FILE;
use provisioner::mesh::MeshLifecycle;
use provisioner::registry::RegistryLifecycle;
use provisioner::{Lifecycle, Orchestrator, Request};

#[derive(Debug, Parser)]
#[command(
    name = "mockstack",
    about = "Provisions a mock instance of a microservice behind an istio sidecar"
)]
struct Options {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "mockstack.yaml")]
    config: PathBuf,

    /// Run against a locally built image; no cloud account is resolved and
    /// the registry step is skipped.
    #[arg(long)]
    test: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the image repository, the cluster resources and the mesh route.
    Create,
    /// Delete them again, dependents before dependencies.
    Delete,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::new();
    tracing::subscriber::set_global_default(subscriber)?;

    let opts = Options::parse();

    // The OpenAPI document is what the mock image serves; refuse to run
    // without it rather than push an empty mock.
    let document = std::fs::read(OPENAPI_FILE)
        .with_context(|| format!("failed to read {OPENAPI_FILE}"))?;
    if document.is_empty() {
        bail!("{OPENAPI_FILE} is empty");
    }

    let config = Config::load(&opts.config)?;

    // One overall deadline for the whole run; there are no per-step
    // timeouts and no retries.
    let timeout = config.timeout();
    match tokio::time::timeout(timeout, run(opts, config)).await {
        Ok(result) => result,
        Err(_) => bail!("run did not finish within {}s", timeout.as_secs()),
    }
}

async fn run(opts: Options, config: Config) -> anyhow::Result<()> {
    let client = Client::try_default()
        .await
        .context("failed to create kube client")?;

    let registry = if opts.test {
        None
    } else {
        Some(resolve_registry().await?)
    };

    let registry_host = registry.as_ref().map(|(_, host)| host.clone());
    let request = Arc::new(Request::new(config, registry_host, opts.test));

    let mut steps: Vec<Box<dyn Lifecycle>> = Vec::new();
    if let Some((ecr_client, _)) = registry {
        steps.push(Box::new(RegistryLifecycle::new(ecr_client, request.clone())));
    }
    steps.push(Box::new(ClusterLifecycle::new(client.clone(), request.clone())));
    steps.push(Box::new(MeshLifecycle::new(client, request)));

    let orchestrator = Orchestrator::new(steps);
    match opts.command {
        Command::Create => {
            orchestrator.create_all().await?;
            info!("all mock resources are created");
        }
        Command::Delete => {
            orchestrator.delete_all().await?;
            info!("all mock resources are deleted");
        }
    }
    Ok(())
}

/// Resolves the caller's AWS account and region into the registry host and
/// an ECR client.
async fn resolve_registry() -> anyhow::Result<(aws_sdk_ecr::Client, String)> {
    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let region = aws_config
        .region()
        .context("no AWS region configured")?
        .clone();

    let sts = aws_sdk_sts::Client::new(&aws_config);
    let identity = sts
        .get_caller_identity()
        .send()
        .await
        .context("failed to get caller identity")?;
    let account = identity
        .account()
        .context("caller identity carries no account id")?;

    let host = format!("{account}.dkr.ecr.{region}.amazonaws.com");
    Ok((aws_sdk_ecr::Client::new(&aws_config), host))
}
