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

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, Namespace, Pod, PodSpec, PodTemplateSpec, ResourceRequirements,
    Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::ObjectMeta;
use tracing::{info, warn};

use crate::consts::*;
use crate::orchestrator::Lifecycle;
use crate::utils::{is_already_exists, is_not_found};
use crate::version::select_latest;
use crate::{Error, Outcome, Request, Result};

/// Creates and deletes the namespace, deployment and service carrying the
/// mock workload.
///
/// The three creates run in order even though each depends on the previous
/// one having truly succeeded; there is no compensating rollback. A run that
/// fails partway leaves what it created for the next idempotent run.
pub struct ClusterLifecycle {
    client: kube::Client,
    request: Arc<Request>,
}

impl ClusterLifecycle {
    pub fn new(client: kube::Client, request: Arc<Request>) -> Self {
        Self { client, request }
    }

    // Picks the istio revision to pin the new namespace to, from the labels
    // of the currently running istiod pods. During an upgrade several
    // revisions can be live at once; the namespace binds to the highest so
    // injection keeps working after the old control plane drains.
    async fn resolve_revision(&self) -> Result<Option<String>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), ISTIOD_NAMESPACE);
        let list = pods
            .list(&ListParams::default().labels(ISTIOD_LABEL_SELECTOR))
            .await
            .map_err(Error::Kube)?;

        let revisions: Vec<String> = list
            .items
            .into_iter()
            .filter_map(|pod| {
                pod.metadata
                    .labels
                    .and_then(|mut labels| labels.remove(ISTIO_REVISION_LABEL))
            })
            .collect();

        Ok(select_latest(revisions.iter().map(String::as_str)).map(str::to_string))
    }

    async fn create_namespace(&self, revision: Option<&str>) -> Result<Outcome> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespace = build_namespace(&self.request.namespace_name, revision);
        match namespaces.create(&PostParams::default(), &namespace).await {
            Ok(_) => {
                info!("namespace {} created", self.request.namespace_name);
                Ok(Outcome::Created)
            }
            Err(err) if is_already_exists(&err) => {
                warn!("the namespace already exists");
                Ok(Outcome::AlreadyExists)
            }
            Err(err) => Err(Error::Kube(err)),
        }
    }

    async fn create_deployment(&self) -> Result<Outcome> {
        let deployments: Api<Deployment> =
            Api::namespaced(self.client.clone(), &self.request.namespace_name);
        let deployment = build_deployment(&self.request);
        match deployments.create(&PostParams::default(), &deployment).await {
            Ok(_) => {
                info!("deployment {} created", self.request.resource_name);
                Ok(Outcome::Created)
            }
            Err(err) if is_already_exists(&err) => {
                warn!("the deployment already exists");
                Ok(Outcome::AlreadyExists)
            }
            Err(err) => Err(Error::Kube(err)),
        }
    }

    async fn create_service(&self) -> Result<Outcome> {
        let services: Api<Service> =
            Api::namespaced(self.client.clone(), &self.request.namespace_name);
        let service = build_service(&self.request);
        match services.create(&PostParams::default(), &service).await {
            Ok(_) => {
                info!("service {} created", self.request.resource_name);
                Ok(Outcome::Created)
            }
            Err(err) if is_already_exists(&err) => {
                warn!("the service already exists");
                Ok(Outcome::AlreadyExists)
            }
            Err(err) => Err(Error::Kube(err)),
        }
    }

    async fn delete_service(&self) -> Result<Outcome> {
        let services: Api<Service> =
            Api::namespaced(self.client.clone(), &self.request.namespace_name);
        match services
            .delete(&self.request.resource_name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!("service {} deleted", self.request.resource_name);
                Ok(Outcome::Deleted)
            }
            Err(err) if is_not_found(&err) => {
                warn!("the service is not found");
                Ok(Outcome::NotFound)
            }
            Err(err) => Err(Error::Kube(err)),
        }
    }

    async fn delete_deployment(&self) -> Result<Outcome> {
        let deployments: Api<Deployment> =
            Api::namespaced(self.client.clone(), &self.request.namespace_name);
        match deployments
            .delete(&self.request.resource_name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!("deployment {} deleted", self.request.resource_name);
                Ok(Outcome::Deleted)
            }
            Err(err) if is_not_found(&err) => {
                warn!("the deployment is not found");
                Ok(Outcome::NotFound)
            }
            Err(err) => Err(Error::Kube(err)),
        }
    }

    async fn delete_namespace(&self) -> Result<Outcome> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        match namespaces
            .delete(&self.request.namespace_name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!("namespace {} deleted", self.request.namespace_name);
                Ok(Outcome::Deleted)
            }
            Err(err) if is_not_found(&err) => {
                warn!("the namespace is not found");
                Ok(Outcome::NotFound)
            }
            Err(err) => Err(Error::Kube(err)),
        }
    }
}

#[async_trait]
impl Lifecycle for ClusterLifecycle {
    fn name(&self) -> &'static str {
        "cluster"
    }

    async fn create(&self) -> Result<Outcome> {
        let revision = self.resolve_revision().await?;
        match revision.as_deref() {
            Some(revision) => info!("pinning namespace to istio revision {revision}"),
            None => warn!("no istio revision found; the namespace is left unpinned"),
        }

        let namespace = self.create_namespace(revision.as_deref()).await?;
        let deployment = self.create_deployment().await?;
        let service = self.create_service().await?;
        Ok(aggregate_create([namespace, deployment, service]))
    }

    async fn delete(&self) -> Result<Outcome> {
        let service = self.delete_service().await?;
        let deployment = self.delete_deployment().await?;
        let namespace = self.delete_namespace().await?;
        Ok(aggregate_delete([service, deployment, namespace]))
    }
}

// A multi-object step only reports AlreadyExists/NotFound when every object
// was already in the target state.
fn aggregate_create(outcomes: [Outcome; 3]) -> Outcome {
    if outcomes.contains(&Outcome::Created) {
        Outcome::Created
    } else {
        Outcome::AlreadyExists
    }
}

fn aggregate_delete(outcomes: [Outcome; 3]) -> Outcome {
    if outcomes.contains(&Outcome::Deleted) {
        Outcome::Deleted
    } else {
        Outcome::NotFound
    }
}

fn build_namespace(name: &str, revision: Option<&str>) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: revision.map(|revision| {
                BTreeMap::from([(ISTIO_REVISION_LABEL.to_string(), revision.to_string())])
            }),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn build_deployment(request: &Request) -> Deployment {
    let labels = BTreeMap::from([(APP_LABEL.to_string(), request.resource_name.clone())]);
    let annotations = BTreeMap::from([
        (SIDECAR_INJECT_ANNOTATION.to_string(), "true".to_string()),
        (
            SIDECAR_PROXY_CPU_ANNOTATION.to_string(),
            request.config.proxy_cpu.clone(),
        ),
        (
            SIDECAR_PROXY_MEMORY_ANNOTATION.to_string(),
            request.config.proxy_memory.clone(),
        ),
        (
            SIDECAR_OUTBOUND_RANGES_ANNOTATION.to_string(),
            "*".to_string(),
        ),
        (
            SIDECAR_PROXY_CONFIG_ANNOTATION.to_string(),
            SIDECAR_PROXY_CONFIG.to_string(),
        ),
    ]);
    let limits = BTreeMap::from([
        ("cpu".to_string(), Quantity(request.config.mock_cpu.clone())),
        (
            "memory".to_string(),
            Quantity(request.config.mock_memory.clone()),
        ),
    ]);

    Deployment {
        metadata: ObjectMeta {
            name: Some(request.resource_name.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: request.resource_name.clone(),
                        image: Some(request.image_reference()),
                        ports: Some(vec![ContainerPort {
                            container_port: request.config.mock_port,
                            ..Default::default()
                        }]),
                        resources: Some(ResourceRequirements {
                            limits: Some(limits),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    priority_class_name: request.config.priority_class_name.clone(),
                    affinity: request.config.affinity.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn build_service(request: &Request) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(request.resource_name.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(
                APP_LABEL.to_string(),
                request.resource_name.clone(),
            )])),
            ports: Some(vec![ServicePort {
                protocol: Some("TCP".to_string()),
                port: SERVICE_PORT,
                target_port: Some(IntOrString::Int(SERVICE_PORT)),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn request(is_test: bool) -> Request {
        let config = Config::from_yaml(
            r#"
microserviceName: payments
microserviceNamespace: billing
mockSuffix: -mock
mockPort: 8080
mockCpu: "1"
mockMemory: 1Gi
proxyCpu: 500m
proxyMemory: 512Mi
costEnv: stg
timeoutSeconds: 600
priorityClassName: low-priority
affinity:
  podAntiAffinity:
    requiredDuringSchedulingIgnoredDuringExecution:
      - topologyKey: kubernetes.io/hostname
        labelSelector:
          matchExpressions:
            - key: app
              operator: In
              values:
                - payments-mock
"#,
        )
        .unwrap();
        let host = (!is_test).then(|| "012345678901.dkr.ecr.ap-northeast-1.amazonaws.com".to_string());
        Request::new(config, host, is_test)
    }

    #[test]
    fn namespace_is_pinned_when_a_revision_was_selected() {
        let namespace = build_namespace("billing-mock", Some("1-21-0"));
        assert_eq!(namespace.metadata.name.as_deref(), Some("billing-mock"));
        let labels = namespace.metadata.labels.expect("labels");
        assert_eq!(labels.get(ISTIO_REVISION_LABEL).map(String::as_str), Some("1-21-0"));
    }

    #[test]
    fn namespace_is_unlabeled_without_a_revision() {
        let namespace = build_namespace("billing-mock", None);
        assert!(namespace.metadata.labels.is_none());
    }

    #[test]
    fn deployment_requests_sidecar_injection() {
        let deployment = build_deployment(&request(false));
        let template = deployment.spec.as_ref().unwrap().template.clone();
        let annotations = template.metadata.unwrap().annotations.unwrap();

        assert_eq!(
            annotations.get(SIDECAR_INJECT_ANNOTATION).map(String::as_str),
            Some("true")
        );
        assert_eq!(
            annotations.get(SIDECAR_PROXY_CPU_ANNOTATION).map(String::as_str),
            Some("500m")
        );
        assert_eq!(
            annotations
                .get(SIDECAR_PROXY_MEMORY_ANNOTATION)
                .map(String::as_str),
            Some("512Mi")
        );
        assert_eq!(
            annotations
                .get(SIDECAR_PROXY_CONFIG_ANNOTATION)
                .map(String::as_str),
            Some(SIDECAR_PROXY_CONFIG)
        );
    }

    #[test]
    fn deployment_runs_the_registry_image() {
        let deployment = build_deployment(&request(false));
        let pod_spec = deployment.spec.unwrap().template.spec.unwrap();
        let container = &pod_spec.containers[0];

        assert_eq!(
            container.image.as_deref(),
            Some("012345678901.dkr.ecr.ap-northeast-1.amazonaws.com/payments-mock")
        );
        assert_eq!(container.ports.as_ref().unwrap()[0].container_port, 8080);
        let limits = container.resources.as_ref().unwrap().limits.as_ref().unwrap();
        assert_eq!(limits.get("cpu"), Some(&Quantity("1".to_string())));
        assert_eq!(limits.get("memory"), Some(&Quantity("1Gi".to_string())));
    }

    #[test]
    fn deployment_substitutes_the_local_image_in_test_mode() {
        let deployment = build_deployment(&request(true));
        let pod_spec = deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod_spec.containers[0].image.as_deref(), Some(LOCAL_MOCK_IMAGE));
    }

    #[test]
    fn scheduling_constraints_pass_through_verbatim() {
        let deployment = build_deployment(&request(false));
        let pod_spec = deployment.spec.unwrap().template.spec.unwrap();

        assert_eq!(pod_spec.priority_class_name.as_deref(), Some("low-priority"));
        let anti_affinity = pod_spec
            .affinity
            .expect("affinity")
            .pod_anti_affinity
            .expect("podAntiAffinity");
        let terms = anti_affinity
            .required_during_scheduling_ignored_during_execution
            .expect("required terms");
        assert_eq!(terms[0].topology_key, "kubernetes.io/hostname");
    }

    #[test]
    fn service_selects_the_mock_pods_on_the_fixed_port() {
        let service = build_service(&request(false));
        let spec = service.spec.unwrap();

        assert_eq!(
            spec.selector.unwrap().get(APP_LABEL).map(String::as_str),
            Some("payments-mock")
        );
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, SERVICE_PORT);
        assert_eq!(port.target_port, Some(IntOrString::Int(SERVICE_PORT)));
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
    }

    #[test]
    fn multi_object_outcomes_aggregate() {
        use Outcome::*;
        assert_eq!(aggregate_create([Created, AlreadyExists, Created]), Created);
        assert_eq!(
            aggregate_create([AlreadyExists, AlreadyExists, AlreadyExists]),
            AlreadyExists
        );
        assert_eq!(aggregate_delete([NotFound, Deleted, Deleted]), Deleted);
        assert_eq!(aggregate_delete([NotFound, NotFound, NotFound]), NotFound);
    }
}
