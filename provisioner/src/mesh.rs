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
use kube::api::{Api, DeleteParams, PostParams};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::orchestrator::Lifecycle;
use crate::utils::{is_already_exists, is_not_found};
use crate::{Error, Outcome, Request, Result};

// Fault rule evaluated ahead of the catch-all: requests under this prefix
// with this method receive a fixed delay before being routed.
const FAULT_ROUTE_NAME: &str = "example1";
const FAULT_ROUTE_PREFIX: &str = "/example1/";
const FAULT_ROUTE_METHOD: &str = "GET";
const FAULT_DELAY_PERCENTAGE: f64 = 100.0;
const FAULT_FIXED_DELAY: &str = "100ms";
const DEFAULT_ROUTE_NAME: &str = "default";

/// Subset of the istio `VirtualService` spec this tool manages.
///
/// Declared as a typed custom resource so the routing object is built and
/// serialized like any other kube object instead of hand-rolled YAML.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "VirtualService",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceSpec {
    pub hosts: Vec<String>,
    pub http: Vec<HttpRoute>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    pub name: String,
    #[serde(default, rename = "match", skip_serializing_if = "Option::is_none")]
    pub matches: Option<Vec<HttpMatchRequest>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<HttpFaultInjection>,
    pub route: Vec<HttpRouteDestination>,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpMatchRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<StringMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<StringMatch>,
}

/// One-of string matcher, serialized the way istio expects it
/// (`{"prefix": "/x"}`, `{"exact": "GET"}`).
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum StringMatch {
    Exact(String),
    Prefix(String),
    Regex(String),
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpFaultInjection {
    pub delay: FaultDelay,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FaultDelay {
    pub percentage: Percent,
    pub fixed_delay: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct Percent {
    pub value: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct HttpRouteDestination {
    pub destination: Destination,
}

#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
pub struct Destination {
    pub host: String,
}

/// Creates and deletes the routing object binding the mock's hostname to
/// its service through the mesh.
pub struct MeshLifecycle {
    client: kube::Client,
    request: Arc<Request>,
}

impl MeshLifecycle {
    pub fn new(client: kube::Client, request: Arc<Request>) -> Self {
        Self { client, request }
    }

    fn api(&self) -> Api<VirtualService> {
        Api::namespaced(self.client.clone(), &self.request.namespace_name)
    }
}

#[async_trait]
impl Lifecycle for MeshLifecycle {
    fn name(&self) -> &'static str {
        "mesh"
    }

    async fn create(&self) -> Result<Outcome> {
        let virtual_service = build_virtual_service(&self.request);
        match self
            .api()
            .create(&PostParams::default(), &virtual_service)
            .await
        {
            Ok(_) => {
                info!("virtual service {} created", self.request.resource_name);
                Ok(Outcome::Created)
            }
            Err(err) if is_already_exists(&err) => {
                warn!("the virtual service already exists");
                Ok(Outcome::AlreadyExists)
            }
            Err(err) => Err(Error::Kube(err)),
        }
    }

    async fn delete(&self) -> Result<Outcome> {
        match self
            .api()
            .delete(&self.request.resource_name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!("virtual service {} deleted", self.request.resource_name);
                Ok(Outcome::Deleted)
            }
            Err(err) if is_not_found(&err) => {
                warn!("the virtual service is not found");
                Ok(Outcome::NotFound)
            }
            Err(err) => Err(Error::Kube(err)),
        }
    }
}

// Route order is first-match-wins: the fault rule must stay ahead of the
// catch-all or it never matches anything.
fn build_virtual_service(request: &Request) -> VirtualService {
    let host = request.service_host();
    let destination = HttpRouteDestination {
        destination: Destination { host: host.clone() },
    };

    VirtualService::new(
        &request.resource_name,
        VirtualServiceSpec {
            hosts: vec![host],
            http: vec![
                HttpRoute {
                    name: FAULT_ROUTE_NAME.to_string(),
                    matches: Some(vec![HttpMatchRequest {
                        uri: Some(StringMatch::Prefix(FAULT_ROUTE_PREFIX.to_string())),
                        method: Some(StringMatch::Exact(FAULT_ROUTE_METHOD.to_string())),
                    }]),
                    fault: Some(HttpFaultInjection {
                        delay: FaultDelay {
                            percentage: Percent {
                                value: FAULT_DELAY_PERCENTAGE,
                            },
                            fixed_delay: FAULT_FIXED_DELAY.to_string(),
                        },
                    }),
                    route: vec![destination.clone()],
                },
                HttpRoute {
                    name: DEFAULT_ROUTE_NAME.to_string(),
                    matches: None,
                    fault: None,
                    route: vec![destination],
                },
            ],
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn request() -> Request {
        let config = Config::from_yaml(
            r#"
microserviceName: payments
microserviceNamespace: billing
mockSuffix: -mock
mockPort: 80
mockCpu: "1"
mockMemory: 1Gi
proxyCpu: 500m
proxyMemory: 512Mi
costEnv: stg
timeoutSeconds: 600
"#,
        )
        .unwrap();
        Request::new(config, None, true)
    }

    #[test]
    fn fault_rule_is_evaluated_before_the_catch_all() {
        let virtual_service = build_virtual_service(&request());
        let spec = &virtual_service.spec;

        assert_eq!(spec.http.len(), 2);
        assert_eq!(spec.http[0].name, FAULT_ROUTE_NAME);
        assert!(spec.http[0].fault.is_some());
        assert_eq!(spec.http[1].name, DEFAULT_ROUTE_NAME);
        assert!(spec.http[1].fault.is_none());
        assert!(spec.http[1].matches.is_none());
    }

    #[test]
    fn serializes_to_the_istio_wire_shape() {
        let virtual_service = build_virtual_service(&request());
        let json = serde_json::to_value(&virtual_service).unwrap();

        assert_eq!(
            json["apiVersion"],
            serde_json::json!("networking.istio.io/v1alpha3")
        );
        assert_eq!(json["kind"], serde_json::json!("VirtualService"));
        assert_eq!(
            json["spec"]["hosts"][0],
            serde_json::json!("payments-mock.billing-mock.svc.cluster.local")
        );

        let fault_rule = &json["spec"]["http"][0];
        assert_eq!(
            fault_rule["match"][0]["uri"],
            serde_json::json!({ "prefix": "/example1/" })
        );
        assert_eq!(
            fault_rule["match"][0]["method"],
            serde_json::json!({ "exact": "GET" })
        );
        assert_eq!(
            fault_rule["fault"]["delay"]["percentage"]["value"],
            serde_json::json!(100.0)
        );
        assert_eq!(
            fault_rule["fault"]["delay"]["fixedDelay"],
            serde_json::json!("100ms")
        );

        // The catch-all carries no match and no fault at all on the wire.
        let default_rule = &json["spec"]["http"][1];
        assert!(default_rule.get("match").is_none());
        assert!(default_rule.get("fault").is_none());
        assert_eq!(
            default_rule["route"][0]["destination"]["host"],
            serde_json::json!("payments-mock.billing-mock.svc.cluster.local")
        );
    }

    #[test]
    fn both_rules_route_to_the_same_destination() {
        let virtual_service = build_virtual_service(&request());
        let spec = &virtual_service.spec;
        let hosts: Vec<&str> = spec
            .http
            .iter()
            .map(|route| route.route[0].destination.host.as_str())
            .collect();
        assert_eq!(
            hosts,
            [
                "payments-mock.billing-mock.svc.cluster.local",
                "payments-mock.billing-mock.svc.cluster.local"
            ]
        );
    }
}
