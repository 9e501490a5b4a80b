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

// The namespace istiod runs in.
pub const ISTIOD_NAMESPACE: &str = "istio-system";

// Label selector matching running istiod pods.
pub const ISTIOD_LABEL_SELECTOR: &str = "app=istiod";

// Revision label carried by istiod pods and pinned onto injected namespaces.
pub const ISTIO_REVISION_LABEL: &str = "istio.io/rev";

// Label key tying the deployment, its pods and the service together.
pub const APP_LABEL: &str = "app";

// Port the mock service is exposed on inside the mesh.
pub const SERVICE_PORT: i32 = 80;

// Image reference used instead of the registry copy in test mode.
pub const LOCAL_MOCK_IMAGE: &str = "mockstack-local:latest";

// Dockerfile the mock image is built from.
pub const MOCK_DOCKERFILE: &str = "Dockerfile.mock";

// OpenAPI document baked into the mock image.
pub const OPENAPI_FILE: &str = "openapi.yaml";

// Annotations requesting sidecar injection and sizing the injected proxy.
pub const SIDECAR_INJECT_ANNOTATION: &str = "sidecar.istio.io/inject";
pub const SIDECAR_PROXY_CPU_ANNOTATION: &str = "sidecar.istio.io/proxyCPULimit";
pub const SIDECAR_PROXY_MEMORY_ANNOTATION: &str = "sidecar.istio.io/proxyMemoryLimit";
pub const SIDECAR_OUTBOUND_RANGES_ANNOTATION: &str =
    "traffic.sidecar.istio.io/includeOutboundIPRanges";
pub const SIDECAR_PROXY_CONFIG_ANNOTATION: &str = "proxy.istio.io/config";
pub const SIDECAR_PROXY_CONFIG: &str = r#"{ "terminationDrainDuration": "30s" }"#;
