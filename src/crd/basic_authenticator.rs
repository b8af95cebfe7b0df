//! BasicAuthenticator Custom Resource Definition
//!
//! A BasicAuthenticator describes HTTP basic authentication provisioned in
//! front of an application, either as a standalone nginx deployment or as a
//! sidecar injected into deployments matched by a label selector.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Topology of the authenticator. Immutable once set; the admission webhook
/// rejects updates that change it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticatorMode {
    /// Inject the proxy container into deployments matched by `selector`.
    Sidecar,
    /// Run the proxy as a standalone deployment owned by this instance.
    Deployment,
}

impl fmt::Display for AuthenticatorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticatorMode::Sidecar => write!(f, "sidecar"),
            AuthenticatorMode::Deployment => write!(f, "deployment"),
        }
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "authenticator.snappcloud.io",
    version = "v1alpha1",
    kind = "BasicAuthenticator",
    namespaced,
    status = "BasicAuthenticatorStatus",
    shortname = "ba",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuthenticatorSpec {
    /// `sidecar` or `deployment`. Fixed for the lifetime of the object.
    #[serde(rename = "type")]
    pub mode: AuthenticatorMode,

    /// Replica count for the standalone deployment, bounded [1, 5].
    /// Ignored in sidecar mode and when adaptive scale takes effect.
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Workloads to inject into (sidecar) or to scale against (adaptive).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub selector: Option<LabelSelector>,

    /// Port the upstream application listens on.
    #[serde(default)]
    pub app_port: i32,

    /// Name of the upstream service; proxy target in deployment mode and
    /// anchor for adaptive scale.
    #[serde(default)]
    pub app_service: String,

    /// Derive replica count from the upstream deployment instead of
    /// `replicas`. Only meaningful with `appService` set.
    #[serde(default)]
    pub adaptive_scale: bool,

    /// Port the authenticator proxy listens on.
    #[serde(default = "default_authenticator_port")]
    pub authenticator_port: i32,

    /// Pre-existing credential secret. Empty means the operator generates one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_secret_ref: Option<String>,

    /// Service type for the authenticator service: ClusterIP (default),
    /// NodePort or LoadBalancer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
}

fn default_replicas() -> i32 {
    1
}

fn default_authenticator_port() -> i32 {
    80
}

impl BasicAuthenticatorSpec {
    /// Validate field bounds. Cross-object checks (credential secret shape,
    /// mode immutability) live in the admission webhook.
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=5).contains(&self.replicas) {
            return Err(format!(
                "spec.replicas must be between 1 and 5, got {}",
                self.replicas
            ));
        }
        if !(1..=65535).contains(&self.authenticator_port) {
            return Err(format!(
                "spec.authenticatorPort must be a valid port, got {}",
                self.authenticator_port
            ));
        }
        if self.adaptive_scale && self.app_service.is_empty() {
            return Err("spec.adaptiveScale requires spec.appService".to_string());
        }
        Ok(())
    }
}

/// Observed state, written only by the controller.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuthenticatorStatus {
    #[serde(default)]
    pub ready_replicas: i32,

    /// Last known problem, empty when healthy.
    #[serde(default)]
    pub reason: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<AuthenticatorState>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum AuthenticatorState {
    Reconciling,
    Available,
    Deleting,
}

impl fmt::Display for AuthenticatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthenticatorState::Reconciling => write!(f, "Reconciling"),
            AuthenticatorState::Available => write!(f, "Available"),
            AuthenticatorState::Deleting => write!(f, "Deleting"),
        }
    }
}
