//! Controller module for BasicAuthenticator reconciliation
//! This module contains the main controller loop, the provisioning pipeline,
//! cleanup handling and the Kubernetes resource builders.

mod cleanup;
pub mod discovery;
mod provision;
mod reconciler;
pub mod resources;
#[cfg(test)]
mod resources_test;

pub use reconciler::{run_controller, ControllerState};

/// Field manager used for server-side patches issued by this operator.
pub const FIELD_MANAGER: &str = "basicauth-operator";

/// Finalizer guarding deletion until injected resources are stripped.
pub const BASIC_AUTHENTICATOR_FINALIZER: &str = "basicauthenticator.snappcloud.io/finalizer";

/// Instance annotation recording the credential Secret name.
pub const SECRET_ANNOTATION: &str = "authenticator.snappcloud.io/secret.name";

/// Instance annotation recording the nginx ConfigMap name.
pub const CONFIGMAP_ANNOTATION: &str = "authenticator.snappcloud.io/configmap.name";

/// Annotation stamped on an upstream deployment whose replica count drives
/// adaptive scale. Holds the managing instance name.
pub const EXTERNALLY_MANAGED_ANNOTATION: &str = "basicauthenticator.snappcloud.io/externally.managed";

/// Annotation marking a foreign deployment as already carrying the sidecar.
pub const INJECTION_MARKER_ANNOTATION: &str = "basic.authenticator.inject/revision";

/// Label tying generated and mutated resources back to their instance.
pub const NAME_LABEL: &str = "basicauthenticator.snappcloud.io/name";
