//! Admission rules for BasicAuthenticator create and update requests.

use k8s_openapi::api::core::v1::Secret;
use kube::core::admission::{AdmissionRequest, Operation};
use kube::{Api, ResourceExt};
use tracing::warn;

use crate::controller::resources;
use crate::crd::BasicAuthenticator;

use super::server::WebhookServer;

/// Validate one admission request. `Err` carries the denial message.
pub async fn validate_request(
    state: &WebhookServer,
    req: &AdmissionRequest<BasicAuthenticator>,
) -> Result<(), String> {
    if req.operation == Operation::Delete {
        return Ok(());
    }

    let Some(auth) = req.object.as_ref() else {
        return Err("admission request carries no object".to_string());
    };

    auth.spec.validate()?;

    if req.operation == Operation::Update {
        if let Some(old) = req.old_object.as_ref() {
            deny_mode_change(old, auth)?;
        }
    }

    validate_credentials_ref(state, auth).await
}

/// The authenticator mode decides where the proxy runs; flipping it would
/// orphan the previously provisioned shape, so it is immutable.
pub fn deny_mode_change(old: &BasicAuthenticator, new: &BasicAuthenticator) -> Result<(), String> {
    if old.spec.mode != new.spec.mode {
        return Err(format!(
            "spec.type is immutable: cannot change from \"{}\" to \"{}\"",
            old.spec.mode, new.spec.mode
        ));
    }
    Ok(())
}

/// When a credentials secret is referenced, it must exist and carry valid
/// fields. The lookup runs under its own timeout so a slow API server fails
/// the request instead of hanging the webhook.
async fn validate_credentials_ref(
    state: &WebhookServer,
    auth: &BasicAuthenticator,
) -> Result<(), String> {
    let Some(secret_name) = auth
        .spec
        .credentials_secret_ref
        .as_deref()
        .filter(|r| !r.is_empty())
    else {
        return Ok(());
    };

    let namespace = auth.namespace().unwrap_or_else(|| "default".to_string());
    let secrets: Api<Secret> = Api::namespaced(state.client.clone(), &namespace);

    let lookup = tokio::time::timeout(state.config.validation_timeout(), secrets.get(secret_name));
    let secret = match lookup.await {
        Ok(Ok(secret)) => secret,
        Ok(Err(e)) => {
            warn!(secret = secret_name, "credential secret lookup failed: {e}");
            return Err(format!(
                "credentialsSecretRef \"{secret_name}\" could not be read: {e}"
            ));
        }
        Err(_) => {
            return Err(format!(
                "credentialsSecretRef \"{secret_name}\" lookup timed out"
            ));
        }
    };

    resources::validate_credential_secret(&secret).map_err(|e| e.to_string())
}
