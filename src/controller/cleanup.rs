//! Finalizer cleanup for BasicAuthenticator resources.
//!
//! Engine-created dependents (Secret, ConfigMap, standalone Deployment,
//! Service) carry owner references and are garbage collected by the API
//! server. What needs active work is reversing sidecar injection: foreign
//! deployments must get their proxy container, mounted volumes, ownership
//! label and injection marker removed before the finalizer is released.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::PostParams;
use kube::runtime::controller::Action;
use kube::{Api, ResourceExt};
use tracing::{info, instrument};

use crate::crd::{AuthenticatorMode, AuthenticatorState, BasicAuthenticator};
use crate::error::Result;

use super::reconciler::ControllerState;
use super::{discovery, provision, resources};

/// Run cleanup for a deleted instance. Returning `Ok` releases the finalizer.
#[instrument(skip(state, auth), fields(name = %auth.name_any(), namespace = auth.namespace()))]
pub async fn cleanup(state: &ControllerState, auth: &BasicAuthenticator) -> Result<Action> {
    let namespace = auth.namespace().unwrap_or_else(|| "default".to_string());
    let name = auth.name_any();

    let Some(latest) = provision::get_latest(&state.client, &namespace, &name).await? else {
        return Ok(Action::await_change());
    };

    if latest.status.as_ref().and_then(|s| s.state) != Some(AuthenticatorState::Deleting) {
        provision::patch_status(
            &state.client,
            &namespace,
            &name,
            serde_json::json!({ "state": AuthenticatorState::Deleting }),
        )
        .await?;
    }

    if latest.spec.mode == AuthenticatorMode::Sidecar {
        remove_injected_resources(state, &latest, &namespace).await?;
    }

    info!("cleanup complete, releasing finalizer");
    Ok(Action::await_change())
}

/// Strip the sidecar mutation from every deployment labelled as owned by
/// this instance. Volume names match the generated secret and configmap
/// object names, so those are discovered by the same label.
async fn remove_injected_resources(
    state: &ControllerState,
    auth: &BasicAuthenticator,
    namespace: &str,
) -> Result<()> {
    let labels = resources::ownership_labels(auth);

    let targets: Vec<Deployment> =
        discovery::find_by_labels(&state.client, namespace, &labels).await?;
    if targets.is_empty() {
        return Ok(());
    }

    let secrets: Vec<Secret> = discovery::find_by_labels(&state.client, namespace, &labels).await?;
    let config_maps: Vec<ConfigMap> =
        discovery::find_by_labels(&state.client, namespace, &labels).await?;

    let secret_names: Vec<String> = secrets.iter().map(ResourceExt::name_any).collect();
    let config_map_names: Vec<String> = config_maps.iter().map(ResourceExt::name_any).collect();

    let stripped = resources::strip_injected_resources(
        targets,
        &secret_names,
        &config_map_names,
        state.config.nginx_container_name(),
    );

    let deployments: Api<Deployment> = Api::namespaced(state.client.clone(), namespace);
    for deployment in stripped {
        let deployment_name = deployment.name_any();
        deployments
            .replace(&deployment_name, &PostParams::default(), &deployment)
            .await?;
        info!(deployment = %deployment_name, "removed injected sidecar");
    }
    Ok(())
}
