//! Provisioning pipeline for BasicAuthenticator resources.
//!
//! An ordered list of sub-steps, each re-fetching the latest instance and
//! returning a [`Verdict`]. The pipeline short-circuits on the first
//! non-Continue verdict; errors bubble to the controller's error policy and
//! requeue with backoff. Generated resource names are committed to the
//! instance (annotations, echoed spec field) before the pipeline advances,
//! so later steps and later cycles observe them.

use std::time::Duration;

use futures::future::BoxFuture;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::{Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::crd::{AuthenticatorMode, AuthenticatorState, BasicAuthenticator};
use crate::error::{Error, Result};

use super::reconciler::ControllerState;
use super::{discovery, resources};
use super::{
    CONFIGMAP_ANNOTATION, EXTERNALLY_MANAGED_ANNOTATION, FIELD_MANAGER, SECRET_ANNOTATION,
};

/// Outcome of one pipeline sub-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Proceed to the next step.
    Continue,
    /// Stop this cycle without error (e.g. the instance is gone).
    HaltOk,
    /// Stop and retry promptly; freshly persisted state must be re-read.
    Requeue,
}

type SubStep = for<'a> fn(&'a ControllerState, &'a str, &'a str) -> BoxFuture<'a, Result<Verdict>>;

fn pipeline() -> [(&'static str, SubStep); 3] {
    fn credentials<'a>(
        state: &'a ControllerState,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Verdict>> {
        Box::pin(ensure_credentials(state, namespace, name))
    }
    fn config_map<'a>(
        state: &'a ControllerState,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Verdict>> {
        Box::pin(ensure_config_map(state, namespace, name))
    }
    fn workload<'a>(
        state: &'a ControllerState,
        namespace: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Verdict>> {
        Box::pin(ensure_workload(state, namespace, name))
    }

    [
        ("ensure-credentials", credentials as SubStep),
        ("ensure-configmap", config_map as SubStep),
        ("ensure-workload", workload as SubStep),
    ]
}

/// Run the full provisioning pipeline for one instance.
#[instrument(skip(state, auth), fields(name = %auth.name_any(), namespace = auth.namespace()))]
pub async fn apply(state: &ControllerState, auth: &BasicAuthenticator) -> Result<Action> {
    let namespace = auth.namespace().unwrap_or_else(|| "default".to_string());
    let name = auth.name_any();

    if let Err(e) = auth.spec.validate() {
        warn!("validation failed for {}/{}: {}", namespace, name, e);
        let _ = patch_status(
            &state.client,
            &namespace,
            &name,
            serde_json::json!({ "reason": e }),
        )
        .await;
        return Err(Error::ValidationError(e));
    }

    if auth.status.as_ref().and_then(|s| s.state).is_none() {
        patch_status(
            &state.client,
            &namespace,
            &name,
            serde_json::json!({ "state": AuthenticatorState::Reconciling }),
        )
        .await?;
    }

    for (step_name, step) in pipeline() {
        match step(state, &namespace, &name).await {
            Ok(Verdict::Continue) => {}
            Ok(Verdict::HaltOk) => {
                debug!(step = step_name, "halting reconcile, nothing left to do");
                return Ok(Action::await_change());
            }
            Ok(Verdict::Requeue) => {
                debug!(step = step_name, "requeueing to pick up persisted state");
                return Ok(Action::requeue(Duration::from_secs(1)));
            }
            Err(err) => {
                warn!(step = step_name, error = %err, "pipeline step failed");
                // Best effort: surface the failure in status before retrying.
                let _ = patch_status(
                    &state.client,
                    &namespace,
                    &name,
                    serde_json::json!({ "reason": err.to_string() }),
                )
                .await;
                return Err(err);
            }
        }
    }

    mark_available(state, &namespace, &name).await?;

    Ok(Action::requeue(Duration::from_secs(300)))
}

/// Fetch the latest instance; `None` means it was deleted.
pub async fn get_latest(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<Option<BasicAuthenticator>> {
    let api: Api<BasicAuthenticator> = Api::namespaced(client.clone(), namespace);
    match api.get(name).await {
        Ok(auth) => Ok(Some(auth)),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            info!("BasicAuthenticator not found, must be deleted");
            Ok(None)
        }
        Err(e) => Err(Error::KubeError(e)),
    }
}

fn assign_annotation(auth: &mut BasicAuthenticator, key: &str, value: &str) -> bool {
    let annotations = auth.annotations_mut();
    if annotations.get(key).map(String::as_str) == Some(value) {
        return false;
    }
    annotations.insert(key.to_string(), value.to_string());
    true
}

/// Step 1: make sure a valid credential secret exists and its name is
/// recorded on the instance.
async fn ensure_credentials(
    state: &ControllerState,
    namespace: &str,
    name: &str,
) -> Result<Verdict> {
    let Some(mut auth) = get_latest(&state.client, namespace, name).await? else {
        return Ok(Verdict::HaltOk);
    };
    let api: Api<BasicAuthenticator> = Api::namespaced(state.client.clone(), namespace);
    let secrets: Api<Secret> = Api::namespaced(state.client.clone(), namespace);

    let supplied_ref = auth
        .spec
        .credentials_secret_ref
        .clone()
        .filter(|r| !r.is_empty());

    match supplied_ref {
        None => {
            let secret = resources::build_credentials_secret(&auth)?;
            let secret_name = secret.name_any();
            match secrets.get(&secret_name).await {
                Err(kube::Error::Api(e)) if e.code == 404 => {
                    secrets.create(&PostParams::default(), &secret).await?;
                    info!(secret = %secret_name, "created generated credentials secret");

                    // Pin the generated name: annotation for the pipeline,
                    // spec echo for idempotent lookups on later cycles.
                    auth.spec.credentials_secret_ref = Some(secret_name.clone());
                    assign_annotation(&mut auth, SECRET_ANNOTATION, &secret_name);
                    api.replace(name, &PostParams::default(), &auth).await?;
                    Ok(Verdict::Requeue)
                }
                // The random name collided with a live object; retry with a
                // fresh name next cycle.
                Ok(_) => Ok(Verdict::Requeue),
                Err(e) => Err(Error::KubeError(e)),
            }
        }
        Some(secret_name) => {
            let secret = secrets.get(&secret_name).await?;
            resources::validate_credential_secret(&secret)?;

            if assign_annotation(&mut auth, SECRET_ANNOTATION, &secret_name) {
                api.replace(name, &PostParams::default(), &auth).await?;
            }
            Ok(Verdict::Continue)
        }
    }
}

/// Step 2: converge the nginx ConfigMap on the rendered configuration and
/// record its name. Content comparison is byte-for-byte; identical content
/// is a no-op.
async fn ensure_config_map(
    state: &ControllerState,
    namespace: &str,
    name: &str,
) -> Result<Verdict> {
    let Some(mut auth) = get_latest(&state.client, namespace, name).await? else {
        return Ok(Verdict::HaltOk);
    };
    let api: Api<BasicAuthenticator> = Api::namespaced(state.client.clone(), namespace);
    let config_maps: Api<ConfigMap> = Api::namespaced(state.client.clone(), namespace);

    let desired = resources::build_nginx_config_map(&auth);
    let config_map_name = desired.name_any();

    match config_maps.get(&config_map_name).await {
        Err(kube::Error::Api(e)) if e.code == 404 => {
            config_maps.create(&PostParams::default(), &desired).await?;
            info!(configmap = %config_map_name, "created nginx configmap");

            assign_annotation(&mut auth, CONFIGMAP_ANNOTATION, &config_map_name);
            api.replace(name, &PostParams::default(), &auth).await?;
            Ok(Verdict::Requeue)
        }
        Ok(mut found) => {
            if found.data != desired.data {
                info!(configmap = %config_map_name, "updating nginx configmap");
                found.data = desired.data;
                config_maps
                    .replace(&config_map_name, &PostParams::default(), &found)
                    .await?;
            }
            if assign_annotation(&mut auth, CONFIGMAP_ANNOTATION, &config_map_name) {
                api.replace(name, &PostParams::default(), &auth).await?;
            }
            Ok(Verdict::Continue)
        }
        Err(e) => Err(Error::KubeError(e)),
    }
}

/// Step 3: converge the workload, branching on the authenticator mode.
/// Requires the names committed by the previous steps.
async fn ensure_workload(state: &ControllerState, namespace: &str, name: &str) -> Result<Verdict> {
    let Some(auth) = get_latest(&state.client, namespace, name).await? else {
        return Ok(Verdict::HaltOk);
    };

    let annotations = auth.annotations();
    let config_map_name = annotations
        .get(CONFIGMAP_ANNOTATION)
        .cloned()
        .ok_or_else(|| Error::MissingAnnotation(CONFIGMAP_ANNOTATION.to_string()))?;
    let secret_name = annotations
        .get(SECRET_ANNOTATION)
        .cloned()
        .ok_or_else(|| Error::MissingAnnotation(SECRET_ANNOTATION.to_string()))?;

    match auth.spec.mode {
        AuthenticatorMode::Sidecar => {
            ensure_sidecar_injection(state, &auth, &config_map_name, &secret_name).await
        }
        AuthenticatorMode::Deployment => {
            ensure_standalone_deployment(state, &auth, &config_map_name, &secret_name).await
        }
    }
}

/// Standalone mode: create or converge the owned proxy Deployment, then
/// mirror its ready-replica count into status, then ensure the Service.
async fn ensure_standalone_deployment(
    state: &ControllerState,
    auth: &BasicAuthenticator,
    config_map_name: &str,
    secret_name: &str,
) -> Result<Verdict> {
    let namespace = auth.namespace().unwrap_or_else(|| "default".to_string());
    let name = auth.name_any();
    let deployments: Api<Deployment> = Api::namespaced(state.client.clone(), &namespace);

    let mut desired =
        resources::build_nginx_deployment(auth, config_map_name, secret_name, &state.config);
    let deployment_name = desired.name_any();

    if auth.spec.adaptive_scale && !auth.spec.app_service.is_empty() {
        let replicas = acquire_target_replicas(state, auth).await?;
        if let Some(spec) = desired.spec.as_mut() {
            spec.replicas = Some(replicas);
        }
    }

    let desired_hash = desired
        .spec
        .as_ref()
        .map(resources::spec_hash)
        .unwrap_or_default();
    desired.annotations_mut().insert(
        resources::SPEC_HASH_ANNOTATION.to_string(),
        desired_hash.clone(),
    );

    match deployments.get(&deployment_name).await {
        Err(kube::Error::Api(e)) if e.code == 404 => {
            deployments.create(&PostParams::default(), &desired).await?;
            info!(deployment = %deployment_name, "created nginx deployment");
            Ok(Verdict::Requeue)
        }
        Ok(mut found) => {
            let found_hash = found
                .annotations()
                .get(resources::SPEC_HASH_ANNOTATION)
                .cloned()
                .unwrap_or_default();
            if found_hash != desired_hash {
                info!(deployment = %deployment_name, "updating nginx deployment");
                found.spec = desired.spec;
                found.annotations_mut().insert(
                    resources::SPEC_HASH_ANNOTATION.to_string(),
                    desired_hash,
                );
                deployments
                    .replace(&deployment_name, &PostParams::default(), &found)
                    .await?;
                found = deployments.get(&deployment_name).await?;
            }

            let ready = found
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0);
            let recorded = auth
                .status
                .as_ref()
                .map(|s| s.ready_replicas)
                .unwrap_or(0);
            if ready != recorded {
                patch_status(
                    &state.client,
                    &namespace,
                    &name,
                    serde_json::json!({ "readyReplicas": ready }),
                )
                .await?;
            }

            ensure_service(state, auth).await?;
            Ok(Verdict::Continue)
        }
        Err(e) => Err(Error::KubeError(e)),
    }
}

/// Create the authenticator Service if absent. The Service spec is stable,
/// so exists means done.
async fn ensure_service(state: &ControllerState, auth: &BasicAuthenticator) -> Result<()> {
    let namespace = auth.namespace().unwrap_or_else(|| "default".to_string());
    let services: Api<Service> = Api::namespaced(state.client.clone(), &namespace);

    let desired = resources::build_nginx_service(auth);
    let service_name = desired.name_any();

    match services.get(&service_name).await {
        Err(kube::Error::Api(e)) if e.code == 404 => {
            services.create(&PostParams::default(), &desired).await?;
            info!(service = %service_name, "created authenticator service");
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(e) => Err(Error::KubeError(e)),
    }
}

/// Sidecar mode: discover deployments matching the selector and inject the
/// proxy into every one not already carrying the injection marker. Foreign
/// deployments never receive owner references.
async fn ensure_sidecar_injection(
    state: &ControllerState,
    auth: &BasicAuthenticator,
    config_map_name: &str,
    secret_name: &str,
) -> Result<Verdict> {
    let namespace = auth.namespace().unwrap_or_else(|| "default".to_string());
    let deployments: Api<Deployment> = Api::namespaced(state.client.clone(), &namespace);

    // An absent or empty selector matches nothing, not everything.
    let Some(match_labels) = auth
        .spec
        .selector
        .as_ref()
        .and_then(|s| s.match_labels.clone())
        .filter(|l| !l.is_empty())
    else {
        warn!("sidecar mode without a selector matches no deployments");
        return Ok(Verdict::Continue);
    };

    let targets: Vec<Deployment> =
        discovery::find_by_labels(&state.client, &namespace, &match_labels).await?;

    for mut target in targets {
        if resources::is_injected(&target) {
            continue;
        }
        let target_name = target.name_any();
        resources::inject_sidecar(&mut target, auth, config_map_name, secret_name, &state.config);
        deployments
            .replace(&target_name, &PostParams::default(), &target)
            .await?;
        info!(deployment = %target_name, "injected authenticator sidecar");
    }

    Ok(Verdict::Continue)
}

/// Adaptive scale: resolve the upstream service's deployment and derive the
/// target replica count from its live replicas. The chosen deployment is
/// marked externally managed so its changes re-trigger this instance.
async fn acquire_target_replicas(
    state: &ControllerState,
    auth: &BasicAuthenticator,
) -> Result<i32> {
    let namespace = auth.namespace().unwrap_or_else(|| "default".to_string());
    let services: Api<Service> = Api::namespaced(state.client.clone(), &namespace);
    let deployments: Api<Deployment> = Api::namespaced(state.client.clone(), &namespace);

    let service = services.get(&auth.spec.app_service).await?;
    let selector = service
        .spec
        .and_then(|s| s.selector)
        .unwrap_or_default();
    if selector.is_empty() {
        return Err(Error::NoUpstreamTarget);
    }

    let mut targets: Vec<Deployment> =
        discovery::find_by_labels(&state.client, &namespace, &selector).await?;
    if targets.is_empty() {
        return Err(Error::NoUpstreamTarget);
    }
    if targets.len() > 1 {
        warn!(
            service = %auth.spec.app_service,
            matches = targets.len(),
            "appService selector matches multiple deployments, using first by name"
        );
        targets.sort_by_key(|d| d.name_any());
    }
    let mut upstream = targets.remove(0);
    let upstream_name = upstream.name_any();

    let marker = auth.name_any();
    if upstream.annotations().get(EXTERNALLY_MANAGED_ANNOTATION) != Some(&marker) {
        upstream
            .annotations_mut()
            .insert(EXTERNALLY_MANAGED_ANNOTATION.to_string(), marker);
        deployments
            .replace(&upstream_name, &PostParams::default(), &upstream)
            .await?;
    }

    let replicas = upstream
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    Ok(resources::target_replicas(replicas))
}

/// Merge-patch the status subresource.
pub async fn patch_status(
    client: &Client,
    namespace: &str,
    name: &str,
    status: serde_json::Value,
) -> Result<()> {
    let api: Api<BasicAuthenticator> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await
    .map_err(Error::KubeError)?;
    Ok(())
}

async fn mark_available(state: &ControllerState, namespace: &str, name: &str) -> Result<()> {
    let Some(auth) = get_latest(&state.client, namespace, name).await? else {
        return Ok(());
    };
    let already_available = auth
        .status
        .as_ref()
        .map(|s| s.state == Some(AuthenticatorState::Available) && s.reason.is_empty())
        .unwrap_or(false);
    if already_available {
        return Ok(());
    }
    patch_status(
        &state.client,
        namespace,
        name,
        serde_json::json!({ "state": AuthenticatorState::Available, "reason": "" }),
    )
    .await
}
