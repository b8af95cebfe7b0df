//! Main reconciler for BasicAuthenticator resources
//!
//! Implements the controller pattern using kube-rs runtime.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{
    api::Api,
    client::Client,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        reflector::ObjectRef,
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{error, info, instrument};

use crate::config::OperatorConfig;
use crate::crd::BasicAuthenticator;
use crate::error::{Error, Result};

use super::{cleanup, provision, BASIC_AUTHENTICATOR_FINALIZER, EXTERNALLY_MANAGED_ANNOTATION};

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub config: OperatorConfig,
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let authenticators: Api<BasicAuthenticator> = Api::all(client.clone());

    info!("Starting BasicAuthenticator controller");

    // Verify CRD exists
    match authenticators.list(&Default::default()).await {
        Ok(_) => info!("BasicAuthenticator CRD is available"),
        Err(e) => {
            error!(
                "BasicAuthenticator CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "BasicAuthenticator CRD not installed".to_string(),
            ));
        }
    }

    Controller::new(authenticators, Config::default())
        // Watch owned resources for changes
        .owns::<Deployment>(Api::all(client.clone()), Config::default())
        .owns::<ConfigMap>(Api::all(client.clone()), Config::default())
        .owns::<Secret>(Api::all(client.clone()), Config::default())
        // Upstream deployments marked externally managed re-trigger the
        // instance whose adaptive scale tracks them.
        .watches(
            Api::<Deployment>::all(client.clone()),
            Config::default(),
            externally_managed_mapper,
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => info!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

/// Map a deployment carrying the externally-managed annotation back to the
/// BasicAuthenticator named by it.
fn externally_managed_mapper(deployment: Deployment) -> Option<ObjectRef<BasicAuthenticator>> {
    let owner = deployment.annotations().get(EXTERNALLY_MANAGED_ANNOTATION)?;
    let namespace = deployment.namespace()?;
    Some(ObjectRef::new(owner).within(&namespace))
}

/// The main reconciliation function
///
/// This function is called whenever:
/// - A BasicAuthenticator is created, updated, or deleted
/// - An owned resource (Deployment, ConfigMap, Secret) changes
/// - An externally-managed upstream deployment changes
/// - The requeue timer expires
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<BasicAuthenticator>, ctx: Arc<ControllerState>) -> Result<Action> {
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<BasicAuthenticator> = Api::namespaced(ctx.client.clone(), &namespace);

    info!(
        "Reconciling BasicAuthenticator {}/{} (mode: {})",
        namespace,
        obj.name_any(),
        obj.spec.mode
    );

    // Use kube-rs built-in finalizer helper for clean lifecycle management
    finalizer(&api, BASIC_AUTHENTICATOR_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(auth) => provision::apply(&ctx, &auth).await,
            FinalizerEvent::Cleanup(auth) => cleanup::cleanup(&ctx, &auth).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}

/// Error policy determines how to handle reconciliation errors
fn error_policy(
    auth: Arc<BasicAuthenticator>,
    error: &Error,
    _ctx: Arc<ControllerState>,
) -> Action {
    error!("Reconciliation error for {}: {:?}", auth.name_any(), error);

    // Use shorter retry for retriable errors
    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}
