//! Admission Webhook Server
//!
//! This module implements a Kubernetes ValidatingAdmissionWebhook server
//! for BasicAuthenticator admission: spec validation, mode immutability and
//! referenced credential secret checks.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::Client;
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::config::OperatorConfig;
use crate::crd::BasicAuthenticator;
use crate::error::{Error, Result};

use super::validation;

/// Webhook server state
pub struct WebhookServer {
    pub client: Client,
    pub config: OperatorConfig,
    tls_config: Option<TlsConfig>,
}

/// TLS configuration for the webhook server
#[derive(Clone)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
}

impl WebhookServer {
    /// Create a new webhook server
    pub fn new(client: Client, config: OperatorConfig) -> Self {
        Self {
            client,
            config,
            tls_config: None,
        }
    }

    /// Configure TLS
    pub fn with_tls(mut self, cert_path: String, key_path: String) -> Self {
        self.tls_config = Some(TlsConfig {
            cert_path,
            key_path,
        });
        self
    }

    /// Start the webhook server
    pub async fn start(self, addr: SocketAddr) -> Result<()> {
        let tls_config = self.tls_config.clone();
        let state = Arc::new(self);

        let app = Router::new()
            .route("/healthz", get(health_handler))
            .route(
                "/validate-authenticator-snappcloud-io-v1alpha1-basicauthenticator",
                post(validate_handler),
            )
            .with_state(state);

        info!("Starting webhook server on {}", addr);

        match tls_config {
            Some(tls) => {
                let rustls = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                    .await
                    .map_err(|e| Error::ConfigError(format!("failed to load TLS keypair: {e}")))?;
                axum_server::bind_rustls(addr, rustls)
                    .serve(app.into_make_service())
                    .await
                    .map_err(|e| Error::ConfigError(format!("webhook server error: {e}")))?;
            }
            None => {
                axum_server::bind(addr)
                    .serve(app.into_make_service())
                    .await
                    .map_err(|e| Error::ConfigError(format!("webhook server error: {e}")))?;
            }
        }

        Ok(())
    }
}

// HTTP Handlers

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

#[instrument(skip(state, review))]
async fn validate_handler(
    State(state): State<Arc<WebhookServer>>,
    Json(review): Json<AdmissionReview<BasicAuthenticator>>,
) -> impl IntoResponse {
    let req: AdmissionRequest<BasicAuthenticator> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!("Failed to parse admission request: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    AdmissionResponse::invalid(format!("Invalid admission request: {e}"))
                        .into_review(),
                ),
            );
        }
    };

    let response = match validation::validate_request(&state, &req).await {
        Ok(()) => AdmissionResponse::from(&req),
        Err(reason) => {
            info!("Denying {:?} of {}: {}", req.operation, req.name, reason);
            AdmissionResponse::from(&req).deny(reason)
        }
    };

    (StatusCode::OK, Json(response.into_review()))
}
