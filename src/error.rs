//! Error types shared across the operator.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("finalizer error: {0}")]
    FinalizerError(#[from] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("validation failed: {0}")]
    ValidationError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A pipeline step observed state that a previous step should have
    /// committed (generated resource names are carried as annotations).
    #[error("missing annotation {0} on BasicAuthenticator")]
    MissingAnnotation(String),

    #[error("htpasswd hashing failed: {0}")]
    HashError(String),

    #[error("no deployment matched the appService selector")]
    NoUpstreamTarget,

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// Whether a shorter requeue interval is warranted.
    ///
    /// API errors and half-committed pipeline state converge on retry;
    /// validation and configuration problems need user action first.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::KubeError(_)
                | Error::FinalizerError(_)
                | Error::MissingAnnotation(_)
                | Error::NoUpstreamTarget
        )
    }
}
