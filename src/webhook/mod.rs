//! Validating admission webhook for BasicAuthenticator resources.

mod server;
mod validation;

pub use server::{WebhookServer, TlsConfig};
