//! Custom resource definitions served by this operator.

mod basic_authenticator;

pub use basic_authenticator::{
    AuthenticatorMode, AuthenticatorState, BasicAuthenticator, BasicAuthenticatorSpec,
    BasicAuthenticatorStatus,
};
