//! Basicauth-Operator: Kubernetes Operator for HTTP Basic Authentication
//!
//! This crate provides a Kubernetes operator that provisions nginx
//! reverse proxies enforcing HTTP basic authentication in front of
//! workloads, either as standalone deployments or injected sidecars.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod htpasswd;

#[cfg(feature = "admission-webhook")]
pub mod webhook;

pub use crate::error::{Error, Result};
