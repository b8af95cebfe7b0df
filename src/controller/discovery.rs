//! Label-selector discovery of resources tied to a BasicAuthenticator.
//!
//! One generic list helper serves deployments, config maps and secrets alike.
//! Scope is a single namespace; cardinality is bounded, so no pagination.

use std::collections::BTreeMap;
use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::api::ListParams;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;

use crate::error::Result;

/// List namespaced resources of kind `K` matching all of the given labels.
pub async fn find_by_labels<K>(
    client: &Client,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Result<Vec<K>>
where
    K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(&selector_string(labels));
    Ok(api.list(&params).await?.items)
}

/// Render a label map as a `k1=v1,k2=v2` selector. BTreeMap ordering keeps
/// the result deterministic.
pub fn selector_string(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}
