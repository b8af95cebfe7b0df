//! Kubernetes resource builders for BasicAuthenticator
//!
//! Pure functions producing the desired representations of the nginx
//! ConfigMap, the credential Secret, the standalone proxy Deployment and the
//! authenticator Service, plus the sidecar injection/strip mutations applied
//! to foreign deployments. Nothing here talks to the API server.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, KeyToPath, PodSpec,
    PodTemplateSpec, Secret, SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::config::OperatorConfig;
use crate::crd::{AuthenticatorMode, BasicAuthenticator};
use crate::error::{Error, Result};
use crate::htpasswd;

use super::{INJECTION_MARKER_ANNOTATION, NAME_LABEL};

/// Annotation on the generated deployment recording the hash of the
/// rendered spec. Compared instead of the server-defaulted object so an
/// unchanged instance causes no write.
pub const SPEC_HASH_ANNOTATION: &str = "basicauthenticator.snappcloud.io/spec.hash";

/// Where the rendered nginx.conf is mounted inside the proxy container.
pub const CONFIG_MOUNT_PATH: &str = "/etc/nginx/conf.d";

/// Directory the credential secret is mounted at.
pub const SECRET_MOUNT_DIR: &str = "/etc/secret";

/// Full path of the htpasswd file referenced by the nginx config.
pub const SECRET_MOUNT_PATH: &str = "/etc/secret/htpasswd";

/// Secret data key holding the `user:hash` line.
pub const SECRET_HTPASSWD_FIELD: &str = "htpasswd";

const NGINX_TEMPLATE: &str = r#"server {
	listen AUTHENTICATOR_PORT;
	location / {
		resolver    8.8.8.8;
		auth_basic	"basic authentication area";
		auth_basic_user_file "FILE_PATH";
		proxy_pass http://APP_SERVICE:APP_PORT;
		proxy_set_header Host $host;
		proxy_set_header X-Real-IP $remote_addr;
		proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
		proxy_set_header X-Forwarded-Proto $scheme;
	}
}"#;

/// Ownership label identifying resources logically owned by an instance.
/// Used for reverse lookup by cleanup and by sidecar discovery.
pub fn ownership_labels(auth: &BasicAuthenticator) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(NAME_LABEL.to_string(), auth.name_any());
    labels
}

/// OwnerReference for garbage collection of engine-created dependents.
/// Never applied to foreign (sidecar-injected) workloads.
pub fn owner_reference(auth: &BasicAuthenticator) -> OwnerReference {
    OwnerReference {
        api_version: BasicAuthenticator::api_version(&()).to_string(),
        kind: BasicAuthenticator::kind(&()).to_string(),
        name: auth.name_any(),
        uid: auth.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Render the nginx reverse-proxy configuration document.
///
/// Each placeholder is substituted first-match-only, so substituted values
/// must never themselves contain a placeholder token. The upstream host is
/// `localhost` in sidecar mode (proxy shares the pod network) and the
/// upstream service name otherwise.
pub fn fill_template(secret_path: &str, auth: &BasicAuthenticator) -> String {
    let upstream_host = match auth.spec.mode {
        AuthenticatorMode::Sidecar => "localhost",
        AuthenticatorMode::Deployment => auth.spec.app_service.as_str(),
    };
    NGINX_TEMPLATE
        .replacen(
            "AUTHENTICATOR_PORT",
            &auth.spec.authenticator_port.to_string(),
            1,
        )
        .replacen("FILE_PATH", secret_path, 1)
        .replacen("APP_SERVICE", upstream_host, 1)
        .replacen("APP_PORT", &auth.spec.app_port.to_string(), 1)
}

/// Deterministic per-instance ConfigMap name.
pub fn config_map_name(auth: &BasicAuthenticator) -> String {
    htpasswd::generate_random_name(&auth.name_any(), "configmap")
}

/// Deterministic per-instance Deployment name.
pub fn deployment_name(auth: &BasicAuthenticator) -> String {
    htpasswd::generate_random_name(&auth.name_any(), "deployment")
}

/// Build the ConfigMap carrying the rendered nginx configuration.
/// Content is a pure function of the spec; rendering twice yields
/// byte-identical data.
pub fn build_nginx_config_map(auth: &BasicAuthenticator) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert(
        "nginx.conf".to_string(),
        fill_template(SECRET_MOUNT_PATH, auth),
    );

    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config_map_name(auth)),
            namespace: auth.namespace(),
            labels: Some(ownership_labels(auth)),
            owner_references: Some(vec![owner_reference(auth)]),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Generate a fresh credential Secret: random username/password plus the
/// salted `$apr1$` htpasswd line. The name embeds a random salt so it is not
/// guessable; once created it is pinned via the instance annotation.
pub fn build_credentials_secret(auth: &BasicAuthenticator) -> Result<Secret> {
    let username = htpasswd::generate_random_string(20);
    let password = htpasswd::generate_random_string(20);
    let hash_salt = htpasswd::generate_random_string(8);
    let name_salt = htpasswd::generate_random_string(10);

    let hashed = htpasswd::apr1_hash(&password, &hash_salt)?;

    let mut string_data = BTreeMap::new();
    string_data.insert("username".to_string(), username.clone());
    string_data.insert("password".to_string(), password);
    string_data.insert(
        SECRET_HTPASSWD_FIELD.to_string(),
        format!("{username}:{hashed}"),
    );

    Ok(Secret {
        metadata: ObjectMeta {
            name: Some(htpasswd::generate_random_name(
                &auth.name_any(),
                &name_salt,
            )),
            namespace: auth.namespace(),
            labels: Some(ownership_labels(auth)),
            owner_references: Some(vec![owner_reference(auth)]),
            ..Default::default()
        },
        string_data: Some(string_data),
        ..Default::default()
    })
}

/// Validate a credential secret: `username` and `password` are required;
/// an optional `htpasswd` field must have the `user:hash` shape.
pub fn validate_credential_secret(secret: &Secret) -> Result<()> {
    let empty = BTreeMap::new();
    let data = secret.data.as_ref().unwrap_or(&empty);

    for field in ["username", "password"] {
        if !data.contains_key(field) {
            return Err(Error::ValidationError(format!(
                "credentials secret is missing the \"{field}\" field"
            )));
        }
    }

    if let Some(line) = data.get(SECRET_HTPASSWD_FIELD) {
        let line = String::from_utf8(line.0.clone()).map_err(|_| {
            Error::ValidationError("htpasswd field is not valid UTF-8".to_string())
        })?;
        if !htpasswd::validate_htpasswd_format(line.trim()) {
            return Err(Error::ValidationError(
                "htpasswd field must look like \"username:hash\"".to_string(),
            ));
        }
    }
    Ok(())
}

fn nginx_container(
    auth: &BasicAuthenticator,
    config_map_name: &str,
    secret_name: &str,
    config: &OperatorConfig,
) -> Container {
    Container {
        name: config.nginx_container_name().to_string(),
        image: Some(config.nginx_image().to_string()),
        ports: Some(vec![ContainerPort {
            container_port: auth.spec.authenticator_port,
            ..Default::default()
        }]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: config_map_name.to_string(),
                mount_path: CONFIG_MOUNT_PATH.to_string(),
                ..Default::default()
            },
            VolumeMount {
                name: secret_name.to_string(),
                mount_path: SECRET_MOUNT_DIR.to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

fn config_volume(config_map_name: &str) -> Volume {
    Volume {
        name: config_map_name.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(config_map_name.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn credential_volume(secret_name: &str) -> Volume {
    Volume {
        name: secret_name.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(secret_name.to_string()),
            items: Some(vec![KeyToPath {
                key: SECRET_HTPASSWD_FIELD.to_string(),
                path: SECRET_HTPASSWD_FIELD.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the standalone proxy Deployment, owned by the instance.
pub fn build_nginx_deployment(
    auth: &BasicAuthenticator,
    config_map_name: &str,
    secret_name: &str,
    config: &OperatorConfig,
) -> Deployment {
    let name = deployment_name(auth);

    let mut labels = ownership_labels(auth);
    labels.insert("app".to_string(), name.clone());

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: auth.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(auth)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(auth.spec.replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(name),
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![nginx_container(auth, config_map_name, secret_name, config)],
                    volumes: Some(vec![
                        config_volume(config_map_name),
                        credential_volume(secret_name),
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Build the Service exposing the authenticator port.
pub fn build_nginx_service(auth: &BasicAuthenticator) -> Service {
    let selector = match auth.spec.mode {
        // Standalone mode fronts the proxy deployment itself.
        AuthenticatorMode::Deployment => {
            let mut labels = ownership_labels(auth);
            labels.insert("app".to_string(), deployment_name(auth));
            labels
        }
        AuthenticatorMode::Sidecar => auth
            .spec
            .selector
            .as_ref()
            .and_then(|s| s.match_labels.clone())
            .unwrap_or_default(),
    };

    Service {
        metadata: ObjectMeta {
            name: Some(format!("{}-svc", auth.name_any())),
            namespace: auth.namespace(),
            labels: Some(ownership_labels(auth)),
            owner_references: Some(vec![owner_reference(auth)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(selector),
            type_: Some(service_type(auth.spec.service_type.as_deref())),
            ports: Some(vec![ServicePort {
                name: Some("authenticator".to_string()),
                port: auth.spec.authenticator_port,
                target_port: Some(IntOrString::Int(auth.spec.authenticator_port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service_type(requested: Option<&str>) -> String {
    match requested {
        Some("NodePort") => "NodePort".to_string(),
        Some("LoadBalancer") => "LoadBalancer".to_string(),
        _ => "ClusterIP".to_string(),
    }
}

/// Whether a foreign deployment already carries the sidecar mutation.
pub fn is_injected(deployment: &Deployment) -> bool {
    deployment
        .annotations()
        .contains_key(INJECTION_MARKER_ANNOTATION)
}

/// Append the proxy container and its two volumes to a foreign deployment,
/// and mark it with the injection annotation plus the ownership label.
///
/// Append-only: existing containers and volumes are never touched. The
/// idempotency guard ([`is_injected`]) lives at the call site.
pub fn inject_sidecar(
    deployment: &mut Deployment,
    auth: &BasicAuthenticator,
    config_map_name: &str,
    secret_name: &str,
    config: &OperatorConfig,
) {
    deployment
        .labels_mut()
        .insert(NAME_LABEL.to_string(), auth.name_any());
    deployment.annotations_mut().insert(
        INJECTION_MARKER_ANNOTATION.to_string(),
        "1".to_string(),
    );

    let Some(pod_spec) = deployment
        .spec
        .as_mut()
        .map(|s| s.template.spec.get_or_insert_with(Default::default))
    else {
        return;
    };

    pod_spec
        .containers
        .push(nginx_container(auth, config_map_name, secret_name, config));
    pod_spec
        .volumes
        .get_or_insert_with(Vec::new)
        .extend([config_volume(config_map_name), credential_volume(secret_name)]);
}

/// Reverse of [`inject_sidecar`]: drop the proxy container by name, drop
/// volumes whose name matches a discovered credential or config object,
/// and remove the ownership label and injection marker. Everything else is
/// left untouched.
pub fn strip_injected_resources(
    mut deployments: Vec<Deployment>,
    secret_names: &[String],
    config_map_names: &[String],
    container_name: &str,
) -> Vec<Deployment> {
    for deployment in &mut deployments {
        if let Some(pod_spec) = deployment
            .spec
            .as_mut()
            .and_then(|s| s.template.spec.as_mut())
        {
            pod_spec
                .containers
                .retain(|container| container.name != container_name);
            if let Some(volumes) = pod_spec.volumes.as_mut() {
                volumes.retain(|volume| {
                    !secret_names.contains(&volume.name)
                        && !config_map_names.contains(&volume.name)
                });
            }
        }
        if let Some(labels) = deployment.metadata.labels.as_mut() {
            labels.remove(NAME_LABEL);
        }
        if let Some(annotations) = deployment.metadata.annotations.as_mut() {
            annotations.remove(INJECTION_MARKER_ANNOTATION);
        }
    }
    deployments
}

/// Hash of a rendered deployment spec, stored under
/// [`SPEC_HASH_ANNOTATION`].
pub fn spec_hash(spec: &DeploymentSpec) -> String {
    use sha2::{Digest, Sha256};
    let bytes = serde_json::to_vec(spec).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}

/// Target replica count derived from the upstream's live replica count:
/// half, rounded up.
pub fn target_replicas(upstream_replicas: i32) -> i32 {
    (upstream_replicas + 1) / 2
}
