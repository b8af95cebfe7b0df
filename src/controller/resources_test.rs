//! Unit tests for Kubernetes resource builders.
//!
//! Run with: `cargo test -p basicauth-operator resources_test`

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
    use k8s_openapi::ByteString;
    use kube::ResourceExt;

    use crate::config::OperatorConfig;
    use crate::controller::resources::{
        self, CONFIG_MOUNT_PATH, SECRET_MOUNT_DIR, SECRET_MOUNT_PATH,
    };
    use crate::controller::{INJECTION_MARKER_ANNOTATION, NAME_LABEL};
    use crate::crd::{AuthenticatorMode, BasicAuthenticator, BasicAuthenticatorSpec};

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn make_authenticator(mode: AuthenticatorMode) -> BasicAuthenticator {
        let mut auth = BasicAuthenticator::new(
            "my-auth",
            BasicAuthenticatorSpec {
                mode,
                replicas: 2,
                selector: Some(LabelSelector {
                    match_labels: Some(BTreeMap::from([(
                        "app".to_string(),
                        "payments".to_string(),
                    )])),
                    ..Default::default()
                }),
                app_port: 9000,
                app_service: "payments-svc".to_string(),
                adaptive_scale: false,
                authenticator_port: 8080,
                credentials_secret_ref: None,
                service_type: None,
            },
        );
        auth.metadata.namespace = Some("default".to_string());
        auth.metadata.uid = Some("uid-1234".to_string());
        auth
    }

    fn bare_deployment(name: &str) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(k8s_openapi::api::apps::v1::DeploymentSpec {
                template: k8s_openapi::api::core::v1::PodTemplateSpec {
                    spec: Some(k8s_openapi::api::core::v1::PodSpec {
                        containers: vec![k8s_openapi::api::core::v1::Container {
                            name: "app".to_string(),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    // -----------------------------------------------------------------------
    // fill_template
    // -----------------------------------------------------------------------

    #[test]
    fn test_fill_template_deployment_mode() {
        let auth = make_authenticator(AuthenticatorMode::Deployment);
        let rendered = resources::fill_template(SECRET_MOUNT_PATH, &auth);

        assert!(rendered.contains("listen 8080;"));
        assert!(rendered.contains("auth_basic_user_file \"/etc/secret/htpasswd\";"));
        assert!(rendered.contains("proxy_pass http://payments-svc:9000;"));

        for token in ["AUTHENTICATOR_PORT", "FILE_PATH", "APP_SERVICE", "APP_PORT"] {
            assert!(!rendered.contains(token), "leftover placeholder {token}");
        }
    }

    #[test]
    fn test_fill_template_sidecar_renders_exact_document() {
        let auth = make_authenticator(AuthenticatorMode::Sidecar);
        let rendered = resources::fill_template(SECRET_MOUNT_PATH, &auth);

        let expected = "server {
	listen 8080;
	location / {
		resolver    8.8.8.8;
		auth_basic	\"basic authentication area\";
		auth_basic_user_file \"/etc/secret/htpasswd\";
		proxy_pass http://localhost:9000;
		proxy_set_header Host $host;
		proxy_set_header X-Real-IP $remote_addr;
		proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
		proxy_set_header X-Forwarded-Proto $scheme;
	}
}";
        assert_eq!(rendered, expected);
    }

    // -----------------------------------------------------------------------
    // ConfigMap
    // -----------------------------------------------------------------------

    #[test]
    fn test_config_map_is_deterministic() {
        let auth = make_authenticator(AuthenticatorMode::Deployment);
        let first = resources::build_nginx_config_map(&auth);
        let second = resources::build_nginx_config_map(&auth);

        assert_eq!(first.metadata.name, second.metadata.name);
        assert_eq!(first.data, second.data);
        assert!(first.data.unwrap().contains_key("nginx.conf"));
    }

    #[test]
    fn test_config_map_carries_ownership() {
        let auth = make_authenticator(AuthenticatorMode::Deployment);
        let cm = resources::build_nginx_config_map(&auth);

        assert_eq!(cm.labels().get(NAME_LABEL).unwrap(), "my-auth");
        let owner = &cm.metadata.owner_references.as_ref().unwrap()[0];
        assert_eq!(owner.kind, "BasicAuthenticator");
        assert_eq!(owner.name, "my-auth");
    }

    // -----------------------------------------------------------------------
    // Deployment
    // -----------------------------------------------------------------------

    #[test]
    fn test_deployment_mounts_and_ports() {
        let auth = make_authenticator(AuthenticatorMode::Deployment);
        let config = OperatorConfig::default();
        let deployment = resources::build_nginx_deployment(&auth, "cfg", "cred", &config);

        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(2));

        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.containers.len(), 1);
        let container = &pod.containers[0];
        assert_eq!(container.name, "nginx");
        assert_eq!(container.image.as_deref(), Some("nginx:1.25.3"));
        assert_eq!(
            container.ports.as_ref().unwrap()[0].container_port,
            8080
        );

        let mounts = container.volume_mounts.as_ref().unwrap();
        let paths: Vec<&str> = mounts.iter().map(|m| m.mount_path.as_str()).collect();
        assert!(paths.contains(&CONFIG_MOUNT_PATH));
        assert!(paths.contains(&SECRET_MOUNT_DIR));

        let volumes = pod.volumes.as_ref().unwrap();
        assert_eq!(volumes.len(), 2);
        let cfg = volumes.iter().find(|v| v.name == "cfg").unwrap();
        assert_eq!(
            cfg.config_map.as_ref().unwrap().name.as_deref(),
            Some("cfg")
        );
        let cred = volumes.iter().find(|v| v.name == "cred").unwrap();
        assert_eq!(
            cred.secret.as_ref().unwrap().secret_name.as_deref(),
            Some("cred")
        );
    }

    #[test]
    fn test_deployment_name_is_deterministic() {
        let auth = make_authenticator(AuthenticatorMode::Deployment);
        assert_eq!(
            resources::deployment_name(&auth),
            resources::deployment_name(&auth)
        );
        assert_ne!(
            resources::deployment_name(&auth),
            resources::config_map_name(&auth)
        );
    }

    // -----------------------------------------------------------------------
    // Service
    // -----------------------------------------------------------------------

    #[test]
    fn test_service_selects_proxy_in_deployment_mode() {
        let auth = make_authenticator(AuthenticatorMode::Deployment);
        let service = resources::build_nginx_service(&auth);

        assert_eq!(service.name_any(), "my-auth-svc");
        let spec = service.spec.as_ref().unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        let selector = spec.selector.as_ref().unwrap();
        assert_eq!(
            selector.get("app").unwrap(),
            &resources::deployment_name(&auth)
        );
    }

    #[test]
    fn test_service_selects_workload_pods_in_sidecar_mode() {
        let auth = make_authenticator(AuthenticatorMode::Sidecar);
        let service = resources::build_nginx_service(&auth);

        let selector = service.spec.as_ref().unwrap().selector.clone().unwrap();
        assert_eq!(selector.get("app").unwrap(), "payments");
    }

    #[test]
    fn test_service_type_falls_back_to_cluster_ip() {
        let mut auth = make_authenticator(AuthenticatorMode::Deployment);
        auth.spec.service_type = Some("LoadBalancer".to_string());
        let service = resources::build_nginx_service(&auth);
        assert_eq!(
            service.spec.as_ref().unwrap().type_.as_deref(),
            Some("LoadBalancer")
        );

        auth.spec.service_type = Some("bogus".to_string());
        let service = resources::build_nginx_service(&auth);
        assert_eq!(
            service.spec.as_ref().unwrap().type_.as_deref(),
            Some("ClusterIP")
        );
    }

    // -----------------------------------------------------------------------
    // Sidecar injection and removal
    // -----------------------------------------------------------------------

    #[test]
    fn test_inject_sidecar_appends_only() {
        let auth = make_authenticator(AuthenticatorMode::Sidecar);
        let config = OperatorConfig::default();
        let mut target = bare_deployment("payments");

        resources::inject_sidecar(&mut target, &auth, "cfg-x", "cred-y", &config);

        assert!(resources::is_injected(&target));
        assert_eq!(target.labels().get(NAME_LABEL).unwrap(), "my-auth");
        assert_eq!(
            target.annotations().get(INJECTION_MARKER_ANNOTATION).unwrap(),
            "1"
        );

        let pod = target.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(pod.containers.len(), 2);
        assert_eq!(pod.containers[0].name, "app");
        assert_eq!(pod.containers[1].name, "nginx");
        assert_eq!(pod.volumes.as_ref().unwrap().len(), 2);

        // No owner reference on a foreign workload.
        assert!(target.metadata.owner_references.is_none());
    }

    #[test]
    fn test_strip_reverses_injection_exactly() {
        let auth = make_authenticator(AuthenticatorMode::Sidecar);
        let config = OperatorConfig::default();
        let mut target = bare_deployment("payments");
        target
            .labels_mut()
            .insert("team".to_string(), "payments".to_string());

        let before = target.clone();
        resources::inject_sidecar(&mut target, &auth, "cfg-x", "cred-y", &config);

        let stripped = resources::strip_injected_resources(
            vec![target],
            &["cred-y".to_string()],
            &["cfg-x".to_string()],
            config.nginx_container_name(),
        );
        let restored = &stripped[0];

        let pod = restored
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap();
        assert_eq!(pod.containers.len(), 1);
        assert_eq!(pod.containers[0].name, "app");
        assert!(pod.volumes.as_ref().map_or(true, |v| v.is_empty()));
        assert!(!restored.labels().contains_key(NAME_LABEL));
        assert!(!restored
            .annotations()
            .contains_key(INJECTION_MARKER_ANNOTATION));

        // Pre-existing metadata survives.
        assert_eq!(restored.labels().get("team"), before.labels().get("team"));
    }

    #[test]
    fn test_strip_leaves_unrelated_volumes() {
        let auth = make_authenticator(AuthenticatorMode::Sidecar);
        let config = OperatorConfig::default();
        let mut target = bare_deployment("payments");
        target
            .spec
            .as_mut()
            .unwrap()
            .template
            .spec
            .as_mut()
            .unwrap()
            .volumes = Some(vec![k8s_openapi::api::core::v1::Volume {
            name: "scratch".to_string(),
            ..Default::default()
        }]);

        resources::inject_sidecar(&mut target, &auth, "cfg-x", "cred-y", &config);
        let stripped = resources::strip_injected_resources(
            vec![target],
            &["cred-y".to_string()],
            &["cfg-x".to_string()],
            config.nginx_container_name(),
        );

        let volumes = stripped[0]
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .volumes
            .clone()
            .unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "scratch");
    }

    // -----------------------------------------------------------------------
    // Credential secret validation
    // -----------------------------------------------------------------------

    fn secret_with(fields: &[(&str, &str)]) -> Secret {
        let data: BTreeMap<String, ByteString> = fields
            .iter()
            .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
            .collect();
        Secret {
            data: Some(data),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_credential_secret_requires_username_and_password() {
        let secret = secret_with(&[("password", "pw")]);
        assert!(resources::validate_credential_secret(&secret).is_err());

        let secret = secret_with(&[("username", "user")]);
        assert!(resources::validate_credential_secret(&secret).is_err());

        let secret = secret_with(&[("username", "user"), ("password", "pw")]);
        assert!(resources::validate_credential_secret(&secret).is_ok());
    }

    #[test]
    fn test_validate_credential_secret_checks_htpasswd_shape() {
        let secret = secret_with(&[
            ("username", "user"),
            ("password", "pw"),
            ("htpasswd", "user:$apr1$salt$hash"),
        ]);
        assert!(resources::validate_credential_secret(&secret).is_ok());

        let secret = secret_with(&[("username", "user"), ("password", "pw"), ("htpasswd", "foo")]);
        assert!(resources::validate_credential_secret(&secret).is_err());

        let secret = secret_with(&[
            ("username", "user"),
            ("password", "pw"),
            ("htpasswd", ":hash"),
        ]);
        assert!(resources::validate_credential_secret(&secret).is_err());
    }

    #[test]
    fn test_generated_secret_has_all_fields() {
        let auth = make_authenticator(AuthenticatorMode::Deployment);
        let secret = resources::build_credentials_secret(&auth).unwrap();

        let string_data = secret.string_data.as_ref().unwrap();
        assert_eq!(string_data["username"].len(), 20);
        assert_eq!(string_data["password"].len(), 20);
        let line = &string_data["htpasswd"];
        let (user, hash) = line.split_once(':').unwrap();
        assert_eq!(user, &string_data["username"]);
        assert!(hash.starts_with("$apr1$"));
        assert!(secret.name_any().starts_with("my-auth-"));
    }

    #[test]
    fn test_spec_hash_tracks_rendered_changes() {
        let auth = make_authenticator(AuthenticatorMode::Deployment);
        let config = OperatorConfig::default();
        let deployment = resources::build_nginx_deployment(&auth, "cfg", "cred", &config);
        let mut spec = deployment.spec.clone().unwrap();

        let baseline = resources::spec_hash(&spec);
        assert_eq!(baseline, resources::spec_hash(&spec));

        spec.replicas = Some(4);
        assert_ne!(baseline, resources::spec_hash(&spec));
    }

    // -----------------------------------------------------------------------
    // Adaptive scale
    // -----------------------------------------------------------------------

    #[test]
    fn test_target_replicas_rounds_up_half() {
        let expected = [(1, 1), (2, 1), (3, 2), (4, 2), (5, 3)];
        for (upstream, target) in expected {
            assert_eq!(resources::target_replicas(upstream), target);
        }
    }
}
