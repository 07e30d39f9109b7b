//! Inline cluster resource definitions
//!
//! The provisioning and deploy flows create a handful of resources by piping
//! JSON to `kubectl create -f -`. The shapes here are consumed by external
//! controllers (cert-manager, the nginx ingress controller, kaniko), so the
//! field layout is part of the wire contract.

use serde_json::{json, Value};

use crate::{Error, Result, BUILDER_INIT_CONTAINER, BUILDER_POD, REGISTRY_PORT};

/// Directory the build context is unpacked into, shared between the init
/// container and the builder container
pub const BUILD_CONTEXT_DIR: &str = "/kaniko/build-context";

/// Marker file whose presence releases the init container's busy-poll
pub const SENTINEL_PATH: &str = "/tmp/complete";

/// Where the build context archive lands inside the init container
pub const CONTEXT_ARCHIVE_PATH: &str = "/tmp/buildcontext.tar.gz";

/// ClusterIssuer registering with the production ACME directory
///
/// The email is the ACME registration contact captured from the operator.
pub fn cluster_issuer(email: &str) -> Value {
    json!({
        "apiVersion": "certmanager.k8s.io/v1alpha1",
        "kind": "ClusterIssuer",
        "metadata": {
            "name": "letsencrypt-prod"
        },
        "spec": {
            "acme": {
                "email": email,
                "http01": {},
                "privateKeySecretRef": {
                    "name": "letsencrypt-prod"
                },
                "server": "https://acme-v02.api.letsencrypt.org/directory"
            }
        }
    })
}

/// Cluster-wide ingress rule terminating TLS for the fixed cluster hostname
pub fn global_ingress() -> Value {
    json!({
        "apiVersion": "extensions/v1beta1",
        "kind": "Ingress",
        "metadata": {
            "annotations": {
                "ingress.kubernetes.io/ssl-redirect": "true",
                "kubernetes.io/ingress.class": "nginx",
                "kubernetes.io/tls-acme": "true"
            },
            "name": "snow-ingress"
        },
        "spec": {
            "rules": [
                {
                    "host": "snow.cluster"
                }
            ]
        }
    })
}

/// Persistent volume claim backing the private registry
pub fn registry_pvc() -> Value {
    json!({
        "kind": "PersistentVolumeClaim",
        "apiVersion": "v1",
        "metadata": {
            "name": "docker-registry-pvc"
        },
        "spec": {
            "accessModes": [
                "ReadWriteOnce"
            ],
            "volumeMode": "Filesystem",
            "resources": {
                "requests": {
                    "storage": "8Gi"
                }
            }
        }
    })
}

/// The kaniko builder pod
///
/// Two containers share an emptyDir volume: the init container busy-polls for
/// the sentinel file at a 1-second interval and exits once it appears, which
/// is what holds the builder back until the build context has been unpacked.
/// The builder pushes to the private registry in insecure mode with the pull
/// secret mounted as its docker config.
pub fn builder_pod(registry_ip: &str, project_name: &str) -> Value {
    let destination = format!("{registry_ip}:{REGISTRY_PORT}/{project_name}:latest");
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": BUILDER_POD
        },
        "spec": {
            "restartPolicy": "Never",
            "initContainers": [
                {
                    "name": BUILDER_INIT_CONTAINER,
                    "image": "alpine",
                    "args": [
                        "sh",
                        "-c",
                        format!(
                            "while true; do sleep 1; if [ -f {SENTINEL_PATH} ]; then break; fi done"
                        )
                    ],
                    "volumeMounts": [
                        {
                            "name": "empty-folder",
                            "mountPath": BUILD_CONTEXT_DIR
                        }
                    ]
                }
            ],
            "containers": [
                {
                    "name": BUILDER_POD,
                    "image": "gcr.io/kaniko-project/executor:latest",
                    "args": [
                        format!("--context=dir://{BUILD_CONTEXT_DIR}"),
                        format!("--destination={destination}"),
                        "--insecure"
                    ],
                    "volumeMounts": [
                        {
                            "name": "empty-folder",
                            "mountPath": BUILD_CONTEXT_DIR
                        },
                        {
                            "name": "docker-config",
                            "mountPath": "/kaniko/.docker"
                        }
                    ]
                }
            ],
            "volumes": [
                {
                    "name": "empty-folder",
                    "emptyDir": {}
                },
                {
                    "name": "docker-config",
                    "secret": {
                        "secretName": "regcred",
                        "items": [
                            {
                                "key": ".dockerconfigjson",
                                "path": "config.json"
                            }
                        ]
                    }
                }
            ]
        }
    })
}

/// ConfigMap mirroring the registry credentials as a plaintext docker config
///
/// Must encode the same username/password pair as the `regcred` pull secret
/// for the same endpoint, or image pulls fail after a successful build.
pub fn registry_config_map(endpoint: &str, username: &str, password: &str) -> Value {
    let docker_config = json!({
        "auths": {
            endpoint: {
                "username": username,
                "password": password
            }
        }
    });
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": "docker-config"
        },
        "data": {
            "config.json": docker_config.to_string()
        }
    })
}

/// Render a resource definition for piping to kubectl
pub fn render(resource: &Value) -> Result<String> {
    serde_json::to_string_pretty(resource).map_err(|e| Error::serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_issuer_registers_with_the_production_directory() {
        let issuer = cluster_issuer("dev@example.com");
        assert_eq!(issuer["kind"], "ClusterIssuer");
        assert_eq!(issuer["metadata"]["name"], "letsencrypt-prod");
        assert_eq!(issuer["spec"]["acme"]["email"], "dev@example.com");
        assert_eq!(
            issuer["spec"]["acme"]["server"],
            "https://acme-v02.api.letsencrypt.org/directory"
        );
        // http01 solver present but empty
        assert!(issuer["spec"]["acme"]["http01"].is_object());
        assert_eq!(
            issuer["spec"]["acme"]["privateKeySecretRef"]["name"],
            "letsencrypt-prod"
        );
    }

    #[test]
    fn global_ingress_carries_the_acme_annotations() {
        let ingress = global_ingress();
        assert_eq!(ingress["metadata"]["name"], "snow-ingress");
        let annotations = &ingress["metadata"]["annotations"];
        assert_eq!(annotations["kubernetes.io/ingress.class"], "nginx");
        assert_eq!(annotations["kubernetes.io/tls-acme"], "true");
        assert_eq!(annotations["ingress.kubernetes.io/ssl-redirect"], "true");
        assert_eq!(ingress["spec"]["rules"][0]["host"], "snow.cluster");
    }

    #[test]
    fn registry_pvc_requests_8gi_rwo() {
        let pvc = registry_pvc();
        assert_eq!(pvc["metadata"]["name"], "docker-registry-pvc");
        assert_eq!(pvc["spec"]["accessModes"][0], "ReadWriteOnce");
        assert_eq!(pvc["spec"]["volumeMode"], "Filesystem");
        assert_eq!(pvc["spec"]["resources"]["requests"]["storage"], "8Gi");
    }

    #[test]
    fn builder_pod_targets_the_discovered_registry() {
        let pod = builder_pod("10.0.0.7", "app");
        assert_eq!(pod["metadata"]["name"], "kaniko");
        assert_eq!(pod["spec"]["restartPolicy"], "Never");

        let builder = &pod["spec"]["containers"][0];
        let args: Vec<&str> = builder["args"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a.as_str().unwrap())
            .collect();
        assert!(args.contains(&"--destination=10.0.0.7:5000/app:latest"));
        assert!(args.contains(&"--insecure"));
        assert!(args.contains(&"--context=dir:///kaniko/build-context"));
    }

    #[test]
    fn builder_pod_init_container_polls_for_the_sentinel() {
        let pod = builder_pod("10.0.0.7", "app");
        let init = &pod["spec"]["initContainers"][0];
        assert_eq!(init["name"], "kaniko-init");
        assert_eq!(init["image"], "alpine");
        let script = init["args"][2].as_str().unwrap();
        assert!(script.contains("sleep 1"));
        assert!(script.contains("/tmp/complete"));
    }

    #[test]
    fn builder_pod_mounts_the_pull_secret_as_docker_config() {
        let pod = builder_pod("10.0.0.7", "app");
        let volumes = pod["spec"]["volumes"].as_array().unwrap();
        let secret_volume = volumes
            .iter()
            .find(|v| v["name"] == "docker-config")
            .unwrap();
        assert_eq!(secret_volume["secret"]["secretName"], "regcred");
        assert_eq!(
            secret_volume["secret"]["items"][0]["key"],
            ".dockerconfigjson"
        );
        assert_eq!(secret_volume["secret"]["items"][0]["path"], "config.json");
    }

    #[test]
    fn config_map_embeds_the_credentials_for_the_endpoint() {
        let map = registry_config_map("10.0.0.7:5000", "user", "password");
        assert_eq!(map["metadata"]["name"], "docker-config");

        let embedded: Value =
            serde_json::from_str(map["data"]["config.json"].as_str().unwrap()).unwrap();
        assert_eq!(embedded["auths"]["10.0.0.7:5000"]["username"], "user");
        assert_eq!(embedded["auths"]["10.0.0.7:5000"]["password"], "password");
    }

    #[test]
    fn render_produces_parseable_json() {
        let rendered = render(&registry_pvc()).unwrap();
        let parsed: Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["kind"], "PersistentVolumeClaim");
    }
}
