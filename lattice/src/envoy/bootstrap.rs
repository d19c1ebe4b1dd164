//! Envoy bootstrap configuration
//!
//! Reads the sidecar's environment and writes the xDS bootstrap Envoy starts from to
//! `<CONFIG_DIR>/config.json`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use crate::errors::LatticeError;
use crate::filesys::dir::Dir;

pub const ENV_EGRESS_PORT_HTTP: &str = "EGRESS_PORT_HTTP";
pub const ENV_EGRESS_PORT_TCP: &str = "EGRESS_PORT_TCP";
pub const ENV_REDIRECT_EGRESS_CIDR_BLOCK_HTTP: &str = "REDIRECT_EGRESS_CIDR_BLOCK_HTTP";
pub const ENV_REDIRECT_EGRESS_CIDR_BLOCK_TCP: &str = "REDIRECT_EGRESS_CIDR_BLOCK_TCP";
pub const ENV_CONFIG_DIR: &str = "CONFIG_DIR";
pub const ENV_ADMIN_PORT: &str = "ADMIN_PORT";
pub const ENV_XDS_API_VERSION: &str = "XDS_API_VERSION";
pub const ENV_XDS_API_HOST: &str = "XDS_API_HOST";
pub const ENV_XDS_API_PORT: &str = "XDS_API_PORT";
pub const ENV_SERVICE_CLUSTER: &str = "SERVICE_CLUSTER";
pub const ENV_SERVICE_NODE: &str = "SERVICE_NODE";

const REQUIRED: [&str; 9] = [
    ENV_EGRESS_PORT_HTTP,
    ENV_EGRESS_PORT_TCP,
    ENV_REDIRECT_EGRESS_CIDR_BLOCK_HTTP,
    ENV_REDIRECT_EGRESS_CIDR_BLOCK_TCP,
    ENV_CONFIG_DIR,
    ENV_ADMIN_PORT,
    ENV_XDS_API_VERSION,
    ENV_XDS_API_HOST,
    ENV_XDS_API_PORT,
];

pub const XDS_CLUSTER_NAME: &str = "xds-api";
pub const XDS_REFRESH_DELAY_MS: u32 = 10000;
pub const XDS_CONNECT_TIMEOUT_MS: u32 = 250;
pub const XDS_CONNECT_TIMEOUT: &str = "0.25s";

/// Bootstrap environment, validated
#[derive(Debug, Clone)]
pub struct BootstrapEnv {
    vars: BTreeMap<&'static str, String>,
}

impl BootstrapEnv {
    /// Collect the variables through `lookup`; version 2 also needs the service cluster and node
    pub fn from_lookup<F>(lookup: F) -> Result<Self, LatticeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut vars = BTreeMap::new();
        let mut fetch = |key: &'static str| -> Result<(), LatticeError> {
            let value = lookup(key).ok_or_else(|| LatticeError::ConfigError(format!("{} not set", key)))?;
            vars.insert(key, value);
            Ok(())
        };

        for key in REQUIRED {
            fetch(key)?;
        }
        if lookup(ENV_XDS_API_VERSION).as_deref() == Some("2") {
            fetch(ENV_SERVICE_CLUSTER)?;
            fetch(ENV_SERVICE_NODE)?;
        }
        Ok(Self { vars })
    }

    pub fn from_env() -> Result<Self, LatticeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn get(&self, key: &str) -> &str {
        self.vars.get(key).map(String::as_str).unwrap_or_default()
    }

    fn port(&self, key: &str) -> Result<u16, LatticeError> {
        self.get(key)
            .parse()
            .map_err(|_| LatticeError::ConfigError(format!("{} is not a port: {}", key, self.get(key))))
    }

    pub fn config_dir(&self) -> PathBuf {
        PathBuf::from(self.get(ENV_CONFIG_DIR))
    }
}

// =============================== V1 ================================== //

#[derive(Debug, Serialize)]
struct V1Bootstrap {
    listeners: Vec<String>,
    lds: V1Lds,
    admin: V1Admin,
    cluster_manager: V1ClusterManager,
}

#[derive(Debug, Serialize)]
struct V1Lds {
    cluster: String,
    refresh_delay_ms: u32,
}

#[derive(Debug, Serialize)]
struct V1Admin {
    access_log_path: String,
    address: String,
}

#[derive(Debug, Serialize)]
struct V1ClusterManager {
    clusters: Vec<V1Cluster>,
    cds: V1Discovery,
    sds: V1Discovery,
}

#[derive(Debug, Serialize)]
struct V1Discovery {
    cluster: V1Cluster,
    refresh_delay_ms: u32,
}

#[derive(Debug, Serialize)]
struct V1Cluster {
    name: String,
    connect_timeout_ms: u32,
    #[serde(rename = "type")]
    cluster_type: String,
    lb_type: String,
    hosts: Vec<V1Host>,
}

#[derive(Debug, Serialize)]
struct V1Host {
    url: String,
}

fn v1_cluster(name: String, url: &str) -> V1Cluster {
    V1Cluster {
        name,
        connect_timeout_ms: XDS_CONNECT_TIMEOUT_MS,
        cluster_type: "static".to_string(),
        lb_type: "round_robin".to_string(),
        hosts: vec![V1Host { url: url.to_string() }],
    }
}

fn v1(env: &BootstrapEnv) -> Result<V1Bootstrap, LatticeError> {
    let url = format!("tcp://{}:{}", env.get(ENV_XDS_API_HOST), env.port(ENV_XDS_API_PORT)?);
    Ok(V1Bootstrap {
        listeners: Vec::new(),
        lds: V1Lds {
            cluster: XDS_CLUSTER_NAME.to_string(),
            refresh_delay_ms: XDS_REFRESH_DELAY_MS,
        },
        admin: V1Admin {
            access_log_path: "/dev/null".to_string(),
            address: format!("tcp://0.0.0.0:{}", env.get(ENV_ADMIN_PORT)),
        },
        cluster_manager: V1ClusterManager {
            clusters: vec![v1_cluster(XDS_CLUSTER_NAME.to_string(), &url)],
            cds: V1Discovery {
                cluster: v1_cluster(format!("{}-cds", XDS_CLUSTER_NAME), &url),
                refresh_delay_ms: XDS_REFRESH_DELAY_MS,
            },
            sds: V1Discovery {
                cluster: v1_cluster(format!("{}-sds", XDS_CLUSTER_NAME), &url),
                refresh_delay_ms: XDS_REFRESH_DELAY_MS,
            },
        },
    })
}

// =============================== V2 ================================== //

#[derive(Debug, Serialize)]
struct V2Bootstrap {
    node: V2Node,
    admin: V2Admin,
    static_resources: V2StaticResources,
    dynamic_resources: V2DynamicResources,
}

#[derive(Debug, Serialize)]
struct V2Node {
    id: String,
    cluster: String,
}

#[derive(Debug, Serialize)]
struct V2Admin {
    access_log_path: String,
    address: V2Address,
}

#[derive(Debug, Serialize)]
struct V2Address {
    socket_address: V2SocketAddress,
}

#[derive(Debug, Serialize)]
struct V2SocketAddress {
    address: String,
    port_value: u16,
}

#[derive(Debug, Serialize)]
struct V2StaticResources {
    clusters: Vec<V2Cluster>,
}

#[derive(Debug, Serialize)]
struct V2Cluster {
    name: String,
    connect_timeout: String,
    #[serde(rename = "type")]
    cluster_type: String,
    lb_policy: String,
    http2_protocol_options: Empty,
    hosts: Vec<V2Address>,
}

#[derive(Debug, Serialize)]
struct V2DynamicResources {
    ads_config: V2AdsConfig,
    lds_config: V2AdsSource,
    cds_config: V2AdsSource,
}

#[derive(Debug, Serialize)]
struct V2AdsConfig {
    api_type: String,
    grpc_services: Vec<V2GrpcService>,
}

#[derive(Debug, Serialize)]
struct V2GrpcService {
    envoy_grpc: V2EnvoyGrpc,
}

#[derive(Debug, Serialize)]
struct V2EnvoyGrpc {
    cluster_name: String,
}

#[derive(Debug, Serialize)]
struct V2AdsSource {
    ads: Empty,
}

#[derive(Debug, Serialize)]
struct Empty {}

fn v2(env: &BootstrapEnv) -> Result<V2Bootstrap, LatticeError> {
    Ok(V2Bootstrap {
        node: V2Node {
            id: env.get(ENV_SERVICE_NODE).to_string(),
            cluster: env.get(ENV_SERVICE_CLUSTER).to_string(),
        },
        admin: V2Admin {
            access_log_path: "/dev/null".to_string(),
            address: V2Address {
                socket_address: V2SocketAddress {
                    address: "0.0.0.0".to_string(),
                    port_value: env.port(ENV_ADMIN_PORT)?,
                },
            },
        },
        static_resources: V2StaticResources {
            clusters: vec![V2Cluster {
                name: XDS_CLUSTER_NAME.to_string(),
                connect_timeout: XDS_CONNECT_TIMEOUT.to_string(),
                cluster_type: "STATIC".to_string(),
                lb_policy: "ROUND_ROBIN".to_string(),
                http2_protocol_options: Empty {},
                hosts: vec![V2Address {
                    socket_address: V2SocketAddress {
                        address: env.get(ENV_XDS_API_HOST).to_string(),
                        port_value: env.port(ENV_XDS_API_PORT)?,
                    },
                }],
            }],
        },
        dynamic_resources: V2DynamicResources {
            ads_config: V2AdsConfig {
                api_type: "GRPC".to_string(),
                grpc_services: vec![V2GrpcService {
                    envoy_grpc: V2EnvoyGrpc {
                        cluster_name: XDS_CLUSTER_NAME.to_string(),
                    },
                }],
            },
            lds_config: V2AdsSource { ads: Empty {} },
            cds_config: V2AdsSource { ads: Empty {} },
        },
    })
}

/// Pretty JSON of the bootstrap for the configured xDS API version
pub fn render(env: &BootstrapEnv) -> Result<String, LatticeError> {
    let json = match env.get(ENV_XDS_API_VERSION) {
        "1" => serde_json::to_string_pretty(&v1(env)?)?,
        "2" => serde_json::to_string_pretty(&v2(env)?)?,
        other => {
            return Err(LatticeError::ConfigError(format!(
                "unknown envoy bootstrap config version: {}",
                other
            )))
        }
    };
    Ok(json)
}

/// Write `config.json` into the configured directory and return its path
pub async fn write(env: &BootstrapEnv) -> Result<PathBuf, LatticeError> {
    let contents = render(env)?;
    let dir = Dir::new(env.config_dir());
    dir.create().await?;
    let file = dir.file("config.json");
    file.write_string(&contents).await?;
    info!("Wrote envoy bootstrap to {}", file.path().display());
    Ok(file.path().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(version: &str, dir: &str) -> HashMap<&'static str, String> {
        let mut vars = HashMap::new();
        vars.insert(ENV_EGRESS_PORT_HTTP, "9001".to_string());
        vars.insert(ENV_EGRESS_PORT_TCP, "9002".to_string());
        vars.insert(ENV_REDIRECT_EGRESS_CIDR_BLOCK_HTTP, "10.0.0.0/8".to_string());
        vars.insert(ENV_REDIRECT_EGRESS_CIDR_BLOCK_TCP, "10.0.0.0/8".to_string());
        vars.insert(ENV_CONFIG_DIR, dir.to_string());
        vars.insert(ENV_ADMIN_PORT, "9901".to_string());
        vars.insert(ENV_XDS_API_VERSION, version.to_string());
        vars.insert(ENV_XDS_API_HOST, "10.1.2.3".to_string());
        vars.insert(ENV_XDS_API_PORT, "8080".to_string());
        vars
    }

    fn bootstrap(vars: &HashMap<&'static str, String>) -> Result<BootstrapEnv, LatticeError> {
        BootstrapEnv::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_v1_bootstrap() {
        let env = bootstrap(&env("1", "/tmp")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&render(&env).unwrap()).unwrap();

        assert_eq!(json["listeners"], serde_json::json!([]));
        assert_eq!(json["lds"]["cluster"], "xds-api");
        assert_eq!(json["lds"]["refresh_delay_ms"], 10000);
        assert_eq!(json["admin"]["address"], "tcp://0.0.0.0:9901");
        let cluster = &json["cluster_manager"]["clusters"][0];
        assert_eq!(cluster["type"], "static");
        assert_eq!(cluster["lb_type"], "round_robin");
        assert_eq!(cluster["connect_timeout_ms"], 250);
        assert_eq!(cluster["hosts"][0]["url"], "tcp://10.1.2.3:8080");
        assert_eq!(json["cluster_manager"]["cds"]["cluster"]["name"], "xds-api-cds");
        assert_eq!(json["cluster_manager"]["sds"]["cluster"]["name"], "xds-api-sds");
    }

    #[test]
    fn test_v2_requires_service_identity() {
        let vars = env("2", "/tmp");
        let err = bootstrap(&vars).unwrap_err();
        assert!(err.to_string().contains("SERVICE_CLUSTER not set"));
    }

    #[test]
    fn test_v2_bootstrap() {
        let mut vars = env("2", "/tmp");
        vars.insert(ENV_SERVICE_CLUSTER, "petflix".to_string());
        vars.insert(ENV_SERVICE_NODE, "api-1".to_string());
        let env = bootstrap(&vars).unwrap();
        let json: serde_json::Value = serde_json::from_str(&render(&env).unwrap()).unwrap();

        assert_eq!(json["node"]["id"], "api-1");
        assert_eq!(json["node"]["cluster"], "petflix");
        assert_eq!(json["admin"]["address"]["socket_address"]["port_value"], 9901);
        let cluster = &json["static_resources"]["clusters"][0];
        assert_eq!(cluster["connect_timeout"], "0.25s");
        assert_eq!(cluster["type"], "STATIC");
        assert_eq!(cluster["lb_policy"], "ROUND_ROBIN");
        assert_eq!(cluster["http2_protocol_options"], serde_json::json!({}));
        assert_eq!(cluster["hosts"][0]["socket_address"]["address"], "10.1.2.3");
        let ads = &json["dynamic_resources"]["ads_config"];
        assert_eq!(ads["api_type"], "GRPC");
        assert_eq!(ads["grpc_services"][0]["envoy_grpc"]["cluster_name"], "xds-api");
        assert_eq!(json["dynamic_resources"]["lds_config"]["ads"], serde_json::json!({}));
    }

    #[test]
    fn test_unknown_version() {
        let env = bootstrap(&env("3", "/tmp")).unwrap();
        let err = render(&env).unwrap_err();
        assert!(err
            .to_string()
            .contains("unknown envoy bootstrap config version: 3"));
    }

    #[test]
    fn test_missing_variable() {
        let mut vars = env("1", "/tmp");
        vars.remove(ENV_ADMIN_PORT);
        let err = bootstrap(&vars).unwrap_err();
        assert!(err.to_string().contains("ADMIN_PORT not set"));
    }

    #[tokio::test]
    async fn test_write_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_dir = dir.path().join("envoy");
        let env = bootstrap(&env("1", config_dir.to_str().unwrap())).unwrap();

        let path = write(&env).await.unwrap();
        assert_eq!(path, config_dir.join("config.json"));
        let contents = std::fs::read_to_string(path).unwrap();
        assert!(contents.contains("\"xds-api\""));
    }
}
