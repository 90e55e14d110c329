//! Node configuration for the Riskgate service.
//!
//! Provides [`NodeConfig`] with defaults for the data directory, RPC binding,
//! and the embedded engine policy. Values are layered: defaults, then an
//! optional TOML file, then `RISKGATE__*` environment variables
//! (`RISKGATE__ENGINE__AUTO_APPROVE_THRESHOLD=25`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use riskgate_core::config::EngineConfig;
use riskgate_core::error::ConfigError;

/// Default port for the JSON-RPC server.
pub const DEFAULT_RPC_PORT: u16 = 28_450;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "RISKGATE";

/// Configuration for a service instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// IP address for the JSON-RPC server to bind to.
    pub rpc_bind: String,
    /// Port for the JSON-RPC server.
    pub rpc_port: u16,
    /// Log level filter string (e.g. "info", "debug", "riskgate_node_lib=trace").
    pub log_level: String,
    /// Keep all history in memory instead of RocksDB.
    pub in_memory: bool,
    /// Scoring and decision policy.
    pub engine: EngineConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("riskgate");

        Self {
            data_dir,
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            log_level: "info".to_string(),
            in_memory: false,
            engine: EngineConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from an optional file plus environment overrides.
    ///
    /// The embedded engine policy is validated before returning, so a
    /// config that loads is a config the engine will accept.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let cfg = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        let node: NodeConfig = cfg.try_deserialize().map_err(|e| ConfigError::Load(e.to_string()))?;
        node.engine.validate()?;
        Ok(node)
    }

    /// Path to the RocksDB data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("riskdata")
    }

    /// Socket address string for the RPC server.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind, self.rpc_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_rpc_bind_is_localhost() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.rpc_bind, "127.0.0.1");
        assert_eq!(cfg.rpc_addr(), format!("127.0.0.1:{DEFAULT_RPC_PORT}"));
    }

    #[test]
    fn default_data_dir_ends_with_riskgate() {
        let cfg = NodeConfig::default();
        assert!(cfg.data_dir.ends_with("riskgate"), "data_dir: {:?}", cfg.data_dir);
    }

    #[test]
    fn db_path_appends_riskdata() {
        let cfg = NodeConfig {
            data_dir: PathBuf::from("/tmp/riskgate-test"),
            ..NodeConfig::default()
        };
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/riskgate-test/riskdata"));
    }

    #[test]
    fn loads_toml_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
rpc_port = 9999
in_memory = true

[engine]
auto_approve_threshold = 20
lookback_window_days = 30

[engine.scorers]
high_risk_networks = ["198.51.100.0/24"]
"#
        )
        .unwrap();

        let cfg = NodeConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.rpc_port, 9999);
        assert!(cfg.in_memory);
        assert_eq!(cfg.rpc_bind, "127.0.0.1");
        assert_eq!(cfg.engine.auto_approve_threshold, 20);
        assert_eq!(cfg.engine.lookback_window_days, 30);
        assert_eq!(cfg.engine.scorer_timeout_ms, 2_000);
        assert_eq!(cfg.engine.scorers.high_risk_networks, vec!["198.51.100.0/24".to_string()]);
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[engine.weights]\nvelocity = 0.9").unwrap();
        let err = NodeConfig::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::WeightSum(_)), "{err:?}");
    }

    #[test]
    fn rejects_bad_network() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[engine.scorers]\nhigh_risk_networks = [\"not-a-net\"]").unwrap();
        assert!(matches!(NodeConfig::load(Some(file.path())), Err(ConfigError::InvalidNetwork(_))));
    }
}
