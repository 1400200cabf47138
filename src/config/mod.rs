//! Daemon configuration, loaded from a TOML file with field-level
//! defaults (spec §6.7). Grounded on the teacher's `.hulk` home-relative
//! default directory convention (`src/bin/hulk/config/dir.rs`), adapted
//! from a certs-directory lookup to the daemon's own data directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::utils::{random_hex_id, seconds};

const DEFAULT_DATA_DIR_NAME: &str = ".meshlock";

mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

fn default_node_id() -> String {
    random_hex_id("node", 64)
}

fn default_node_name() -> String {
    hostname_or_default()
}

fn hostname_or_default() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "meshlock-node".to_string())
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(DEFAULT_DATA_DIR_NAME)
}

fn default_default_lease() -> Duration {
    crate::lock::DEFAULT_LEASE
}

fn default_max_lease() -> Duration {
    crate::lock::MAX_LEASE
}

fn default_lease_sweep_interval() -> Duration {
    seconds(10)
}

fn default_negotiation_deadline() -> Duration {
    seconds(5)
}

fn default_confirmation_timeout() -> Duration {
    seconds(5)
}

fn default_delta_log_capacity() -> usize {
    1000
}

fn default_lock_history_capacity() -> usize {
    100
}

fn default_peer_offline_threshold() -> Duration {
    seconds(30)
}

fn default_agent_offline_threshold() -> Duration {
    seconds(60)
}

fn default_rpc_socket() -> PathBuf {
    default_data_dir().join("rpc.sock")
}

fn default_event_socket() -> PathBuf {
    default_data_dir().join("events.sock")
}

/// Everything needed to construct and run one daemon instance. Durations
/// round-trip through TOML as human-readable strings (`"30s"`, `"5m"`) via
/// [`humantime`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default = "default_node_name")]
    pub node_name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(with = "humantime_duration", default = "default_default_lease")]
    pub default_lease: Duration,
    #[serde(with = "humantime_duration", default = "default_max_lease")]
    pub max_lease: Duration,
    #[serde(with = "humantime_duration", default = "default_lease_sweep_interval")]
    pub lease_sweep_interval: Duration,
    #[serde(with = "humantime_duration", default = "default_negotiation_deadline")]
    pub negotiation_deadline: Duration,

    #[serde(default)]
    pub optimistic_mode: bool,
    #[serde(with = "humantime_duration", default = "default_confirmation_timeout")]
    pub confirmation_timeout: Duration,
    #[serde(default = "default_true")]
    pub auto_rollback: bool,

    #[serde(default = "default_delta_log_capacity")]
    pub delta_log_capacity: usize,
    #[serde(default = "default_lock_history_capacity")]
    pub lock_history_capacity: usize,

    /// How long a peer may go unheard-from before it's swept offline.
    #[serde(with = "humantime_duration", default = "default_peer_offline_threshold")]
    pub peer_offline_threshold: Duration,
    /// How long a connected agent may go unheard-from before it's swept offline.
    #[serde(with = "humantime_duration", default = "default_agent_offline_threshold")]
    pub agent_offline_threshold: Duration,

    #[serde(default = "default_rpc_socket")]
    pub rpc_socket: PathBuf,
    #[serde(default = "default_event_socket")]
    pub event_socket: PathBuf,

    /// Optional audit store (spec §6.5); logged to `<data_dir>/audit.jsonl`.
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            node_id: default_node_id(),
            node_name: default_node_name(),
            data_dir: default_data_dir(),
            default_lease: default_default_lease(),
            max_lease: default_max_lease(),
            lease_sweep_interval: default_lease_sweep_interval(),
            negotiation_deadline: default_negotiation_deadline(),
            optimistic_mode: false,
            confirmation_timeout: default_confirmation_timeout(),
            auto_rollback: true,
            delta_log_capacity: default_delta_log_capacity(),
            lock_history_capacity: default_lock_history_capacity(),
            peer_offline_threshold: default_peer_offline_threshold(),
            agent_offline_threshold: default_agent_offline_threshold(),
            rpc_socket: default_rpc_socket(),
            event_socket: default_event_socket(),
            audit_enabled: true,
        }
    }
}

impl DaemonConfig {
    pub fn audit_log_path(&self) -> PathBuf {
        self.data_dir.join("audit.jsonl")
    }
}

impl DaemonConfig {
    /// Loads a TOML config file, falling back to defaults field-by-field
    /// for anything the file omits. Missing files yield pure defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(DaemonConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let cfg = DaemonConfig::default();
        let serialized = toml::to_string(&cfg).unwrap();
        let parsed: DaemonConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.node_id, cfg.node_id);
        assert_eq!(parsed.default_lease, cfg.default_lease);
    }

    #[test]
    fn partial_toml_fills_in_missing_fields_with_defaults() {
        let parsed: DaemonConfig = toml::from_str("node_name = \"agent-7\"\n").unwrap();
        assert_eq!(parsed.node_name, "agent-7");
        assert_eq!(parsed.delta_log_capacity, default_delta_log_capacity());
    }

    #[test]
    fn load_missing_file_yields_defaults() {
        let cfg = DaemonConfig::load(Path::new("/nonexistent/meshlock/config.toml")).unwrap();
        assert_eq!(cfg.delta_log_capacity, default_delta_log_capacity());
    }

    #[test]
    fn default_lease_never_exceeds_max_lease() {
        let cfg = DaemonConfig::default();
        assert!(cfg.default_lease <= cfg.max_lease);
    }
}
