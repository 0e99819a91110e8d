use std::path::{Path, PathBuf};

use tracing::warn;

use crate::config::error::ConfigError;
use crate::config::model::{Auth, FleetConfig, HostSpec};

/// Collaborator that yields the fleet's list of `HostSpec`s and accepts
/// updated lists. The core Supervisor/Fleet Manager logic only depends on
/// this trait, never on the JSON file directly.
pub trait FleetConfigStore {
    fn load(&self) -> Result<FleetConfig, ConfigError>;
    fn save(&self, config: &FleetConfig) -> Result<(), ConfigError>;
}

pub struct FleetConfigStoreFile {
    path: PathBuf,
}

impl FleetConfigStoreFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn bootstrap_config() -> FleetConfig {
        FleetConfig {
            servers: vec![HostSpec {
                name: "server-1".to_string(),
                host: "203.0.113.10".to_string(),
                port: 22,
                username: "root".to_string(),
                auth: Auth::Key {
                    key_path: "/home/me/.ssh/id_ed25519".to_string(),
                    passphrase: None,
                },
                command: "python3 /home/v13/ultra_aggressive_worker.py".to_string(),
                working_dir: "/home/v13".to_string(),
                env: Default::default(),
                pre_command: String::new(),
                stop_command: "pkill -f ultra_aggressive_worker.py".to_string(),
                process_match_regex: None,
                restart_delay_seconds: 12,
                enabled: true,
                health_check: Default::default(),
            }],
        }
    }

    /// Parses the raw JSON document leniently: each entry in `servers` is
    /// deserialized independently so that one malformed host does not reject
    /// the whole file, matching the original's per-entry `continue` on a
    /// validation failure.
    fn parse_lenient(raw: &str) -> Result<FleetConfig, ConfigError> {
        let document: serde_json::Value = serde_json::from_str(raw)?;
        let entries = document
            .get("servers")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut servers = Vec::with_capacity(entries.len());
        for entry in entries {
            let name_hint = entry
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string();

            match serde_json::from_value::<HostSpec>(entry) {
                Ok(spec) if spec.has_required_fields() => servers.push(spec),
                Ok(spec) => {
                    warn!(name = spec.name, "skipping invalid server config: missing required field")
                }
                Err(err) => warn!(name = name_hint, %err, "skipping invalid server config"),
            }
        }

        Ok(FleetConfig { servers })
    }
}

impl FleetConfigStore for FleetConfigStoreFile {
    fn load(&self) -> Result<FleetConfig, ConfigError> {
        if !self.path.exists() {
            let bootstrap = Self::bootstrap_config();
            self.save(&bootstrap)?;
            tracing::info!(path = %self.path.display(), "created default fleet config");
        }

        let raw = std::fs::read_to_string(&self.path)?;
        Self::parse_lenient(&raw)
    }

    fn save(&self, config: &FleetConfig) -> Result<(), ConfigError> {
        let serialized = serde_json::to_string_pretty(config)?;
        std::fs::write(&self.path, serialized)?;
        Ok(())
    }
}
