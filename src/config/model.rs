use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

fn default_port() -> u16 {
    22
}

fn default_command() -> String {
    "python3 /home/v13/ultra_aggressive_worker.py".to_string()
}

fn default_working_dir() -> String {
    "/home/v13".to_string()
}

fn default_restart_delay() -> u64 {
    12
}

fn default_true() -> bool {
    true
}

fn default_stop_command() -> String {
    "pkill -f ultra_aggressive_worker.py".to_string()
}

fn default_cpu_threshold() -> f64 {
    50.0
}

fn default_health_duration() -> u64 {
    100
}

/// Authentication method for a host. Tagged by `type` in the JSON representation,
/// matching the original `{"type": "key"/"password", ...}` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Auth {
    Key {
        key_path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        passphrase: Option<String>,
    },
    Password {
        password: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cpu_threshold")]
    pub threshold_pct: f64,
    #[serde(default = "default_health_duration")]
    pub duration_s: u64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_pct: default_cpu_threshold(),
            duration_s: default_health_duration(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cpu: CheckConfig,
    #[serde(default)]
    pub gpu: CheckConfig,
}

/// Immutable description of one supervised remote host. Everything a
/// Supervisor needs to connect, launch, and tear down the managed process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostSpec {
    pub name: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub auth: Auth,

    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub pre_command: String,
    #[serde(default = "default_stop_command")]
    pub stop_command: String,

    #[serde(default)]
    pub process_match_regex: Option<String>,

    #[serde(default = "default_restart_delay")]
    pub restart_delay_seconds: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

impl HostSpec {
    /// Returns the regex that the Process Detector should match, deriving it
    /// from `command`'s last whitespace-separated token when unset.
    pub fn effective_process_regex(&self) -> String {
        if let Some(explicit) = &self.process_match_regex {
            if !explicit.is_empty() {
                return explicit.clone();
            }
        }
        match self.command.split_whitespace().last() {
            Some(token) => regex::escape(token),
            None => regex::escape(&self.command),
        }
    }

    /// Returns the compiled form of [`Self::effective_process_regex`]. A spec
    /// with an unparseable custom regex is a `PreconditionError` at the
    /// Supervisor, not a config-load failure, so this is fallible here and
    /// only evaluated once a Supervisor starts using it.
    pub fn compiled_process_regex(&self) -> Result<Regex, regex::Error> {
        Regex::new(&self.effective_process_regex())
    }

    /// `true` when the last whitespace-separated token of `command` looks
    /// like a script path that should be verified to exist before launch.
    pub fn script_path(&self) -> Option<&str> {
        let last = self.command.split_whitespace().last()?;
        last.ends_with(".py").then_some(last)
    }

    /// Required fields the Fleet Manager checks for before accepting a spec
    /// from the untyped config file: name, host, port, username, auth type.
    /// Expressed here as a pure validity check over an already-deserialized
    /// value (serde already enforces the auth tag is present and well-formed;
    /// this only guards against a name/host/username that is empty).
    pub fn has_required_fields(&self) -> bool {
        !self.name.is_empty() && !self.host.is_empty() && !self.username.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    pub servers: Vec<HostSpec>,
}
