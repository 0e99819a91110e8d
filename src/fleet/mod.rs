pub mod diagnostics;
pub mod error;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::loader::FleetConfigStore;
use crate::config::model::{FleetConfig, HostSpec};
use crate::event::channel::EventPublisher;
use crate::metrics::store::MetricsStore;
use crate::supervisor::state::HostState;
use crate::supervisor::Supervisor;

pub use diagnostics::{test_connection, ConnectionDiagnostics};
pub use error::FleetError;

/// Owns the fleet's configuration list and the mapping from host name to its
/// Supervisor. Its own methods run on the caller's unit and only mutate its
/// own data structures: per-host state lives exclusively in each Supervisor.
pub struct FleetManager {
    store: Box<dyn FleetConfigStore + Send>,
    metrics: Arc<MetricsStore>,
    events: EventPublisher,
    log_dir: PathBuf,
    config: FleetConfig,
    supervisors: HashMap<String, Supervisor>,
}

impl FleetManager {
    pub fn new(
        store: Box<dyn FleetConfigStore + Send>,
        metrics: Arc<MetricsStore>,
        events: EventPublisher,
        log_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            metrics,
            events,
            log_dir,
            config: FleetConfig::default(),
            supervisors: HashMap::new(),
        }
    }

    /// Reads the configured host list from the collaborator (creating a
    /// bootstrap file on first run, applying defaults for missing fields)
    /// and spawns a Supervisor for every entry. A Supervisor is spawned even
    /// for a disabled spec; it idles in `Stopped` until `start()` is called,
    /// rather than never existing at all, so toggling `enabled` later needs
    /// no re-create.
    pub fn load(&mut self) -> Result<(), FleetError> {
        self.config = self.store.load()?;
        let specs = self.config.servers.clone();
        for spec in specs {
            self.spawn_supervisor(spec);
        }
        Ok(())
    }

    fn spawn_supervisor(&mut self, spec: HostSpec) {
        let name = spec.name.clone();
        let supervisor = Supervisor::spawn(
            spec,
            self.events.clone(),
            self.metrics.clone(),
            self.log_dir.clone(),
        );
        self.supervisors.insert(name, supervisor);
    }

    /// Rejects a duplicate name, persists the updated list, then spawns a
    /// Supervisor for the new entry.
    pub fn add(&mut self, spec: HostSpec) -> Result<(), FleetError> {
        if self.config.servers.iter().any(|s| s.name == spec.name) {
            return Err(FleetError::DuplicateName(spec.name));
        }
        self.config.servers.push(spec.clone());
        self.store.save(&self.config)?;
        self.spawn_supervisor(spec);
        Ok(())
    }

    /// Rejects a rename that collides with another existing host, stops and
    /// discards the old Supervisor, persists, and spawns a fresh Supervisor
    /// from `new_spec`.
    pub fn edit(&mut self, old_name: &str, new_spec: HostSpec) -> Result<(), FleetError> {
        if new_spec.name != old_name
            && self.config.servers.iter().any(|s| s.name == new_spec.name)
        {
            return Err(FleetError::DuplicateName(new_spec.name));
        }
        let idx = self
            .config
            .servers
            .iter()
            .position(|s| s.name == old_name)
            .ok_or_else(|| FleetError::NotFound(old_name.to_string()))?;

        self.config.servers[idx] = new_spec.clone();
        self.store.save(&self.config)?;

        if let Some(supervisor) = self.supervisors.remove(old_name) {
            supervisor.shutdown();
        }
        self.spawn_supervisor(new_spec);
        Ok(())
    }

    /// Stops and discards the Supervisor, then persists the updated list. No
    /// further Events bearing this host's name are published afterwards.
    pub fn delete(&mut self, name: &str) -> Result<(), FleetError> {
        let idx = self
            .config
            .servers
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| FleetError::NotFound(name.to_string()))?;

        self.config.servers.remove(idx);
        self.store.save(&self.config)?;

        if let Some(supervisor) = self.supervisors.remove(name) {
            supervisor.shutdown();
        }
        Ok(())
    }

    /// Signals every Supervisor whose spec is enabled to start. Disabled
    /// hosts are left exactly as they are.
    pub fn start_all(&self) {
        for spec in &self.config.servers {
            if !spec.enabled {
                continue;
            }
            if let Some(supervisor) = self.supervisors.get(&spec.name) {
                supervisor.start();
            }
        }
    }

    /// Signals every Supervisor to stop, enabled or not.
    pub fn stop_all(&self) {
        for supervisor in self.supervisors.values() {
            supervisor.stop();
        }
    }

    /// Signals, then joins, every Supervisor's worker thread. Used for a
    /// clean process exit; `stop_all` alone only raises the asynchronous
    /// signal and returns immediately.
    pub fn shutdown_all(&mut self) {
        for (_, supervisor) in self.supervisors.drain() {
            supervisor.shutdown();
        }
    }

    /// Opens a throwaway session against `spec` and returns a diagnostic
    /// snapshot. Not an Event, not tied to any Supervisor's lifecycle.
    pub fn test_connection(
        &self,
        spec: &HostSpec,
    ) -> Result<ConnectionDiagnostics, crate::supervisor::error::SupervisorError> {
        diagnostics::test_connection(spec)
    }

    pub fn get_worker_state(&self, name: &str) -> Option<HostState> {
        self.supervisors.get(name).map(Supervisor::snapshot)
    }

    pub fn get_all_states(&self) -> Vec<HostState> {
        self.config
            .servers
            .iter()
            .filter_map(|spec| self.get_worker_state(&spec.name))
            .collect()
    }

    pub fn host_names(&self) -> impl Iterator<Item = &str> {
        self.config.servers.iter().map(|s| s.name.as_str())
    }
}
