//! Application layer: one control thread's view of profiles, supervisor and
//! autostart. Every profile mutation is persisted immediately; a failed save
//! is recorded as a warning and the in-memory change is kept.
use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::autostart::{self, AutoStart};
use crate::errors::ControlError;
use crate::profile::{Profile, ProfileSet, ProfileStore};
use crate::relay::LineSink;
use crate::supervisor::{StartOutcome, Supervisor, SupervisorOptions, SupervisorStatus};
use crate::sysproxy;

pub struct App {
    store: ProfileStore,
    profiles: ProfileSet,
    supervisor: Supervisor,
    autostart: Box<dyn AutoStart>,
    warnings: Vec<ControlError>,
}

impl App {
    /// Load (or seed) the profile set and wire the given collaborators.
    pub fn new(store: ProfileStore, supervisor: Supervisor, autostart: Box<dyn AutoStart>) -> Self {
        let mut warnings = Vec::new();
        let mut profiles = match store.try_load() {
            Ok(set) => set,
            Err(e) => {
                warn!("{e}; starting from defaults");
                warnings.push(e);
                ProfileSet::default()
            }
        };
        let seeded = profiles.ensure_non_empty();
        let repaired = profiles.repair_selection();
        let mut app = App {
            store,
            profiles,
            supervisor,
            autostart,
            warnings,
        };
        if seeded || repaired {
            app.persist();
        }
        app
    }

    /// Platform proxy and autostart backends, configured from the environment.
    pub fn open(config: &Path, sink: Arc<dyn LineSink>) -> Result<Self, ControlError> {
        let supervisor = Supervisor::new(
            SupervisorOptions::from_env(),
            sysproxy::platform_system_proxy(),
            sink,
        );
        let exe = autostart::current_exe()?;
        Ok(Self::new(
            ProfileStore::new(config),
            supervisor,
            autostart::platform_autostart(exe),
        ))
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.save(&self.profiles) {
            warn!("{e}");
            self.warnings.push(e);
        }
    }

    /// Drain warnings collected since the last call (load and save failures).
    pub fn take_warnings(&mut self) -> Vec<ControlError> {
        std::mem::take(&mut self.warnings)
    }

    pub fn config_path(&self) -> &Path {
        self.store.path()
    }

    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    pub fn active(&self) -> Option<&Profile> {
        self.profiles.active()
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn status(&self) -> SupervisorStatus {
        self.supervisor.status()
    }

    /// Add a profile copying `draft` (or the active profile). While a worker
    /// runs the new profile is stored but not selected.
    pub fn add_profile(&mut self, name: &str, draft: Option<&Profile>) -> Result<String, ControlError> {
        let template = match draft {
            Some(d) => d.clone(),
            None => self.profiles.active().cloned().unwrap_or_default(),
        };
        let id = if self.supervisor.is_running() {
            self.profiles.insert(name, &template)?
        } else {
            self.profiles.add(name, &template)?
        };
        info!(profile_id = %id, "profile added");
        self.persist();
        Ok(id)
    }

    /// Save edited connection fields into the active profile. A running
    /// worker keeps its arguments until the next start.
    pub fn save_profile(&mut self, draft: &Profile) -> Result<(), ControlError> {
        self.profiles.update_active(draft)?;
        self.persist();
        Ok(())
    }

    pub fn rename_profile(&mut self, id: &str, name: &str) -> Result<(), ControlError> {
        self.profiles.rename(id, name)?;
        self.persist();
        Ok(())
    }

    /// Delete a profile. The active profile cannot be deleted while it backs
    /// a running worker.
    pub fn delete_profile(&mut self, id: &str) -> Result<Profile, ControlError> {
        let is_active = self.profiles.active().map(Profile::id) == Some(id);
        if is_active && self.supervisor.is_running() {
            return Err(ControlError::SelectWhileRunning);
        }
        let removed = self.profiles.delete(id)?;
        info!(profile_id = %id, "profile deleted");
        self.persist();
        Ok(removed)
    }

    pub fn select_profile(&mut self, id: &str) -> Result<(), ControlError> {
        self.profiles.select(id, self.supervisor.phase())?;
        self.persist();
        Ok(())
    }

    /// Persist, then launch the worker for the active profile.
    pub fn start(&mut self) -> Result<StartOutcome, ControlError> {
        self.persist();
        let profile = self
            .profiles
            .active()
            .cloned()
            .ok_or_else(|| ControlError::ProfileNotFound(String::new()))?;
        self.supervisor.start(&profile)
    }

    pub fn stop(&self) -> bool {
        self.supervisor.stop()
    }

    pub fn enable_system_proxy(&self) -> Result<(), ControlError> {
        self.supervisor.enable_system_proxy()
    }

    pub fn toggle_system_proxy(&self) -> Result<bool, ControlError> {
        self.supervisor.toggle_system_proxy()
    }

    pub fn autostart_enabled(&self) -> Result<bool, ControlError> {
        self.autostart.is_enabled()
    }

    pub fn set_autostart(&self, enabled: bool) -> Result<(), ControlError> {
        self.autostart.set_enabled(enabled)?;
        info!(enabled, backend = self.autostart.name(), "autostart changed");
        Ok(())
    }

    pub fn autostart_backend(&self) -> &'static str {
        self.autostart.name()
    }

    /// Proxy off, then worker stopped.
    pub fn shutdown(&self) {
        self.supervisor.shutdown();
    }
}

