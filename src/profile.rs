//! Profile store: named connection profiles and the active selection.
//!
//! The on-disk document keeps the key names of the original Windows client
//! (`Servers`, `CurrentServerId`, `Server`, `Listen`, ...) so existing
//! config files load unchanged.
//!
//! Mutations on [`ProfileSet`] are pure; callers persist with
//! [`ProfileStore::save`] after each one.
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ControlError;
use crate::supervisor::Phase;
use crate::util::id::new_profile_id;

pub const DEFAULT_PROFILE_NAME: &str = "默认服务器";
pub const NEW_PROFILE_NAME: &str = "新服务器";

/// One connection configuration for the worker.
///
/// Empty strings mean "flag omitted" when building launch arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Server")]
    pub remote_address: String,
    #[serde(rename = "Listen")]
    pub listen_address: String,
    #[serde(rename = "Token")]
    pub auth_token: String,
    #[serde(rename = "Ip")]
    pub preferred_ip: String,
    #[serde(rename = "Dns")]
    pub doh_resolver: String,
    #[serde(rename = "Ech")]
    pub ech_domain: String,
}

impl Default for Profile {
    fn default() -> Self {
        Profile::new(NEW_PROFILE_NAME)
    }
}

impl Profile {
    /// Empty profile with a fresh identifier.
    pub fn new(name: impl Into<String>) -> Self {
        Profile {
            id: new_profile_id(),
            name: name.into(),
            remote_address: String::new(),
            listen_address: String::new(),
            auth_token: String::new(),
            preferred_ip: String::new(),
            doh_resolver: String::new(),
            ech_domain: String::new(),
        }
    }

    /// First-run profile populated with example values.
    pub fn seed_default() -> Self {
        Profile {
            remote_address: "example.com:443".to_string(),
            listen_address: "127.0.0.1:30000".to_string(),
            preferred_ip: "saas.sin.fan".to_string(),
            doh_resolver: "dns.alidns.com/dns-query".to_string(),
            ech_domain: "cloudflare-ech.com".to_string(),
            ..Profile::new(DEFAULT_PROFILE_NAME)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Copy the connection fields of `draft`; id and name are kept.
    pub fn apply_fields(&mut self, draft: &Profile) {
        self.remote_address = draft.remote_address.clone();
        self.listen_address = draft.listen_address.clone();
        self.auth_token = draft.auth_token.clone();
        self.preferred_ip = draft.preferred_ip.clone();
        self.doh_resolver = draft.doh_resolver.clone();
        self.ech_domain = draft.ech_domain.clone();
    }
}

/// Persisted root: ordered profiles plus the active selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSet {
    #[serde(rename = "Servers", default)]
    profiles: Vec<Profile>,
    #[serde(rename = "CurrentServerId", default)]
    active_profile_id: Option<String>,
}

fn validated_name(name: &str) -> Result<String, ControlError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ControlError::InvalidName);
    }
    Ok(trimmed.to_string())
}

impl ProfileSet {
    pub fn profiles(&self) -> &[Profile] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Raw stored selection; may be stale. Prefer [`ProfileSet::active`].
    pub fn active_profile_id(&self) -> Option<&str> {
        self.active_profile_id.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Seed one default profile into an empty set and make it active.
    /// Returns true when seeding happened.
    pub fn ensure_non_empty(&mut self) -> bool {
        if !self.profiles.is_empty() {
            return false;
        }
        let seed = Profile::seed_default();
        self.active_profile_id = Some(seed.id.clone());
        self.profiles.push(seed);
        info!("seeded default profile");
        true
    }

    /// Point a missing or stale selection at the active fallback (the first
    /// profile). Returns true when the stored id changed.
    pub fn repair_selection(&mut self) -> bool {
        let Some(id) = self.active().map(|p| p.id.clone()) else {
            return false;
        };
        if self.active_profile_id.as_deref() == Some(id.as_str()) {
            return false;
        }
        self.active_profile_id = Some(id);
        true
    }

    fn active_index(&self) -> Option<usize> {
        if self.profiles.is_empty() {
            return None;
        }
        let idx = self
            .active_profile_id
            .as_deref()
            .and_then(|id| self.profiles.iter().position(|p| p.id == id));
        Some(idx.unwrap_or(0))
    }

    /// Active profile, falling back to the first one when the stored id is stale.
    pub fn active(&self) -> Option<&Profile> {
        self.active_index().map(|i| &self.profiles[i])
    }

    pub fn active_mut(&mut self) -> Option<&mut Profile> {
        let i = self.active_index()?;
        Some(&mut self.profiles[i])
    }

    /// Append a profile built from `draft` under a fresh id without touching the selection.
    pub fn insert(&mut self, name: &str, draft: &Profile) -> Result<String, ControlError> {
        let mut p = Profile::new(validated_name(name)?);
        p.apply_fields(draft);
        let id = p.id.clone();
        debug!(profile_id = %id, "profile inserted");
        self.profiles.push(p);
        Ok(id)
    }

    /// Append a copy of `draft` named `name` and make it active.
    pub fn add(&mut self, name: &str, draft: &Profile) -> Result<String, ControlError> {
        let id = self.insert(name, draft)?;
        self.active_profile_id = Some(id.clone());
        Ok(id)
    }

    /// The "save" action: copy the draft's connection fields into the active profile.
    pub fn update_active(&mut self, draft: &Profile) -> Result<&Profile, ControlError> {
        let p = self
            .active_mut()
            .ok_or_else(|| ControlError::ProfileNotFound(String::new()))?;
        p.apply_fields(draft);
        Ok(p)
    }

    pub fn rename(&mut self, id: &str, name: &str) -> Result<(), ControlError> {
        let name = validated_name(name)?;
        let p = self
            .profiles
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| ControlError::ProfileNotFound(id.to_string()))?;
        p.name = name;
        Ok(())
    }

    /// Remove a profile. The last remaining profile can never be deleted; when
    /// the active one goes, the first remaining profile becomes active.
    pub fn delete(&mut self, id: &str) -> Result<Profile, ControlError> {
        if self.profiles.len() <= 1 {
            return Err(ControlError::LastProfile);
        }
        let idx = self
            .profiles
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| ControlError::ProfileNotFound(id.to_string()))?;
        let removed = self.profiles.remove(idx);
        if self.get(self.active_profile_id.as_deref().unwrap_or("")).is_none() {
            self.active_profile_id = self.profiles.first().map(|p| p.id.clone());
        }
        Ok(removed)
    }

    /// Change the active profile; rejected while a worker is running.
    pub fn select(&mut self, id: &str, phase: Phase) -> Result<(), ControlError> {
        if phase == Phase::Running {
            return Err(ControlError::SelectWhileRunning);
        }
        if self.get(id).is_none() {
            return Err(ControlError::ProfileNotFound(id.to_string()));
        }
        self.active_profile_id = Some(id.to_string());
        Ok(())
    }
}

/// Durable storage for a [`ProfileSet`] (one pretty-printed JSON document).
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored set. A missing file is an empty set; an unreadable or
    /// unparsable file is reported as ConfigLoadFailed.
    pub fn try_load(&self) -> Result<ProfileSet, ControlError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no config file yet");
                return Ok(ProfileSet::default());
            }
            Err(e) => {
                return Err(ControlError::ConfigLoadFailed(format!(
                    "{}: {e}",
                    self.path.display()
                )))
            }
        };
        // A UTF-8 BOM is common in files edited with Windows tools.
        let text = text.strip_prefix('\u{feff}').unwrap_or(&text);
        serde_json::from_str(text).map_err(|e| {
            ControlError::ConfigLoadFailed(format!("{}: {e}", self.path.display()))
        })
    }

    /// Recoverable load: any failure yields an empty set (seed it with
    /// [`ProfileSet::ensure_non_empty`]).
    pub fn load(&self) -> ProfileSet {
        self.try_load().unwrap_or_else(|e| {
            warn!("{e}; starting from defaults");
            ProfileSet::default()
        })
    }

    /// Overwrite storage with the full set.
    pub fn save(&self, set: &ProfileSet) -> Result<(), ControlError> {
        let json = serde_json::to_string_pretty(set)
            .map_err(|e| ControlError::ConfigSaveFailed(e.to_string()))?;
        crate::util::fs::write_atomic(&self.path, json.as_bytes()).map_err(|e| {
            ControlError::ConfigSaveFailed(format!("{}: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), profiles = set.len(), "config saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repair_selection_points_stale_id_at_first_profile() {
        let doc = r#"{"Servers":[{"Id":"a","Name":"one"},{"Id":"b","Name":"two"}],"CurrentServerId":"gone"}"#;
        let mut set: ProfileSet = serde_json::from_str(doc).unwrap();
        assert!(set.repair_selection());
        assert_eq!(set.active_profile_id(), Some("a"));
        assert!(!set.repair_selection());

        let mut empty = ProfileSet::default();
        assert!(!empty.repair_selection());
        assert_eq!(empty.active_profile_id(), None);
    }

    fn two_profiles() -> (ProfileSet, String, String) {
        let mut set = ProfileSet::default();
        set.ensure_non_empty();
        let first = set.active().unwrap().id().to_string();
        let draft = set.active().unwrap().clone();
        let second = set.add("second", &draft).unwrap();
        (set, first, second)
    }

    #[test]
    fn test_ensure_non_empty_seeds_default_once() {
        let mut set = ProfileSet::default();
        assert!(set.active().is_none());
        assert!(set.ensure_non_empty());
        assert!(!set.ensure_non_empty());
        assert_eq!(set.len(), 1);
        let p = set.active().unwrap();
        assert_eq!(p.name, DEFAULT_PROFILE_NAME);
        assert_eq!(p.remote_address, "example.com:443");
        assert_eq!(p.listen_address, "127.0.0.1:30000");
        assert_eq!(p.ech_domain, "cloudflare-ech.com");
        assert!(p.auth_token.is_empty());
        assert_eq!(set.active_profile_id(), Some(p.id()));
    }

    #[test]
    fn test_active_falls_back_to_first_on_stale_id() {
        let (mut set, first, _) = two_profiles();
        set.active_profile_id = Some("gone".to_string());
        assert_eq!(set.active().unwrap().id(), first);
        set.active_profile_id = None;
        assert_eq!(set.active().unwrap().id(), first);
    }

    #[test]
    fn test_add_copies_draft_with_new_id_and_activates() {
        let (set, first, second) = two_profiles();
        assert_ne!(first, second);
        assert_eq!(set.active().unwrap().id(), second);
        let a = set.get(&first).unwrap();
        let b = set.get(&second).unwrap();
        assert_eq!(b.name, "second");
        assert_eq!(a.remote_address, b.remote_address);
        assert_eq!(a.doh_resolver, b.doh_resolver);
    }

    #[test]
    fn test_insert_keeps_selection() {
        let (mut set, _, second) = two_profiles();
        let draft = Profile::new("ignored");
        let third = set.insert("third", &draft).unwrap();
        assert_eq!(set.active().unwrap().id(), second);
        assert_eq!(set.profiles().last().unwrap().id(), third);
    }

    #[test]
    fn test_blank_names_rejected() {
        let (mut set, first, _) = two_profiles();
        let draft = Profile::new("x");
        assert!(matches!(
            set.add("   ", &draft),
            Err(ControlError::InvalidName)
        ));
        assert!(matches!(
            set.rename(&first, ""),
            Err(ControlError::InvalidName)
        ));
        set.rename(&first, "  renamed ").unwrap();
        assert_eq!(set.get(&first).unwrap().name, "renamed");
    }

    #[test]
    fn test_delete_last_profile_is_rejected_noop() {
        let mut set = ProfileSet::default();
        set.ensure_non_empty();
        let before = set.clone();
        let id = set.active().unwrap().id().to_string();
        assert!(matches!(set.delete(&id), Err(ControlError::LastProfile)));
        assert_eq!(set, before);
    }

    #[test]
    fn test_delete_active_moves_selection_to_first() {
        let (mut set, first, second) = two_profiles();
        let removed = set.delete(&second).unwrap();
        assert_eq!(removed.id(), second);
        assert_eq!(set.active_profile_id(), Some(first.as_str()));
    }

    #[test]
    fn test_delete_inactive_keeps_selection() {
        let (mut set, first, second) = two_profiles();
        set.select(&first, Phase::Idle).unwrap();
        set.delete(&second).unwrap();
        assert_eq!(set.active_profile_id(), Some(first.as_str()));
        assert!(matches!(
            set.delete("nope"),
            Err(ControlError::LastProfile)
        ));
    }

    #[test]
    fn test_select_rejected_while_running() {
        let (mut set, first, second) = two_profiles();
        assert!(matches!(
            set.select(&first, Phase::Running),
            Err(ControlError::SelectWhileRunning)
        ));
        assert_eq!(set.active_profile_id(), Some(second.as_str()));
        assert!(matches!(
            set.select("missing", Phase::Idle),
            Err(ControlError::ProfileNotFound(_))
        ));
        set.select(&first, Phase::Idle).unwrap();
        assert_eq!(set.active().unwrap().id(), first);
    }

    #[test]
    fn test_update_active_keeps_identity() {
        let (mut set, _, second) = two_profiles();
        let mut draft = Profile::new("draft name");
        draft.remote_address = "other.example:8443".into();
        draft.auth_token = "secret".into();
        let p = set.update_active(&draft).unwrap();
        assert_eq!(p.id(), second);
        assert_eq!(p.name, "second");
        assert_eq!(p.remote_address, "other.example:8443");
        assert_eq!(p.auth_token, "secret");
        assert!(p.listen_address.is_empty());
    }

    #[test]
    fn test_parses_original_client_document() {
        let json = r#"{
  "Servers": [
    {
      "Id": "6f1d2c1e-8f6a-4a55-9d0e-2b9f3c1d7a10",
      "Name": "home",
      "Server": "a.example:443",
      "Listen": "127.0.0.1:30001",
      "Token": "",
      "Ip": "",
      "Dns": "",
      "Ech": "cloudflare-ech.com"
    }
  ],
  "CurrentServerId": "6f1d2c1e-8f6a-4a55-9d0e-2b9f3c1d7a10"
}"#;
        let set: ProfileSet = serde_json::from_str(json).unwrap();
        let p = set.active().unwrap();
        assert_eq!(p.id(), "6f1d2c1e-8f6a-4a55-9d0e-2b9f3c1d7a10");
        assert_eq!(p.listen_address, "127.0.0.1:30001");
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let set: ProfileSet =
            serde_json::from_str(r#"{"Servers":[{"Id":"x","Name":"n"}],"CurrentServerId":null}"#)
                .unwrap();
        let p = set.active().unwrap();
        assert_eq!(p.id(), "x");
        assert!(p.remote_address.is_empty());
        assert!(set.active_profile_id().is_none());
    }
}
