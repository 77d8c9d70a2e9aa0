//! File-backed limit rules and whitelist.
//!
//! Both stores reopen their file on every access and rewrite it whole, so an
//! edit made through the API is visible to the next enforcement tick without
//! any in-memory cache to invalidate.

use crate::control::ProcessAction;
use crate::error::{StoreError, ensure_parent};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Thresholds for one name pattern. An unset threshold never triggers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitRule {
    pub cpu: Option<f64>,
    /// Resident memory in MB.
    pub ram: Option<f64>,
    /// Process age in minutes.
    pub time: Option<f64>,
    pub action: String,
}

impl Default for LimitRule {
    fn default() -> Self {
        Self {
            cpu: None,
            ram: None,
            time: None,
            action: ProcessAction::Kill.as_str().to_string(),
        }
    }
}

pub type RuleSet = BTreeMap<String, LimitRule>;

#[derive(Debug, Clone)]
pub struct RuleStore {
    path: PathBuf,
}

impl RuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn try_load(&self) -> Result<RuleSet, StoreError> {
        read_json(&self.path)
    }

    /// Every rule keyed by pattern; empty when the file is missing or broken.
    pub fn rules(&self) -> RuleSet {
        self.try_load().unwrap_or_else(|err| {
            warn!("[limits] rules unreadable: {err}");
            RuleSet::new()
        })
    }

    /// Insert or replace the rule for `pattern`, stored lowercased and trimmed.
    pub fn upsert(&self, pattern: &str, mut rule: LimitRule) -> Result<String, StoreError> {
        let key = pattern.trim().to_lowercase();
        if key.is_empty() {
            return Err(StoreError::Invalid("rule pattern must not be empty".into()));
        }
        rule.action = rule.action.trim().to_lowercase();
        if rule.action.parse::<ProcessAction>().is_err() {
            return Err(StoreError::Invalid(format!(
                "unknown action '{}', expected one of kill, terminate, suspend, resume",
                rule.action
            )));
        }

        let mut rules = self.try_load()?;
        rules.insert(key.clone(), rule);
        write_json(&self.path, &rules)?;
        info!("[limits] rule '{key}' saved");
        Ok(key)
    }

    /// Returns whether a rule was removed.
    pub fn remove(&self, pattern: &str) -> Result<bool, StoreError> {
        let key = pattern.trim().to_lowercase();
        let mut rules = self.try_load()?;
        if rules.remove(&key).is_none() {
            return Ok(false);
        }
        write_json(&self.path, &rules)?;
        info!("[limits] rule '{key}' removed");
        Ok(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Whitelist {
    #[serde(default)]
    pub apps: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WhitelistStore {
    path: PathBuf,
}

impl WhitelistStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn try_load(&self) -> Result<Whitelist, StoreError> {
        read_json(&self.path)
    }

    pub fn apps(&self) -> Vec<String> {
        self.try_load()
            .map(|wl| wl.apps)
            .unwrap_or_else(|err| {
                warn!("[limits] whitelist unreadable: {err}");
                Vec::new()
            })
    }

    /// Lowercased names for exact-match exemption checks.
    pub fn exact_names(&self) -> HashSet<String> {
        self.apps().iter().map(|app| app.to_lowercase()).collect()
    }

    /// Returns `false` when an entry differing only in case already exists.
    pub fn add(&self, name: &str) -> Result<bool, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Invalid("whitelist name must not be empty".into()));
        }
        let mut wl = self.try_load()?;
        let lowered = name.to_lowercase();
        if wl.apps.iter().any(|app| app.to_lowercase() == lowered) {
            return Ok(false);
        }
        wl.apps.push(name.to_string());
        write_json(&self.path, &wl)?;
        info!("[limits] '{name}' whitelisted");
        Ok(true)
    }

    /// Drops every case-insensitive match; returns how many were removed.
    pub fn remove(&self, name: &str) -> Result<usize, StoreError> {
        let lowered = name.trim().to_lowercase();
        let mut wl = self.try_load()?;
        let before = wl.apps.len();
        wl.apps.retain(|app| app.to_lowercase() != lowered);
        let removed = before - wl.apps.len();
        if removed > 0 {
            write_json(&self.path, &wl)?;
            info!("[limits] '{name}' removed from whitelist");
        }
        Ok(removed)
    }
}

fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StoreError> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path).map_err(|err| StoreError::io(path, err))?;
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(&content).map_err(|err| StoreError::json(path, err))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(value).map_err(|err| StoreError::json(path, err))?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|err| StoreError::io(&tmp, err))?;
    std::fs::rename(&tmp, path).map_err(|err| StoreError::io(path, err))
}
