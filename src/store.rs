//! Rule-list metadata and manifest persistence.
//!
//! The manifest at `<dir>/config.json` is the single durable record of
//! configured rule lists: a JSON array of [`RuleList`] entries, sorted
//! by id, two-space indented. Raw rule text lives beside it in one
//! `<id>.rules` file per list; that path is derived from the id on load
//! and never persisted.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// One configured rule list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleList {
    /// Stable identifier (UUID), assigned at creation.
    #[serde(default)]
    pub id: String,

    /// Human label.
    #[serde(default)]
    pub name: String,

    /// Source HTTP(S) URL.
    #[serde(default)]
    pub url: String,

    /// Disabled lists contribute nothing to the active matchers.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub auto_update: bool,

    /// Refresh interval in hours; 0 disables auto-update regardless of
    /// `auto_update`.
    #[serde(default)]
    pub update_interval_hours: i64,

    /// Count of parsed rules observed at the last reload. A cache: it
    /// may lag briefly between a download and the next reload.
    #[serde(default)]
    pub rule_count: usize,

    /// Time of the last successful download; omitted until one happens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    /// `<dir>/<id>.rules`, derived from `id`.
    #[serde(skip)]
    pub local_path: PathBuf,
}

impl RuleList {
    /// Whether the auto-updater should refresh this list now.
    ///
    /// A list that has never been downloaded is always due once it is
    /// enabled for auto-update with a positive interval.
    pub fn update_due(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled || !self.auto_update || self.update_interval_hours <= 0 {
            return false;
        }
        match self.last_updated {
            None => true,
            Some(at) => now - at >= chrono::Duration::hours(self.update_interval_hours),
        }
    }
}

/// Path of the raw rule file for a list id.
pub fn rule_file_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.rules"))
}

/// Loads the manifest, keyed by list id.
///
/// A missing file yields an empty map. A file that exists but does not
/// parse is an error for the caller to surface.
pub fn load_manifest(path: &Path, dir: &Path) -> Result<HashMap<String, RuleList>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(err) => return Err(err).context("failed to read manifest"),
    };

    let lists: Vec<RuleList> =
        serde_json::from_slice(&data).context("failed to parse manifest json")?;

    Ok(lists
        .into_iter()
        .map(|mut list| {
            list.local_path = rule_file_path(dir, &list.id);
            (list.id.clone(), list)
        })
        .collect())
}

/// Serializes the manifest sorted ascending by id.
///
/// Callers hold a read lock on the rules map while this runs so the
/// snapshot is consistent; the subsequent file write happens outside
/// the lock.
pub fn serialize_manifest(rules: &HashMap<String, RuleList>) -> Result<Vec<u8>> {
    let mut lists: Vec<&RuleList> = rules.values().collect();
    lists.sort_by(|a, b| a.id.cmp(&b.id));
    serde_json::to_vec_pretty(&lists).context("failed to serialize manifest")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, name: &str) -> RuleList {
        RuleList {
            id: id.to_string(),
            name: name.to_string(),
            url: format!("https://lists.example/{name}.txt"),
            enabled: true,
            auto_update: false,
            update_interval_hours: 0,
            rule_count: 3,
            last_updated: None,
            local_path: PathBuf::new(),
        }
    }

    #[test]
    fn test_missing_manifest_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rules = load_manifest(&dir.path().join("config.json"), dir.path()).unwrap();
        assert!(rules.is_empty());
    }

    #[test]
    fn test_corrupt_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(load_manifest(&path, dir.path()).is_err());
    }

    #[test]
    fn test_round_trip_sorted_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut rules = HashMap::new();
        let mut b = sample("bbb", "second");
        b.last_updated = Some("2026-07-01T10:00:00Z".parse().unwrap());
        rules.insert("bbb".to_string(), b);
        rules.insert("aaa".to_string(), sample("aaa", "first"));

        let data = serialize_manifest(&rules).unwrap();
        std::fs::write(&path, &data).unwrap();

        // Sorted ascending by id on disk.
        let text = String::from_utf8(data).unwrap();
        assert!(text.find("aaa").unwrap() < text.find("bbb").unwrap());

        let loaded = load_manifest(&path, dir.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        let a = &loaded["aaa"];
        assert_eq!(a.name, "first");
        assert_eq!(a.rule_count, 3);
        assert_eq!(a.local_path, dir.path().join("aaa.rules"));
        assert_eq!(
            loaded["bbb"].last_updated,
            Some("2026-07-01T10:00:00Z".parse().unwrap())
        );
    }

    #[test]
    fn test_unset_last_updated_is_omitted() {
        let mut rules = HashMap::new();
        rules.insert("aaa".to_string(), sample("aaa", "first"));

        let text = String::from_utf8(serialize_manifest(&rules).unwrap()).unwrap();
        assert!(!text.contains("last_updated"));
        assert!(text.contains("\"rule_count\": 3"));

        let parsed: Vec<RuleList> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0].last_updated, None);
    }

    #[test]
    fn test_update_due() {
        let now: DateTime<Utc> = "2026-08-01T00:00:00Z".parse().unwrap();

        let mut list = sample("aaa", "first");
        list.auto_update = true;
        list.update_interval_hours = 24;

        // Never downloaded: due immediately.
        assert!(list.update_due(now));

        list.last_updated = Some(now - chrono::Duration::hours(25));
        assert!(list.update_due(now));

        list.last_updated = Some(now - chrono::Duration::hours(23));
        assert!(!list.update_due(now));

        // Zero interval or flags off disable the updater.
        list.update_interval_hours = 0;
        assert!(!list.update_due(now));
        list.update_interval_hours = 24;
        list.auto_update = false;
        assert!(!list.update_due(now));
        list.auto_update = true;
        list.enabled = false;
        assert!(!list.update_due(now));
    }
}
