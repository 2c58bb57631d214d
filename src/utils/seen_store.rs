//! Durable set of token identity keys that were already announced

use parking_lot::Mutex;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Build the dedupe key for a token: `chain-address`, trimmed and lowercased.
///
/// Returns `None` when either part is blank.
pub fn identity_key(chain: &str, token_address: &str) -> Option<String> {
    let chain = chain.trim();
    let address = token_address.trim();
    if chain.is_empty() || address.is_empty() {
        return None;
    }
    Some(format!("{}-{}", chain.to_lowercase(), address.to_lowercase()))
}

/// Identity keys already notified. Insertion is idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeenSet {
    keys: HashSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Returns `true` if the key was not present before.
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        self.keys.insert(key.into())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    /// Up to `limit` keys, sorted so the output is stable
    pub fn sample(&self, limit: usize) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.iter().cloned().collect();
        keys.sort();
        keys.truncate(limit);
        keys
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.keys.iter()
    }
}

impl FromIterator<String> for SeenSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode seen set: {0}")]
    Encode(#[from] serde_json::Error),
}

/// JSON file backing a [`SeenSet`]
pub struct SeenStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SeenStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored set. A missing or unreadable file yields an empty set.
    pub fn load(&self) -> SeenSet {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(target: "SEEN_STORE", "No state file at {}, starting empty", self.path.display());
                return SeenSet::new();
            }
            Err(e) => {
                warn!(target: "SEEN_STORE", "Failed to read {}: {}", self.path.display(), e);
                return SeenSet::new();
            }
        };

        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(keys) => {
                let set: SeenSet = keys.into_iter().collect();
                info!(target: "SEEN_STORE", "Loaded {} seen tokens", set.len());
                set
            }
            Err(e) => {
                warn!(target: "SEEN_STORE", "Corrupt state file {}: {}, starting empty", self.path.display(), e);
                SeenSet::new()
            }
        }
    }

    /// Write the full set. The data goes to a temp file that is renamed over
    /// the target, so readers see either the old or the new content.
    pub fn save(&self, set: &SeenSet) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| StoreError::Io { path, source }
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
        }

        let keys: Vec<&String> = set.iter().collect();
        let body = serde_json::to_vec_pretty(&keys)?;

        let tmp = self.tmp_path();
        {
            let mut file = File::create(&tmp).map_err(io_err(&tmp))?;
            file.write_all(&body).map_err(io_err(&tmp))?;
            file.sync_all().map_err(io_err(&tmp))?;
        }
        fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;

        debug!(target: "SEEN_STORE", "Saved {} seen tokens", set.len());
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn identity_key_ignores_case_and_whitespace() {
        assert_eq!(identity_key("Solana", "Abc123").as_deref(), Some("solana-abc123"));
        assert_eq!(identity_key(" SOLANA ", "aBC123"), identity_key("solana", "abc123"));
        assert_eq!(identity_key("", "abc"), None);
        assert_eq!(identity_key("bsc", "   "), None);
    }

    #[test]
    fn insert_is_idempotent() {
        let mut set = SeenSet::new();
        assert!(set.insert("bsc-0xdead"));
        assert!(!set.insert("bsc-0xdead"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = SeenStore::new(dir.path().join("nope.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.json");
        fs::write(&path, "{not json").unwrap();
        assert!(SeenStore::new(&path).load().is_empty());

        fs::write(&path, r#"{"keys": ["a"]}"#).unwrap();
        assert!(SeenStore::new(&path).load().is_empty());
    }

    #[test]
    fn save_then_load_keeps_every_key() {
        let dir = tempdir().unwrap();
        let store = SeenStore::new(dir.path().join("nested/state/seen.json"));

        let set: SeenSet = (0..25).map(|i| format!("solana-token{i}")).collect();
        store.save(&set).unwrap();

        let loaded = store.load();
        assert_eq!(loaded, set);
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn on_disk_format_is_a_json_array() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seen.json");
        let store = SeenStore::new(&path);
        store.save(&["bsc-0xdead".to_string()].into_iter().collect()).unwrap();

        let raw: Vec<String> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, vec!["bsc-0xdead".to_string()]);
    }

    #[test]
    fn save_fails_when_target_is_unwritable() {
        let dir = tempdir().unwrap();
        // The target's parent is a regular file, so the directory cannot be created.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let store = SeenStore::new(blocker.join("seen.json"));

        let err = store.save(&SeenSet::new()).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn sample_is_bounded() {
        let set: SeenSet = (0..30).map(|i| format!("k{i:02}")).collect();
        let sample = set.sample(10);
        assert_eq!(sample.len(), 10);
        assert_eq!(sample[0], "k00");
    }
}
