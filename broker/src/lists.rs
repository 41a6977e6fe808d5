//! Allow-list / deny-list stores: file-backed, hot-reloaded sets of
//! accepted or rejected public keys, keyed by domain (allow-list) or flat
//! (deny-list). See spec.md §4.2.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::PathBuf,
    sync::Arc,
    time::{Duration, SystemTime},
};

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use wgkex_common::PublicKey;

/// One deny-list entry as it appears in YAML: either a bare key string, or
/// a `{key, reason}` mapping.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBlacklistEntry {
    Bare(PublicKey),
    WithReason { key: PublicKey, reason: String },
}

/// Deny-list: a flat set of blacklisted keys, each with an optional reason.
/// Reloads whenever the backing file's mtime advances, polled every 10 s by
/// a supervised background task — matching
/// `original_source/wgkex/broker/blacklist.py`.
pub struct DenyList {
    path: PathBuf,
    entries: RwLock<HashMap<PublicKey, Option<String>>>,
    last_mtime: Mutex<Option<SystemTime>>,
}

impl DenyList {
    /// Loads the deny-list from `path` once, synchronously. If the file is
    /// missing, the set starts empty.
    pub fn load(path: PathBuf) -> Arc<Self> {
        let list = Arc::new(Self {
            path,
            entries: RwLock::new(HashMap::new()),
            last_mtime: Mutex::new(None),
        });
        list.reload_if_changed();
        list
    }

    pub fn is_blacklisted(&self, key: &PublicKey) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn reason(&self, key: &PublicKey) -> Option<String> {
        self.entries.read().get(key).cloned().flatten()
    }

    /// Reloads the set if the file's mtime has advanced since the last
    /// load, or if the file has been deleted (resets to empty). Malformed
    /// YAML is logged and the previous set is retained.
    fn reload_if_changed(&self) {
        let metadata = match fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(_) => {
                *self.entries.write() = HashMap::new();
                *self.last_mtime.lock() = None;
                return;
            },
        };
        let mtime = metadata.modified().ok();
        if mtime == *self.last_mtime.lock() {
            return;
        }

        match fs::read_to_string(&self.path).map(|s| serde_yaml::from_str::<Vec<RawBlacklistEntry>>(&s)) {
            Ok(Ok(raw)) => {
                let parsed = raw
                    .into_iter()
                    .map(|entry| match entry {
                        RawBlacklistEntry::Bare(key) => (key, None),
                        RawBlacklistEntry::WithReason { key, reason } => (key, Some(reason)),
                    })
                    .collect();
                *self.entries.write() = parsed;
                *self.last_mtime.lock() = mtime;
            },
            Ok(Err(e)) => log::warn!("deny-list at {:?} is malformed, keeping previous set: {e}", self.path),
            Err(e) => log::warn!("failed to read deny-list at {:?}: {e}", self.path),
        }
    }

    /// Spawns the background poll-and-reload task. Exits when `exit` is
    /// cancelled.
    pub fn spawn_reloader(self: Arc<Self>, exit: CancellationToken) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                tokio::select! {
                    _ = interval.tick() => self.reload_if_changed(),
                    _ = exit.cancelled() => break,
                }
            }
        });
    }
}

/// Allow-list: a set of permitted keys per domain. Reloads on a fixed
/// interval (`0` disables reloading), matching
/// `original_source/wgkex/allowlist/allowlist.py`.
pub struct AllowList {
    path: PathBuf,
    entries: RwLock<HashMap<String, HashSet<PublicKey>>>,
}

impl AllowList {
    pub fn load(path: PathBuf) -> Arc<Self> {
        let list = Arc::new(Self {
            path,
            entries: RwLock::new(HashMap::new()),
        });
        list.reload();
        list
    }

    pub fn is_allowed(&self, domain: &str, key: &PublicKey) -> bool {
        self.entries
            .read()
            .get(domain)
            .map(|keys| keys.contains(key))
            .unwrap_or(false)
    }

    fn reload(&self) {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(_) => {
                *self.entries.write() = HashMap::new();
                return;
            },
        };
        match serde_yaml::from_str::<HashMap<String, HashSet<PublicKey>>>(&contents) {
            Ok(parsed) => *self.entries.write() = parsed,
            Err(e) => log::warn!("allow-list at {:?} is malformed, keeping previous set: {e}", self.path),
        }
    }

    /// Spawns the periodic reload task. A `refresh_interval` of zero
    /// disables reloading entirely (the initial load still happens).
    pub fn spawn_reloader(self: Arc<Self>, refresh_interval: Duration, exit: CancellationToken) {
        if refresh_interval.is_zero() {
            return;
        }
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(refresh_interval);
            interval.tick().await; // first tick fires immediately; already loaded at construction
            loop {
                tokio::select! {
                    _ = interval.tick() => self.reload(),
                    _ = exit.cancelled() => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn pubkey(n: u8) -> PublicKey {
        // Deterministic, syntactically valid-looking keys for tests.
        let keys = [
            "o52Ge+Rpj4CUSitVag9mS7pSXUesNM0ESnvj/wwehkg=",
            "HIgo9xNZhE6y8o9ao9UZVbasFOBGKlTvHbad2Z1Ozno=",
        ];
        keys[n as usize].parse().unwrap()
    }

    #[test]
    fn empty_deny_list_file_rejects_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deny.yaml");
        fs::write(&path, "[]\n").unwrap();
        let list = DenyList::load(path);
        assert!(!list.is_blacklisted(&pubkey(0)));
    }

    #[test]
    fn missing_deny_list_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.yaml");
        let list = DenyList::load(path);
        assert!(!list.is_blacklisted(&pubkey(0)));
    }

    #[test]
    fn deny_list_parses_bare_and_reasoned_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deny.yaml");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(
            file,
            "- {}\n- key: {}\n  reason: Abuse",
            pubkey(0),
            pubkey(1)
        )
        .unwrap();
        drop(file);

        let list = DenyList::load(path);
        assert!(list.is_blacklisted(&pubkey(0)));
        assert_eq!(list.reason(&pubkey(0)), None);
        assert!(list.is_blacklisted(&pubkey(1)));
        assert_eq!(list.reason(&pubkey(1)), Some("Abuse".to_owned()));
    }

    #[test]
    fn allow_list_queries_by_domain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("allow.yaml");
        fs::write(&path, format!("ffmuc_welt:\n  - {}\n", pubkey(0))).unwrap();
        let list = AllowList::load(path);
        assert!(list.is_allowed("ffmuc_welt", &pubkey(0)));
        assert!(!list.is_allowed("ffmuc_welt", &pubkey(1)));
        assert!(!list.is_allowed("ffmuc_muc", &pubkey(0)));
    }
}
