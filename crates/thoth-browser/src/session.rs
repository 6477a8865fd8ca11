//! Saved browser sessions (cookies + localStorage)
//!
//! One JSON file per session id under the sessions directory; files are
//! written to a temp path and renamed into place. A periodic sweep evicts
//! sessions past the configured max age.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSession {
    pub cookies: Vec<SavedCookie>,
    #[serde(default)]
    pub local_storage: Vec<(String, String)>,
    pub created_at: DateTime<Utc>,
}

impl SavedSession {
    pub fn new(cookies: Vec<SavedCookie>, local_storage: Vec<(String, String)>) -> Self {
        Self {
            cookies,
            local_storage,
            created_at: Utc::now(),
        }
    }
}

/// File-backed session store.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create sessions dir {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf> {
        anyhow::ensure!(
            !session_id.is_empty()
                && session_id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
            "bad session id {session_id:?}"
        );
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    pub fn save(&self, session_id: &str, session: &SavedSession) -> Result<()> {
        let path = self.session_path(session_id)?;
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(session)?;
        fs::write(&tmp, json).with_context(|| format!("cannot write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("cannot rename into {}", path.display()))?;
        log::debug!("saved session {session_id} ({} cookies)", session.cookies.len());
        Ok(())
    }

    pub fn load(&self, session_id: &str) -> Result<Option<SavedSession>> {
        let path = self.session_path(session_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        let session = serde_json::from_str(&content)
            .with_context(|| format!("corrupt session file {}", path.display()))?;
        Ok(Some(session))
    }

    /// Delete sessions older than `max_age_days`. Returns eviction count.
    pub fn sweep_expired(&self, max_age_days: u32) -> Result<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(max_age_days));
        let mut evicted = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let expired = fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str::<SavedSession>(&c).ok())
                .is_none_or(|s| s.created_at < cutoff);
            if expired {
                log::info!("evicting browser session {}", path.display());
                fs::remove_file(&path)?;
                evicted += 1;
            }
        }
        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie() -> SavedCookie {
        SavedCookie {
            name: "sid".to_string(),
            value: "abc123".to_string(),
            domain: "example.org".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: true,
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        let session = SavedSession::new(vec![cookie()], vec![("k".to_string(), "v".to_string())]);

        store.save("scholar", &session).unwrap();
        let loaded = store.load("scholar").unwrap().unwrap();
        assert_eq!(loaded.cookies, vec![cookie()]);
        assert_eq!(loaded.local_storage.len(), 1);
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        assert!(store.load("nope").unwrap().is_none());
    }

    #[test]
    fn bad_session_id_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        assert!(store.load("../escape").is_err());
        assert!(store.load("").is_err());
    }

    #[test]
    fn sweep_evicts_old_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();

        let mut old = SavedSession::new(vec![], vec![]);
        old.created_at = Utc::now() - Duration::days(30);
        store.save("stale", &old).unwrap();
        store.save("fresh", &SavedSession::new(vec![], vec![])).unwrap();

        let evicted = store.sweep_expired(7).unwrap();
        assert_eq!(evicted, 1);
        assert!(store.load("stale").unwrap().is_none());
        assert!(store.load("fresh").unwrap().is_some());
    }

    #[test]
    fn sweep_evicts_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        fs::write(dir.path().join("junk.json"), "not json").unwrap();

        let evicted = store.sweep_expired(7).unwrap();
        assert_eq!(evicted, 1);
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        store.save("s1", &SavedSession::new(vec![], vec![])).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["s1.json"]);
    }
}
