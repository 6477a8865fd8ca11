//! Source config store: DB canonical, JSON files derived
//!
//! One JSON document per source under the config directory
//! (`<name>.json`), mirroring the DB row. Writes are globally serialized
//! and atomic: the DB transaction commits only after the file rename
//! lands, so both sides reflect the change or neither does.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use duckdb::params;

use thoth_core::error::DiscoveryError;
use thoth_core::source_config::SourceConfig;

use crate::db::Database;

pub struct ConfigStore {
    db: Arc<Database>,
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(db: Arc<Database>, dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create config dir {}", dir.display()))?;
        Ok(Self {
            db,
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Create a new source. Fails if the name is taken.
    pub fn create(&self, config: &SourceConfig) -> Result<()> {
        config.validate().map_err(anyhow::Error::from)?;
        let _guard = self.write_lock.lock().unwrap();

        if self.get_unlocked(&config.name)?.is_some() {
            return Err(DiscoveryError::Config(format!(
                "source {:?} already exists",
                config.name
            ))
            .into());
        }
        self.write_both(config, true)
    }

    /// Update an existing source in place.
    pub fn update(&self, config: &SourceConfig) -> Result<()> {
        config.validate().map_err(anyhow::Error::from)?;
        let _guard = self.write_lock.lock().unwrap();

        if self.get_unlocked(&config.name)?.is_none() {
            return Err(DiscoveryError::Config(format!(
                "source {:?} does not exist",
                config.name
            ))
            .into());
        }
        self.write_both(config, false)
    }

    /// Insert/replace the row and rewrite the file, atomically.
    fn write_both(&self, config: &SourceConfig, _creating: bool) -> Result<()> {
        let json = serde_json::to_string_pretty(config)?;
        let path = self.file_path(&config.name);
        let tmp = path.with_extension("json.tmp");

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO source_configs
             (name, kind, is_active, adapter_params, schedule, filters,
              max_papers_per_run, fan_out)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                config.name,
                config.kind.as_str(),
                config.is_active,
                serde_json::to_string(&config.adapter_params)?,
                serde_json::to_string(&config.schedule)?,
                serde_json::to_string(&config.filters)?,
                config.max_papers_per_run.map(|n| n as i64),
                config.fan_out,
            ],
        )?;

        fs::write(&tmp, &json).with_context(|| format!("cannot write {}", tmp.display()))?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e).with_context(|| format!("cannot rename into {}", path.display()));
        }

        tx.commit()?;
        log::info!("saved source config {}", config.name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<SourceConfig>> {
        self.get_unlocked(name)
    }

    fn get_unlocked(&self, name: &str) -> Result<Option<SourceConfig>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT name, kind, is_active, adapter_params, schedule, filters,
                    max_papers_per_run, fan_out
             FROM source_configs WHERE name = ?",
        )?;
        let mut rows = stmt.query_map(params![name], row_to_config)?;
        match rows.next() {
            Some(row) => Ok(Some(row??)),
            None => Ok(None),
        }
    }

    pub fn list(&self, active_only: bool) -> Result<Vec<SourceConfig>> {
        let conn = self.db.conn();
        let sql = if active_only {
            "SELECT name, kind, is_active, adapter_params, schedule, filters,
                    max_papers_per_run, fan_out
             FROM source_configs WHERE is_active ORDER BY name"
        } else {
            "SELECT name, kind, is_active, adapter_params, schedule, filters,
                    max_papers_per_run, fan_out
             FROM source_configs ORDER BY name"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([], row_to_config)?;
        let mut configs = Vec::new();
        for row in rows {
            configs.push(row??);
        }
        Ok(configs)
    }

    /// Hard delete: row, file and schedule state all go.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap();

        let mut conn = self.db.conn();
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM source_configs WHERE name = ?", params![name])?;
        tx.execute(
            "DELETE FROM schedule_state WHERE source_name = ?",
            params![name],
        )?;

        let path = self.file_path(name);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("cannot remove {}", path.display()))?;
        }
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Startup reconciliation: import files the DB has never seen, and
    /// write out files for rows that lost theirs. DB wins on conflicts.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("reconcile: cannot read {}: {e}", path.display());
                    report.skipped += 1;
                    continue;
                }
            };
            let config: SourceConfig = match serde_json::from_str(&content) {
                Ok(c) => c,
                Err(e) => {
                    log::warn!("reconcile: bad config file {}: {e}", path.display());
                    report.skipped += 1;
                    continue;
                }
            };
            if let Err(e) = config.validate() {
                log::warn!("reconcile: invalid config {}: {e}", path.display());
                report.skipped += 1;
                continue;
            }
            if self.get_unlocked(&config.name)?.is_none() {
                log::info!("reconcile: importing {} from file", config.name);
                self.create(&config)?;
                report.imported += 1;
            }
        }

        for config in self.list(false)? {
            let path = self.file_path(&config.name);
            if !path.exists() {
                log::info!("reconcile: rewriting missing file for {}", config.name);
                let _guard = self.write_lock.lock().unwrap();
                let tmp = path.with_extension("json.tmp");
                fs::write(&tmp, serde_json::to_string_pretty(&config)?)?;
                fs::rename(&tmp, &path)?;
                report.exported += 1;
            }
        }
        Ok(report)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReconcileReport {
    pub imported: usize,
    pub exported: usize,
    pub skipped: usize,
}

type RowResult = std::result::Result<SourceConfig, serde_json::Error>;

fn row_to_config(row: &duckdb::Row<'_>) -> duckdb::Result<RowResult> {
    let name: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let is_active: bool = row.get(2)?;
    let adapter_params: String = row.get(3)?;
    let schedule: String = row.get(4)?;
    let filters: String = row.get(5)?;
    let max_papers_per_run: Option<i64> = row.get(6)?;
    let fan_out: bool = row.get(7)?;

    Ok((|| {
        Ok(SourceConfig {
            name,
            kind: serde_json::from_value(serde_json::Value::String(kind))?,
            is_active,
            adapter_params: serde_json::from_str(&adapter_params)?,
            schedule: serde_json::from_str(&schedule)?,
            filters: serde_json::from_str(&filters)?,
            max_papers_per_run: max_papers_per_run.map(|n| n.max(1) as usize),
            fan_out,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use thoth_core::paper::SourceKind;
    use thoth_core::source_config::Schedule;

    fn store(dir: &Path) -> ConfigStore {
        let db = Arc::new(Database::open_in_memory().unwrap());
        ConfigStore::new(db, dir).unwrap()
    }

    fn config(name: &str) -> SourceConfig {
        SourceConfig {
            name: name.to_string(),
            kind: SourceKind::Arxiv,
            is_active: true,
            adapter_params: json!({"categories": ["cs.LG"], "keywords": ["transformer"]}),
            schedule: Schedule {
                interval_minutes: Some(60),
                ..Schedule::default()
            },
            filters: Default::default(),
            max_papers_per_run: Some(10),
            fan_out: false,
        }
    }

    #[test]
    fn create_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        store.create(&config("arxiv_ml")).unwrap();
        let loaded = store.get("arxiv_ml").unwrap().unwrap();
        assert_eq!(loaded.name, "arxiv_ml");
        assert_eq!(loaded.kind, SourceKind::Arxiv);
        assert_eq!(loaded.max_papers_per_run, Some(10));
        assert_eq!(
            loaded.adapter_params["keywords"],
            json!(["transformer"])
        );
    }

    #[test]
    fn create_writes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.create(&config("arxiv_ml")).unwrap();

        let path = dir.path().join("arxiv_ml.json");
        assert!(path.exists());
        let on_disk: SourceConfig =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(on_disk.name, "arxiv_ml");
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.create(&config("arxiv_ml")).unwrap();
        assert!(store.create(&config("arxiv_ml")).is_err());
    }

    #[test]
    fn update_requires_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.update(&config("ghost")).is_err());

        store.create(&config("arxiv_ml")).unwrap();
        let mut updated = config("arxiv_ml");
        updated.is_active = false;
        store.update(&updated).unwrap();
        assert!(!store.get("arxiv_ml").unwrap().unwrap().is_active);
    }

    #[test]
    fn list_filters_inactive() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.create(&config("a_active")).unwrap();
        let mut inactive = config("b_inactive");
        inactive.is_active = false;
        store.create(&inactive).unwrap();

        assert_eq!(store.list(false).unwrap().len(), 2);
        let active = store.list(true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name, "a_active");
    }

    #[test]
    fn delete_removes_row_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.create(&config("arxiv_ml")).unwrap();

        assert!(store.delete("arxiv_ml").unwrap());
        assert!(store.get("arxiv_ml").unwrap().is_none());
        assert!(!dir.path().join("arxiv_ml.json").exists());
        assert!(!store.delete("arxiv_ml").unwrap());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut bad = config("bad");
        bad.schedule.interval_minutes = None;
        assert!(store.create(&bad).is_err());
    }

    #[test]
    fn reconcile_imports_unknown_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let file_config = config("from_file");
        fs::write(
            dir.path().join("from_file.json"),
            serde_json::to_string_pretty(&file_config).unwrap(),
        )
        .unwrap();

        let report = store.reconcile().unwrap();
        assert_eq!(report.imported, 1);
        assert!(store.get("from_file").unwrap().is_some());
    }

    #[test]
    fn reconcile_rewrites_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.create(&config("arxiv_ml")).unwrap();
        fs::remove_file(dir.path().join("arxiv_ml.json")).unwrap();

        let report = store.reconcile().unwrap();
        assert_eq!(report.exported, 1);
        assert!(dir.path().join("arxiv_ml.json").exists());
    }

    #[test]
    fn reconcile_skips_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        fs::write(dir.path().join("junk.json"), "not json").unwrap();

        let report = store.reconcile().unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.imported, 0);
    }
}
