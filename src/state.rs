//! Baselines on disk: `<state>/baseline/<subsystem>.toml`, one record per file

use reconcile::{BaselineRecord, BaselineSnapshot, BaselineStore, Error, Result, SubsystemId};
use std::fs;
use std::path::{Path, PathBuf};

use crate::atomic::write_atomic;

#[derive(Debug, Clone)]
pub struct FileBaselineStore {
    dir: PathBuf,
}

impl FileBaselineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_for(&self, id: &SubsystemId) -> PathBuf {
        self.dir.join(format!("{id}.toml"))
    }
}

fn parse_record(id: &SubsystemId, content: &str) -> std::result::Result<BaselineRecord, String> {
    let record: BaselineRecord = toml::from_str(content).map_err(|e| e.to_string())?;
    if &record.subsystem != id {
        return Err(format!("file holds the baseline of {}", record.subsystem));
    }
    Ok(record)
}

impl BaselineStore for FileBaselineStore {
    fn load(&self) -> Result<BaselineSnapshot> {
        let mut snapshot = BaselineSnapshot::new();
        if !self.dir.exists() {
            return Ok(snapshot);
        }

        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_none_or(|ext| ext != "toml") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let id = SubsystemId::from(stem);
            let content = fs::read_to_string(&path)?;
            match parse_record(&id, &content) {
                Ok(record) => snapshot.insert(record),
                Err(message) => {
                    log::warn!("baseline {} is unreadable: {message}", path.display());
                    snapshot.insert_corrupt(id, message);
                }
            }
        }
        log::debug!("Loaded baselines from {}", self.dir.display());
        Ok(snapshot)
    }

    fn write_subsystem(&self, record: &BaselineRecord) -> Result<()> {
        let content = toml::to_string(record).map_err(|e| Error::Other(e.to_string()))?;
        write_atomic(&self.file_for(&record.subsystem), &content)
    }
}
