//! File-backed step journal.
//!
//! Each run gets one append-only JSON-lines file `<dir>/<run_id>.jsonl`, with
//! every byte outside `[A-Za-z0-9-]` written as `_xx` hex so distinct run ids
//! never share a file. A
//! record is written and fsynced before the step result is handed back, so a
//! step that returned once is never executed again after a restart.

use async_trait::async_trait;
use loomcore::{JournalError, RunId, StepJournal, StepRecord};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub struct FileJournal {
    dir: PathBuf,
    runs: Mutex<HashMap<RunId, Vec<StepRecord>>>,
}

impl FileJournal {
    /// Open a journal directory, creating it if needed
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        tracing::debug!("Opened step journal at {}", dir.display());
        Ok(Self {
            dir,
            runs: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", file_stem(run_id)))
    }

    /// Records of a run, reading its file on first access
    async fn run_records<'a>(
        &self,
        runs: &'a mut HashMap<RunId, Vec<StepRecord>>,
        run_id: &str,
    ) -> Result<&'a mut Vec<StepRecord>, JournalError> {
        if !runs.contains_key(run_id) {
            let records = self.read_run(run_id).await?;
            runs.insert(run_id.to_string(), records);
        }
        Ok(runs.entry(run_id.to_string()).or_default())
    }

    async fn read_run(&self, run_id: &str) -> Result<Vec<StepRecord>, JournalError> {
        let path = self.path_for(run_id);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let mut records = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            match serde_json::from_str::<StepRecord>(line) {
                Ok(record) if record.run_id == run_id => records.push(record),
                Ok(record) => {
                    tracing::warn!(
                        "Ignoring record of run {} found in {}",
                        record.run_id,
                        path.display()
                    );
                }
                // A crash mid-append leaves a partial last line; that step never committed
                Err(e) if i + 1 == lines.len() => {
                    tracing::warn!("Dropping torn record at end of {}: {}", path.display(), e);
                    self.rewrite(&path, &records).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(records)
    }

    async fn rewrite(&self, path: &Path, records: &[StepRecord]) -> Result<(), JournalError> {
        let mut text = String::new();
        for record in records {
            text.push_str(&serde_json::to_string(record)?);
            text.push('\n');
        }
        tokio::fs::write(path, text).await?;
        Ok(())
    }

    async fn append(&self, record: &StepRecord) -> Result<(), JournalError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(&record.run_id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.sync_data().await?;
        Ok(())
    }
}

fn file_stem(run_id: &str) -> String {
    let mut stem = String::with_capacity(run_id.len());
    for byte in run_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' {
            stem.push(byte as char);
        } else {
            stem.push_str(&format!("_{:02x}", byte));
        }
    }
    stem
}

#[async_trait]
impl StepJournal for FileJournal {
    async fn load(&self, run_id: &str, step_name: &str) -> Result<Option<Value>, JournalError> {
        let mut runs = self.runs.lock().await;
        let records = self.run_records(&mut runs, run_id).await?;
        Ok(records
            .iter()
            .find(|r| r.step_name == step_name)
            .map(|r| r.committed_result.clone()))
    }

    async fn commit(&self, run_id: &str, step_name: &str, result: Value) -> Result<Value, JournalError> {
        let mut runs = self.runs.lock().await;
        let records = self.run_records(&mut runs, run_id).await?;
        if let Some(existing) = records.iter().find(|r| r.step_name == step_name) {
            return Ok(existing.committed_result.clone());
        }

        let record = StepRecord::new(run_id, step_name, result);
        self.append(&record).await?;
        let committed = record.committed_result.clone();
        records.push(record);
        Ok(committed)
    }

    async fn records(&self, run_id: &str) -> Result<Vec<StepRecord>, JournalError> {
        let mut runs = self.runs.lock().await;
        Ok(self.run_records(&mut runs, run_id).await?.clone())
    }
}
