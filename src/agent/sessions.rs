//! Persistent run transcripts
//!
//! Finished runs can be saved as pretty-printed JSON files, one per trace id,
//! and later listed, loaded or deleted.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::controller::{AgentResult, LoopStatus};

/// A saved agent run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Trace id of the run, also the file stem
    pub id: String,
    pub saved_at: DateTime<Utc>,
    /// The task that started this run
    pub task: String,
    pub model: String,
    pub provider: String,
    pub result: AgentResult,
}

impl RunRecord {
    pub fn new(
        task: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
        result: AgentResult,
    ) -> Self {
        Self {
            id: result.trace_id.clone(),
            saved_at: Utc::now(),
            task: task.into(),
            model: model.into(),
            provider: provider.into(),
            result,
        }
    }
}

/// Run storage in a directory of JSON files
pub struct RunStore {
    base_dir: PathBuf,
}

impl RunStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let base_dir = base_dir.into();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Store under ~/.taskloop/runs
    pub fn default_store() -> std::io::Result<Self> {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self::new(PathBuf::from(home).join(".taskloop").join("runs"))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Save a run, returning the file it was written to
    pub fn save(&self, record: &RunRecord) -> std::io::Result<PathBuf> {
        let path = self.run_path(&record.id);
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, json)?;
        Ok(path)
    }

    pub fn load(&self, id: &str) -> std::io::Result<RunRecord> {
        load_from_path(&self.run_path(id))
    }

    /// Summaries of all readable runs, newest first
    pub fn list(&self) -> std::io::Result<Vec<RunSummary>> {
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |e| e == "json") {
                match load_from_path(&path) {
                    Ok(record) => runs.push(RunSummary {
                        id: record.id,
                        task: truncate(&record.task, 50),
                        saved_at: record.saved_at,
                        status: record.result.status,
                        iterations: record.result.iterations,
                    }),
                    Err(e) => tracing::debug!(path = %path.display(), error = %e, "skipping unreadable run file"),
                }
            }
        }
        runs.sort_by(|a, b| b.saved_at.cmp(&a.saved_at));
        Ok(runs)
    }

    pub fn delete(&self, id: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.run_path(id))
    }

    fn run_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{id}.json"))
    }
}

fn load_from_path(path: &Path) -> std::io::Result<RunRecord> {
    let json = std::fs::read_to_string(path)?;
    serde_json::from_str(&json).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

/// Summary of a run for listing
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub id: String,
    pub task: String,
    pub saved_at: DateTime<Utc>,
    pub status: LoopStatus,
    pub iterations: usize,
}

/// Truncate to `max_chars` characters, adding an ellipsis if needed
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Message;
    use serde_json::json;

    fn result(trace_id: &str) -> AgentResult {
        AgentResult {
            trace_id: trace_id.to_string(),
            status: LoopStatus::Done,
            final_answer: Some(json!("4")),
            final_response: "4".to_string(),
            iterations: 2,
            provider_calls: 2,
            tool_calls_made: 2,
            plan: None,
            findings: vec![],
            messages: vec![Message::user("compute 2+2")],
            warnings: vec![],
            error: None,
        }
    }

    #[test]
    fn test_save_load_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path().join("runs")).unwrap();

        let record = RunRecord::new("compute 2+2", "anthropic", "model", result("run-1"));
        let path = store.save(&record).unwrap();
        assert!(path.ends_with("run-1.json"));

        let loaded = store.load("run-1").unwrap();
        assert_eq!(loaded.task, "compute 2+2");
        assert_eq!(loaded.result.final_answer, Some(json!("4")));
        assert_eq!(loaded.result.messages, record.result.messages);

        std::fs::write(dir.path().join("runs").join("junk.json"), "not json").unwrap();
        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, LoopStatus::Done);

        store.delete("run-1").unwrap();
        assert!(store.load("run-1").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("ééééééééééé", 5), "éé...");
    }
}
