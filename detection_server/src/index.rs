//! Persistent registry of processed runs.
//!
//! `index.json` in the processed directory is the single source of truth for
//! which videos exist and their run ids. A run becomes visible only once it is
//! committed, so half-written outputs never show up in listings.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use inference_common::error::RecordError;
use inference_common::result_record::{ResultRecord, read_json, write_json_atomic};
use serde::{Deserialize, Serialize};

pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    pub run_id: u64,
    /// File names relative to the processed directory.
    pub video_file: String,
    pub results_file: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    #[serde(default = "first_run_id")]
    next_run_id: u64,
    #[serde(default)]
    runs: Vec<RunEntry>,
}

fn first_run_id() -> u64 {
    1
}

impl Default for IndexFile {
    fn default() -> Self {
        Self {
            next_run_id: first_run_id(),
            runs: Vec::new(),
        }
    }
}

pub struct VideoIndex {
    dir: PathBuf,
    path: PathBuf,
    state: Mutex<IndexFile>,
}

impl VideoIndex {
    /// Loads `dir/index.json`, starting empty if it does not exist yet.
    pub fn open(dir: &Path) -> Result<Self, RecordError> {
        let path = dir.join(INDEX_FILE);
        let state = if path.exists() {
            read_json(&path)?
        } else {
            IndexFile::default()
        };
        tracing::info!(
            "Opened run index {path:?}: {} runs, next id {}",
            state.runs.len(),
            state.next_run_id
        );
        Ok(Self {
            dir: dir.to_path_buf(),
            path,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, IndexFile> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserves the next run id. The counter is on disk before the id is handed out.
    pub fn allocate_run_id(&self) -> Result<u64, RecordError> {
        let mut state = self.lock();
        let run_id = state.next_run_id;
        state.next_run_id += 1;
        if let Err(e) = write_json_atomic(&self.path, &*state) {
            state.next_run_id = run_id;
            return Err(e);
        }
        Ok(run_id)
    }

    /// Publishes a finished run.
    pub fn commit(&self, entry: RunEntry) -> Result<(), RecordError> {
        let mut state = self.lock();
        tracing::info!("Committing run {} ({})", entry.run_id, entry.video_file);
        state.runs.push(entry);
        if let Err(e) = write_json_atomic(&self.path, &*state) {
            state.runs.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Committed runs, newest first.
    pub fn list(&self) -> Vec<RunEntry> {
        let mut runs = self.lock().runs.clone();
        runs.sort_by(|a, b| {
            b.completed_at
                .cmp(&a.completed_at)
                .then(b.run_id.cmp(&a.run_id))
        });
        runs
    }

    pub fn latest(&self) -> Option<RunEntry> {
        self.list().into_iter().next()
    }

    pub fn get(&self, run_id: u64) -> Option<RunEntry> {
        self.lock().runs.iter().find(|r| r.run_id == run_id).cloned()
    }

    /// The committed run that produced `video_file`, if any.
    pub fn find_by_video_file(&self, video_file: &str) -> Option<RunEntry> {
        self.lock()
            .runs
            .iter()
            .find(|r| r.video_file == video_file)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().runs.len()
    }

    pub fn video_path(&self, entry: &RunEntry) -> PathBuf {
        self.dir.join(&entry.video_file)
    }

    /// Labels from the run's result record, empty if the record is missing or broken.
    pub fn detected_labels(&self, entry: &RunEntry) -> Vec<String> {
        let path = self.dir.join(&entry.results_file);
        match ResultRecord::read(&path) {
            Ok(record) => record.detected_labels,
            Err(e) => {
                tracing::error!("Error reading results file for run {}: {e}", entry.run_id);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn entry(run_id: u64, secs: i64) -> RunEntry {
        RunEntry {
            run_id,
            video_file: format!("{run_id}_out.mp4"),
            results_file: format!("{run_id}_out_results.json"),
            completed_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[test]
    fn test_ids_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let index = VideoIndex::open(dir.path()).unwrap();
        assert_eq!(index.allocate_run_id().unwrap(), 1);
        assert_eq!(index.allocate_run_id().unwrap(), 2);
        drop(index);

        // Neither run was committed, ids are still never reused.
        let reopened = VideoIndex::open(dir.path()).unwrap();
        assert_eq!(reopened.len(), 0);
        assert_eq!(reopened.allocate_run_id().unwrap(), 3);
    }

    #[test]
    fn test_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let index = VideoIndex::open(dir.path()).unwrap();
        index.commit(entry(1, 10)).unwrap();
        index.commit(entry(3, 30)).unwrap();
        index.commit(entry(2, 30)).unwrap();

        let ids: Vec<u64> = index.list().iter().map(|r| r.run_id).collect();
        assert_eq!(ids, vec![3, 2, 1]);
        assert_eq!(index.latest().unwrap().run_id, 3);
        assert_eq!(index.get(2).unwrap(), entry(2, 30));
        assert!(index.get(9).is_none());
        assert_eq!(index.find_by_video_file("3_out.mp4").unwrap().run_id, 3);
        assert!(index.find_by_video_file(INDEX_FILE).is_none());

        let reopened = VideoIndex::open(dir.path()).unwrap();
        assert_eq!(reopened.list(), index.list());
    }

    #[test]
    fn test_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = VideoIndex::open(dir.path()).unwrap();
        assert!(index.latest().is_none());
        assert!(index.list().is_empty());
    }

    #[test]
    fn test_broken_record_reads_as_no_labels() {
        let dir = tempfile::tempdir().unwrap();
        let index = VideoIndex::open(dir.path()).unwrap();
        let run = entry(1, 0);
        index.commit(run.clone()).unwrap();
        assert!(index.detected_labels(&run).is_empty());

        std::fs::write(dir.path().join(&run.results_file), "{not json").unwrap();
        assert!(index.detected_labels(&run).is_empty());

        std::fs::write(
            dir.path().join(&run.results_file),
            r#"{"detected_labels": ["car"], "suggested_labels": []}"#,
        )
        .unwrap();
        assert_eq!(index.detected_labels(&run), vec!["car"]);
    }
}
