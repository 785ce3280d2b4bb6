//! Side-car record persisted next to each annotated video.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::RecordError;
use crate::label_set::LabelSet;

/// Suffix appended to the output video's file stem to name its record.
pub const RESULTS_SUFFIX: &str = "_results.json";

/// Summary of one successful processing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    /// Every distinct label the detector reported, sorted.
    #[serde(default)]
    pub detected_labels: Vec<String>,
    /// Caller-supplied labels, passed through untouched.
    #[serde(default)]
    pub suggested_labels: Vec<String>,
}

impl ResultRecord {
    pub fn new(detected: &LabelSet, suggested_labels: Option<Vec<String>>) -> Self {
        Self {
            detected_labels: detected.snapshot(),
            suggested_labels: suggested_labels.unwrap_or_default(),
        }
    }

    /// Writes the whole record in one step: either the new content lands or the old file stays.
    pub fn write_atomic(&self, path: &Path) -> Result<(), RecordError> {
        write_json_atomic(path, self)
    }

    pub fn read(path: &Path) -> Result<Self, RecordError> {
        read_json(path)
    }
}

/// `processed/7_out.mp4` -> `processed/7_out_results.json`.
pub fn results_path_for(video_path: &Path) -> PathBuf {
    let stem = video_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    video_path.with_file_name(format!("{stem}{RESULTS_SUFFIX}"))
}

/// Serializes `value` into a temp file beside `path`, then renames it over `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), RecordError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| RecordError::io(path, e))?;
    serde_json::to_writer_pretty(&mut tmp, value).map_err(|e| RecordError::json(path, e))?;
    tmp.flush().map_err(|e| RecordError::io(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| RecordError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| RecordError::io(path, e.error))?;
    log::debug!("Wrote {path:?}");
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, RecordError> {
    let file = std::fs::File::open(path).map_err(|e| RecordError::io(path, e))?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|e| RecordError::json(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_path_shares_base_name() {
        let path = results_path_for(Path::new("processed/12_out.mp4"));
        assert_eq!(path, Path::new("processed/12_out_results.json"));
    }

    #[test]
    fn test_suggested_labels_default_to_empty() {
        let record = ResultRecord::new(&LabelSet::new(), None);
        assert!(record.detected_labels.is_empty());
        assert!(record.suggested_labels.is_empty());
    }

    #[test]
    fn test_json_keys() {
        let labels: LabelSet = ["car"].into_iter().collect();
        let record = ResultRecord::new(&labels, Some(vec!["truck".into()]));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["detected_labels"][0], "car");
        assert_eq!(json["suggested_labels"][0], "truck");
    }

    #[test]
    fn test_write_twice_reads_back_equal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1_out_results.json");
        let labels: LabelSet = ["pedestrian", "car"].into_iter().collect();
        let record = ResultRecord::new(&labels, Some(vec!["car".into(), "truck".into()]));

        record.write_atomic(&path).unwrap();
        let once = ResultRecord::read(&path).unwrap();
        record.write_atomic(&path).unwrap();
        let twice = ResultRecord::read(&path).unwrap();

        assert_eq!(once, record);
        assert_eq!(twice, once);
        // no temp files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_fields_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old_results.json");
        std::fs::write(&path, r#"{"detected_labels": ["dog"]}"#).unwrap();
        let record = ResultRecord::read(&path).unwrap();
        assert_eq!(record.detected_labels, vec!["dog"]);
        assert!(record.suggested_labels.is_empty());
    }

    #[test]
    fn test_malformed_record_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad_results.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ResultRecord::read(&path),
            Err(RecordError::Json { .. })
        ));
    }
}
