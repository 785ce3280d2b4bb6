use std::collections::BTreeSet;

use crate::detection::Detection;

/// Distinct detection labels seen during one processing run.
///
/// Only ever grows. A fresh, empty set is created at the start of every run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSet {
    labels: BTreeSet<String>,
}

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the label was not present before.
    pub fn insert(&mut self, label: &str) -> bool {
        if self.labels.contains(label) {
            return false;
        }
        self.labels.insert(label.to_string())
    }

    pub fn extend_from_detections(&mut self, detections: &[Detection]) {
        for detection in detections {
            if self.insert(&detection.label) {
                log::debug!("New label observed: {:?}", detection.label);
            }
        }
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.contains(label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Copies the labels out, in sorted order.
    pub fn snapshot(&self) -> Vec<String> {
        self.labels.iter().cloned().collect()
    }
}

impl<S: AsRef<str>> FromIterator<S> for LabelSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut set = LabelSet::new();
        for label in iter {
            set.insert(label.as_ref());
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::Bbox;

    fn det(label: &str) -> Detection {
        Detection::new(label, Bbox::new(0.0, 0.0, 1.0, 1.0), 0.5)
    }

    #[test]
    fn test_duplicates_collapse() {
        let mut labels = LabelSet::new();
        labels.extend_from_detections(&[det("car"), det("car"), det("pedestrian")]);
        labels.extend_from_detections(&[det("car")]);
        assert_eq!(labels.len(), 2);
        assert_eq!(labels.snapshot(), vec!["car", "pedestrian"]);
    }

    #[test]
    fn test_insert_reports_novelty() {
        let mut labels = LabelSet::new();
        assert!(labels.insert("truck"));
        assert!(!labels.insert("truck"));
        assert!(labels.contains("truck"));
    }

    #[test]
    fn test_empty_frames_add_nothing() {
        let mut labels: LabelSet = ["dog"].into_iter().collect();
        labels.extend_from_detections(&[]);
        assert_eq!(labels.snapshot(), vec!["dog"]);
    }
}
