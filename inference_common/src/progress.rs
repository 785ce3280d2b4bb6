//! Progress reporting for long-running video processing.

use std::fmt;
use std::time::Duration;

/// Snapshot of how far a run has come.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressInfo {
    /// Frames consumed so far.
    pub current: u64,
    /// Frame count reported by the source, `None` when unknown.
    pub total: Option<u64>,
    /// `current / total` in percent, capped at 100 since the reported count is only a hint.
    pub percentage: Option<f32>,
    pub elapsed: Duration,
}

impl ProgressInfo {
    /// `reported_total` of 0 means the source did not know its frame count.
    pub fn new(current: u64, reported_total: u64, elapsed: Duration) -> Self {
        let total = (reported_total > 0).then_some(reported_total);
        let percentage =
            total.map(|total| (current as f64 / total as f64 * 100.0).min(100.0) as f32);
        Self {
            current,
            total,
            percentage,
            elapsed,
        }
    }

    /// Average throughput so far.
    pub fn fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.current as f64 / secs
        } else {
            0.0
        }
    }
}

impl fmt::Display for ProgressInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.total, self.percentage) {
            (Some(total), Some(pct)) => write!(f, "{}/{} ({pct:.1}%)", self.current, total)?,
            _ => write!(f, "{}/?", self.current)?,
        }
        write!(f, ", {:.1} fps", self.fps())
    }
}

/// Receives a [`ProgressInfo`] after every processed frame.
///
/// Callbacks observe only; they cannot stop a run.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, info: &ProgressInfo);
}

impl<F: Fn(&ProgressInfo) + Send + Sync> ProgressCallback for F {
    fn on_progress(&self, info: &ProgressInfo) {
        self(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_total() {
        let info = ProgressInfo::new(12, 0, Duration::from_secs(1));
        assert_eq!(info.total, None);
        assert_eq!(info.percentage, None);
        assert_eq!(info.to_string(), "12/?, 12.0 fps");
    }

    #[test]
    fn test_percentage_capped_when_count_was_low() {
        let info = ProgressInfo::new(15, 10, Duration::ZERO);
        assert_eq!(info.percentage, Some(100.0));
        assert_eq!(info.fps(), 0.0);
    }

    #[test]
    fn test_percentage() {
        let info = ProgressInfo::new(5, 20, Duration::from_secs(2));
        assert_eq!(info.percentage, Some(25.0));
        assert_eq!(info.to_string(), "5/20 (25.0%), 2.5 fps");
    }
}
