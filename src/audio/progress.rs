//! Progress tracking for a single extraction.
//!
//! yt-dlp reports raw byte counts; [`ProgressMonitor`] turns them into a
//! percentage that never goes backwards and decides which events are worth a
//! chat message.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of a request as seen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Queued,
    Downloading,
    Postprocessing,
    Complete,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Queued => write!(f, "queued"),
            Phase::Downloading => write!(f, "downloading"),
            Phase::Postprocessing => write!(f, "postprocessing"),
            Phase::Complete => write!(f, "complete"),
            Phase::Failed => write!(f, "failed"),
        }
    }
}

/// A raw progress sample as reported by the extraction tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSample {
    /// Tool status string (downloading, finished, error, ...).
    pub status: String,
    pub downloaded_bytes: u64,
    /// Total size, when the tool knows or estimates it.
    pub total_bytes: Option<u64>,
}

impl ProgressSample {
    pub fn new(status: &str, downloaded_bytes: u64, total_bytes: Option<u64>) -> Self {
        Self {
            status: status.to_string(),
            downloaded_bytes,
            total_bytes,
        }
    }

    /// A sample carrying only a status.
    pub fn status(status: &str) -> Self {
        Self::new(status, 0, None)
    }

    /// Map the tool status onto a phase. Unknown statuses count as downloading.
    pub fn phase(&self) -> Phase {
        match self.status.as_str() {
            "queued" => Phase::Queued,
            "finished" | "postprocessing" => Phase::Postprocessing,
            "complete" => Phase::Complete,
            "error" | "failed" => Phase::Failed,
            _ => Phase::Downloading,
        }
    }
}

/// A normalized progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    /// Percentage in `[0, 100]`, absent when the total is unknown.
    pub percent: Option<f64>,
}

impl ProgressEvent {
    /// An event with no byte counts.
    pub fn phase_only(phase: Phase) -> Self {
        Self {
            phase,
            downloaded_bytes: 0,
            total_bytes: None,
            percent: None,
        }
    }

    /// Human-readable status line for chat replies.
    pub fn describe(&self) -> String {
        match (self.phase, self.percent) {
            (Phase::Queued, _) => "Queued, waiting for a free slot...".to_string(),
            (Phase::Downloading, Some(p)) => format!("Download progress: {:.0}%", p),
            (Phase::Downloading, None) => "Downloading...".to_string(),
            (Phase::Postprocessing, _) => "Converting to MP3...".to_string(),
            (Phase::Complete, _) => "Extraction complete.".to_string(),
            (Phase::Failed, _) => "Extraction failed.".to_string(),
        }
    }
}

/// Per-request progress state.
#[derive(Debug)]
pub struct ProgressMonitor {
    step_percent: f64,
    total: Option<u64>,
    last_percent: Option<f64>,
    last_phase: Option<Phase>,
    last_step: Option<u32>,
}

impl ProgressMonitor {
    /// Create a monitor forwarding every `step_percent` (clamped to at least 1).
    pub fn new(step_percent: f64) -> Self {
        Self {
            step_percent: step_percent.max(1.0),
            total: None,
            last_percent: None,
            last_phase: None,
            last_step: None,
        }
    }

    /// Normalize a raw sample.
    ///
    /// The first non-zero total is latched for the rest of the request. A sample
    /// without a usable total of its own produces a phase-only event.
    pub fn on_sample(&mut self, sample: &ProgressSample) -> ProgressEvent {
        let sample_total = sample.total_bytes.filter(|t| *t > 0);

        if self.total.is_none() {
            self.total = sample_total;
        }

        let percent = match (sample_total, self.total) {
            (Some(_), Some(total)) => {
                let raw = sample.downloaded_bytes as f64 * 100.0 / total as f64;
                let clamped = raw.clamp(0.0, 100.0);
                let monotonic = self.last_percent.map_or(clamped, |last| clamped.max(last));
                self.last_percent = Some(monotonic);
                Some(monotonic)
            }
            _ => None,
        };

        ProgressEvent {
            phase: sample.phase(),
            downloaded_bytes: sample.downloaded_bytes,
            total_bytes: self.total,
            percent,
        }
    }

    /// Decide whether an event deserves a reply: phase transitions and step crossings.
    pub fn should_forward(&mut self, event: &ProgressEvent) -> bool {
        let step = event.percent.map(|p| (p / self.step_percent).floor() as u32);

        if self.last_phase != Some(event.phase) {
            self.last_phase = Some(event.phase);
            if step.is_some() {
                self.last_step = step;
            }
            return true;
        }

        match (step, self.last_step) {
            (Some(current), Some(last)) if current > last => {
                self.last_step = Some(current);
                true
            }
            (Some(current), None) => {
                self.last_step = Some(current);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_is_bounded() {
        let mut monitor = ProgressMonitor::new(10.0);

        let event = monitor.on_sample(&ProgressSample::new("downloading", 50, Some(200)));
        assert_eq!(event.percent, Some(25.0));

        // Overshoot from an estimated total is clamped.
        let event = monitor.on_sample(&ProgressSample::new("downloading", 500, Some(200)));
        assert_eq!(event.percent, Some(100.0));
    }

    #[test]
    fn test_percent_is_monotonic() {
        let mut monitor = ProgressMonitor::new(10.0);
        let mut last = 0.0;

        for downloaded in [10, 40, 30, 80, 20, 100] {
            let event = monitor.on_sample(&ProgressSample::new("downloading", downloaded, Some(100)));
            let percent = event.percent.unwrap();
            assert!(percent >= last, "{percent} < {last}");
            last = percent;
        }
    }

    #[test]
    fn test_total_is_latched() {
        let mut monitor = ProgressMonitor::new(10.0);

        monitor.on_sample(&ProgressSample::new("downloading", 10, Some(100)));
        let event = monitor.on_sample(&ProgressSample::new("downloading", 50, Some(1000)));

        assert_eq!(event.total_bytes, Some(100));
        assert_eq!(event.percent, Some(50.0));
    }

    #[test]
    fn test_zero_total_is_phase_only() {
        let mut monitor = ProgressMonitor::new(10.0);

        let event = monitor.on_sample(&ProgressSample::new("downloading", 1234, Some(0)));
        assert_eq!(event.phase, Phase::Downloading);
        assert_eq!(event.percent, None);

        let event = monitor.on_sample(&ProgressSample::new("downloading", 1234, None));
        assert_eq!(event.percent, None);
    }

    #[test]
    fn test_zero_total_mid_stream_is_not_forwarded() {
        let mut monitor = ProgressMonitor::new(10.0);

        let first = monitor.on_sample(&ProgressSample::new("downloading", 10, Some(100)));
        assert!(monitor.should_forward(&first));

        let zero = monitor.on_sample(&ProgressSample::new("downloading", 20, Some(0)));
        assert_eq!(zero.percent, None);
        assert!(!monitor.should_forward(&zero));
    }

    #[test]
    fn test_forwards_on_steps_and_phase_changes() {
        let mut monitor = ProgressMonitor::new(10.0);
        let mut forwarded = Vec::new();

        for downloaded in (0..=100).step_by(2) {
            let event = monitor.on_sample(&ProgressSample::new("downloading", downloaded, Some(100)));
            if monitor.should_forward(&event) {
                forwarded.push(event.percent.unwrap() as u32);
            }
        }
        assert_eq!(forwarded, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);

        let post = monitor.on_sample(&ProgressSample::status("postprocessing"));
        assert!(monitor.should_forward(&post));
        let again = monitor.on_sample(&ProgressSample::status("postprocessing"));
        assert!(!monitor.should_forward(&again));
    }

    #[test]
    fn test_describe() {
        let event = ProgressEvent {
            phase: Phase::Downloading,
            downloaded_bytes: 40,
            total_bytes: Some(100),
            percent: Some(40.0),
        };
        assert_eq!(event.describe(), "Download progress: 40%");
        assert_eq!(
            ProgressEvent::phase_only(Phase::Postprocessing).describe(),
            "Converting to MP3..."
        );
    }
}
