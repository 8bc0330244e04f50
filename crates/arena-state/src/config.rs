use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Acceptance policy of the per-slot detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Acceptance threshold at the start of every cycle
    pub base_threshold: f64,
    /// Added to the threshold on each iteration past `relax_after_iterations`
    pub threshold_increment: f64,
    /// The threshold never relaxes beyond this
    pub threshold_ceiling: f64,
    /// Iterations a slot must receive before it can be detected
    pub min_detect_iterations: u32,
    /// Undetected iterations before the threshold starts relaxing
    pub relax_after_iterations: u32,
    /// Undetected iterations before the slot is reported stalled
    pub stall_after_iterations: u32,
    /// Ranked candidates kept per classification
    pub max_candidates: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            base_threshold: 0.35,
            threshold_increment: 0.02,
            threshold_ceiling: 0.45,
            min_detect_iterations: 1,
            relax_after_iterations: 7,
            stall_after_iterations: 15,
            max_candidates: 15,
        }
    }
}

/// Delays of the capture loop and the screen search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureTiming {
    /// Wait after the first failed screen search, covering screen transitions
    pub first_retry_ms: u64,
    /// Delay between capture ticks
    pub loop_ms: u64,
    /// Delay before the first tick after a pick, while the old cards fade out
    pub loop_after_pick_ms: u64,
    /// Wait between later failed screen searches
    pub locate_retry_ms: u64,
    /// Failed screen searches before reporting the screen as not found
    pub locate_failure_cap: u32,
}

impl Default for CaptureTiming {
    fn default() -> Self {
        Self {
            first_retry_ms: 1500,
            loop_ms: 100,
            loop_after_pick_ms: 200,
            locate_retry_ms: 1000,
            locate_failure_cap: 20,
        }
    }
}

impl CaptureTiming {
    pub fn first_retry_delay(&self) -> Duration {
        Duration::from_millis(self.first_retry_ms)
    }

    pub fn loop_delay(&self) -> Duration {
        Duration::from_millis(self.loop_ms)
    }

    pub fn after_pick_delay(&self) -> Duration {
        Duration::from_millis(self.loop_after_pick_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.locate_retry_ms)
    }
}
