use arena_data::CardId;
use arena_vision::Candidate;
use std::collections::HashMap;

use crate::DetectionConfig;

/// What one ingested iteration did to a slot
#[derive(Debug, Clone, PartialEq)]
pub enum SlotOutcome {
    Pending,
    Detected(Candidate),
    /// Crossed the stall window without a detection; reported once per cycle
    Stalled,
    /// The slot was already detected; the list was ignored
    Ignored,
}

/// Accumulated evidence for one of the three slots during one cycle
#[derive(Debug, Clone)]
pub struct SlotState {
    ranked: Vec<Candidate>,
    best: HashMap<CardId, f64>,
    threshold: f64,
    iterations: u32,
    detected: Option<Candidate>,
    stalled: bool,
}

impl SlotState {
    pub fn new(base_threshold: f64) -> Self {
        Self {
            ranked: Vec::new(),
            best: HashMap::new(),
            threshold: base_threshold,
            iterations: 0,
            detected: None,
            stalled: false,
        }
    }

    /// Ranked list of the latest iteration
    pub fn ranked(&self) -> &[Candidate] {
        &self.ranked
    }

    pub fn best_distance(&self, id: &CardId) -> Option<f64> {
        self.best.get(id).copied()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn detected(&self) -> Option<&Candidate> {
        self.detected.as_ref()
    }

    pub fn is_detected(&self) -> bool {
        self.detected.is_some()
    }

    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Lowest-distance identity seen this cycle. Ties go to the smaller identity.
    pub fn best_candidate(&self) -> Option<Candidate> {
        self.best_where(|_| true)
    }

    /// Lowest-distance identity seen this cycle among those matching `keep`
    pub fn best_where(&self, keep: impl Fn(&CardId) -> bool) -> Option<Candidate> {
        self.best
            .iter()
            .filter(|(id, _)| keep(id))
            .min_by(|a, b| a.1.total_cmp(b.1).then_with(|| a.0.cmp(b.0)))
            .map(|(id, d)| Candidate {
                id: id.clone(),
                distance: *d,
            })
    }

    /// Fold one iteration's ranked list into the slot
    pub fn ingest(&mut self, ranked: Vec<Candidate>, config: &DetectionConfig) -> SlotOutcome {
        if self.detected.is_some() {
            return SlotOutcome::Ignored;
        }

        self.iterations += 1;
        for c in &ranked {
            let entry = self.best.entry(c.id.clone()).or_insert(c.distance);
            if c.distance < *entry {
                *entry = c.distance;
            }
        }
        self.ranked = ranked;

        if self.iterations >= config.min_detect_iterations {
            if let Some(best) = self.best_candidate() {
                if best.distance <= self.threshold {
                    self.detected = Some(best.clone());
                    return SlotOutcome::Detected(best);
                }
            }
        }

        if self.iterations >= config.relax_after_iterations {
            let next = (self.threshold + config.threshold_increment).min(config.threshold_ceiling);
            if next > self.threshold {
                self.threshold = next;
            }
        }

        if !self.stalled && self.iterations >= config.stall_after_iterations {
            self.stalled = true;
            return SlotOutcome::Stalled;
        }

        SlotOutcome::Pending
    }

    /// Replace the frozen winner, used when the offer's rarity disagrees
    pub(crate) fn override_detected(&mut self, candidate: Candidate) {
        self.detected = Some(candidate);
    }
}
