use arena_data::Rarity;
use arena_vision::Candidate;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::{DraftError, Result};
use crate::{DetectionConfig, SlotOutcome, SlotState};

pub const SLOT_COUNT: usize = 3;

/// Turns noisy per-frame rankings into one stable identity per slot
#[derive(Debug, Clone)]
pub struct DetectionAggregator {
    config: DetectionConfig,
    slots: [SlotState; SLOT_COUNT],
    cycle: u64,
}

impl DetectionAggregator {
    pub fn new(config: DetectionConfig) -> Self {
        let slots = std::array::from_fn(|_| SlotState::new(config.base_threshold));
        Self {
            config,
            slots,
            cycle: 0,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    /// Start a new cycle: fresh slots at the base threshold
    pub fn reset(&mut self) {
        self.slots = std::array::from_fn(|_| SlotState::new(self.config.base_threshold));
        self.cycle += 1;
        debug!("Detection cycle {} started", self.cycle);
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn slot(&self, index: usize) -> Option<&SlotState> {
        self.slots.get(index)
    }

    pub fn slots(&self) -> &[SlotState; SLOT_COUNT] {
        &self.slots
    }

    /// Indices of slots still being sampled
    pub fn pending_slots(&self) -> Vec<usize> {
        (0..SLOT_COUNT)
            .filter(|&i| !self.slots[i].is_detected())
            .collect()
    }

    pub fn ingest(&mut self, slot: usize, ranked: Vec<Candidate>) -> Result<SlotOutcome> {
        let state = self
            .slots
            .get_mut(slot)
            .ok_or(DraftError::InvalidSlot(slot))?;
        let outcome = state.ingest(ranked, &self.config);
        match &outcome {
            SlotOutcome::Detected(c) => info!(
                "Slot {} detected {} (distance {:.3}, threshold {:.2}, iteration {})",
                slot,
                c.id,
                c.distance,
                state.threshold(),
                state.iterations()
            ),
            SlotOutcome::Stalled => info!(
                "Slot {} stalled after {} iterations (threshold {:.2})",
                slot,
                state.iterations(),
                state.threshold()
            ),
            SlotOutcome::Pending | SlotOutcome::Ignored => {}
        }
        Ok(outcome)
    }

    pub fn all_detected(&self) -> bool {
        self.slots.iter().all(SlotState::is_detected)
    }

    /// The three frozen winners, once every slot is detected
    pub fn winners(&self) -> Option<[Candidate; SLOT_COUNT]> {
        let [a, b, c] = &self.slots;
        Some([
            a.detected()?.clone(),
            b.detected()?.clone(),
            c.detected()?.clone(),
        ])
    }

    /// The three cards of one offer share a rarity. If two winners agree on a
    /// rarity and the third does not, swap the third for its best candidate of
    /// the majority rarity that is still within its threshold.
    /// Returns the slots whose winner changed.
    pub fn apply_rarity_consensus(&mut self, rarity_of: impl Fn(&str) -> Rarity) -> Vec<usize> {
        let Some(winners) = self.winners() else {
            return Vec::new();
        };

        let rarities = winners.clone().map(|c| rarity_of(&c.id.code));
        let mut votes: HashMap<Rarity, usize> = HashMap::new();
        for r in rarities.iter().filter(|r| **r != Rarity::Unknown) {
            *votes.entry(*r).or_default() += 1;
        }
        let Some((majority, _)) = votes.into_iter().find(|(_, n)| *n >= 2) else {
            return Vec::new();
        };

        let mut changed = Vec::new();
        for (i, rarity) in rarities.iter().enumerate() {
            if *rarity == Rarity::Unknown || *rarity == majority {
                continue;
            }
            let slot = &mut self.slots[i];
            let replacement = slot
                .best_where(|id| rarity_of(&id.code) == majority)
                .filter(|c| c.distance <= slot.threshold());
            if let Some(candidate) = replacement {
                info!(
                    "Slot {}: {} replaced by {} to match {:?} rarity",
                    i, winners[i].id, candidate.id, majority
                );
                slot.override_detected(candidate);
                changed.push(i);
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_data::CardId;

    fn cand(code: &str, distance: f64) -> Candidate {
        Candidate {
            id: CardId::normal(code),
            distance,
        }
    }

    /// Feed one fixed ranked list per slot until every slot settles or `max` iterations pass
    fn run(agg: &mut DetectionAggregator, lists: [Vec<Candidate>; 3], max: u32) -> [Option<u32>; 3] {
        let mut detected_at = [None; 3];
        for it in 1..=max {
            for slot in agg.pending_slots() {
                if let SlotOutcome::Detected(_) = agg.ingest(slot, lists[slot].clone()).unwrap() {
                    detected_at[slot] = Some(it);
                }
            }
            if agg.all_detected() {
                break;
            }
        }
        detected_at
    }

    #[test]
    fn test_scenario_three_regions() {
        let mut agg = DetectionAggregator::new(DetectionConfig::default());
        let lists = [
            vec![cand("X", 0.0), cand("Y", 0.6)],
            vec![cand("Y", 0.10), cand("X", 0.7)],
            vec![cand("Z", 0.50), cand("X", 0.9)],
        ];

        let mut stalled = Vec::new();
        let mut detected_at = [None; 3];
        for it in 1..=30u32 {
            for slot in agg.pending_slots() {
                match agg.ingest(slot, lists[slot].clone()).unwrap() {
                    SlotOutcome::Detected(_) => detected_at[slot] = Some(it),
                    SlotOutcome::Stalled => stalled.push((slot, it)),
                    _ => {}
                }
            }
        }

        assert_eq!(detected_at[0], Some(1));
        // 0.10 is already inside the base threshold
        assert_eq!(detected_at[1], Some(1));
        assert_eq!(detected_at[2], None);
        assert_eq!(stalled, vec![(2, 15)]);
        assert!(!agg.all_detected());
        assert!(agg.winners().is_none());
        // Ceiling holds the threshold below Z's distance
        assert!(agg.slot(2).unwrap().threshold() < 0.50);
    }

    #[test]
    fn test_all_detected_yields_winners() {
        let mut agg = DetectionAggregator::new(DetectionConfig::default());
        let at = run(
            &mut agg,
            [
                vec![cand("A", 0.1)],
                vec![cand("B", 0.2)],
                vec![cand("C", 0.3)],
            ],
            5,
        );
        assert_eq!(at, [Some(1), Some(1), Some(1)]);
        let winners = agg.winners().unwrap();
        assert_eq!(winners[2], cand("C", 0.3));
    }

    #[test]
    fn test_reset_restores_base_threshold() {
        let config = DetectionConfig::default();
        let mut agg = DetectionAggregator::new(config.clone());
        run(
            &mut agg,
            [vec![cand("A", 0.9)], vec![cand("B", 0.9)], vec![cand("C", 0.9)]],
            12,
        );
        assert!(agg.slot(0).unwrap().threshold() > config.base_threshold);

        let cycle = agg.cycle();
        agg.reset();
        assert_eq!(agg.cycle(), cycle + 1);
        for slot in agg.slots() {
            assert_eq!(slot.threshold(), config.base_threshold);
            assert_eq!(slot.iterations(), 0);
            assert!(slot.best_candidate().is_none());
        }
    }

    #[test]
    fn test_invalid_slot_rejected() {
        let mut agg = DetectionAggregator::new(DetectionConfig::default());
        assert_eq!(agg.ingest(3, Vec::new()), Err(DraftError::InvalidSlot(3)));
    }

    #[test]
    fn test_rarity_consensus_swaps_outlier() {
        let mut agg = DetectionAggregator::new(DetectionConfig::default());
        run(
            &mut agg,
            [
                vec![cand("EPIC_1", 0.1)],
                vec![cand("EPIC_2", 0.1)],
                vec![cand("COMMON_1", 0.2), cand("EPIC_3", 0.25)],
            ],
            3,
        );
        let rarity = |code: &str| {
            if code.starts_with("EPIC") {
                Rarity::Epic
            } else {
                Rarity::Common
            }
        };
        assert_eq!(agg.apply_rarity_consensus(rarity), vec![2]);
        assert_eq!(agg.winners().unwrap()[2], cand("EPIC_3", 0.25));
    }

    #[test]
    fn test_rarity_consensus_keeps_outlier_without_alternative() {
        let mut agg = DetectionAggregator::new(DetectionConfig::default());
        run(
            &mut agg,
            [
                vec![cand("EPIC_1", 0.1)],
                vec![cand("EPIC_2", 0.1)],
                vec![cand("COMMON_1", 0.2), cand("EPIC_3", 0.8)],
            ],
            3,
        );
        let rarity = |code: &str| {
            if code.starts_with("EPIC") {
                Rarity::Epic
            } else {
                Rarity::Common
            }
        };
        assert!(agg.apply_rarity_consensus(rarity).is_empty());
        assert_eq!(agg.winners().unwrap()[2], cand("COMMON_1", 0.2));
    }

    #[test]
    fn test_unknown_rarity_does_not_vote() {
        let mut agg = DetectionAggregator::new(DetectionConfig::default());
        run(
            &mut agg,
            [
                vec![cand("A", 0.1)],
                vec![cand("B", 0.1)],
                vec![cand("C", 0.1)],
            ],
            3,
        );
        assert!(agg.apply_rarity_consensus(|_| Rarity::Unknown).is_empty());
    }
}
