use arena_data::CardId;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::{HistogramIndex, Signature};

/// Default number of ranked candidates kept per classification
pub const DEFAULT_MAX_CANDIDATES: usize = 15;

/// One ranked identity for a screen region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: CardId,
    /// Signature distance in [0, 1], lower is better
    pub distance: f64,
}

/// Ranks a cropped screen region against the signatures of a legal pool
#[derive(Debug, Clone)]
pub struct CandidateMatcher {
    index: Arc<HistogramIndex>,
    max_candidates: usize,
}

impl CandidateMatcher {
    pub fn new(index: Arc<HistogramIndex>, max_candidates: usize) -> Self {
        Self {
            index,
            max_candidates: max_candidates.max(1),
        }
    }

    pub fn index(&self) -> &Arc<HistogramIndex> {
        &self.index
    }

    /// Rank `legal` identities by distance to `region`, best first.
    ///
    /// Identities without a signature (art not downloaded yet) are skipped.
    /// The list is truncated to the configured candidate count.
    pub fn classify(&self, region: &RgbaImage, legal: &[CardId]) -> Vec<Candidate> {
        if region.width() == 0 || region.height() == 0 {
            return Vec::new();
        }

        let region_sig = Signature::from_image(region);
        let pool = self.index.snapshot(legal);
        if pool.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(&CardId, f64)> = pool
            .into_iter()
            .map(|(id, sig)| (id, region_sig.distance(&sig)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        scored.truncate(self.max_candidates);

        let ranked: Vec<Candidate> = scored
            .into_iter()
            .map(|(id, distance)| Candidate {
                id: id.clone(),
                distance,
            })
            .collect();

        if let Some(best) = ranked.first() {
            debug!(
                "classify: best {} ({:.3}) of {} legal",
                best.id,
                best.distance,
                legal.len()
            );
        }
        ranked
    }
}
