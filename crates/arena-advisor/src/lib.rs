//! Card ratings for a draft offer, blended from two independent tier tables.
//!
//! Source A is normalized on a fixed global scale (`score / source_a_max`).
//! Source B is normalized relative to the offer: the highest score seen, taken
//! from the entries' `maxCard` markers or else from the three offered cards,
//! maps to 100.

use arena_data::TierTables;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingMethod {
    SourceA,
    SourceB,
    Combined,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    pub method: RatingMethod,
    /// Weight of source A in the combined rating; source B gets the rest
    pub weight_a: f64,
    /// Source A score that maps to a normalized 100
    pub source_a_max: f64,
    /// Scale source B relative to the offer; when off, raw scores are used as-is
    pub normalize_b: bool,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            method: RatingMethod::Combined,
            weight_a: 0.5,
            source_a_max: 100.0,
            normalize_b: true,
        }
    }
}

/// Rating of one offered card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRating {
    pub code: String,
    pub score_a: Option<i32>,
    pub score_b: Option<i32>,
    /// Highest-ranked card marker shipped with the source-B entry
    pub max_card: Option<i32>,
    pub normalized_a: f64,
    pub normalized_b: f64,
    pub combined: f64,
}

/// Ratings of the three cards of one offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRatings {
    pub ratings: [CardRating; 3],
    /// Slot holding the highest source-B score
    pub best_b_index: Option<usize>,
    /// Source-B score that maps to a normalized 100
    pub reference_b: i32,
    /// Slot with the highest combined rating
    pub best_index: Option<usize>,
}

/// Running mean quality of the drafted deck, one channel per source
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckAverages {
    pub source_a: f64,
    pub source_b: f64,
    pub cards: usize,
}

pub struct RatingEngine {
    config: RatingConfig,
    tiers: Arc<TierTables>,
    class: String,
    sum_a: f64,
    sum_b: f64,
    count: usize,
}

impl RatingEngine {
    pub fn new(config: RatingConfig, tiers: Arc<TierTables>) -> Self {
        Self {
            config,
            tiers,
            class: String::new(),
            sum_a: 0.0,
            sum_b: 0.0,
            count: 0,
        }
    }

    pub fn config(&self) -> &RatingConfig {
        &self.config
    }

    pub fn set_method(&mut self, method: RatingMethod) {
        info!("Rating method set to {:?}", method);
        self.config.method = method;
    }

    pub fn set_normalize_b(&mut self, normalize: bool) {
        self.config.normalize_b = normalize;
    }

    /// Swap in refreshed tier tables. Deck averages already accumulated are kept.
    pub fn set_tiers(&mut self, tiers: Arc<TierTables>) {
        self.tiers = tiers;
    }

    /// Start rating for a hero class, seeding the averages with an existing deck
    pub fn start_draft(&mut self, class: &str, existing_deck: &[String]) -> DeckAverages {
        self.class = class.to_ascii_uppercase();
        self.sum_a = 0.0;
        self.sum_b = 0.0;
        self.count = 0;
        for code in existing_deck {
            self.accumulate(code);
        }
        info!(
            "Rating engine ready for {} ({} existing card(s))",
            self.class, self.count
        );
        self.averages()
    }

    pub fn rate_offer(&self, codes: [&str; 3]) -> OfferRatings {
        let scores_a = codes.map(|c| self.tiers.score_a(&self.class, c));
        let entries_b = codes.map(|c| self.tiers.entry_b(&self.class, c));

        let mut best_b_index = None;
        let mut best_b = 0;
        for (i, entry) in entries_b.iter().enumerate() {
            if let Some(e) = entry {
                if e.score > best_b {
                    best_b = e.score;
                    best_b_index = Some(i);
                }
            }
        }

        // A supplied marker above the offer's best widens the reference
        let reference_b = entries_b
            .iter()
            .flatten()
            .map(|e| e.max_card)
            .filter(|m| *m >= 0)
            .fold(best_b, i32::max);

        let ratings = std::array::from_fn(|i| {
            let score_a = scores_a[i];
            let score_b = entries_b[i].map(|e| e.score);
            let normalized_a = self.normalize_a(score_a);
            let normalized_b = self.normalize_b(score_b, reference_b);
            CardRating {
                code: codes[i].to_string(),
                score_a,
                score_b,
                max_card: entries_b[i].map(|e| e.max_card).filter(|m| *m >= 0),
                normalized_a,
                normalized_b,
                combined: self.blend(normalized_a, normalized_b),
            }
        });

        let best_index = best_rated(&ratings);
        debug!(
            "Rated offer {:?}: {:.1} / {:.1} / {:.1}",
            codes, ratings[0].combined, ratings[1].combined, ratings[2].combined
        );

        OfferRatings {
            ratings,
            best_b_index,
            reference_b,
            best_index,
        }
    }

    /// Add a committed pick to the running deck averages
    pub fn record_pick(&mut self, code: &str) -> DeckAverages {
        self.accumulate(code);
        self.averages()
    }

    pub fn averages(&self) -> DeckAverages {
        if self.count == 0 {
            return DeckAverages::default();
        }
        DeckAverages {
            source_a: self.sum_a / self.count as f64,
            source_b: self.sum_b / self.count as f64,
            cards: self.count,
        }
    }

    fn accumulate(&mut self, code: &str) {
        // Unknown cards count as zero rather than being skipped
        self.sum_a += self.tiers.score_a(&self.class, code).unwrap_or(0) as f64;
        self.sum_b += self
            .tiers
            .entry_b(&self.class, code)
            .map(|e| e.score)
            .unwrap_or(0) as f64;
        self.count += 1;
    }

    fn normalize_a(&self, score: Option<i32>) -> f64 {
        match score {
            Some(s) if self.config.source_a_max > 0.0 => {
                (s as f64 / self.config.source_a_max).clamp(0.0, 1.0) * 100.0
            }
            _ => 0.0,
        }
    }

    fn normalize_b(&self, score: Option<i32>, reference: i32) -> f64 {
        match score {
            Some(s) if !self.config.normalize_b => (s as f64).clamp(0.0, 100.0),
            Some(s) if reference > 0 => s.max(0) as f64 / reference as f64 * 100.0,
            _ => 0.0,
        }
    }

    fn blend(&self, a: f64, b: f64) -> f64 {
        match self.config.method {
            RatingMethod::SourceA => a,
            RatingMethod::SourceB => b,
            RatingMethod::Combined => {
                let w = self.config.weight_a.clamp(0.0, 1.0);
                w * a + (1.0 - w) * b
            }
        }
    }
}

fn best_rated(ratings: &[CardRating; 3]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, r) in ratings.iter().enumerate() {
        if r.combined <= 0.0 {
            continue;
        }
        if best.map_or(true, |b| r.combined > ratings[b].combined) {
            best = Some(i);
        }
    }
    best
}
