use arena_advisor::{CardRating, DeckAverages};
use arena_data::CardId;
use arena_vision::ScreenGeometry;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sub-state of a draft phase that captures the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    ScreenSearch,
    Capturing,
    AllDetected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "stage", rename_all = "camelCase")]
pub enum DraftPhase {
    Idle,
    HeroDraft(Stage),
    CardDraft(Stage),
    Ending,
}

impl DraftPhase {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            DraftPhase::HeroDraft(s) | DraftPhase::CardDraft(s) => Some(*s),
            DraftPhase::Idle | DraftPhase::Ending => None,
        }
    }

    /// Same phase with a different stage. Idle and Ending are returned unchanged.
    pub fn with_stage(self, stage: Stage) -> Self {
        match self {
            DraftPhase::HeroDraft(_) => DraftPhase::HeroDraft(stage),
            DraftPhase::CardDraft(_) => DraftPhase::CardDraft(stage),
            other => other,
        }
    }
}

/// Where a pick report came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PickSource {
    /// The game log. Arrives late but is always right.
    #[default]
    Authoritative,
    /// A click in the UI, reported ahead of the log
    Speculative,
}

/// Final identification of one slot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftCandidate {
    pub slot: usize,
    pub id: CardId,
    /// Best signature distance observed this cycle
    pub distance: f64,
    pub rating: CardRating,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroOffer {
    pub slot: usize,
    pub code: String,
    pub class: String,
    pub distance: f64,
    pub winrate: Option<f32>,
}

/// Notifications for the presentation layer and downstream collaborators
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum DraftEvent {
    PhaseChanged {
        phase: DraftPhase,
    },
    #[serde(rename_all = "camelCase")]
    DraftStarted {
        hero: String,
        class: String,
        picked: usize,
    },
    HeroesOffered {
        heroes: Vec<HeroOffer>,
    },
    GeometryFound {
        geometry: ScreenGeometry,
    },
    ScreenNotFound,
    CandidateDetected {
        slot: usize,
        id: CardId,
        rating: f64,
    },
    #[serde(rename_all = "camelCase")]
    AllDetected {
        candidates: Vec<DraftCandidate>,
        best_index: Option<usize>,
    },
    SlotStalled {
        slot: usize,
    },
    #[serde(rename_all = "camelCase")]
    ArtRequested {
        id: CardId,
        is_hero: bool,
    },
    #[serde(rename_all = "camelCase")]
    PickCommitted {
        code: String,
        pick_number: usize,
    },
    /// The log reported a pick the UI had already committed
    PickConfirmed {
        code: String,
    },
    DeckAverages {
        averages: DeckAverages,
    },
    DraftEnded,
}

/// Work the session asks its driver to do
#[derive(Debug, Clone, PartialEq)]
pub enum DraftEffect {
    Emit(DraftEvent),
    /// Run the screen search after `delay`; deliver the result tagged with `epoch`
    StartScreenSearch { epoch: u64, delay: Duration },
    CancelScreenSearch,
    /// Fire one capture tick after `delay`, tagged with `epoch`
    ScheduleTick { epoch: u64, delay: Duration },
    CancelTick,
    /// Make sure these identities are indexed: hash cached art, request the rest
    LoadArt { ids: Vec<CardId>, is_hero: bool },
}
