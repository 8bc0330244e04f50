//! Headless draft state: per-slot detection, the three-slot aggregator and the
//! draft session state machine.

mod aggregator;
mod config;
mod error;
mod events;
mod session;
mod slot;

pub use aggregator::{DetectionAggregator, SLOT_COUNT};
pub use config::{CaptureTiming, DetectionConfig};
pub use error::{DraftError, Result};
pub use events::{
    DraftCandidate, DraftEffect, DraftEvent, DraftPhase, HeroOffer, PickSource, Stage,
};
pub use session::{DraftSession, SessionStatus};
pub use slot::{SlotOutcome, SlotState};
