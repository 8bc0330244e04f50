use thiserror::Error;

use crate::DraftPhase;

/// Session inputs that were rejected. None of these abort a capture cycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DraftError {
    #[error("Unknown hero: {0}")]
    UnknownHero(String),

    #[error("Invalid slot index: {0}")]
    InvalidSlot(usize),

    #[error("Slot {0} has no candidate to pick")]
    SlotUndetermined(usize),

    #[error("{op} is not valid in phase {phase:?}")]
    InvalidPhase { op: &'static str, phase: DraftPhase },
}

pub type Result<T> = std::result::Result<T, DraftError>;
