//! Pixel-level recognition for the arena draft: color signatures, the
//! signature index, candidate ranking and draft-screen location.

mod candidate_matcher;
mod histogram_index;
mod screen_locator;
mod signature;

pub use candidate_matcher::{Candidate, CandidateMatcher, DEFAULT_MAX_CANDIDATES};
pub use histogram_index::{art_path, load_art, HistogramIndex};
pub use screen_locator::{LocatorConfig, ScreenGeometry, ScreenLocator, SlotLayout};
pub use signature::{Signature, HUE_BINS, SAT_BINS};
