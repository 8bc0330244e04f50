//! JSON-lines control protocol: one command object per line on input,
//! replies and session events as JSON objects on output.

use anyhow::{Context, Result};
use arena_advisor::RatingMethod;
use arena_data::CardId;
use arena_state::PickSource;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::pipeline::{Control, Pipeline};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum Command {
    EnterArena,
    #[serde(rename_all = "camelCase")]
    BeginDraft {
        hero: String,
        #[serde(default)]
        existing_deck: Vec<String>,
    },
    PickCard {
        code: String,
        /// `speculative` for UI clicks; the game log is authoritative
        #[serde(default)]
        source: PickSource,
    },
    LeaveArena,
    EndDraft,
    Resync,
    SetCardPool {
        codes: Vec<String>,
    },
    SetHeroWinrates {
        winrates: HashMap<String, f32>,
    },
    #[serde(rename_all = "camelCase")]
    ArtDownloaded {
        code: String,
        #[serde(default)]
        premium: bool,
        #[serde(default)]
        is_hero: bool,
    },
    ArtMissing {
        code: String,
        #[serde(default)]
        premium: bool,
    },
    #[serde(rename_all = "camelCase")]
    ReloadTiers {
        #[serde(default)]
        data_dir: Option<PathBuf>,
    },
    SetRatingMethod {
        method: RatingMethod,
    },
    GetStatus,
    ListMonitors,
}

impl Command {
    /// The session input for this command, or `None` for queries answered directly
    fn into_control(self) -> Option<Control> {
        let control = match self {
            Command::EnterArena => Control::EnterArena,
            Command::BeginDraft {
                hero,
                existing_deck,
            } => Control::BeginDraft {
                hero,
                existing_deck,
            },
            Command::PickCard { code, source } => Control::PickCard { code, source },
            Command::LeaveArena => Control::LeaveArena,
            Command::EndDraft => Control::EndDraft,
            Command::Resync => Control::Resync,
            Command::SetCardPool { codes } => Control::SetCardPool { codes },
            Command::SetHeroWinrates { winrates } => Control::SetHeroWinrates { winrates },
            Command::ArtDownloaded {
                code,
                premium,
                is_hero,
            } => Control::ArtDownloaded {
                id: CardId::new(code, premium),
                is_hero,
            },
            Command::ArtMissing { code, premium } => Control::ArtMissing {
                id: CardId::new(code, premium),
            },
            Command::ReloadTiers { data_dir } => Control::ReloadTiers { data_dir },
            Command::SetRatingMethod { method } => Control::SetRatingMethod { method },
            Command::GetStatus | Command::ListMonitors => return None,
        };
        Some(control)
    }
}

/// Handle one input line. Returns a reply for queries; session inputs are
/// forwarded to the pipeline and answered through its events.
pub fn handle_line(pipeline: &Pipeline, line: &str) -> Result<Option<Value>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let command: Command =
        serde_json::from_str(line).with_context(|| format!("Invalid command: {}", line))?;

    match command {
        Command::GetStatus => {
            let status = serde_json::to_value(pipeline.status())?;
            Ok(Some(json!({ "reply": "status", "status": status })))
        }
        Command::ListMonitors => {
            let monitors = arena_capture::list_monitors()?;
            Ok(Some(json!({
                "reply": "monitors",
                "monitors": serde_json::to_value(monitors)?,
            })))
        }
        other => {
            if let Some(control) = other.into_control() {
                pipeline.send(control)?;
            }
            Ok(None)
        }
    }
}
