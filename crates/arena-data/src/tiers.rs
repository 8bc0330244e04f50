use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Source B entry: a score plus the highest-ranked card marker shipped with it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierB {
    pub score: i32,
    #[serde(rename = "maxCard", default = "no_max_card")]
    pub max_card: i32,
}

fn no_max_card() -> i32 {
    -1
}

/// Both tier tables, keyed by hero class then card code.
///
/// The tables are opaque lookups; they are loaded and refreshed by collaborators
/// and only read here.
#[derive(Debug, Clone, Default)]
pub struct TierTables {
    pub source_a: HashMap<String, HashMap<String, i32>>,
    pub source_b: HashMap<String, HashMap<String, TierB>>,
}

impl TierTables {
    /// Load `tiers_a.json` and `tiers_b.json` from the data directory.
    /// A missing file leaves that table empty.
    pub fn load(data_dir: &Path) -> Result<Self> {
        Ok(Self {
            source_a: load_table(&data_dir.join("tiers_a.json"))?,
            source_b: load_table(&data_dir.join("tiers_b.json"))?,
        })
    }

    pub fn score_a(&self, class: &str, code: &str) -> Option<i32> {
        self.source_a
            .get(&class.to_ascii_uppercase())
            .and_then(|t| t.get(code))
            .copied()
    }

    pub fn entry_b(&self, class: &str, code: &str) -> Option<TierB> {
        self.source_b
            .get(&class.to_ascii_uppercase())
            .and_then(|t| t.get(code))
            .copied()
    }

    pub fn insert_a(&mut self, class: &str, code: &str, score: i32) {
        self.source_a
            .entry(class.to_ascii_uppercase())
            .or_default()
            .insert(code.to_string(), score);
    }

    pub fn insert_b(&mut self, class: &str, code: &str, entry: TierB) {
        self.source_b
            .entry(class.to_ascii_uppercase())
            .or_default()
            .insert(code.to_string(), entry);
    }
}

fn load_table<T: for<'de> Deserialize<'de>>(
    path: &Path,
) -> Result<HashMap<String, HashMap<String, T>>> {
    if !path.exists() {
        tracing::warn!("No tier table at {}", path.display());
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let raw: HashMap<String, HashMap<String, T>> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    let table: HashMap<_, _> = raw
        .into_iter()
        .map(|(class, codes)| (class.to_ascii_uppercase(), codes))
        .collect();
    tracing::info!(
        "Loaded tier table {} ({} classes)",
        path.display(),
        table.len()
    );
    Ok(table)
}
