use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

mod heroes;
mod tiers;

pub use heroes::{find_hero, hero_identities, Hero, HEROES};
pub use tiers::{TierB, TierTables};

/// Suffix used for premium (golden) variants in art file names and keys
pub const PREMIUM_SUFFIX: &str = "_premium";

/// Class name used for cards every hero can draft
pub const NEUTRAL_CLASS: &str = "NEUTRAL";

/// A recognisable card identity: a card code plus its visual variant.
/// Normal and premium art are tracked as separate identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CardId {
    pub code: String,
    pub premium: bool,
}

impl CardId {
    pub fn new(code: impl Into<String>, premium: bool) -> Self {
        Self {
            code: code.into(),
            premium,
        }
    }

    pub fn normal(code: impl Into<String>) -> Self {
        Self::new(code, false)
    }

    pub fn premium(code: impl Into<String>) -> Self {
        Self::new(code, true)
    }

    /// File stem of the cached art for this identity (`CODE` or `CODE_premium`)
    pub fn file_stem(&self) -> String {
        if self.premium {
            format!("{}{}", self.code, PREMIUM_SUFFIX)
        } else {
            self.code.clone()
        }
    }

    /// Inverse of [`CardId::file_stem`]
    pub fn from_file_stem(stem: &str) -> Self {
        match stem.strip_suffix(PREMIUM_SUFFIX) {
            Some(code) => Self::premium(code),
            None => Self::normal(stem),
        }
    }
}

impl fmt::Display for CardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_stem())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", from = "String")]
pub enum Rarity {
    Free,
    Common,
    Rare,
    Epic,
    Legendary,
    #[default]
    Unknown,
}

impl From<String> for Rarity {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "FREE" => Rarity::Free,
            "COMMON" => Rarity::Common,
            "RARE" => Rarity::Rare,
            "EPIC" => Rarity::Epic,
            "LEGENDARY" => Rarity::Legendary,
            _ => Rarity::Unknown,
        }
    }
}

/// Card metadata from the card catalogue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardData {
    pub code: String,
    pub name: String,
    #[serde(default = "neutral_class")]
    pub class: String,
    #[serde(default)]
    pub rarity: Rarity,
    /// Whether the card can be offered in an arena draft
    #[serde(default = "default_true")]
    pub arena: bool,
}

fn neutral_class() -> String {
    NEUTRAL_CLASS.to_string()
}

fn default_true() -> bool {
    true
}

/// Raw cards.json file format
#[derive(Debug, Deserialize)]
struct CardsFile {
    #[allow(dead_code)]
    version: Option<String>,
    cards: Vec<CardData>,
}

/// Card catalogue plus the two tier tables
#[derive(Debug, Clone, Default)]
pub struct ArenaData {
    pub cards: HashMap<String, CardData>,
    pub tiers: TierTables,
}

impl ArenaData {
    /// Load the card catalogue and tier tables from the data directory.
    /// Expects:
    ///   - data_dir/cards.json
    ///   - data_dir/tiers_a.json, data_dir/tiers_b.json (optional)
    pub fn load(data_dir: &Path) -> Result<Self> {
        let mut data = Self::default();

        let cards_path = data_dir.join("cards.json");
        if cards_path.exists() {
            let content =
                std::fs::read_to_string(&cards_path).context("Failed to read cards.json")?;
            let file: CardsFile =
                serde_json::from_str(&content).context("Failed to parse cards.json")?;
            for card in file.cards {
                data.cards.insert(card.code.clone(), card);
            }
            tracing::info!("Loaded {} cards", data.cards.len());
        } else {
            tracing::warn!("No cards.json found at {}", cards_path.display());
        }

        data.tiers = TierTables::load(data_dir)?;
        Ok(data)
    }

    pub fn with_cards(cards: impl IntoIterator<Item = CardData>) -> Self {
        Self {
            cards: cards.into_iter().map(|c| (c.code.clone(), c)).collect(),
            tiers: TierTables::default(),
        }
    }

    /// Codes a hero of `class` can be offered: its class cards plus neutrals.
    /// Sorted for deterministic iteration.
    pub fn legal_codes(&self, class: &str) -> Vec<String> {
        let mut codes: Vec<String> = self
            .cards
            .values()
            .filter(|c| c.arena)
            .filter(|c| {
                c.class.eq_ignore_ascii_case(class) || c.class.eq_ignore_ascii_case(NEUTRAL_CLASS)
            })
            .map(|c| c.code.clone())
            .collect();
        codes.sort();
        codes
    }

    /// Normal and premium identities for every legal code
    pub fn legal_identities(&self, class: &str) -> Vec<CardId> {
        expand_premium(&self.legal_codes(class))
    }

    pub fn rarity(&self, code: &str) -> Rarity {
        self.cards
            .get(code)
            .map(|c| c.rarity)
            .unwrap_or(Rarity::Unknown)
    }

    pub fn name<'a>(&'a self, code: &'a str) -> &'a str {
        self.cards.get(code).map(|c| c.name.as_str()).unwrap_or(code)
    }
}

/// Both visual variants of each code
pub fn expand_premium(codes: &[String]) -> Vec<CardId> {
    codes
        .iter()
        .flat_map(|code| [CardId::normal(code.as_str()), CardId::premium(code.as_str())])
        .collect()
}
