use crate::CardId;

/// A draftable hero: the id used by the game log, its class name and portrait code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hero {
    pub id: &'static str,
    pub class: &'static str,
    pub portrait: &'static str,
}

impl Hero {
    pub fn portrait_id(&self) -> CardId {
        CardId::normal(self.portrait)
    }
}

pub const HEROES: &[Hero] = &[
    Hero { id: "01", class: "WARRIOR", portrait: "HERO_01" },
    Hero { id: "02", class: "SHAMAN", portrait: "HERO_02" },
    Hero { id: "03", class: "ROGUE", portrait: "HERO_03" },
    Hero { id: "04", class: "PALADIN", portrait: "HERO_04" },
    Hero { id: "05", class: "HUNTER", portrait: "HERO_05" },
    Hero { id: "06", class: "DRUID", portrait: "HERO_06" },
    Hero { id: "07", class: "WARLOCK", portrait: "HERO_07" },
    Hero { id: "08", class: "MAGE", portrait: "HERO_08" },
    Hero { id: "09", class: "PRIEST", portrait: "HERO_09" },
];

/// Resolve a hero from its log id ("08"), class name ("mage") or portrait code ("HERO_08")
pub fn find_hero(key: &str) -> Option<&'static Hero> {
    let key = key.trim();
    HEROES.iter().find(|h| {
        h.id == key || h.class.eq_ignore_ascii_case(key) || h.portrait.eq_ignore_ascii_case(key)
    })
}

/// Portrait identities of every hero, used during the hero pick
pub fn hero_identities() -> Vec<CardId> {
    HEROES.iter().map(Hero::portrait_id).collect()
}
