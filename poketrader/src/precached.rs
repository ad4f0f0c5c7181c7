//! Built-in result lists for popular card families
//!
//! Searches for these names are answered without touching the cache or the
//! network. The lists ship with the binary in `data/precached_cards.json`.

use serde::Deserialize;
use tcg_common::{CardRecord, CardSource, RemoteCard};

const BUILTIN_JSON: &str = include_str!("../data/precached_cards.json");

/// Names offered by autocomplete even when nothing is in the catalog yet
pub const COMMON_POKEMON: &[&str] = &[
    "Pikachu", "Charizard", "Mewtwo", "Meowscarada", "Blastoise", "Venusaur", "Mew", "Lucario",
    "Garchomp", "Gengar", "Snorlax", "Dragonite", "Tyranitar", "Rayquaza", "Groudon", "Kyogre",
    "Dialga", "Palkia", "Giratina", "Arceus", "Zekrom", "Reshiram", "Kyurem", "Xerneas",
    "Yveltal", "Zygarde", "Solgaleo", "Lunala", "Necrozma", "Eternatus", "Zacian", "Zamazenta",
    "Urshifu", "Calyrex", "Koraidon", "Miraidon", "Ogerpon",
];

#[derive(Deserialize)]
struct CardFamily {
    family: String,
    cards: Vec<RemoteCard>,
}

/// Fixed mapping from lowercase family name to its result list, in file order
pub struct PrecomputedSet {
    families: Vec<(String, Vec<CardRecord>)>,
}

impl PrecomputedSet {
    /// The set compiled into the binary. A broken data file yields an empty set.
    pub fn builtin() -> Self {
        Self::from_json(BUILTIN_JSON).unwrap_or_else(|e| {
            log::error!("Failed to parse built-in card families: {}", e);
            Self {
                families: Vec::new(),
            }
        })
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let parsed: Vec<CardFamily> = serde_json::from_str(json)?;
        let families = parsed
            .into_iter()
            .map(|family| {
                let cards = family
                    .cards
                    .into_iter()
                    .filter_map(|card| card.into_record(CardSource::Precomputed))
                    .collect();
                (family.family.to_lowercase(), cards)
            })
            .collect();
        Ok(Self { families })
    }

    pub fn family_names(&self) -> impl Iterator<Item = &str> {
        self.families.iter().map(|(name, _)| name.as_str())
    }

    /// Results for a query, or `None` when no family matches.
    ///
    /// An exact family name returns the whole list. Otherwise the first family
    /// whose name is a prefix of the query (or the query a prefix of it) is
    /// filtered to cards whose name starts with the query. That filtered list
    /// may be empty.
    pub fn lookup(&self, query: &str) -> Option<Vec<CardRecord>> {
        let normalized = query.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }

        if let Some((_, cards)) = self.families.iter().find(|(name, _)| *name == normalized) {
            return Some(cards.clone());
        }

        if normalized.chars().count() < 2 {
            return None;
        }

        let (_, cards) = self
            .families
            .iter()
            .find(|(name, _)| normalized.starts_with(name.as_str()) || name.starts_with(&normalized))?;

        Some(
            cards
                .iter()
                .filter(|card| card.name.to_lowercase().starts_with(&normalized))
                .cloned()
                .collect(),
        )
    }
}
