//! Card search pipeline
//!
//! Resolution order, first hit wins:
//! 1. built-in results for popular families ([`PrecomputedSet`])
//! 2. disk cache of earlier remote lookups ([`SearchCache`])
//! 3. rate-limited remote lookup ([`TcgApiClient`]), written back to the cache
//! 4. on remote failure: the cache again, then a prefix match on the local catalog
//!
//! Every result is priced before it is returned. The database lock is never
//! held across a network call.

use crate::cache::SearchCache;
use crate::database::{self, lock_db};
use crate::error::MarketResult;
use crate::precached::{PrecomputedSet, COMMON_POKEMON};
use crate::pricing;
use crate::tcg_api::{ProbeReport, TcgApiClient};
use chrono_tz::Tz;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tcg_common::{CardRecord, CardSource};

pub const MIN_QUERY_LEN: usize = 2;
pub const MAX_RESULTS: usize = 15;
const CATALOG_FALLBACK_LIMIT: usize = 20;
const AUTOCOMPLETE_CATALOG_LIMIT: usize = 10;
const MAX_SUGGESTIONS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    #[default]
    Normal,
    /// Only the built-in results and the disk cache; never the network
    CacheOnly,
}

/// Informational outcome of a search. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Found,
    QueryTooShort,
    NoResults,
    NoCachedResults,
    /// The remote lookup failed and no fallback had anything
    UpstreamUnavailable,
}

/// A search result with its current price
#[derive(Debug, Clone, Serialize)]
pub struct PricedCard {
    #[serde(flatten)]
    pub card: CardRecord,
    pub price: i64,
    /// False when the price is an estimate for a card nobody has bought yet
    pub in_catalog: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub cards: Vec<PricedCard>,
    pub from_cache: bool,
    pub api_failed: bool,
    pub status: SearchStatus,
}

impl SearchOutcome {
    fn empty(status: SearchStatus) -> Self {
        Self {
            cards: Vec::new(),
            from_cache: false,
            api_failed: false,
            status,
        }
    }
}

struct Resolution {
    cards: Vec<CardRecord>,
    from_cache: bool,
    api_failed: bool,
    /// Status to report when `cards` is empty
    miss: SearchStatus,
}

impl Resolution {
    fn cached(cards: Vec<CardRecord>) -> Self {
        Self {
            cards,
            from_cache: true,
            api_failed: false,
            miss: SearchStatus::NoResults,
        }
    }
}

pub struct SearchPipeline {
    db: Arc<Mutex<Connection>>,
    precomputed: PrecomputedSet,
    cache: SearchCache,
    api: TcgApiClient,
    timezone: Tz,
}

impl SearchPipeline {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        precomputed: PrecomputedSet,
        cache: SearchCache,
        api: TcgApiClient,
        timezone: Tz,
    ) -> Self {
        Self {
            db,
            precomputed,
            cache,
            api,
            timezone,
        }
    }

    pub async fn search(&self, query: &str, mode: SearchMode) -> MarketResult<SearchOutcome> {
        let query = normalize_query(query);
        if query.chars().count() < MIN_QUERY_LEN {
            return Ok(SearchOutcome::empty(SearchStatus::QueryTooShort));
        }

        let resolution = self.resolve(&query, mode).await;
        let status = if resolution.cards.is_empty() {
            resolution.miss
        } else {
            SearchStatus::Found
        };
        let cards = self.annotate(resolution.cards)?;

        log::debug!(
            "Search {:?} ({:?}): {} cards, status {:?}",
            query,
            mode,
            cards.len(),
            status
        );

        Ok(SearchOutcome {
            cards,
            from_cache: resolution.from_cache,
            api_failed: resolution.api_failed,
            status,
        })
    }

    async fn resolve(&self, query: &str, mode: SearchMode) -> Resolution {
        if let Some(cards) = self.precomputed.lookup(query) {
            if !cards.is_empty() {
                log::debug!("Built-in results for {:?}", query);
                return Resolution::cached(cards);
            }
        }

        if let Some(cards) = self.cache.load(query) {
            return Resolution::cached(cards);
        }

        if mode == SearchMode::CacheOnly {
            return Resolution {
                cards: Vec::new(),
                from_cache: false,
                api_failed: false,
                miss: SearchStatus::NoCachedResults,
            };
        }

        let error = match self.api.search(query).await {
            Ok(found) => {
                let mut cards = dedupe_by_name_and_set(filter_by_name_prefix(found, query));
                cards.truncate(MAX_RESULTS);
                self.cache.store(query, &cards);
                return Resolution {
                    cards,
                    from_cache: false,
                    api_failed: false,
                    miss: SearchStatus::NoResults,
                };
            }
            Err(e) => e,
        };

        log::warn!("Remote lookup for {:?} failed: {}", query, error);

        if let Some(cards) = self.cache.load(query).filter(|c| !c.is_empty()) {
            return Resolution {
                api_failed: true,
                ..Resolution::cached(cards)
            };
        }

        let catalog = match self.catalog_fallback(query) {
            Ok(cards) => cards,
            Err(e) => {
                log::warn!("Catalog fallback for {:?} failed: {}", query, e);
                Vec::new()
            }
        };
        Resolution {
            from_cache: !catalog.is_empty(),
            cards: catalog,
            api_failed: true,
            miss: SearchStatus::UpstreamUnavailable,
        }
    }

    /// Previously imported cards whose name starts with the query
    fn catalog_fallback(&self, query: &str) -> MarketResult<Vec<CardRecord>> {
        let conn = lock_db(&self.db)?;
        let records = database::search_catalog_by_prefix(&conn, query, CATALOG_FALLBACK_LIMIT)?
            .into_iter()
            .map(|card| CardRecord {
                id: card.api_card_id,
                name: card.name,
                set_name: if card.set_name.is_empty() {
                    "Unknown Set".to_string()
                } else {
                    card.set_name
                },
                release_date: None,
                image_large: card.image_url_large.or_else(|| card.image_url_small.clone()),
                image_small: card.image_url_small,
                source: CardSource::Catalog,
            })
            .collect();

        let mut cards = dedupe_by_name_and_set(records);
        cards.truncate(MAX_RESULTS);
        Ok(cards)
    }

    /// Price every result: catalog cards are refreshed, unknown cards estimated
    fn annotate(&self, records: Vec<CardRecord>) -> MarketResult<Vec<PricedCard>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let today = pricing::today_in(&self.timezone);
        let mut rng = rand::thread_rng();
        let mut conn = lock_db(&self.db)?;

        let mut priced = Vec::with_capacity(records.len());
        for card in records {
            let known = database::get_card_by_api_id(&conn, &card.id)?;
            let entry = match known {
                Some(mut definition) => {
                    let price =
                        pricing::refresh_if_stale(&mut conn, &mut definition, today, &mut rng)?;
                    PricedCard {
                        card,
                        price,
                        in_catalog: true,
                    }
                }
                None => PricedCard {
                    price: pricing::derive_base_price(&card.name, &card.set_name),
                    card,
                    in_catalog: false,
                },
            };
            priced.push(entry);
        }
        Ok(priced)
    }

    /// Name suggestions: catalog names first, then well-known families
    pub fn autocomplete(&self, query: &str) -> MarketResult<Vec<String>> {
        let query = query.trim().to_lowercase();
        if query.chars().count() < MIN_QUERY_LEN {
            return Ok(Vec::new());
        }

        let mut suggestions: Vec<String> = Vec::new();
        {
            let conn = lock_db(&self.db)?;
            for name in database::card_names_with_prefix(&conn, &query, AUTOCOMPLETE_CATALOG_LIMIT)? {
                if !suggestions.contains(&name) {
                    suggestions.push(name);
                }
            }
        }

        for name in COMMON_POKEMON {
            if suggestions.len() >= MAX_SUGGESTIONS {
                break;
            }
            if name.to_lowercase().starts_with(&query) && !suggestions.iter().any(|s| s == name) {
                suggestions.push(name.to_string());
            }
        }

        suggestions.sort_by_key(|s| {
            let lower = s.to_lowercase();
            (!lower.starts_with(&query), lower)
        });
        suggestions.truncate(MAX_SUGGESTIONS);
        Ok(suggestions)
    }

    /// Remove every cached search result
    pub fn clear_cache(&self) -> MarketResult<usize> {
        self.cache.clear()
    }

    pub async fn probe_api(&self) -> ProbeReport {
        self.api.probe().await
    }
}

/// Collapse whitespace and capitalize each word ("  pikachu   vmax" -> "Pikachu Vmax")
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Keep cards whose name starts with `query`, ignoring case
pub fn filter_by_name_prefix(cards: Vec<CardRecord>, query: &str) -> Vec<CardRecord> {
    let query = query.to_lowercase();
    cards
        .into_iter()
        .filter(|card| !card.name.is_empty() && card.name.to_lowercase().starts_with(&query))
        .collect()
}

/// One card per (name, set), at the position it was first seen.
///
/// A later duplicate replaces the kept card only if it has a thumbnail and the
/// kept card does not.
pub fn dedupe_by_name_and_set(cards: Vec<CardRecord>) -> Vec<CardRecord> {
    let mut positions: HashMap<(String, String), usize> = HashMap::new();
    let mut unique: Vec<CardRecord> = Vec::new();

    for card in cards {
        let key = (card.name.clone(), card.set_name.clone());
        match positions.get(&key) {
            Some(&index) => {
                if card.has_thumbnail() && !unique[index].has_thumbnail() {
                    unique[index] = card;
                }
            }
            None => {
                positions.insert(key, unique.len());
                unique.push(card);
            }
        }
    }
    unique
}

#[cfg(test)]
#[path = "search_tests.rs"]
mod tests;
