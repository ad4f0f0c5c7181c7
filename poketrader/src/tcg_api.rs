//! Pokémon TCG API client for remote card searches
//!
//! Uses async reqwest. Every request passes through the shared
//! [`RateLimiter`], so concurrent searches never exceed the configured rate.

use crate::rate_limit::RateLimiter;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tcg_common::{CardRecord, CardSource, LookupError, RemoteCardPage};

const USER_AGENT: &str = "PokeTrader-Marketplace/1.0";
const PAGE_SIZE: u32 = 20;
const SELECT_FIELDS: &str = "id,name,set,images";
const ORDER_BY: &str = "-set.releaseDate";
const PROBE_QUERY: &str = "name:Pikachu*";

/// An exact-name lookup returning fewer cards than this is topped up by a prefix lookup
const MIN_EXACT_RESULTS: usize = 5;

/// Outcome of [`TcgApiClient::probe`]
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub ok: bool,
    pub elapsed_ms: u64,
    pub cards_found: usize,
    pub message: String,
}

pub struct TcgApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    limiter: Arc<RateLimiter>,
}

impl TcgApiClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
        limiter: Arc<RateLimiter>,
    ) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            limiter,
        })
    }

    fn cards_url(&self, q: &str, page_size: u32) -> String {
        format!(
            "{}/cards?q={}&pageSize={}&select={}&orderBy={}",
            self.base_url,
            urlencoding::encode(q),
            page_size,
            SELECT_FIELDS,
            ORDER_BY
        )
    }

    async fn fetch(&self, url: &str) -> Result<Vec<CardRecord>, LookupError> {
        self.limiter.acquire().await;
        log::debug!("Querying card API: {}", url);

        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header("X-Api-Key", key);
        }
        let response = request.send().await?;

        if let Some(err) = LookupError::from_status(response.status()) {
            log::debug!("Card API answered {} for {}", response.status(), url);
            return Err(err);
        }

        let body = response.text().await?;
        let page: RemoteCardPage = serde_json::from_str(&body)?;
        Ok(page.into_records(CardSource::Remote))
    }

    /// Run one structured query (`name:"X"`, `name:X*`) against `/cards`
    pub async fn query(&self, q: &str) -> Result<Vec<CardRecord>, LookupError> {
        self.fetch(&self.cards_url(q, PAGE_SIZE)).await
    }

    /// Single-card lookup used by operators to check the service is reachable
    pub async fn probe(&self) -> ProbeReport {
        let started = Instant::now();
        let result = self.fetch(&self.cards_url(PROBE_QUERY, 1)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(cards) => ProbeReport {
                ok: true,
                elapsed_ms,
                cards_found: cards.len(),
                message: "API is working".to_string(),
            },
            Err(e) => {
                log::warn!("Card API probe failed: {}", e);
                ProbeReport {
                    ok: false,
                    elapsed_ms,
                    cards_found: 0,
                    message: e.to_string(),
                }
            }
        }
    }

    /// Look up cards by name.
    ///
    /// A single alphabetic word is first tried as an exact name; when that
    /// yields fewer than five cards (or the query has several words) a prefix
    /// lookup is merged in, skipping ids already seen. A rejected query (400)
    /// counts as no results; every other failure is returned.
    pub async fn search(&self, name: &str) -> Result<Vec<CardRecord>, LookupError> {
        let mut cards = Vec::new();

        if is_single_word(name) {
            match self.query(&exact_query(name)).await {
                Ok(found) => cards = found,
                Err(e) if e.is_no_results() => {}
                Err(e) => return Err(e),
            }
        }

        if cards.len() < MIN_EXACT_RESULTS {
            match self.query(&prefix_query(name)).await {
                Ok(found) => {
                    let mut seen: HashSet<String> = cards.iter().map(|c| c.id.clone()).collect();
                    cards.extend(found.into_iter().filter(|c| seen.insert(c.id.clone())));
                }
                Err(e) if e.is_no_results() => {}
                Err(e) if !cards.is_empty() => {
                    log::warn!("Prefix lookup for {:?} failed, keeping exact matches: {}", name, e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(cards)
    }
}

fn is_single_word(name: &str) -> bool {
    !name.is_empty() && name.chars().all(char::is_alphabetic)
}

pub fn exact_query(name: &str) -> String {
    format!("name:\"{}\"", name)
}

pub fn prefix_query(name: &str) -> String {
    if name.contains(char::is_whitespace) {
        format!("name:\"{}*\"", name)
    } else {
        format!("name:{}*", name)
    }
}

#[cfg(test)]
#[path = "tcg_api_tests.rs"]
mod tests;
