//! Disk cache for remote search results
//!
//! One JSON file per normalized query, named by the SHA-256 of the query.
//! Entries expire after the configured TTL. Unreadable entries are deleted and
//! reported as a miss, so a half-written file from a concurrent writer never
//! surfaces as an error.

use crate::error::MarketResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tcg_common::{CardRecord, CardSource};

#[derive(Deserialize)]
struct CacheEntry {
    timestamp: DateTime<Utc>,
    cards: Vec<CardRecord>,
}

#[derive(Serialize)]
struct CacheEntryRef<'a> {
    timestamp: DateTime<Utc>,
    cards: &'a [CardRecord],
}

/// Search result cache in a single directory
pub struct SearchCache {
    cache_dir: PathBuf,
    ttl: Duration,
}

impl SearchCache {
    /// Open the cache, creating the directory if needed
    pub fn new(cache_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        let cache_dir = cache_dir.into();
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            log::warn!("Failed to create search cache directory: {}", e);
        } else {
            log::info!("Search cache directory: {:?}", cache_dir);
        }
        Self { cache_dir, ttl }
    }

    /// Cache key for a query: hex SHA-256 of the trimmed, lowercased text
    pub fn key(query: &str) -> String {
        let normalized = query.trim().to_lowercase();
        hex::encode(Sha256::digest(normalized.as_bytes()))
    }

    fn entry_path(&self, query: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", Self::key(query)))
    }

    /// Cached results for a query, if present and younger than the TTL
    pub fn load(&self, query: &str) -> Option<Vec<CardRecord>> {
        self.load_at(query, Utc::now())
    }

    pub fn load_at(&self, query: &str, now: DateTime<Utc>) -> Option<Vec<CardRecord>> {
        let path = self.entry_path(query);
        let bytes = std::fs::read(&path).ok()?;

        let entry: CacheEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Discarding corrupt cache entry {:?}: {}", path, e);
                if let Err(e) = std::fs::remove_file(&path) {
                    log::warn!("Failed to remove corrupt cache entry {:?}: {}", path, e);
                }
                return None;
            }
        };

        let age = now.signed_duration_since(entry.timestamp);
        if age >= self.ttl || age < Duration::zero() {
            log::debug!("Cache entry for {:?} expired", query);
            return None;
        }

        log::debug!("Cache hit for {:?} ({} cards)", query, entry.cards.len());
        Some(
            entry
                .cards
                .into_iter()
                .map(|card| card.with_source(CardSource::Cache))
                .collect(),
        )
    }

    /// Write results for a query. Failures are logged, never returned.
    pub fn store(&self, query: &str, cards: &[CardRecord]) {
        self.store_at(query, cards, Utc::now());
    }

    pub fn store_at(&self, query: &str, cards: &[CardRecord], now: DateTime<Utc>) {
        let path = self.entry_path(query);
        let entry = CacheEntryRef {
            timestamp: now,
            cards,
        };
        match serde_json::to_string(&entry) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    log::warn!("Failed to cache results for {:?}: {}", query, e);
                } else {
                    log::debug!("Cached {} results for {:?}", cards.len(), query);
                }
            }
            Err(e) => log::warn!("Failed to serialize results for {:?}: {}", query, e),
        }
    }

    /// Remove every cached entry, returning how many files were deleted
    pub fn clear(&self) -> MarketResult<usize> {
        let entries = match std::fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        log::info!("Cleared {} cached searches", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn card(id: &str, name: &str) -> CardRecord {
        CardRecord {
            id: id.to_string(),
            name: name.to_string(),
            set_name: "Base".to_string(),
            release_date: Some("1999/01/09".to_string()),
            image_small: Some(format!("https://images.example/{}.png", id)),
            image_large: None,
            source: CardSource::Remote,
        }
    }

    fn cache(dir: &TempDir) -> SearchCache {
        SearchCache::new(dir.path().join("search"), Duration::hours(24))
    }

    #[test]
    fn key_normalizes_case_and_whitespace() {
        assert_eq!(SearchCache::key("  Pikachu "), SearchCache::key("pikachu"));
        assert_ne!(SearchCache::key("pikachu"), SearchCache::key("raichu"));
        assert_eq!(SearchCache::key("pikachu").len(), 64);
    }

    #[test]
    fn stored_results_read_back_unchanged() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let cards = vec![card("base1-58", "Pikachu"), card("base1-14", "Raichu")];

        cache.store("Pikachu", &cards);
        let loaded = cache.load("pikachu").unwrap();

        assert_eq!(loaded.len(), 2);
        for (loaded, original) in loaded.iter().zip(&cards) {
            assert_eq!(loaded.clone().with_source(CardSource::Remote), *original);
            assert_eq!(loaded.source, CardSource::Cache);
        }
    }

    #[test]
    fn empty_result_is_a_hit() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache.store("zzz", &[]);
        assert_eq!(cache.load("zzz"), Some(Vec::new()));
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let written = Utc::now() - Duration::hours(25);
        cache.store_at("pikachu", &[card("base1-58", "Pikachu")], written);

        assert!(cache.load("pikachu").is_none());
        assert!(cache
            .load_at("pikachu", written + Duration::hours(23))
            .is_some());
    }

    #[test]
    fn corrupt_entry_is_removed() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let path = cache.entry_path("pikachu");
        std::fs::write(&path, "{\"timestamp\": \"not a date\", \"cards\": [").unwrap();

        assert!(cache.load("pikachu").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn non_utf8_entry_is_removed() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let path = cache.entry_path("pikachu");
        std::fs::write(&path, [0xff, 0xfe, 0x00, 0x7b]).unwrap();

        assert!(cache.load("pikachu").is_none());
        assert!(!path.exists());
    }

    #[test]
    fn future_dated_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        let now = Utc::now();
        cache.store_at("pikachu", &[card("base1-58", "Pikachu")], now + Duration::hours(1));

        assert!(cache.load_at("pikachu", now).is_none());
        assert!(cache
            .load_at("pikachu", now + Duration::hours(2))
            .is_some());
    }

    #[test]
    fn missing_entry_is_a_miss() {
        let dir = TempDir::new().unwrap();
        assert!(cache(&dir).load("mewtwo").is_none());
    }

    #[test]
    fn clear_removes_all_entries() {
        let dir = TempDir::new().unwrap();
        let cache = cache(&dir);
        cache.store("pikachu", &[card("base1-58", "Pikachu")]);
        cache.store("mewtwo", &[]);

        assert_eq!(cache.clear().unwrap(), 2);
        assert!(cache.load("pikachu").is_none());
        assert_eq!(cache.clear().unwrap(), 0);
    }
}
