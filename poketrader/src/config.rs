//! Runtime configuration shared by the binary and the web layer

use crate::admin::AdminPolicy;
use chrono_tz::Tz;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.pokemontcg.io/v2";

/// Everything the marketplace components need, assembled once at startup
#[derive(Debug, Clone)]
pub struct Config {
    pub database: PathBuf,
    pub cache_dir: PathBuf,
    pub api_base_url: String,
    pub api_key: Option<String>,
    /// Minimum spacing between remote lookups, process-wide
    pub min_api_interval: Duration,
    pub api_timeout: Duration,
    pub cache_ttl: chrono::Duration,
    /// Defines the calendar day for price refreshes
    pub timezone: Tz,
    pub admins: AdminPolicy,
    pub port: u16,
}

/// ~/.local/share/poketrader/poketrader.db
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("poketrader")
        .join("poketrader.db")
}

/// ~/.cache/poketrader/search
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("cache"))
        .join("poketrader")
        .join("search")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_db_path(),
            cache_dir: default_cache_dir(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            min_api_interval: Duration::from_millis(1000),
            api_timeout: Duration::from_secs(30),
            cache_ttl: chrono::Duration::hours(24),
            timezone: chrono_tz::UTC,
            admins: AdminPolicy::default(),
            port: 8080,
        }
    }
}
