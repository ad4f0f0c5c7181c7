//! PokeTrader - trading card marketplace server
//!
//! Serves the marketplace JSON API. `--refresh-prices` and `--clear-cache`
//! run one maintenance task against the same database and cache, then exit.

use chrono_tz::Tz;
use clap::Parser;
use poketrader::cache::SearchCache;
use poketrader::config::{default_cache_dir, default_db_path, Config, DEFAULT_API_BASE_URL};
use poketrader::precached::PrecomputedSet;
use poketrader::rate_limit::RateLimiter;
use poketrader::tcg_api::TcgApiClient;
use poketrader::web::{self, AppState};
use poketrader::{database, pricing, AdminPolicy, SearchPipeline};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Trading card marketplace - search, pricing, collections and trades
#[derive(Parser, Debug)]
#[command(name = "poketrader")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the SQLite database file [default: ~/.local/share/poketrader/poketrader.db]
    #[arg(short, long, env = "POKETRADER_DATABASE")]
    database: Option<PathBuf>,

    /// Directory for cached search results [default: ~/.cache/poketrader/search]
    #[arg(long, env = "POKETRADER_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Base URL of the Pokémon TCG API
    #[arg(long, env = "POKEMON_TCG_API_URL", default_value = DEFAULT_API_BASE_URL)]
    api_base_url: String,

    /// API key sent as X-Api-Key
    #[arg(long, env = "POKEMON_TCG_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Minimum milliseconds between two remote lookups
    #[arg(long, env = "POKETRADER_MIN_API_INTERVAL_MS", default_value_t = 1000)]
    min_api_interval_ms: u64,

    /// Remote lookup timeout in seconds
    #[arg(long, env = "POKETRADER_API_TIMEOUT_SECS", default_value_t = 30)]
    api_timeout_secs: u64,

    /// How long cached search results stay fresh
    #[arg(long, env = "POKETRADER_CACHE_TTL_HOURS", default_value_t = 24)]
    cache_ttl_hours: i64,

    /// IANA timezone whose midnight starts a new pricing day
    #[arg(long, env = "POKETRADER_TIMEZONE", default_value = "UTC")]
    timezone: String,

    /// Comma-separated usernames or emails allowed to use admin routes
    #[arg(long, env = "ADMIN_USERS", default_value = "")]
    admin_users: String,

    /// Port for the JSON API
    #[arg(short, long, env = "POKETRADER_PORT", default_value_t = 8080)]
    port: u16,

    /// Reprice every card not yet priced today, then exit
    #[arg(long, default_value_t = false, conflicts_with = "clear_cache")]
    refresh_prices: bool,

    /// Delete all cached search results, then exit
    #[arg(long, default_value_t = false)]
    clear_cache: bool,
}

impl Args {
    fn into_config(self) -> Result<Config, String> {
        let timezone: Tz = self
            .timezone
            .parse()
            .map_err(|e| format!("invalid timezone {:?}: {}", self.timezone, e))?;
        if self.cache_ttl_hours <= 0 {
            return Err("cache TTL must be at least one hour".to_string());
        }

        Ok(Config {
            database: self.database.unwrap_or_else(default_db_path),
            cache_dir: self.cache_dir.unwrap_or_else(default_cache_dir),
            api_base_url: self.api_base_url,
            api_key: self.api_key,
            min_api_interval: Duration::from_millis(self.min_api_interval_ms),
            api_timeout: Duration::from_secs(self.api_timeout_secs),
            cache_ttl: chrono::Duration::hours(self.cache_ttl_hours),
            timezone,
            admins: AdminPolicy::from_list(&self.admin_users),
            port: self.port,
        })
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let refresh_prices = args.refresh_prices;
    let clear_cache = args.clear_cache;
    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            std::process::exit(1);
        }
    };

    log::info!("Starting poketrader...");
    log::info!("Database path: {}", config.database.display());

    let cache = SearchCache::new(&config.cache_dir, config.cache_ttl);
    if clear_cache {
        match cache.clear() {
            Ok(count) => log::info!("Removed {} cached searches", count),
            Err(e) => {
                log::error!("Failed to clear search cache: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if let Some(parent) = config.database.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                log::error!("Failed to create database directory: {}", e);
                std::process::exit(1);
            }
            log::info!("Created directory: {}", parent.display());
        }
    }

    let mut conn = match database::open(&config.database) {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    if refresh_prices {
        let today = pricing::today_in(&config.timezone);
        match pricing::refresh_all_stale(&mut conn, today, &mut rand::thread_rng()) {
            Ok(count) => log::info!("Refreshed prices of {} cards", count),
            Err(e) => {
                log::error!("Price refresh failed: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if config.admins.is_empty() {
        log::warn!("No admin users configured; admin routes will refuse every request");
    }

    let limiter = Arc::new(RateLimiter::new(config.min_api_interval));
    let api = match TcgApiClient::new(
        &config.api_base_url,
        config.api_key.clone(),
        config.api_timeout,
        limiter,
    ) {
        Ok(api) => api,
        Err(e) => {
            log::error!("Failed to build card API client: {}", e);
            std::process::exit(1);
        }
    };

    let db = Arc::new(Mutex::new(conn));
    let pipeline = SearchPipeline::new(
        Arc::clone(&db),
        PrecomputedSet::builtin(),
        cache,
        api,
        config.timezone,
    );
    let state = AppState::new(db, Arc::new(pipeline), config.admins.clone(), config.timezone);

    if let Err(e) = web::serve(state, config.port).await {
        log::error!("Web server error: {}", e);
        std::process::exit(1);
    }
}
