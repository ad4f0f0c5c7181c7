//! PokeTrader - trading card marketplace core
//!
//! Card search with layered caching, deterministic daily pricing, user
//! collections and escrowed card trades, all persisted in SQLite.

pub mod admin;
pub mod cache;
pub mod collection;
pub mod config;
pub mod database;
pub mod error;
pub mod models;
pub mod precached;
pub mod pricing;
pub mod rate_limit;
pub mod search;
pub mod tcg_api;
pub mod trade;
pub mod web;

pub use admin::AdminPolicy;
pub use config::Config;
pub use database::{init_schema, lock_db};
pub use error::{MarketError, MarketResult};
pub use models::{CardDefinition, CollectionItem, LineItem, Trade, TradeDetails, TradeSide, TradeStatus, User};
pub use search::{SearchMode, SearchOutcome, SearchPipeline, SearchStatus};
