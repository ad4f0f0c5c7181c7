//! Database operations for the marketplace
//!
//! Uses parameterized queries exclusively (no SQL string concatenation).
//! Functions here are single statements or small lookups; the business
//! modules compose them inside one transaction per user-facing operation.

use crate::error::{MarketError, MarketResult};
use crate::models::{
    CardDefinition, CollectionItem, LineItem, Trade, TradeDetails, TradeSide, TradeStatus, User,
};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tcg_common::Condition;

/// Result type for database operations
pub type DbResult<T> = rusqlite::Result<T>;

/// How long a writer waits for another connection's transaction to finish
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) a database file and initialise the schema
pub fn open(path: &Path) -> DbResult<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    configure(&conn)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Open a private in-memory database with the full schema
pub fn open_in_memory() -> DbResult<Connection> {
    let conn = Connection::open_in_memory()?;
    configure(&conn)?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Per-connection settings. SQLite leaves foreign keys off by default.
fn configure(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

/// Initialize the database schema
///
/// Creates tables if they don't exist:
/// - `users`: participants and their balances
/// - `cards`: the local catalog with the current base price
/// - `collection_items`: owned card instances
/// - `trades`, `offered_cards`, `requested_cards`: proposals and their line items
/// - `item_reservations`: at most one pending trade per collection item
pub fn init_schema(conn: &Connection) -> DbResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE,
            email TEXT NOT NULL UNIQUE,
            balance INTEGER NOT NULL DEFAULT 1000 CHECK (balance >= 0),
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- price is NULL until the card is priced for the first time
        CREATE TABLE IF NOT EXISTS cards (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            api_card_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            set_name TEXT NOT NULL DEFAULT '',
            image_url_small TEXT,
            image_url_large TEXT,
            price INTEGER CHECK (price IS NULL OR price BETWEEN 1 AND 1000),
            last_price_update TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_cards_name ON cards(name);

        CREATE TABLE IF NOT EXISTS collection_items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id),
            card_id INTEGER NOT NULL REFERENCES cards(id),
            condition TEXT NOT NULL DEFAULT 'Near Mint',
            purchase_price INTEGER NOT NULL,
            current_price INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_collection_items_user ON collection_items(user_id);
        CREATE INDEX IF NOT EXISTS idx_collection_items_card ON collection_items(card_id);

        CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            proposer_id INTEGER NOT NULL REFERENCES users(id),
            receiver_id INTEGER NOT NULL REFERENCES users(id),
            status TEXT NOT NULL DEFAULT 'pending',
            message TEXT,
            proposer_currency INTEGER NOT NULL DEFAULT 0 CHECK (proposer_currency >= 0),
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_trades_proposer ON trades(proposer_id, status);
        CREATE INDEX IF NOT EXISTS idx_trades_receiver ON trades(receiver_id, status);

        -- Line items keep card_id and the user for audit after the item is gone
        CREATE TABLE IF NOT EXISTS offered_cards (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trade_id INTEGER NOT NULL REFERENCES trades(id),
            collection_item_id INTEGER REFERENCES collection_items(id) ON DELETE SET NULL,
            card_id INTEGER NOT NULL REFERENCES cards(id),
            offering_user_id INTEGER NOT NULL REFERENCES users(id)
        );

        CREATE TABLE IF NOT EXISTS requested_cards (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            trade_id INTEGER NOT NULL REFERENCES trades(id),
            collection_item_id INTEGER REFERENCES collection_items(id) ON DELETE SET NULL,
            card_id INTEGER NOT NULL REFERENCES cards(id),
            requesting_user_id INTEGER NOT NULL REFERENCES users(id)
        );

        CREATE INDEX IF NOT EXISTS idx_offered_cards_item ON offered_cards(collection_item_id);
        CREATE INDEX IF NOT EXISTS idx_requested_cards_item ON requested_cards(collection_item_id);

        -- One row per collection item held by a pending trade.
        -- The primary key makes a second pending reservation impossible.
        CREATE TABLE IF NOT EXISTS item_reservations (
            collection_item_id INTEGER PRIMARY KEY REFERENCES collection_items(id),
            trade_id INTEGER NOT NULL REFERENCES trades(id)
        );
        ",
    )?;

    log::info!("Database schema initialized");
    Ok(())
}

/// Lock a shared connection, surfacing poisoning as an error
pub fn lock_db(db: &Mutex<Connection>) -> MarketResult<MutexGuard<'_, Connection>> {
    db.lock().map_err(|_| MarketError::LockPoisoned)
}

/// Begin a write transaction.
///
/// Immediate behaviour takes the write lock at BEGIN, so two connections
/// cannot both pass a check and then both write.
pub fn begin(conn: &mut Connection) -> DbResult<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
}

/// True for UNIQUE / PRIMARY KEY / CHECK / FOREIGN KEY failures
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

// ── Users ──────────────────────────────────────────────────────────────────

fn user_from_row(row: &Row<'_>) -> DbResult<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        balance: row.get(3)?,
    })
}

/// Create a user with a starting balance.
///
/// Registration itself lives outside this crate; this is the storage half.
pub fn create_user(
    conn: &Connection,
    username: &str,
    email: &str,
    balance: i64,
) -> MarketResult<User> {
    let username = username.trim();
    let email = email.trim();
    if username.is_empty() || email.is_empty() {
        return Err(MarketError::Validation(
            "username and email are required".to_string(),
        ));
    }
    if balance < 0 {
        return Err(MarketError::Validation(
            "starting balance cannot be negative".to_string(),
        ));
    }

    match conn.execute(
        "INSERT INTO users (username, email, balance) VALUES (?1, ?2, ?3)",
        params![username, email, balance],
    ) {
        Ok(_) => {}
        Err(e) if is_constraint_violation(&e) => {
            return Err(MarketError::Conflict(format!(
                "username or email already registered: {}",
                username
            )))
        }
        Err(e) => return Err(e.into()),
    }

    Ok(User {
        id: conn.last_insert_rowid(),
        username: username.to_string(),
        email: email.to_string(),
        balance,
    })
}

pub fn get_user(conn: &Connection, user_id: i64) -> DbResult<Option<User>> {
    conn.query_row(
        "SELECT id, username, email, balance FROM users WHERE id = ?1",
        params![user_id],
        user_from_row,
    )
    .optional()
}

/// Like [`get_user`] but a missing user is an error
pub fn require_user(conn: &Connection, user_id: i64) -> MarketResult<User> {
    get_user(conn, user_id)?.ok_or_else(|| MarketError::NotFound(format!("user {}", user_id)))
}

/// Search users by username (case-insensitive substring), excluding one user
pub fn search_users(
    conn: &Connection,
    query: &str,
    exclude_user_id: Option<i64>,
    limit: usize,
) -> DbResult<Vec<User>> {
    let pattern = format!("%{}%", query.trim());
    let mut stmt = conn.prepare(
        "SELECT id, username, email, balance
         FROM users
         WHERE username LIKE ?1 COLLATE NOCASE
           AND (?2 IS NULL OR id <> ?2)
         ORDER BY username
         LIMIT ?3",
    )?;

    let results: DbResult<Vec<User>> = stmt
        .query_map(params![pattern, exclude_user_id, limit], user_from_row)?
        .collect();
    results
}

/// Add `delta` (may be negative) to a user's balance
pub fn adjust_balance(conn: &Connection, user_id: i64, delta: i64) -> DbResult<()> {
    conn.execute(
        "UPDATE users SET balance = balance + ?2 WHERE id = ?1",
        params![user_id, delta],
    )?;
    Ok(())
}

// ── Catalog ────────────────────────────────────────────────────────────────

const CARD_COLUMNS: &str =
    "id, api_card_id, name, set_name, image_url_small, image_url_large, price, last_price_update";

fn card_from_row(row: &Row<'_>) -> DbResult<CardDefinition> {
    Ok(CardDefinition {
        id: row.get(0)?,
        api_card_id: row.get(1)?,
        name: row.get(2)?,
        set_name: row.get(3)?,
        image_url_small: row.get(4)?,
        image_url_large: row.get(5)?,
        price: row.get(6)?,
        last_price_update: row.get(7)?,
    })
}

/// Catalog fields for a card that is not yet in the database
#[derive(Debug, Clone)]
pub struct NewCard<'a> {
    pub api_card_id: &'a str,
    pub name: &'a str,
    pub set_name: &'a str,
    pub image_url_small: Option<&'a str>,
    pub image_url_large: Option<&'a str>,
}

/// Insert an unpriced catalog entry
pub fn insert_card(conn: &Connection, card: &NewCard<'_>) -> DbResult<CardDefinition> {
    conn.execute(
        "INSERT INTO cards (api_card_id, name, set_name, image_url_small, image_url_large)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            card.api_card_id,
            card.name,
            card.set_name,
            card.image_url_small,
            card.image_url_large,
        ],
    )?;

    Ok(CardDefinition {
        id: conn.last_insert_rowid(),
        api_card_id: card.api_card_id.to_string(),
        name: card.name.to_string(),
        set_name: card.set_name.to_string(),
        image_url_small: card.image_url_small.map(str::to_string),
        image_url_large: card.image_url_large.map(str::to_string),
        price: None,
        last_price_update: None,
    })
}

pub fn get_card(conn: &Connection, card_id: i64) -> DbResult<Option<CardDefinition>> {
    conn.query_row(
        &format!("SELECT {CARD_COLUMNS} FROM cards WHERE id = ?1"),
        params![card_id],
        card_from_row,
    )
    .optional()
}

pub fn get_card_by_api_id(conn: &Connection, api_card_id: &str) -> DbResult<Option<CardDefinition>> {
    conn.query_row(
        &format!("SELECT {CARD_COLUMNS} FROM cards WHERE api_card_id = ?1"),
        params![api_card_id],
        card_from_row,
    )
    .optional()
}

/// Persist a new base price and the day it was set
pub fn update_card_price(
    conn: &Connection,
    card_id: i64,
    price: i64,
    date: NaiveDate,
) -> DbResult<()> {
    conn.execute(
        "UPDATE cards SET price = ?2, last_price_update = ?3 WHERE id = ?1",
        params![card_id, price, date],
    )?;
    Ok(())
}

/// Cards not priced on `today` (including never-priced cards)
pub fn stale_cards(conn: &Connection, today: NaiveDate) -> DbResult<Vec<CardDefinition>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {CARD_COLUMNS} FROM cards
         WHERE last_price_update IS NULL OR last_price_update <> ?1
         ORDER BY id"
    ))?;
    let results: DbResult<Vec<CardDefinition>> =
        stmt.query_map(params![today], card_from_row)?.collect();
    results
}

/// Catalog cards whose name starts with `prefix` (case-insensitive), by name
pub fn search_catalog_by_prefix(
    conn: &Connection,
    prefix: &str,
    limit: usize,
) -> DbResult<Vec<CardDefinition>> {
    let pattern = format!("{}%", escape_like(prefix));
    let mut stmt = conn.prepare(&format!(
        "SELECT {CARD_COLUMNS} FROM cards
         WHERE name LIKE ?1 ESCAPE '\\'
         ORDER BY name
         LIMIT ?2"
    ))?;
    let results: DbResult<Vec<CardDefinition>> = stmt
        .query_map(params![pattern, limit], card_from_row)?
        .collect();
    results
}

/// Distinct catalog names starting with `prefix` (case-insensitive)
pub fn card_names_with_prefix(
    conn: &Connection,
    prefix: &str,
    limit: usize,
) -> DbResult<Vec<String>> {
    let pattern = format!("{}%", escape_like(prefix));
    let mut stmt = conn.prepare(
        "SELECT DISTINCT name FROM cards
         WHERE name LIKE ?1 ESCAPE '\\'
         ORDER BY name
         LIMIT ?2",
    )?;
    let results: DbResult<Vec<String>> = stmt
        .query_map(params![pattern, limit], |row| row.get(0))?
        .collect();
    results
}

/// Escape LIKE wildcards in user input
fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

// ── Collection items ───────────────────────────────────────────────────────

const ITEM_COLUMNS: &str = "id, user_id, card_id, condition, purchase_price, current_price";

fn item_from_row(row: &Row<'_>) -> DbResult<CollectionItem> {
    let condition: String = row.get(3)?;
    let condition = Condition::parse(&condition).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown condition: {}", condition).into(),
        )
    })?;
    Ok(CollectionItem {
        id: row.get(0)?,
        user_id: row.get(1)?,
        card_id: row.get(2)?,
        condition,
        purchase_price: row.get(4)?,
        current_price: row.get(5)?,
    })
}

pub fn insert_item(
    conn: &Connection,
    user_id: i64,
    card_id: i64,
    condition: Condition,
    price: i64,
) -> DbResult<CollectionItem> {
    conn.execute(
        "INSERT INTO collection_items (user_id, card_id, condition, purchase_price, current_price)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![user_id, card_id, condition.as_str(), price],
    )?;
    Ok(CollectionItem {
        id: conn.last_insert_rowid(),
        user_id,
        card_id,
        condition,
        purchase_price: price,
        current_price: price,
    })
}

pub fn get_item(conn: &Connection, item_id: i64) -> DbResult<Option<CollectionItem>> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM collection_items WHERE id = ?1"),
        params![item_id],
        item_from_row,
    )
    .optional()
}

pub fn items_for_user(conn: &Connection, user_id: i64) -> DbResult<Vec<CollectionItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM collection_items WHERE user_id = ?1 ORDER BY id"
    ))?;
    let results: DbResult<Vec<CollectionItem>> =
        stmt.query_map(params![user_id], item_from_row)?.collect();
    results
}

pub fn items_for_card(conn: &Connection, card_id: i64) -> DbResult<Vec<CollectionItem>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM collection_items WHERE card_id = ?1 ORDER BY id"
    ))?;
    let results: DbResult<Vec<CollectionItem>> =
        stmt.query_map(params![card_id], item_from_row)?.collect();
    results
}

pub fn user_owns_card(conn: &Connection, user_id: i64, card_id: i64) -> DbResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM collection_items WHERE user_id = ?1 AND card_id = ?2",
        params![user_id, card_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn set_item_owner(conn: &Connection, item_id: i64, user_id: i64) -> DbResult<()> {
    conn.execute(
        "UPDATE collection_items SET user_id = ?2 WHERE id = ?1",
        params![item_id, user_id],
    )?;
    Ok(())
}

pub fn set_item_current_price(conn: &Connection, item_id: i64, price: i64) -> DbResult<()> {
    conn.execute(
        "UPDATE collection_items SET current_price = ?2 WHERE id = ?1",
        params![item_id, price],
    )?;
    Ok(())
}

pub fn delete_item(conn: &Connection, item_id: i64) -> DbResult<()> {
    conn.execute("DELETE FROM collection_items WHERE id = ?1", params![item_id])?;
    Ok(())
}

// ── Trades ─────────────────────────────────────────────────────────────────

const TRADE_COLUMNS: &str =
    "id, proposer_id, receiver_id, status, message, proposer_currency, created_at, updated_at";

fn trade_from_row(row: &Row<'_>) -> DbResult<Trade> {
    Ok(Trade {
        id: row.get(0)?,
        proposer_id: row.get(1)?,
        receiver_id: row.get(2)?,
        status: row.get(3)?,
        message: row.get(4)?,
        proposer_currency: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Insert a pending trade and return it as stored
pub fn insert_trade(
    conn: &Connection,
    proposer_id: i64,
    receiver_id: i64,
    message: Option<&str>,
    proposer_currency: i64,
) -> DbResult<Trade> {
    conn.execute(
        "INSERT INTO trades (proposer_id, receiver_id, status, message, proposer_currency)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            proposer_id,
            receiver_id,
            TradeStatus::Pending,
            message,
            proposer_currency
        ],
    )?;
    let id = conn.last_insert_rowid();
    conn.query_row(
        &format!("SELECT {TRADE_COLUMNS} FROM trades WHERE id = ?1"),
        params![id],
        trade_from_row,
    )
}

pub fn get_trade(conn: &Connection, trade_id: i64) -> DbResult<Option<Trade>> {
    conn.query_row(
        &format!("SELECT {TRADE_COLUMNS} FROM trades WHERE id = ?1"),
        params![trade_id],
        trade_from_row,
    )
    .optional()
}

pub fn set_trade_status(conn: &Connection, trade_id: i64, status: TradeStatus) -> DbResult<()> {
    conn.execute(
        "UPDATE trades
         SET status = ?2, updated_at = strftime('%Y-%m-%d %H:%M:%f', 'now')
         WHERE id = ?1",
        params![trade_id, status],
    )?;
    Ok(())
}

/// Pending trades sent by (`proposer = true`) or received by a user, newest first
pub fn pending_trades_for_user(
    conn: &Connection,
    user_id: i64,
    proposer: bool,
) -> DbResult<Vec<Trade>> {
    let column = if proposer { "proposer_id" } else { "receiver_id" };
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRADE_COLUMNS} FROM trades
         WHERE {column} = ?1 AND status = ?2
         ORDER BY created_at DESC, id DESC"
    ))?;
    let results: DbResult<Vec<Trade>> = stmt
        .query_map(params![user_id, TradeStatus::Pending], trade_from_row)?
        .collect();
    results
}

/// Record one line item for a trade
pub fn insert_line_item(
    conn: &Connection,
    trade_id: i64,
    side: TradeSide,
    item: &CollectionItem,
    user_id: i64,
) -> DbResult<()> {
    let sql = match side {
        TradeSide::Offered => {
            "INSERT INTO offered_cards (trade_id, collection_item_id, card_id, offering_user_id)
             VALUES (?1, ?2, ?3, ?4)"
        }
        TradeSide::Requested => {
            "INSERT INTO requested_cards (trade_id, collection_item_id, card_id, requesting_user_id)
             VALUES (?1, ?2, ?3, ?4)"
        }
    };
    conn.execute(sql, params![trade_id, item.id, item.card_id, user_id])?;
    Ok(())
}

pub fn line_items(conn: &Connection, trade_id: i64, side: TradeSide) -> DbResult<Vec<LineItem>> {
    let sql = match side {
        TradeSide::Offered => {
            "SELECT id, trade_id, collection_item_id, card_id, offering_user_id
             FROM offered_cards WHERE trade_id = ?1 ORDER BY id"
        }
        TradeSide::Requested => {
            "SELECT id, trade_id, collection_item_id, card_id, requesting_user_id
             FROM requested_cards WHERE trade_id = ?1 ORDER BY id"
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let results: DbResult<Vec<LineItem>> = stmt
        .query_map(params![trade_id], |row| {
            Ok(LineItem {
                id: row.get(0)?,
                trade_id: row.get(1)?,
                side,
                collection_item_id: row.get(2)?,
                card_id: row.get(3)?,
                user_id: row.get(4)?,
            })
        })?
        .collect();
    results
}

/// Trade with both line-item lists
pub fn get_trade_details(conn: &Connection, trade_id: i64) -> DbResult<Option<TradeDetails>> {
    let Some(trade) = get_trade(conn, trade_id)? else {
        return Ok(None);
    };
    let offered = line_items(conn, trade_id, TradeSide::Offered)?;
    let requested = line_items(conn, trade_id, TradeSide::Requested)?;
    Ok(Some(TradeDetails {
        trade,
        offered,
        requested,
    }))
}

/// Find a pending trade (other than `exclude_trade_id`) with a line item on `item_id`
pub fn pending_trade_for_item(
    conn: &Connection,
    item_id: i64,
    exclude_trade_id: Option<i64>,
) -> DbResult<Option<i64>> {
    conn.query_row(
        "SELECT t.id FROM offered_cards oc JOIN trades t ON t.id = oc.trade_id
         WHERE oc.collection_item_id = ?1 AND t.status = ?2 AND (?3 IS NULL OR t.id <> ?3)
         UNION
         SELECT t.id FROM requested_cards rc JOIN trades t ON t.id = rc.trade_id
         WHERE rc.collection_item_id = ?1 AND t.status = ?2 AND (?3 IS NULL OR t.id <> ?3)
         LIMIT 1",
        params![item_id, TradeStatus::Pending, exclude_trade_id],
        |row| row.get(0),
    )
    .optional()
}

/// Reserve an item for a pending trade.
///
/// Fails with `Conflict` if another trade already holds it.
pub fn reserve_item(conn: &Connection, item_id: i64, trade_id: i64) -> MarketResult<()> {
    match conn.execute(
        "INSERT INTO item_reservations (collection_item_id, trade_id) VALUES (?1, ?2)",
        params![item_id, trade_id],
    ) {
        Ok(_) => Ok(()),
        Err(e) if is_constraint_violation(&e) => Err(MarketError::Conflict(format!(
            "card {} is already part of a pending trade",
            item_id
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Drop every reservation held by a trade
pub fn release_reservations(conn: &Connection, trade_id: i64) -> DbResult<usize> {
    conn.execute(
        "DELETE FROM item_reservations WHERE trade_id = ?1",
        params![trade_id],
    )
}

/// Trade currently holding a reservation on `item_id`, if any
pub fn reservation_for_item(conn: &Connection, item_id: i64) -> DbResult<Option<i64>> {
    conn.query_row(
        "SELECT trade_id FROM item_reservations WHERE collection_item_id = ?1",
        params![item_id],
        |row| row.get(0),
    )
    .optional()
}
