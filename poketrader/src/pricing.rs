//! Card pricing
//!
//! Base prices are derived from a hash of the card's name and set, so they are
//! reproducible across processes without any stored seed. Prices move at most
//! once per calendar day; "today" is evaluated in the configured timezone.

use crate::database::{self, DbResult};
use crate::error::MarketResult;
use crate::models::CardDefinition;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rand::Rng;
use rusqlite::{Connection, Transaction};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tcg_common::Condition;

pub const MIN_PRICE: i64 = 1;
pub const MAX_PRICE: i64 = 1000;

/// Lazy per-card refresh moves the derived base price by up to this many percent
const DAILY_VARIATION_PERCENT: i64 = 20;

/// Batch refresh moves the current price by up to this fraction
const BATCH_FLUCTUATION: f64 = 0.15;

/// Deterministic base price in [1, 1000] for a card.
///
/// SHA-256 of `lowercase(name)|lowercase(set)` (the `|set` part only when the
/// set is known); the first 6 bytes read as a big-endian integer, mod 1000, plus 1.
pub fn derive_base_price(name: &str, set_name: &str) -> i64 {
    let mut key = if name.trim().is_empty() {
        "unknown".to_string()
    } else {
        name.to_lowercase()
    };
    if !set_name.is_empty() {
        key.push('|');
        key.push_str(&set_name.to_lowercase());
    }

    let digest = Sha256::digest(key.as_bytes());
    let prefix = digest[..6]
        .iter()
        .fold(0_u64, |acc, byte| (acc << 8) | u64::from(*byte));
    (prefix % 1000) as i64 + 1
}

/// Condition-adjusted valuation: `max(1, floor(base * multiplier))`
pub fn condition_price(base_price: i64, condition: Condition) -> i64 {
    condition.apply(base_price)
}

fn clamp_price(price: i64) -> i64 {
    price.clamp(MIN_PRICE, MAX_PRICE)
}

/// Today's date in the given timezone
pub fn today_in<Tz: TimeZone>(tz: &Tz) -> NaiveDate {
    Utc::now().with_timezone(tz).date_naive()
}

/// Refresh a card's price if it was not yet priced today, in its own transaction
pub fn refresh_if_stale<R: Rng + ?Sized>(
    conn: &mut Connection,
    card: &mut CardDefinition,
    today: NaiveDate,
    rng: &mut R,
) -> MarketResult<i64> {
    if let Some(price) = priced_today(card, today) {
        return Ok(price);
    }
    let tx = database::begin(conn)?;
    let price = refresh_if_stale_tx(&tx, card, today, rng)?;
    tx.commit()?;
    Ok(price)
}

fn priced_today(card: &CardDefinition, today: NaiveDate) -> Option<i64> {
    match (card.price, card.last_price_update) {
        (Some(price), Some(day)) if day == today => Some(price),
        _ => None,
    }
}

/// Refresh a card's price inside an existing transaction.
///
/// - Already priced today: returns the stored price, writes nothing.
/// - Never priced: the derived base price.
/// - Priced on an earlier day: the derived base price moved by a random
///   ±20%, clamped to [1, 1000]. The variation is applied to the base, not to
///   the previous price, so prices cannot drift.
///
/// Every collection item of the card gets its `current_price` recomputed from
/// the new price in the same transaction.
pub fn refresh_if_stale_tx<R: Rng + ?Sized>(
    tx: &Transaction<'_>,
    card: &mut CardDefinition,
    today: NaiveDate,
    rng: &mut R,
) -> DbResult<i64> {
    if let Some(price) = priced_today(card, today) {
        return Ok(price);
    }

    let base = derive_base_price(&card.name, &card.set_name);
    let new_price = match card.price {
        None => base,
        Some(_) => {
            let variation = rng.gen_range(-DAILY_VARIATION_PERCENT..=DAILY_VARIATION_PERCENT);
            base * (100 + variation) / 100
        }
    };
    let new_price = clamp_price(new_price);

    database::update_card_price(tx, card.id, new_price, today)?;
    let revalued = revalue_items(tx, card.id, new_price)?;

    log::debug!(
        "Refreshed price for {} ({}): {:?} -> {} ({} items revalued)",
        card.name,
        card.api_card_id,
        card.price,
        new_price,
        revalued
    );

    card.price = Some(new_price);
    card.last_price_update = Some(today);
    Ok(new_price)
}

/// Recompute `current_price` of every item of a card from a new base price
fn revalue_items(conn: &Connection, card_id: i64, base_price: i64) -> DbResult<usize> {
    let items = database::items_for_card(conn, card_id)?;
    for item in &items {
        database::set_item_current_price(conn, item.id, condition_price(base_price, item.condition))?;
    }
    Ok(items.len())
}

/// Batch refresh of every card not yet priced today.
///
/// Moves each card's *current* price by a uniform ±15% (a never-priced card
/// starts from its derived base price), clamps to [1, 1000] and revalues the
/// card's collection items. Returns the number of cards updated.
pub fn refresh_all_stale<R: Rng + ?Sized>(
    conn: &mut Connection,
    today: NaiveDate,
    rng: &mut R,
) -> MarketResult<usize> {
    let tx = database::begin(conn)?;
    let cards = database::stale_cards(&tx, today)?;

    for card in &cards {
        let current = card
            .price
            .unwrap_or_else(|| derive_base_price(&card.name, &card.set_name));
        let fluctuation = rng.gen_range(-BATCH_FLUCTUATION..=BATCH_FLUCTUATION);
        let new_price = clamp_price((current as f64 * (1.0 + fluctuation)) as i64);

        database::update_card_price(&tx, card.id, new_price, today)?;
        revalue_items(&tx, card.id, new_price)?;
    }

    tx.commit()?;
    log::info!("Batch price refresh updated {} cards for {}", cards.len(), today);
    Ok(cards.len())
}

/// Time left until prices roll over at the next local midnight
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Countdown {
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
    pub total_seconds: i64,
    pub formatted: String,
}

pub fn time_until_next_update<Tz: TimeZone>(now: &DateTime<Tz>) -> Countdown {
    let next_midnight = now
        .date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|naive| now.timezone().from_local_datetime(&naive).earliest());

    let total_seconds = match next_midnight {
        Some(next) => next.signed_duration_since(now).num_seconds().max(0),
        None => 24 * 3600,
    };
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    Countdown {
        hours,
        minutes,
        seconds,
        total_seconds,
        formatted: format!("{}h {}m {}s", hours, minutes, seconds),
    }
}
