//! Collection operations: buying, selling and removing owned cards
//!
//! Each public function is one user-facing operation and runs in a single
//! immediate transaction. Any error drops the transaction, so a failed call
//! leaves balances and ownership untouched.

use crate::database::{self, NewCard};
use crate::error::{MarketError, MarketResult};
use crate::models::{CardDefinition, CollectionItem};
use crate::pricing;
use chrono::NaiveDate;
use rand::Rng;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tcg_common::{CardRecord, Condition};

/// Identifies a card to buy by its external id, with the display fields
/// needed to add it to the catalog on first purchase
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogRef {
    pub api_card_id: String,
    pub name: String,
    #[serde(default)]
    pub set_name: String,
    #[serde(default)]
    pub image_small: Option<String>,
    #[serde(default)]
    pub image_large: Option<String>,
}

impl From<&CardRecord> for CatalogRef {
    fn from(card: &CardRecord) -> Self {
        Self {
            api_card_id: card.id.clone(),
            name: card.name.clone(),
            set_name: card.set_name.clone(),
            image_small: card.image_small.clone(),
            image_large: card.image_large.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    Purchased { item: CollectionItem, balance: i64 },
    /// The user already has this card; nothing was charged
    AlreadyOwned { card_id: i64 },
}

#[derive(Debug, Clone, Serialize)]
pub struct SaleReceipt {
    pub item_id: i64,
    pub card_id: i64,
    pub card_name: String,
    pub condition: Condition,
    pub sale_price: i64,
    pub balance: i64,
}

/// One row of a user's collection view
#[derive(Debug, Clone, Serialize)]
pub struct CollectionEntry {
    pub item: CollectionItem,
    pub card: CardDefinition,
    pub display_price: i64,
    pub base_price: i64,
    pub purchase_price: i64,
}

fn require_item(conn: &Connection, item_id: i64) -> MarketResult<CollectionItem> {
    database::get_item(conn, item_id)?
        .ok_or_else(|| MarketError::NotFound(format!("collection item {}", item_id)))
}

fn require_card(conn: &Connection, card_id: i64) -> MarketResult<CardDefinition> {
    database::get_card(conn, card_id)?
        .ok_or_else(|| MarketError::NotFound(format!("card {}", card_id)))
}

fn require_owner(item: &CollectionItem, actor_id: i64, action: &str) -> MarketResult<()> {
    if item.user_id != actor_id {
        return Err(MarketError::Authorization(format!(
            "you do not have permission to {} this card",
            action
        )));
    }
    Ok(())
}

/// Refuse to touch an item while a pending trade holds it
pub(crate) fn ensure_not_in_pending_trade(conn: &Connection, item_id: i64) -> MarketResult<()> {
    let holder = match database::reservation_for_item(conn, item_id)? {
        Some(trade_id) => Some(trade_id),
        None => database::pending_trade_for_item(conn, item_id, None)?,
    };
    match holder {
        Some(trade_id) => Err(MarketError::Conflict(format!(
            "card {} is part of pending trade {}; resolve the trade first",
            item_id, trade_id
        ))),
        None => Ok(()),
    }
}

/// Buy a card at today's condition-adjusted price.
///
/// The card is added to the catalog if this is its first purchase anywhere.
/// Owning any copy of the card already makes this a no-op.
pub fn purchase<R: Rng + ?Sized>(
    conn: &mut Connection,
    user_id: i64,
    catalog_ref: &CatalogRef,
    condition: Condition,
    today: NaiveDate,
    rng: &mut R,
) -> MarketResult<PurchaseOutcome> {
    let api_card_id = catalog_ref.api_card_id.trim();
    let name = catalog_ref.name.trim();
    if api_card_id.is_empty() || name.is_empty() {
        return Err(MarketError::Validation(
            "card id and name are required".to_string(),
        ));
    }

    let tx = database::begin(conn)?;
    let user = database::require_user(&tx, user_id)?;

    let mut card = match database::get_card_by_api_id(&tx, api_card_id)? {
        Some(card) => card,
        None => {
            log::info!("Adding {} ({}) to the catalog", name, api_card_id);
            database::insert_card(
                &tx,
                &NewCard {
                    api_card_id,
                    name,
                    set_name: catalog_ref.set_name.trim(),
                    image_url_small: catalog_ref.image_small.as_deref(),
                    image_url_large: catalog_ref.image_large.as_deref(),
                },
            )?
        }
    };

    let base_price = pricing::refresh_if_stale_tx(&tx, &mut card, today, rng)?;
    let price = pricing::condition_price(base_price, condition);

    if user.balance < price {
        return Err(MarketError::InsufficientFunds {
            needed: price,
            available: user.balance,
        });
    }

    if database::user_owns_card(&tx, user.id, card.id)? {
        log::debug!("{} already owns {}", user.username, card.name);
        return Ok(PurchaseOutcome::AlreadyOwned { card_id: card.id });
    }

    database::adjust_balance(&tx, user.id, -price)?;
    let item = database::insert_item(&tx, user.id, card.id, condition, price)?;
    tx.commit()?;

    log::info!(
        "{} bought {} ({}) for {}",
        user.username,
        card.name,
        condition.code(),
        price
    );
    Ok(PurchaseOutcome::Purchased {
        item,
        balance: user.balance - price,
    })
}

/// Sell an owned card back for half its current value (at least 1).
/// The item is deleted.
pub fn sell(conn: &mut Connection, item_id: i64, actor_id: i64) -> MarketResult<SaleReceipt> {
    let tx = database::begin(conn)?;
    let item = require_item(&tx, item_id)?;
    require_owner(&item, actor_id, "sell")?;
    ensure_not_in_pending_trade(&tx, item.id)?;

    let card = require_card(&tx, item.card_id)?;
    let current_value = if item.current_price > 0 {
        item.current_price
    } else {
        let base = card
            .price
            .unwrap_or_else(|| pricing::derive_base_price(&card.name, &card.set_name));
        pricing::condition_price(base, item.condition)
    };
    let sale_price = (current_value / 2).max(1);

    let user = database::require_user(&tx, actor_id)?;
    database::adjust_balance(&tx, actor_id, sale_price)?;
    database::delete_item(&tx, item.id)?;
    tx.commit()?;

    log::info!("{} sold {} for {}", user.username, card.name, sale_price);
    Ok(SaleReceipt {
        item_id: item.id,
        card_id: card.id,
        card_name: card.name,
        condition: item.condition,
        sale_price,
        balance: user.balance + sale_price,
    })
}

/// Delete an owned card without payment
pub fn remove(conn: &mut Connection, item_id: i64, actor_id: i64) -> MarketResult<()> {
    let tx = database::begin(conn)?;
    let item = require_item(&tx, item_id)?;
    require_owner(&item, actor_id, "remove")?;
    ensure_not_in_pending_trade(&tx, item.id)?;

    database::delete_item(&tx, item.id)?;
    tx.commit()?;

    log::info!("User {} removed collection item {}", actor_id, item.id);
    Ok(())
}

/// A user's cards with today's prices.
///
/// Every owned card is refreshed first. Items whose stored value is not
/// positive are backfilled from the card price.
pub fn collection_for_user<R: Rng + ?Sized>(
    conn: &mut Connection,
    user_id: i64,
    today: NaiveDate,
    rng: &mut R,
) -> MarketResult<Vec<CollectionEntry>> {
    let tx = database::begin(conn)?;
    database::require_user(&tx, user_id)?;

    let mut cards: HashMap<i64, CardDefinition> = HashMap::new();
    for item in database::items_for_user(&tx, user_id)? {
        if cards.contains_key(&item.card_id) {
            continue;
        }
        let mut card = require_card(&tx, item.card_id)?;
        pricing::refresh_if_stale_tx(&tx, &mut card, today, rng)?;
        cards.insert(card.id, card);
    }

    // Re-read: refreshing revalued the items
    let mut entries = Vec::new();
    for mut item in database::items_for_user(&tx, user_id)? {
        let card = match cards.get(&item.card_id) {
            Some(card) => card.clone(),
            None => require_card(&tx, item.card_id)?,
        };
        let base_price = card
            .price
            .unwrap_or_else(|| pricing::derive_base_price(&card.name, &card.set_name));

        if item.current_price <= 0 {
            item.current_price = pricing::condition_price(base_price, item.condition);
            database::set_item_current_price(&tx, item.id, item.current_price)?;
        }
        let purchase_price = if item.purchase_price > 0 {
            item.purchase_price
        } else {
            item.current_price
        };

        entries.push(CollectionEntry {
            display_price: item.current_price,
            base_price,
            purchase_price,
            item,
            card,
        });
    }

    tx.commit()?;
    Ok(entries)
}
