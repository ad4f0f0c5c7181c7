//! Trade negotiation and settlement
//!
//! ```text
//! PENDING ──accept (receiver)──────────▶ ACCEPTED
//!    │ ────reject (receiver)──────────▶ REJECTED
//!    │ ────reject (proposer)──────────▶ CANCELLED
//!    └─────counter (receiver)─────────▶ CANCELLED + new PENDING with roles swapped
//! ```
//!
//! Proposer currency is escrowed (debited) at proposal time and either paid to
//! the receiver on accept or refunded on reject, cancel and counter.
//!
//! Every item on a pending trade holds a row in `item_reservations`. The row's
//! primary key means a second pending trade can never claim the same item,
//! even if two proposals race past the line-item scan.

use crate::database::{self, DbResult};
use crate::error::{MarketError, MarketResult};
use crate::models::{CollectionItem, LineItem, Trade, TradeDetails, TradeSide, TradeStatus};
use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Cards and currency put forward in a proposal or counter-offer
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TradeOffer {
    /// Items owned by the proposer
    pub offered_item_ids: Vec<i64>,
    /// Items owned by the receiver
    pub requested_item_ids: Vec<i64>,
    /// Escrowed from the proposer
    #[serde(default)]
    pub currency: i64,
    #[serde(default)]
    pub message: Option<String>,
}

/// A user's open trades, newest first
#[derive(Debug, Clone, Serialize)]
pub struct TradeInbox {
    pub sent: Vec<TradeDetails>,
    pub received: Vec<TradeDetails>,
}

fn require_trade(conn: &Connection, trade_id: i64) -> MarketResult<TradeDetails> {
    database::get_trade_details(conn, trade_id)?
        .ok_or_else(|| MarketError::NotFound(format!("trade {}", trade_id)))
}

fn require_pending(trade: &Trade) -> MarketResult<()> {
    if trade.status != TradeStatus::Pending {
        return Err(MarketError::Conflict(format!(
            "trade {} is no longer pending ({})",
            trade.id, trade.status
        )));
    }
    Ok(())
}

/// Resolve ids to items owned by `owner_id`.
///
/// Unknown ids, foreign items and duplicates all make the resolved count
/// differ from the requested count, which rejects the whole list.
fn resolve_owned_items(
    conn: &Connection,
    ids: &[i64],
    owner_id: i64,
    side: TradeSide,
) -> MarketResult<Vec<CollectionItem>> {
    let mut seen = HashSet::new();
    let mut items = Vec::with_capacity(ids.len());
    for &id in ids {
        if !seen.insert(id) {
            continue;
        }
        if let Some(item) = database::get_item(conn, id)? {
            if item.user_id == owner_id {
                items.push(item);
            }
        }
    }

    if items.len() != ids.len() {
        let what = match side {
            TradeSide::Offered => "offering",
            TradeSide::Requested => "requesting",
        };
        return Err(MarketError::Validation(format!(
            "invalid cards selected for {}",
            what
        )));
    }
    Ok(items)
}

/// Conflict if any item already sits on a pending trade other than `own_trade`
fn ensure_unreserved(
    conn: &Connection,
    items: &[CollectionItem],
    own_trade: Option<i64>,
) -> MarketResult<()> {
    for item in items {
        if let Some(other) = database::pending_trade_for_item(conn, item.id, own_trade)? {
            return Err(MarketError::Conflict(format!(
                "card {} is already part of pending trade {}",
                item.id, other
            )));
        }
        if let Some(holder) = database::reservation_for_item(conn, item.id)? {
            if Some(holder) != own_trade {
                return Err(MarketError::Conflict(format!(
                    "card {} is reserved by trade {}",
                    item.id, holder
                )));
            }
        }
    }
    Ok(())
}

/// Propose a trade from `proposer_id` to `receiver_id`
pub fn propose(
    conn: &mut Connection,
    proposer_id: i64,
    receiver_id: i64,
    offer: &TradeOffer,
) -> MarketResult<TradeDetails> {
    let tx = database::begin(conn)?;
    let details = propose_tx(&tx, proposer_id, receiver_id, offer)?;
    tx.commit()?;

    log::info!(
        "Trade {} proposed: user {} -> user {} ({} offered, {} requested, {} escrowed)",
        details.trade.id,
        proposer_id,
        receiver_id,
        details.offered.len(),
        details.requested.len(),
        details.trade.proposer_currency
    );
    Ok(details)
}

fn propose_tx(
    tx: &Transaction<'_>,
    proposer_id: i64,
    receiver_id: i64,
    offer: &TradeOffer,
) -> MarketResult<TradeDetails> {
    if proposer_id == receiver_id {
        return Err(MarketError::Validation(
            "you cannot trade with yourself".to_string(),
        ));
    }
    if offer.offered_item_ids.is_empty() {
        return Err(MarketError::Validation(
            "you must offer at least one card".to_string(),
        ));
    }
    if offer.requested_item_ids.is_empty() {
        return Err(MarketError::Validation(
            "you must request at least one card".to_string(),
        ));
    }
    if offer.currency < 0 {
        return Err(MarketError::Validation(
            "currency amount cannot be negative".to_string(),
        ));
    }

    let proposer = database::require_user(tx, proposer_id)?;
    database::require_user(tx, receiver_id)?;

    if offer.currency > proposer.balance {
        return Err(MarketError::InsufficientFunds {
            needed: offer.currency,
            available: proposer.balance,
        });
    }

    let offered = resolve_owned_items(tx, &offer.offered_item_ids, proposer_id, TradeSide::Offered)?;
    let requested =
        resolve_owned_items(tx, &offer.requested_item_ids, receiver_id, TradeSide::Requested)?;

    ensure_unreserved(tx, &offered, None)?;
    ensure_unreserved(tx, &requested, None)?;

    let message = offer
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty());
    let trade = database::insert_trade(tx, proposer_id, receiver_id, message, offer.currency)?;

    if offer.currency > 0 {
        database::adjust_balance(tx, proposer_id, -offer.currency)?;
    }

    for item in &offered {
        database::insert_line_item(tx, trade.id, TradeSide::Offered, item, proposer_id)?;
        database::reserve_item(tx, item.id, trade.id)?;
    }
    for item in &requested {
        database::insert_line_item(tx, trade.id, TradeSide::Requested, item, proposer_id)?;
        database::reserve_item(tx, item.id, trade.id)?;
    }

    require_trade(tx, trade.id)
}

/// Re-read every line item and check it is still owned by `owner_id`
fn current_items(
    conn: &Connection,
    lines: &[LineItem],
    owner_id: i64,
) -> MarketResult<Vec<CollectionItem>> {
    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let item = match line.collection_item_id {
            Some(id) => database::get_item(conn, id)?,
            None => None,
        };
        match item {
            Some(item) if item.user_id == owner_id => items.push(item),
            Some(item) => {
                return Err(MarketError::Integrity(format!(
                    "ownership of card {} changed since trade {} was proposed",
                    item.id, line.trade_id
                )))
            }
            None => {
                return Err(MarketError::Integrity(format!(
                    "a card in trade {} no longer exists",
                    line.trade_id
                )))
            }
        }
    }
    Ok(items)
}

/// Accept a pending trade as its receiver.
///
/// Offered items go to the receiver, requested items to the proposer and the
/// escrow to the receiver, all in one transaction.
pub fn accept(conn: &mut Connection, trade_id: i64, actor_id: i64) -> MarketResult<TradeDetails> {
    let tx = database::begin(conn)?;
    let details = require_trade(&tx, trade_id)?;
    let trade = &details.trade;

    if actor_id != trade.receiver_id {
        return Err(MarketError::Authorization(
            "only the receiving user can accept this trade".to_string(),
        ));
    }
    require_pending(trade)?;

    let offered = current_items(&tx, &details.offered, trade.proposer_id)?;
    let requested = current_items(&tx, &details.requested, trade.receiver_id)?;

    ensure_unreserved(&tx, &offered, Some(trade.id))?;
    ensure_unreserved(&tx, &requested, Some(trade.id))?;

    for item in &offered {
        database::set_item_owner(&tx, item.id, trade.receiver_id)?;
    }
    for item in &requested {
        database::set_item_owner(&tx, item.id, trade.proposer_id)?;
    }
    if trade.proposer_currency > 0 {
        database::adjust_balance(&tx, trade.receiver_id, trade.proposer_currency)?;
    }
    close(&tx, trade.id, TradeStatus::Accepted)?;

    let settled = require_trade(&tx, trade_id)?;
    tx.commit()?;

    log::info!(
        "Trade {} accepted: {} cards and {} currency moved",
        trade_id,
        offered.len() + requested.len(),
        settled.trade.proposer_currency
    );
    Ok(settled)
}

fn close(tx: &Transaction<'_>, trade_id: i64, status: TradeStatus) -> DbResult<()> {
    database::set_trade_status(tx, trade_id, status)?;
    database::release_reservations(tx, trade_id)?;
    Ok(())
}

fn refund_escrow(tx: &Transaction<'_>, trade: &Trade) -> DbResult<()> {
    if trade.proposer_currency > 0 {
        database::adjust_balance(tx, trade.proposer_id, trade.proposer_currency)?;
    }
    Ok(())
}

/// Reject (receiver) or cancel (proposer) a pending trade, refunding the escrow
pub fn reject(conn: &mut Connection, trade_id: i64, actor_id: i64) -> MarketResult<Trade> {
    let tx = database::begin(conn)?;
    let trade = require_trade(&tx, trade_id)?.trade;

    if actor_id != trade.receiver_id && actor_id != trade.proposer_id {
        return Err(MarketError::Authorization(
            "you do not have permission to modify this trade".to_string(),
        ));
    }
    require_pending(&trade)?;

    let status = if actor_id == trade.receiver_id {
        TradeStatus::Rejected
    } else {
        TradeStatus::Cancelled
    };
    refund_escrow(&tx, &trade)?;
    close(&tx, trade.id, status)?;

    let closed = require_trade(&tx, trade_id)?.trade;
    tx.commit()?;

    log::info!("Trade {} {} by user {}", trade_id, status, actor_id);
    Ok(closed)
}

/// Replace a pending trade with a counter-offer from its receiver.
///
/// The original is cancelled and refunded, then a new trade is proposed with
/// the roles swapped. If the new proposal is invalid the original stays
/// pending and untouched.
pub fn counter(
    conn: &mut Connection,
    trade_id: i64,
    actor_id: i64,
    offer: &TradeOffer,
) -> MarketResult<TradeDetails> {
    let tx = database::begin(conn)?;
    let original = require_trade(&tx, trade_id)?.trade;

    if actor_id != original.receiver_id {
        return Err(MarketError::Authorization(
            "you do not have permission to counter this trade".to_string(),
        ));
    }
    require_pending(&original)?;

    refund_escrow(&tx, &original)?;
    close(&tx, original.id, TradeStatus::Cancelled)?;

    let replacement = propose_tx(&tx, actor_id, original.proposer_id, offer)?;
    tx.commit()?;

    log::info!(
        "Trade {} countered by user {} with trade {}",
        trade_id,
        actor_id,
        replacement.trade.id
    );
    Ok(replacement)
}

/// Pending trades sent and received by a user
pub fn trades_for_user(conn: &Connection, user_id: i64) -> MarketResult<TradeInbox> {
    database::require_user(conn, user_id)?;

    let load = |proposer: bool| -> MarketResult<Vec<TradeDetails>> {
        database::pending_trades_for_user(conn, user_id, proposer)?
            .into_iter()
            .map(|trade| require_trade(conn, trade.id))
            .collect()
    };

    Ok(TradeInbox {
        sent: load(true)?,
        received: load(false)?,
    })
}

/// A trade with its line items, visible to its two participants only
pub fn view_trade(conn: &Connection, trade_id: i64, actor_id: i64) -> MarketResult<TradeDetails> {
    let details = require_trade(conn, trade_id)?;
    if actor_id != details.trade.proposer_id && actor_id != details.trade.receiver_id {
        return Err(MarketError::Authorization(
            "you do not have permission to view this trade".to_string(),
        ));
    }
    Ok(details)
}

#[cfg(test)]
#[path = "trade_tests.rs"]
mod tests;
