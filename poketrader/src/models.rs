//! Persistent marketplace entities

use chrono::NaiveDate;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;
use std::fmt;
use tcg_common::Condition;

/// A marketplace participant and their currency balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Never negative
    pub balance: i64,
}

/// Catalog entry for a card printing, keyed by the external card id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CardDefinition {
    pub id: i64,
    pub api_card_id: String,
    pub name: String,
    pub set_name: String,
    pub image_url_small: Option<String>,
    pub image_url_large: Option<String>,
    /// Current base price in [1, 1000]; `None` until first priced
    pub price: Option<i64>,
    pub last_price_update: Option<NaiveDate>,
}

/// An owned, instantiated card
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionItem {
    pub id: i64,
    pub user_id: i64,
    pub card_id: i64,
    pub condition: Condition,
    pub purchase_price: i64,
    pub current_price: i64,
}

/// Trade lifecycle. Everything but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Pending => "pending",
            TradeStatus::Accepted => "accepted",
            TradeStatus::Rejected => "rejected",
            TradeStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TradeStatus::Pending),
            "accepted" => Some(TradeStatus::Accepted),
            "rejected" => Some(TradeStatus::Rejected),
            "cancelled" => Some(TradeStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Pending)
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for TradeStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TradeStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        TradeStatus::parse(s).ok_or_else(|| FromSqlError::Other(format!("unknown trade status: {s}").into()))
    }
}

/// A proposal between two users, holding escrowed proposer currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trade {
    pub id: i64,
    pub proposer_id: i64,
    pub receiver_id: i64,
    pub status: TradeStatus,
    pub message: Option<String>,
    /// Escrowed from the proposer at proposal time
    pub proposer_currency: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Which side of a trade a line item belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Offered,
    Requested,
}

/// Reference from a trade to a collection item.
///
/// `collection_item_id` becomes `None` once the item is sold or removed after
/// the trade resolved; `card_id` and `user_id` stay for audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineItem {
    pub id: i64,
    pub trade_id: i64,
    pub side: TradeSide,
    pub collection_item_id: Option<i64>,
    pub card_id: i64,
    /// Offering user for offered cards, requesting user for requested cards
    pub user_id: i64,
}

/// A trade with both of its line-item lists
#[derive(Debug, Clone, Serialize)]
pub struct TradeDetails {
    pub trade: Trade,
    pub offered: Vec<LineItem>,
    pub requested: Vec<LineItem>,
}

impl TradeDetails {
    pub fn offered_item_ids(&self) -> Vec<i64> {
        self.offered.iter().filter_map(|l| l.collection_item_id).collect()
    }

    pub fn requested_item_ids(&self) -> Vec<i64> {
        self.requested.iter().filter_map(|l| l.collection_item_id).collect()
    }
}
