//! User data updates emitted by exchange user data trackers

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Kind of user data stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserDataType {
    Balances,
    Orders,
    Trades,
}

/// Asset balance on an exchange account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    /// Balance available for trading
    pub available: Decimal,
    /// Total balance, including funds locked in open orders
    pub total: Decimal,
}

impl Balance {
    pub fn locked(&self) -> Decimal {
        self.total - self.available
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Canceled,
}

/// Spot order on an exchange account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotOrder {
    pub symbol: String,
    pub order_id: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub price: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub quantity_filled: Decimal,
    pub create_time: Option<DateTime<Utc>>,
}

/// Execution of one of the user's orders
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTrade {
    pub symbol: String,
    pub order_id: String,
    pub trade_id: String,
    pub price: Decimal,
    pub quantity: Decimal,
    pub fee: Option<Decimal>,
    pub fee_asset: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Batch of user data from a single exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDataUpdate<T> {
    pub exchange: String,
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

impl<T> UserDataUpdate<T> {
    pub fn new(exchange: impl Into<String>, data: T) -> Self {
        Self {
            exchange: exchange.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}
