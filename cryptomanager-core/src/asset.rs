//! Asset records: per-exchange observations and the canonical cross-exchange asset

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::CoreError;

/// Classification of an asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Unknown,
    Crypto,
    Stablecoin,
    Fiat,
}

impl AssetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetType::Unknown => "unknown",
            AssetType::Crypto => "crypto",
            AssetType::Stablecoin => "stablecoin",
            AssetType::Fiat => "fiat",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for AssetType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unknown" => Ok(AssetType::Unknown),
            "crypto" => Ok(AssetType::Crypto),
            "stablecoin" => Ok(AssetType::Stablecoin),
            "fiat" => Ok(AssetType::Fiat),
            _ => Err(CoreError::parse(format!("Unknown asset type: {}", s))),
        }
    }
}

/// Window an exchange ticker reports its statistics over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TickerType {
    /// Rolling 24 hour window
    #[serde(rename = "24h")]
    Day24H,
    /// Anything else, e.g. since UTC midnight
    #[serde(rename = "other")]
    Other,
}

impl TickerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickerType::Day24H => "24h",
            TickerType::Other => "other",
        }
    }
}

impl std::str::FromStr for TickerType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "24h" => Ok(TickerType::Day24H),
            "other" => Ok(TickerType::Other),
            _ => Err(CoreError::parse(format!("Unknown ticker type: {}", s))),
        }
    }
}

/// Asset statistics as reported by a single exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeAsset {
    pub exchange: String,
    /// Logical asset id, e.g. "ETH"
    pub asset: String,
    pub asset_type: AssetType,
    /// Unit price in the reference currency, `None` when the exchange has no usable price
    pub value: Option<Decimal>,
    pub volume: Decimal,
    pub change_percentage: Option<Decimal>,
    pub ticker_type: TickerType,
    pub update_time: DateTime<Utc>,
}

impl ExchangeAsset {
    /// Whether this observation can take part in price consensus
    pub fn is_valid(&self) -> bool {
        self.volume > Decimal::ZERO && self.value.is_some_and(|v| v > Decimal::ZERO)
    }
}

/// Reconciled statistics for a logical asset across all exchanges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub id: String,
    pub asset_type: AssetType,
    /// `None` when no price consensus could be reached
    pub value: Option<Decimal>,
    pub volume: Decimal,
    pub change_percentage: Option<Decimal>,
    pub update_time: DateTime<Utc>,
}

impl Asset {
    /// Asset without a consensus price; keeps the asset known but unpriced
    pub fn unpriced(id: impl Into<String>, asset_type: AssetType, update_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            asset_type,
            value: None,
            volume: Decimal::ZERO,
            change_percentage: None,
            update_time,
        }
    }

    /// Traded volume expressed in the reference currency
    pub fn volume_usd(&self) -> Option<Decimal> {
        self.value.map(|value| value * self.volume)
    }
}
