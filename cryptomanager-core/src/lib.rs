//! Core types for the CryptoManager market data server
//!
//! This crate defines the shared data structures used across the server,
//! including exchange credentials, user data updates, subscription status
//! events and the per-exchange / canonical asset records.

pub mod asset;
pub mod credentials;
pub mod error;
pub mod subscription;
pub mod user_data;

pub use asset::{Asset, AssetType, ExchangeAsset, TickerType};
pub use credentials::{ApiCredentials, ExchangeCredentials, UserExchangeAuthentication};
pub use error::{ConnectionError, CoreError};
pub use subscription::{
    StreamStatus, SubscribeResult, SubscriptionEvent, UserId, USER_UPDATES_TOPIC,
};
pub use user_data::{
    Balance, OrderSide, OrderStatus, SpotOrder, UserDataType, UserDataUpdate, UserTrade,
};
