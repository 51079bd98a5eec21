//! Services for the CryptoManager market data server
//!
//! This crate provides the per-user subscription multiplexer that shares one
//! authenticated exchange connection set between all sessions of a user, and
//! the asset statistics analyzer that reconciles per-exchange asset data into
//! canonical cross-exchange records.

pub mod asset_analyzer;
pub mod asset_stats;
pub mod asset_storage;
pub mod config;
pub mod provider;
pub mod user_subscription;

pub use asset_analyzer::{
    AggregateStore, AnalyzerConfig, AnalyzerError, AssetStatsAnalyzer, CycleReport,
    RawObservationSource,
};
pub use asset_stats::{AssetStatsCalculator, AssetStatsConfig};
pub use asset_storage::{
    AssetOrderBy, AssetPage, AssetQuery, AssetStorage, AssetStorageError, OrderDirection,
};
pub use config::{ConfigError, ServiceConfig};
pub use provider::{ExchangeConnectionProvider, TrackerEvent, TrackerSet, UserDataTracker};
pub use user_subscription::{
    DispatchError, DispatchReport, UserCallbacks, UserEvent, UserSubscriptionService,
};
