//! Exchange connection provider seam
//!
//! The exchange client library (REST/socket clients, request signing,
//! reconnects inside a single exchange connection) lives outside this crate.
//! These traits describe the part of it the subscription service relies on.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cryptomanager_core::{
    Balance, ConnectionError, ExchangeCredentials, SpotOrder, UserDataType, UserDataUpdate,
    UserTrade,
};

/// Event emitted by a user data tracker
#[derive(Debug, Clone)]
pub enum TrackerEvent {
    Balances(UserDataUpdate<Vec<Balance>>),
    Orders(UserDataUpdate<Vec<SpotOrder>>),
    Trades(UserDataUpdate<Vec<UserTrade>>),
    /// Connectivity of one of the tracker's streams changed
    ConnectedChange {
        exchange: String,
        data_type: UserDataType,
        connected: bool,
    },
    /// The tracker gave up and will not emit further data
    Failed {
        exchange: String,
        error: ConnectionError,
    },
}

/// Tracks balances, orders and trades of one user on one exchange
#[async_trait]
pub trait UserDataTracker: Send + Sync {
    /// Exchange this tracker is connected to
    fn exchange(&self) -> &str;

    /// Connect and start emitting events into `events`
    ///
    /// Emission must stop once `cancel` is cancelled or [`close`](Self::close) is called.
    async fn start(
        &self,
        events: mpsc::UnboundedSender<TrackerEvent>,
        cancel: CancellationToken,
    ) -> Result<(), ConnectionError>;

    /// Stop emitting and release network resources
    ///
    /// Idempotent, and safe to call on a tracker that never fully started.
    async fn close(&self);
}

/// Trackers created for a user, plus the exchanges that could not be initialized
#[derive(Default)]
pub struct TrackerSet {
    pub trackers: Vec<Arc<dyn UserDataTracker>>,
    pub errors: Vec<(String, ConnectionError)>,
}

/// Creates authenticated exchange connections on behalf of a user
pub trait ExchangeConnectionProvider: Send + Sync {
    /// Create one tracker per requested exchange
    ///
    /// `user_key` identifies the user towards the exchange client library.
    fn open(
        &self,
        user_key: &str,
        credentials: &ExchangeCredentials,
        exchanges: &[String],
    ) -> TrackerSet;
}
