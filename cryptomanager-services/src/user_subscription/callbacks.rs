//! Listener registry and event fan-out for a single user
//!
//! A [`UserUpdateSubscription`] holds the callbacks of every session that is
//! interested in one user's data, in registration order. Registration,
//! removal and dispatch all happen under the subscription's listener lock,
//! so a dispatch always sees a consistent listener snapshot.

use parking_lot::Mutex;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use cryptomanager_core::{
    Balance, SpotOrder, SubscriptionEvent, UserDataUpdate, UserId, UserTrade,
};

use crate::provider::{TrackerEvent, UserDataTracker};

/// Listener callback for one kind of user event
///
/// Callbacks run on the dispatching task while the listener lock is held.
/// They must return quickly and must not call back into the subscription
/// service for the same user.
pub type Callback<T> = Arc<dyn Fn(&T) -> Result<(), DispatchError> + Send + Sync>;

/// Event routed to the listeners of a user
#[derive(Debug, Clone)]
pub enum UserEvent {
    Balances(UserDataUpdate<Vec<Balance>>),
    Orders(UserDataUpdate<Vec<SpotOrder>>),
    Trades(UserDataUpdate<Vec<UserTrade>>),
    Status(SubscriptionEvent),
}

impl UserEvent {
    fn label(&self) -> &'static str {
        match self {
            UserEvent::Balances(_) => "balances",
            UserEvent::Orders(_) => "orders",
            UserEvent::Trades(_) => "trades",
            UserEvent::Status(_) => "status",
        }
    }
}

impl From<TrackerEvent> for UserEvent {
    fn from(event: TrackerEvent) -> Self {
        match event {
            TrackerEvent::Balances(update) => UserEvent::Balances(update),
            TrackerEvent::Orders(update) => UserEvent::Orders(update),
            TrackerEvent::Trades(update) => UserEvent::Trades(update),
            TrackerEvent::ConnectedChange {
                exchange,
                connected,
                ..
            } => UserEvent::Status(SubscriptionEvent::connectivity(exchange, connected)),
            TrackerEvent::Failed { exchange, .. } => UserEvent::Status(SubscriptionEvent::new(
                exchange,
                cryptomanager_core::StreamStatus::Failed,
            )),
        }
    }
}

/// Callbacks registered by one session (browser tab, API connection, ...)
#[derive(Clone)]
pub struct UserCallbacks {
    connection_id: String,
    balance_callback: Callback<UserDataUpdate<Vec<Balance>>>,
    order_callback: Callback<UserDataUpdate<Vec<SpotOrder>>>,
    user_trade_callback: Callback<UserDataUpdate<Vec<UserTrade>>>,
    status_callback: Callback<SubscriptionEvent>,
}

impl UserCallbacks {
    /// Create a listener that ignores every event until callbacks are attached
    pub fn new(connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            balance_callback: Arc::new(|_| Ok(())),
            order_callback: Arc::new(|_| Ok(())),
            user_trade_callback: Arc::new(|_| Ok(())),
            status_callback: Arc::new(|_| Ok(())),
        }
    }

    pub fn on_balances<F>(mut self, callback: F) -> Self
    where
        F: Fn(&UserDataUpdate<Vec<Balance>>) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.balance_callback = Arc::new(callback);
        self
    }

    pub fn on_orders<F>(mut self, callback: F) -> Self
    where
        F: Fn(&UserDataUpdate<Vec<SpotOrder>>) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.order_callback = Arc::new(callback);
        self
    }

    pub fn on_trades<F>(mut self, callback: F) -> Self
    where
        F: Fn(&UserDataUpdate<Vec<UserTrade>>) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.user_trade_callback = Arc::new(callback);
        self
    }

    pub fn on_status<F>(mut self, callback: F) -> Self
    where
        F: Fn(&SubscriptionEvent) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        self.status_callback = Arc::new(callback);
        self
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn invoke(&self, event: &UserEvent) -> Result<(), DispatchError> {
        let outcome = catch_unwind(AssertUnwindSafe(|| match event {
            UserEvent::Balances(update) => (self.balance_callback)(update),
            UserEvent::Orders(update) => (self.order_callback)(update),
            UserEvent::Trades(update) => (self.user_trade_callback)(update),
            UserEvent::Status(update) => (self.status_callback)(update),
        }));

        match outcome {
            Ok(result) => result,
            Err(payload) => Err(DispatchError::Panic(panic_message(payload.as_ref()))),
        }
    }
}

impl std::fmt::Debug for UserCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserCallbacks")
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Result of delivering one event to a user's listeners
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// The single upstream connection set of a user and everyone listening to it
pub struct UserUpdateSubscription {
    user_id: UserId,
    callbacks: Mutex<Vec<UserCallbacks>>,
    /// Trackers of the upstream connection; taken exactly once on close
    upstream: Mutex<Option<Vec<Arc<dyn UserDataTracker>>>>,
    cancel: CancellationToken,
}

impl UserUpdateSubscription {
    pub fn new(user_id: UserId, callbacks: UserCallbacks, cancel: CancellationToken) -> Self {
        Self {
            user_id,
            callbacks: Mutex::new(vec![callbacks]),
            upstream: Mutex::new(Some(Vec::new())),
            cancel,
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn connection_ids(&self) -> Vec<String> {
        self.callbacks
            .lock()
            .iter()
            .map(|c| c.connection_id.clone())
            .collect()
    }

    pub fn callback_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Register a listener, returning the new listener count
    ///
    /// A session that is already registered has its callbacks replaced in place.
    pub fn add_callback(&self, callbacks: UserCallbacks) -> usize {
        let mut registered = self.callbacks.lock();
        match registered
            .iter_mut()
            .find(|c| c.connection_id == callbacks.connection_id)
        {
            Some(existing) => *existing = callbacks,
            None => registered.push(callbacks),
        }
        registered.len()
    }

    /// Remove a listener, returning the remaining count, or `None` if it wasn't registered
    pub fn remove(&self, connection_id: &str) -> Option<usize> {
        let mut registered = self.callbacks.lock();
        let index = registered
            .iter()
            .position(|c| c.connection_id == connection_id)?;
        registered.remove(index);
        Some(registered.len())
    }

    /// Attach the trackers of the upstream connection set
    pub(crate) fn set_upstream(&self, trackers: Vec<Arc<dyn UserDataTracker>>) {
        if let Some(upstream) = self.upstream.lock().as_mut() {
            upstream.extend(trackers);
        }
    }

    /// Close the upstream connection set; later calls do nothing
    pub(crate) async fn close_upstream(&self) {
        let trackers = self.upstream.lock().take();
        if let Some(trackers) = trackers {
            futures::future::join_all(trackers.iter().map(|tracker| tracker.close())).await;
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Deliver an event to every registered listener in registration order
    ///
    /// A failing listener is logged and skipped; it never prevents delivery
    /// to the listeners after it.
    pub fn invoke(&self, event: &UserEvent) -> DispatchReport {
        let callbacks = self.callbacks.lock();
        let mut report = DispatchReport::default();

        for callback in callbacks.iter() {
            match callback.invoke(event) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        user_id = %self.user_id,
                        connection_id = %callback.connection_id,
                        event = event.label(),
                        "Listener callback failed: {}",
                        e
                    );
                }
            }
        }

        report
    }
}

impl std::fmt::Debug for UserUpdateSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserUpdateSubscription")
            .field("user_id", &self.user_id)
            .field("listeners", &self.callback_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Errors raised by listener callbacks
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Callback error: {0}")]
    Callback(String),

    #[error("Callback panicked: {0}")]
    Panic(String),
}

impl DispatchError {
    pub fn callback(msg: impl Into<String>) -> Self {
        DispatchError::Callback(msg.into())
    }
}
