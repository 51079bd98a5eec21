//! User subscription service
//!
//! Keeps at most one authenticated upstream connection set per user, no
//! matter how many sessions of that user are listening, and fans the
//! upstream's events out to every registered session.
//!
//! Subscribe and unsubscribe for a user are serialized through a per-user
//! async lock. The lock is created on first use and never removed, so the
//! "check if connected, otherwise connect" step is atomic per user while
//! different users proceed in parallel.

use dashmap::DashMap;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cryptomanager_core::{
    ConnectionError, ExchangeCredentials, SubscribeResult, UserExchangeAuthentication, UserId,
};

use super::callbacks::{DispatchReport, UserCallbacks, UserEvent, UserUpdateSubscription};
use crate::provider::{ExchangeConnectionProvider, TrackerEvent, TrackerSet};

type SubscriptionMap = DashMap<UserId, Arc<UserUpdateSubscription>>;

/// Multiplexes user data subscriptions onto one upstream per user
pub struct UserSubscriptionService {
    /// Per-user locks, never removed
    user_locks: DashMap<UserId, Arc<Mutex<()>>>,
    /// Active subscriptions; an entry exists only while it has listeners
    subscriptions: Arc<SubscriptionMap>,
    provider: Arc<dyn ExchangeConnectionProvider>,
    /// Optional allow-list of exchanges to connect
    enabled_exchanges: Option<Vec<String>>,
}

impl UserSubscriptionService {
    pub fn new(
        provider: Arc<dyn ExchangeConnectionProvider>,
        enabled_exchanges: Option<Vec<String>>,
    ) -> Self {
        Self {
            user_locks: DashMap::new(),
            subscriptions: Arc::new(DashMap::new()),
            provider,
            enabled_exchanges,
        }
    }

    fn user_lock(&self, user_id: UserId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.user_locks
                .entry(user_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    fn subscription(&self, user_id: UserId) -> Option<Arc<UserUpdateSubscription>> {
        self.subscriptions
            .get(&user_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Exchanges named by the authentication set, filtered by the allow-list
    fn requested_exchanges(&self, auths: &[UserExchangeAuthentication]) -> Vec<String> {
        let mut exchanges: Vec<String> = Vec::with_capacity(auths.len());
        for auth in auths {
            if exchanges.contains(&auth.exchange) {
                continue;
            }
            let enabled = self
                .enabled_exchanges
                .as_ref()
                .map_or(true, |enabled| enabled.contains(&auth.exchange));
            if enabled {
                exchanges.push(auth.exchange.clone());
            }
        }
        exchanges
    }

    /// Register a session's callbacks for a user's data
    ///
    /// The first session of a user opens the upstream connections; later
    /// sessions are attached to the running subscription and get an empty
    /// result. For the first session one result per requested exchange is
    /// returned, so partial connection failures can be reported.
    pub async fn subscribe(
        &self,
        user_id: UserId,
        auths: &[UserExchangeAuthentication],
        callbacks: UserCallbacks,
    ) -> Vec<SubscribeResult> {
        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        info!("Connecting user subscriptions for user {}", user_id);
        if let Some(subscription) = self.subscription(user_id) {
            let count = subscription.add_callback(callbacks);
            debug!(
                "User subscription for user {} already connected, adding callback. Now {} listeners for user.",
                user_id, count
            );
            return Vec::new();
        }

        let credentials = ExchangeCredentials::from_authentications(auths);
        let exchanges = self.requested_exchanges(auths);

        // Registered before the trackers start so events emitted while
        // connecting already reach the first listener
        let cancel = CancellationToken::new();
        let subscription = Arc::new(UserUpdateSubscription::new(
            user_id,
            callbacks,
            cancel.clone(),
        ));
        self.subscriptions.insert(user_id, Arc::clone(&subscription));

        let TrackerSet { trackers, errors } =
            self.provider.open(&user_id.key(), &credentials, &exchanges);
        subscription.set_upstream(trackers.clone());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        spawn_event_forwarder(Arc::downgrade(&subscription), events_rx);

        let starts = trackers.iter().map(|tracker| {
            let events = events_tx.clone();
            let cancel = cancel.child_token();
            async move {
                let exchange = tracker.exchange().to_string();
                let result = tracker.start(events, cancel).await;
                (exchange, result)
            }
        });
        let started = join_all(starts).await;
        drop(events_tx);

        let mut outcomes: HashMap<String, Option<ConnectionError>> = errors
            .into_iter()
            .map(|(exchange, error)| (exchange, Some(error)))
            .collect();
        for (exchange, result) in started {
            outcomes.insert(exchange, result.err());
        }

        let results: Vec<SubscribeResult> = exchanges
            .into_iter()
            .map(|exchange| match outcomes.remove(&exchange) {
                Some(None) => SubscribeResult::connected(exchange),
                Some(Some(error)) => {
                    warn!(
                        "Failed to connect user {} to {}: {}",
                        user_id, exchange, error
                    );
                    SubscribeResult::failed(exchange, error)
                }
                None => {
                    let error = ConnectionError::unsupported("no tracker available");
                    warn!(
                        "Failed to connect user {} to {}: {}",
                        user_id, exchange, error
                    );
                    SubscribeResult::failed(exchange, error)
                }
            })
            .collect();

        debug!(
            "User subscription for user {} connected ({}/{} exchanges)",
            user_id,
            results.iter().filter(|r| r.success()).count(),
            results.len()
        );
        results
    }

    /// Remove a session's callbacks
    ///
    /// Unknown sessions are ignored. When the last session leaves, the
    /// upstream connections are closed and the subscription is dropped.
    pub async fn unsubscribe(&self, user_id: UserId, connection_id: &str) {
        let Some(lock) = self
            .user_locks
            .get(&user_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return;
        };
        let _guard = lock.lock().await;

        let Some(subscription) = self.subscription(user_id) else {
            return;
        };

        let Some(remaining) = subscription.remove(connection_id) else {
            return;
        };

        if remaining == 0 {
            debug!(
                "Unsubscribed user subscription for user {}, no listeners, closing connection",
                user_id
            );
            self.subscriptions.remove(&user_id);
            subscription.cancel_token().cancel();
            subscription.close_upstream().await;
        } else {
            debug!(
                "Unsubscribed user subscription for user {}, still {} listeners left",
                user_id, remaining
            );
        }
    }

    /// Deliver an event to every listener currently registered for a user
    ///
    /// Does nothing when the user has no subscription, which happens when
    /// the last listener left between the event arriving and its dispatch.
    pub fn dispatch(&self, user_id: UserId, event: &UserEvent) -> DispatchReport {
        match self.subscription(user_id) {
            Some(subscription) => subscription.invoke(event),
            None => DispatchReport::default(),
        }
    }

    /// Close every subscription, e.g. on shutdown
    pub async fn close_all(&self) {
        let users: Vec<UserId> = self.active_users();
        for user_id in users {
            let lock = self.user_lock(user_id);
            let _guard = lock.lock().await;
            if let Some((_, subscription)) = self.subscriptions.remove(&user_id) {
                subscription.cancel_token().cancel();
                subscription.close_upstream().await;
            }
        }
        info!("Closed all user subscriptions");
    }

    pub fn is_subscribed(&self, user_id: UserId) -> bool {
        self.subscriptions.contains_key(&user_id)
    }

    pub fn listener_count(&self, user_id: UserId) -> usize {
        self.subscription(user_id)
            .map(|s| s.callback_count())
            .unwrap_or(0)
    }

    pub fn active_users(&self) -> Vec<UserId> {
        self.subscriptions.iter().map(|entry| *entry.key()).collect()
    }
}

impl std::fmt::Debug for UserSubscriptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSubscriptionService")
            .field("active_users", &self.subscriptions.len())
            .field("enabled_exchanges", &self.enabled_exchanges)
            .finish()
    }
}

/// Forward tracker events of one upstream to its subscription's listeners
///
/// Stops when the subscription is cancelled or dropped, or when every
/// tracker has released its sender.
fn spawn_event_forwarder(
    subscription: Weak<UserUpdateSubscription>,
    mut events: mpsc::UnboundedReceiver<TrackerEvent>,
) {
    let Some(cancel) = subscription.upgrade().map(|s| s.cancel_token().clone()) else {
        return;
    };

    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let Some(subscription) = subscription.upgrade() else {
                break;
            };
            if subscription.is_closed() {
                break;
            }
            subscription.invoke(&UserEvent::from(event));
        }
        debug!("User event forwarder stopped");
    });
}
