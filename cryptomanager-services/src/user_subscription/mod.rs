//! Per-user subscription multiplexing
//!
//! One upstream exchange connection set per user, shared by all of the
//! user's sessions, with events fanned out to every session's callbacks.

mod callbacks;
mod service;

pub use callbacks::{
    Callback, DispatchError, DispatchReport, UserCallbacks, UserEvent, UserUpdateSubscription,
};
pub use service::UserSubscriptionService;
