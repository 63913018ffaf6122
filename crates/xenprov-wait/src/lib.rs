//! Bounded, cancellable polling
//!
//! [`InterruptibleWait`] re-evaluates a [`Predicate`] on a fixed interval
//! until it is satisfied, fails, the timeout elapses or the caller's
//! [`CancellationToken`](tokio_util::sync::CancellationToken) fires.

mod predicate;
mod wait;

pub use predicate::{predicate_fn, BoxError, FnPredicate, Predicate};
pub use wait::{InterruptibleWait, WaitError, MIN_POLL_INTERVAL};

pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
