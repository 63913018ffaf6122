use async_trait::async_trait;
use std::future::Future;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A condition re-evaluated by [`InterruptibleWait`](crate::InterruptibleWait).
///
/// `Ok(false)` means "not yet", `Err` aborts the wait without retrying.
/// Evaluations never overlap, so implementations may keep plain mutable state.
#[async_trait]
pub trait Predicate: Send {
    async fn check(&mut self) -> Result<bool, BoxError>;
}

// Lets callers lend a stateful predicate and read its state afterwards
#[async_trait]
impl<P> Predicate for &mut P
where
    P: Predicate + ?Sized,
{
    async fn check(&mut self) -> Result<bool, BoxError> {
        (**self).check().await
    }
}

#[async_trait]
impl<P> Predicate for Box<P>
where
    P: Predicate + ?Sized,
{
    async fn check(&mut self) -> Result<bool, BoxError> {
        (**self).check().await
    }
}

/// Closure-backed predicate, see [`predicate_fn`]
pub struct FnPredicate<F>(F);

/// Build a [`Predicate`] from a closure returning a future.
///
/// Synchronous work (e.g. draining a channel) can happen in the closure body
/// before the future is built.
pub fn predicate_fn<F, Fut>(f: F) -> FnPredicate<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<bool, BoxError>> + Send,
{
    FnPredicate(f)
}

#[async_trait]
impl<F, Fut> Predicate for FnPredicate<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<bool, BoxError>> + Send,
{
    async fn check(&mut self) -> Result<bool, BoxError> {
        (self.0)().await
    }
}
