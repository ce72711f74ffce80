//! Runtime-agnostic sleeping.
//!
//! The dispatcher's backoff delays and caller-imposed deadlines both go
//! through a [`Timer`], so tests can observe the schedule without waiting
//! and the browser can use its own clock.

use core::{future::Future, time::Duration};

use futures::future::{self, Either};

use crate::future::FutureKind;

#[cfg(any(feature = "futures-timer", feature = "tokio"))]
use crate::future::{Local, Sendable};
#[cfg(any(feature = "futures-timer", feature = "tokio"))]
use futures::{
    future::{BoxFuture, LocalBoxFuture},
    FutureExt,
};

/// Something that can produce a future completing after a duration.
pub trait Timer<K: FutureKind> {
    /// Complete after `dur` has elapsed.
    fn sleep(&self, dur: Duration) -> K::Future<'static, ()>;
}

/// A deadline passed before the inner future completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
#[error("deadline elapsed")]
pub struct Elapsed;

/// Race `fut` against `timer.sleep(dur)`.
///
/// # Errors
///
/// Returns [`Elapsed`] if the sleep finishes first.
pub async fn with_deadline<K, Tm, F>(timer: &Tm, dur: Duration, fut: F) -> Result<F::Output, Elapsed>
where
    K: FutureKind,
    Tm: Timer<K>,
    F: Future + Unpin,
{
    let sleep = Box::pin(timer.sleep(dur));
    match future::select(fut, sleep).await {
        Either::Left((value, _sleep)) => Ok(value),
        Either::Right(((), _fut)) => Err(Elapsed),
    }
}

/// A [`Timer`] backed by [`futures_timer::Delay`].
///
/// Works natively and, with the `wasm-bindgen` feature of `futures-timer`,
/// in the browser.
#[cfg(feature = "futures-timer")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FuturesTimer;

#[cfg(feature = "futures-timer")]
impl Timer<Sendable> for FuturesTimer {
    fn sleep(&self, dur: Duration) -> BoxFuture<'static, ()> {
        futures_timer::Delay::new(dur).boxed()
    }
}

#[cfg(feature = "futures-timer")]
impl Timer<Local> for FuturesTimer {
    fn sleep(&self, dur: Duration) -> LocalBoxFuture<'static, ()> {
        futures_timer::Delay::new(dur).boxed_local()
    }
}

/// A [`Timer`] backed by [`tokio::time::sleep`].
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TokioTimer;

#[cfg(feature = "tokio")]
impl Timer<Sendable> for TokioTimer {
    fn sleep(&self, dur: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(dur).boxed()
    }
}

#[cfg(feature = "tokio")]
impl Timer<Local> for TokioTimer {
    fn sleep(&self, dur: Duration) -> LocalBoxFuture<'static, ()> {
        tokio::time::sleep(dur).boxed_local()
    }
}
