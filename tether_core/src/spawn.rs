//! Spawning background work.
//!
//! Scheduled retries, cancellation watchers, and reverse-channel handlers run
//! off the caller's task. The runtime that drives them is injected.

use futures::stream::AbortHandle;

use crate::future::FutureKind;

#[cfg(feature = "tokio")]
use crate::future::{Local, Sendable};
#[cfg(feature = "tokio")]
use futures::future::{Abortable, BoxFuture, LocalBoxFuture};

/// Trait for spawning background tasks.
///
/// Implement this for your runtime (e.g., tokio, wasm-bindgen-futures).
pub trait Spawn<K: FutureKind> {
    /// Spawn a future as a background task.
    ///
    /// The returned [`AbortHandle`] can be used to cancel the task.
    fn spawn(&self, fut: K::Future<'static, ()>) -> AbortHandle;
}

/// A spawner that uses the ambient tokio runtime.
///
/// [`Local`] futures go through [`tokio::task::spawn_local`] and therefore
/// need to run inside a [`tokio::task::LocalSet`].
#[cfg(feature = "tokio")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TokioSpawn;

#[cfg(feature = "tokio")]
impl Spawn<Sendable> for TokioSpawn {
    fn spawn(&self, fut: BoxFuture<'static, ()>) -> AbortHandle {
        let (handle, reg) = AbortHandle::new_pair();
        tokio::spawn(Abortable::new(fut, reg));
        handle
    }
}

#[cfg(feature = "tokio")]
impl Spawn<Local> for TokioSpawn {
    fn spawn(&self, fut: LocalBoxFuture<'static, ()>) -> AbortHandle {
        let (handle, reg) = AbortHandle::new_pair();
        tokio::task::spawn_local(Abortable::new(fut, reg));
        handle
    }
}
