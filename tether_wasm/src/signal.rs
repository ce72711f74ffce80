//! `AbortSignal` as a stream cancellation signal.

use futures::{channel::oneshot, future::LocalBoxFuture, FutureExt};
use wasm_bindgen::{closure::Closure, JsCast};
use web_sys::AbortSignal;

const ABORT_EVENT: &str = "abort";

/// Keeps an `abort` listener registered for as long as it lives.
///
/// Dropping it removes the listener, so a signal that fires after the
/// stream is done never calls into a dropped closure.
struct AbortListener {
    signal: AbortSignal,
    closure: Closure<dyn FnMut()>,
}

impl Drop for AbortListener {
    fn drop(&mut self) {
        let _ = self
            .signal
            .remove_event_listener_with_callback(ABORT_EVENT, self.closure.as_ref().unchecked_ref());
    }
}

/// A future that completes when `signal` aborts.
///
/// Completes immediately if it already has.
#[must_use]
pub fn aborted(signal: AbortSignal) -> LocalBoxFuture<'static, ()> {
    if signal.aborted() {
        return futures::future::ready(()).boxed_local();
    }

    let (tx, rx) = oneshot::channel::<()>();
    let mut tx = Some(tx);
    let closure = Closure::<dyn FnMut()>::new(move || {
        if let Some(tx) = tx.take() {
            let _ = tx.send(());
        }
    });

    if let Err(err) =
        signal.add_event_listener_with_callback(ABORT_EVENT, closure.as_ref().unchecked_ref())
    {
        tracing::warn!(?err, "could not listen for abort; stream cannot be cancelled");
        return futures::future::pending().boxed_local();
    }

    let listener = AbortListener { signal, closure };
    async move {
        let _listener = listener;
        if rx.await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
    .boxed_local()
}
