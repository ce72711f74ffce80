//! A host-installed bridge function.
//!
//! Some embedders do not hand the UI a message channel at all. Instead they
//! set an environment marker and install a function the UI calls directly
//! with `(kind, payload, correlationId)`. Both can appear or disappear at
//! runtime, so availability is read fresh on every check.

use core::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};
use std::sync::{Arc, PoisonError, RwLock};

use futures::{
    future::{self, BoxFuture, LocalBoxFuture},
    FutureExt,
};
use serde_json::Value;

use super::Transport;
use crate::{
    envelope::{CorrelationId, Envelope},
    error::TransportUnavailable,
    future::{Local, Sendable},
};

const NAME: &str = "bridge";

/// The function a host installs to receive envelopes.
///
/// Returning `Err` means the host refused or failed to accept the envelope.
pub type BridgeFn = dyn Fn(&str, &Value, &CorrelationId) -> Result<(), String> + Send + Sync;

#[derive(Default)]
struct Slot {
    marker: AtomicBool,
    function: RwLock<Option<Arc<BridgeFn>>>,
}

/// A shared slot the host fills with its bridge function.
///
/// Clones share the same slot.
#[derive(Clone, Default)]
pub struct HostBridge {
    slot: Arc<Slot>,
}

impl HostBridge {
    /// An empty bridge: no marker, no function.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear the environment marker that announces this integration.
    pub fn set_marker(&self, present: bool) {
        self.slot.marker.store(present, Ordering::Release);
    }

    /// Install the host's bridge function, replacing any previous one.
    pub fn install<F>(&self, function: F)
    where
        F: Fn(&str, &Value, &CorrelationId) -> Result<(), String> + Send + Sync + 'static,
    {
        let mut guard = self
            .slot
            .function
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Arc::new(function));
    }

    /// Remove the bridge function.
    pub fn uninstall(&self) {
        let mut guard = self
            .slot
            .function
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = None;
    }

    /// Whether the marker is set.
    #[must_use]
    pub fn has_marker(&self) -> bool {
        self.slot.marker.load(Ordering::Acquire)
    }

    /// Whether a bridge function is installed.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<BridgeFn>> {
        self.slot
            .function
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ready(&self) -> bool {
        self.has_marker() && self.is_installed()
    }

    fn invoke(&self, envelope: &Envelope) -> Result<(), TransportUnavailable> {
        if !self.has_marker() {
            return Err(TransportUnavailable::new(NAME, "environment marker not set"));
        }
        let function = self
            .current()
            .ok_or_else(|| TransportUnavailable::new(NAME, "bridge function not installed"))?;
        function(&envelope.kind, &envelope.payload, &envelope.correlation_id)
            .map_err(|reason| TransportUnavailable::new(NAME, reason))
    }
}

impl fmt::Debug for HostBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBridge")
            .field("marker", &self.has_marker())
            .field("installed", &self.is_installed())
            .finish()
    }
}

impl Transport<Sendable> for HostBridge {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.ready()
    }

    fn send(&self, envelope: &Envelope) -> BoxFuture<'_, Result<(), TransportUnavailable>> {
        future::ready(self.invoke(envelope)).boxed()
    }
}

impl Transport<Local> for HostBridge {
    fn name(&self) -> &'static str {
        NAME
    }

    fn is_available(&self) -> bool {
        self.ready()
    }

    fn send(&self, envelope: &Envelope) -> LocalBoxFuture<'_, Result<(), TransportUnavailable>> {
        future::ready(self.invoke(envelope)).boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recording_bridge() -> (HostBridge, Arc<Mutex<Vec<(String, Value, CorrelationId)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let bridge = HostBridge::new();
        let sink = calls.clone();
        bridge.install(move |kind, payload, id| {
            sink.lock()
                .expect("not poisoned")
                .push((kind.to_owned(), payload.clone(), *id));
            Ok(())
        });
        (bridge, calls)
    }

    #[test]
    fn needs_marker_and_function() {
        let bridge = HostBridge::new();
        assert!(!Transport::<Sendable>::is_available(&bridge));

        bridge.set_marker(true);
        assert!(!Transport::<Sendable>::is_available(&bridge));

        bridge.install(|_, _, _| Ok(()));
        assert!(Transport::<Sendable>::is_available(&bridge));

        bridge.uninstall();
        assert!(!Transport::<Sendable>::is_available(&bridge));
    }

    #[tokio::test]
    async fn invokes_function_with_kind_payload_and_id() {
        let (bridge, calls) = recording_bridge();
        bridge.set_marker(true);

        let env = Envelope::new("settings/get", json!({"key": "theme"}));
        Transport::<Sendable>::send(&bridge, &env).await.expect("installed");

        let calls = calls.lock().expect("not poisoned");
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls.first(),
            Some(&("settings/get".to_owned(), json!({"key": "theme"}), env.correlation_id))
        );
    }

    #[tokio::test]
    async fn function_error_is_normalized() {
        let bridge = HostBridge::new();
        bridge.set_marker(true);
        bridge.install(|_, _, _| Err("host busy".into()));

        let err = Transport::<Sendable>::send(&bridge, &Envelope::new("x", json!(null)))
            .await
            .expect_err("host refused");
        assert_eq!(err, TransportUnavailable::new("bridge", "host busy"));
    }

    #[test]
    fn clones_share_the_slot() {
        let bridge = HostBridge::new();
        let other = bridge.clone();
        other.set_marker(true);
        other.install(|_, _, _| Ok(()));
        assert!(bridge.has_marker());
        assert!(bridge.is_installed());
    }
}
