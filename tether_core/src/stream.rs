//! Consuming a streamed reply.
//!
//! Fragments are pushed into the stream's queue as they are routed. Each
//! poll drains everything already queued and yields it as one chunk, so a
//! slow consumer sees fewer, larger chunks and a fast one sees each fragment
//! as it lands. Nothing is yielded when nothing new has arrived, in
//! particular no empty chunk right before the end.

use core::{
    fmt,
    marker::PhantomData,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{stream::AbortHandle, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    cancel::AbortNotice,
    dispatcher::{Delivery, Dispatcher, ScheduleRetry},
    envelope::CorrelationId,
    error::CallError,
    future::FutureKind,
    operation,
    registry::{StreamEvent, StreamEvents},
    spawn::Spawn,
    timer::Timer,
    transport::Transport,
};

/// A lazy, finite, non-restartable sequence of text chunks.
///
/// After the last chunk the host's terminal value is available through
/// [`ResponseStream::terminal`]; [`ResponseStream::finish`] decodes it as `O`.
pub struct ResponseStream<K: FutureKind, T, Tm, S, O = Value> {
    events: Option<StreamEvents>,
    unconsumed: String,
    terminal: Option<Value>,
    failure: Option<CallError>,
    notice: AbortNotice,
    watcher: Option<AbortHandle>,
    dispatcher: Dispatcher<K, T, Tm, S>,
    _output: PhantomData<fn() -> O>,
}

impl<K: FutureKind, T, Tm, S, O> ResponseStream<K, T, Tm, S, O> {
    pub(crate) fn new(
        events: StreamEvents,
        notice: AbortNotice,
        dispatcher: Dispatcher<K, T, Tm, S>,
    ) -> Self {
        Self {
            events: Some(events),
            unconsumed: String::new(),
            terminal: None,
            failure: None,
            notice,
            watcher: None,
            dispatcher,
            _output: PhantomData,
        }
    }

    /// Attach the task watching this stream's cancellation signal.
    ///
    /// It is stopped once the stream ends.
    pub(crate) fn with_watcher(mut self, watcher: AbortHandle) -> Self {
        self.watcher = Some(watcher);
        self
    }

    /// The stream's identifier.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.notice.correlation_id()
    }

    /// The raw terminal value, once the completion marker has been consumed.
    #[must_use]
    pub const fn terminal(&self) -> Option<&Value> {
        self.terminal.as_ref()
    }

    /// Whether the stream has seen its end, successful or not.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.events.is_none()
    }

    /// Whether an abort has been sent for this stream.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.notice.is_sent()
    }

    fn drain_ready(&mut self, cx: &mut Context<'_>) {
        while let Some(events) = self.events.as_mut() {
            match events.poll_next_unpin(cx) {
                Poll::Ready(Some(StreamEvent::Fragment(fragment))) => {
                    self.unconsumed.push_str(&fragment);
                }
                Poll::Ready(Some(StreamEvent::Complete(value))) => {
                    self.terminal = Some(value);
                    self.events = None;
                }
                Poll::Ready(Some(StreamEvent::Failed(err))) => {
                    self.failure = Some(err);
                    self.events = None;
                }
                Poll::Ready(None) => {
                    self.failure = Some(CallError::ResponseDropped);
                    self.events = None;
                }
                Poll::Pending => break,
            }
        }

        if self.events.is_none() {
            if let Some(watcher) = self.watcher.take() {
                watcher.abort();
            }
        }
    }
}

impl<K, T, Tm, S, O> ResponseStream<K, T, Tm, S, O>
where
    K: ScheduleRetry<T, Tm, S>,
    T: Transport<K>,
    Tm: Timer<K> + Clone,
    S: Spawn<K> + Clone,
{
    /// Ask the host to stop producing fragments.
    ///
    /// Advisory: the stream still ends only when the host sends its
    /// completion marker. Sends at most one `abort` per stream, shared with
    /// any cancellation signal; returns `None` if one was already sent.
    pub async fn abort(&self) -> Option<Delivery> {
        self.notice.fire(&self.dispatcher).await
    }
}

impl<K, T, Tm, S, O> ResponseStream<K, T, Tm, S, O>
where
    K: FutureKind,
    O: DeserializeOwned,
{
    /// Drain the stream, returning the concatenated text and the decoded
    /// terminal value.
    ///
    /// # Errors
    ///
    /// Returns the [`CallError`] that ended the stream, or a decoding error
    /// for the terminal value.
    pub async fn finish(mut self) -> Result<(String, O), CallError> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            text.push_str(&chunk?);
        }
        let terminal = self.terminal.take().unwrap_or(Value::Null);
        Ok((text, operation::decode(terminal)?))
    }
}

impl<K: FutureKind, T, Tm, S, O> Stream for ResponseStream<K, T, Tm, S, O> {
    type Item = Result<String, CallError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        this.drain_ready(cx);

        if !this.unconsumed.is_empty() {
            return Poll::Ready(Some(Ok(core::mem::take(&mut this.unconsumed))));
        }

        if let Some(err) = this.failure.take() {
            return Poll::Ready(Some(Err(err)));
        }

        if this.events.is_none() {
            Poll::Ready(None)
        } else {
            Poll::Pending
        }
    }
}

impl<K: FutureKind, T, Tm, S, O> Drop for ResponseStream<K, T, Tm, S, O> {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }

        if self.events.is_some() {
            let id = self.correlation_id();
            if self.dispatcher.registry().try_deregister(id) {
                tracing::debug!(correlation_id = %id, "stream dropped before completion, deregistered");
            }
        }
    }
}

// No field is structurally pinned.
impl<K: FutureKind, T, Tm, S, O> Unpin for ResponseStream<K, T, Tm, S, O> {}

impl<K: FutureKind, T, Tm, S, O> fmt::Debug for ResponseStream<K, T, Tm, S, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("correlation_id", &self.correlation_id())
            .field("finished", &self.is_finished())
            .field("unconsumed", &self.unconsumed.len())
            .field("terminal", &self.terminal)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backoff::RetryPolicy,
        envelope::Envelope,
        future::Sendable,
        registry::{Registry, Routed},
        spawn::TokioSpawn,
        test_utils::{FlakyTransport, RecordingTimer},
    };
    use futures::FutureExt;
    use serde_json::json;

    type TestStream<O = Value> =
        ResponseStream<Sendable, FlakyTransport, RecordingTimer, TokioSpawn, O>;

    async fn open<O>() -> (TestStream<O>, Registry, FlakyTransport) {
        let registry = Registry::default();
        let transport = FlakyTransport::new(0);
        let dispatcher = Dispatcher::new(
            transport.clone(),
            RecordingTimer::default(),
            TokioSpawn,
            registry.clone(),
            RetryPolicy::default(),
        );
        let id = CorrelationId::generate();
        let events = registry.register_stream(id).await;
        (
            ResponseStream::new(events, AbortNotice::new(id), dispatcher),
            registry,
            transport,
        )
    }

    async fn push<O>(registry: &Registry, stream: &TestStream<O>, payload: Value) -> Routed {
        registry
            .route(Envelope::with_id(stream.correlation_id(), "chat", payload))
            .await
    }

    #[tokio::test]
    async fn yields_each_fragment_when_consumer_keeps_up() {
        let (mut stream, registry, _) = open::<Value>().await;

        push(&registry, &stream, json!("a")).await;
        assert_eq!(stream.next().await, Some(Ok("a".into())));

        push(&registry, &stream, json!("bc")).await;
        assert_eq!(stream.next().await, Some(Ok("bc".into())));

        push(&registry, &stream, json!({"done": true, "value": "done"})).await;
        assert_eq!(stream.next().await, None);
        assert_eq!(stream.terminal(), Some(&json!("done")));
    }

    #[tokio::test]
    async fn coalesces_everything_already_queued() {
        let (mut stream, registry, _) = open::<Value>().await;

        push(&registry, &stream, json!("a")).await;
        push(&registry, &stream, json!("bc")).await;
        push(&registry, &stream, json!({"done": true, "value": 3})).await;

        assert_eq!(stream.next().await, Some(Ok("abc".into())));
        assert_eq!(stream.next().await, None);
        assert_eq!(stream.terminal(), Some(&json!(3)));
    }

    #[tokio::test]
    async fn no_fragments_means_no_chunks() {
        let (mut stream, registry, _) = open::<Value>().await;
        push(&registry, &stream, json!({"done": true, "value": null})).await;

        assert_eq!(stream.next().await, None);
        assert_eq!(stream.terminal(), Some(&Value::Null));
    }

    #[tokio::test]
    async fn pending_until_something_arrives() {
        let (mut stream, registry, _) = open::<Value>().await;
        assert!(stream.next().now_or_never().is_none());

        push(&registry, &stream, json!("x")).await;
        assert_eq!(stream.next().now_or_never(), Some(Some(Ok("x".into()))));
    }

    #[tokio::test]
    async fn failure_ends_with_one_error() {
        let (mut stream, registry, _) = open::<Value>().await;
        push(&registry, &stream, json!("partial")).await;
        registry.cancel(stream.correlation_id()).await;

        assert_eq!(stream.next().await, Some(Ok("partial".into())));
        assert_eq!(stream.next().await, Some(Err(CallError::Cancelled)));
        assert_eq!(stream.next().await, None);
        assert!(stream.terminal().is_none());
    }

    #[tokio::test]
    async fn finish_decodes_the_terminal_value() {
        let (stream, registry, _) = open::<u32>().await;
        push(&registry, &stream, json!("hello ")).await;
        push(&registry, &stream, json!("world")).await;
        push(&registry, &stream, json!({"done": true, "value": 2})).await;

        assert_eq!(stream.finish().await, Ok(("hello world".to_owned(), 2)));
    }

    #[tokio::test]
    async fn dropping_an_open_stream_deregisters_it() {
        let (stream, registry, _) = open::<Value>().await;
        let id = stream.correlation_id();
        let (watcher, registration) = AbortHandle::new_pair();
        let stream = stream.with_watcher(watcher);
        assert!(registry.contains(id).await);

        drop(stream);
        assert!(registration.handle().is_aborted());
        assert!(!registry.contains(id).await);
        assert_eq!(
            registry.route(Envelope::with_id(id, "chat", json!("late"))).await,
            Routed::Inert
        );
    }

    #[tokio::test]
    async fn abort_is_sent_once_and_stream_keeps_going() {
        let (mut stream, registry, transport) = open::<Value>().await;

        assert!(stream.abort().await.is_some());
        assert!(stream.abort().await.is_none());
        assert!(stream.is_aborted());
        assert_eq!(transport.delivered().len(), 1);

        push(&registry, &stream, json!("late fragment")).await;
        assert_eq!(stream.next().await, Some(Ok("late fragment".into())));
    }
}
