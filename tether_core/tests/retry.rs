//! Outbound delivery under a refusing transport.

use core::time::Duration;
use std::sync::OnceLock;

use serde_json::json;
use tether_core::{
    backoff::{Backoff, RetryPolicy},
    dispatcher::Delivery,
    future::Sendable,
    test_utils::{FlakyTransport, HostHarness, RecordingTimer, TokioSpawn},
    transport::{ChannelTransport, NoTransport},
    CallError, Inbound, Session, SessionConfig,
};
use testresult::TestResult;

type FlakySession = Session<Sendable, FlakyTransport, NoTransport, RecordingTimer, TokioSpawn>;

fn init_tracing() {
    static ONCE: OnceLock<()> = OnceLock::new();
    ONCE.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .init();
    });
}

fn setup(failures: usize, config: SessionConfig) -> (FlakySession, FlakyTransport, RecordingTimer) {
    init_tracing();
    let transport = FlakyTransport::new(failures);
    let timer = RecordingTimer::default();
    let session = Session::new(
        transport.clone(),
        NoTransport,
        timer.clone(),
        TokioSpawn,
        config,
    );
    (session, transport, timer)
}

async fn settle(transport: &FlakyTransport, attempts: usize) {
    for _ in 0..1_000 {
        if transport.attempts() >= attempts {
            break;
        }
        tokio::task::yield_now().await;
    }
    // Give any stray retry a chance to show up.
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn secs(values: &[u64]) -> Vec<Duration> {
    values.iter().copied().map(Duration::from_secs).collect()
}

#[tokio::test]
async fn delivered_on_fifth_attempt_after_doubling_delays() -> TestResult {
    let (session, transport, timer) = setup(4, SessionConfig::default());

    let delivery = session.notify("log", json!("hello")).await;
    assert!(matches!(delivery, Delivery::Retrying(_)));

    let delivered = transport.wait_for_delivery().await.ok_or("never delivered")?;
    assert_eq!(delivered.correlation_id, delivery.correlation_id());
    assert_eq!(transport.attempts(), 5);
    assert_eq!(timer.delays(), secs(&[1, 2, 4, 8]));
    Ok(())
}

#[tokio::test]
async fn first_attempt_success_never_sleeps() -> TestResult {
    let (session, transport, timer) = setup(0, SessionConfig::default());

    let delivery = session.notify("log", json!(1)).await;
    assert!(delivery.is_sent());
    assert_eq!(transport.attempts(), 1);
    assert!(timer.delays().is_empty());
    Ok(())
}

#[tokio::test]
async fn exhausted_notification_is_dropped_quietly() -> TestResult {
    let (session, transport, timer) = setup(usize::MAX, SessionConfig::default());

    let delivery = session.notify("log", json!("lost")).await;
    assert!(matches!(delivery, Delivery::Retrying(_)));

    settle(&transport, 5).await;
    assert_eq!(transport.attempts(), 5);
    assert_eq!(timer.delays(), secs(&[1, 2, 4, 8]));
    assert!(transport.delivered().is_empty());
    assert_eq!(session.pending_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn exhausted_call_fails_its_waiter() -> TestResult {
    let (session, transport, _timer) = setup(usize::MAX, SessionConfig::default());

    let result = session.call_raw("echo", json!(null)).await;
    assert_eq!(result, Err(CallError::SendExhausted { attempts: 5 }));
    assert_eq!(transport.attempts(), 5);
    assert_eq!(session.pending_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn exhausted_stream_ends_with_error() -> TestResult {
    use futures::StreamExt;

    let (session, _transport, _timer) = setup(usize::MAX, SessionConfig::default());

    let mut stream = session.stream_raw("chat", json!(null)).await;
    assert_eq!(
        stream.next().await,
        Some(Err(CallError::SendExhausted { attempts: 5 }))
    );
    assert_eq!(stream.next().await, None);
    Ok(())
}

#[tokio::test]
async fn silent_exhaustion_leaves_waiter_pending() -> TestResult {
    let config = SessionConfig::default().with_surface_exhaustion(false);
    let (session, transport, _timer) = setup(usize::MAX, config);

    let call = tokio::spawn({
        let session = session.clone();
        async move { session.call_raw("echo", json!(null)).await }
    });

    settle(&transport, 5).await;
    assert_eq!(transport.attempts(), 5);
    assert_eq!(session.pending_count().await, 1);
    assert!(!call.is_finished());

    assert_eq!(session.disconnect().await, 1);
    assert_eq!(call.await?, Err(CallError::Disconnected));
    Ok(())
}

#[tokio::test]
async fn custom_policy_changes_schedule() -> TestResult {
    let backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(3), 2.0, 0.0);
    let policy = RetryPolicy::new(backoff, 3);
    let (session, transport, timer) = setup(usize::MAX, SessionConfig::default().with_retry(policy));

    let result = session.call_raw("echo", json!(null)).await;
    assert_eq!(result, Err(CallError::SendExhausted { attempts: 3 }));
    assert_eq!(transport.attempts(), 3);
    assert_eq!(timer.delays(), secs(&[2, 3]));
    Ok(())
}

#[tokio::test]
async fn exhausted_abort_leaves_stream_open() -> TestResult {
    use futures::{FutureExt, StreamExt};

    init_tracing();
    let (host, transport, inbound) = HostHarness::new();
    let timer = RecordingTimer::default();
    let session: Session<Sendable, ChannelTransport, NoTransport, RecordingTimer, TokioSpawn> =
        Session::new(
            transport,
            NoTransport,
            timer.clone(),
            TokioSpawn,
            SessionConfig::default(),
        );

    let mut stream = session.stream_raw("chat", json!(null)).await;
    let request = host.next_from_ui().await.ok_or("no request")?;

    session.transports().primary().close();
    assert!(matches!(stream.abort().await, Some(Delivery::Retrying(_))));

    for _ in 0..1_000 {
        if timer.delays().len() >= 4 {
            break;
        }
        tokio::task::yield_now().await;
    }
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(timer.delays(), secs(&[1, 2, 4, 8]));
    assert_eq!(session.pending_count().await, 1);
    assert!(stream.next().now_or_never().is_none());

    host.complete(&request, json!("stopped")).await?;
    let envelope = inbound.recv().await?;
    assert_eq!(session.handle_inbound(envelope).await, Inbound::Completed);
    assert_eq!(stream.next().await, None);
    assert_eq!(stream.terminal(), Some(&json!("stopped")));
    Ok(())
}
