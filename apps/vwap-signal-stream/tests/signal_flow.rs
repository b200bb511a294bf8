//! Signal Flow Integration Tests
//!
//! Runs the stream engine with the real dispatcher and REST client against a
//! mock option-chain API and watches the event hub.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vwap_signal_stream::application::ports::StreamEvent;
use vwap_signal_stream::domain::signal::TriggerState;
use vwap_signal_stream::domain::tick::QuoteFrameBuilder;
use vwap_signal_stream::{
    Credentials, DhanRestClient, EngineExit, EventHub, FixedOffsetClock, PipelineConfig, Signal,
    StreamEngine, TickPipeline, TokioSignalDispatcher, Underlying,
};

// 2024-06-03 09:15:00 UTC
const OPEN: i32 = 1_717_406_100;

struct Harness {
    frames: mpsc::Sender<Vec<u8>>,
    events: broadcast::Receiver<StreamEvent>,
    cancel: CancellationToken,
    engine: tokio::task::JoinHandle<(TickPipeline, EngineExit)>,
}

fn start(server: &MockServer) -> Harness {
    let rest = DhanRestClient::new(
        server.uri(),
        Credentials::new("tok".to_string(), "cid".to_string()),
        Duration::ZERO,
    )
    .unwrap();

    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let dispatcher = TokioSignalDispatcher::new(
        Arc::new(rest),
        Underlying::default(),
        Duration::from_secs(5),
        outcome_tx,
    );

    let hub = Arc::new(EventHub::new(64));
    let events = hub.subscribe();
    let pipeline = TickPipeline::new(
        PipelineConfig::default(),
        Arc::new(FixedOffsetClock::utc()),
        Arc::new(dispatcher),
        hub,
    );

    let (frames, frame_rx) = mpsc::channel(16);
    let cancel = CancellationToken::new();
    let engine = tokio::spawn(
        StreamEngine::new(pipeline, frame_rx, outcome_rx, cancel.clone()).run(),
    );

    Harness {
        frames,
        events,
        cancel,
        engine,
    }
}

async fn mount_chain(server: &MockServer, call_oi: u64, put_oi: u64) {
    Mock::given(method("POST"))
        .and(path("/optionchain/expirylist"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "success", "data": ["2024-06-07"]})),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/optionchain"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "data": {"oc": {
                "75000.000000": {
                    "ce": {"oi": call_oi, "last_price": 120.0},
                    "pe": {"oi": put_oi, "last_price": 95.0}
                }
            }}
        })))
        .mount(server)
        .await;
}

async fn next_signal(events: &mut broadcast::Receiver<StreamEvent>) -> StreamEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            if let event @ StreamEvent::SignalGenerated(_) = events.recv().await.unwrap() {
                return event;
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn touch_produces_signal_event() {
    let server = MockServer::start().await;
    mount_chain(&server, 2_000, 1_000).await;
    let mut harness = start(&server);

    let frame = QuoteFrameBuilder::new(75_000.0, 10, OPEN, 500).build();
    tokio_test::assert_ok!(harness.frames.send(frame).await);

    let StreamEvent::SignalGenerated(report) = next_signal(&mut harness.events).await else {
        unreachable!();
    };
    assert_eq!(report.signal, Signal::BuyPut);
    assert!((report.pcr - 0.5).abs() < 1e-9);
    assert_eq!(report.total_call_oi, 2_000);
    assert_eq!(report.expiry.as_deref(), Some("2024-06-07"));

    harness.cancel.cancel();
    let (pipeline, exit) = harness.engine.await.unwrap();
    assert_eq!(exit, EngineExit::Cancelled);
    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.signals_dispatched, 1);
    assert_eq!(stats.signals_generated, 1);
    // Success keeps the latch until the candle closes.
    assert!(matches!(
        pipeline.trigger_state(),
        TriggerState::Cooldown { .. }
    ));
}

#[tokio::test]
async fn failed_lookup_re_arms_within_candle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
        .mount(&server)
        .await;
    let harness = start(&server);

    harness
        .frames
        .send(QuoteFrameBuilder::new(75_000.0, 10, OPEN, 500).build())
        .await
        .unwrap();

    // Wait for the failure to come back through the engine.
    for _ in 0..100 {
        if server.received_requests().await.is_some_and(|r| !r.is_empty()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Same candle, still near VWAP: fires again.
    harness
        .frames
        .send(QuoteFrameBuilder::new(75_002.0, 10, OPEN + 30, 600).build())
        .await
        .unwrap();
    drop(harness.frames);

    let (pipeline, exit) = timeout(Duration::from_secs(5), harness.engine)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit, EngineExit::FeedClosed);

    let stats = pipeline.stats().snapshot();
    assert_eq!(stats.signals_dispatched, 2);
    assert!(stats.dispatch_failures >= 1);
    assert_eq!(stats.signals_generated, 0);
}
