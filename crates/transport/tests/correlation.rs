//! End-to-end correlation between two peers over an in-process transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use requestify::{
    handler_fn, Correlator, CorrelatorConfig, CorrelatorError, NoRequestHandler, RequestError,
    NO_HANDLER_MESSAGE,
};
use serde_json::{json, Value};
use transport::MemoryTransport;

fn config_ms(ms: u64) -> CorrelatorConfig {
    CorrelatorConfig::default().with_request_timeout(Duration::from_millis(ms))
}

/// Builds a responder that records every payload it sees and answers with
/// `respond(payload)`.
fn recording_peer(
    transport: MemoryTransport,
    respond: fn(Value) -> Result<Value, Value>,
) -> (Correlator, Arc<Mutex<Vec<Value>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = handler_fn(move |message: Value| {
        sink.lock().unwrap().push(message.clone());
        async move { respond(message) }
    });
    let correlator = Correlator::new(transport, handler, CorrelatorConfig::default()).unwrap();
    (correlator, seen)
}

#[tokio::test]
async fn test_round_trip_representative_payloads() {
    let (a, b) = MemoryTransport::pair();
    let client = Correlator::new(a, NoRequestHandler, CorrelatorConfig::default()).unwrap();
    let (_server, seen) = recording_peer(b, |message| Ok(json!({ "got": message })));

    let payloads = vec![
        json!({"op": "ping"}),
        json!({"nested": {"list": [1, {"deep": [true, null]}], "s": "x"}}),
        Value::Null,
        json!({}),
        json!([]),
        json!(""),
        json!(3.5),
    ];

    for payload in &payloads {
        let reply = client.request(payload.clone()).await.unwrap();
        assert_eq!(reply, json!({ "got": payload }));
    }
    assert_eq!(*seen.lock().unwrap(), payloads);
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_null_and_empty_responses() {
    let (a, b) = MemoryTransport::pair();
    let client = Correlator::new(a, NoRequestHandler, CorrelatorConfig::default()).unwrap();
    let (_server, _seen) = recording_peer(b, |message| match message.as_str() {
        Some("null") => Ok(Value::Null),
        Some("object") => Ok(json!({})),
        _ => Ok(json!("")),
    });

    assert_eq!(client.request(json!("null")).await.unwrap(), Value::Null);
    assert_eq!(client.request(json!("object")).await.unwrap(), json!({}));
    assert_eq!(client.request(json!("other")).await.unwrap(), json!(""));
}

#[tokio::test]
async fn test_remote_failure_reaches_caller_unmodified() {
    let (a, b) = MemoryTransport::pair();
    let client = Correlator::new(a, NoRequestHandler, CorrelatorConfig::default()).unwrap();
    let (_server, _seen) = recording_peer(b, |_| Err(json!({"code": 503, "detail": ["busy"]})));

    let err = client.request(json!("anything")).await.unwrap_err();
    assert_eq!(err.remote_value(), Some(&json!({"code": 503, "detail": ["busy"]})));
}

#[tokio::test]
async fn test_unconfigured_peer_reports_missing_handler() {
    let (a, b) = MemoryTransport::pair();
    let client = Correlator::new(a, NoRequestHandler, CorrelatorConfig::default()).unwrap();
    let _server = Correlator::new(b, NoRequestHandler, CorrelatorConfig::default()).unwrap();

    let err = client.request(json!({"op": "ping"})).await.unwrap_err();
    assert_eq!(err.remote_value(), Some(&json!(NO_HANDLER_MESSAGE)));
}

#[tokio::test]
async fn test_both_sides_request_concurrently() {
    let (a, b) = MemoryTransport::pair();
    let left = Correlator::new(
        a,
        handler_fn(|m: Value| async move { Ok(json!({"left": m})) }),
        CorrelatorConfig::default(),
    )
    .unwrap();
    let right = Correlator::new(
        b,
        handler_fn(|m: Value| async move { Ok(json!({"right": m})) }),
        CorrelatorConfig::default(),
    )
    .unwrap();

    let (from_right, from_left) = tokio::join!(left.request(json!(1)), right.request(json!(2)));
    assert_eq!(from_right.unwrap(), json!({"right": 1}));
    assert_eq!(from_left.unwrap(), json!({"left": 2}));

    let stats = left.stats();
    assert_eq!(stats.requests_sent, 1);
    assert_eq!(stats.responses_matched, 1);
    assert_eq!(stats.requests_received, 1);
    assert_eq!(stats.responses_sent, 1);
}

#[tokio::test]
async fn test_responses_resolve_out_of_order() {
    let (a, b) = MemoryTransport::pair();
    let client = Correlator::new(a, NoRequestHandler, CorrelatorConfig::default()).unwrap();
    let _server = Correlator::new(
        b,
        handler_fn(|m: Value| async move {
            let delay = m.as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(m)
        }),
        CorrelatorConfig::default(),
    )
    .unwrap();

    let slow = client.send_request(json!(40)).await.unwrap();
    let fast = client.send_request(json!(1)).await.unwrap();
    assert_ne!(slow.id(), fast.id());

    let finished_first = tokio::select! {
        r = slow => ("slow", r.unwrap()),
        r = fast => ("fast", r.unwrap()),
    };
    assert_eq!(finished_first, ("fast", json!(1)));
}

#[tokio::test(start_paused = true)]
async fn test_silent_peer_times_out() {
    let (a, b) = MemoryTransport::pair();
    let client = Correlator::new(a, NoRequestHandler, config_ms(50)).unwrap();
    let _server = Correlator::new(
        b,
        handler_fn(|_m: Value| std::future::pending::<Result<Value, Value>>()),
        CorrelatorConfig::default(),
    )
    .unwrap();

    let started = tokio::time::Instant::now();
    let err = client.request(json!({"op": "slow"})).await.unwrap_err();

    assert!(matches!(err, RequestError::Timeout { after, .. } if after == Duration::from_millis(50)));
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert!(started.elapsed() < Duration::from_millis(60));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_after_timeout_is_dropped() {
    let (a, b) = MemoryTransport::pair();
    let client = Correlator::new(a, NoRequestHandler, config_ms(20)).unwrap();
    let (_server, seen) = {
        let seen = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&seen);
        let handler = handler_fn(move |m: Value| {
            *counter.lock().unwrap() += 1;
            async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(m)
            }
        });
        (Correlator::new(b, handler, CorrelatorConfig::default()).unwrap(), seen)
    };

    assert!(client.request(json!("x")).await.unwrap_err().is_timeout());

    // Let the slow reply arrive.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = client.stats();
    assert_eq!(stats.stale_responses, 1);
    assert_eq!(stats.requests_received, 0);
    assert_eq!(*seen.lock().unwrap(), 1);
}

#[tokio::test]
async fn test_second_correlator_on_same_transport_fails() {
    let (a, _b) = MemoryTransport::pair();
    let a = Arc::new(a);
    let _first = Correlator::new(Arc::clone(&a), NoRequestHandler, CorrelatorConfig::default()).unwrap();

    let second = Correlator::new(a, NoRequestHandler, CorrelatorConfig::default());
    assert!(matches!(second, Err(CorrelatorError::AlreadyWrapped)));
}

#[tokio::test]
async fn test_closed_link_surfaces_transport_error() {
    let (a, b) = MemoryTransport::pair();
    let a = Arc::new(a);
    let client = Correlator::new(Arc::clone(&a), NoRequestHandler, CorrelatorConfig::default()).unwrap();
    let _server = Correlator::new(b, NoRequestHandler, CorrelatorConfig::default()).unwrap();

    a.close();
    let err = client.request(json!(1)).await.unwrap_err();
    assert!(matches!(err, RequestError::Transport(_)));
    assert_eq!(client.pending_count(), 0);
}

#[tokio::test]
async fn test_dropping_last_handle_fails_outstanding_requests() {
    let (a, _b) = MemoryTransport::pair();
    let client = Correlator::new(a, NoRequestHandler, CorrelatorConfig::default()).unwrap();

    let pending = client.send_request(json!("unanswered")).await.unwrap();
    drop(client);

    assert!(matches!(pending.await, Err(RequestError::Closed)));
}
