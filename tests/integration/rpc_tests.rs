//! Integration tests for request/response multiplexing over one connection.

use std::time::Duration;

use futures_util::future::join_all;
use gateway_console::config::TimeoutConfig;
use gateway_console::models::cron::CronListResponse;
use gateway_console::AppError;
use serde_json::{json, Value};

use super::test_helpers::{echo, FakeGateway, Reply};

fn short_rpc() -> TimeoutConfig {
    TimeoutConfig {
        rpc_ms: 300,
        handshake_ms: 200,
        connect_ms: 1_000,
    }
}

// ── Outcomes ─────────────────────────────────────────────────

#[tokio::test]
async fn ok_response_resolves_with_payload() {
    let gateway = FakeGateway::start(|_, _| Reply::Ok(json!({"x": 1}))).await;
    let client = gateway.client();

    let payload = client.call("cron.list", Value::Null).await.expect("call");
    assert_eq!(payload, json!({"x": 1}));
}

#[tokio::test]
async fn failed_response_rejects_with_message() {
    let gateway = FakeGateway::start(|_, _| Reply::Fail("boom".into())).await;
    let client = gateway.client();

    let err = client.call("cron.remove", json!({"id": "j"})).await.unwrap_err();
    assert_eq!(err, AppError::Gateway("boom".into()));
    assert!(client.is_connected().await, "application errors keep the link");
}

#[tokio::test]
async fn failed_response_without_message_uses_default() {
    let gateway = FakeGateway::start(|_, _| {
        Reply::Raw(vec![json!({"type": "res", "id": "{id}", "ok": false}).to_string()])
    })
    .await;
    let client = gateway.client();

    let err = client.call("cron.run", Value::Null).await.unwrap_err();
    assert_eq!(err, AppError::Gateway("Request failed".into()));
}

#[tokio::test]
async fn params_are_forwarded_and_null_becomes_empty_object() {
    let gateway = FakeGateway::start(echo).await;
    let client = gateway.client();

    client
        .call("cron.runs", json!({"id": "j1", "limit": 5}))
        .await
        .expect("with params");
    client.call("sessions.list", Value::Null).await.expect("null params");

    let frames = gateway.received();
    let runs = frames.iter().find(|f| f["method"] == "cron.runs").expect("runs frame");
    assert_eq!(runs["params"], json!({"id": "j1", "limit": 5}));
    let sessions = frames
        .iter()
        .find(|f| f["method"] == "sessions.list")
        .expect("sessions frame");
    assert_eq!(sessions["params"], json!({}));
}

#[tokio::test]
async fn request_ids_are_unique() {
    let gateway = FakeGateway::start(echo).await;
    let client = gateway.client();

    for _ in 0..5 {
        client.call("ping", Value::Null).await.expect("call");
    }

    let mut ids: Vec<String> = gateway
        .received()
        .iter()
        .filter_map(|f| f["id"].as_str().map(str::to_owned))
        .collect();
    let total = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), total);
}

#[tokio::test]
async fn empty_method_is_rejected_without_connecting() {
    let gateway = FakeGateway::start(echo).await;
    let client = gateway.client();

    let err = client.call("  ", Value::Null).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidRequest(_)));
    assert_eq!(gateway.connections(), 0);
}

#[tokio::test]
async fn typed_call_decodes_payload() {
    let gateway = FakeGateway::start(|_, _| {
        Reply::Ok(json!({"jobs": [{"id": "j1", "name": "digest", "enabled": true}]}))
    })
    .await;
    let client = gateway.client();

    let list: CronListResponse = client.call_typed("cron.list", Value::Null).await.expect("typed");
    assert_eq!(list.jobs.len(), 1);
    assert_eq!(list.jobs[0].label(), "digest");
    assert_eq!(list.jobs[0].enabled, Some(true));
}

#[tokio::test]
async fn typed_call_reports_shape_mismatch() {
    let gateway = FakeGateway::start(|_, _| Reply::Ok(json!("not a list"))).await;
    let client = gateway.client();

    let err = client
        .call_typed::<CronListResponse>("cron.list", Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Protocol(ref m) if m.contains("cron.list")));
}

// ── Multiplexing ─────────────────────────────────────────────

#[tokio::test]
async fn out_of_order_responses_reach_their_callers() {
    let gateway = FakeGateway::start(|method, params| {
        let delay = params["delay"].as_u64().unwrap_or(0);
        Reply::Delayed(
            Duration::from_millis(delay),
            Box::new(Reply::Ok(json!({"method": method}))),
        )
    })
    .await;
    let client = gateway.client();

    let calls = [("slow", 200), ("medium", 100), ("fast", 0)].map(|(method, delay)| {
        let client = client.clone();
        async move { client.call(method, json!({"delay": delay})).await }
    });
    let results = join_all(calls).await;

    let methods: Vec<Value> = results
        .into_iter()
        .map(|r| r.expect("call")["method"].clone())
        .collect();
    assert_eq!(methods, vec![json!("slow"), json!("medium"), json!("fast")]);
}

#[tokio::test]
async fn every_concurrent_call_resolves_exactly_once() {
    let gateway = FakeGateway::start(|method, _| match method {
        m if m.ends_with(".fail") => Reply::Fail(format!("{m} failed")),
        m if m.ends_with(".hang") => Reply::Silent,
        m => Reply::Ok(json!(m)),
    })
    .await;
    let client = gateway.client_with(short_rpc());

    let methods: Vec<String> = (0..12)
        .map(|i| match i % 3 {
            0 => format!("m{i}.ok"),
            1 => format!("m{i}.fail"),
            _ => format!("m{i}.hang"),
        })
        .collect();
    let calls = methods.iter().map(|method| {
        let client = client.clone();
        async move { client.call(method, Value::Null).await }
    });
    let results = join_all(calls).await;

    for (method, result) in methods.iter().zip(results) {
        match result {
            Ok(payload) => {
                assert!(method.ends_with(".ok"));
                assert_eq!(payload, json!(method));
            }
            Err(AppError::Gateway(msg)) => {
                assert!(method.ends_with(".fail"));
                assert_eq!(msg, format!("{method} failed"));
            }
            Err(AppError::RequestTimeout(m)) => {
                assert!(method.ends_with(".hang"));
                assert_eq!(&m, method);
            }
            Err(other) => panic!("unexpected outcome for {method}: {other}"),
        }
    }
    assert_eq!(client.pending_requests(), 0);
}

// ── Timeouts ─────────────────────────────────────────────────

#[tokio::test]
async fn timeout_names_method_and_spares_other_requests() {
    let gateway = FakeGateway::start(|method, _| match method {
        "hang" => Reply::Silent,
        _ => Reply::Delayed(Duration::from_millis(450), Box::new(Reply::Ok(json!("late but ok")))),
    })
    .await;
    let client = gateway.client_with(TimeoutConfig {
        rpc_ms: 600,
        handshake_ms: 200,
        connect_ms: 1_000,
    });
    client.call("warmup", Value::Null).await.expect("warmup");

    let hang = {
        let client = client.clone();
        tokio::spawn(async move { client.call("hang", Value::Null).await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    let slow = client.call("slow", Value::Null);

    let (hang, slow) = tokio::join!(hang, slow);
    let err = hang.expect("join").unwrap_err();
    assert_eq!(err, AppError::RequestTimeout("hang".into()));
    assert_eq!(err.to_string(), "rpc timeout: hang");
    assert_eq!(slow.expect("slow call"), json!("late but ok"));
    assert!(client.is_connected().await, "a request timeout keeps the link");
    assert_eq!(gateway.connections(), 1);
}

#[tokio::test]
async fn late_response_after_timeout_is_dropped() {
    let gateway = FakeGateway::start(|method, _| match method {
        "late" => Reply::Delayed(Duration::from_millis(500), Box::new(Reply::Ok(json!("late")))),
        _ => Reply::Ok(json!("ok")),
    })
    .await;
    let client = gateway.client_with(short_rpc());

    let err = client.call("late", Value::Null).await.unwrap_err();
    assert!(matches!(err, AppError::RequestTimeout(_)));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.call("next", Value::Null).await.expect("next"), json!("ok"));
    assert_eq!(client.connection().stats().unmatched_responses, 1);
}

// ── Dropped inbound traffic ──────────────────────────────────

#[tokio::test]
async fn unmatched_response_is_ignored() {
    let gateway = FakeGateway::start(|_, _| {
        Reply::Raw(vec![
            json!({"type": "res", "id": "nobody-asked", "ok": true, "payload": "stray"})
                .to_string(),
            json!({"type": "res", "id": "{id}", "ok": true, "payload": "mine"}).to_string(),
        ])
    })
    .await;
    let client = gateway.client();

    let payload = client.call("cron.list", Value::Null).await.expect("call");
    assert_eq!(payload, json!("mine"));
    assert_eq!(client.connection().stats().unmatched_responses, 1);
    assert!(client.is_connected().await);
}

#[tokio::test]
async fn malformed_text_resolves_nothing() {
    let gateway = FakeGateway::start(|_, _| {
        Reply::Raw(vec![
            "this is not json".into(),
            r#"{"type":"res""#.into(),
            r#"{"type":"mystery","id":"{id}"}"#.into(),
            json!({"type": "res", "id": "{id}", "ok": true, "payload": 42}).to_string(),
        ])
    })
    .await;
    let client = gateway.client();

    let payload = client.call("cron.list", Value::Null).await.expect("call");
    assert_eq!(payload, json!(42));
    assert_eq!(client.connection().stats().malformed_frames, 3);
    assert!(client.is_connected().await);
}

#[tokio::test]
async fn malformed_text_alone_leaves_request_pending_until_timeout() {
    let gateway = FakeGateway::start(|_, _| Reply::Raw(vec!["{{{".into()])).await;
    let client = gateway.client_with(short_rpc());

    let err = client.call("cron.list", Value::Null).await.unwrap_err();
    assert_eq!(err, AppError::RequestTimeout("cron.list".into()));
    assert!(client.is_connected().await);
}

#[tokio::test]
async fn events_reach_subscribers() {
    let gateway = FakeGateway::start(|_, _| {
        Reply::Raw(vec![
            json!({"type": "event", "event": "cron.fired", "payload": {"id": "j1"}}).to_string(),
            json!({"type": "res", "id": "{id}", "ok": true}).to_string(),
        ])
    })
    .await;
    let client = gateway.client();
    let mut events = client.connection().subscribe();

    client.call("cron.list", Value::Null).await.expect("call");
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("event in time")
        .expect("event");
    assert_eq!(event.event, "cron.fired");
    assert_eq!(event.payload, json!({"id": "j1"}));
}
