//! Integration tests for teardown: explicit disconnect, gateway close, and
//! reconnection afterwards.

use std::time::Duration;

use gateway_console::gateway::Phase;
use gateway_console::AppError;
use serde_json::{json, Value};

use super::test_helpers::{echo, FakeGateway, Reply};

fn closed() -> AppError {
    AppError::Connection("Connection closed".into())
}

/// Wait until `client` has `n` requests outstanding.
async fn wait_for_pending(client: &gateway_console::GatewayClient, n: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while client.pending_requests() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("requests registered in time");
}

#[tokio::test]
async fn disconnect_fails_pending_requests() {
    let gateway = FakeGateway::start(|method, _| match method {
        "hang" => Reply::Silent,
        _ => Reply::Ok(Value::Null),
    })
    .await;
    let client = gateway.client();

    let calls: Vec<_> = (0..3)
        .map(|_| {
            let client = client.clone();
            tokio::spawn(async move { client.call("hang", Value::Null).await })
        })
        .collect();
    wait_for_pending(&client, 3).await;

    client.disconnect();

    for call in calls {
        assert_eq!(call.await.expect("join"), Err(closed()));
    }
    assert_eq!(client.pending_requests(), 0);
    assert_eq!(client.connection().phase(), Phase::Idle);
    assert!(!client.connection().is_authenticated());
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let gateway = FakeGateway::start(echo).await;
    let client = gateway.client();

    client.disconnect();
    client.call("a", Value::Null).await.expect("call");
    client.disconnect();
    client.disconnect();

    assert_eq!(client.connection().phase(), Phase::Idle);
}

#[tokio::test]
async fn is_connected_false_after_disconnect_when_gateway_gone() {
    let gateway = FakeGateway::start(echo).await;
    let client = gateway.client();
    assert!(client.is_connected().await);

    gateway.shutdown();
    client.disconnect();

    assert!(!client.is_connected().await);
}

#[tokio::test]
async fn call_after_disconnect_reconnects() {
    let gateway = FakeGateway::start(echo).await;
    let client = gateway.client();

    client.call("a", Value::Null).await.expect("first");
    client.disconnect();
    let payload = client.call("b", Value::Null).await.expect("after disconnect");

    assert_eq!(payload["method"], "b");
    assert_eq!(gateway.connections(), 2);
    let connects = gateway.methods().iter().filter(|m| *m == "connect").count();
    assert_eq!(connects, 2, "fresh handshake on the new socket");
}

#[tokio::test]
async fn gateway_close_fails_pending_and_next_call_reconnects() {
    let gateway = FakeGateway::start(|method, _| match method {
        "hang" => Reply::Silent,
        "drop" => Reply::Close,
        m => Reply::Ok(json!(m)),
    })
    .await;
    let client = gateway.client();

    let hang = {
        let client = client.clone();
        tokio::spawn(async move { client.call("hang", Value::Null).await })
    };
    wait_for_pending(&client, 1).await;

    let err = client.call("drop", Value::Null).await.unwrap_err();
    assert_eq!(err, closed());
    assert_eq!(hang.await.expect("join"), Err(closed()));
    assert_eq!(client.pending_requests(), 0);

    let payload = client.call("again", Value::Null).await.expect("reconnected");
    assert_eq!(payload, json!("again"));
    assert_eq!(gateway.connections(), 2);
}

#[tokio::test]
async fn dropped_caller_leaves_no_pending_entry() {
    let gateway = FakeGateway::start(|_, _| Reply::Silent).await;
    let client = gateway.client();
    client.connection().ensure_connected().await.expect("connect");

    let call = {
        let client = client.clone();
        tokio::spawn(async move { client.call("hang", Value::Null).await })
    };
    wait_for_pending(&client, 1).await;
    call.abort();
    let _ = call.await;

    assert_eq!(client.pending_requests(), 0);
    assert!(client.is_connected().await);
}
