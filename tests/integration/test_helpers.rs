//! Shared helpers for gateway integration tests.
//!
//! [`FakeGateway`] is a scripted WebSocket server on an ephemeral loopback
//! port. It speaks the gateway's frame protocol: it pushes the
//! `connect.challenge` event when a client connects, answers `connect`, and
//! answers every other method through a test-supplied responder.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use gateway_console::config::{GatewayConfig, TimeoutConfig};
use gateway_console::GatewayClient;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// How the fake gateway answers one request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `{"ok": true, "payload": ...}`
    Ok(Value),
    /// `{"ok": false, "error": {"message": ...}}`
    Fail(String),
    /// Never answer.
    Silent,
    /// Send these raw texts in order. `{id}` is replaced with the request id.
    Raw(Vec<String>),
    /// Wait, then reply.
    Delayed(Duration, Box<Reply>),
    /// Close the socket instead of answering.
    Close,
}

type Responder = Arc<dyn Fn(&str, &Value) -> Reply + Send + Sync>;

/// Handshake behaviour of the fake gateway.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Push the challenge event on connect.
    pub send_challenge: bool,
    /// Delay before the challenge.
    pub challenge_delay: Duration,
    /// Answer to the `connect` request.
    pub connect_reply: Reply,
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            send_challenge: true,
            challenge_delay: Duration::ZERO,
            connect_reply: Reply::Ok(json!({"type": "hello-ok", "protocol": 3})),
        }
    }
}

/// Scripted gateway server. Stops when dropped.
pub struct FakeGateway {
    /// `ws://127.0.0.1:<port>`
    pub url: String,
    connections: Arc<AtomicUsize>,
    received: Arc<Mutex<Vec<Value>>>,
    ct: CancellationToken,
}

impl FakeGateway {
    /// Start a gateway that completes the handshake and answers through
    /// `responder`.
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        Self::start_with(Handshake::default(), responder).await
    }

    /// Start a gateway with custom handshake behaviour.
    pub async fn start_with<F>(handshake: Handshake, responder: F) -> Self
    where
        F: Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral");
        let addr = listener.local_addr().expect("local addr");

        let connections = Arc::new(AtomicUsize::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));
        let ct = CancellationToken::new();
        let responder: Responder = Arc::new(responder);

        {
            let connections = Arc::clone(&connections);
            let received = Arc::clone(&received);
            let ct = ct.clone();
            tokio::spawn(async move {
                loop {
                    let stream = tokio::select! {
                        () = ct.cancelled() => break,
                        accepted = listener.accept() => match accepted {
                            Ok((stream, _)) => stream,
                            Err(_) => break,
                        },
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve_connection(
                        stream,
                        handshake.clone(),
                        Arc::clone(&responder),
                        Arc::clone(&received),
                        ct.clone(),
                    ));
                }
            });
        }

        Self {
            url: format!("ws://{addr}"),
            connections,
            received,
            ct,
        }
    }

    /// Sockets accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Every request frame received, across all connections.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().expect("received lock").clone()
    }

    /// Methods received, in arrival order.
    pub fn methods(&self) -> Vec<String> {
        self.received()
            .iter()
            .filter_map(|f| f["method"].as_str().map(str::to_owned))
            .collect()
    }

    /// Stop accepting and close every open socket.
    pub fn shutdown(&self) {
        self.ct.cancel();
    }

    /// Client bound to this gateway with test-sized timeouts.
    pub fn client(&self) -> GatewayClient {
        self.client_with(test_timeouts())
    }

    /// Client bound to this gateway with the given timeouts.
    pub fn client_with(&self, timeouts: TimeoutConfig) -> GatewayClient {
        GatewayClient::with_settings(gateway_config(&self.url), timeouts)
    }
}

impl Drop for FakeGateway {
    fn drop(&mut self) {
        self.ct.cancel();
    }
}

/// Gateway settings pointing at `url` with a fixed test token.
pub fn gateway_config(url: &str) -> GatewayConfig {
    GatewayConfig {
        url: url.to_owned(),
        token: "test-token".into(),
        ..GatewayConfig::default()
    }
}

/// Short timeouts so timeout paths run in well under a second.
pub fn test_timeouts() -> TimeoutConfig {
    TimeoutConfig {
        rpc_ms: 2_000,
        handshake_ms: 500,
        connect_ms: 1_000,
    }
}

/// Answer `{"ok": true, "payload": {"method": <method>}}` to everything.
pub fn echo(method: &str, params: &Value) -> Reply {
    Reply::Ok(json!({ "method": method, "params": params }))
}

/// A URL nothing listens on.
pub async fn unused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("ws://{addr}")
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    handshake: Handshake,
    responder: Responder,
    received: Arc<Mutex<Vec<Value>>>,
    ct: CancellationToken,
) {
    let Ok(ws) = accept_async(stream).await else {
        return;
    };
    let (mut sink, mut source) = ws.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Option<String>>();

    // Single writer; `None` closes the socket.
    let writer_ct = ct.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = writer_ct.cancelled() => {
                    let _ = sink.close().await;
                    break;
                }
                next = rx.recv() => match next {
                    Some(Some(text)) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(None) | None => {
                        let _ = sink.close().await;
                        break;
                    }
                },
            }
        }
    });

    if handshake.send_challenge {
        let tx = tx.clone();
        let delay = handshake.challenge_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let challenge = json!({
                "type": "event",
                "event": "connect.challenge",
                "payload": {"nonce": "n-1", "ts": 0}
            });
            let _ = tx.send(Some(challenge.to_string()));
        });
    }

    loop {
        let msg = tokio::select! {
            () = ct.cancelled() => break,
            msg = source.next() => msg,
        };
        let text = match msg {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
            Some(Ok(_)) => continue,
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        received.lock().expect("received lock").push(frame.clone());

        let id = frame["id"].as_str().unwrap_or_default().to_owned();
        let method = frame["method"].as_str().unwrap_or_default().to_owned();
        let reply = if method == "connect" {
            handshake.connect_reply.clone()
        } else {
            responder(&method, &frame["params"])
        };
        tokio::spawn(send_reply(tx.clone(), id, reply));
    }
}

async fn send_reply(tx: mpsc::UnboundedSender<Option<String>>, id: String, mut reply: Reply) {
    while let Reply::Delayed(delay, inner) = reply {
        tokio::time::sleep(delay).await;
        reply = *inner;
    }
    let texts = match reply {
        Reply::Ok(payload) => {
            vec![json!({"type": "res", "id": id, "ok": true, "payload": payload}).to_string()]
        }
        Reply::Fail(message) => vec![json!({
            "type": "res",
            "id": id,
            "ok": false,
            "error": {"message": message}
        })
        .to_string()],
        Reply::Raw(texts) => texts.into_iter().map(|t| t.replace("{id}", &id)).collect(),
        Reply::Close => {
            let _ = tx.send(None);
            return;
        }
        Reply::Silent | Reply::Delayed(..) => Vec::new(),
    };
    for text in texts {
        let _ = tx.send(Some(text));
    }
}
