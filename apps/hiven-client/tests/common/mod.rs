//! Shared fixtures: an in-process swarm and a mocked REST API.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use hiven_client::ClientConfig;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Token accepted by every fixture.
pub const TOKEN: &str = "integration-test-token";

/// Instruction pushed to every open swarm connection.
#[derive(Debug, Clone)]
pub enum SwarmCommand {
    /// Send a JSON frame.
    Frame(Value),
    /// Send a WebSocket close frame.
    Close,
    /// Drop the TCP connection without a close frame.
    Drop,
}

/// Swarm stand-in: sends the handshake, acknowledges `AUTH`, counts
/// heartbeats, and relays commands to the connected client.
pub struct MockSwarm {
    endpoint: String,
    connections: Arc<AtomicUsize>,
    heartbeats: Arc<AtomicUsize>,
    commands: broadcast::Sender<SwarmCommand>,
}

impl MockSwarm {
    /// Start listening with the given heartbeat interval in milliseconds.
    pub async fn start(heartbeat_ms: u64) -> Self {
        Self::launch(heartbeat_ms, false).await
    }

    /// Like [`start`](Self::start), but sends `AUTH_ACK` right behind the
    /// handshake instead of waiting for `AUTH`.
    pub async fn start_eager(heartbeat_ms: u64) -> Self {
        Self::launch(heartbeat_ms, true).await
    }

    async fn launch(heartbeat_ms: u64, eager_ack: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("ws://{}/socket", listener.local_addr().unwrap());
        let connections = Arc::new(AtomicUsize::new(0));
        let heartbeats = Arc::new(AtomicUsize::new(0));
        let (commands, _) = broadcast::channel(64);

        tokio::spawn({
            let connections = Arc::clone(&connections);
            let heartbeats = Arc::clone(&heartbeats);
            let commands = commands.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    let heartbeats = Arc::clone(&heartbeats);
                    let commands = commands.subscribe();
                    tokio::spawn(async move {
                        if let Ok(socket) = tokio_tungstenite::accept_async(stream).await {
                            let options = Serve {
                                heartbeat_ms,
                                eager_ack,
                                heartbeats,
                            };
                            serve(socket, options, commands).await;
                        }
                    });
                }
            }
        });

        Self {
            endpoint,
            connections,
            heartbeats,
            commands,
        }
    }

    /// WebSocket URL of the swarm.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// `HEARTBEAT` frames received from clients so far.
    pub fn heartbeats(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }

    /// Relay `command` to every open connection.
    pub fn send(&self, command: SwarmCommand) {
        let _ = self.commands.send(command);
    }

    /// Push an event frame.
    pub fn event(&self, name: &str, payload: Value) {
        self.send(SwarmCommand::Frame(json!({"op": 0, "e": name, "d": payload})));
    }
}

struct Serve {
    heartbeat_ms: u64,
    eager_ack: bool,
    heartbeats: Arc<AtomicUsize>,
}

async fn serve(
    mut socket: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    options: Serve,
    mut commands: broadcast::Receiver<SwarmCommand>,
) {
    let ack = json!({"op": 3, "d": {}});
    let hello = json!({"op": 1, "d": {"hbt_int": options.heartbeat_ms}});
    if socket.send(Message::Text(hello.to_string().into())).await.is_err() {
        return;
    }
    if options.eager_ack && socket.send(Message::Text(ack.to_string().into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            inbound = socket.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    let frame: Value = serde_json::from_str(text.as_str()).unwrap_or_default();
                    if frame["op"] == 1 {
                        options.heartbeats.fetch_add(1, Ordering::SeqCst);
                    } else if frame["op"] == 2 && !options.eager_ack {
                        let _ = socket.send(Message::Text(ack.to_string().into())).await;
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            },
            command = commands.recv() => match command {
                Ok(SwarmCommand::Frame(frame)) => {
                    let _ = socket.send(Message::Text(frame.to_string().into())).await;
                }
                Ok(SwarmCommand::Close) => {
                    let _ = socket.close(None).await;
                    return;
                }
                Ok(SwarmCommand::Drop) | Err(_) => return,
            },
        }
    }
}

/// Mock REST API answering `/users/@me` for [`TOKEN`].
pub async fn mock_api() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/@me"))
        .and(header("Authorization", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": {"id": "1", "username": "tester", "name": "Tester"},
        })))
        .mount(&server)
        .await;
    server
}

/// Client configuration pointing at the fixtures.
pub fn config(api: &MockServer, swarm: &MockSwarm, overrides: &[(&str, &str)]) -> ClientConfig {
    let token_len = TOKEN.len().to_string();
    let mut vars: HashMap<String, String> = [
        ("HIVEN_API_URL", api.uri()),
        ("WS_ENDPOINT", swarm.endpoint().to_string()),
        ("WS_SETUP_TIMEOUT", "2".to_string()),
        ("WS_CLOSE_TIMEOUT", "2".to_string()),
        ("USER_TOKEN_LEN", token_len.clone()),
        ("BOT_TOKEN_LEN", token_len),
        ("HIVEN_RECONNECT_DELAY_INITIAL_MS", "10".to_string()),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect();
    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    ClientConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// Poll `condition` until it holds, failing after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met within 2s");
}
