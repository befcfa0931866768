//! Stream Session
//!
//! One WebSocket connection to the swarm: the handshake, the auth frame, and
//! the listening loop feeding the dispatch queue. A session belongs to a
//! single lifecycle attempt and is never reused.
//!
//! Writes go through [`SessionWriter`], which serializes the socket sink
//! behind an async mutex shared with the heartbeat monitor. Reads are owned
//! by the listening loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::codec::{CodecError, EnvelopeCodec};
use super::dispatch::DispatchQueue;
use crate::domain::credentials::Token;
use crate::domain::envelope::{Envelope, Handshake, OpCode};
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

// =============================================================================
// Errors
// =============================================================================

/// The server did not produce a usable handshake.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeFailure {
    /// No handshake frame arrived in time.
    #[error("no handshake within {0:?}")]
    TimedOut(Duration),

    /// The first frame was not a valid handshake.
    #[error("malformed handshake: {0}")]
    Malformed(String),

    /// The connection closed before the handshake.
    #[error("connection closed before handshake")]
    Closed,
}

/// Stream session errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamSessionError {
    /// Handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeFailure),

    /// An inbound frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] CodecError),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The stream ended without a close frame.
    #[error("stream ended unexpectedly")]
    Closed,
}

/// Why a listening loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenExit {
    /// The server closed the session.
    RemoteClosed,
    /// The loop was cancelled.
    Cancelled,
    /// The dispatch queue stopped accepting envelopes.
    QueueStopped,
}

// =============================================================================
// Writer
// =============================================================================

/// Destination for outbound envelopes.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Encode and send one envelope.
    async fn send_envelope(&self, envelope: &Envelope) -> Result<(), StreamSessionError>;
}

/// Shared, serialized write half of a session.
#[derive(Clone)]
pub struct SessionWriter {
    sink: Arc<Mutex<WsSink>>,
    codec: EnvelopeCodec,
    log_frames: bool,
}

impl std::fmt::Debug for SessionWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionWriter")
            .field("log_frames", &self.log_frames)
            .finish_non_exhaustive()
    }
}

impl SessionWriter {
    /// Encode and send an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the socket write fails.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), StreamSessionError> {
        let text = self.codec.encode(envelope)?;
        if self.log_frames {
            if envelope.opcode() == OpCode::Auth {
                tracing::trace!(op = %envelope.opcode(), "-> [auth frame redacted]");
            } else {
                tracing::trace!(frame = %text, "-> frame");
            }
        }
        self.sink.lock().await.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), tungstenite::Error> {
        self.sink.lock().await.close().await
    }
}

#[async_trait]
impl FrameSink for SessionWriter {
    async fn send_envelope(&self, envelope: &Envelope) -> Result<(), StreamSessionError> {
        self.send(envelope).await
    }
}

// =============================================================================
// Session
// =============================================================================

/// An open swarm session.
pub struct StreamSession {
    writer: SessionWriter,
    reader: Mutex<Option<WsReader>>,
    handshake: Handshake,
    token: Token,
    codec: EnvelopeCodec,
    log_frames: bool,
    authenticated: watch::Sender<bool>,
    closed: AtomicBool,
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("handshake", &self.handshake)
            .field("authenticated", &*self.authenticated.borrow())
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl StreamSession {
    /// Open a connection to `endpoint` and wait for the handshake frame.
    ///
    /// The whole setup is bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamSessionError::Handshake`] if the handshake is
    /// malformed, the connection closes first, or `timeout` elapses, and
    /// [`StreamSessionError::WebSocket`] if the connection cannot be opened.
    pub async fn create(
        token: Token,
        endpoint: &str,
        timeout: Duration,
        log_frames: bool,
    ) -> Result<Self, StreamSessionError> {
        match tokio::time::timeout(timeout, Self::open(token, endpoint, log_frames)).await {
            Ok(result) => result,
            Err(_) => Err(HandshakeFailure::TimedOut(timeout).into()),
        }
    }

    async fn open(
        token: Token,
        endpoint: &str,
        log_frames: bool,
    ) -> Result<Self, StreamSessionError> {
        tracing::debug!(endpoint, "Opening swarm session");
        let (stream, _response) = tokio_tungstenite::connect_async(endpoint).await?;
        let (sink, mut reader) = stream.split();
        let codec = EnvelopeCodec::new();

        let text = match next_text(&mut reader).await {
            Ok(Some(text)) => text,
            Ok(None) | Err(StreamSessionError::Closed) => {
                return Err(HandshakeFailure::Closed.into());
            }
            Err(e) => return Err(e),
        };
        if log_frames {
            tracing::trace!(frame = %text, "<- handshake");
        }
        let handshake = codec
            .decode(&text)
            .and_then(|envelope| {
                metrics::record_envelope_received(envelope.opcode());
                codec.decode_handshake(&envelope)
            })
            .map_err(|e| HandshakeFailure::Malformed(e.to_string()))?;

        tracing::info!(
            heartbeat_ms = handshake.heartbeat_interval.as_millis(),
            close_timeout = ?handshake.close_timeout,
            "Swarm handshake received"
        );

        let (authenticated, _) = watch::channel(false);
        Ok(Self {
            writer: SessionWriter {
                sink: Arc::new(Mutex::new(sink)),
                codec: codec.clone(),
                log_frames,
            },
            reader: Mutex::new(Some(reader)),
            handshake,
            token,
            codec,
            log_frames,
            authenticated,
            closed: AtomicBool::new(false),
        })
    }

    /// Parameters announced by the server.
    #[must_use]
    pub const fn handshake(&self) -> Handshake {
        self.handshake
    }

    /// Shared write half, for the heartbeat monitor.
    #[must_use]
    pub fn writer(&self) -> SessionWriter {
        self.writer.clone()
    }

    /// Flips to `true` when the server acknowledges authentication.
    #[must_use]
    pub fn authenticated(&self) -> watch::Receiver<bool> {
        self.authenticated.subscribe()
    }

    /// Whether [`close`](Self::close) has not been called yet.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Send the `AUTH` frame. Does not wait for the acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written.
    pub async fn send_auth(&self) -> Result<(), StreamSessionError> {
        tracing::debug!("Sending auth frame");
        self.send(&Envelope::auth(self.token.expose())).await
    }

    /// Send an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is closed or the write fails.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), StreamSessionError> {
        if !self.is_open() {
            return Err(StreamSessionError::Closed);
        }
        self.writer.send(envelope).await
    }

    /// Read frames and feed `queue` until the session ends.
    ///
    /// Never waits for handlers, only for buffer capacity.
    ///
    /// # Errors
    ///
    /// Returns an error on a decode failure, a transport error, or when the
    /// stream ends without a close frame.
    pub async fn listening_loop(
        &self,
        queue: &DispatchQueue,
        cancel: &CancellationToken,
    ) -> Result<ListenExit, StreamSessionError> {
        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Err(StreamSessionError::Closed);
        };

        loop {
            let text = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(ListenExit::Cancelled),
                frame = next_text(reader) => match frame? {
                    Some(text) => text,
                    None => {
                        tracing::info!("Swarm closed the session");
                        return Ok(ListenExit::RemoteClosed);
                    }
                },
            };

            if self.log_frames {
                tracing::trace!(frame = %text, "<- frame");
            }
            let envelope = self.codec.decode(&text)?;
            let opcode = envelope.opcode();
            metrics::record_envelope_received(opcode);

            if opcode == OpCode::AuthAck {
                self.authenticated.send_replace(true);
            }

            let enqueued = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(ListenExit::Cancelled),
                result = queue.enqueue(envelope) => result,
            };
            if enqueued.is_err() {
                return Ok(ListenExit::QueueStopped);
            }

            if opcode == OpCode::Close {
                tracing::info!("Swarm sent CLOSE");
                return Ok(ListenExit::RemoteClosed);
            }
        }
    }

    /// Close the socket. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.writer.close().await {
            tracing::debug!(error = %e, "Error closing swarm socket");
        }
        tracing::debug!("Swarm session closed");
    }
}

/// Next text payload, skipping control frames. `None` on a close frame.
async fn next_text(reader: &mut WsReader) -> Result<Option<String>, StreamSessionError> {
    loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
            Some(Ok(Message::Binary(data))) => {
                return Ok(Some(String::from_utf8_lossy(&data).into_owned()));
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(frame = ?frame, "Received close frame");
                return Ok(None);
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => return Err(StreamSessionError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    use serde_json::{Value, json};
    use tokio::net::TcpListener;

    use crate::infrastructure::gateway::dispatch::{DispatchMode, HandlerRegistry};

    type ServerSocket = WebSocketStream<TcpStream>;

    /// Accept one connection and hand it to `script`.
    async fn serve<F, Fut>(script: F) -> SocketAddr
    where
        F: FnOnce(ServerSocket) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let socket = tokio_tungstenite::accept_async(stream).await.unwrap();
            script(socket).await;
        });
        addr
    }

    fn token() -> Token {
        Token::parse("secret", &[6]).unwrap()
    }

    fn url(addr: SocketAddr) -> String {
        format!("ws://{addr}/socket")
    }

    async fn send_json(socket: &mut ServerSocket, value: Value) {
        socket
            .send(Message::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_reads_handshake_and_sends_auth() {
        let (frames_tx, mut frames_rx) = tokio::sync::mpsc::unbounded_channel();
        let addr = serve(move |mut socket| async move {
            send_json(&mut socket, json!({"op": 1, "d": {"hbt_int": 30000, "close_timeout": 2000}})).await;
            while let Some(Ok(Message::Text(text))) = socket.next().await {
                let _ = frames_tx.send(text.as_str().to_owned());
            }
        })
        .await;

        let session = StreamSession::create(token(), &url(addr), Duration::from_secs(2), false)
            .await
            .unwrap();
        assert_eq!(
            session.handshake(),
            Handshake {
                heartbeat_interval: Duration::from_secs(30),
                close_timeout: Some(Duration::from_secs(2)),
            }
        );

        session.send_auth().await.unwrap();
        let frame: Value = serde_json::from_str(&frames_rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame, json!({"op": 2, "d": {"token": "secret"}}));

        session.close().await;
        session.close().await;
        assert!(!session.is_open());
        assert!(matches!(
            session.send(&Envelope::heartbeat()).await,
            Err(StreamSessionError::Closed)
        ));
    }

    #[tokio::test]
    async fn missing_handshake_times_out() {
        let addr = serve(|socket| async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(socket);
        })
        .await;

        let err = StreamSession::create(token(), &url(addr), Duration::from_millis(100), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamSessionError::Handshake(HandshakeFailure::TimedOut(_))
        ));
    }

    #[tokio::test]
    async fn malformed_handshake_is_rejected() {
        let addr = serve(|mut socket| async move {
            send_json(&mut socket, json!({"op": 0, "e": "READY", "d": {}})).await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        })
        .await;

        let err = StreamSession::create(token(), &url(addr), Duration::from_secs(2), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamSessionError::Handshake(HandshakeFailure::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn close_before_handshake_is_a_handshake_failure() {
        let addr = serve(|mut socket| async move {
            let _ = socket.close(None).await;
        })
        .await;

        let err = StreamSession::create(token(), &url(addr), Duration::from_secs(2), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamSessionError::Handshake(HandshakeFailure::Closed)
        ));
    }

    #[tokio::test]
    async fn listening_loop_feeds_queue_until_close_opcode() {
        let addr = serve(|mut socket| async move {
            send_json(&mut socket, json!({"op": 1, "d": {"hbt_int": 30000}})).await;
            send_json(&mut socket, json!({"op": 3, "d": {}})).await;
            send_json(&mut socket, json!({"op": 0, "e": "MESSAGE_CREATE", "d": {"n": 1}})).await;
            send_json(&mut socket, json!({"op": 0, "e": "MESSAGE_CREATE", "d": {"n": 2}})).await;
            send_json(&mut socket, json!({"op": 4, "d": {}})).await;
            tokio::time::sleep(Duration::from_millis(500)).await;
        })
        .await;

        let registry = Arc::new(HandlerRegistry::new());
        let queue = DispatchQueue::new(DispatchMode::Sequential, 16, Arc::clone(&registry));
        let session = StreamSession::create(token(), &url(addr), Duration::from_secs(2), false)
            .await
            .unwrap();
        let authenticated = session.authenticated();
        assert!(!*authenticated.borrow());

        let exit = session
            .listening_loop(&queue, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(exit, ListenExit::RemoteClosed);
        assert!(*authenticated.borrow());
        // AUTH_ACK, two events and CLOSE are buffered in arrival order.
        assert_eq!(queue.pending(), 4);
    }

    #[tokio::test]
    async fn listening_loop_stops_on_decode_failure() {
        let addr = serve(|mut socket| async move {
            send_json(&mut socket, json!({"op": 1, "d": {"hbt_int": 30000}})).await;
            socket.send(Message::Text("not json".into())).await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
        })
        .await;

        let queue = DispatchQueue::new(DispatchMode::Sequential, 4, Arc::new(HandlerRegistry::new()));
        let session = StreamSession::create(token(), &url(addr), Duration::from_secs(2), false)
            .await
            .unwrap();
        let err = session
            .listening_loop(&queue, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamSessionError::Decode(_)));
    }

    #[tokio::test]
    async fn listening_loop_honors_cancellation() {
        let addr = serve(|mut socket| async move {
            send_json(&mut socket, json!({"op": 1, "d": {"hbt_int": 30000}})).await;
            tokio::time::sleep(Duration::from_secs(2)).await;
        })
        .await;

        let queue = DispatchQueue::new(DispatchMode::Sequential, 4, Arc::new(HandlerRegistry::new()));
        let session = StreamSession::create(token(), &url(addr), Duration::from_secs(2), false)
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let exit = tokio::time::timeout(Duration::from_secs(1), session.listening_loop(&queue, &cancel))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, ListenExit::Cancelled);
    }
}
