//! Connection Supervisor
//!
//! Owns the client lifecycle. One lifecycle attempt opens a stream session,
//! authenticates it, and runs the listening loop, the heartbeat monitor and
//! the dispatch loop as one task group. When any of them exits the others
//! are torn down and the exit is classified:
//!
//! | Exit                                           | Recovery                 |
//! |------------------------------------------------|--------------------------|
//! | clean remote close                             | restart immediately      |
//! | setup timeout, handshake, decode, keep-alive   | restart after backoff    |
//! | anything else                                  | fatal unless restartable |
//!
//! Shutdown is coordinated through [`ConnectionSupervisor::close`]: intake
//! stops, the heartbeat monitor stops, the dispatch queue drains (or is
//! cancelled when forced), then the socket and the request transport close.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use super::codec::CodecError;
use super::dispatch::{DispatchError, DispatchQueue, HandlerRegistry, in_handler};
use super::heartbeat::{HeartbeatMonitor, KeepAliveError};
use super::reconnect::{BackoffConfig, RestartBackoff};
use super::session::{HandshakeFailure, ListenExit, StreamSession, StreamSessionError};
use crate::application::ports::{HttpError, RequestTransport};
use crate::domain::cache::ClientCache;
use crate::domain::connection::ConnectionState;
use crate::domain::credentials::{CredentialError, Token};
use crate::domain::entities::{EntityError, User, response_data};
use crate::domain::envelope::Envelope;
use crate::infrastructure::config::{ClientConfig, GatewaySettings, ReconnectSettings};
use crate::infrastructure::metrics::{self, RestartReason};

// =============================================================================
// Errors
// =============================================================================

/// Why a single lifecycle attempt ended.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    /// The server closed the session.
    #[error("session closed by server")]
    RemoteClosed,

    /// The session could not be set up in time.
    #[error("session setup timed out after {0:?}")]
    SetupTimeout(Duration),

    /// The handshake was malformed or missing.
    #[error("handshake failed: {0}")]
    Handshake(#[source] HandshakeFailure),

    /// An inbound frame could not be decoded.
    #[error("decode failed: {0}")]
    Decode(#[source] CodecError),

    /// The heartbeat monitor failed.
    #[error("keep-alive failed: {0}")]
    KeepAlive(#[source] KeepAliveError),

    /// The socket failed.
    #[error("transport failed: {0}")]
    Transport(#[source] StreamSessionError),

    /// A task of the group returned without being asked to.
    #[error("{0} ended unexpectedly")]
    TaskEnded(&'static str),

    /// A task of the group panicked or was aborted.
    #[error("task failed: {0}")]
    TaskPanicked(String),
}

/// How the supervisor reacts to an [`AttemptError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Start the next attempt right away.
    Immediate,
    /// Start the next attempt after the backoff delay.
    Backoff,
    /// Fatal unless restarts are allowed, then as [`Recovery::Backoff`].
    Unexpected,
}

impl AttemptError {
    fn from_session(error: StreamSessionError) -> Self {
        match error {
            StreamSessionError::Handshake(HandshakeFailure::TimedOut(timeout)) => {
                Self::SetupTimeout(timeout)
            }
            StreamSessionError::Handshake(failure) => Self::Handshake(failure),
            StreamSessionError::Decode(e) => Self::Decode(e),
            other => Self::Transport(other),
        }
    }

    fn from_task(joined: Result<TaskExit, JoinError>) -> Self {
        match joined {
            Err(e) => Self::TaskPanicked(e.to_string()),
            Ok(TaskExit::Listen(Ok(ListenExit::RemoteClosed))) => Self::RemoteClosed,
            Ok(TaskExit::Listen(Ok(_))) => Self::TaskEnded("listening loop"),
            Ok(TaskExit::Listen(Err(e))) => Self::from_session(e),
            Ok(TaskExit::Heartbeat(Ok(()))) => Self::TaskEnded("heartbeat monitor"),
            Ok(TaskExit::Heartbeat(Err(e))) => Self::KeepAlive(e),
            Ok(TaskExit::Dispatch(_)) => Self::TaskEnded("dispatch loop"),
        }
    }

    /// Recovery for this exit.
    #[must_use]
    pub const fn recovery(&self) -> Recovery {
        match self {
            Self::RemoteClosed => Recovery::Immediate,
            Self::SetupTimeout(_) | Self::Handshake(_) | Self::Decode(_) | Self::KeepAlive(_) => {
                Recovery::Backoff
            }
            Self::Transport(_) | Self::TaskEnded(_) | Self::TaskPanicked(_) => {
                Recovery::Unexpected
            }
        }
    }

    /// Metric label for this exit.
    #[must_use]
    pub const fn restart_reason(&self) -> RestartReason {
        match self {
            Self::RemoteClosed => RestartReason::RemoteClose,
            Self::SetupTimeout(_) => RestartReason::Timeout,
            Self::Handshake(_) => RestartReason::Handshake,
            Self::Decode(_) => RestartReason::Decode,
            Self::KeepAlive(_) => RestartReason::KeepAlive,
            Self::Transport(_) | Self::TaskEnded(_) | Self::TaskPanicked(_) => {
                RestartReason::Transport
            }
        }
    }
}

/// Fatal lifecycle failures.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The request transport failed while opening.
    #[error("request transport failed: {0}")]
    RequestTransport(#[source] HttpError),

    /// An attempt failed and restarts are disabled.
    #[error("session failed: {0}")]
    Attempt(#[source] AttemptError),

    /// The restart budget is spent.
    #[error("gave up after {attempts} failed attempts: {last}")]
    RetriesExhausted {
        /// Consecutive failed attempts.
        attempts: u32,
        /// Exit of the last attempt.
        #[source]
        last: AttemptError,
    },

    /// `/users/@me` did not return a usable user.
    #[error("invalid client identity: {0}")]
    Identity(#[source] EntityError),
}

/// Errors returned by the supervisor.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The token is malformed. Nothing was sent.
    #[error("invalid credential: {0}")]
    InvalidCredential(#[from] CredentialError),

    /// The API rejected the token.
    #[error("authentication failed: {0}")]
    Authentication(#[source] HttpError),

    /// The lifecycle failed.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// `connect` is already running.
    #[error("connection is already running")]
    AlreadyRunning,

    /// No stream session is open.
    #[error("no open stream session")]
    NotConnected,

    /// An outbound frame could not be sent.
    #[error("failed to send frame: {0}")]
    Send(#[source] StreamSessionError),
}

// =============================================================================
// Connection State
// =============================================================================

/// Single-writer cell holding the [`ConnectionState`].
#[derive(Debug)]
pub struct ConnectionStateCell(watch::Sender<ConnectionState>);

impl Default for ConnectionStateCell {
    fn default() -> Self {
        Self(watch::channel(ConnectionState::Closed).0)
    }
}

impl ConnectionStateCell {
    /// Create a cell in [`ConnectionState::Closed`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn get(&self) -> ConnectionState {
        *self.0.borrow()
    }

    /// Receiver notified on every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.0.subscribe()
    }

    /// Move to `next` if the transition is allowed. Returns whether it
    /// happened.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut previous = None;
        self.0.send_if_modified(|state| {
            if state.can_transition_to(next) {
                previous = Some(*state);
                *state = next;
                true
            } else {
                false
            }
        });

        match previous {
            Some(previous) => {
                metrics::set_connection_state(next);
                tracing::debug!(from = %previous, to = %next, "Connection state changed");
                true
            }
            None => false,
        }
    }
}

// =============================================================================
// Supervisor
// =============================================================================

#[derive(Debug, Clone, Default)]
struct ShutdownSignal {
    graceful: CancellationToken,
    force: CancellationToken,
}

enum TaskExit {
    Listen(Result<ListenExit, StreamSessionError>),
    Heartbeat(Result<(), KeepAliveError>),
    Dispatch(Result<(), DispatchError>),
}

/// Everything belonging to one lifecycle attempt. Discarded on restart.
struct SessionHandle {
    session: Arc<StreamSession>,
    queue: Arc<DispatchQueue>,
    heartbeat: Arc<HeartbeatMonitor>,
    listening: CancellationToken,
    tasks: JoinSet<TaskExit>,
}

impl SessionHandle {
    fn new(session: Arc<StreamSession>, gateway: &GatewaySettings, registry: Arc<HandlerRegistry>) -> Self {
        let heartbeat = HeartbeatMonitor::new(
            Arc::new(session.writer()),
            session.handshake().heartbeat_interval,
        );
        Self {
            queue: Arc::new(DispatchQueue::new(
                gateway.dispatch_mode,
                gateway.dispatch_capacity,
                registry,
            )),
            heartbeat: Arc::new(heartbeat),
            listening: CancellationToken::new(),
            tasks: JoinSet::new(),
            session,
        }
    }

    fn spawn(&mut self) {
        let session = Arc::clone(&self.session);
        let queue = Arc::clone(&self.queue);
        let listening = self.listening.clone();
        self.tasks.spawn(async move {
            TaskExit::Listen(session.listening_loop(&queue, &listening).await)
        });

        let heartbeat = Arc::clone(&self.heartbeat);
        self.tasks
            .spawn(async move { TaskExit::Heartbeat(heartbeat.run().await) });

        let queue = Arc::clone(&self.queue);
        self.tasks
            .spawn(async move { TaskExit::Dispatch(queue.run().await) });
    }

    /// Stop reading, stop the heartbeat, drain or cancel handlers, close
    /// the socket.
    async fn teardown(mut self, drain_timeout: Duration, force: &CancellationToken) {
        self.listening.cancel();
        self.heartbeat.stop().await;

        let drained = tokio::select! {
            biased;
            () = force.cancelled() => false,
            stopped = tokio::time::timeout(drain_timeout, self.queue.stop(false)) => stopped.is_ok(),
        };
        if !drained {
            tracing::debug!(pending = self.queue.pending(), "Cancelling event handlers");
            self.queue.stop(true).await;
        }

        self.session.close().await;
        self.tasks.shutdown().await;
    }
}

/// Supervises the connection lifecycle.
pub struct ConnectionSupervisor {
    transport: Arc<dyn RequestTransport>,
    gateway: GatewaySettings,
    reconnect: ReconnectSettings,
    token_lengths: Vec<usize>,
    registry: Arc<HandlerRegistry>,
    cache: Arc<ClientCache>,
    state: ConnectionStateCell,
    control: Mutex<Option<ShutdownSignal>>,
    session: RwLock<Option<Arc<StreamSession>>>,
    client_user: RwLock<Option<Arc<User>>>,
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("state", &self.state.get())
            .field("endpoint", &self.gateway.endpoint)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ConnectionSupervisor {
    /// Create a supervisor. Nothing connects until [`connect`](Self::connect).
    #[must_use]
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn RequestTransport>,
        registry: Arc<HandlerRegistry>,
        cache: Arc<ClientCache>,
    ) -> Self {
        Self {
            transport,
            gateway: config.gateway.clone(),
            reconnect: config.reconnect.clone(),
            token_lengths: config.tokens.accepted_lengths(),
            registry,
            cache,
            state: ConnectionStateCell::new(),
            control: Mutex::new(None),
            session: RwLock::new(None),
            client_user: RwLock::new(None),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Receiver notified on every state transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The authenticated user, once the request transport is open.
    #[must_use]
    pub fn client_user(&self) -> Option<Arc<User>> {
        self.client_user.read().clone()
    }

    /// Run the lifecycle until [`close`](Self::close) is called.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::InvalidCredential`] before any network call
    /// - [`ConnectionError::Authentication`] when the API rejects the token
    /// - [`ConnectionError::Session`] on any other fatal failure
    /// - [`ConnectionError::AlreadyRunning`] if a lifecycle is running
    pub async fn connect(&self, token: &str, allow_restart: bool) -> Result<(), ConnectionError> {
        let token = Token::parse(token, &self.token_lengths)?;
        let lifecycle = self.claim()?;

        let result = self
            .run_lifecycle(&token, allow_restart, &lifecycle.signal)
            .await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "Connection failed");
        }

        lifecycle.finish().await;
        tracing::info!("Connection closed");
        result
    }

    /// Request shutdown.
    ///
    /// With `force`, running handlers are cancelled; otherwise they and the
    /// already buffered envelopes finish before the socket closes. Waits
    /// for the lifecycle to reach `CLOSED` unless called from a handler.
    pub async fn close(&self, force: bool) {
        let signal = {
            let control = self.control.lock();
            let Some(signal) = control.clone() else {
                tracing::debug!("Close requested with no running connection");
                return;
            };
            self.state.transition(ConnectionState::Closing);
            signal
        };

        tracing::info!(force, "Closing connection");
        if force {
            signal.force.cancel();
        }
        signal.graceful.cancel();

        if in_handler() {
            return;
        }
        let mut state = self.state.subscribe();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Closed)
            .await;
    }

    /// Send an envelope on the open session.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] without a session, or
    /// [`ConnectionError::Send`] if the write fails.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        let session = self.current_session()?;
        session.send(envelope).await.map_err(ConnectionError::Send)
    }

    /// Re-send the `AUTH` frame on the open session.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NotConnected`] without a session, or
    /// [`ConnectionError::Send`] if the write fails.
    pub async fn send_auth(&self) -> Result<(), ConnectionError> {
        let session = self.current_session()?;
        session.send_auth().await.map_err(ConnectionError::Send)
    }

    fn current_session(&self) -> Result<Arc<StreamSession>, ConnectionError> {
        self.session
            .read()
            .clone()
            .ok_or(ConnectionError::NotConnected)
    }

    fn claim(&self) -> Result<Lifecycle<'_>, ConnectionError> {
        let mut control = self.control.lock();
        if control.is_some() {
            return Err(ConnectionError::AlreadyRunning);
        }
        let signal = ShutdownSignal::default();
        *control = Some(signal.clone());
        self.state.transition(ConnectionState::Opening);
        Ok(Lifecycle {
            supervisor: self,
            signal,
            transport_closed: false,
        })
    }

    /// Forget the running lifecycle and publish `CLOSED`. The control slot
    /// stays locked until `CLOSED` is visible, so a caller woken by it can
    /// claim a new lifecycle.
    fn release(&self) {
        self.session.write().take();
        let mut control = self.control.lock();
        control.take();
        self.state.transition(ConnectionState::Closing);
        self.state.transition(ConnectionState::Closed);
    }

    async fn run_lifecycle(
        &self,
        token: &Token,
        allow_restart: bool,
        signal: &ShutdownSignal,
    ) -> Result<(), ConnectionError> {
        let identity = tokio::select! {
            biased;
            () = signal.graceful.cancelled() => return Ok(()),
            identity = self.transport.connect(token) => identity,
        };
        let identity = identity.map_err(|e| {
            if e.is_auth_failure() {
                ConnectionError::Authentication(e)
            } else {
                SessionError::RequestTransport(e).into()
            }
        })?;

        let user = User::full(response_data(&identity)).map_err(SessionError::Identity)?;
        tracing::info!(user_id = %user.id(), username = %user.username(), "Request transport open");
        self.cache.users.put(user.id().to_owned(), user.clone());
        *self.client_user.write() = Some(Arc::new(user));

        let mut backoff = RestartBackoff::new(BackoffConfig::from_settings(&self.reconnect));
        let mut attempt: u64 = 0;

        loop {
            attempt += 1;
            metrics::record_lifecycle_attempt();
            tracing::debug!(attempt, "Starting session attempt");

            let Err(error) = self
                .run_attempt(token, allow_restart, signal, &mut backoff)
                .await
            else {
                return Ok(());
            };
            if signal.graceful.is_cancelled() {
                return Ok(());
            }
            metrics::record_restart(error.restart_reason());

            let delay = match error.recovery() {
                Recovery::Immediate => {
                    tracing::info!(attempt, reason = %error, "Restarting session");
                    Duration::ZERO
                }
                Recovery::Unexpected if !allow_restart => {
                    return Err(SessionError::Attempt(error).into());
                }
                Recovery::Backoff | Recovery::Unexpected => {
                    let Some(delay) = backoff.next_delay() else {
                        return Err(SessionError::RetriesExhausted {
                            attempts: backoff.failures(),
                            last: error,
                        }
                        .into());
                    };
                    tracing::warn!(
                        attempt,
                        error = %error,
                        delay_ms = delay.as_millis(),
                        "Session failed, restarting after backoff"
                    );
                    delay
                }
            };

            tokio::select! {
                biased;
                () = signal.graceful.cancelled() => return Ok(()),
                () = tokio::time::sleep(delay) => {}
            }
            self.state.transition(ConnectionState::Opening);
        }
    }

    /// One attempt. `Ok` only when shutdown was requested.
    async fn run_attempt(
        &self,
        token: &Token,
        allow_restart: bool,
        signal: &ShutdownSignal,
        backoff: &mut RestartBackoff,
    ) -> Result<(), AttemptError> {
        let created = tokio::select! {
            biased;
            () = signal.graceful.cancelled() => return Ok(()),
            created = StreamSession::create(
                token.clone(),
                &self.gateway.endpoint,
                self.gateway.setup_timeout,
                self.gateway.log_frames,
            ) => created,
        };
        let session = Arc::new(created.map_err(AttemptError::from_session)?);
        *self.session.write() = Some(Arc::clone(&session));

        let drain_timeout = session
            .handshake()
            .close_timeout
            .unwrap_or(self.gateway.close_timeout);
        let mut handle = SessionHandle::new(session, &self.gateway, Arc::clone(&self.registry));

        let result = self.supervise(&mut handle, signal, backoff).await;
        if let Err(error) = &result
            && error.recovery() == Recovery::Unexpected
            && !allow_restart
        {
            self.state.transition(ConnectionState::Closing);
        }
        handle.teardown(drain_timeout, &signal.force).await;
        self.session.write().take();
        result
    }

    async fn supervise(
        &self,
        handle: &mut SessionHandle,
        signal: &ShutdownSignal,
        backoff: &mut RestartBackoff,
    ) -> Result<(), AttemptError> {
        let mut authenticated = handle.session.authenticated();
        handle
            .session
            .send_auth()
            .await
            .map_err(AttemptError::from_session)?;
        handle.spawn();

        let mut awaiting_ack = true;
        loop {
            tokio::select! {
                biased;
                () = signal.graceful.cancelled() => return Ok(()),
                acked = async { authenticated.wait_for(|acked| *acked).await.is_ok() }, if awaiting_ack => {
                    awaiting_ack = false;
                    if acked && self.state.transition(ConnectionState::Open) {
                        backoff.reset();
                        tracing::info!("Swarm session open");
                    }
                }
                Some(joined) = handle.tasks.join_next() => {
                    return Err(AttemptError::from_task(joined));
                }
            }
        }
    }
}

/// A claimed lifecycle. Dropping it, including when the `connect` future
/// is dropped mid-flight, stops the attempt and returns the supervisor to
/// `CLOSED`.
struct Lifecycle<'a> {
    supervisor: &'a ConnectionSupervisor,
    signal: ShutdownSignal,
    transport_closed: bool,
}

impl Lifecycle<'_> {
    async fn finish(mut self) {
        self.supervisor.transport.close().await;
        self.transport_closed = true;
    }
}

impl Drop for Lifecycle<'_> {
    fn drop(&mut self) {
        self.signal.force.cancel();
        self.signal.graceful.cancel();

        if !self.transport_closed {
            tracing::warn!("Connection abandoned before shutdown completed");
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let transport = Arc::clone(&self.supervisor.transport);
                runtime.spawn(async move { transport.close().await });
            }
        }
        self.supervisor.release();
    }
}
