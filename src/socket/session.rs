//! Chat session: one role, at most one connection at a time.
//!
//! A [`Session`] drives the whole lifecycle for either role:
//!
//! ```text
//!            open()                    accept/connect ok
//!   Idle ───────────▶ Listening ─────────────────────────▶ Connected
//!    ▲               / Connecting                              │
//!    │                    │ error                              │
//!    ├────────────────────┘                                    │
//!    └──────────────────────── close() ────────────────────────┘
//! ```
//!
//! User actions (`open`, `submit`, `close`) report every outcome through
//! [`SessionEvent`]s so a front end only has to render events. `open` and
//! `send` additionally return their error for programmatic callers.
//!
//! `Session` is a cheap `Clone` handle; all clones drive the same session
//! and may be used from any thread. Dropping the last handle closes it.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::connection::Connection;
use super::connector;
use super::endpoint::Endpoint;
use super::events::{Role, SessionEvent};
use super::framing::TextEncoding;
use super::listener::ChatListener;
use crate::error::ChatError;

/// Transport settings for one session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionConfig {
    /// Address the listener binds or the connector dials.
    pub endpoint: Endpoint,
    /// Encoding for outgoing text.
    pub encoding: TextEncoding,
    /// Upper bound on a connector's dial. `None` leaves it to the OS.
    pub connect_timeout: Option<Duration>,
}

impl SessionConfig {
    /// Settings for `endpoint` with default encoding and no connect timeout.
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            ..Self::default()
        }
    }
}

/// Handle to a chat session.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("role", &self.shared.role)
            .field("endpoint", &self.shared.config.endpoint)
            .finish_non_exhaustive()
    }
}

struct Shared {
    role: Role,
    config: SessionConfig,
    event_tx: UnboundedSender<SessionEvent>,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// Bumped by every open and close; background tasks from an older
    /// generation discard their result.
    generation: u64,
    phase: Phase,
}

#[derive(Default)]
enum Phase {
    #[default]
    Idle,
    Listening {
        local_addr: SocketAddr,
        accept_handle: JoinHandle<()>,
    },
    Connecting {
        connect_handle: JoinHandle<()>,
    },
    Connected(Connection),
}

impl Session {
    /// Create an idle session and the receiver for its events.
    pub fn new(role: Role, config: SessionConfig) -> (Self, UnboundedReceiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            role,
            config,
            event_tx,
            state: Mutex::new(State::default()),
        });
        (Self { shared }, event_rx)
    }

    /// Role this session plays.
    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Transport settings.
    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    /// Bound address while a listener is waiting for its peer.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.shared.lock().phase {
            Phase::Listening { local_addr, .. } => Some(*local_addr),
            _ => None,
        }
    }

    /// Whether a peer connection is established and still alive.
    pub fn is_connected(&self) -> bool {
        matches!(&self.shared.lock().phase, Phase::Connected(conn) if !conn.is_closed())
    }

    /// Whether the session is listening, connecting or connected.
    ///
    /// A connection the peer has ended still counts until [`Session::close`].
    pub fn is_active(&self) -> bool {
        !matches!(self.shared.lock().phase, Phase::Idle)
    }

    /// Start listening (listener role) or dialing (connector role).
    ///
    /// Returns once the listener is bound or the dial has started; the
    /// connection itself is reported by [`SessionEvent::Connected`].
    /// Failures are also reported as [`SessionEvent::Error`]; any failure
    /// other than [`ChatError::AlreadyActive`] leaves the session idle and
    /// emits [`SessionEvent::Disconnected`].
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ChatError::AlreadyActive`] if the session is not idle,
    /// [`ChatError::Bind`] if the listener cannot bind.
    pub fn open(&self) -> Result<(), ChatError> {
        let result = self.try_open();
        if let Err(err) = &result {
            log::warn!("[Session] Open failed: {err}");
            self.shared.emit(SessionEvent::from(err));
            if !matches!(err, ChatError::AlreadyActive) {
                self.shared.emit(SessionEvent::Disconnected);
            }
        }
        result
    }

    fn try_open(&self) -> Result<(), ChatError> {
        let shared = &self.shared;
        let mut state = shared.lock();
        if !matches!(state.phase, Phase::Idle) {
            return Err(ChatError::AlreadyActive);
        }
        state.generation += 1;
        let generation = state.generation;

        state.phase = match shared.role {
            Role::Listener => {
                let listener = ChatListener::bind(&shared.config.endpoint)?;
                let local_addr = listener.local_addr();
                shared.emit(SessionEvent::StatusChanged(format!(
                    "the server has been created and bound to port {}",
                    local_addr.port()
                )));
                let accept_handle =
                    tokio::spawn(accept_task(Arc::downgrade(shared), generation, listener));
                Phase::Listening {
                    local_addr,
                    accept_handle,
                }
            }
            Role::Connector => {
                let connect_handle = tokio::spawn(connect_task(
                    Arc::downgrade(shared),
                    generation,
                    shared.config.endpoint.clone(),
                    shared.config.connect_timeout,
                ));
                Phase::Connecting { connect_handle }
            }
        };

        log::info!("[Session] Opened {} session on {}", shared.role, shared.config.endpoint);
        Ok(())
    }

    /// Send `text` to the peer.
    ///
    /// Empty text is a no-op. Returns once the frame is queued for the
    /// connection's writer; write failures arrive as [`SessionEvent::Error`].
    ///
    /// # Errors
    ///
    /// [`ChatError::NotConnected`] without a connection,
    /// [`ChatError::FrameTooLarge`] if `text` does not fit in one frame,
    /// [`ChatError::Write`] if the writer has stopped.
    pub fn send(&self, text: &str) -> Result<(), ChatError> {
        if text.is_empty() {
            return Ok(());
        }
        match &self.shared.lock().phase {
            Phase::Connected(conn) => conn.send(text),
            _ => Err(ChatError::NotConnected),
        }
    }

    /// Submit the contents of an input buffer, clearing it.
    ///
    /// Returns `false` and leaves the buffer alone if it is empty. Send
    /// failures are reported as [`SessionEvent::Error`].
    pub fn submit(&self, input: &mut String) -> bool {
        if input.is_empty() {
            return false;
        }
        let text = std::mem::take(input);
        if let Err(err) = self.send(&text) {
            log::warn!("[Session] Send failed: {err}");
            self.shared.emit(SessionEvent::from(&err));
        }
        true
    }

    /// Close the connection, or stop listening/dialing.
    ///
    /// Idempotent and safe to call from any thread while the read loop is
    /// blocked. Emits [`SessionEvent::Disconnected`] if something was open.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Close like [`Session::close`], then wait up to `timeout` for messages
    /// already sent to be written out.
    pub async fn close_and_flush(&self, timeout: Duration) {
        let Some(mut conn) = self.shared.close() else {
            return;
        };
        if tokio::time::timeout(timeout, conn.flushed()).await.is_err() {
            log::warn!(
                "[Session] Gave up flushing to {} after {:?}",
                conn.peer_addr(),
                timeout
            );
        }
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Promote a freshly established stream to the session's connection.
    fn install(&self, generation: u64, stream: TcpStream, peer_addr: SocketAddr, status: &str) {
        let mut state = self.lock();
        let pending = matches!(
            state.phase,
            Phase::Listening { .. } | Phase::Connecting { .. }
        );
        if state.generation != generation || !pending {
            log::debug!("[Session] Discarding stale connection with {}", peer_addr);
            return;
        }

        // Announce before the read loop can report anything.
        self.emit(SessionEvent::StatusChanged(status.to_string()));
        self.emit(SessionEvent::Connected { peer_addr });

        let conn = Connection::new(stream, peer_addr, self.config.encoding, self.event_tx.clone());
        state.phase = Phase::Connected(conn);
        log::info!("[Session] Connected to {}", peer_addr);
    }

    /// Reset to idle after listen/connect failed.
    fn fail(&self, generation: u64, err: &ChatError) {
        {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            state.phase = Phase::Idle;
        }
        log::warn!("[Session] {err}");
        self.emit(SessionEvent::from(err));
        self.emit(SessionEvent::Disconnected);
    }

    /// Tear down whatever is open. A closed connection is handed back while
    /// its writer is still flushing.
    fn close(&self) -> Option<Connection> {
        let previous = {
            let mut state = self.lock();
            state.generation += 1;
            std::mem::take(&mut state.phase)
        };

        match previous {
            Phase::Idle => None,
            Phase::Listening { accept_handle, .. } => {
                // Dropping the listener inside the task closes the socket.
                accept_handle.abort();
                log::info!("[Session] Stopped listening");
                self.emit(SessionEvent::Disconnected);
                None
            }
            Phase::Connecting { connect_handle } => {
                connect_handle.abort();
                log::info!("[Session] Cancelled pending connect");
                self.emit(SessionEvent::Disconnected);
                None
            }
            Phase::Connected(mut conn) => {
                conn.close();
                Some(conn)
            }
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        self.close();
    }
}

/// Accept task: waits for the single peer, then stops listening.
async fn accept_task(shared: Weak<Shared>, generation: u64, listener: ChatListener) {
    let result = listener.accept().await;
    drop(listener);

    let Some(shared) = shared.upgrade() else {
        return;
    };
    match result {
        Ok((stream, peer_addr)) => {
            shared.install(generation, stream, peer_addr, "client socket has been accepted");
        }
        Err(err) => shared.fail(generation, &err),
    }
}

/// Connect task: dials the listener.
async fn connect_task(
    shared: Weak<Shared>,
    generation: u64,
    endpoint: Endpoint,
    timeout: Option<Duration>,
) {
    let result = connector::connect(&endpoint, timeout).await.and_then(|stream| {
        let peer_addr = stream.peer_addr().map_err(|source| ChatError::Connect {
            endpoint: endpoint.clone(),
            source,
        })?;
        Ok((stream, peer_addr))
    });

    let Some(shared) = shared.upgrade() else {
        return;
    };
    match result {
        Ok((stream, peer_addr)) => {
            shared.install(generation, stream, peer_addr, "connected to the server");
        }
        Err(err) => shared.fail(generation, &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const WAIT: Duration = Duration::from_secs(2);

    /// Helper: wait for the first event matching `pred`, skipping others.
    async fn wait_for(
        rx: &mut UnboundedReceiver<SessionEvent>,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> SessionEvent {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = rx.recv().await.expect("Channel closed");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("Timed out waiting for event")
    }

    async fn next_message(rx: &mut UnboundedReceiver<SessionEvent>) -> String {
        match wait_for(rx, |e| matches!(e, SessionEvent::MessageReceived(_))).await {
            SessionEvent::MessageReceived(text) => text,
            _ => unreachable!(),
        }
    }

    fn is_connected(event: &SessionEvent) -> bool {
        matches!(event, SessionEvent::Connected { .. })
    }

    fn is_disconnected(event: &SessionEvent) -> bool {
        matches!(event, SessionEvent::Disconnected)
    }

    /// Helper: an open listener on a free loopback port.
    fn start_listener() -> (Session, UnboundedReceiver<SessionEvent>, u16) {
        let (session, rx) = Session::new(
            Role::Listener,
            SessionConfig::new(Endpoint::new("127.0.0.1", 0)),
        );
        session.open().unwrap();
        let port = session.local_addr().expect("listener should be bound").port();
        (session, rx, port)
    }

    /// Helper: a connected listener/connector pair.
    async fn connected_pair() -> (
        Session,
        UnboundedReceiver<SessionEvent>,
        Session,
        UnboundedReceiver<SessionEvent>,
    ) {
        let (server, mut server_rx, port) = start_listener();
        let (client, mut client_rx) = Session::new(
            Role::Connector,
            SessionConfig::new(Endpoint::new("127.0.0.1", port)),
        );
        client.open().unwrap();

        wait_for(&mut client_rx, is_connected).await;
        wait_for(&mut server_rx, is_connected).await;
        (server, server_rx, client, client_rx)
    }

    #[tokio::test]
    async fn test_listener_reports_bound_port() {
        let (_server, mut rx, port) = start_listener();

        let event = wait_for(&mut rx, |e| matches!(e, SessionEvent::StatusChanged(_))).await;
        assert_eq!(
            event,
            SessionEvent::StatusChanged(format!(
                "the server has been created and bound to port {port}"
            ))
        );
    }

    #[tokio::test]
    async fn test_hello_reaches_listener_exactly_once() {
        let (_server, mut server_rx, client, _client_rx) = connected_pair().await;

        client.send("hello").unwrap();

        assert_eq!(next_message(&mut server_rx).await, "hello");
        let extra = tokio::time::timeout(Duration::from_millis(200), server_rx.recv()).await;
        assert!(extra.is_err(), "Expected no further events, got: {extra:?}");
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways_in_order() {
        let (server, mut server_rx, client, mut client_rx) = connected_pair().await;

        for text in ["one", "two", "three"] {
            client.send(text).unwrap();
        }
        server.send("reply").unwrap();

        assert_eq!(next_message(&mut server_rx).await, "one");
        assert_eq!(next_message(&mut server_rx).await, "two");
        assert_eq!(next_message(&mut server_rx).await, "three");
        assert_eq!(next_message(&mut client_rx).await, "reply");
    }

    #[tokio::test]
    async fn test_status_lines_for_both_roles() {
        let (server, mut server_rx, port) = start_listener();
        let (client, mut client_rx) = Session::new(
            Role::Connector,
            SessionConfig::new(Endpoint::new("127.0.0.1", port)),
        );
        client.open().unwrap();

        assert_eq!(
            wait_for(&mut client_rx, |e| matches!(e, SessionEvent::StatusChanged(_))).await,
            SessionEvent::StatusChanged("connected to the server".to_string())
        );
        // Skip the "bound to port" line.
        wait_for(&mut server_rx, |e| matches!(e, SessionEvent::StatusChanged(_))).await;
        assert_eq!(
            wait_for(&mut server_rx, |e| matches!(e, SessionEvent::StatusChanged(_))).await,
            SessionEvent::StatusChanged("client socket has been accepted".to_string())
        );
        assert!(server.is_connected());
    }

    #[tokio::test]
    async fn test_submit_empty_is_noop() {
        let (_server, mut server_rx, client, mut client_rx) = connected_pair().await;

        let mut input = String::new();
        assert!(!client.submit(&mut input));
        assert!(client_rx.try_recv().is_err(), "Empty submit should emit nothing");

        client.send("after").unwrap();
        assert_eq!(next_message(&mut server_rx).await, "after");
    }

    #[tokio::test]
    async fn test_submit_clears_input_and_sends() {
        let (_server, mut server_rx, client, _client_rx) = connected_pair().await;

        let mut input = String::from("typed text");
        assert!(client.submit(&mut input));
        assert!(input.is_empty());

        assert_eq!(next_message(&mut server_rx).await, "typed text");
    }

    #[tokio::test]
    async fn test_submit_without_connection_reports_error() {
        let (session, mut rx) = Session::new(Role::Connector, SessionConfig::default());

        let mut input = String::from("nobody listening");
        assert!(session.submit(&mut input));

        match rx.try_recv().unwrap() {
            SessionEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::State),
            other => panic!("Expected Error event, got: {other:?}"),
        }
        assert!(matches!(session.send("x"), Err(ChatError::NotConnected)));
    }

    #[tokio::test]
    async fn test_oversized_send_rejected() {
        let (_server, _server_rx, client, _client_rx) = connected_pair().await;

        let err = client.send(&"z".repeat(65_536)).unwrap_err();
        assert!(matches!(err, ChatError::FrameTooLarge { len: 65_536 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_sends_arrive_intact() {
        let (_server, mut server_rx, client, _client_rx) = connected_pair().await;

        const PER_THREAD: usize = 5;
        const LEN: usize = 60_000;
        std::thread::scope(|scope| {
            for fill in ['a', 'b'] {
                let client = client.clone();
                scope.spawn(move || {
                    let text = fill.to_string().repeat(LEN);
                    for _ in 0..PER_THREAD {
                        client.send(&text).unwrap();
                    }
                });
            }
        });

        let mut counts = [0usize; 2];
        for _ in 0..2 * PER_THREAD {
            let text = next_message(&mut server_rx).await;
            assert_eq!(text.len(), LEN);
            let first = text.chars().next().unwrap();
            assert!(text.chars().all(|c| c == first), "Frame was interleaved");
            counts[usize::from(first == 'b')] += 1;
        }
        assert_eq!(counts, [PER_THREAD, PER_THREAD]);
    }

    #[tokio::test]
    async fn test_open_twice_is_already_active() {
        let (server, mut rx, _port) = start_listener();

        assert!(matches!(server.open(), Err(ChatError::AlreadyActive)));
        match wait_for(&mut rx, |e| matches!(e, SessionEvent::Error { .. })).await {
            SessionEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::State),
            _ => unreachable!(),
        }
        // Still listening.
        assert!(server.local_addr().is_some());
    }

    #[tokio::test]
    async fn test_bind_failure_resets_to_idle() {
        let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = blocker.local_addr().unwrap().port();

        let (server, mut rx) = Session::new(
            Role::Listener,
            SessionConfig::new(Endpoint::new("127.0.0.1", port)),
        );
        assert!(matches!(server.open(), Err(ChatError::Bind { .. })));

        match rx.try_recv().unwrap() {
            SessionEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::Bind),
            other => panic!("Expected Error event, got: {other:?}"),
        }
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Disconnected);
        assert!(!server.is_active());

        // Manual retry once the port is free.
        drop(blocker);
        server.open().unwrap();
        assert!(server.is_active());
    }

    #[tokio::test]
    async fn test_connect_failure_resets_to_idle() {
        let port = {
            let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            spare.local_addr().unwrap().port()
        };
        let (client, mut rx) = Session::new(
            Role::Connector,
            SessionConfig::new(Endpoint::new("127.0.0.1", port)),
        );
        client.open().unwrap();

        match wait_for(&mut rx, |e| matches!(e, SessionEvent::Error { .. })).await {
            SessionEvent::Error { kind, .. } => assert_eq!(kind, ErrorKind::Connect),
            _ => unreachable!(),
        }
        wait_for(&mut rx, is_disconnected).await;
        assert!(!client.is_active());
    }

    #[tokio::test]
    async fn test_listener_accepts_only_one_peer() {
        let (server, _server_rx, client, _client_rx) = connected_pair().await;
        assert!(server.local_addr().is_none());

        // The listening socket is gone once the peer is accepted.
        let port = client.config().endpoint.port;
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn test_message_submitted_right_before_close_is_delivered() {
        let (_server, mut server_rx, client, _client_rx) = connected_pair().await;

        let mut input = String::from("last words");
        assert!(client.submit(&mut input));
        client.close();

        assert_eq!(next_message(&mut server_rx).await, "last words");
        wait_for(&mut server_rx, is_disconnected).await;
    }

    #[tokio::test]
    async fn test_close_and_flush_waits_for_writer() {
        let (_server, mut server_rx, client, mut client_rx) = connected_pair().await;

        client.send(&"x".repeat(60_000)).unwrap();
        client.close_and_flush(WAIT).await;

        assert_eq!(next_message(&mut server_rx).await.len(), 60_000);
        wait_for(&mut client_rx, is_disconnected).await;
        assert!(!client.is_active());

        // Nothing left to flush.
        client.close_and_flush(WAIT).await;
    }

    #[tokio::test]
    async fn test_close_never_opened_is_noop() {
        let (session, mut rx) = Session::new(Role::Connector, SessionConfig::default());

        session.close();
        session.close();

        assert!(rx.try_recv().is_err());
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn test_close_twice_reports_one_disconnect() {
        let (_server, _server_rx, client, mut client_rx) = connected_pair().await;

        client.close();
        client.close();

        wait_for(&mut client_rx, is_disconnected).await;
        let extra = tokio::time::timeout(Duration::from_millis(200), client_rx.recv()).await;
        assert!(extra.is_err(), "Expected a single Disconnected, got: {extra:?}");
        assert!(!client.is_active());
    }

    #[tokio::test]
    async fn test_close_unblocks_reader_and_peer_sees_eof() {
        let (_server, mut server_rx, client, _client_rx) = connected_pair().await;

        // Both read loops are parked on their sockets now.
        client.close();

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                match server_rx.recv().await {
                    Some(SessionEvent::Disconnected) | None => break,
                    Some(_) => {}
                }
            }
        })
        .await
        .expect("Peer should observe the close within a second");
    }

    #[tokio::test]
    async fn test_close_while_listening_releases_port() {
        let (server, mut rx, port) = start_listener();

        server.close();
        wait_for(&mut rx, is_disconnected).await;
        assert!(!server.is_active());

        // Give the runtime a moment to drop the aborted accept task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());

        server.open().unwrap();
        assert!(server.local_addr().is_some());
    }

    #[tokio::test]
    async fn test_peer_hangup_leaves_session_half_open() {
        let (server, mut server_rx, client, _client_rx) = connected_pair().await;

        client.close();

        assert_eq!(
            wait_for(&mut server_rx, |e| matches!(e, SessionEvent::StatusChanged(_))).await,
            SessionEvent::StatusChanged("the peer closed the connection".to_string())
        );
        wait_for(&mut server_rx, is_disconnected).await;
        assert!(!server.is_connected());
        assert!(server.is_active());

        // Explicit close finishes the teardown without a second disconnect.
        server.close();
        assert!(!server.is_active());
        let extra = tokio::time::timeout(Duration::from_millis(200), server_rx.recv()).await;
        assert!(extra.is_err(), "Expected no further events, got: {extra:?}");
    }

    #[tokio::test]
    async fn test_dropping_last_handle_closes_connection() {
        let (_server, mut server_rx, client, client_rx) = connected_pair().await;

        drop(client);
        drop(client_rx);

        wait_for(&mut server_rx, is_disconnected).await;
    }
}
