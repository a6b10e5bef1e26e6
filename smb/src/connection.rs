//! Per-connection state and the serve loop that drives one accepted
//! socket (spec.md §4.8). Grounded on `smb/src/server/connection.rs`'s
//! `Connection<Server>` (it owns the socket, runs the read loop, and
//! dispatches into the message handler); this version splits that into
//! a plain data struct (`ConnectionState`, shared with handlers through
//! `HandlerContext`) and the I/O-owning `Connection` the server spawns
//! one task per accepted socket for.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{watch, Notify};

use smb_core::error::SMBError;
use smb_core::{error, warn, SMBResult};

use crate::auth::PendingAuthId;
use crate::compound;
use crate::crypto::preauth::PreauthHashState;
use crate::dispatch::Dispatcher;
use crate::protocol::body::Dialect;
use crate::protocol::command::Command;
use crate::protocol::flags::HeaderFlags;
use crate::protocol::header::Smb2Header;
use crate::protocol::message::Smb2Message;
use crate::session::SessionManager;
use crate::transport::framing::io::{read_frame, write_frame};
use crate::transport::framing::ReadOutcome;

static CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Connection-scoped mutable state a command handler may read or write
/// through `HandlerContext` (spec.md §3 `Connection`): the negotiated
/// dialect, the pre-auth hash chain, the one pending SPNEGO round this
/// connection may have open, and the sessions it has established (so
/// teardown knows which ones to tear down with it).
pub struct ConnectionState {
    pub conn_id: u64,
    pub peer_addr: SocketAddr,
    pub preauth: PreauthHashState,
    dialect: Mutex<Option<Dialect>>,
    pub owned_sessions: Mutex<HashSet<u64>>,
    pub pending_auth: Mutex<Option<PendingAuthId>>,
}

impl ConnectionState {
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            conn_id: CONN_ID.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            preauth: PreauthHashState::new(),
            dialect: Mutex::new(None),
            owned_sessions: Mutex::new(HashSet::new()),
            pending_auth: Mutex::new(None),
        }
    }

    pub fn dialect(&self) -> Option<Dialect> {
        *self.dialect.lock().expect("dialect mutex poisoned")
    }

    pub fn set_dialect(&self, dialect: Dialect) {
        *self.dialect.lock().expect("dialect mutex poisoned") = Some(dialect);
    }
}

/// The single serialized writer a connection's responses (and, for
/// CHANGE_NOTIFY, out-of-band notifications) all go through (spec.md
/// §4.8's "a single writer lock" requirement).
pub struct ConnectionWriter {
    write_half: tokio::sync::Mutex<tokio::net::tcp::OwnedWriteHalf>,
    write_timeout: Duration,
}

impl ConnectionWriter {
    pub async fn write_frame(&self, payload: &[u8]) -> SMBResult<()> {
        let mut guard = self.write_half.lock().await;
        tokio::time::timeout(self.write_timeout, write_frame(&mut *guard, payload))
            .await
            .map_err(|_| SMBError::io_error(std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out")))?
    }
}

/// Builds and sends an out-of-band CHANGE_NOTIFY response asynchronously
/// (spec.md §4.8): a notification can fire long after the request that
/// armed it returned, so it goes out through its own header, flagged
/// Async, over the connection's shared writer.
#[derive(Clone)]
pub struct AsyncNotifier {
    writer: Arc<ConnectionWriter>,
}

impl AsyncNotifier {
    pub fn notify(&self, session_id: u64, message_id: u64, response_body: Vec<u8>) {
        let writer = self.writer.clone();
        tokio::spawn(async move {
            let mut header = Smb2Header::new(Command::ChangeNotify, message_id, 0, session_id);
            header.flags = HeaderFlags::RESPONSE | HeaderFlags::ASYNC_COMMAND;
            let message = Smb2Message::response(header, response_body);
            if let Err(err) = writer.write_frame(&message.encode()).await {
                error!("failed to deliver async CHANGE_NOTIFY response: {}", err);
            }
        });
    }
}

/// One accepted socket: the I/O halves, the bounded-concurrency gate,
/// and the in-flight accounting teardown waits on.
pub struct Connection {
    pub state: Arc<ConnectionState>,
    writer: Arc<ConnectionWriter>,
    semaphore: Arc<tokio::sync::Semaphore>,
    inflight_count: Arc<tokio::sync::Mutex<usize>>,
    inflight_idle: Arc<Notify>,
    dispatcher: Arc<Dispatcher>,
    idle_timeout: Duration,
    max_frame_len: usize,
}

impl Connection {
    pub fn new(
        stream: TcpStream,
        peer_addr: SocketAddr,
        dispatcher: Arc<Dispatcher>,
        max_requests_in_flight: usize,
        write_timeout: Duration,
        idle_timeout: Duration,
        max_frame_len: usize,
    ) -> (Arc<Self>, OwnedReadHalf) {
        let (read_half, write_half) = stream.into_split();
        let writer = Arc::new(ConnectionWriter {
            write_half: tokio::sync::Mutex::new(write_half),
            write_timeout,
        });
        let connection = Arc::new(Self {
            state: Arc::new(ConnectionState::new(peer_addr)),
            writer,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_requests_in_flight.max(1))),
            inflight_count: Arc::new(tokio::sync::Mutex::new(0)),
            inflight_idle: Arc::new(Notify::new()),
            dispatcher,
            idle_timeout,
            max_frame_len,
        });
        (connection, read_half)
    }

    /// Drives one connection until the peer disconnects, a framing error
    /// occurs, the idle deadline elapses, or `shutdown` fires (spec.md
    /// §4.8's serve loop). Always runs teardown on the way out.
    pub async fn serve(self: Arc<Self>, mut read_half: OwnedReadHalf, mut shutdown: watch::Receiver<bool>) {
        let mut smb1_upgraded = false;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let read = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                res = tokio::time::timeout(self.idle_timeout, read_frame(&mut read_half, self.max_frame_len)) => res,
            };
            let outcome = match read {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    warn!("connection {} framing error: {}", self.state.conn_id, err);
                    break;
                }
                Err(_) => {
                    warn!("connection {} idle timeout", self.state.conn_id);
                    break;
                }
            };
            let payload = match outcome {
                ReadOutcome::KeepAlive => continue,
                ReadOutcome::Payload(payload) => payload,
            };

            if crate::transport::framing::is_smb1_negotiate(&payload) {
                if smb1_upgraded {
                    warn!("connection {} sent a second SMB1 negotiate after upgrading", self.state.conn_id);
                    break;
                }
                smb1_upgraded = true;
                if self.handle_smb1_upgrade().await.is_err() {
                    break;
                }
                continue;
            }

            let messages = match Smb2Message::decode_compound(&payload) {
                Ok(messages) => messages,
                Err(err) => {
                    warn!("connection {} sent an unparsable message: {}", self.state.conn_id, err);
                    break;
                }
            };
            self.spawn_request(messages).await;
        }
        self.teardown().await;
    }

    async fn handle_smb1_upgrade(&self) -> SMBResult<()> {
        let header = Smb2Header::new(Command::LegacyNegotiate, 0, 0, 0);
        let response = self.dispatcher.dispatch(&self.state, header, Vec::new(), &[], None, false).await;
        self.writer.write_frame(&response.encode()).await
    }

    /// Acquires a concurrency permit and spawns the request off the
    /// read loop so a slow handler never blocks reading the next frame
    /// (spec.md §4.8's bounded-concurrency requirement). A supervisor
    /// task always decrements the in-flight counter, even if the worker
    /// task panics, so teardown's barrier can't hang on a dead task.
    async fn spawn_request(self: &Arc<Self>, messages: Vec<Smb2Message>) {
        let permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        {
            let mut count = self.inflight_count.lock().await;
            *count += 1;
        }

        let notifier = AsyncNotifier { writer: self.writer.clone() };
        let worker = self.clone();
        let handle = tokio::spawn(async move { worker.process_frame(messages, notifier).await });

        let supervisor = self.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("connection {} request failed: {}", supervisor.state.conn_id, err),
                Err(join_err) => error!("connection {} request task panicked: {}", supervisor.state.conn_id, join_err),
            }
            let mut count = supervisor.inflight_count.lock().await;
            *count -= 1;
            if *count == 0 {
                supervisor.inflight_idle.notify_waiters();
            }
        });
    }

    async fn process_frame(self: Arc<Self>, messages: Vec<Smb2Message>, notifier: AsyncNotifier) -> SMBResult<()> {
        if messages.len() == 1 {
            let message = messages.into_iter().next().expect("checked len == 1");
            let notify = (message.header.command == Command::ChangeNotify).then(|| notifier.clone());
            let raw = message.raw;
            let response = self.dispatcher.dispatch(&self.state, message.header, message.body, &raw, notify, false).await;
            self.writer.write_frame(&response.encode()).await
        } else {
            compound::process_compound(&self.dispatcher, &self.state, &self.writer, messages, notifier).await
        }
    }

    /// Stops accepting new work, waits for whatever is already in
    /// flight, then tears down every session this connection owns
    /// (spec.md §4.8's teardown sequence; "forced-close timeout" is the
    /// server's job one layer up, since it bounds *this* wait).
    async fn teardown(&self) {
        loop {
            let notified = self.inflight_idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if *self.inflight_count.lock().await == 0 {
                break;
            }
            notified.await;
        }
        let sessions: Vec<u64> = self.state.owned_sessions.lock().expect("owned_sessions mutex poisoned").drain().collect();
        for session_id in sessions {
            self.dispatcher.sessions().remove(session_id);
            self.dispatcher.credits().remove_session(session_id);
        }
        if let Some(pending_id) = self.state.pending_auth.lock().expect("pending_auth mutex poisoned").take() {
            self.dispatcher.authenticator().discard(pending_id);
        }
    }
}

/// Exposed so `server.rs` can report which session manager a connection
/// shares with the rest of the engine without reaching into `Dispatcher`.
pub fn shared_sessions(dispatcher: &Dispatcher) -> Arc<SessionManager> {
    dispatcher.sessions()
}
