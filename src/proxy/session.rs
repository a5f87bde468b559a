//! Per-connection session lifecycle.
//!
//! A session pairs one accepted client connection with one upstream
//! connection, drives the two direction forwarders, and guarantees both
//! sockets are closed exactly once whatever path ends the session.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::forward::{Direction, Forwarder};
use super::http;
use super::listener::ListenerStats;
use super::policy::RequestPolicy;
use super::stats::UrlStats;
use crate::config::UpstreamAddr;
use crate::shutdown::ShutdownSignal;

/// Timeout for opening the upstream connection.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Write half of a session socket, shared between the two forwarders.
///
/// The response-direction forwarder writes the client socket for normal
/// traffic; the request-direction forwarder borrows it briefly to send a
/// synthesized 403. The lock is held for one write or shutdown call at a
/// time.
pub type SharedWriteHalf = Arc<Mutex<OwnedWriteHalf>>;

/// One side of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// Per-session closed-state shared by both forwarders.
///
/// Each side is marked closed at most once; forwarders check the flags
/// before touching either socket so a side closed by the sibling (or by
/// policy enforcement) is never written to again.
#[derive(Debug, Default)]
pub struct SessionState {
    client_closed: AtomicBool,
    server_closed: AtomicBool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one side closed. Returns false when it was already marked.
    pub fn mark_closed(&self, side: Side) -> bool {
        !self.flag(side).swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self, side: Side) -> bool {
        self.flag(side).load(Ordering::SeqCst)
    }

    fn flag(&self, side: Side) -> &AtomicBool {
        match side {
            Side::Client => &self.client_closed,
            Side::Server => &self.server_closed,
        }
    }
}

/// Drive one client connection to completion.
///
/// Never returns an error: every failure path is logged here, and cleanup
/// runs regardless of how the forwarders end.
pub async fn run(
    client: TcpStream,
    peer_addr: SocketAddr,
    upstream: UpstreamAddr,
    policy: Arc<RequestPolicy>,
    urls: Arc<UrlStats>,
    stats: Arc<ListenerStats>,
    shutdown: ShutdownSignal,
) {
    info!(peer_addr = %peer_addr, upstream = %upstream, "Session started");

    let server = match connect_upstream(&upstream).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(upstream = %upstream, error = %e, "Upstream connect failed");
            reject_client(client).await;
            info!(peer_addr = %peer_addr, "Session ended");
            return;
        }
    };

    let (client_read, client_write) = client.into_split();
    let (server_read, server_write) = server.into_split();
    let client_write: SharedWriteHalf = Arc::new(Mutex::new(client_write));
    let server_write: SharedWriteHalf = Arc::new(Mutex::new(server_write));

    let state = Arc::new(SessionState::new());

    let request = Forwarder {
        src: client_read,
        dest: Arc::clone(&server_write),
        reply: Arc::clone(&client_write),
        direction: Direction::Request,
        state: Arc::clone(&state),
        policy: Arc::clone(&policy),
        urls: Arc::clone(&urls),
        shutdown: shutdown.clone(),
    };
    // Policy and counting apply to the request direction only; the response
    // forwarder never consults them.
    let response = Forwarder {
        src: server_read,
        dest: Arc::clone(&client_write),
        reply: Arc::clone(&server_write),
        direction: Direction::Response,
        state: Arc::clone(&state),
        policy,
        urls,
        shutdown,
    };

    let request_task = tokio::spawn(request.run());
    let response_task = tokio::spawn(response.run());

    let (sent, received) = tokio::join!(request_task, response_task);
    match sent {
        Ok(bytes) => {
            stats.bytes_to_upstream.fetch_add(bytes, Ordering::Relaxed);
        }
        Err(e) => error!(peer_addr = %peer_addr, error = %e, "Request forwarder panicked"),
    }
    match received {
        Ok(bytes) => {
            stats.bytes_from_upstream.fetch_add(bytes, Ordering::Relaxed);
        }
        Err(e) => error!(peer_addr = %peer_addr, error = %e, "Response forwarder panicked"),
    }

    cleanup(&state, &client_write, &server_write).await;

    info!(peer_addr = %peer_addr, "Session ended");
}

async fn connect_upstream(upstream: &UpstreamAddr) -> io::Result<TcpStream> {
    let target = (upstream.host.as_str(), upstream.port);
    match timeout(CONNECT_TIMEOUT, TcpStream::connect(target)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timeout")),
    }
}

/// Send the canned 502 and close the client socket. No forwarders run.
async fn reject_client(mut client: TcpStream) {
    if let Err(e) = client.write_all(&http::bad_gateway()).await {
        debug!(error = %e, "Failed to send 502 to client");
    }
    if let Err(e) = client.shutdown().await {
        debug!(error = %e, "Client close after 502 failed");
    }
}

/// Close whatever the forwarders left open.
///
/// Idempotent via the closed-flags; already-closed errors are expected
/// during teardown races and stay at debug.
async fn cleanup(
    state: &SessionState,
    client_write: &SharedWriteHalf,
    server_write: &SharedWriteHalf,
) {
    if state.mark_closed(Side::Client) {
        if let Err(e) = client_write.lock().await.shutdown().await {
            debug!(error = %e, "Client socket close");
        }
    }
    if state.mark_closed(Side::Server) {
        if let Err(e) = server_write.lock().await.shutdown().await {
            debug!(error = %e, "Server socket close");
        }
    }
}
