//! TCP listener and accept loop.
//!
//! Accepts client connections and hands each to its own session task. The
//! accept loop observes the shutdown signal directly, and the per-session
//! semaphore permits double as the drain barrier for graceful shutdown.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, Instrument};

use super::policy::RequestPolicy;
use super::session;
use super::stats::UrlStats;
use crate::config::UpstreamAddr;
use crate::shutdown::ShutdownSignal;

/// Default maximum concurrent sessions per listener.
pub const DEFAULT_MAX_SESSIONS: usize = 1024;

/// Standing accept queue deep enough for bursty connects.
const LISTEN_BACKLOG: u32 = 128;

/// Configuration for the listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent sessions.
    pub max_sessions: usize,
}

impl ListenerConfig {
    /// Create a new listener configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Connections currently active.
    pub connections_active: AtomicU64,
    /// Connections fully closed.
    pub connections_closed: AtomicU64,
    /// Bytes forwarded client to upstream.
    pub bytes_to_upstream: AtomicU64,
    /// Bytes forwarded upstream to client.
    pub bytes_from_upstream: AtomicU64,
}

/// The proxy's accept loop.
pub struct Listener {
    config: ListenerConfig,
    listener: TcpListener,
    upstream: UpstreamAddr,
    policy: Arc<RequestPolicy>,
    urls: Arc<UrlStats>,
    sessions: Arc<Semaphore>,
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind the listening socket with address reuse enabled, so a restarted
    /// process can rebind immediately.
    pub fn bind(
        config: ListenerConfig,
        upstream: UpstreamAddr,
        policy: Arc<RequestPolicy>,
        urls: Arc<UrlStats>,
    ) -> io::Result<Self> {
        let socket = match config.bind_addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(config.bind_addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            upstream = %upstream,
            max_sessions = config.max_sessions,
            "Listener bound"
        );

        Ok(Self {
            sessions: Arc::new(Semaphore::new(config.max_sessions)),
            listener,
            upstream,
            policy,
            urls,
            stats: Arc::new(ListenerStats::default()),
            config,
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Run the accept loop until shutdown or an accept failure.
    ///
    /// Each accepted connection is handed to a freshly spawned session task;
    /// accepting never waits on session work. Accept errors are fatal to the
    /// listener and end the loop.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownSignal) {
        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    let permit = match Arc::clone(&self.sessions).try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            debug!(peer_addr = %peer_addr, "Connection rejected: max sessions reached");
                            continue;
                        }
                    };

                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                    let upstream = self.upstream.clone();
                    let policy = Arc::clone(&self.policy);
                    let urls = Arc::clone(&self.urls);
                    let stats = Arc::clone(&self.stats);
                    let session_shutdown = shutdown.clone();

                    tokio::spawn(
                        async move {
                            session::run(
                                stream,
                                peer_addr,
                                upstream,
                                policy,
                                urls,
                                Arc::clone(&stats),
                                session_shutdown,
                            )
                            .await;

                            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            stats.connections_closed.fetch_add(1, Ordering::Relaxed);
                            drop(permit);
                        }
                        .instrument(tracing::info_span!("session", peer = %peer_addr)),
                    );
                }
                Err(e) => {
                    // Expected and silent when the shutdown signal closed the
                    // listener out from under a blocked accept.
                    if !shutdown.is_shutdown() {
                        error!(error = %e, "Accept error");
                    }
                    break;
                }
            }
        }

        debug!("Accept loop stopped");
    }

    /// Wait for every in-flight session to finish.
    ///
    /// Session tasks hold a semaphore permit for their whole lifetime, so
    /// re-acquiring the full count is the drain barrier.
    pub async fn drain(&self) {
        let _ = self.sessions.acquire_many(self.config.max_sessions as u32).await;
    }
}
