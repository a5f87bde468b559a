//! Single-direction byte pump with HTTP request-line inspection.
//!
//! Two forwarders run per session, one per direction. Within a direction
//! bytes are forwarded in read order with one chunk in flight; the two
//! directions are independent of each other.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::http::{self, RequestInspection};
use super::policy::RequestPolicy;
use super::session::{SessionState, SharedWriteHalf, Side};
use super::stats::UrlStats;
use crate::shutdown::ShutdownSignal;

/// Read chunk size; balances syscall overhead against latency.
pub const CHUNK_SIZE: usize = 4096;

/// Bounded read wait: the tick at which a quiet connection re-checks the
/// shutdown flag and the session closed-flags.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// One direction of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to upstream.
    Request,
    /// Upstream to client.
    Response,
}

impl Direction {
    fn src_side(self) -> Side {
        match self {
            Direction::Request => Side::Client,
            Direction::Response => Side::Server,
        }
    }

    fn dest_side(self) -> Side {
        match self {
            Direction::Request => Side::Server,
            Direction::Response => Side::Client,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Request => write!(f, "request"),
            Direction::Response => write!(f, "response"),
        }
    }
}

/// Pumps bytes from `src` to `dest` until EOF, an unrecoverable socket
/// error, shutdown, or a policy-triggered termination.
pub struct Forwarder {
    /// Read half of the source socket.
    pub(crate) src: OwnedReadHalf,
    /// Write half of the destination socket.
    pub(crate) dest: SharedWriteHalf,
    /// Write half of the source socket, for synthesized responses.
    pub(crate) reply: SharedWriteHalf,
    pub(crate) direction: Direction,
    pub(crate) state: Arc<SessionState>,
    /// Consulted on the request direction only.
    pub(crate) policy: Arc<RequestPolicy>,
    pub(crate) urls: Arc<UrlStats>,
    pub(crate) shutdown: ShutdownSignal,
}

impl Forwarder {
    /// Run the pump to completion. Returns the bytes forwarded to `dest`.
    pub async fn run(mut self) -> u64 {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut total = 0u64;

        loop {
            // A side closed by the sibling forwarder or by policy
            // enforcement must not be touched again.
            if self.state.is_closed(self.direction.src_side())
                || self.state.is_closed(self.direction.dest_side())
            {
                break;
            }

            let n = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                read = timeout(READ_TIMEOUT, self.src.read(&mut buf)) => match read {
                    // Idle tick: loop around and re-check the flags.
                    Err(_elapsed) => continue,
                    Ok(Ok(0)) => {
                        // Clean EOF: propagate the half-close so the peer
                        // sees the end of this direction's stream. The
                        // opposite direction may still have bytes in
                        // flight, so the session flags stay untouched.
                        let mut dest = self.dest.lock().await;
                        if let Err(e) = dest.shutdown().await {
                            debug!(direction = %self.direction, error = %e, "Half-close");
                        }
                        break;
                    }
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => {
                        self.log_socket_error("read", &e);
                        break;
                    }
                },
            };

            let mut rewritten: Option<Vec<u8>> = None;

            match self.direction {
                Direction::Request => match http::inspect_request(&buf[..n]) {
                    RequestInspection::NotHttp => {}
                    RequestInspection::Malformed => {
                        warn!(
                            direction = %self.direction,
                            "Unparseable HTTP request line; forwarding raw"
                        );
                    }
                    RequestInspection::Request(line) => {
                        debug!(method = %line.method, target = %line.target, "Request");
                        self.urls.increment(&line.target).await;

                        if self.policy.blocks(&line.target) {
                            self.terminate_blocked(&line.target).await;
                            return total;
                        }

                        if let Some((name, value)) = self.policy.inject_parts() {
                            match http::inject_header(&buf[..n], name, value) {
                                Some(bytes) => rewritten = Some(bytes),
                                None => warn!(
                                    target = %line.target,
                                    "Message has no header lines; skipping header injection"
                                ),
                            }
                        }
                    }
                },
                Direction::Response => {
                    if let Some(status) = http::response_status_line(&buf[..n]) {
                        debug!(status = %status, "Response");
                    }
                }
            }

            let payload: &[u8] = rewritten.as_deref().unwrap_or(&buf[..n]);

            let write_result = {
                let mut dest = self.dest.lock().await;
                dest.write_all(payload).await
            };
            match write_result {
                Ok(()) => total += payload.len() as u64,
                Err(e) => {
                    self.log_socket_error("write", &e);
                    break;
                }
            }
        }

        total
    }

    /// Enforce the block policy: 403 to the client, close both directions.
    ///
    /// The original chunk is never forwarded. The sibling forwarder observes
    /// the closed-flags at its next tick.
    async fn terminate_blocked(&self, target: &str) {
        info!(direction = %self.direction, target = %target, "Blocked request");

        if self.state.mark_closed(self.direction.src_side()) {
            let mut reply = self.reply.lock().await;
            if let Err(e) = reply.write_all(&http::forbidden()).await {
                debug!(error = %e, "Failed to send 403");
            }
            if let Err(e) = reply.shutdown().await {
                debug!(error = %e, "Client close after 403");
            }
        }
        if self.state.mark_closed(self.direction.dest_side()) {
            let mut dest = self.dest.lock().await;
            if let Err(e) = dest.shutdown().await {
                debug!(error = %e, "Upstream close after block");
            }
        }
    }

    /// Socket errors during teardown races are expected and stay quiet.
    fn log_socket_error(&self, op: &str, e: &io::Error) {
        let teardown = self.shutdown.is_shutdown()
            || self.state.is_closed(self.direction.src_side())
            || self.state.is_closed(self.direction.dest_side());
        if teardown {
            debug!(direction = %self.direction, op = op, error = %e, "Socket closed during teardown");
        } else {
            error!(direction = %self.direction, op = op, error = %e, "Socket error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_sides() {
        assert_eq!(Direction::Request.src_side(), Side::Client);
        assert_eq!(Direction::Request.dest_side(), Side::Server);
        assert_eq!(Direction::Response.src_side(), Side::Server);
        assert_eq!(Direction::Response.dest_side(), Side::Client);
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Request.to_string(), "request");
        assert_eq!(Direction::Response.to_string(), "response");
    }
}
