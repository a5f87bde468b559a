//! Test harness for proxy integration tests.
//!
//! Provides helpers to spawn in-process upstream backends and proxy
//! listeners bound to ephemeral ports.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};

use tap_proxy::config::UpstreamAddr;
use tap_proxy::proxy::{Listener, ListenerConfig, RequestPolicy, UrlStats};
use tap_proxy::shutdown::ShutdownController;

/// Upstream that records everything it receives and answers each received
/// chunk with a fixed reply.
#[allow(dead_code)]
pub struct RecordingUpstream {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicU64>,
    pub received: Arc<Mutex<Vec<u8>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl RecordingUpstream {
    pub async fn spawn(reply: &'static [u8]) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let connections = Arc::new(AtomicU64::new(0));
        let received = Arc::new(Mutex::new(Vec::new()));

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let conn_clone = Arc::clone(&connections);
        let recv_clone = Arc::clone(&received);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((mut stream, _)) => {
                                conn_clone.fetch_add(1, Ordering::Relaxed);
                                let received = Arc::clone(&recv_clone);
                                tokio::spawn(async move {
                                    let mut buf = vec![0u8; 8192];
                                    loop {
                                        match stream.read(&mut buf).await {
                                            Ok(0) | Err(_) => break,
                                            Ok(n) => {
                                                received.lock().await.extend_from_slice(&buf[..n]);
                                                if stream.write_all(reply).await.is_err() {
                                                    break;
                                                }
                                            }
                                        }
                                    }
                                });
                            }
                            Err(_) => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });

        Ok(Self {
            addr,
            connections,
            received,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub async fn received_bytes(&self) -> Vec<u8> {
        self.received.lock().await.clone()
    }
}

impl Drop for RecordingUpstream {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// A proxy instance wired to a given upstream and policy.
#[allow(dead_code)]
pub struct ProxyHandle {
    pub listen_addr: SocketAddr,
    pub urls: Arc<UrlStats>,
    pub shutdown: Arc<ShutdownController>,
    pub listener: Arc<Listener>,
}

impl ProxyHandle {
    pub async fn spawn(upstream: SocketAddr, policy: RequestPolicy) -> io::Result<Self> {
        let urls = Arc::new(UrlStats::new());
        let shutdown = Arc::new(ShutdownController::new());

        let listener = Arc::new(Listener::bind(
            ListenerConfig::new("127.0.0.1:0".parse().unwrap()),
            UpstreamAddr {
                host: upstream.ip().to_string(),
                port: upstream.port(),
            },
            Arc::new(policy),
            Arc::clone(&urls),
        )?);

        let listen_addr = listener.local_addr()?;

        tokio::spawn(Arc::clone(&listener).run(shutdown.subscribe()));
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            listen_addr,
            urls,
            shutdown,
            listener,
        })
    }
}

/// Send `payload` through the proxy and collect the first reply chunk.
#[allow(dead_code)]
pub async fn roundtrip(proxy_addr: SocketAddr, payload: &[u8]) -> Result<Vec<u8>, &'static str> {
    let result = tokio::time::timeout(Duration::from_secs(2), async {
        let mut stream = TcpStream::connect(proxy_addr).await?;
        stream.write_all(payload).await?;
        stream.flush().await?;
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await?;
        Ok::<_, io::Error>(buf[..n].to_vec())
    })
    .await;

    match result {
        Ok(Ok(data)) if !data.is_empty() => Ok(data),
        Ok(Ok(_)) => Err("connection closed"),
        Ok(Err(_)) => Err("io error"),
        Err(_) => Err("timeout"),
    }
}
