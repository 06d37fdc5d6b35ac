//! UDP/TCP DNS listeners.
//!
//! Sockets are bound up front so the bound address is observable; each
//! inbound message is handled on its own task against the shared query
//! handler. TCP connections serve multiple sequential queries up to a
//! bounded count.

pub mod axfr;
pub mod handler;
pub mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, error, info};

pub use handler::{QueryHandler, Transport};
pub use rate_limit::QueryRateLimiter;

use crate::config::ConfigHandle;
use crate::errors::DnsError;

/// Read buffer for UDP datagrams (fits any advertised EDNS size we accept).
const MAX_UDP_DATAGRAM: usize = 4096;
/// Upper bound on one TCP-framed message.
const MAX_TCP_MESSAGE: usize = 65535;
/// Idle/read timeout per TCP interaction.
const TCP_TIMEOUT: Duration = Duration::from_secs(10);
/// Queries served on one TCP connection before it is closed.
const MAX_QUERIES_PER_CONNECTION: usize = 128;
/// Concurrent TCP connection cap.
const MAX_TCP_CONNECTIONS: usize = 1024;

pub struct DnsServer {
    udp: Arc<UdpSocket>,
    tcp: TcpListener,
    handler: Arc<QueryHandler>,
    config: Arc<ConfigHandle>,
    rate_limiter: Arc<QueryRateLimiter>,
    tcp_semaphore: Arc<Semaphore>,
}

impl DnsServer {
    /// Bind both listeners on `addr`.
    pub async fn bind(
        addr: &str,
        handler: Arc<QueryHandler>,
        config: Arc<ConfigHandle>,
    ) -> Result<Self, DnsError> {
        let udp = UdpSocket::bind(addr)
            .await
            .map_err(|e| DnsError::TransportFailure(format!("bind udp {addr}: {e}")))?;
        let tcp = TcpListener::bind(addr)
            .await
            .map_err(|e| DnsError::TransportFailure(format!("bind tcp {addr}: {e}")))?;
        Ok(Self {
            udp: Arc::new(udp),
            tcp,
            handler,
            config,
            rate_limiter: Arc::new(QueryRateLimiter::new()),
            tcp_semaphore: Arc::new(Semaphore::new(MAX_TCP_CONNECTIONS)),
        })
    }

    /// The UDP listener's bound address (useful with port 0).
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, DnsError> {
        self.udp
            .local_addr()
            .map_err(|e| DnsError::TransportFailure(format!("local addr: {e}")))
    }

    /// Serve until either listener fails.
    pub async fn run(self) -> Result<(), DnsError> {
        info!(addr = %self.local_addr()?, "DNS server listening on UDP and TCP");
        tokio::select! {
            result = self.run_udp() => {
                error!("UDP listener stopped");
                result
            }
            result = self.run_tcp() => {
                error!("TCP listener stopped");
                result
            }
        }
    }

    async fn run_udp(&self) -> Result<(), DnsError> {
        let mut buf = vec![0u8; MAX_UDP_DATAGRAM];
        loop {
            let (len, src) = self
                .udp
                .recv_from(&mut buf)
                .await
                .map_err(|e| DnsError::TransportFailure(format!("udp recv: {e}")))?;
            let raw = buf[..len].to_vec();

            let socket = Arc::clone(&self.udp);
            let handler = Arc::clone(&self.handler);
            let config = Arc::clone(&self.config);
            let rate_limiter = Arc::clone(&self.rate_limiter);
            tokio::spawn(async move {
                let qps = config.live().await.rate_limit_qps;
                if !rate_limiter.check(src.ip(), qps).await {
                    debug!(%src, "rate limited, dropping UDP query");
                    return;
                }
                for response in handler.handle(&raw, src, Transport::Udp).await {
                    if let Err(e) = socket.send_to(&response, src).await {
                        debug!(%src, error = %e, "failed to send UDP response");
                    }
                }
            });
        }
    }

    async fn run_tcp(&self) -> Result<(), DnsError> {
        loop {
            let (stream, src) = self
                .tcp
                .accept()
                .await
                .map_err(|e| DnsError::TransportFailure(format!("tcp accept: {e}")))?;

            let Ok(permit) = Arc::clone(&self.tcp_semaphore).try_acquire_owned() else {
                debug!(%src, "TCP connection limit reached, dropping");
                continue;
            };

            let handler = Arc::clone(&self.handler);
            let config = Arc::clone(&self.config);
            let rate_limiter = Arc::clone(&self.rate_limiter);
            tokio::spawn(async move {
                if let Err(e) =
                    serve_tcp_connection(stream, src, handler, config, rate_limiter).await
                {
                    debug!(%src, error = %e, "TCP connection ended");
                }
                drop(permit);
            });
        }
    }
}

async fn serve_tcp_connection(
    mut stream: TcpStream,
    src: std::net::SocketAddr,
    handler: Arc<QueryHandler>,
    config: Arc<ConfigHandle>,
    rate_limiter: Arc<QueryRateLimiter>,
) -> Result<(), DnsError> {
    for _ in 0..MAX_QUERIES_PER_CONNECTION {
        let mut len_buf = [0u8; 2];
        match timeout(TCP_TIMEOUT, stream.read_exact(&mut len_buf)).await {
            Ok(Ok(_)) => {}
            // Peer closed or idled out.
            _ => break,
        }
        let len = u16::from_be_bytes(len_buf) as usize;
        if len == 0 || len > MAX_TCP_MESSAGE {
            break;
        }

        let mut raw = vec![0u8; len];
        match timeout(TCP_TIMEOUT, stream.read_exact(&mut raw)).await {
            Ok(Ok(_)) => {}
            _ => break,
        }

        let qps = config.live().await.rate_limit_qps;
        if !rate_limiter.check(src.ip(), qps).await {
            debug!(%src, "rate limited, closing TCP connection");
            break;
        }

        for response in handler.handle(&raw, src, Transport::Tcp).await {
            let mut framed = Vec::with_capacity(response.len() + 2);
            framed.extend_from_slice(&(response.len() as u16).to_be_bytes());
            framed.extend_from_slice(&response);
            timeout(TCP_TIMEOUT, stream.write_all(&framed))
                .await
                .map_err(|_| DnsError::TransportFailure("tcp write timeout".into()))?
                .map_err(|e| DnsError::TransportFailure(format!("tcp write: {e}")))?;
        }
    }
    Ok(())
}
