//! NOTIFY propagation (RFC 1996).
//!
//! Outbound: record changes on a primary arm a one-shot debounce timer
//! per zone; when it fires, every transfer peer is notified concurrently
//! over UDP with a TCP retry. A second schedule while the timer is armed
//! is a no-op.
//!
//! Inbound: per-zone fetch state collapses NOTIFY bursts into a single
//! AXFR. A NOTIFY while a fetch is pending, or within the minimum fetch
//! interval, is acknowledged but ignored.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RecordType};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::ConfigHandle;
use crate::errors::DnsError;
use crate::tsig::TsigStore;

const UDP_TIMEOUT: Duration = Duration::from_secs(3);
const TCP_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of the fetch queue; duplicates collapse through
/// `pending_fetch` so a small bound suffices.
const FETCH_QUEUE_DEPTH: usize = 64;

#[derive(Default)]
struct OutboundState {
    pending: bool,
    last_notify: Option<Instant>,
}

#[derive(Default, Clone)]
struct FetchState {
    pending_fetch: bool,
    last_fetch: Option<Instant>,
}

/// What to do with an inbound NOTIFY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyDecision {
    /// Fetch queued; acknowledge.
    Scheduled,
    /// Suppressed (pending fetch or too recent); still acknowledge.
    Ignored,
    /// Source address does not match the configured primary; drop
    /// without response.
    ForeignSource,
}

pub struct NotifyEngine {
    config: Arc<ConfigHandle>,
    tsig: Arc<TsigStore>,
    outbound: Mutex<HashMap<String, OutboundState>>,
    inbound: Mutex<HashMap<String, FetchState>>,
    fetch_tx: mpsc::Sender<String>,
}

impl NotifyEngine {
    /// Returns the engine plus the fetch-queue receiver consumed by the
    /// fetch worker.
    pub fn new(
        config: Arc<ConfigHandle>,
        tsig: Arc<TsigStore>,
    ) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (fetch_tx, fetch_rx) = mpsc::channel(FETCH_QUEUE_DEPTH);
        (
            Arc::new(Self {
                config,
                tsig,
                outbound: Mutex::new(HashMap::new()),
                inbound: Mutex::new(HashMap::new()),
                fetch_tx,
            }),
            fetch_rx,
        )
    }

    /// Arm (or no-op on an already armed) debounce timer for the zone.
    pub async fn schedule_notify(self: &Arc<Self>, zone: &str) {
        {
            let mut outbound = self.outbound.lock().await;
            let state = outbound.entry(zone.to_string()).or_default();
            if state.pending {
                return;
            }
            state.pending = true;
        }

        let engine = Arc::clone(self);
        let zone = zone.to_string();
        tokio::spawn(async move {
            let debounce = engine.config.live().await.primary.notify_debounce_ms;
            sleep(Duration::from_millis(debounce)).await;

            {
                let mut outbound = engine.outbound.lock().await;
                if let Some(state) = outbound.get_mut(&zone) {
                    state.pending = false;
                    state.last_notify = Some(Instant::now());
                }
            }
            engine.send_notifies(&zone).await;
        });
    }

    /// Notify every transfer peer concurrently.
    async fn send_notifies(self: &Arc<Self>, zone: &str) {
        let live = self.config.live().await;
        let peers = live.transfer_peers();
        if peers.is_empty() {
            return;
        }
        info!(zone, peers = peers.len(), "sending NOTIFY");

        let mut tasks = Vec::with_capacity(peers.len());
        for peer in peers {
            let engine = Arc::clone(self);
            let zone = zone.to_string();
            let enforce_tsig = live.enforce_tsig;
            tasks.push(tokio::spawn(async move {
                if let Err(e) = engine.notify_peer(&zone, &peer, enforce_tsig).await {
                    warn!(%zone, %peer, error = %e, "NOTIFY failed");
                }
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    async fn notify_peer(&self, zone: &str, peer: &str, enforce_tsig: bool) -> Result<(), DnsError> {
        let addr = if peer.contains(':') {
            peer.to_string()
        } else {
            format!("{peer}:53")
        };

        let mut wire = build_notify(zone)?;
        if enforce_tsig {
            if let Some((key_name, _)) = self.tsig.any_key().await {
                wire = self
                    .tsig
                    .sign(&wire, &key_name, None, Utc::now().timestamp() as u64)
                    .await?;
            }
        }

        match send_udp(&wire, &addr).await {
            Ok(_) => {
                debug!(zone, peer = %addr, "NOTIFY acknowledged over UDP");
                Ok(())
            }
            Err(udp_err) => {
                debug!(zone, peer = %addr, error = %udp_err, "UDP NOTIFY failed, retrying over TCP");
                send_tcp(&wire, &addr).await.map(|_| {
                    debug!(zone, peer = %addr, "NOTIFY acknowledged over TCP");
                })
            }
        }
    }

    /// Apply inbound NOTIFY policy for a zone. TSIG validation happens at
    /// the transport layer before this is called.
    pub async fn handle_inbound_notify(&self, zone: &str, source: IpAddr) -> NotifyDecision {
        let live = self.config.live().await;
        if !source.to_string().starts_with(&live.primary.ip) {
            return NotifyDecision::ForeignSource;
        }

        let min_interval = Duration::from_secs(live.secondary.min_fetch_interval_sec);
        let mut inbound = self.inbound.lock().await;
        let state = inbound.entry(zone.to_string()).or_default();

        if state.pending_fetch {
            return NotifyDecision::Ignored;
        }
        if let Some(last) = state.last_fetch {
            if last.elapsed() < min_interval {
                return NotifyDecision::Ignored;
            }
        }

        // Mark pending only once the zone is actually queued; a full
        // queue drops the NOTIFY and later ones retry.
        if self.fetch_tx.try_send(zone.to_string()).is_ok() {
            state.pending_fetch = true;
            NotifyDecision::Scheduled
        } else {
            warn!(zone, "fetch queue full, dropping NOTIFY");
            NotifyDecision::Ignored
        }
    }

    /// Fetch worker callback: fetch for `zone` completed (successfully or
    /// not); a success stamps the suppression window.
    pub async fn finish_fetch(&self, zone: &str, success: bool) {
        let mut inbound = self.inbound.lock().await;
        let state = inbound.entry(zone.to_string()).or_default();
        state.pending_fetch = false;
        if success {
            state.last_fetch = Some(Instant::now());
        }
    }

    /// Time of the last outbound NOTIFY for a zone, for diagnostics.
    pub async fn last_notify(&self, zone: &str) -> Option<Instant> {
        self.outbound.lock().await.get(zone).and_then(|s| s.last_notify)
    }
}

/// NOTIFY query: opcode NOTIFY, RD clear, SOA question for the zone.
fn build_notify(zone: &str) -> Result<Vec<u8>, DnsError> {
    let name = Name::from_ascii(zone)
        .map_err(|e| DnsError::InvalidInput(format!("bad zone {zone:?}: {e}")))?;
    let mut msg = Message::new();
    msg.set_id(rand::thread_rng().gen());
    msg.set_message_type(MessageType::Query);
    msg.set_op_code(OpCode::Notify);
    msg.set_recursion_desired(false);
    msg.add_query(Query::query(name, RecordType::SOA));
    msg.to_vec()
        .map_err(|e| DnsError::Internal(format!("encode NOTIFY: {e}")))
}

pub(crate) async fn send_udp(wire: &[u8], addr: &str) -> Result<Vec<u8>, DnsError> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(|e| DnsError::TransportFailure(format!("udp bind: {e}")))?;
    socket
        .send_to(wire, addr)
        .await
        .map_err(|e| DnsError::TransportFailure(format!("udp send to {addr}: {e}")))?;

    let mut buf = vec![0u8; 4096];
    let (len, _) = timeout(UDP_TIMEOUT, socket.recv_from(&mut buf))
        .await
        .map_err(|_| DnsError::TransportFailure(format!("udp timeout from {addr}")))?
        .map_err(|e| DnsError::TransportFailure(format!("udp recv from {addr}: {e}")))?;
    buf.truncate(len);
    Ok(buf)
}

async fn send_tcp(wire: &[u8], addr: &str) -> Result<Vec<u8>, DnsError> {
    let mut stream = timeout(TCP_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| DnsError::TransportFailure(format!("tcp connect timeout to {addr}")))?
        .map_err(|e| DnsError::TransportFailure(format!("tcp connect to {addr}: {e}")))?;

    let mut framed = Vec::with_capacity(wire.len() + 2);
    framed.extend_from_slice(&(wire.len() as u16).to_be_bytes());
    framed.extend_from_slice(wire);
    timeout(TCP_TIMEOUT, stream.write_all(&framed))
        .await
        .map_err(|_| DnsError::TransportFailure(format!("tcp write timeout to {addr}")))?
        .map_err(|e| DnsError::TransportFailure(format!("tcp write to {addr}: {e}")))?;

    let mut len_buf = [0u8; 2];
    timeout(TCP_TIMEOUT, stream.read_exact(&mut len_buf))
        .await
        .map_err(|_| DnsError::TransportFailure(format!("tcp read timeout from {addr}")))?
        .map_err(|e| DnsError::TransportFailure(format!("tcp read from {addr}: {e}")))?;
    let len = u16::from_be_bytes(len_buf) as usize;
    let mut reply = vec![0u8; len];
    timeout(TCP_TIMEOUT, stream.read_exact(&mut reply))
        .await
        .map_err(|_| DnsError::TransportFailure(format!("tcp read timeout from {addr}")))?
        .map_err(|e| DnsError::TransportFailure(format!("tcp read from {addr}: {e}")))?;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LiveConfig;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn engine_with(live: LiveConfig) -> (Arc<NotifyEngine>, mpsc::Receiver<String>) {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let config = ConfigHandle::ephemeral(Arc::clone(&storage), live);
        let tsig = TsigStore::load(storage).await.unwrap();
        NotifyEngine::new(config, tsig)
    }

    /// Acknowledge every UDP message on an ephemeral socket, counting
    /// NOTIFY opcodes.
    async fn spawn_udp_peer() -> (String, Arc<AtomicUsize>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap().to_string();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                if let Ok(msg) = Message::from_vec(&buf[..len]) {
                    if msg.op_code() == OpCode::Notify {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    let mut reply = Message::new();
                    reply.set_id(msg.id());
                    reply.set_message_type(MessageType::Response);
                    reply.set_op_code(OpCode::Notify);
                    let _ = socket.send_to(&reply.to_vec().unwrap(), from).await;
                }
            }
        });
        (addr, count)
    }

    #[tokio::test]
    async fn test_notify_debounce_collapses_bursts() {
        let (peer_addr, count) = spawn_udp_peer().await;

        let mut live = LiveConfig::default();
        live.allow_transfer = peer_addr;
        live.primary.notify_debounce_ms = 200;
        let (engine, _rx) = engine_with(live).await;

        // Three rapid schedules must produce exactly one NOTIFY.
        for _ in 0..3 {
            engine.schedule_notify("go53.test.").await;
            sleep(Duration::from_millis(20)).await;
        }
        sleep(Duration::from_millis(600)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(engine.last_notify("go53.test.").await.is_some());

        // After the timer fired, a new change arms a fresh timer.
        engine.schedule_notify("go53.test.").await;
        sleep(Duration::from_millis(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_inbound_notify_source_check() {
        let mut live = LiveConfig::default();
        live.primary.ip = "10.9.8.7".to_string();
        let (engine, _rx) = engine_with(live).await;

        let decision = engine
            .handle_inbound_notify("go53.test.", "127.0.0.1".parse().unwrap())
            .await;
        assert_eq!(decision, NotifyDecision::ForeignSource);
    }

    #[tokio::test]
    async fn test_inbound_notify_schedules_once() {
        let (engine, mut rx) = engine_with(LiveConfig::default()).await;
        let source: IpAddr = "127.0.0.1".parse().unwrap();

        let first = engine.handle_inbound_notify("go53.test.", source).await;
        assert_eq!(first, NotifyDecision::Scheduled);
        assert_eq!(rx.recv().await.unwrap(), "go53.test.");

        // While the fetch is pending, further NOTIFYs are suppressed.
        let second = engine.handle_inbound_notify("go53.test.", source).await;
        assert_eq!(second, NotifyDecision::Ignored);

        // A successful fetch keeps the zone suppressed for the minimum
        // interval (10 s by default).
        engine.finish_fetch("go53.test.", true).await;
        let third = engine.handle_inbound_notify("go53.test.", source).await;
        assert_eq!(third, NotifyDecision::Ignored);
    }

    #[tokio::test]
    async fn test_failed_fetch_allows_retry() {
        let (engine, mut rx) = engine_with(LiveConfig::default()).await;
        let source: IpAddr = "127.0.0.1".parse().unwrap();

        assert_eq!(
            engine.handle_inbound_notify("go53.test.", source).await,
            NotifyDecision::Scheduled
        );
        rx.recv().await.unwrap();

        // Failure clears pending without stamping the interval window.
        engine.finish_fetch("go53.test.", false).await;
        assert_eq!(
            engine.handle_inbound_notify("go53.test.", source).await,
            NotifyDecision::Scheduled
        );
    }

    #[tokio::test]
    async fn test_build_notify_shape() {
        let wire = build_notify("go53.test.").unwrap();
        let msg = Message::from_vec(&wire).unwrap();
        assert_eq!(msg.op_code(), OpCode::Notify);
        assert!(!msg.recursion_desired());
        assert_eq!(msg.queries().len(), 1);
        assert_eq!(msg.queries()[0].query_type(), RecordType::SOA);
    }
}
