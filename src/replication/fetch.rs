//! AXFR fetch worker (secondary side).
//!
//! A single long-running task drains the fetch queue. For each zone it
//! compares the primary's SOA serial against the local copy, transfers
//! the zone over TCP when the primary is ahead, and swaps the local zone
//! for the transferred one with the received serial preserved as-is.
//! Failures leave local data untouched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ConfigHandle;
use crate::errors::DnsError;
use crate::replication::notify::{send_udp, NotifyEngine};
use crate::tsig::TsigStore;
use crate::wire;
use crate::zone::store::ZoneStore;
use crate::zone::types::ZoneData;

const AXFR_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FetchWorker {
    store: Arc<ZoneStore>,
    config: Arc<ConfigHandle>,
    tsig: Arc<TsigStore>,
    engine: Arc<NotifyEngine>,
}

impl FetchWorker {
    pub fn new(
        store: Arc<ZoneStore>,
        config: Arc<ConfigHandle>,
        tsig: Arc<TsigStore>,
        engine: Arc<NotifyEngine>,
    ) -> Self {
        Self {
            store,
            config,
            tsig,
            engine,
        }
    }

    /// Drain the fetch queue, running at most `max_parallel_fetches`
    /// transfers at a time.
    pub async fn run(self, mut rx: mpsc::Receiver<String>) {
        let worker = Arc::new(self);
        let limit = worker.config.live().await.secondary.max_parallel_fetches.max(1);
        let semaphore = Arc::new(Semaphore::new(limit));

        while let Some(zone) = rx.recv().await {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
                let success = match worker.fetch_zone(&zone).await {
                    Ok(done) => done,
                    Err(e) => {
                        warn!(%zone, error = %e, "zone fetch failed");
                        false
                    }
                };
                worker.engine.finish_fetch(&zone, success).await;
                drop(permit);
            });
        }
    }

    /// Refresh one zone. Returns whether a transfer happened.
    pub async fn fetch_zone(&self, zone: &str) -> Result<bool, DnsError> {
        let live = self.config.live().await;
        let primary = format!("{}:{}", live.primary.ip, live.primary.port);

        let remote_serial = self.query_primary_serial(zone, &primary).await?;
        let local_serial = self.store.zone_serial(zone).await;

        let outdated = match local_serial {
            Some(local) => remote_serial > local,
            None => true,
        };
        if !outdated && !live.dev.dual_mode {
            debug!(
                zone,
                remote_serial,
                local_serial = local_serial.unwrap_or(0),
                "primary not ahead, skipping transfer"
            );
            return Ok(false);
        }

        let records = self
            .transfer_zone(zone, &primary, live.enforce_tsig)
            .await?;

        let mut data = ZoneData::default();
        for record in &records {
            let code = u16::from(record.record_type());
            if code == wire::TYPE_OPT || code == wire::TYPE_TSIG {
                continue;
            }
            if let Err(e) = data.insert_rr(zone, record) {
                warn!(zone, error = %e, "skipping record from transfer");
            }
        }
        if data.soa().is_none() {
            return Err(DnsError::TransportFailure(format!(
                "transfer of {zone} carried no SOA"
            )));
        }

        // Replace wholesale; the received serial is kept verbatim.
        self.store.replace_zone(zone, data).await?;
        info!(zone, serial = remote_serial, "zone refreshed from primary");
        Ok(true)
    }

    /// SOA serial as the primary advertises it.
    async fn query_primary_serial(&self, zone: &str, primary: &str) -> Result<u32, DnsError> {
        let name = Name::from_ascii(zone)
            .map_err(|e| DnsError::InvalidInput(format!("bad zone {zone:?}: {e}")))?;
        let mut msg = Message::new();
        msg.set_id(rand::thread_rng().gen());
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.add_query(Query::query(name, RecordType::SOA));
        let query = msg
            .to_vec()
            .map_err(|e| DnsError::Internal(format!("encode SOA query: {e}")))?;

        let reply = send_udp(&query, primary).await?;
        let parsed = Message::from_vec(&reply)
            .map_err(|e| DnsError::TransportFailure(format!("bad SOA reply: {e}")))?;
        parsed
            .answers()
            .iter()
            .find_map(|rr| match rr.data() {
                RData::SOA(soa) => Some(soa.serial()),
                _ => None,
            })
            .ok_or_else(|| {
                DnsError::TransportFailure(format!("primary returned no SOA for {zone}"))
            })
    }

    /// Full AXFR over TCP, collecting every answer record until the
    /// closing SOA.
    async fn transfer_zone(
        &self,
        zone: &str,
        primary: &str,
        enforce_tsig: bool,
    ) -> Result<Vec<hickory_proto::rr::Record>, DnsError> {
        let name = Name::from_ascii(zone)
            .map_err(|e| DnsError::InvalidInput(format!("bad zone {zone:?}: {e}")))?;
        let mut msg = Message::new();
        msg.set_id(rand::thread_rng().gen());
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.add_query(Query::query(name, RecordType::AXFR));
        let mut query = msg
            .to_vec()
            .map_err(|e| DnsError::Internal(format!("encode AXFR query: {e}")))?;

        if enforce_tsig {
            if let Some((key_name, _)) = self.tsig.any_key().await {
                query = self
                    .tsig
                    .sign(&query, &key_name, None, Utc::now().timestamp() as u64)
                    .await?;
            }
        }

        let mut stream = timeout(AXFR_TIMEOUT, TcpStream::connect(primary))
            .await
            .map_err(|_| DnsError::TransportFailure(format!("connect timeout to {primary}")))?
            .map_err(|e| DnsError::TransportFailure(format!("connect to {primary}: {e}")))?;

        let mut framed = Vec::with_capacity(query.len() + 2);
        framed.extend_from_slice(&(query.len() as u16).to_be_bytes());
        framed.extend_from_slice(&query);
        timeout(AXFR_TIMEOUT, stream.write_all(&framed))
            .await
            .map_err(|_| DnsError::TransportFailure("AXFR write timeout".into()))?
            .map_err(|e| DnsError::TransportFailure(format!("AXFR write: {e}")))?;

        let mut records = Vec::new();
        let mut soa_seen = 0usize;
        while soa_seen < 2 {
            let mut len_buf = [0u8; 2];
            timeout(AXFR_TIMEOUT, stream.read_exact(&mut len_buf))
                .await
                .map_err(|_| DnsError::TransportFailure("AXFR read timeout".into()))?
                .map_err(|e| DnsError::TransportFailure(format!("AXFR read: {e}")))?;
            let len = u16::from_be_bytes(len_buf) as usize;
            let mut payload = vec![0u8; len];
            timeout(AXFR_TIMEOUT, stream.read_exact(&mut payload))
                .await
                .map_err(|_| DnsError::TransportFailure("AXFR read timeout".into()))?
                .map_err(|e| DnsError::TransportFailure(format!("AXFR read: {e}")))?;

            // Drop a TSIG envelope before parsing; the records inside do
            // not include it.
            let stripped = wire::strip_tsig(&payload)
                .map(|(bytes, _)| bytes)
                .unwrap_or(payload);
            let parsed = Message::from_vec(&stripped)
                .map_err(|e| DnsError::TransportFailure(format!("bad AXFR message: {e}")))?;
            if parsed.response_code() != hickory_proto::op::ResponseCode::NoError {
                return Err(DnsError::TransportFailure(format!(
                    "AXFR refused: {:?}",
                    parsed.response_code()
                )));
            }
            for rr in parsed.answers() {
                if rr.record_type() == RecordType::SOA {
                    soa_seen += 1;
                }
                records.push(rr.clone());
            }
            if parsed.answers().is_empty() {
                return Err(DnsError::TransportFailure(
                    "empty AXFR message before closing SOA".into(),
                ));
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LiveConfig;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;
    use crate::zone::types::{ARecord, SoaRecord};
    use tokio::net::{TcpListener, UdpSocket};

    fn primary_zone(serial: u32) -> ZoneData {
        let mut zd = ZoneData::default();
        zd.soa.insert(
            "@".to_string(),
            SoaRecord {
                ns: "ns1.go53.test.".to_string(),
                mbox: "hostmaster.go53.test.".to_string(),
                serial,
                refresh: 3600,
                retry: 900,
                expire: 1209600,
                minimum: 300,
                ttl: 3600,
            },
        );
        zd.a.insert(
            "api".to_string(),
            vec![ARecord {
                ip: "192.0.2.1".to_string(),
                ttl: 3600,
            }],
        );
        zd
    }

    /// Serve SOA over UDP and AXFR over TCP for one zone on an ephemeral
    /// port pair.
    async fn spawn_mock_primary(zone: &'static str, data: ZoneData) -> u16 {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = udp.local_addr().unwrap().port();
        let tcp = TcpListener::bind(("127.0.0.1", port)).await.unwrap();

        let soa_data = data.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            loop {
                let Ok((len, from)) = udp.recv_from(&mut buf).await else {
                    break;
                };
                let Ok(query) = Message::from_vec(&buf[..len]) else {
                    continue;
                };
                let mut reply = Message::new();
                reply.set_id(query.id());
                reply.set_message_type(MessageType::Response);
                reply.set_op_code(OpCode::Query);
                reply.set_authoritative(true);
                for q in query.queries() {
                    reply.add_query(q.clone());
                }
                if let Some(soa) = soa_data.soa() {
                    reply.add_answer(soa.to_rr(zone).unwrap());
                }
                let _ = udp.send_to(&reply.to_vec().unwrap(), from).await;
            }
        });

        let axfr_data = data;
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = tcp.accept().await else {
                    break;
                };
                let mut len_buf = [0u8; 2];
                if stream.read_exact(&mut len_buf).await.is_err() {
                    continue;
                }
                let len = u16::from_be_bytes(len_buf) as usize;
                let mut payload = vec![0u8; len];
                if stream.read_exact(&mut payload).await.is_err() {
                    continue;
                }
                let Ok(query) = Message::from_vec(&payload) else {
                    continue;
                };

                let mut reply = Message::new();
                reply.set_id(query.id());
                reply.set_message_type(MessageType::Response);
                reply.set_op_code(OpCode::Query);
                reply.set_authoritative(true);
                for q in query.queries() {
                    reply.add_query(q.clone());
                }
                // SOA-framed zone body in a single envelope.
                let records = axfr_data.all_records(zone);
                let soa = records[0].clone();
                reply.add_answer(soa.clone());
                for rr in records.into_iter().skip(1) {
                    reply.add_answer(rr);
                }
                reply.add_answer(soa);

                let wire = reply.to_vec().unwrap();
                let mut framed = Vec::with_capacity(wire.len() + 2);
                framed.extend_from_slice(&(wire.len() as u16).to_be_bytes());
                framed.extend_from_slice(&wire);
                let _ = stream.write_all(&framed).await;
            }
        });

        port
    }

    async fn worker_for(port: u16) -> (FetchWorker, Arc<ZoneStore>) {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let (store, _sign_rx) = ZoneStore::load(Arc::clone(&storage)).await.unwrap();
        let mut live = LiveConfig::default();
        live.primary.ip = "127.0.0.1".to_string();
        live.primary.port = port;
        let config = ConfigHandle::ephemeral(Arc::clone(&storage), live);
        let tsig = TsigStore::load(storage).await.unwrap();
        let (engine, _rx) = NotifyEngine::new(Arc::clone(&config), Arc::clone(&tsig));
        (
            FetchWorker::new(Arc::clone(&store), config, tsig, engine),
            store,
        )
    }

    fn local_copy(serial: u32) -> ZoneData {
        let mut zd = primary_zone(serial);
        // Local copy differs in content so a transfer is observable.
        zd.a.clear();
        zd
    }

    #[tokio::test]
    async fn test_fetch_replaces_outdated_zone_and_preserves_serial() {
        let port = spawn_mock_primary("go53.test.", primary_zone(250101002)).await;
        let (worker, store) = worker_for(port).await;

        store
            .replace_zone("go53.test.", local_copy(250101001))
            .await
            .unwrap();

        let fetched = worker.fetch_zone("go53.test.").await.unwrap();
        assert!(fetched);

        // The transferred serial lands verbatim, not re-bumped.
        assert_eq!(store.zone_serial("go53.test.").await, Some(250101002));
        let zd = store.get("go53.test.").await.unwrap();
        assert_eq!(zd.a["api"][0].ip, "192.0.2.1");
    }

    #[tokio::test]
    async fn test_fetch_skips_when_local_is_current() {
        let port = spawn_mock_primary("go53.test.", primary_zone(250101002)).await;
        let (worker, store) = worker_for(port).await;

        let local = local_copy(250101002);
        store.replace_zone("go53.test.", local.clone()).await.unwrap();

        let fetched = worker.fetch_zone("go53.test.").await.unwrap();
        assert!(!fetched);
        // Untouched local data.
        assert_eq!(store.get("go53.test.").await.unwrap(), local);
    }

    #[tokio::test]
    async fn test_fetch_missing_zone_bootstraps() {
        let port = spawn_mock_primary("go53.test.", primary_zone(250101005)).await;
        let (worker, store) = worker_for(port).await;

        let fetched = worker.fetch_zone("go53.test.").await.unwrap();
        assert!(fetched);
        assert_eq!(store.zone_serial("go53.test.").await, Some(250101005));
    }

    #[tokio::test]
    async fn test_fetch_failure_leaves_zone_unchanged() {
        // No primary listening: connect/refused surfaces as transport
        // failure and the local zone stays as it was.
        let (worker, store) = worker_for(1).await;
        let local = local_copy(250101001);
        store.replace_zone("go53.test.", local.clone()).await.unwrap();

        assert!(worker.fetch_zone("go53.test.").await.is_err());
        assert_eq!(store.get("go53.test.").await.unwrap(), local);
    }
}
