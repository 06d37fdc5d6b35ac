//! Question dispatch and response assembly.
//!
//! One entry point takes raw message bytes plus transport context and
//! returns zero or more raw responses (AXFR streams several, an ignored
//! NOTIFY returns none). TSIG is checked before parsing; EDNS parameters
//! are read off the raw bytes.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::TXT;
use hickory_proto::rr::{DNSClass, RData, Record, RecordType};
use tracing::{debug, warn};

use crate::config::{ConfigHandle, LiveConfig};
use crate::replication::{NotifyDecision, NotifyEngine};
use crate::server::axfr;
use crate::tsig::{TsigCheck, TsigStore};
use crate::util::ensure_fqdn;
use crate::wire;
use crate::zone::rtypes::{HandlerCtx, Registry};
use crate::zone::store::ZoneStore;

/// How many CNAME links an answer chase follows.
const MAX_CNAME_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

pub struct QueryHandler {
    store: Arc<ZoneStore>,
    registry: Arc<Registry>,
    config: Arc<ConfigHandle>,
    tsig: Arc<TsigStore>,
    notify: Arc<NotifyEngine>,
}

/// TSIG context carried from request verification into response signing.
struct TsigContext {
    key_name: String,
    key: crate::tsig::TsigKey,
    request_mac: Vec<u8>,
}

impl QueryHandler {
    pub fn new(
        store: Arc<ZoneStore>,
        registry: Arc<Registry>,
        config: Arc<ConfigHandle>,
        tsig: Arc<TsigStore>,
        notify: Arc<NotifyEngine>,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            tsig,
            notify,
        }
    }

    fn ctx(&self) -> HandlerCtx {
        HandlerCtx {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }

    /// Process one inbound message. Returns the raw responses to send, in
    /// order; empty means drop silently.
    pub async fn handle(&self, raw: &[u8], src: SocketAddr, transport: Transport) -> Vec<Vec<u8>> {
        let live = self.config.live().await;
        let now = Utc::now().timestamp() as u64;
        let edns = wire::edns_params(raw);

        let (payload, tsig_ctx) = match self.tsig.check(raw, now).await {
            TsigCheck::Unsigned => (raw.to_vec(), None),
            TsigCheck::Verified {
                stripped,
                key_name,
                mac,
            } => {
                let key = self.tsig.get(&key_name).await;
                (
                    stripped,
                    key.map(|key| TsigContext {
                        key_name,
                        key,
                        request_mac: mac,
                    }),
                )
            }
            TsigCheck::Rejected(reason) => {
                debug!(%src, ?reason, "TSIG validation failed");
                return vec![minimal_error(raw, ResponseCode::Refused)];
            }
        };

        let request = match Message::from_vec(&payload) {
            Ok(request) => request,
            Err(e) => {
                debug!(%src, error = %e, "unparseable query");
                return vec![minimal_error(raw, ResponseCode::FormErr)];
            }
        };

        if request.op_code() == OpCode::Notify {
            return self
                .handle_notify(&request, src, &live, tsig_ctx.as_ref(), now)
                .await;
        }
        if request.op_code() != OpCode::Query {
            return vec![self.finish(
                error_response(&request, ResponseCode::NotImp),
                &edns,
                &live,
                transport,
                tsig_ctx.as_ref(),
                now,
            )];
        }

        // Zone transfers stream multiple messages and bypass the normal
        // single-response path.
        if request
            .queries()
            .iter()
            .any(|q| matches!(q.query_type(), RecordType::AXFR | RecordType::IXFR))
        {
            return self
                .handle_axfr(&request, transport, &live, tsig_ctx.as_ref(), now)
                .await;
        }

        let mut response = Message::new();
        response.set_id(request.id());
        response.set_message_type(MessageType::Response);
        response.set_op_code(OpCode::Query);
        response.set_recursion_desired(request.recursion_desired());
        response.set_recursion_available(false);
        response.set_authoritative(true);
        for q in request.queries() {
            response.add_query(q.clone());
        }

        let mut rcode = ResponseCode::NoError;
        for question in request.queries() {
            let answers = self.answer_question(question, &live).await;
            if answers.is_empty() {
                match self.negative_authority(question).await {
                    Some((soa, name_exists)) => {
                        if !name_exists {
                            rcode = ResponseCode::NXDomain;
                        }
                        response.add_name_server(soa);
                    }
                    // Not our zone at all.
                    None => rcode = ResponseCode::Refused,
                }
            } else {
                for rr in answers {
                    response.add_answer(rr);
                }
            }
        }
        response.set_response_code(rcode);

        if edns.dnssec_ok && live.dnssec_enabled {
            self.attach_rrsigs(&mut response).await;
        }

        vec![self.finish(response, &edns, &live, transport, tsig_ctx.as_ref(), now)]
    }

    /// Answers for one question, CHAOS and CNAME chasing included.
    async fn answer_question(&self, question: &Query, live: &LiveConfig) -> Vec<Record> {
        let qname = ensure_fqdn(&question.name().to_string());
        let qtype = question.query_type();

        // CHAOS TXT version.bind is synthesized from live config.
        if question.query_class() == DNSClass::CH {
            if qtype == RecordType::TXT && qname == "version.bind." {
                if let Ok(name) = hickory_proto::rr::Name::from_ascii(&qname) {
                    let mut rr =
                        Record::from_rdata(name, 0, RData::TXT(TXT::new(vec![live.version.clone()])));
                    rr.set_dns_class(DNSClass::CH);
                    return vec![rr];
                }
            }
            return Vec::new();
        }

        let code = u16::from(qtype);
        match qtype {
            // A and SRV questions chase CNAMEs; everything else answers
            // the asked type directly.
            RecordType::A | RecordType::SRV => {
                self.lookup_with_cname_chase(&qname, code).await
            }
            _ => self.lookup_direct(&qname, code).await,
        }
    }

    async fn lookup_direct(&self, qname: &str, code: u16) -> Vec<Record> {
        let Some(handler) = self.registry.get(code) else {
            return Vec::new();
        };
        handler.lookup(&self.ctx(), qname).await.unwrap_or_default()
    }

    /// Direct lookup, falling back to the CNAME at the name and resolving
    /// the chain's tail for the requested type.
    async fn lookup_with_cname_chase(&self, qname: &str, code: u16) -> Vec<Record> {
        let mut answers = Vec::new();
        let mut current = qname.to_string();

        for _ in 0..MAX_CNAME_DEPTH {
            let direct = self.lookup_direct(&current, code).await;
            if !direct.is_empty() {
                answers.extend(direct);
                break;
            }
            let cnames = self.lookup_direct(&current, 5).await;
            let Some(first) = cnames.first() else {
                break;
            };
            let target = match first.data() {
                RData::CNAME(cname) => ensure_fqdn(&cname.0.to_string()),
                _ => break,
            };
            answers.extend(cnames);
            current = target;
        }
        answers
    }

    /// SOA for the zone owning `question`'s name, plus whether the owner
    /// name exists at all (NODATA versus NXDOMAIN).
    async fn negative_authority(&self, question: &Query) -> Option<(Record, bool)> {
        let qname = ensure_fqdn(&question.name().to_string());
        let (zone, name) = self.store.find_zone(&qname).await?;

        let name_exists = self
            .store
            .with_zone(&zone, |zd| !zd.types_at(&name, "").is_empty())
            .await
            .unwrap_or(false);

        let soa = self
            .store
            .with_zone(&zone, |zd| {
                zd.soa().and_then(|soa| soa.to_rr(&zone).ok())
            })
            .await
            .flatten()?;
        Some((soa, name_exists))
    }

    /// Append covering RRSIGs for every answer RRset (DO bit handling).
    async fn attach_rrsigs(&self, response: &mut Message) {
        let Some(rrsig_handler) = self.registry.get(wire::TYPE_RRSIG) else {
            return;
        };

        let mut keys: Vec<String> = Vec::new();
        for rr in response.answers() {
            let code = u16::from(rr.record_type());
            if code == wire::TYPE_RRSIG {
                continue;
            }
            let owner = ensure_fqdn(&rr.name().to_string());
            let key = format!("{owner}___{}", wire::type_name(rr.record_type()));
            if !keys.contains(&key) {
                keys.push(key);
            }
        }

        let mut seen: Vec<Vec<u8>> = Vec::new();
        for key in keys {
            let Some(sigs) = rrsig_handler.lookup(&self.ctx(), &key).await else {
                continue;
            };
            for sig in sigs {
                let identity = wire::canonical_rr_bytes(&sig);
                if seen.contains(&identity) {
                    continue;
                }
                seen.push(identity);
                response.add_answer(sig);
            }
        }
    }

    async fn handle_notify(
        &self,
        request: &Message,
        src: SocketAddr,
        live: &LiveConfig,
        tsig_ctx: Option<&TsigContext>,
        now: u64,
    ) -> Vec<Vec<u8>> {
        if !live.acts_as_secondary() {
            return vec![self.sign_and_pack(
                error_response(request, ResponseCode::NotImp),
                tsig_ctx,
                now,
            )];
        }
        if live.enforce_tsig && tsig_ctx.is_none() {
            return vec![self.sign_and_pack(
                error_response(request, ResponseCode::Refused),
                tsig_ctx,
                now,
            )];
        }
        let Some(question) = request.queries().first() else {
            return vec![self.sign_and_pack(
                error_response(request, ResponseCode::FormErr),
                tsig_ctx,
                now,
            )];
        };

        let zone = ensure_fqdn(&question.name().to_string());
        // Only zones we hold an SOA for are refreshable (RFC 1034 §4.3.4).
        if self.store.zone_serial(&zone).await.is_none() {
            return vec![self.sign_and_pack(
                error_response(request, ResponseCode::Refused),
                tsig_ctx,
                now,
            )];
        }

        match self.notify.handle_inbound_notify(&zone, src.ip()).await {
            NotifyDecision::ForeignSource => {
                warn!(%zone, %src, "NOTIFY from unexpected source, dropping");
                Vec::new()
            }
            NotifyDecision::Scheduled | NotifyDecision::Ignored => {
                let mut reply = Message::new();
                reply.set_id(request.id());
                reply.set_message_type(MessageType::Response);
                reply.set_op_code(OpCode::Notify);
                reply.set_authoritative(true);
                for q in request.queries() {
                    reply.add_query(q.clone());
                }
                vec![self.sign_and_pack(reply, tsig_ctx, now)]
            }
        }
    }

    async fn handle_axfr(
        &self,
        request: &Message,
        transport: Transport,
        live: &LiveConfig,
        tsig_ctx: Option<&TsigContext>,
        now: u64,
    ) -> Vec<Vec<u8>> {
        let refuse = |reason: &str| {
            debug!(reason, "refusing zone transfer");
            vec![self.sign_and_pack(error_response(request, ResponseCode::Refused), tsig_ctx, now)]
        };

        if transport != Transport::Tcp {
            return refuse("AXFR requires TCP");
        }
        if !live.allow_axfr {
            return refuse("allow_axfr disabled");
        }
        if !live.acts_as_primary() {
            return refuse("secondary mode");
        }
        if live.enforce_tsig && tsig_ctx.is_none() {
            return refuse("TSIG required");
        }

        let Some(question) = request.queries().first() else {
            return vec![self.sign_and_pack(
                error_response(request, ResponseCode::FormErr),
                tsig_ctx,
                now,
            )];
        };
        let qname = ensure_fqdn(&question.name().to_string());

        let Some(axfr_handler) = self.registry.get(252) else {
            return vec![self.sign_and_pack(
                error_response(request, ResponseCode::ServFail),
                tsig_ctx,
                now,
            )];
        };
        let Some(records) = axfr_handler.lookup(&self.ctx(), &qname).await else {
            return vec![self.sign_and_pack(
                error_response(request, ResponseCode::ServFail),
                tsig_ctx,
                now,
            )];
        };

        let messages = match axfr::build_axfr_responses(request, records, axfr::MAX_MESSAGE_BYTES) {
            Ok(messages) => messages,
            Err(e) => {
                warn!(zone = %qname, error = %e, "AXFR packing failed");
                return vec![self.sign_and_pack(
                    error_response(request, ResponseCode::ServFail),
                    tsig_ctx,
                    now,
                )];
            }
        };

        // Sign the stream as a MAC chain: the first envelope folds in the
        // request MAC, each later one the previous envelope's MAC.
        let mut out = Vec::with_capacity(messages.len());
        let mut prior_mac = tsig_ctx.map(|ctx| ctx.request_mac.clone());
        for msg in messages {
            let Ok(packed) = msg.to_vec() else {
                return vec![self.sign_and_pack(
                    error_response(request, ResponseCode::ServFail),
                    tsig_ctx,
                    now,
                )];
            };
            match tsig_ctx {
                Some(ctx) => match self.sign_bytes(&packed, ctx, prior_mac.as_deref(), now) {
                    Some((signed, mac)) => {
                        prior_mac = Some(mac);
                        out.push(signed);
                    }
                    None => out.push(packed),
                },
                None => out.push(packed),
            }
        }
        out
    }

    /// Apply EDNS, truncation and TSIG to a finished response.
    fn finish(
        &self,
        mut response: Message,
        edns: &wire::EdnsParams,
        live: &LiveConfig,
        transport: Transport,
        tsig_ctx: Option<&TsigContext>,
        now: u64,
    ) -> Vec<u8> {
        if edns.present {
            let mut opt = Edns::new();
            opt.set_max_payload(live.max_udp_size);
            response.set_edns(opt);
        }

        let mut packed = match response.to_vec() {
            Ok(packed) => packed,
            Err(e) => {
                warn!(error = %e, "response serialization failed");
                let mut fallback = Message::new();
                fallback.set_id(response.id());
                fallback.set_message_type(MessageType::Response);
                fallback.set_response_code(ResponseCode::ServFail);
                fallback.to_vec().unwrap_or_default()
            }
        };

        if transport == Transport::Udp {
            let limit = if edns.present {
                usize::from(edns.max_payload.clamp(512, live.max_udp_size.max(512)))
            } else {
                512
            };
            if packed.len() > limit {
                let mut truncated = Message::new();
                truncated.set_id(response.id());
                truncated.set_message_type(MessageType::Response);
                truncated.set_op_code(response.op_code());
                truncated.set_authoritative(true);
                truncated.set_truncated(true);
                truncated.set_response_code(response.response_code());
                for q in response.queries() {
                    truncated.add_query(q.clone());
                }
                packed = truncated.to_vec().unwrap_or(packed);
            }
        }

        match tsig_ctx {
            Some(ctx) => self
                .sign_bytes(&packed, ctx, Some(&ctx.request_mac), now)
                .map(|(signed, _)| signed)
                .unwrap_or(packed),
            None => packed,
        }
    }

    fn sign_and_pack(&self, msg: Message, tsig_ctx: Option<&TsigContext>, now: u64) -> Vec<u8> {
        let packed = msg.to_vec().unwrap_or_default();
        match tsig_ctx {
            Some(ctx) => self
                .sign_bytes(&packed, ctx, Some(&ctx.request_mac), now)
                .map(|(signed, _)| signed)
                .unwrap_or(packed),
            None => packed,
        }
    }

    /// Sign raw bytes with the verified request key; returns the signed
    /// message and its MAC for stream chaining.
    fn sign_bytes(
        &self,
        packed: &[u8],
        ctx: &TsigContext,
        prior_mac: Option<&[u8]>,
        now: u64,
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        let signed =
            crate::tsig::sign_message(packed, &ctx.key_name, &ctx.key, prior_mac, now).ok()?;
        let (_, tsig) = wire::strip_tsig(&signed)?;
        Some((signed, tsig.mac))
    }
}

/// Build a response with `rcode` echoing the request's questions.
fn error_response(request: &Message, rcode: ResponseCode) -> Message {
    let mut response = Message::new();
    response.set_id(request.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(request.op_code());
    response.set_response_code(rcode);
    for q in request.queries() {
        response.add_query(q.clone());
    }
    response
}

/// Header-only error for messages we could not parse: echo the ID, set QR
/// and the rcode by hand.
fn minimal_error(raw: &[u8], rcode: ResponseCode) -> Vec<u8> {
    let id = if raw.len() >= 2 {
        [raw[0], raw[1]]
    } else {
        [0, 0]
    };
    let mut header = vec![0u8; 12];
    header[0] = id[0];
    header[1] = id[1];
    header[2] = 0x80; // QR
    header[3] = rcode.low() & 0x0F;
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LiveConfig, ServerMode};
    use crate::dnssec::keys::KeyStore;
    use crate::storage::memory::MemoryStorage;
    use crate::storage::Storage;
    use crate::tsig::{generate_secret, TsigKey, HMAC_SHA256_NAME};
    use crate::zone::api::RecordApi;
    use hickory_proto::rr::Name;
    use serde_json::json;

    struct Fixture {
        handler: QueryHandler,
        api: RecordApi,
        store: Arc<ZoneStore>,
        tsig: Arc<TsigStore>,
    }

    async fn fixture(live: LiveConfig) -> Fixture {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let (store, _sign_rx) = ZoneStore::load(Arc::clone(&storage)).await.unwrap();
        let config = ConfigHandle::ephemeral(Arc::clone(&storage), live);
        let tsig = TsigStore::load(Arc::clone(&storage)).await.unwrap();
        let (notify, _fetch_rx) = NotifyEngine::new(Arc::clone(&config), Arc::clone(&tsig));
        let keys = KeyStore::load(storage).await.unwrap();
        let registry = Arc::new(Registry::standard());

        let handler = QueryHandler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&config),
            Arc::clone(&tsig),
            Arc::clone(&notify),
        );
        let api = RecordApi::new(
            Arc::clone(&store),
            registry,
            config,
            notify,
            keys,
        );
        Fixture {
            handler,
            api,
            store,
            tsig,
        }
    }

    fn src() -> SocketAddr {
        "127.0.0.1:5353".parse().unwrap()
    }

    fn query(name: &str, rtype: RecordType) -> Vec<u8> {
        let mut msg = Message::new();
        msg.set_id(4321);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.set_recursion_desired(true);
        msg.add_query(Query::query(Name::from_ascii(name).unwrap(), rtype));
        msg.to_vec().unwrap()
    }

    async fn seed_zone(fx: &Fixture) {
        fx.api
            .add_record("SOA", "go53.test.", "@", json!({"ns": "ns1.go53.test."}), None)
            .await
            .unwrap();
        fx.api
            .add_record("NS", "go53.test.", "@", json!({"ns": "ns1.go53.test."}), None)
            .await
            .unwrap();
        fx.api
            .add_record("A", "go53.test.", "api", json!({"ip": "192.0.2.1"}), Some(3600))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_a_query_answers_authoritatively() {
        let fx = fixture(LiveConfig::default()).await;
        seed_zone(&fx).await;

        let responses = fx
            .handler
            .handle(&query("api.go53.test.", RecordType::A), src(), Transport::Udp)
            .await;
        assert_eq!(responses.len(), 1);
        let msg = Message::from_vec(&responses[0]).unwrap();

        assert!(msg.authoritative());
        assert_eq!(msg.response_code(), ResponseCode::NoError);
        assert_eq!(msg.answers().len(), 1);
        let rr = &msg.answers()[0];
        assert_eq!(rr.record_type(), RecordType::A);
        assert_eq!(rr.ttl(), 3600);
        match rr.data() {
            RData::A(a) => assert_eq!(a.0.to_string(), "192.0.2.1"),
            other => panic!("expected A rdata, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_a_query_follows_cname() {
        let fx = fixture(LiveConfig::default()).await;
        seed_zone(&fx).await;
        fx.api
            .add_record("A", "go53.test.", "real", json!({"ip": "192.0.2.2"}), None)
            .await
            .unwrap();
        fx.api
            .add_record(
                "CNAME",
                "go53.test.",
                "alias",
                json!({"target": "real.go53.test."}),
                None,
            )
            .await
            .unwrap();

        let responses = fx
            .handler
            .handle(&query("alias.go53.test.", RecordType::A), src(), Transport::Udp)
            .await;
        let msg = Message::from_vec(&responses[0]).unwrap();

        assert_eq!(msg.answers().len(), 2);
        assert_eq!(msg.answers()[0].record_type(), RecordType::CNAME);
        assert_eq!(msg.answers()[1].record_type(), RecordType::A);
    }

    #[tokio::test]
    async fn test_nodata_gets_soa_authority() {
        let fx = fixture(LiveConfig::default()).await;
        seed_zone(&fx).await;

        let responses = fx
            .handler
            .handle(&query("api.go53.test.", RecordType::MX), src(), Transport::Udp)
            .await;
        let msg = Message::from_vec(&responses[0]).unwrap();

        assert_eq!(msg.response_code(), ResponseCode::NoError);
        assert!(msg.answers().is_empty());
        assert_eq!(msg.name_servers().len(), 1);
        assert_eq!(msg.name_servers()[0].record_type(), RecordType::SOA);
    }

    #[tokio::test]
    async fn test_nxdomain_for_missing_name() {
        let fx = fixture(LiveConfig::default()).await;
        seed_zone(&fx).await;

        let responses = fx
            .handler
            .handle(
                &query("missing.go53.test.", RecordType::A),
                src(),
                Transport::Udp,
            )
            .await;
        let msg = Message::from_vec(&responses[0]).unwrap();
        assert_eq!(msg.response_code(), ResponseCode::NXDomain);
        assert_eq!(msg.name_servers().len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_zone_refused() {
        let fx = fixture(LiveConfig::default()).await;
        seed_zone(&fx).await;

        let responses = fx
            .handler
            .handle(&query("other.example.", RecordType::A), src(), Transport::Udp)
            .await;
        let msg = Message::from_vec(&responses[0]).unwrap();
        assert_eq!(msg.response_code(), ResponseCode::Refused);
    }

    #[tokio::test]
    async fn test_chaos_version_bind() {
        let mut live = LiveConfig::default();
        live.version = "zone53 test build".to_string();
        let fx = fixture(live).await;

        let mut msg = Message::new();
        msg.set_id(7);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        let mut q = Query::query(Name::from_ascii("version.bind.").unwrap(), RecordType::TXT);
        q.set_query_class(DNSClass::CH);
        msg.add_query(q);

        let responses = fx
            .handler
            .handle(&msg.to_vec().unwrap(), src(), Transport::Udp)
            .await;
        let reply = Message::from_vec(&responses[0]).unwrap();
        assert_eq!(reply.answers().len(), 1);
        match reply.answers()[0].data() {
            RData::TXT(txt) => {
                let text: String = txt
                    .txt_data()
                    .iter()
                    .map(|part| String::from_utf8_lossy(part).to_string())
                    .collect();
                assert_eq!(text, "zone53 test build");
            }
            other => panic!("expected TXT, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_query_opcode_notimp() {
        let fx = fixture(LiveConfig::default()).await;

        let mut msg = Message::new();
        msg.set_id(3);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Update);
        msg.add_query(Query::query(
            Name::from_ascii("go53.test.").unwrap(),
            RecordType::SOA,
        ));

        let responses = fx
            .handler
            .handle(&msg.to_vec().unwrap(), src(), Transport::Udp)
            .await;
        let reply = Message::from_vec(&responses[0]).unwrap();
        assert_eq!(reply.response_code(), ResponseCode::NotImp);
    }

    #[tokio::test]
    async fn test_do_bit_attaches_rrsig() {
        let fx = fixture(LiveConfig::default()).await;
        seed_zone(&fx).await;
        fx.store
            .insert_rrsig(
                "go53.test.",
                "A",
                "api",
                crate::zone::types::RrsigRecord {
                    type_covered: "A".to_string(),
                    algorithm: 13,
                    labels: 3,
                    orig_ttl: 3600,
                    expiration: 2_000_000_000,
                    inception: 1_000_000_000,
                    key_tag: 4242,
                    signer_name: "go53.test.".to_string(),
                    signature: "c2ln".to_string(),
                    ttl: 3600,
                },
            )
            .await
            .unwrap();

        // Plain query: no RRSIG.
        let responses = fx
            .handler
            .handle(&query("api.go53.test.", RecordType::A), src(), Transport::Udp)
            .await;
        let plain = Message::from_vec(&responses[0]).unwrap();
        assert_eq!(plain.answers().len(), 1);

        // DO-flagged query: RRSIG rides along.
        let mut raw = query("api.go53.test.", RecordType::A);
        raw[11] += 1; // arcount
        raw.push(0); // root owner for OPT
        raw.extend_from_slice(&wire::TYPE_OPT.to_be_bytes());
        raw.extend_from_slice(&1232u16.to_be_bytes());
        raw.extend_from_slice(&0x8000u32.to_be_bytes()); // DO
        raw.extend_from_slice(&0u16.to_be_bytes());

        let responses = fx.handler.handle(&raw, src(), Transport::Udp).await;
        let secure = Message::from_vec(&responses[0]).unwrap();
        assert_eq!(secure.answers().len(), 2);
        let codes: Vec<u16> = secure
            .answers()
            .iter()
            .map(|rr| u16::from(rr.record_type()))
            .collect();
        assert!(codes.contains(&wire::TYPE_RRSIG));
    }

    #[tokio::test]
    async fn test_axfr_requires_tcp_and_gate() {
        let mut live = LiveConfig::default();
        live.allow_axfr = true;
        let fx = fixture(live).await;
        seed_zone(&fx).await;

        // UDP: refused.
        let responses = fx
            .handler
            .handle(&query("go53.test.", RecordType::AXFR), src(), Transport::Udp)
            .await;
        let msg = Message::from_vec(&responses[0]).unwrap();
        assert_eq!(msg.response_code(), ResponseCode::Refused);

        // TCP: full zone, SOA first and last.
        let responses = fx
            .handler
            .handle(&query("go53.test.", RecordType::AXFR), src(), Transport::Tcp)
            .await;
        assert_eq!(responses.len(), 1);
        let msg = Message::from_vec(&responses[0]).unwrap();
        assert_eq!(msg.response_code(), ResponseCode::NoError);
        let answers = msg.answers();
        assert!(answers.len() >= 4);
        assert_eq!(answers.first().unwrap().record_type(), RecordType::SOA);
        assert_eq!(answers.last().unwrap().record_type(), RecordType::SOA);
    }

    #[tokio::test]
    async fn test_axfr_gate_defaults_closed() {
        let fx = fixture(LiveConfig::default()).await;
        seed_zone(&fx).await;

        let responses = fx
            .handler
            .handle(&query("go53.test.", RecordType::AXFR), src(), Transport::Tcp)
            .await;
        let msg = Message::from_vec(&responses[0]).unwrap();
        assert_eq!(msg.response_code(), ResponseCode::Refused);
    }

    #[tokio::test]
    async fn test_axfr_refused_in_secondary_mode() {
        let mut live = LiveConfig::default();
        live.allow_axfr = true;
        live.mode = ServerMode::Secondary;
        let fx = fixture(live).await;
        seed_zone(&fx).await;

        let responses = fx
            .handler
            .handle(&query("go53.test.", RecordType::AXFR), src(), Transport::Tcp)
            .await;
        let msg = Message::from_vec(&responses[0]).unwrap();
        assert_eq!(msg.response_code(), ResponseCode::Refused);
    }

    #[tokio::test]
    async fn test_axfr_tsig_enforcement() {
        let mut live = LiveConfig::default();
        live.allow_axfr = true;
        live.enforce_tsig = true;
        let fx = fixture(live).await;
        seed_zone(&fx).await;
        fx.tsig
            .save(
                "xxfr-key.",
                TsigKey {
                    algorithm: HMAC_SHA256_NAME.to_string(),
                    secret: generate_secret(),
                },
            )
            .await
            .unwrap();

        // Unsigned request: refused.
        let responses = fx
            .handler
            .handle(&query("go53.test.", RecordType::AXFR), src(), Transport::Tcp)
            .await;
        let msg = Message::from_vec(&responses[0]).unwrap();
        assert_eq!(msg.response_code(), ResponseCode::Refused);

        // Signed request: transfer served and responses signed.
        let now = Utc::now().timestamp() as u64;
        let signed = fx
            .tsig
            .sign(&query("go53.test.", RecordType::AXFR), "xxfr-key.", None, now)
            .await
            .unwrap();
        let responses = fx.handler.handle(&signed, src(), Transport::Tcp).await;
        assert_eq!(responses.len(), 1);
        let (stripped, _tsig) =
            wire::strip_tsig(&responses[0]).expect("transfer response carries TSIG");
        let msg = Message::from_vec(&stripped).unwrap();
        assert_eq!(msg.response_code(), ResponseCode::NoError);
        assert_eq!(
            msg.answers().first().unwrap().record_type(),
            RecordType::SOA
        );
    }

    #[tokio::test]
    async fn test_notify_from_foreign_source_is_silent() {
        let mut live = LiveConfig::default();
        live.mode = ServerMode::Secondary;
        live.primary.ip = "10.1.2.3".to_string();
        let fx = fixture(live).await;
        seed_zone(&fx).await;

        let mut msg = Message::new();
        msg.set_id(12);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Notify);
        msg.add_query(Query::query(
            Name::from_ascii("go53.test.").unwrap(),
            RecordType::SOA,
        ));

        let responses = fx
            .handler
            .handle(&msg.to_vec().unwrap(), src(), Transport::Udp)
            .await;
        assert!(responses.is_empty());
    }

    #[tokio::test]
    async fn test_notify_from_primary_acknowledged() {
        let mut live = LiveConfig::default();
        live.mode = ServerMode::Secondary;
        live.primary.ip = "127.0.0.1".to_string();
        let fx = fixture(live).await;
        seed_zone(&fx).await;

        let mut msg = Message::new();
        msg.set_id(12);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Notify);
        msg.add_query(Query::query(
            Name::from_ascii("go53.test.").unwrap(),
            RecordType::SOA,
        ));

        let responses = fx
            .handler
            .handle(&msg.to_vec().unwrap(), src(), Transport::Udp)
            .await;
        assert_eq!(responses.len(), 1);
        let reply = Message::from_vec(&responses[0]).unwrap();
        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert_eq!(reply.op_code(), OpCode::Notify);
    }

    #[tokio::test]
    async fn test_garbage_gets_formerr() {
        let fx = fixture(LiveConfig::default()).await;
        let responses = fx
            .handler
            .handle(&[0x12, 0x34, 0xFF], src(), Transport::Udp)
            .await;
        assert_eq!(responses.len(), 1);
        // Echoed ID with QR set.
        assert_eq!(&responses[0][..2], &[0x12, 0x34]);
        assert_eq!(responses[0][2] & 0x80, 0x80);
    }
}
