//! The iterative resolver (`spec.md` §4.7).
//!
//! Grounded on the teacher's `units/zone_refresher.rs`/`loader/server.rs` for
//! the overall shape of a resolution loop driven off the server registry and
//! the unified transport client, and on
//! `examples/other_examples/ae31fd5d_NLnetLabs-dnsi__src-commands-query.rs.rs`
//! for how a wire-format response is walked section by section
//! (`message.answer()?`/`.authority()?`/`.additional()?`, each independently
//! callable, each turned into a typed record iterator with
//! `.into_records::<D>()`), and on the teacher's own
//! `units/zone_signer.rs` (`rec.flatten_into()`) for materializing a
//! borrowed, wire-parsed record into this crate's owned `StoredRecord` form.

pub mod priming;

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use domain::base::iana::{Class, Rcode};
use domain::base::message_builder::MessageBuilder;
use domain::base::{Message, Rtype};
use domain::rdata::ZoneRecordData;
use rand::Rng;

use crate::cache::{CacheContext, CachedRrset, InFlightKind, RrsetCache, ValidationState};
use crate::config::{ConnMode, CoreConfig};
use crate::error::ResolverError;
use crate::fetch::{FetchError, Fetcher};
use crate::names::{self, StoredName, StoredRecord, StoredRrsig};
use crate::registry::{AuthServer, ConnProbe, ServerMap, ServerRegistry, ZoneRegistryEntry};
use crate::transport::client::{Client, ClientOptions, TlsConfig, TransportError};
use crate::transport::server::QueryHandler;
use crate::transport::Transport;
use crate::validator::{self, TrustAnchorStore};

/// The maximum number of referrals a single resolution will follow before
/// giving up (`spec.md` §4.7).
const MAX_REFERRAL_HOPS: usize = 16;
/// How long to wait for another in-flight caller to publish a result before
/// re-checking the cache and, failing that, proceeding independently.
const SINGLE_FLIGHT_POLL: Duration = Duration::from_millis(50);


/// One `Client` per transport, built once from [`CoreConfig`] at startup.
struct Clients {
    do53: Client,
    dot: Client,
    doh: Client,
    doq: Client,
}

impl Clients {
    fn new(config: &CoreConfig) -> Self {
        let options = ClientOptions { disable_fallback: config.disable_fallback, force_tcp: config.force_tcp };
        let encrypted_tls = TlsConfig { server_name: None, verify: config.conn_mode >= ConnMode::Validated };

        Self {
            do53: Client::new(Transport::Do53, Transport::Do53.default_port(), TlsConfig::default(), options, config.exchange_timeout),
            dot: Client::new(Transport::Dot, Transport::Dot.default_port(), encrypted_tls.clone(), options, config.exchange_timeout),
            doh: Client::new(Transport::Doh, Transport::Doh.default_port(), encrypted_tls.clone(), options, config.exchange_timeout),
            doq: Client::new(Transport::Doq, Transport::Doq.default_port(), encrypted_tls, options, config.exchange_timeout),
        }
    }

    fn get(&self, transport: Transport) -> &Client {
        match transport {
            Transport::Do53 => &self.do53,
            Transport::Dot => &self.dot,
            Transport::Doh => &self.doh,
            Transport::Doq => &self.doq,
        }
    }
}

/// Clears an in-flight marker on drop, so an early return (error or
/// otherwise) can't leave a name stuck marked in-flight forever.
struct InFlightGuard<'a> {
    cache: &'a RrsetCache,
    owner: StoredName,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.cache.in_flight.clear(InFlightKind::Query, &self.owner);
    }
}

/// How a response was classified once parsed.
enum Classified {
    /// A positive answer for `(qname, qtype)`.
    Answer(Vec<StoredRecord>, Vec<StoredRecord>),
    /// A referral: NS records at `cut`, plus whatever in-bailiwick glue came
    /// along in the additional section.
    Referral { cut: StoredName, ns: Vec<StoredRecord>, glue: Vec<StoredRecord> },
    /// NODATA or NXDOMAIN, with the authority section carried along for
    /// negative-response validation.
    Negative { rcode: Rcode, authority: Vec<StoredRecord> },
    /// Any other rcode (SERVFAIL, REFUSED, NOTIMP, FORMERR, ...).
    Failure(Rcode),
}

fn classify_response(response: &Message<Bytes>, qname: &StoredName, qtype: Rtype) -> Classified {
    let rcode = response.header().rcode();

    // Each section's `into_records::<ZoneRecordData<_, _>>()` yields owned
    // but still message-buffer-borrowed records; `.flatten_into()`
    // materializes them into this crate's `StoredRecord` form, the same
    // conversion the zone signer applies to zonefile-parsed records before
    // holding onto them past the parse.
    let answer: Vec<StoredRecord> = response
        .answer()
        .into_iter()
        .flat_map(|s| s.into_records::<ZoneRecordData<_, _>>())
        .filter_map(Result::ok)
        .map(|r| r.flatten_into())
        .collect();
    let authority: Vec<StoredRecord> = response
        .authority()
        .into_iter()
        .flat_map(|s| s.into_records::<ZoneRecordData<_, _>>())
        .filter_map(Result::ok)
        .map(|r| r.flatten_into())
        .collect();
    let additional: Vec<StoredRecord> = response
        .additional()
        .into_iter()
        .flat_map(|s| s.into_records::<ZoneRecordData<_, _>>())
        .filter_map(Result::ok)
        .map(|r| r.flatten_into())
        .collect();

    if rcode == Rcode::NXDOMAIN {
        return Classified::Negative { rcode, authority };
    }
    if rcode != Rcode::NOERROR {
        return Classified::Failure(rcode);
    }

    let direct: Vec<StoredRecord> = answer.iter().filter(|r| r.rtype() == qtype && names::names_equal(r.owner(), qname)).cloned().collect();
    if !direct.is_empty() {
        let sigs = answer.iter().filter(|r| r.rtype() == Rtype::RRSIG).cloned().collect();
        return Classified::Answer(direct, sigs);
    }

    let ns_cut = authority.iter().find(|r| r.rtype() == Rtype::NS).map(|r| r.owner().clone());
    if let Some(cut) = ns_cut {
        let ns: Vec<StoredRecord> = authority.iter().filter(|r| r.rtype() == Rtype::NS && names::names_equal(r.owner(), &cut)).cloned().collect();
        let glue: Vec<StoredRecord> = additional.iter().filter(|r| r.rtype() == Rtype::A || r.rtype() == Rtype::AAAA).cloned().collect();
        return Classified::Referral { cut, ns, glue };
    }

    Classified::Negative { rcode: Rcode::NOERROR, authority }
}

/// The resolver's view of an answer still in flight, passed back up through
/// a referral chain: which server eventually answered, for backoff
/// bookkeeping at the call site.
struct ExchangeOutcome {
    response: Message<Bytes>,
}

/// Serves resolution for names outside this process's own authoritative
/// zones: root-primed, cache-backed, DNSSEC-validating.
pub struct IterativeResolver {
    cache: Arc<RrsetCache>,
    registry: Arc<ServerRegistry>,
    anchors: Arc<TrustAnchorStore>,
    config: CoreConfig,
    clients: Clients,
}

impl IterativeResolver {
    pub fn new(cache: Arc<RrsetCache>, registry: Arc<ServerRegistry>, anchors: Arc<TrustAnchorStore>, config: CoreConfig) -> Self {
        let clients = Clients::new(&config);
        Self { cache, registry, anchors, config, clients }
    }

    /// Install the compiled-in root anchor and prime from the root hints, if
    /// this process hasn't already done so. Idempotent and safe to call
    /// before every query.
    pub async fn ensure_primed(&self) {
        if self.cache.is_primed() {
            return;
        }
        if let Err(err) = priming::prime(None, &self.cache, &self.registry, self).await {
            tracing::warn!(error = %err, "priming incomplete, continuing on root hints");
        }
    }

    /// `Resolve(qname, qtype) -> RRset` (`spec.md` §4.7).
    pub async fn resolve(&self, qname: &StoredName, qtype: Rtype) -> Result<CachedRrset, ResolverError> {
        self.ensure_primed().await;
        self.resolve_inner(qname, qtype, 0).await
    }

    fn resolve_inner<'a>(
        &'a self,
        qname: &'a StoredName,
        qtype: Rtype,
        hop: usize,
    ) -> Pin<Box<dyn Future<Output = Result<CachedRrset, ResolverError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(cached) = self.cache.get(qname, qtype, &self.registry, SystemTime::now()) {
                if matches!(cached.validation, ValidationState::Secure | ValidationState::Insecure) {
                    return Ok(cached);
                }
            }

            if hop >= MAX_REFERRAL_HOPS {
                return Err(ResolverError::ReferralLoop);
            }

            if !self.cache.in_flight.mark(InFlightKind::Query, qname) {
                tokio::time::sleep(SINGLE_FLIGHT_POLL).await;
                if let Some(cached) = self.cache.get(qname, qtype, &self.registry, SystemTime::now()) {
                    if matches!(cached.validation, ValidationState::Secure | ValidationState::Insecure) {
                        return Ok(cached);
                    }
                }
                return self.resolve_inner(qname, qtype, hop).await;
            }
            let _guard = InFlightGuard { cache: &self.cache, owner: qname.clone() };

            let (zone_name, zone_entry) = self
                .registry
                .find_closest_known_zone(qname)
                .ok_or_else(|| ResolverError::NoReachableServer(qname.to_string()))?;

            let outcome = self.query_zone(&zone_name, &zone_entry, qname, qtype).await?;
            self.handle_response(&zone_name, qname, qtype, outcome.response, hop).await
        })
    }

    /// Try every available server/address for `zone`, respecting both
    /// server-global and zone-scoped backoff, until one answers or all are
    /// exhausted.
    async fn query_zone(
        &self,
        zone_name: &StoredName,
        zone_entry: &ZoneRegistryEntry,
        qname: &StoredName,
        qtype: Rtype,
    ) -> Result<ExchangeOutcome, ResolverError> {
        let servers: Vec<Arc<AuthServer>> = zone_entry.servers.lock().unwrap().values().cloned().collect();
        if servers.is_empty() {
            return Err(ResolverError::NoReachableServer(zone_name.to_string()));
        }

        let message = build_query(qname, qtype);

        for server in &servers {
            if server.all_addresses_in_backoff() {
                continue;
            }
            for addr in server.get_available_addresses() {
                if !zone_entry.is_zone_address_available(addr) {
                    continue;
                }

                let transport = self.pick_transport(server);
                let client = self.clients.get(transport);
                let (response, _rtt, err) = client.exchange(&message, addr, server.debug()).await;

                match (response, err) {
                    (Some(response), _) => {
                        server.record_exchange(transport, true);
                        server.record_address_success(addr);
                        zone_entry.record_zone_address_success(addr);

                        let rcode = response.header().rcode();
                        if matches!(rcode, Rcode::SERVFAIL | Rcode::NOTIMP | Rcode::REFUSED) {
                            server.record_address_failure_for_rcode(addr, rcode);
                            zone_entry.record_zone_address_failure_for_rcode(addr, rcode, server.debug());
                        }

                        return Ok(ExchangeOutcome { response });
                    }
                    (None, Some(TransportError::Timeout)) => {
                        server.record_exchange(transport, false);
                        server.record_address_failure(addr, "timeout");
                    }
                    (None, Some(err)) => {
                        server.record_exchange(transport, false);
                        server.record_address_failure(addr, &err.to_string());
                    }
                    (None, None) => {
                        server.record_exchange(transport, false);
                        server.record_address_failure(addr, "no response");
                    }
                }
            }
        }

        Err(ResolverError::NoReachableServer(zone_name.to_string()))
    }

    /// Weighted transport pick over `server`'s configured weights
    /// (`spec.md` §4.7 step 4), falling back to do53 for unassigned mass.
    fn pick_transport(&self, server: &AuthServer) -> Transport {
        if self.config.force_tcp && server.conn_mode() == ConnMode::Legacy {
            return Transport::Do53;
        }
        let sample: f64 = rand::thread_rng().gen_range(0.0..1.0);
        ConnProbe::choose_transport(server, sample)
    }

    async fn handle_response(
        &self,
        zone_name: &StoredName,
        qname: &StoredName,
        qtype: Rtype,
        response: Message<Bytes>,
        hop: usize,
    ) -> Result<CachedRrset, ResolverError> {
        match classify_response(&response, qname, qtype) {
            Classified::Answer(records, signatures) => {
                let now = SystemTime::now();
                let rrsigs: Vec<StoredRrsig> = signatures
                    .into_iter()
                    .filter_map(|r| {
                        let owner = r.owner().clone();
                        let ttl = r.ttl();
                        match r.into_data() {
                            ZoneRecordData::Rrsig(rrsig) => Some(StoredRrsig::new(owner, Class::IN, ttl, rrsig)),
                            _ => None,
                        }
                    })
                    .collect();
                let mut cached = CachedRrset::new(qname.clone(), Class::IN, records, rrsigs, CacheContext::Answer, ValidationState::None, now);

                let (outcome, err) = validator::validate_rrset(&cached, &self.anchors, self).await;
                if let Some(err) = err {
                    tracing::debug!(name = %qname, error = %err, "validation incomplete");
                }
                cached.validation = match outcome {
                    validator::ValidationOutcome::Secure => ValidationState::Secure,
                    validator::ValidationOutcome::Insecure => ValidationState::Insecure,
                    validator::ValidationOutcome::Bogus => ValidationState::Bogus,
                    validator::ValidationOutcome::Indeterminate => ValidationState::Indeterminate,
                };

                self.cache.set(qname, qtype, cached.clone());
                Ok(cached)
            }

            Classified::Referral { cut, ns, glue } => {
                if !names::is_in_domain(&cut, zone_name) || names::names_equal(&cut, zone_name) {
                    // Not actually progress below the zone we just asked;
                    // treat as a dead end rather than looping forever.
                    return Err(ResolverError::ReferralLoop);
                }

                let now = SystemTime::now();
                self.cache.set(&cut, Rtype::NS, CachedRrset::new(cut.clone(), Class::IN, ns.clone(), Vec::new(), CacheContext::Referral, ValidationState::None, now));

                let mut incoming = Vec::new();
                for ns_record in &ns {
                    let ZoneRecordData::Ns(ns_data) = ns_record.data() else { continue };
                    let nsname = ns_data.nsdname().clone();
                    let addresses: Vec<IpAddr> = glue
                        .iter()
                        .filter(|g| names::names_equal(g.owner(), &nsname))
                        .filter_map(|g| match g.data() {
                            ZoneRecordData::A(a) => Some(IpAddr::V4(a.addr())),
                            ZoneRecordData::Aaaa(aaaa) => Some(IpAddr::V6(aaaa.addr())),
                            _ => None,
                        })
                        .collect();

                    if !addresses.is_empty() {
                        let glue_records: Vec<StoredRecord> = glue.iter().filter(|g| names::names_equal(g.owner(), &nsname)).cloned().collect();
                        self.cache.set(
                            &nsname,
                            Rtype::A,
                            CachedRrset::new(nsname.clone(), Class::IN, glue_records, Vec::new(), CacheContext::Glue, ValidationState::None, now),
                        );
                    }

                    incoming.push((format!("{nsname}"), crate::registry::AuthServerDefaults { addresses, ..Default::default() }));
                }
                self.registry.add_servers(&cut, incoming);

                self.resolve_inner(qname, qtype, hop + 1).await
            }

            Classified::Negative { rcode, authority } => {
                let (outcome, validated_rcode, err) = validator::validate_negative_response(qname, qtype, rcode, &authority, &self.anchors, self).await;
                if let Some(err) = err {
                    tracing::debug!(name = %qname, error = %err, "negative-response validation incomplete");
                }

                let now = SystemTime::now();
                let min_ttl = authority
                    .iter()
                    .find(|r| r.rtype() == Rtype::SOA)
                    .map(|r| r.ttl().as_secs())
                    .unwrap_or(0);

                let context = if rcode == Rcode::NXDOMAIN { CacheContext::Nxdomain } else { CacheContext::Nodata };
                let mut cached = CachedRrset::new(qname.clone(), Class::IN, Vec::new(), Vec::new(), context, ValidationState::None, now);
                cached.validation = match outcome {
                    validator::ValidationOutcome::Secure => ValidationState::Secure,
                    validator::ValidationOutcome::Insecure => ValidationState::Insecure,
                    validator::ValidationOutcome::Bogus => ValidationState::Bogus,
                    validator::ValidationOutcome::Indeterminate => ValidationState::Indeterminate,
                };
                cached.rcode = Some(validated_rcode);
                cached.min_ttl = min_ttl;
                cached.expiration = now + Duration::from_secs(min_ttl as u64);

                self.cache.set(qname, qtype, cached.clone());
                Ok(cached)
            }

            Classified::Failure(rcode) => Err(ResolverError::NoReachableServer(format!("{zone_name} answered {rcode}"))),
        }
    }
}

fn build_query(qname: &StoredName, qtype: Rtype) -> Message<Bytes> {
    let mut builder = MessageBuilder::new_bytes();
    builder.header_mut().set_rd(true);
    builder.header_mut().set_random_id();
    let mut builder = builder.question();
    let _ = builder.push((qname, qtype));
    let mut builder = builder.answer().authority().additional();
    let _ = builder.opt(|newopt| {
        newopt.set_udp_payload_size(1232);
        newopt.set_dnssec_ok(true);
        Ok(())
    });
    builder.into_message()
}

impl Fetcher for IterativeResolver {
    /// Used internally by the validator (to chase DS/DNSKEY chains) and by
    /// priming itself (the live root NS query). Deliberately bypasses
    /// [`Self::ensure_primed`]: priming's own fetch would otherwise recurse
    /// into itself before `set_primed` is ever reached.
    fn fetch<'a>(
        &'a self,
        owner: &'a StoredName,
        rtype: Rtype,
        _servers: Option<&'a ServerMap>,
    ) -> Pin<Box<dyn Future<Output = Result<CachedRrset, FetchError>> + Send + 'a>> {
        Box::pin(async move { self.resolve_inner(owner, rtype, 0).await.map_err(|err| FetchError::Transport(err.to_string())) })
    }
}

impl QueryHandler for IterativeResolver {
    fn handle<'a>(&'a self, request: &'a Message<Bytes>, _remote: IpAddr) -> Pin<Box<dyn Future<Output = Message<Bytes>> + Send + 'a>> {
        Box::pin(async move {
            let Ok(question) = request.sole_question() else {
                return error_response(request, Rcode::FORMERR);
            };
            let qname: StoredName = question.qname().to_bytes();
            let qtype = question.qtype();

            match self.resolve(&qname, qtype).await {
                Ok(rrset) => build_client_response(request, &rrset),
                Err(err) => {
                    tracing::debug!(name = %qname, error = %err, "resolution failed");
                    error_response(request, Rcode::SERVFAIL)
                }
            }
        })
    }
}

fn error_response(request: &Message<Bytes>, rcode: Rcode) -> Message<Bytes> {
    let mut builder = MessageBuilder::new_bytes();
    let header = builder.header_mut();
    *header = *request.header();
    header.set_qr(true);
    header.set_rcode(rcode);
    builder.question().into_message()
}

fn build_client_response(request: &Message<Bytes>, rrset: &CachedRrset) -> Message<Bytes> {
    let mut builder = MessageBuilder::new_bytes();
    let header = builder.header_mut();
    *header = *request.header();
    header.set_qr(true);
    header.set_ra(true);
    header.set_aa(false);
    header.set_rcode(rrset.rcode.unwrap_or(Rcode::NOERROR));

    let mut builder = builder.question();
    for question in request.question() {
        if let Ok(question) = question {
            let _ = builder.push(question);
        }
    }

    let mut builder = builder.answer();
    if rrset.context.is_returnable() {
        for rr in rrset.records.iter().cloned() {
            let _ = builder.push(rr);
        }
        for rr in rrset.signatures.iter().cloned() {
            let _ = builder.push(rr);
        }
    }

    let builder = builder.authority().additional();
    builder.into_message()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_query_sets_rd_and_question() {
        let qname: StoredName = "example.test.".parse().unwrap();
        let message = build_query(&qname, Rtype::A);
        assert!(message.header().rd());
        assert_eq!(message.header_counts().qdcount(), 1);
    }
}
