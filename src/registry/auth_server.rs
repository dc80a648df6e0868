//! [`AuthServer`]: per-nameserver mutable state (`spec.md` §3).

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use domain::base::iana::Rcode;

use super::backoff::BackoffMap;
use crate::config::{ConnMode, TransportWeights};
use crate::transport::Transport;

/// Where an [`AuthServer`]'s information came from, used to decide whether
/// fresher information is allowed to overwrite it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Provenance {
    Hint,
    Glue,
    Answer,
    Priming,
    Stub,
    Unknown,
}

/// Per-transport exchange counters, for observability.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportCounters {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
}

/// A TLSA certificate-association pin learned for one address of this
/// server, cached so repeated DoT/DoQ connections don't re-fetch TLSA.
#[derive(Clone, Debug)]
pub struct TlsaPin {
    pub usage: u8,
    pub selector: u8,
    pub matching_type: u8,
    pub data: Vec<u8>,
}

/// The subset of [`AuthServer`] fields that can be supplied in bulk by
/// [`super::ServerRegistry::add_servers`].
#[derive(Clone, Debug, Default)]
pub struct AuthServerDefaults {
    pub addresses: Vec<IpAddr>,
    pub transports: HashSet<Transport>,
    pub transport_weights: Option<TransportWeights>,
    pub conn_mode: ConnMode,
    pub debug: bool,
}

/// Per-nameserver-name mutable state, shared across every zone that
/// delegates to it.
#[derive(Debug)]
pub struct AuthServer {
    pub name: String,

    addresses: Mutex<Vec<IpAddr>>,
    supported_transports: Mutex<HashSet<Transport>>,
    preferred_transport: Mutex<Option<Transport>>,
    transport_weights: Mutex<TransportWeights>,
    conn_mode: Mutex<ConnMode>,
    backoff: BackoffMap,
    counters: Mutex<foldhash::HashMap<Transport, TransportCounters>>,
    tlsa_pins: Mutex<foldhash::HashMap<IpAddr, Vec<TlsaPin>>>,
    provenance: Mutex<Provenance>,
    expiration: Mutex<Option<SystemTime>>,
    debug: AtomicBool,
}

impl AuthServer {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            addresses: Mutex::new(Vec::new()),
            supported_transports: Mutex::new(HashSet::from([Transport::Do53])),
            preferred_transport: Mutex::new(None),
            transport_weights: Mutex::new(TransportWeights::default()),
            conn_mode: Mutex::new(ConnMode::default()),
            backoff: BackoffMap::new(),
            counters: Mutex::new(foldhash::HashMap::default()),
            tlsa_pins: Mutex::new(foldhash::HashMap::default()),
            provenance: Mutex::new(Provenance::Unknown),
            expiration: Mutex::new(None),
            debug: AtomicBool::new(false),
        }
    }

    /// A defensive copy of the address list.
    pub fn addresses(&self) -> Vec<IpAddr> {
        self.addresses.lock().unwrap().clone()
    }

    /// Union new addresses into the address list, no duplicates.
    pub fn merge_addresses(&self, new: &[IpAddr]) {
        let mut addresses = self.addresses.lock().unwrap();
        for addr in new {
            if !addresses.contains(addr) {
                addresses.push(*addr);
            }
        }
    }

    pub fn supported_transports(&self) -> HashSet<Transport> {
        self.supported_transports.lock().unwrap().clone()
    }

    pub fn preferred_transport(&self) -> Option<Transport> {
        *self.preferred_transport.lock().unwrap()
    }

    pub fn transport_weights(&self) -> TransportWeights {
        self.transport_weights.lock().unwrap().clone()
    }

    pub fn conn_mode(&self) -> ConnMode {
        *self.conn_mode.lock().unwrap()
    }

    pub fn debug(&self) -> bool {
        self.debug.load(Ordering::Relaxed)
    }

    pub fn set_provenance_if_unset(&self, provenance: Provenance) {
        let mut current = self.provenance.lock().unwrap();
        if *current == Provenance::Unknown {
            *current = provenance;
        }
    }

    pub fn provenance(&self) -> Provenance {
        *self.provenance.lock().unwrap()
    }

    pub fn set_expiration(&self, expiration: SystemTime) {
        *self.expiration.lock().unwrap() = Some(expiration);
    }

    pub fn expiration(&self) -> Option<SystemTime> {
        *self.expiration.lock().unwrap()
    }

    /// Apply an incoming transport-weight map: overlay (not replace) the
    /// weights, and set the preferred transport to the highest-weighted
    /// entry, per `spec.md` §4.4 `AddStub`.
    pub fn apply_transport_weights(&self, weights: &TransportWeights) {
        *self.transport_weights.lock().unwrap() = weights.clone();
        if let Some(preferred) = weights.preferred().and_then(|s| s.parse().ok()) {
            *self.preferred_transport.lock().unwrap() = Some(preferred);
        }
    }

    /// Merge in a bulk update from [`AuthServerDefaults`]: addresses and
    /// transports are unioned; conn-mode and debug are promoted
    /// monotonically (never demoted).
    pub fn merge_defaults(&self, defaults: &AuthServerDefaults) {
        self.merge_addresses(&defaults.addresses);

        {
            let mut transports = self.supported_transports.lock().unwrap();
            for t in &defaults.transports {
                transports.insert(*t);
            }
        }

        if let Some(weights) = &defaults.transport_weights {
            self.apply_transport_weights(weights);
        }

        {
            let mut mode = self.conn_mode.lock().unwrap();
            mode.promote(defaults.conn_mode);
        }

        if defaults.debug {
            self.debug.store(true, Ordering::Relaxed);
        }
    }

    pub fn record_tlsa_pin(&self, addr: IpAddr, pin: TlsaPin) {
        self.tlsa_pins.lock().unwrap().entry(addr).or_default().push(pin);
    }

    pub fn tlsa_pins(&self, addr: IpAddr) -> Vec<TlsaPin> {
        self.tlsa_pins.lock().unwrap().get(&addr).cloned().unwrap_or_default()
    }

    pub fn record_exchange(&self, transport: Transport, success: bool) {
        let mut counters = self.counters.lock().unwrap();
        let entry = counters.entry(transport).or_default();
        entry.attempts += 1;
        if success {
            entry.successes += 1;
        } else {
            entry.failures += 1;
        }
    }

    pub fn counters(&self, transport: Transport) -> TransportCounters {
        self.counters.lock().unwrap().get(&transport).copied().unwrap_or_default()
    }

    // ---- backoff passthrough (spec.md §4.4) ----------------------------

    pub fn record_address_failure(&self, addr: IpAddr, err: &str) {
        self.backoff.record_network_failure(addr, err, self.debug());
    }

    pub fn record_address_failure_for_rcode(&self, addr: IpAddr, rcode: Rcode) {
        self.backoff.record_rcode_failure(addr, rcode, self.debug());
    }

    pub fn record_address_success(&self, addr: IpAddr) {
        self.backoff.record_success(addr);
    }

    pub fn is_address_available(&self, addr: IpAddr) -> bool {
        self.backoff.is_available(addr)
    }

    pub fn all_addresses_in_backoff(&self) -> bool {
        self.backoff.all_in_backoff(&self.addresses())
    }

    pub fn get_available_addresses(&self) -> Vec<IpAddr> {
        self.backoff.available_addresses(&self.addresses())
    }
}

/// Weighted transport choice over a server's transport-weight map, falling
/// back to do53 for any unassigned probability mass (`spec.md` §4.7 step
/// 4). `sample` must be a uniform value in `[0.0, 1.0)`.
pub struct ConnProbe;

impl ConnProbe {
    pub fn choose_transport(server: &AuthServer, sample: f64) -> Transport {
        let weights = server.transport_weights();
        let supported = server.supported_transports();

        let mut cumulative = 0.0f64;
        for (name, weight) in weights.entries() {
            cumulative += *weight as f64 / 100.0;
            if sample < cumulative {
                if let Ok(transport) = name.parse::<Transport>() {
                    if supported.contains(&transport) {
                        return transport;
                    }
                }
                break;
            }
        }

        Transport::Do53
    }
}
