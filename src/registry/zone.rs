//! Per-zone registry state: the known server set for a zone, the
//! is-delegation-secure bit, and zone-scoped address backoff (distinct from
//! the server-global backoff in [`super::AuthServer`] -- a server can be
//! lame for one zone while serving others fine, per `spec.md` §4.4).

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use domain::base::iana::Rcode;

use super::backoff::BackoffMap;
use super::ServerMap;
use crate::names::StoredName;

/// A single zone's registry entry: its known servers, whether its
/// delegation is currently considered DNSSEC-secure, and zone-scoped
/// backoff state.
#[derive(Debug)]
pub struct ZoneRegistryEntry {
    pub zone: StoredName,
    pub servers: Mutex<ServerMap>,
    secure_delegation: AtomicBool,
    zone_backoff: BackoffMap,
}

impl ZoneRegistryEntry {
    pub fn new(zone: StoredName) -> Self {
        Self {
            zone,
            servers: Mutex::new(ServerMap::default()),
            secure_delegation: AtomicBool::new(false),
            zone_backoff: BackoffMap::new(),
        }
    }

    pub fn is_delegation_secure(&self) -> bool {
        self.secure_delegation.load(Ordering::Relaxed)
    }

    pub fn set_delegation_secure(&self, secure: bool) {
        self.secure_delegation.store(secure, Ordering::Relaxed);
    }

    pub fn record_zone_address_failure_for_rcode(&self, addr: IpAddr, rcode: Rcode, debug: bool) {
        self.zone_backoff.record_zone_rcode_failure(addr, rcode, debug);
    }

    pub fn record_zone_address_success(&self, addr: IpAddr) {
        self.zone_backoff.record_success(addr);
    }

    pub fn is_zone_address_available(&self, addr: IpAddr) -> bool {
        self.zone_backoff.is_available(addr)
    }

    pub fn all_zone_addresses_in_backoff(&self, addresses: &[IpAddr]) -> bool {
        self.zone_backoff.all_in_backoff(addresses)
    }

    pub fn available_zone_addresses(&self, addresses: &[IpAddr]) -> Vec<IpAddr> {
        self.zone_backoff.available_addresses(addresses)
    }

    /// The union of every address across this zone's known servers.
    pub fn all_addresses(&self) -> Vec<IpAddr> {
        self.servers.lock().unwrap().values().flat_map(|s| s.addresses()).collect()
    }
}

/// A handle to a zone's delegation state, as seen by resolver/validator code
/// walking down from a parent. Distinct from [`ZoneRegistryEntry`]: this is
/// the read-oriented view returned to callers outside the registry, not the
/// registry's internal storage.
#[derive(Clone, Debug)]
pub struct Zone {
    pub name: StoredName,
    pub secure_delegation: bool,
}

impl Zone {
    pub fn from_entry(entry: &ZoneRegistryEntry) -> Self {
        Self {
            name: entry.zone.clone(),
            secure_delegation: entry.is_delegation_secure(),
        }
    }
}
