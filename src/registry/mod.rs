//! The Server Registry: per-nameserver mutable state, shared between zones.
//!
//! See `spec.md` §4.4. The global invariant this module exists to uphold is
//! in §3: **exactly one [`AuthServer`] instance per nameserver name across
//! the process**; multiple zones referencing the same nameserver share the
//! same `Arc`. Per the REDESIGN FLAGS in `spec.md` §9 ("Global singleton
//! caches... expose as explicit dependencies"), there is no process-wide
//! static for this -- callers own a [`ServerRegistry`] and pass it around.

mod auth_server;
mod backoff;
mod zone;

pub use auth_server::{AuthServer, AuthServerDefaults, ConnProbe, Provenance, TransportCounters};
pub use backoff::AddressBackoff;
pub use zone::{Zone, ZoneRegistryEntry};

use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use crate::config::{ConnMode, TransportWeights};
use crate::names::StoredName;
use crate::transport::Transport;

/// A zone's known server set: nameserver name -> shared [`AuthServer`].
pub type ServerMap = foldhash::HashMap<String, Arc<AuthServer>>;

/// The Server Registry.
///
/// Owns the global nameserver-name -> `AuthServer` table (the
/// "one-instance-per-name" singleton), the per-zone server maps, and the
/// lazily-created zone registry entries used for zone-scoped backoff.
#[derive(Debug, Default)]
pub struct ServerRegistry {
    /// nsname -> AuthServer, the process-wide singleton table.
    servers: Mutex<foldhash::HashMap<String, Arc<AuthServer>>>,

    /// zone name -> (server map, zone registry entry).
    zones: Mutex<foldhash::HashMap<StoredName, Arc<ZoneRegistryEntry>>>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the single shared [`AuthServer`] instance for `nsname`,
    /// creating it with defaults on first request. Creation and storage are
    /// atomic: two concurrent callers racing to create the same name both
    /// observe the same `Arc`.
    pub fn get_or_create_auth_server(&self, nsname: &str) -> Arc<AuthServer> {
        let mut servers = self.servers.lock().unwrap();
        servers
            .entry(nsname.to_string())
            .or_insert_with(|| Arc::new(AuthServer::new(nsname)))
            .clone()
    }

    /// Look up an existing [`AuthServer`] without creating one.
    pub fn get_auth_server(&self, nsname: &str) -> Option<Arc<AuthServer>> {
        self.servers.lock().unwrap().get(nsname).cloned()
    }

    fn get_or_create_zone_entry(&self, zone: &StoredName) -> Arc<ZoneRegistryEntry> {
        let mut zones = self.zones.lock().unwrap();
        zones
            .entry(zone.clone())
            .or_insert_with(|| Arc::new(ZoneRegistryEntry::new(zone.clone())))
            .clone()
    }

    /// Install a static server-map entry for `zone`, parsing an optional
    /// transport-weight signal string.
    pub fn add_stub(&self, zone: &StoredName, nsname: &str, addresses: &[IpAddr], signal: Option<&str>) {
        let entry = self.get_or_create_zone_entry(zone);
        let server = self.get_or_create_auth_server(nsname);
        server.merge_addresses(addresses);
        server.set_provenance_if_unset(Provenance::Stub);

        if let Some(signal) = signal {
            if let Ok(weights) = TransportWeights::parse(signal) {
                server.apply_transport_weights(&weights);
            }
        }

        entry.servers.lock().unwrap().insert(nsname.to_string(), server);
    }

    /// Merge incoming servers into `zone`'s server map, canonicalizing each
    /// through [`Self::get_or_create_auth_server`] so the one-instance
    /// invariant holds, and unioning addresses/ALPN/transports.
    pub fn add_servers(
        &self,
        zone: &StoredName,
        incoming: impl IntoIterator<Item = (String, AuthServerDefaults)>,
    ) {
        let entry = self.get_or_create_zone_entry(zone);
        let mut map = entry.servers.lock().unwrap();

        for (nsname, defaults) in incoming {
            let server = self.get_or_create_auth_server(&nsname);
            server.merge_defaults(&defaults);
            map.insert(nsname, server);
        }
    }

    /// Longest-suffix match over the registered zone names; returns the
    /// matched zone name and its server map. Falls back to the root if
    /// nothing more specific is known.
    pub fn find_closest_known_zone(&self, qname: &StoredName) -> Option<(StoredName, Arc<ZoneRegistryEntry>)> {
        use domain::base::ToName;

        let zones = self.zones.lock().unwrap();
        let mut best: Option<(StoredName, Arc<ZoneRegistryEntry>)> = None;
        let mut best_labels = -1i32;

        for (name, entry) in zones.iter() {
            if qname.ends_with(name) {
                let labels = name.iter_labels().count() as i32;
                if labels > best_labels {
                    best_labels = labels;
                    best = Some((name.clone(), entry.clone()));
                }
            }
        }

        best
    }

    /// The zone registry entry for `zone`, creating it lazily if absent.
    pub fn zone_entry(&self, zone: &StoredName) -> Arc<ZoneRegistryEntry> {
        self.get_or_create_zone_entry(zone)
    }

    /// Drop the server map for `zone`, e.g. because its NS RRset just
    /// expired out of the RRset cache and the delegation is no longer
    /// trusted without a fresh lookup.
    pub fn clear_zone_servers(&self, zone: &StoredName) {
        if let Some(entry) = self.zones.lock().unwrap().get(zone) {
            entry.servers.lock().unwrap().clear();
        }
    }

    /// Every zone name currently known to the registry, for status
    /// reporting.
    pub fn zone_names(&self) -> Vec<StoredName> {
        self.zones.lock().unwrap().keys().cloned().collect()
    }
}

/// Per-(server, address) failure bookkeeping shared by `AuthServer` and
/// `ZoneRegistryEntry` backoff maps. Durations are from `spec.md` §6.
pub mod durations {
    use std::time::Duration;

    pub const FIRST_FAILURE: Duration = Duration::from_secs(2 * 60);
    pub const SUBSEQUENT_FAILURE: Duration = Duration::from_secs(60 * 60);
    pub const ROUTING_FAILURE: Duration = Duration::from_secs(60 * 60);
    pub const TIMEOUT_FAILURE: Duration = Duration::from_secs(2 * 60);
    pub const NOTIMP_FAILURE: Duration = Duration::from_secs(60 * 60);
    pub const ZONE_LAME: Duration = Duration::from_secs(60 * 60);
    pub const ZONE_SERVFAIL: Duration = Duration::from_secs(60 * 60);
    pub const ZONE_NOTIMP: Duration = Duration::from_secs(6 * 60 * 60);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_auth_server_instance_per_name() {
        let registry = ServerRegistry::new();
        let a = registry.get_or_create_auth_server("ns1.example.");
        let b = registry.get_or_create_auth_server("ns1.example.");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn shared_instance_across_zones() {
        let registry = ServerRegistry::new();
        let zone_a: StoredName = "a.example.".parse().unwrap();
        let zone_b: StoredName = "b.example.".parse().unwrap();

        registry.add_stub(&zone_a, "ns1.example.", &[], None);
        registry.add_stub(&zone_b, "ns1.example.", &[], None);

        let from_a = registry.zone_entry(&zone_a).servers.lock().unwrap().get("ns1.example.").cloned();
        let from_b = registry.zone_entry(&zone_b).servers.lock().unwrap().get("ns1.example.").cloned();
        assert!(Arc::ptr_eq(&from_a.unwrap(), &from_b.unwrap()));
    }
}
