//! The sharded RRset cache (`spec.md` §4.3).

use std::sync::Mutex;
use std::time::SystemTime;

use domain::base::Rtype;

use super::inflight::InFlightSets;
use super::types::CachedRrset;
use crate::names::StoredName;
use crate::registry::ServerRegistry;

const SHARD_COUNT: usize = 16;

fn shard_index(owner: &StoredName, rtype: Rtype) -> usize {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    owner.fmt_with_dots().to_string().to_ascii_lowercase().hash(&mut hasher);
    rtype.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

/// The RRset cache: `(owner, type)` -> [`CachedRrset`], sharded into
/// independently-locked buckets, with its in-flight sets alongside it.
pub struct RrsetCache {
    shards: Vec<Mutex<foldhash::HashMap<(StoredName, Rtype), CachedRrset>>>,
    pub in_flight: InFlightSets,
    primed: std::sync::atomic::AtomicBool,
}

impl std::fmt::Debug for RrsetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RrsetCache").field("shards", &SHARD_COUNT).finish()
    }
}

impl Default for RrsetCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RrsetCache {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(foldhash::HashMap::default())).collect(),
            in_flight: InFlightSets::new(),
            primed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Lookup `(name, type)`. If the entry exists but has expired, removes
    /// it -- and, when it was an NS RRset, also removes the per-zone server
    /// map entry for that name from `registry` -- and returns `None`.
    pub fn get(&self, name: &StoredName, rtype: Rtype, registry: &ServerRegistry, now: SystemTime) -> Option<CachedRrset> {
        let idx = shard_index(name, rtype);
        let mut shard = self.shards[idx].lock().unwrap();
        let key = (name.clone(), rtype);

        match shard.get(&key) {
            None => None,
            Some(entry) if entry.is_expired(now) => {
                let was_ns = entry.is_ns_rrset();
                shard.remove(&key);
                drop(shard);
                if was_ns {
                    registry.clear_zone_servers(name);
                }
                None
            }
            Some(entry) => Some(entry.clone()),
        }
    }

    /// Store `cached_rrset` under `(name, type)`, overwriting any prior
    /// entry atomically.
    pub fn set(&self, name: &StoredName, rtype: Rtype, cached_rrset: CachedRrset) {
        let idx = shard_index(name, rtype);
        self.shards[idx].lock().unwrap().insert((name.clone(), rtype), cached_rrset);
    }

    /// Remove all entries whose owner is `domain` or a subdomain of it.
    /// When `keep_structural` is set, preserves NS/DS/DNSKEY entries (and
    /// A/AAAA glue for their NS targets) so the spanning tree of
    /// delegations needed to continue resolving under the flushed subtree
    /// survives.
    pub fn flush_domain(&self, domain: &StoredName, keep_structural: bool) -> usize {
        use crate::names::is_in_domain;

        let mut kept_ns_targets: Vec<StoredName> = Vec::new();
        if keep_structural {
            for shard in &self.shards {
                let shard = shard.lock().unwrap();
                for ((owner, rtype), entry) in shard.iter() {
                    if *rtype != Rtype::NS || !is_in_domain(owner, domain) {
                        continue;
                    }
                    for record in &entry.records {
                        if let domain::rdata::ZoneRecordData::Ns(ns) = record.data() {
                            kept_ns_targets.push(ns.nsdname().clone());
                        }
                    }
                }
            }
        }

        let keeps = |owner: &StoredName, rtype: &Rtype| -> bool {
            if !is_in_domain(owner, domain) {
                return true;
            }
            if !keep_structural {
                return false;
            }
            matches!(rtype, Rtype::NS | Rtype::DS | Rtype::DNSKEY)
                || ((*rtype == Rtype::A || *rtype == Rtype::AAAA)
                    && kept_ns_targets.iter().any(|t| crate::names::names_equal(t, owner)))
        };

        let mut removed = 0usize;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap();
            let before = shard.len();
            shard.retain(|(owner, rtype), _| keeps(owner, rtype));
            removed += before - shard.len();
        }

        removed
    }

    pub fn is_primed(&self) -> bool {
        self.primed.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn set_primed(&self) {
        self.primed.store(true, std::sync::atomic::Ordering::Release);
    }
}
