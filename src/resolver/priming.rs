//! Root priming: loading the compiled-in (or file-supplied) root-hints
//! blob, then replacing it with a live NS query (`spec.md` §4.3 / §4.7).

use std::time::SystemTime;

use domain::base::iana::Class;
use domain::base::Rtype;
use domain::rdata::ZoneRecordData;
use domain::zonefile::inplace::{Entry, Zonefile};

use crate::cache::{CacheContext, CachedRrset, RrsetCache, ValidationState};
use crate::fetch::{FetchError, Fetcher};
use crate::names::{StoredName, StoredRecord};
use crate::registry::{Provenance, ServerRegistry};

/// The compiled-in root-hints zone file, in the same format a `named.root`
/// hints file uses. Shipped so a fresh process can prime without network
/// access to fetch hints first.
pub const DEFAULT_ROOT_HINTS: &str = include_str!("root_hints.zone");

#[derive(Debug)]
pub enum PrimingError {
    Parse(String),
    Fetch(FetchError),
}

impl std::fmt::Display for PrimingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "failed to parse root hints: {msg}"),
            Self::Fetch(err) => write!(f, "priming query failed: {err}"),
        }
    }
}

impl std::error::Error for PrimingError {}

/// Parse a root-hints zone-file blob, returning the root NS RRset it
/// describes and installing A/AAAA glue for each root nameserver into
/// `cache`, plus the corresponding server map into `registry`.
///
/// Deliberately does *not* cache the NS RRset itself under `(root, NS)`:
/// [`prime`] needs that cache slot empty so its live fetch actually reaches
/// the network instead of being short-circuited by [`RrsetCache::get`],
/// which doesn't distinguish a hint entry from a validated answer.
fn load_hints(blob: &str, cache: &RrsetCache, registry: &ServerRegistry) -> Result<Vec<StoredRecord>, PrimingError> {
    let root: StoredName = ".".parse().unwrap();
    let now = SystemTime::now();

    let mut ns_records = Vec::new();
    let mut glue_by_name: foldhash::HashMap<StoredName, Vec<StoredRecord>> = foldhash::HashMap::default();

    let mut zonefile = Zonefile::new();
    zonefile.extend_from_slice(blob.as_bytes());
    zonefile.set_origin(root.clone());
    zonefile.set_default_class(Class::IN);

    loop {
        let entry = zonefile.next_entry().map_err(|err| PrimingError::Parse(err.to_string()))?;
        let Some(entry) = entry else { break };
        let Entry::Record(record) = entry else {
            return Err(PrimingError::Parse("hints file: only plain records are supported".to_string()));
        };
        let record: StoredRecord = record.flatten_into();

        match record.rtype() {
            Rtype::NS => ns_records.push(record),
            Rtype::A | Rtype::AAAA => {
                glue_by_name.entry(record.owner().clone()).or_default().push(record);
            }
            other => return Err(PrimingError::Parse(format!("unsupported hints record type {other}"))),
        }
    }

    let mut addresses = Vec::new();
    for (name, records) in &glue_by_name {
        for record in records {
            if let domain::rdata::ZoneRecordData::A(a) = record.data() {
                addresses.push(std::net::IpAddr::V4(a.addr()));
            }
            if let domain::rdata::ZoneRecordData::Aaaa(aaaa) = record.data() {
                addresses.push(std::net::IpAddr::V6(aaaa.addr()));
            }
        }
        cache.set(
            name,
            Rtype::A,
            CachedRrset::new(
                name.clone(),
                Class::IN,
                records.clone(),
                Vec::new(),
                CacheContext::Glue,
                ValidationState::Indeterminate,
                now,
            ),
        );

        let ns_name = format!("{name}");
        registry.add_stub(&root, &ns_name, &addresses, None);
        for server in registry.zone_entry(&root).servers.lock().unwrap().values() {
            server.set_provenance_if_unset(Provenance::Hint);
        }
        addresses.clear();
    }

    Ok(ns_records)
}

/// `PrimeWithHints` (`spec.md` §4.3): install hints, then issue one live
/// root NS query through `fetcher` to prove reachability and replace the
/// hint entry with a priming result. Hint NS/glue stay installed on
/// failure so the process never ends up without any root servers at all.
pub async fn prime(
    hints_blob: Option<&str>,
    cache: &RrsetCache,
    registry: &ServerRegistry,
    fetcher: &dyn Fetcher,
) -> Result<(), PrimingError> {
    let blob = hints_blob.unwrap_or(DEFAULT_ROOT_HINTS);
    let ns_records = load_hints(blob, cache, registry)?;

    let root: StoredName = ".".parse().unwrap();
    let servers = registry.zone_entry(&root).servers.lock().unwrap().clone();

    match fetcher.fetch(&root, Rtype::NS, Some(&servers)).await {
        Ok(live_ns) => {
            let mut primed = live_ns;
            primed.context = CacheContext::Priming;
            cache.set(&root, Rtype::NS, primed);
        }
        Err(err) => {
            // The live query failed; fall back to the hints themselves so
            // the process never ends up without any root servers at all.
            // Priming can be retried on the next query that needs the root.
            tracing::warn!(error = %err, "root priming query failed, continuing on hints");
            let now = SystemTime::now();
            cache.set(
                &root,
                Rtype::NS,
                CachedRrset::new(root.clone(), Class::IN, ns_records, Vec::new(), CacheContext::Hint, ValidationState::Indeterminate, now),
            );
            return Err(PrimingError::Fetch(err));
        }
    }

    cache.set_primed();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ServerRegistry;

    #[test]
    fn load_hints_does_not_pre_cache_root_ns() {
        let cache = RrsetCache::new();
        let registry = ServerRegistry::new();
        let ns_records = load_hints(DEFAULT_ROOT_HINTS, &cache, &registry).unwrap();

        assert!(!ns_records.is_empty());
        let root: StoredName = ".".parse().unwrap();
        // Left uncached so Fetcher::fetch's cache-first check can't
        // short-circuit the live priming query with the hint itself.
        assert!(cache.get(&root, Rtype::NS, &registry, SystemTime::now()).is_none());
    }

    #[test]
    fn load_hints_installs_root_servers_and_glue() {
        let cache = RrsetCache::new();
        let registry = ServerRegistry::new();
        load_hints(DEFAULT_ROOT_HINTS, &cache, &registry).unwrap();

        let root: StoredName = ".".parse().unwrap();
        let (zone, entry) = registry.find_closest_known_zone(&root).unwrap();
        assert_eq!(zone, root);
        assert!(!entry.servers.lock().unwrap().is_empty());
    }
}
