//! A deliberately small zone-tree facade for the authoritative responder.
//!
//! `spec.md` marks "Zone Data" as not specified here; this module is the
//! minimal wrapper `SPEC_FULL.md` §4.6 calls for around
//! `domain::zonetree::{Zone, ZoneTree, Answer}`, not the teacher's full
//! zone-review/build/diff/persist pipeline (`crates/zonedata`'s
//! `builder.rs`/`cleaner.rs`/`diff.rs`/`persister.rs`/`reader.rs`/
//! `storage/`/`viewer.rs`/`writer.rs`). It owns exactly two things per
//! loaded zone: a queryable `domain::zonetree::Zone` for exact-match,
//! delegation and wildcard lookups, and a flat, canonically sorted record
//! list for the things `Zone::query` doesn't expose (apex SOA access,
//! CNAME-chain following across zone cuts, and enumerating a name's type
//! set to synthesize compact-denial NSEC). The flat side-index mirrors the
//! shape of the teacher's own `zonedata::data::Data` (SOA plus sorted
//! records), without any of its builder/diff/persistence machinery.

use std::sync::Mutex;

use domain::base::iana::Class;
use domain::base::{CanonicalOrd, Rtype, ToName};
use domain::zonetree::update::ZoneUpdater;
use domain::zonetree::{Zone, ZoneBuilder, ZoneTree, ZoneUpdate};
use foldhash::HashMap;

use crate::names::{StoredName, StoredRecord};

/// Failures building or registering a zone.
#[derive(Debug)]
pub enum ZoneDataError {
    /// The record set had no SOA at the apex.
    NoSoa,
    /// `domain::zonetree` rejected the zone while building or updating it.
    Build(String),
}

impl std::fmt::Display for ZoneDataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoSoa => write!(f, "zone has no apex SOA record"),
            Self::Build(msg) => write!(f, "zone build failed: {msg}"),
        }
    }
}

impl std::error::Error for ZoneDataError {}

/// One locally held authoritative zone.
pub struct LoadedZone {
    pub apex: StoredName,
    pub class: Class,
    /// Queryable `domain::zonetree::Zone`, used for the ordinary
    /// exact-match/delegation/wildcard/NXDOMAIN/NODATA path via
    /// `Zone::query`.
    pub zone: Zone,
    /// Canonically sorted flat record list, used for CNAME-chain lookups,
    /// apex SOA access and NSEC type-set synthesis.
    records: Vec<StoredRecord>,
    /// Whether online (inline) signing is enabled for this zone
    /// (`spec.md` §4.6's inline signing policy). The signing capability
    /// itself is an injected `authoritative::Signer`, not owned here.
    pub online_signing: bool,
}

impl LoadedZone {
    /// All records owned by exactly `owner`, in canonical order.
    pub fn records_at(&self, owner: &StoredName) -> impl Iterator<Item = &StoredRecord> {
        self.records.iter().filter(move |r| r.owner().name_eq(owner))
    }

    /// The distinct set of types present at `owner`, used to synthesize the
    /// RFC 9824 compact-denial NSEC type bitmap.
    pub fn types_at(&self, owner: &StoredName) -> Vec<Rtype> {
        let mut types: Vec<Rtype> = self.records_at(owner).map(|r| r.rtype()).collect();
        types.sort_by_key(|t| t.to_int());
        types.dedup();
        types
    }

    /// The apex SOA record, always present for a loaded zone.
    pub fn soa(&self) -> Option<&StoredRecord> {
        self.records_at(&self.apex).find(|r| r.rtype() == Rtype::SOA)
    }

    /// The first CNAME record at `owner`, if any, used to follow a CNAME
    /// chain across zone cuts.
    pub fn cname_at(&self, owner: &StoredName) -> Option<&StoredRecord> {
        self.records_at(owner).find(|r| r.rtype() == Rtype::CNAME)
    }

    /// Whether any record in the zone is owned at or below `owner`.
    pub fn contains_owner(&self, owner: &StoredName) -> bool {
        self.records.iter().any(|r| r.owner().name_eq(owner))
    }

    /// The nearest zone-cut owner covering `qname`: the longest name that is
    /// `qname` itself or an ancestor of it, strictly below this zone's apex,
    /// holding an NS RRset. `None` if `qname` isn't in this zone, is the
    /// apex itself, or no delegation sits between the apex and it.
    pub fn delegation_at(&self, qname: &StoredName) -> Option<StoredName> {
        use crate::names::{is_in_domain, names_equal};

        if !is_in_domain(qname, &self.apex) || names_equal(qname, &self.apex) {
            return None;
        }

        let mut candidate = qname.clone();
        loop {
            if names_equal(&candidate, &self.apex) {
                return None;
            }
            if self.records_at(&candidate).any(|r| r.rtype() == Rtype::NS) {
                return Some(candidate);
            }
            candidate = crate::names::parent(&candidate)?;
        }
    }
}

/// Build a queryable `domain::zonetree::Zone` from a flat record set.
///
/// Grounded on the signer's own population sequence
/// (`units/zone_signer.rs`): a plain in-memory `ZoneBuilder` followed by a
/// `ZoneUpdater` applying `AddRecord` for every record and finishing with
/// the apex SOA.
async fn build_zone(apex: StoredName, class: Class, records: &[StoredRecord]) -> Result<Zone, ZoneDataError> {
    let soa = records
        .iter()
        .find(|r| r.owner().name_eq(&apex) && r.rtype() == Rtype::SOA)
        .cloned()
        .ok_or(ZoneDataError::NoSoa)?;

    let zone = ZoneBuilder::new(apex, class).build();

    let mut updater = ZoneUpdater::new(zone.clone(), false)
        .await
        .map_err(|e| ZoneDataError::Build(e.to_string()))?;

    for record in records {
        if record.rtype() == Rtype::SOA {
            continue;
        }
        updater
            .apply(ZoneUpdate::AddRecord(record.clone()))
            .await
            .map_err(|e| ZoneDataError::Build(e.to_string()))?;
    }

    updater
        .apply(ZoneUpdate::Finished(soa))
        .await
        .map_err(|e| ZoneDataError::Build(e.to_string()))?;

    Ok(zone)
}

/// The set of zones this responder is authoritative for.
pub struct ZoneData {
    tree: Mutex<ZoneTree>,
    zones: Mutex<HashMap<StoredName, std::sync::Arc<LoadedZone>>>,
}

impl Default for ZoneData {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneData {
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(ZoneTree::new()),
            zones: Mutex::new(HashMap::default()),
        }
    }

    /// Load (or replace) a zone's records, building both the queryable
    /// `Zone` and the flat side-index, then register it for delegation
    /// lookups.
    pub async fn load_zone(
        &self,
        apex: StoredName,
        class: Class,
        mut records: Vec<StoredRecord>,
        online_signing: bool,
    ) -> Result<(), ZoneDataError> {
        records.sort_by(CanonicalOrd::canonical_cmp);

        let zone = build_zone(apex.clone(), class, &records).await?;

        self.tree
            .lock()
            .unwrap()
            .insert_zone(zone.clone())
            .map_err(|e| ZoneDataError::Build(e.to_string()))?;

        let loaded = std::sync::Arc::new(LoadedZone {
            apex: apex.clone(),
            class,
            zone,
            records,
            online_signing,
        });

        self.zones.lock().unwrap().insert(apex, loaded);
        Ok(())
    }

    /// The closest ancestor zone that covers `qname` (exact apex match or a
    /// delegating parent), the way `ZoneTree::find_zone` is used in the
    /// signer's `zone_server_service`.
    pub fn find_zone(&self, qname: &StoredName, class: Class) -> Option<Zone> {
        self.tree.lock().unwrap().find_zone(qname, class).cloned()
    }

    /// The `LoadedZone` facade for the zone whose apex is exactly `apex`
    /// (used for apex SOA access, CNAME-chain continuation and NSEC
    /// synthesis, none of which `Zone`/`Answer` expose directly).
    pub fn loaded_zone(&self, apex: &StoredName) -> Option<std::sync::Arc<LoadedZone>> {
        self.zones.lock().unwrap().get(apex).cloned()
    }

    /// All currently loaded zone apexes.
    pub fn apexes(&self) -> Vec<StoredName> {
        self.zones.lock().unwrap().keys().cloned().collect()
    }

    /// The [`LoadedZone`] facade for the closest ancestor zone covering
    /// `qname` (exact apex match or a delegating parent), combining
    /// [`Self::find_zone`]'s apex lookup with [`Self::loaded_zone`].
    pub fn find_covering_zone(&self, qname: &StoredName, class: Class) -> Option<std::sync::Arc<LoadedZone>> {
        use domain::zonetree::ZoneStore;

        let zone = self.find_zone(qname, class)?;
        self.loaded_zone(zone.apex_name())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use bytes::Bytes;
    use domain::base::{Record, Ttl};
    use domain::rdata::{Soa, ZoneRecordData};

    use super::*;

    fn name(s: &str) -> StoredName {
        StoredName::from_str(s).unwrap()
    }

    fn soa_record(apex: &StoredName) -> StoredRecord {
        let soa = Soa::new(
            name("ns1.example.test."),
            name("hostmaster.example.test."),
            domain::base::Serial::now(),
            Ttl::from_secs(3600),
            Ttl::from_secs(600),
            Ttl::from_secs(604800),
            Ttl::from_secs(86400),
        );
        Record::new(apex.clone(), Class::IN, Ttl::from_secs(3600), ZoneRecordData::Soa(soa))
    }

    #[tokio::test]
    async fn load_zone_registers_apex_and_soa() {
        let apex = name("example.test.");
        let data = ZoneData::new();
        data.load_zone(apex.clone(), Class::IN, vec![soa_record(&apex)], false)
            .await
            .unwrap();

        let loaded = data.loaded_zone(&apex).unwrap();
        assert!(loaded.soa().is_some());
        assert!(data.find_zone(&apex, Class::IN).is_some());
    }

    #[test]
    fn types_at_dedups_and_sorts() {
        let apex = name("example.test.");
        let loaded = LoadedZone {
            apex: apex.clone(),
            class: Class::IN,
            zone: futures::executor::block_on(build_zone(apex.clone(), Class::IN, &[soa_record(&apex)])).unwrap(),
            records: vec![soa_record(&apex), soa_record(&apex)],
            online_signing: false,
        };
        assert_eq!(loaded.types_at(&apex), vec![Rtype::SOA]);
        let _: Option<Bytes> = None;
    }
}
