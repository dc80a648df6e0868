//! The value types stored in the RRset cache and the DNSKEY cache.
//!
//! See `spec.md` §3 ("RRset", "CachedRRset", "CachedDnskey").

use std::time::SystemTime;

use domain::base::iana::{Class, Rcode};

use crate::names::{StoredName, StoredRecord, StoredRrsig};

/// Why an RRset is in the cache: determines whether it's returnable
/// directly to a client, or only usable internally for continuing
/// resolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CacheContext {
    /// An ordinary validated or plain answer.
    Answer,
    /// A root-hints NS/glue entry, installed at priming time.
    Hint,
    /// The root NS RRset, learned via a live priming query.
    Priming,
    /// An NS RRset learned from a delegating parent's referral.
    Referral,
    /// A negative NXDOMAIN entry.
    Nxdomain,
    /// A negative NODATA entry.
    Nodata,
    /// Non-authoritative glue; not directly returnable to a client.
    Glue,
    /// A cached failure (e.g. SERVFAIL from upstream), not authoritative.
    Failure,
}

impl CacheContext {
    /// Glue is cached only to support resolution; it must never be handed
    /// back to a client as if it were an answer.
    pub fn is_returnable(self) -> bool {
        !matches!(self, CacheContext::Glue)
    }
}

/// The DNSSEC validation state of a cached RRset.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ValidationState {
    #[default]
    None,
    Insecure,
    Secure,
    Bogus,
    Indeterminate,
}

/// The minimum floor applied to an NS RRset learned by referral, so a
/// short-TTL delegation doesn't immediately self-flush out of the server
/// map it was just used to populate.
pub const REFERRAL_NS_MIN_TTL_FLOOR: u32 = 10;

/// A cached RRset: identity is `(owner, class, type)`. Treated as immutable
/// once inserted; a refresh replaces the whole entry atomically.
#[derive(Clone, Debug)]
pub struct CachedRrset {
    pub owner: StoredName,
    pub class: Class,
    pub records: Vec<StoredRecord>,
    pub signatures: Vec<StoredRrsig>,
    pub context: CacheContext,
    pub validation: ValidationState,
    pub expiration: SystemTime,
    pub min_ttl: u32,
    pub extended_error: Option<(u16, String)>,
    /// The rcode this entry represents, for negative (NXDOMAIN/NODATA)
    /// entries returned straight from cache.
    pub rcode: Option<Rcode>,
}

impl CachedRrset {
    /// Build a cached entry from its records, computing min-TTL (with the
    /// NS-referral floor applied when `context` is `Referral` and the
    /// records are NS) and deriving `expiration` from `now`.
    pub fn new(
        owner: StoredName,
        class: Class,
        records: Vec<StoredRecord>,
        signatures: Vec<StoredRrsig>,
        context: CacheContext,
        validation: ValidationState,
        now: SystemTime,
    ) -> Self {
        let mut min_ttl = records.iter().map(|r| r.ttl().as_secs()).min().unwrap_or(0);

        if context == CacheContext::Referral && records.iter().any(|r| r.rtype() == domain::base::Rtype::NS) {
            min_ttl = min_ttl.max(REFERRAL_NS_MIN_TTL_FLOOR);
        }

        Self {
            owner,
            class,
            records,
            signatures,
            context,
            validation,
            expiration: now + std::time::Duration::from_secs(min_ttl as u64),
            min_ttl,
            extended_error: None,
            rcode: None,
        }
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expiration
    }

    pub fn is_ns_rrset(&self) -> bool {
        self.records.iter().any(|r| r.rtype() == domain::base::Rtype::NS)
    }
}

/// A single DNSKEY's cached trust state, keyed by `(zone, key_tag)`. Kept in
/// a namespace separate from the RRset cache because a zone's DNSKEY RRset
/// is validated DS-anchored, not the way ordinary RRsets are.
#[derive(Clone, Debug)]
pub struct CachedDnskey {
    pub zone: StoredName,
    pub key_tag: u16,
    pub record: StoredRecord,
    pub validation: ValidationState,
    /// Only `trusted=true` entries may be used for signature verification.
    pub trusted: bool,
    pub expiration: SystemTime,
}
