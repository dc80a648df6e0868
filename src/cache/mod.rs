//! The RRset cache: name+type -> cached RRset, plus the DNSKEY trust cache
//! and the in-flight single-flight sets that sit alongside it.
//!
//! See `spec.md` §3 / §4.3. Both concurrent maps here are sharded by key
//! hash into independently-locked buckets, the way `cascade`'s zone tree
//! shards its own internal maps, rather than a single giant mutex or a
//! `dashmap` dependency the rest of this crate's stack doesn't otherwise
//! pull in.

mod inflight;
mod rrset_cache;
mod types;

pub use inflight::{InFlightKind, InFlightSets};
pub use rrset_cache::RrsetCache;
pub use types::{CacheContext, CachedDnskey, CachedRrset, ValidationState};
