//! The `Fetcher` capability.
//!
//! `spec.md` §9 flags the validator's need to pull unknown RRsets (to chase
//! a DS/DNSKEY chain, or to resolve a delegation during priming) as an
//! upward dependency that must not leak transport or resolver internals
//! into the validator. We model it the way the REDESIGN FLAGS section
//! prescribes: a capability trait with a single `fetch` method. The real
//! iterative resolver implements it against the network; tests implement
//! it against fixtures.

use std::future::Future;
use std::pin::Pin;

use domain::base::Rtype;

use crate::cache::CachedRrset;
use crate::names::StoredName;
use crate::registry::ServerMap;

/// Errors a [`Fetcher`] can report back to a caller (validator or resolver).
#[derive(Debug)]
pub enum FetchError {
    /// No usable server/address was available to ask.
    NoReachableServer,
    /// The network/transport layer failed.
    Transport(String),
    /// The upstream returned a non-answer rcode.
    Rcode(domain::base::iana::Rcode),
    /// Resolution did not complete (e.g. referral loop, too many hops).
    GiveUp,
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoReachableServer => write!(f, "no reachable server"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::Rcode(rcode) => write!(f, "upstream rcode {rcode}"),
            Self::GiveUp => write!(f, "resolution gave up"),
        }
    }
}

impl std::error::Error for FetchError {}

/// A capability to fetch an RRset, without the caller knowing how.
pub trait Fetcher: Send + Sync {
    /// Fetch `(owner, rtype)`, optionally constrained to `servers` (the
    /// zone believed to be authoritative for it). Implementations are free
    /// to ignore `servers` and re-derive the closest known zone themselves.
    fn fetch<'a>(
        &'a self,
        owner: &'a StoredName,
        rtype: Rtype,
        servers: Option<&'a ServerMap>,
    ) -> Pin<Box<dyn Future<Output = Result<CachedRrset, FetchError>> + Send + 'a>>;
}
