//! Typed errors for `tdns-core`, one enum per component boundary plus a
//! top-level [`CoreError`] that the query dispatcher (resolver/responder)
//! uses to translate internal failures into wire rcodes (`spec.md` §7).
//!
//! No `anyhow` here: every error is a concrete enum implementing
//! `std::error::Error` by hand, matching the style the rest of the `tdns`
//! server family uses (e.g. `manager::Error` in the signer this crate was
//! built from) rather than pulling in a dynamic-error crate for a library.

use domain::base::iana::Rcode;

use crate::fetch::FetchError;
use crate::transport::client::TransportError;
use crate::validator::ValidatorError;

/// Errors surfaced by the iterative resolver (`spec.md` §4.7 / §7).
#[derive(Debug)]
pub enum ResolverError {
    /// No server/address was available to ask for `zone`.
    NoReachableServer(String),
    /// A referral chain exceeded the maximum number of hops without
    /// reaching an answer.
    ReferralLoop,
    Transport(TransportError),
    Validator(ValidatorError),
}

impl std::fmt::Display for ResolverError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoReachableServer(zone) => write!(f, "no reachable server for zone {zone}"),
            Self::ReferralLoop => write!(f, "referral chain exceeded maximum hops"),
            Self::Transport(err) => write!(f, "transport error: {err}"),
            Self::Validator(err) => write!(f, "validation error: {err}"),
        }
    }
}

impl std::error::Error for ResolverError {}

impl From<TransportError> for ResolverError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl From<FetchError> for ResolverError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NoReachableServer => Self::NoReachableServer(String::new()),
            FetchError::Transport(msg) => Self::Transport(TransportError::Network(msg)),
            FetchError::Rcode(rcode) => Self::NoReachableServer(format!("rcode {rcode}")),
            FetchError::GiveUp => Self::ReferralLoop,
        }
    }
}

/// Errors surfaced by the authoritative responder (`spec.md` §4.6 / §7).
#[derive(Debug)]
pub enum ResponderError {
    /// No zone held locally covers the query name.
    NotAuthoritative,
    /// Online signing was required but no active ZSK was available.
    NoSigningKey,
    /// Signing the response failed.
    SigningFailed(String),
    /// A CNAME chain exceeded the maximum number of zone-cut hops.
    ChainTooLong,
}

impl std::fmt::Display for ResponderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAuthoritative => write!(f, "not authoritative for this name"),
            Self::NoSigningKey => write!(f, "no active signing key for zone"),
            Self::SigningFailed(msg) => write!(f, "signing failed: {msg}"),
            Self::ChainTooLong => write!(f, "CNAME chain exceeded maximum hops"),
        }
    }
}

impl std::error::Error for ResponderError {}

/// A component-tagged error, used at the outermost query-dispatch layer to
/// decide the wire rcode (`spec.md` §7: "the query dispatcher centralizes
/// translation from internal errors to wire rcodes").
#[derive(Debug)]
pub enum CoreError {
    Resolver(ResolverError),
    Responder(ResponderError),
    Transport(TransportError),
    Validator(ValidatorError),
}

impl std::fmt::Display for CoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolver(err) => write!(f, "{err}"),
            Self::Responder(err) => write!(f, "{err}"),
            Self::Transport(err) => write!(f, "{err}"),
            Self::Validator(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CoreError {}

impl From<ResolverError> for CoreError {
    fn from(err: ResolverError) -> Self {
        Self::Resolver(err)
    }
}

impl From<ResponderError> for CoreError {
    fn from(err: ResponderError) -> Self {
        Self::Responder(err)
    }
}

impl From<TransportError> for CoreError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl From<ValidatorError> for CoreError {
    fn from(err: ValidatorError) -> Self {
        Self::Validator(err)
    }
}

impl CoreError {
    /// The wire rcode this error should produce when it reaches a DNS
    /// client, per `spec.md` §7's per-kind policy table.
    pub fn to_rcode(&self) -> Rcode {
        match self {
            Self::Resolver(_) | Self::Transport(_) => Rcode::SERVFAIL,
            Self::Responder(ResponderError::NotAuthoritative) => Rcode::REFUSED,
            Self::Responder(_) => Rcode::SERVFAIL,
            Self::Validator(_) => Rcode::SERVFAIL,
        }
    }
}
