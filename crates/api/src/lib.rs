//! Narrow DTOs shared between `tdns-core` and its CLI front end.
//!
//! There's no out-of-process REST layer in this spec's scope (`tdns-cli`
//! talks to `tdns-core` in-process), so these types exist purely to give
//! the CLI's `debug`/`status` output a stable, serializable shape rather
//! than having it format `tdns-core`'s internal structs directly.

use std::net::IpAddr;
use std::time::SystemTime;

use bytes::Bytes;
use domain::base::iana::Rcode;
use domain::base::Name;
use serde::{Deserialize, Serialize};

/// The outcome of a single `Resolve(qname, qtype)` call, as reported to a
/// CLI caller.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ResolveResult {
    pub qname: Name<Bytes>,
    pub qtype: String,
    pub rcode: String,
    pub validation: String,
    pub answers: Vec<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub enum ResolveError {
    NoReachableServer(String),
    ReferralLoop,
    Other(String),
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoReachableServer(name) => write!(f, "no reachable server for '{name}'"),
            Self::ReferralLoop => write!(f, "referral loop or depth exceeded"),
            Self::Other(msg) => write!(f, "{msg}"),
        }
    }
}

/// One authoritative nameserver entry as reported by `tdns status`.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ServerStatusEntry {
    pub name: Name<Bytes>,
    pub addresses: Vec<IpAddr>,
    pub conn_mode: String,
    pub debug: bool,
}

/// One registered zone's server set, keyed by zone apex.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ZoneStatusEntry {
    pub zone: Name<Bytes>,
    pub servers: Vec<ServerStatusEntry>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StatusResult {
    pub primed: bool,
    pub zones: Vec<ZoneStatusEntry>,
}

/// A point-in-time rcode helper: the textual rcode the CLI prints, reused
/// by both `resolve` and `status` so the two commands agree on spelling.
pub fn rcode_name(rcode: Rcode) -> String {
    rcode.to_string()
}

/// The wall-clock time a `ResolveResult`/`StatusResult` was produced at,
/// used only for CLI display -- never round-tripped back into `tdns-core`.
pub fn now() -> SystemTime {
    SystemTime::now()
}
