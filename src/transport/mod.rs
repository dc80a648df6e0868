//! The DNS transport layer: one client, one server, across Do53/DoT/DoH/DoQ.
//!
//! See `spec.md` §4.1 / §4.2 and `SPEC_FULL.md` §4.1/§4.2 for the contracts.
//! Per the REDESIGN FLAGS in `spec.md` §9 ("Multi-transport clients as four
//! independent Exchange paths... model as one enum-tagged client"), both the
//! client and the server are organized around a single [`Transport`] enum
//! rather than four parallel code paths.

pub mod client;
pub mod msgaccept;
pub mod server;

use serde::{Deserialize, Serialize};

/// The four transports `tdns` speaks, tagged so client and server code can
/// switch on one type instead of duplicating logic per transport.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Plain DNS over UDP/TCP (RFC 1035).
    Do53,
    /// DNS-over-TLS (RFC 7858).
    Dot,
    /// DNS-over-HTTPS (RFC 8484).
    Doh,
    /// DNS-over-QUIC (RFC 9250).
    Doq,
}

impl Transport {
    /// The conventional port for this transport.
    pub fn default_port(self) -> u16 {
        match self {
            Transport::Do53 => 53,
            Transport::Dot => 853,
            Transport::Doh => 443,
            Transport::Doq => 8853,
        }
    }

    /// The ALPN protocol id negotiated for this transport's TLS session,
    /// if it runs over TLS.
    pub fn alpn(self) -> Option<&'static [u8]> {
        match self {
            Transport::Do53 => None,
            Transport::Dot => Some(b"dot"),
            Transport::Doh => Some(b"h2"),
            Transport::Doq => Some(b"doq"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Transport::Do53 => "do53",
            Transport::Dot => "dot",
            Transport::Doh => "doh",
            Transport::Doq => "doq",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Transport {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "do53" => Ok(Transport::Do53),
            "dot" => Ok(Transport::Dot),
            "doh" => Ok(Transport::Doh),
            "doq" => Ok(Transport::Doq),
            _ => Err(()),
        }
    }
}
