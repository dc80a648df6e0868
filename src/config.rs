//! Configuration options recognized by the core.
//!
//! This module defines the shape of the options from `spec.md` §6; parsing
//! them out of a TOML file on disk, and the rest of the policy/zone
//! configuration tree around them, is the job of the `tdns-cfg` crate (an
//! external collaborator -- see its narrow contract).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

//----------- ConnMode ----------------------------------------------------------

/// Connection-validation mode for an [`crate::registry::AuthServer`].
///
/// Ordered from least to most strict. Promotion (moving right) is always
/// allowed; demotion is forbidden (`spec.md` §4.4).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnMode {
    /// No certificate/key validation is attempted; plaintext do53 only.
    #[default]
    Legacy,
    /// Encrypted transports are tried opportunistically, without requiring
    /// certificate validation to succeed.
    Opportunistic,
    /// Encrypted transports require certificate validation to succeed.
    Validated,
    /// Encrypted transports are required; do53 is not attempted.
    Strict,
}

impl ConnMode {
    /// Promote `self` to `other` if `other` is stricter; never demote.
    pub fn promote(&mut self, other: ConnMode) {
        if other > *self {
            *self = other;
        }
    }
}

//----------- LogLevel / LogTarget ----------------------------------------------

/// Logging verbosity, matching the `verbose` / `debug` / `quiet` options.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Quiet,
    #[default]
    Info,
    Verbose,
    Debug,
}

/// Where log output is written.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    File(PathBuf),
    Stdout,
    Stderr,
}

impl Default for LogTarget {
    fn default() -> Self {
        LogTarget::Stderr
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub target: LogTarget,
    /// Extra per-module trace directives, e.g. `"tdns_core::resolver=trace"`.
    #[serde(default)]
    pub trace_targets: Vec<String>,
}

//----------- TransportWeights ---------------------------------------------------

/// A parsed transport-weight signal string: `t1:w1,t2:w2,...`.
///
/// Weights are 0-100 and their sum must not exceed 100; the remainder is
/// the implicit do53 share. See `spec.md` §4.4 / §8 (round-trip property).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransportWeights {
    /// Transport name -> weight, sorted descending by weight, stable by name.
    weights: Vec<(String, u8)>,
}

impl TransportWeights {
    /// Parse a transport-weight signal string.
    pub fn parse(signal: &str) -> Result<Self, TransportWeightError> {
        if signal.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut weights = Vec::new();
        let mut total: u32 = 0;
        for entry in signal.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (name, weight) = entry
                .split_once(':')
                .ok_or_else(|| TransportWeightError::Malformed(entry.to_string()))?;
            let weight: u8 = weight
                .trim()
                .parse()
                .map_err(|_| TransportWeightError::Malformed(entry.to_string()))?;
            if weight > 100 {
                return Err(TransportWeightError::OutOfRange(name.to_string(), weight));
            }
            total += weight as u32;
            if total > 100 {
                return Err(TransportWeightError::SumExceeds100);
            }
            weights.push((name.trim().to_ascii_lowercase(), weight));
        }

        // Sort descending by weight, stable by name -- ties keep input order
        // among equal weights, and names are already unique per transport.
        weights.sort_by(|a, b| b.1.cmp(&a.1));

        Ok(Self { weights })
    }

    /// The highest-weighted transport, if any was specified.
    pub fn preferred(&self) -> Option<&str> {
        self.weights.first().map(|(name, _)| name.as_str())
    }

    /// The weight assigned to `transport`, or 0 if unassigned.
    pub fn weight_of(&self, transport: &str) -> u8 {
        self.weights
            .iter()
            .find(|(name, _)| name == transport)
            .map(|(_, w)| *w)
            .unwrap_or(0)
    }

    /// The implicit do53 share: `100 - sum(weights)`.
    pub fn implicit_do53_share(&self) -> u8 {
        let sum: u32 = self.weights.iter().map(|(_, w)| *w as u32).sum();
        (100 - sum.min(100)) as u8
    }

    /// Re-serialize in the `t1:w1,t2:w2,...` signal-string form.
    ///
    /// Round-tripping `parse` then `to_signal_string` must yield an
    /// equivalent weight map (`spec.md` §8).
    pub fn to_signal_string(&self) -> String {
        self.weights
            .iter()
            .map(|(name, weight)| format!("{name}:{weight}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn entries(&self) -> &[(String, u8)] {
        &self.weights
    }
}

#[derive(Debug)]
pub enum TransportWeightError {
    Malformed(String),
    OutOfRange(String, u8),
    SumExceeds100,
}

impl std::fmt::Display for TransportWeightError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(entry) => write!(f, "malformed transport weight entry: '{entry}'"),
            Self::OutOfRange(name, weight) => {
                write!(f, "transport weight for '{name}' out of range: {weight}")
            }
            Self::SumExceeds100 => write!(f, "sum of transport weights exceeds 100"),
        }
    }
}

impl std::error::Error for TransportWeightError {}

//----------- CoreConfig --------------------------------------------------------

/// The configuration options the core recognizes (`spec.md` §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Path to a root-hints zone file; `None` selects the compiled-in default.
    #[serde(default)]
    pub hints_file: Option<PathBuf>,

    /// Path to a trust-anchor file (`named.root.key` zonefile form); `None`
    /// starts the validator with an empty trust store, in which case every
    /// signed answer bottoms out at `Indeterminate` rather than `Secure`.
    #[serde(default)]
    pub trust_anchor_file: Option<PathBuf>,

    /// Max width for debug RRset rendering.
    #[serde(default = "default_line_width")]
    pub line_width: usize,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Do not fall back UDP -> TCP on a truncated (TC) do53 response.
    #[serde(default)]
    pub disable_fallback: bool,

    /// Always send do53 queries over TCP.
    #[serde(default)]
    pub force_tcp: bool,

    /// Default connection-validation mode for newly created auth servers.
    #[serde(default)]
    pub conn_mode: ConnMode,

    /// Default per-exchange timeout across all transports.
    #[serde(default = "default_exchange_timeout")]
    pub exchange_timeout: Duration,

    /// DoQ keep-alive interval.
    #[serde(default = "default_doq_keepalive")]
    pub doq_keepalive: Duration,

    /// DoQ idle timeout.
    #[serde(default = "default_doq_idle")]
    pub doq_idle: Duration,

    /// Listener shutdown drain grace period.
    #[serde(default = "default_shutdown_drain")]
    pub shutdown_drain: Duration,
}

fn default_line_width() -> usize {
    80
}

fn default_exchange_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_doq_keepalive() -> Duration {
    Duration::from_secs(15)
}

fn default_doq_idle() -> Duration {
    Duration::from_secs(30)
}

fn default_shutdown_drain() -> Duration {
    Duration::from_secs(5)
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            hints_file: None,
            trust_anchor_file: None,
            line_width: default_line_width(),
            logging: LoggingConfig::default(),
            disable_fallback: false,
            force_tcp: false,
            conn_mode: ConnMode::default(),
            exchange_timeout: default_exchange_timeout(),
            doq_keepalive: default_doq_keepalive(),
            doq_idle: default_doq_idle(),
            shutdown_drain: default_shutdown_drain(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_weight_round_trip() {
        let parsed = TransportWeights::parse("dot:60,doh:20").unwrap();
        assert_eq!(parsed.preferred(), Some("dot"));
        assert_eq!(parsed.weight_of("dot"), 60);
        assert_eq!(parsed.weight_of("doh"), 20);
        assert_eq!(parsed.implicit_do53_share(), 20);

        let reparsed = TransportWeights::parse(&parsed.to_signal_string()).unwrap();
        assert_eq!(parsed, reparsed);
    }

    #[test]
    fn transport_weight_sum_exceeds_100_rejected() {
        assert!(matches!(
            TransportWeights::parse("dot:60,doh:60"),
            Err(TransportWeightError::SumExceeds100)
        ));
    }

    #[test]
    fn conn_mode_never_demotes() {
        let mut mode = ConnMode::Validated;
        mode.promote(ConnMode::Opportunistic);
        assert_eq!(mode, ConnMode::Validated);
        mode.promote(ConnMode::Strict);
        assert_eq!(mode, ConnMode::Strict);
    }
}
