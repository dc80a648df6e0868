//! Per-address backoff bookkeeping, shared by [`super::AuthServer`] (global,
//! server-scoped) and [`super::Zone`] (zone-scoped, for servers that are
//! lame for one zone but fine for others).
//!
//! See `spec.md` §3 ("AddressBackoff") and §4.4 for the exact durations.

use std::net::IpAddr;
use std::sync::Mutex;
use std::time::SystemTime;

use domain::base::iana::Rcode;

use super::durations;

/// Backoff state for a single (server, address) pair.
#[derive(Clone, Debug)]
pub struct AddressBackoff {
    /// Earliest time this address should be retried.
    pub next_try: SystemTime,
    /// Consecutive failure count, saturating at 255.
    pub failures: u8,
    /// The last error text, populated only when debug is enabled.
    pub last_error: Option<String>,
}

/// A map of address -> backoff state, with the combined operations needed
/// to avoid TOCTOU between "is this address available" and "give me all
/// the available addresses".
#[derive(Debug, Default)]
pub struct BackoffMap {
    entries: Mutex<foldhash::HashMap<IpAddr, AddressBackoff>>,
}

fn is_routing_error(err: &str) -> bool {
    let err = err.to_ascii_lowercase();
    err.contains("no route to host") || err.contains("network is unreachable") || err.contains("host unreachable")
}

fn is_timeout_error(err: &str) -> bool {
    let err = err.to_ascii_lowercase();
    err.contains("timeout") || err.contains("deadline exceeded")
}

impl BackoffMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a network-layer failure (`spec.md` §4.4
    /// `RecordAddressFailure`).
    pub fn record_network_failure(&self, addr: IpAddr, err: &str, debug: bool) {
        let now = SystemTime::now();
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(addr).or_insert_with(|| AddressBackoff {
            next_try: now,
            failures: 0,
            last_error: None,
        });

        entry.failures = entry.failures.saturating_add(1);

        let delay = if is_routing_error(err) {
            durations::ROUTING_FAILURE
        } else if is_timeout_error(err) {
            durations::TIMEOUT_FAILURE
        } else if entry.failures <= 1 {
            durations::FIRST_FAILURE
        } else {
            durations::SUBSEQUENT_FAILURE
        };

        entry.next_try = now + delay;
        entry.last_error = debug.then(|| err.to_string());
    }

    /// Record an rcode-driven failure at the server level (`spec.md` §4.4
    /// `RecordAddressFailureForRcode`): NOTIMP gets the long delay
    /// immediately, anything else follows the default failure-count
    /// schedule.
    pub fn record_rcode_failure(&self, addr: IpAddr, rcode: Rcode, debug: bool) {
        if rcode == Rcode::NOTIMP {
            let now = SystemTime::now();
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.entry(addr).or_insert_with(|| AddressBackoff {
                next_try: now,
                failures: 0,
                last_error: None,
            });
            entry.failures = entry.failures.saturating_add(1);
            entry.next_try = now + durations::NOTIMP_FAILURE;
            entry.last_error = debug.then(|| format!("rcode {rcode}"));
        } else {
            self.record_network_failure(addr, &format!("rcode {rcode}"), debug);
        }
    }

    /// Record a zone-scoped rcode failure (`spec.md` §4.4
    /// `Zone.RecordZoneAddressFailureForRcode`).
    pub fn record_zone_rcode_failure(&self, addr: IpAddr, rcode: Rcode, debug: bool) {
        let delay = match rcode {
            Rcode::REFUSED | Rcode::NOTAUTH => durations::ZONE_LAME,
            Rcode::SERVFAIL => durations::ZONE_SERVFAIL,
            Rcode::NOTIMP => durations::ZONE_NOTIMP,
            _ => durations::SUBSEQUENT_FAILURE,
        };

        let now = SystemTime::now();
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(addr).or_insert_with(|| AddressBackoff {
            next_try: now,
            failures: 0,
            last_error: None,
        });
        entry.failures = entry.failures.saturating_add(1);
        entry.next_try = now + delay;
        entry.last_error = debug.then(|| format!("zone rcode {rcode}"));
    }

    /// Remove the backoff entry for `addr` (`spec.md` §4.4
    /// `RecordAddressSuccess`).
    pub fn record_success(&self, addr: IpAddr) {
        self.entries.lock().unwrap().remove(&addr);
    }

    /// True if `addr` has no entry, or its `next_try` has passed.
    pub fn is_available(&self, addr: IpAddr) -> bool {
        let now = SystemTime::now();
        match self.entries.lock().unwrap().get(&addr) {
            None => true,
            Some(entry) => now > entry.next_try,
        }
    }

    /// True iff every address in `addresses` currently has a backoff entry
    /// whose `next_try` is still in the future. Computed under a single
    /// lock acquisition to avoid TOCTOU against concurrent
    /// `record_success`/`record_*_failure` calls.
    pub fn all_in_backoff(&self, addresses: &[IpAddr]) -> bool {
        if addresses.is_empty() {
            return false;
        }
        let now = SystemTime::now();
        let entries = self.entries.lock().unwrap();
        addresses.iter().all(|addr| match entries.get(addr) {
            None => false,
            Some(entry) => entry.next_try > now,
        })
    }

    /// The subset of `addresses` currently usable, computed under a single
    /// lock acquisition.
    pub fn available_addresses(&self, addresses: &[IpAddr]) -> Vec<IpAddr> {
        let now = SystemTime::now();
        let entries = self.entries.lock().unwrap();
        addresses
            .iter()
            .filter(|addr| match entries.get(addr) {
                None => true,
                Some(entry) => now > entry.next_try,
            })
            .copied()
            .collect()
    }

    pub fn snapshot(&self) -> foldhash::HashMap<IpAddr, AddressBackoff> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(addr, entry)| (*addr, entry.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_is_two_minutes() {
        let map = BackoffMap::new();
        let addr: IpAddr = "192.0.2.1".parse().unwrap();
        map.record_network_failure(addr, "connection refused", false);
        let snap = map.snapshot();
        let entry = &snap[&addr];
        let remaining = entry.next_try.duration_since(SystemTime::now()).unwrap();
        assert!(remaining.as_secs() <= 120 && remaining.as_secs() > 115);
    }

    #[test]
    fn routing_error_is_immediate_one_hour() {
        let map = BackoffMap::new();
        let addr: IpAddr = "192.0.2.2".parse().unwrap();
        map.record_network_failure(addr, "No route to host", false);
        let snap = map.snapshot();
        let remaining = snap[&addr].next_try.duration_since(SystemTime::now()).unwrap();
        assert!(remaining.as_secs() > 3500);
    }

    #[test]
    fn success_clears_entry() {
        let map = BackoffMap::new();
        let addr: IpAddr = "192.0.2.3".parse().unwrap();
        map.record_network_failure(addr, "timeout", false);
        assert!(!map.is_available(addr));
        map.record_success(addr);
        assert!(map.is_available(addr));
    }

    #[test]
    fn zone_scoped_lame_is_one_hour_not_six() {
        let map = BackoffMap::new();
        let addr: IpAddr = "192.0.2.4".parse().unwrap();
        map.record_zone_rcode_failure(addr, Rcode::REFUSED, false);
        let snap = map.snapshot();
        let remaining = snap[&addr].next_try.duration_since(SystemTime::now()).unwrap();
        assert!(remaining.as_secs() > 3500 && remaining.as_secs() <= 3600);
    }

    #[test]
    fn zone_scoped_notimp_is_six_hours() {
        let map = BackoffMap::new();
        let addr: IpAddr = "192.0.2.5".parse().unwrap();
        map.record_zone_rcode_failure(addr, Rcode::NOTIMP, false);
        let snap = map.snapshot();
        let remaining = snap[&addr].next_try.duration_since(SystemTime::now()).unwrap();
        assert!(remaining.as_secs() > 21000);
    }
}
