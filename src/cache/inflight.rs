//! Single-flight sets: `Mark`/`Clear` primitives preventing duplicate
//! concurrent work against the same owner name (`spec.md` §4.3).
//!
//! The specification keeps three separate in-flight sets (transport-probe,
//! NS-revalidate, TLSA); `SPEC_FULL.md`'s REDESIGN FLAGS carries forward the
//! suggestion to fold them into one keyed set, which is what
//! [`InFlightSets`] does: one map keyed by `(kind, owner)` instead of three
//! maps keyed by `owner`.

use std::sync::Mutex;

use crate::names::StoredName;

/// The kind of work an in-flight marker guards against duplication.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InFlightKind {
    TransportProbe,
    NsRevalidate,
    Tlsa,
    /// An ordinary resolver query for `(owner, type)`, distinct from the
    /// three named kinds above.
    Query,
}

/// The combined single-flight set for all in-flight work kinds.
#[derive(Debug, Default)]
pub struct InFlightSets {
    entries: Mutex<foldhash::HashSet<(InFlightKind, StoredName)>>,
}

impl InFlightSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `(kind, owner)` was not already in-flight (caller
    /// proceeds and must eventually call [`Self::clear`]); `false` if it was
    /// (caller abandons and waits for the other holder to publish).
    pub fn mark(&self, kind: InFlightKind, owner: &StoredName) -> bool {
        self.entries.lock().unwrap().insert((kind, owner.clone()))
    }

    pub fn clear(&self, kind: InFlightKind, owner: &StoredName) {
        self.entries.lock().unwrap().remove(&(kind, owner.clone()));
    }

    pub fn is_in_flight(&self, kind: InFlightKind, owner: &StoredName) -> bool {
        self.entries.lock().unwrap().contains(&(kind, owner.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_is_single_flight() {
        let sets = InFlightSets::new();
        let owner: StoredName = "example.".parse().unwrap();
        assert!(sets.mark(InFlightKind::Query, &owner));
        assert!(!sets.mark(InFlightKind::Query, &owner));
        sets.clear(InFlightKind::Query, &owner);
        assert!(sets.mark(InFlightKind::Query, &owner));
    }

    #[test]
    fn distinct_kinds_do_not_collide() {
        let sets = InFlightSets::new();
        let owner: StoredName = "example.".parse().unwrap();
        assert!(sets.mark(InFlightKind::Query, &owner));
        assert!(sets.mark(InFlightKind::Tlsa, &owner));
    }
}
