//! Shared name/record type aliases used across every component.
//!
//! Everything here is a thin alias over `domain`'s wire-format types --
//! owner names, record data, and record sets are never reimplemented, only
//! named for convenience the way `cascade`'s `StoredName` alias is used
//! throughout its zone tree code.

use bytes::Bytes;
use domain::base::Record;
use domain::rdata::{Rrsig, ZoneRecordData};

/// A canonicalized, fully-qualified owner name.
pub type StoredName = domain::base::Name<Bytes>;

/// The record data carried by an ordinary (non-RRSIG) record.
pub type StoredRecordData = ZoneRecordData<Bytes, StoredName>;

/// A single resource record using the shared owner-name/record-data types.
pub type StoredRecord = Record<StoredName, StoredRecordData>;

/// An RRSIG record over the shared owner-name type.
pub type StoredRrsig = Record<StoredName, Rrsig<Bytes, StoredName>>;

/// Compare two names for case-insensitive, canonical-order equality, the
/// way owner names must be compared everywhere in this crate (cache keys,
/// NSEC coverage checks, CNAME loop detection).
pub fn names_equal(a: &StoredName, b: &StoredName) -> bool {
    use domain::base::ToName;
    a.name_eq(b)
}

/// Whether `name` is `domain` itself or a strict descendant of it.
pub fn is_in_domain(name: &StoredName, domain: &StoredName) -> bool {
    use domain::base::ToName;
    name.ends_with(domain)
}

/// The strict parent of `name`, or `None` if `name` is the root.
///
/// Works on the dotted presentation form rather than `domain`'s label
/// iterators: every owner name this crate manufactures programmatically
/// (apexes, query names, wildcard owners) round-trips cleanly through
/// `Display`/`FromStr`, so this stays correct without depending on a
/// label-splitting API this corpus never exercises.
pub fn parent(name: &StoredName) -> Option<StoredName> {
    use domain::base::ToName;
    if name.is_root() {
        return None;
    }
    let text = name.fmt_with_dots().to_string();
    let dot = text.find('.')?;
    text[dot + 1..].parse().ok()
}

/// The first (leftmost) label of `name` in presentation form, or `None` for
/// the root.
pub fn first_label(name: &StoredName) -> Option<String> {
    use domain::base::ToName;
    if name.is_root() {
        return None;
    }
    let text = name.fmt_with_dots().to_string();
    text.find('.').map(|dot| text[..dot].to_string())
}

/// The RFC 9824 compact-denial "next name" for `name`: its first label with
/// a literal NUL byte appended, followed by the unchanged remainder. This is
/// the lexically-smallest name that still sorts after every real descendant
/// of `name`'s parent, proving the non-existence of everything between
/// `name` and it without naming a second real owner.
pub fn null_separated_successor(name: &StoredName) -> Option<StoredName> {
    let label = first_label(name)?;
    let rest = parent(name)?;
    format!("{label}\\000.{rest}").parse().ok()
}

/// The wildcard owner that would match `name`: `*.` followed by `name`'s
/// parent.
pub fn wildcard_owner(name: &StoredName) -> Option<StoredName> {
    let rest = parent(name)?;
    format!("*.{rest}").parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> StoredName {
        s.parse().unwrap()
    }

    #[test]
    fn parent_strips_one_label() {
        assert_eq!(parent(&name("child.example.")), Some(name("example.")));
        assert_eq!(parent(&name("example.")), Some(name(".")));
        assert_eq!(parent(&name(".")), None);
    }

    #[test]
    fn null_separated_successor_inserts_nul_in_first_label() {
        let next = null_separated_successor(&name("child.example.")).unwrap();
        assert_eq!(next, name("child\\000.example."));
    }

    #[test]
    fn wildcard_owner_is_one_level_below_parent() {
        assert_eq!(wildcard_owner(&name("child.example.")).unwrap(), name("*.example."));
    }
}
