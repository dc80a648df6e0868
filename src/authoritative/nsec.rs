//! Synthesizing RFC 9824 compact-denial NSEC records (`spec.md` §4.6).
//!
//! Classical (two-NSEC) negative-response proofs are not synthesized here:
//! this responder only ever emits the compact-denial form for DO=1 queries,
//! since there's no zone-signing pipeline in this crate to pre-generate a
//! classical NSEC chain ahead of time. The validator (`validator::mod`)
//! still accepts classical proofs from *other* servers' answers -- this
//! module is only about what this responder itself emits.

use bytes::Bytes;
use domain::base::iana::Class;
use domain::base::{Rtype, Ttl};
use domain::rdata::{Nsec, RtypeBitmap, ZoneRecordData};

use crate::names::{null_separated_successor, StoredName, StoredRecord};

fn build_bitmap(types: &[Rtype]) -> RtypeBitmap<Bytes> {
    let mut sorted = types.to_vec();
    sorted.sort_by_key(|t| t.to_int());
    sorted.dedup();

    let mut builder = RtypeBitmap::<Bytes>::builder();
    for rtype in sorted {
        builder.add(rtype).expect("type bitmap entries are well-formed rtypes");
    }
    builder.finalize()
}

/// A compact-denial NSEC record owned at `owner`, covering `covered`, with
/// a NUL-separated successor of `owner` as its next name.
pub fn compact_denial_nsec(owner: &StoredName, covered: &[Rtype], ttl: Ttl, class: Class) -> Option<StoredRecord> {
    let next = null_separated_successor(owner)?;
    let nsec = Nsec::new(next, build_bitmap(covered));
    Some(StoredRecord::new(owner.clone(), class, ttl, ZoneRecordData::Nsec(nsec)))
}

/// The bitmap for an NXDOMAIN compact-denial NSEC: exactly
/// `{RRSIG, NSEC, NXNAME}`, proving the queried name itself doesn't exist.
pub const NXDOMAIN_TYPES: [Rtype; 3] = [Rtype::RRSIG, Rtype::NSEC, Rtype::NXNAME];

/// The bitmap for a NODATA compact-denial NSEC: the name's actual types
/// plus `{RRSIG, NSEC}`.
pub fn nodata_types(actual: &[Rtype]) -> Vec<Rtype> {
    let mut types = actual.to_vec();
    types.push(Rtype::RRSIG);
    types.push(Rtype::NSEC);
    types
}

/// The bitmap for a delegation-cut compact-denial NSEC, proving no DS
/// exists at the cut: `{NS, NSEC, RRSIG}`.
pub const DELEGATION_TYPES: [Rtype; 3] = [Rtype::NS, Rtype::NSEC, Rtype::RRSIG];

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> StoredName {
        s.parse().unwrap()
    }

    #[test]
    fn nxdomain_bitmap_has_exactly_three_types() {
        let record = compact_denial_nsec(&name("child.example."), &NXDOMAIN_TYPES, Ttl::from_secs(3600), Class::IN).unwrap();
        let ZoneRecordData::Nsec(nsec) = record.data() else { panic!("expected NSEC") };
        let types: Vec<Rtype> = nsec.types().iter().collect();
        assert_eq!(types.len(), 3);
        assert!(types.contains(&Rtype::RRSIG));
        assert!(types.contains(&Rtype::NSEC));
        assert!(types.contains(&Rtype::NXNAME));
    }

    #[test]
    fn nodata_bitmap_includes_actual_types() {
        let types = nodata_types(&[Rtype::A, Rtype::TXT]);
        let record = compact_denial_nsec(&name("host.example."), &types, Ttl::from_secs(3600), Class::IN).unwrap();
        let ZoneRecordData::Nsec(nsec) = record.data() else { panic!("expected NSEC") };
        let present: Vec<Rtype> = nsec.types().iter().collect();
        assert!(present.contains(&Rtype::A));
        assert!(present.contains(&Rtype::TXT));
        assert!(present.contains(&Rtype::RRSIG));
        assert!(present.contains(&Rtype::NSEC));
    }

    #[test]
    fn next_name_has_null_separator_in_first_label() {
        let record = compact_denial_nsec(&name("child.example."), &NXDOMAIN_TYPES, Ttl::from_secs(3600), Class::IN).unwrap();
        let ZoneRecordData::Nsec(nsec) = record.data() else { panic!("expected NSEC") };
        assert_eq!(nsec.next_name(), &name("child\\000.example."));
    }
}
