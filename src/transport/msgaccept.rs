//! The `MsgAccept` policy and EDNS0 extraction (`spec.md` §4.2/§4.9/§6).
//!
//! Grounded on the `MandatoryMiddlewareSvc`/`EdnsMiddlewareSvc` layering in
//! the teacher's `units/zone_server.rs`: there, opcode/section-count
//! checking and EDNS0 decoding are two separate middleware layers wrapping
//! a plain `service_fn`. Per `SPEC_FULL.md` §4.9 this crate keeps the same
//! separation but as two plain functions rather than `tower`-style
//! middleware, since neither the resolver nor the responder here is built
//! on `domain::net::server`'s service-layering (the listeners are, but the
//! query logic underneath is shared between all four transports and is
//! easier to reason about as a straight-line function).

use domain::base::iana::{Opcode, OptRcode, Rcode};
use domain::base::message::Message;
use domain::base::opt::{AllOptData, Opt};
use domain::base::wire::ParseError;

/// Why a message was rejected by [`accept`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AcceptOutcome {
    /// Process the message.
    Accept,
    /// Drop silently; never reply (it claims to be a response itself).
    DropSilently,
    /// Reply with this rcode.
    Reject(Rcode),
}

/// `accept(header) -> Result<(), Rcode>` from `spec.md` §4.2/§6: QUERY,
/// NOTIFY and UPDATE are accepted; responses are dropped silently;
/// QUERY/NOTIFY with malformed section counts are rejected; UPDATE
/// permits arbitrary section counts; any other opcode gets NOTIMP.
pub fn accept(message: &Message<[u8]>) -> AcceptOutcome {
    let header = message.header();

    if header.qr() {
        return AcceptOutcome::DropSilently;
    }

    let opcode = header.opcode();
    if opcode != Opcode::QUERY && opcode != Opcode::NOTIFY && opcode != Opcode::UPDATE {
        return AcceptOutcome::Reject(Rcode::NOTIMP);
    }

    if opcode == Opcode::UPDATE {
        // UPDATE permits arbitrary section counts (spec.md §6).
        return AcceptOutcome::Accept;
    }

    let counts = message.header_counts();
    if counts.qdcount() > 1 || counts.ancount() > 1 || counts.nscount() > 0 || counts.arcount() > 2 {
        return AcceptOutcome::Reject(Rcode::FORMERR);
    }

    AcceptOutcome::Accept
}

/// The decoded EDNS0 bits this core cares about (`spec.md` §6): DNSSEC OK,
/// Checking Disabled, Compact-denial OK (RFC 9824), plus the raw local-opt
/// payloads for KeyState/ER signaling, whose semantics belong to callers
/// outside the core.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EdnsOptions {
    /// The OPT RR's UDP payload size, if an OPT record was present.
    pub udp_payload_size: Option<u16>,
    /// DNSSEC OK.
    pub dnssec_ok: bool,
    /// Checking Disabled (separate from the header's CD bit historically,
    /// but `domain` surfaces both through the same header accessor).
    pub checking_disabled: bool,
    /// Compact-denial OK (RFC 9824): the client accepts a compact-denial
    /// NSEC instead of the classical two-NSEC proof.
    pub compact_denial_ok: bool,
    /// Raw local-opt option codes present, carried opaquely.
    pub local_opts: Vec<(u16, Vec<u8>)>,
}

/// The local (private-use range) EDNS0 option codes this core recognizes
/// the presence of, without interpreting their payload (`spec.md` §6): the
/// multi-signer KeyState option and the edge-relay (ER) option.
const OPT_CODE_KEYSTATE: u16 = 65422;
const OPT_CODE_ER: u16 = 65423;
/// The RFC 9824 compact-denial-OK option code.
const OPT_CODE_CO: u16 = 65424;

/// `extract_edns0(message) -> EdnsOptions` (`spec.md` §4.9).
pub fn extract_edns0(message: &Message<[u8]>) -> Result<EdnsOptions, ParseError> {
    let mut out = EdnsOptions::default();

    let Some(opt_record) = message.opt() else {
        return Ok(out);
    };

    out.udp_payload_size = Some(opt_record.udp_payload_size());
    out.dnssec_ok = opt_record.dnssec_ok();
    out.checking_disabled = message.header().cd();

    for option in opt_record.opt().iter::<AllOptData<_, _>>() {
        let option = option?;
        match option {
            AllOptData::Other(opt) if opt.code().to_int() == OPT_CODE_CO => {
                out.compact_denial_ok = true;
            }
            AllOptData::Other(opt) if opt.code().to_int() == OPT_CODE_KEYSTATE => {
                out.local_opts.push((OPT_CODE_KEYSTATE, opt.data().to_vec()));
            }
            AllOptData::Other(opt) if opt.code().to_int() == OPT_CODE_ER => {
                out.local_opts.push((OPT_CODE_ER, opt.data().to_vec()));
            }
            _ => {}
        }
    }

    Ok(out)
}

/// Whether `rcode` represents the OPT-extended rcode space (used when
/// building an error OPT record for a FORMERR/BADVERS reply).
pub fn to_opt_rcode(rcode: Rcode) -> OptRcode {
    OptRcode::from(rcode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::base::message_builder::MessageBuilder;
    use domain::base::Name;

    fn query_message(opcode: Opcode) -> domain::base::message::Message<bytes::Bytes> {
        let mut builder = MessageBuilder::new_bytes();
        builder.header_mut().set_opcode(opcode);
        builder.header_mut().set_qr(false);
        let mut builder = builder.question();
        builder.push((Name::root_ref(), domain::base::Rtype::A)).unwrap();
        builder.into_message()
    }

    #[test]
    fn accepts_query() {
        let msg = query_message(Opcode::QUERY);
        assert_eq!(accept(msg.for_slice()), AcceptOutcome::Accept);
    }

    #[test]
    fn drops_responses_silently() {
        let mut builder = MessageBuilder::new_bytes();
        builder.header_mut().set_qr(true);
        let msg = builder.question().into_message();
        assert_eq!(accept(msg.for_slice()), AcceptOutcome::DropSilently);
    }

    #[test]
    fn rejects_other_opcodes_with_notimp() {
        let msg = query_message(Opcode::STATUS);
        assert_eq!(accept(msg.for_slice()), AcceptOutcome::Reject(Rcode::NOTIMP));
    }
}
