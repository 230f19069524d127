// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [H.264](https://www.itu.int/rec/T-REC-H.264-201906-I/en) RTP payloads as in
//! [RFC 6184](https://datatracker.ietf.org/doc/html/rfc6184).

use crate::{rtp::Packet, Error, ErrorInt};

pub mod fragment;
pub mod params;
pub mod reassemble;
pub mod stap_a;
pub mod validate;

pub use fragment::Fragmenter;
pub use params::ParameterSetCache;
pub use reassemble::{Pushed, Reassembler};
pub use validate::validate_fu_a;

/// Low five bits of a NAL header: `nal_unit_type`.
pub const NAL_TYPE_MASK: u8 = 0b0001_1111;

/// High three bits of a NAL header: `forbidden_zero_bit` and `nal_ref_idc`.
pub const NAL_REF_MASK: u8 = 0b1110_0000;

pub const NAL_TYPE_IDR: u8 = 5;
pub const NAL_TYPE_SPS: u8 = 7;
pub const NAL_TYPE_PPS: u8 = 8;
pub const NAL_TYPE_STAP_A: u8 = 24;
pub const NAL_TYPE_STAP_B: u8 = 25;
pub const NAL_TYPE_MTAP16: u8 = 26;
pub const NAL_TYPE_MTAP24: u8 = 27;
pub const NAL_TYPE_FU_A: u8 = 28;
pub const NAL_TYPE_FU_B: u8 = 29;

/// FU header start bit.
pub const FU_START: u8 = 0b1000_0000;

/// FU header end bit.
pub const FU_END: u8 = 0b0100_0000;

/// FU indicator plus FU header.
pub const FU_A_PREFIX_LEN: usize = 2;

/// What a single RTP payload carries, derived from its first byte or two.
///
/// Recomputed for every packet. The SSRC, timestamp, and sequence number are
/// copied from the packet so a run of these can be checked for consistency
/// without holding on to the packets themselves.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NaluInfo {
    /// The payload's first byte: a NAL header or FU indicator.
    pub nal_header: u8,

    /// `nal_header & 0x1f`.
    pub nal_type: u8,

    /// For FU-A, the type of the fragmented NAL; otherwise `nal_type`.
    pub original_type: u8,

    /// FU-A start bit. Always false for other packet types.
    pub start: bool,

    /// FU-A end bit. Always false for other packet types.
    pub end: bool,

    pub is_idr: bool,

    pub ssrc: u32,
    pub timestamp: u32,
    pub sequence_number: u16,
}

impl NaluInfo {
    #[inline]
    pub fn is_fragment(&self) -> bool {
        self.nal_type == NAL_TYPE_FU_A
    }

    #[inline]
    pub fn is_parameter_set(&self) -> bool {
        self.nal_type == NAL_TYPE_SPS || self.nal_type == NAL_TYPE_PPS
    }

    /// Returns true for a complete NAL unit or the first fragment of one.
    #[inline]
    pub fn begins_unit(&self) -> bool {
        self.start || !self.is_fragment()
    }

    /// Returns true if this packet may be split into FU-A fragments.
    ///
    /// Only single NAL units qualify; aggregation packets and existing
    /// fragments are forwarded as they are.
    #[inline]
    pub fn is_single_nal(&self) -> bool {
        (1..=23).contains(&self.nal_type)
    }
}

/// Classifies `pkt` by its NAL header (and FU header, for FU-A).
///
/// Fails with `UnrecognizedNalType` for types 0, 30, and 31, and with
/// `MalformedPacket` when the payload is too short for its type.
pub fn classify(pkt: &Packet) -> Result<NaluInfo, Error> {
    let ssrc = pkt.header.ssrc;
    let sequence_number = pkt.header.sequence_number;
    let nal_header = match pkt.payload.first() {
        Some(&h) => h,
        None => bail!(ErrorInt::MalformedPacket {
            ssrc,
            sequence_number,
            description: "empty payload".to_owned(),
        }),
    };
    let nal_type = nal_header & NAL_TYPE_MASK;
    let mut info = NaluInfo {
        nal_header,
        nal_type,
        original_type: nal_type,
        start: false,
        end: false,
        is_idr: nal_type == NAL_TYPE_IDR,
        ssrc,
        timestamp: pkt.header.timestamp,
        sequence_number,
    };
    match nal_type {
        0 | 30 | 31 => bail!(ErrorInt::UnrecognizedNalType {
            ssrc,
            sequence_number,
            nal_type,
        }),
        NAL_TYPE_FU_A => {
            let fu_header = match pkt.payload.get(1) {
                Some(&h) => h,
                None => bail!(ErrorInt::MalformedPacket {
                    ssrc,
                    sequence_number,
                    description: "FU-A is missing its FU header".to_owned(),
                }),
            };
            info.original_type = fu_header & NAL_TYPE_MASK;
            if !(1..=23).contains(&info.original_type) {
                bail!(ErrorInt::MalformedPacket {
                    ssrc,
                    sequence_number,
                    description: format!(
                        "FU-A carries NAL type {} which can't be fragmented",
                        info.original_type
                    ),
                });
            }
            info.start = (fu_header & FU_START) != 0;
            info.end = (fu_header & FU_END) != 0;
            info.is_idr = info.original_type == NAL_TYPE_IDR;
        }
        _ => {}
    }
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testutil::packet, ErrorKind};

    #[test]
    fn single_nal() {
        let info = classify(&packet(1, 0, false, b"\x65idr slice")).unwrap();
        assert_eq!(info.nal_type, 5);
        assert_eq!(info.original_type, 5);
        assert!(info.is_idr);
        assert!(!info.start && !info.end);
        assert!(info.begins_unit());
        assert!(info.is_single_nal());

        let info = classify(&packet(2, 0, false, b"\x41p")).unwrap();
        assert!(!info.is_idr);
        assert!(!info.is_parameter_set());
        assert!(classify(&packet(3, 0, false, b"\x67sps")).unwrap().is_parameter_set());
        assert!(classify(&packet(4, 0, false, b"\x68pps")).unwrap().is_parameter_set());
    }

    #[test]
    fn fu_a() {
        let info = classify(&packet(1, 0, false, b"\x7c\x85start")).unwrap();
        assert_eq!(info.nal_header, 0x7c);
        assert_eq!(info.nal_type, NAL_TYPE_FU_A);
        assert_eq!(info.original_type, 5);
        assert!(info.is_idr);
        assert!(info.start && !info.end);
        assert!(info.begins_unit());
        assert!(!info.is_single_nal());

        let info = classify(&packet(2, 0, false, b"\x5c\x01middle")).unwrap();
        assert!(!info.start && !info.end && !info.is_idr);
        assert!(!info.begins_unit());

        let info = classify(&packet(3, 0, true, b"\x5c\x41")).unwrap();
        assert!(!info.start && info.end);
    }

    #[test]
    fn aggregates_pass_classification() {
        for t in [24u8, 25, 26, 27, 29] {
            let info = classify(&packet(1, 0, false, &[0x60 | t, 0, 0])).unwrap();
            assert_eq!(info.nal_type, t);
            assert!(!info.is_single_nal());
            assert!(!info.is_idr);
        }
    }

    #[test]
    fn rejects() {
        for (payload, kind) in [
            (&b""[..], ErrorKind::MalformedPacket),
            (&b"\x7c"[..], ErrorKind::MalformedPacket),
            (&b"\x7c\x98xx"[..], ErrorKind::MalformedPacket), // FU-A of a STAP-A
            (&b"\x00x"[..], ErrorKind::UnrecognizedNalType),
            (&b"\x1ex"[..], ErrorKind::UnrecognizedNalType),
            (&b"\x7fx"[..], ErrorKind::UnrecognizedNalType),
        ] {
            let e = classify(&packet(7, 0, false, payload)).unwrap_err();
            assert_eq!(e.kind(), kind, "{payload:02x?}: {e}");
        }
    }
}
