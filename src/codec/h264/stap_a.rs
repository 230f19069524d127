// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! STAP-A aggregation packets as in
//! [RFC 6184 section 5.7.1](https://datatracker.ietf.org/doc/html/rfc6184#section-5.7.1).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::NAL_TYPE_STAP_A;
use crate::{
    rtp::{Header, Packet},
    Error, ErrorInt,
};

/// Builds a STAP-A carrying `sps` then `pps`, to precede the IDR unit whose
/// header is `trigger`.
///
/// The result shares `trigger`'s payload type, timestamp, and SSRC; it is
/// unmarked and its sequence number is a placeholder until emission. Fails
/// with `MissingParameterSets` if either is empty, or `InvalidArgument` if
/// either exceeds the 16-bit STAP-A length field.
pub fn build(sps: &[u8], pps: &[u8], trigger: &Header) -> Result<Packet, Error> {
    let mut payload = BytesMut::with_capacity(1 + 2 + sps.len() + 2 + pps.len());
    payload.put_u8(NAL_TYPE_STAP_A);
    if sps.is_empty() || pps.is_empty() {
        bail!(ErrorInt::MissingParameterSets {
            ssrc: trigger.ssrc,
            timestamp: trigger.timestamp,
            sps_len: sps.len(),
            pps_len: pps.len(),
        });
    }
    for nal in [sps, pps] {
        let len = match u16::try_from(nal.len()) {
            Ok(l) => l,
            Err(_) => bail!(ErrorInt::InvalidArgument(format!(
                "{}-byte parameter set too large for STAP-A",
                nal.len()
            ))),
        };
        payload.put_u16(len);
        payload.put_slice(nal);
    }
    Ok(Packet {
        header: Header::new(
            trigger.payload_type,
            trigger.sequence_number,
            trigger.timestamp,
            trigger.ssrc,
        ),
        payload: payload.freeze(),
    })
}

/// Splits the STAP-A in `pkt` into the NAL units it aggregates.
pub fn parse(pkt: &Packet) -> Result<Vec<Bytes>, Error> {
    let malformed = |description: String| {
        wrap!(ErrorInt::MalformedPacket {
            ssrc: pkt.header.ssrc,
            sequence_number: pkt.header.sequence_number,
            description,
        })
    };
    let mut data = pkt.payload.clone();
    if data.first().map(|h| h & super::NAL_TYPE_MASK) != Some(NAL_TYPE_STAP_A) {
        return Err(malformed("not a STAP-A".to_owned()));
    }
    data.advance(1);
    let mut nals = Vec::new();
    loop {
        if data.remaining() < 2 {
            return Err(malformed(format!(
                "STAP-A has {} remaining bytes while expecting 2-byte length",
                data.remaining()
            )));
        }
        let len = usize::from(data.get_u16());
        if len == 0 {
            return Err(malformed("zero length in STAP-A".to_owned()));
        }
        if data.remaining() < len {
            return Err(malformed(format!(
                "STAP-A too short: {} bytes remaining, expecting {}-byte NAL",
                data.remaining(),
                len
            )));
        }
        nals.push(data.split_to(len));
        if !data.has_remaining() {
            return Ok(nals);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{assert_eq_hex, packet};
    use crate::ErrorKind;

    #[test]
    fn build_layout() {
        let mut trigger = packet(77, 123_456, true, b"\x65idr").header;
        trigger.csrcs = vec![1];
        let p = build(b"\x67sps!", b"\x68pp", &trigger).unwrap();
        assert_eq_hex!(&p.payload[..], b"\x18\x00\x05\x67sps!\x00\x03\x68pp");
        assert!(!p.header.marker);
        assert_eq!(p.header.timestamp, 123_456);
        assert_eq!(p.header.ssrc, trigger.ssrc);
        assert_eq!(p.header.payload_type, trigger.payload_type);
        assert!(p.header.csrcs.is_empty());
    }

    #[test]
    fn build_missing() {
        let trigger = packet(1, 0, false, b"\x65").header;
        let e = build(b"", b"\x68pp", &trigger).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::MissingParameterSets);
        let e = build(b"\x67s", b"", &trigger).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::MissingParameterSets);
    }

    #[test]
    fn build_too_large() {
        let trigger = packet(1, 0, false, b"\x65").header;
        let sps = vec![0x67; 65536];
        let e = build(&sps, b"\x68p", &trigger).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidArgument);
        let e = build(b"\x67s", &sps, &trigger).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::InvalidArgument);

        let p = build(&sps[..65535], b"\x68p", &trigger).unwrap();
        assert_eq!(&p.payload[..3], b"\x18\xff\xff");
    }

    #[test]
    fn parse_built() {
        let trigger = packet(1, 0, false, b"\x65").header;
        let p = build(b"\x67sps", b"\x68pps", &trigger).unwrap();
        let nals = parse(&p).unwrap();
        assert_eq!(nals.len(), 2);
        assert_eq_hex!(&nals[0][..], b"\x67sps");
        assert_eq_hex!(&nals[1][..], b"\x68pps");
    }

    #[test]
    fn parse_rejects() {
        for payload in [
            &b"\x18"[..],
            b"\x18\x00",
            b"\x18\x00\x00",
            b"\x18\x00\x05\x67ab",
            b"\x18\x00\x01\x67\x00",
            b"\x65\x00\x01\x67",
        ] {
            let e = parse(&packet(1, 0, false, payload)).unwrap_err();
            assert_eq!(e.kind(), ErrorKind::MalformedPacket, "{payload:02x?}");
        }
    }
}
