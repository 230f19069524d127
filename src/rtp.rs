// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handles RTP data as described in
//! [RFC 3550 section 5.1](https://datatracker.ietf.org/doc/html/rfc3550#section-5.1).

use bytes::{BufMut, Bytes, BytesMut};
use pretty_hex::PrettyHex;

use crate::{Error, ErrorInt};

/// The minimum length of an RTP header (no CSRCs or extensions).
pub const MIN_HEADER_LEN: usize = 12;

/// A header extension, as in
/// [RFC 3550 section 5.3.1](https://datatracker.ietf.org/doc/html/rfc3550#section-5.3.1).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Extension {
    /// The "defined by profile" field.
    pub profile: u16,

    /// Extension data, excluding the 4-byte extension header. Must be a
    /// multiple of 4 bytes long.
    pub data: Bytes,
}

/// An RTP fixed header plus CSRCs and the optional extension.
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |           synchronization source (SSRC) identifier            |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |            contributing source (CSRC) identifiers             |
/// |                             ....                              |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Only the marker bit and sequence number are rewritten on output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: u8,

    /// True if the received packet was padded. Padding is stripped by
    /// [`Packet::parse`] and never re-emitted by [`Packet::to_bytes`].
    pub padding: bool,

    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrcs: Vec<u32>,
    pub extension: Option<Extension>,
}

impl Header {
    /// Returns a version 2 header with no padding, CSRCs, or extension.
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Header {
            version: 2,
            padding: false,
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrcs: Vec::new(),
            extension: None,
        }
    }

    #[inline]
    pub fn has_extension(&self) -> bool {
        self.extension.is_some()
    }

    /// Returns the length of this header on the wire.
    pub fn wire_len(&self) -> usize {
        MIN_HEADER_LEN
            + 4 * self.csrcs.len()
            + self.extension.as_ref().map(|e| 4 + e.data.len()).unwrap_or(0)
    }

    fn put(&self, buf: &mut BytesMut) -> Result<(), Error> {
        if self.payload_type >= 0x80 {
            bail!(ErrorInt::InvalidArgument(format!(
                "payload type {} too large",
                self.payload_type
            )));
        }
        let csrc_count = match u8::try_from(self.csrcs.len()) {
            Ok(c) if c <= 0b1111 => c,
            _ => bail!(ErrorInt::InvalidArgument(format!(
                "{} CSRCs; at most 15 allowed",
                self.csrcs.len()
            ))),
        };
        buf.put_u8(
            2 << 6 // version=2, no padding.
                | if self.extension.is_some() { 0b0001_0000 } else { 0 }
                | csrc_count,
        );
        buf.put_u8(if self.marker { 0b1000_0000 } else { 0 } | self.payload_type);
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for &csrc in &self.csrcs {
            buf.put_u32(csrc);
        }
        if let Some(ext) = &self.extension {
            let words = match u16::try_from(ext.data.len() / 4) {
                Ok(w) if ext.data.len() % 4 == 0 => w,
                _ => bail!(ErrorInt::InvalidArgument(format!(
                    "bad {}-byte header extension",
                    ext.data.len()
                ))),
            };
            buf.put_u16(ext.profile);
            buf.put_u16(words);
            buf.put_slice(&ext.data);
        }
        Ok(())
    }
}

/// An RTP packet: header plus payload, with any padding removed.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("ssrc", &format_args!("{:08x}", self.header.ssrc))
            .field("sequence_number", &self.header.sequence_number)
            .field("timestamp", &self.header.timestamp)
            .field("mark", &self.header.marker)
            .field("payload_type", &self.header.payload_type)
            .field(
                "payload",
                &self.payload.hex_conf(pretty_hex::HexConfig {
                    max_bytes: 64,
                    ..Default::default()
                }),
            )
            .finish()
    }
}

impl Packet {
    /// Validates and splits a raw RTP packet.
    pub fn parse(data: Bytes) -> Result<Self, Error> {
        // RTP doesn't have a defined maximum size but it's implied by the transport:
        // UDP packets (even with fragmentation) are at most 65,536 bytes.
        if data.len() < MIN_HEADER_LEN || data.len() > usize::from(u16::MAX) {
            bail!(ErrorInt::MalformedPacket {
                ssrc: 0,
                sequence_number: 0,
                description: format!("bad RTP packet length {}", data.len()),
            });
        }
        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
        let malformed = |description: &str| {
            wrap!(ErrorInt::MalformedPacket {
                ssrc,
                sequence_number,
                description: description.to_owned(),
            })
        };
        let version = data[0] >> 6;
        if version != 2 {
            return Err(malformed("must be version 2"));
        }
        let padding = (data[0] & 0b0010_0000) != 0;
        let has_extension = (data[0] & 0b0001_0000) != 0;
        let csrc_count = usize::from(data[0] & 0b0000_1111);
        let csrc_end = MIN_HEADER_LEN + 4 * csrc_count;
        if data.len() < csrc_end {
            return Err(malformed("CSRCs extend beyond end of packet"));
        }
        let csrcs = data[MIN_HEADER_LEN..csrc_end]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        let (extension, payload_start) = if has_extension {
            if data.len() < csrc_end + 4 {
                return Err(malformed("extension is after end of packet"));
            }
            let profile = u16::from_be_bytes([data[csrc_end], data[csrc_end + 1]]);
            let words = usize::from(u16::from_be_bytes([data[csrc_end + 2], data[csrc_end + 3]]));
            let ext_end = csrc_end + 4 + 4 * words;
            if data.len() < ext_end {
                return Err(malformed("extension extends beyond end of packet"));
            }
            (
                Some(Extension {
                    profile,
                    data: data.slice(csrc_end + 4..ext_end),
                }),
                ext_end,
            )
        } else {
            (None, csrc_end)
        };
        let payload_end = if padding {
            if data.len() == payload_start {
                return Err(malformed("missing padding"));
            }
            let padding_len = usize::from(data[data.len() - 1]);
            if padding_len == 0 {
                return Err(malformed("invalid padding length 0"));
            }
            match data.len().checked_sub(padding_len) {
                Some(e) if e >= payload_start => e,
                _ => return Err(malformed("padding larger than payload")),
            }
        } else {
            data.len()
        };
        Ok(Packet {
            header: Header {
                version,
                padding,
                marker: (data[1] & 0b1000_0000) != 0,
                payload_type: data[1] & 0b0111_1111,
                sequence_number,
                timestamp,
                ssrc,
                csrcs,
                extension,
            },
            payload: data.slice(payload_start..payload_end),
        })
    }

    /// Returns the length of this packet on the wire: header plus payload.
    #[inline]
    pub fn wire_len(&self) -> usize {
        self.header.wire_len() + self.payload.len()
    }

    /// Serializes this packet. Padding is never written.
    pub fn to_bytes(&self) -> Result<Bytes, Error> {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.header.put(&mut buf)?;
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }
}

/// Returns true iff sequence number `a` is before `b`, treating the 16-bit
/// space as circular: `0xffff` is before `0x0000`.
#[inline]
pub fn seq_less(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{testutil::assert_eq_hex, ErrorKind};

    #[test]
    fn parse_plain() {
        let p = Packet::parse(Bytes::from_static(
            b"\x80\xe0\x12\x34\x00\x00\x00\x64\xde\xad\xbe\xef\x65abc",
        ))
        .unwrap();
        assert_eq!(p.header.version, 2);
        assert!(p.header.marker);
        assert_eq!(p.header.payload_type, 96);
        assert_eq!(p.header.sequence_number, 0x1234);
        assert_eq!(p.header.timestamp, 100);
        assert_eq!(p.header.ssrc, 0xdeadbeef);
        assert!(!p.header.has_extension());
        assert_eq!(&p.payload[..], b"\x65abc");
        assert_eq!(p.wire_len(), 16);
    }

    #[test]
    fn parse_csrc_extension_padding() {
        let raw: &[u8] = b"\xb1\x60\x00\x01\x00\x00\x00\x02\x00\x00\x00\x03\
                           \x00\x00\x00\x04\
                           \xbe\xde\x00\x01\x11\x22\x33\x44\
                           \x41xy\
                           \x00\x00\x03";
        let p = Packet::parse(Bytes::from_static(raw)).unwrap();
        assert!(p.header.padding);
        assert_eq!(p.header.csrcs, vec![4]);
        let ext = p.header.extension.as_ref().unwrap();
        assert_eq!(ext.profile, 0xbede);
        assert_eq!(&ext.data[..], b"\x11\x22\x33\x44");
        assert_eq!(&p.payload[..], b"\x41xy");
        assert_eq!(p.header.wire_len(), 24);

        // Re-serialized without the padding.
        let out = p.to_bytes().unwrap();
        assert_eq_hex!(&out[..], &b"\x91\x60\x00\x01\x00\x00\x00\x02\x00\x00\x00\x03\
                                    \x00\x00\x00\x04\
                                    \xbe\xde\x00\x01\x11\x22\x33\x44\
                                    \x41xy"[..]);
    }

    #[test]
    fn parse_rejects() {
        for raw in [
            &b"\x80\x60\x00"[..],                                       // too short
            &b"\x40\x60\x00\x01\x00\x00\x00\x02\x00\x00\x00\x03\x41"[..], // version 1
            &b"\x82\x60\x00\x01\x00\x00\x00\x02\x00\x00\x00\x03\x41"[..], // missing CSRCs
            &b"\x90\x60\x00\x01\x00\x00\x00\x02\x00\x00\x00\x03\xbe\xde\x00\x02\x00\x00\x00\x00"[..],
            &b"\xa0\x60\x00\x01\x00\x00\x00\x02\x00\x00\x00\x03\x41\x00"[..], // zero padding
            &b"\xa0\x60\x00\x01\x00\x00\x00\x02\x00\x00\x00\x03\x41\x05"[..], // padding too big
        ] {
            let e = Packet::parse(Bytes::copy_from_slice(raw)).unwrap_err();
            assert_eq!(e.kind(), ErrorKind::MalformedPacket, "{raw:02x?}: {e}");
        }
    }

    #[test]
    fn marshal_rejects_bad_header() {
        let mut h = Header::new(0x80, 0, 0, 0);
        let p = Packet {
            header: h.clone(),
            payload: Bytes::from_static(b"\x41"),
        };
        assert_eq!(p.to_bytes().unwrap_err().kind(), ErrorKind::InvalidArgument);
        h.payload_type = 96;
        h.csrcs = vec![0; 16];
        let p = Packet {
            header: h,
            payload: Bytes::from_static(b"\x41"),
        };
        assert_eq!(p.to_bytes().unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn seq_wraparound() {
        assert!(seq_less(1, 2));
        assert!(!seq_less(2, 1));
        assert!(!seq_less(7, 7));
        assert!(seq_less(0xffff, 0));
        assert!(!seq_less(0, 0xffff));
        assert!(seq_less(0xfff0, 0x0010));
    }
}
