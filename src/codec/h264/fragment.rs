// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Splits single NAL units into FU-A packets as in
//! [RFC 6184 section 5.8](https://datatracker.ietf.org/doc/html/rfc6184#section-5.8).

use std::num::NonZeroUsize;

use bytes::{BufMut, BytesMut};

use super::{FU_A_PREFIX_LEN, FU_END, FU_START, NAL_REF_MASK, NAL_TYPE_FU_A, NAL_TYPE_MASK};
use crate::{
    rtp::{Header, Packet},
    Error, ErrorInt,
};

/// Splits oversized single NAL unit packets so each piece fits in
/// `max_packet_size` bytes, RTP header included.
#[derive(Copy, Clone, Debug)]
pub struct Fragmenter {
    max_packet_size: usize,
}

impl Fragmenter {
    pub fn new(max_packet_size: usize) -> Self {
        Self { max_packet_size }
    }

    #[inline]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Returns true if `pkt` doesn't fit as-is.
    #[inline]
    pub fn exceeds(&self, pkt: &Packet) -> bool {
        pkt.wire_len() > self.max_packet_size
    }

    /// Returns the number of NAL body bytes each FU-A packet with `header` may carry.
    pub fn chunk_size(&self, header: &Header) -> Result<NonZeroUsize, Error> {
        self.max_packet_size
            .checked_sub(header.wire_len() + FU_A_PREFIX_LEN)
            .and_then(NonZeroUsize::new)
            .ok_or_else(|| {
                wrap!(ErrorInt::MalformedPacket {
                    ssrc: header.ssrc,
                    sequence_number: header.sequence_number,
                    description: format!(
                        "{}-byte RTP header leaves no room for FU-A data in {}-byte packets",
                        header.wire_len(),
                        self.max_packet_size
                    ),
                })
            })
    }

    /// Splits `pkt` into FU-A packets of at most `max_packet_size` bytes each.
    pub fn fragment(&self, pkt: &Packet) -> Result<Vec<Packet>, Error> {
        fragment(pkt, self.chunk_size(&pkt.header)?)
    }
}

/// Splits the single NAL unit in `pkt` into FU-A packets carrying at most
/// `chunk_size` body bytes each.
///
/// Every output packet clones `pkt`'s header, including its sequence number;
/// the caller assigns real sequence numbers on emission. Only the last packet
/// is marked. A body that fits in one chunk yields one packet with both the
/// start and end bits set.
pub fn fragment(pkt: &Packet, chunk_size: NonZeroUsize) -> Result<Vec<Packet>, Error> {
    let (nal_header, body) = match pkt.payload.split_first() {
        Some((&h, body)) if (1..=23).contains(&(h & NAL_TYPE_MASK)) => (h, body),
        _ => bail!(ErrorInt::InvalidArgument(format!(
            "can't fragment packet seq={:04x}: not a single NAL unit",
            pkt.header.sequence_number
        ))),
    };
    let original_type = nal_header & NAL_TYPE_MASK;
    let fu_indicator = (nal_header & NAL_REF_MASK) | NAL_TYPE_FU_A;
    let chunk_size = chunk_size.get();
    let chunks = std::cmp::max(
        1,
        body.len() / chunk_size + usize::from(body.len() % chunk_size != 0),
    );
    let mut pieces = body.chunks(chunk_size);
    let mut out = Vec::with_capacity(chunks);
    for i in 0..chunks {
        let first = i == 0;
        let last = i + 1 == chunks;
        let piece = pieces.next().unwrap_or(&[]);
        let mut fu_header = original_type;
        if first {
            fu_header |= FU_START;
        }
        if last {
            fu_header |= FU_END;
        }
        let mut payload = BytesMut::with_capacity(FU_A_PREFIX_LEN + piece.len());
        payload.put_u8(fu_indicator);
        payload.put_u8(fu_header);
        payload.put_slice(piece);
        let mut header = pkt.header.clone();
        header.marker = last;
        out.push(Packet {
            header,
            payload: payload.freeze(),
        });
    }
    Ok(out)
}
