// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use bytes::Bytes;

use crate::rtp::{Header, Packet};

pub(crate) const TEST_SSRC: u32 = 0x4cac_cb2a;
pub(crate) const TEST_PAYLOAD_TYPE: u8 = 96;

pub(crate) fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(true)
        .try_init();
}

/// Asserts two byte strings are equal, printing hex dumps on mismatch.
macro_rules! assert_eq_hex {
    ($left:expr, $right:expr $(,)?) => {{
        let left: &[u8] = &($left)[..];
        let right: &[u8] = &($right)[..];
        if left != right {
            use pretty_hex::PrettyHex as _;
            panic!(
                "assertion failed: left == right\nleft:\n{:?}\nright:\n{:?}",
                left.hex_dump(),
                right.hex_dump()
            );
        }
    }};
}
pub(crate) use assert_eq_hex;

/// Returns a version 2 packet with a minimal header and the given payload.
pub(crate) fn packet(sequence_number: u16, timestamp: u32, marker: bool, payload: &[u8]) -> Packet {
    let mut header = Header::new(TEST_PAYLOAD_TYPE, sequence_number, timestamp, TEST_SSRC);
    header.marker = marker;
    Packet {
        header,
        payload: Bytes::copy_from_slice(payload),
    }
}

/// Returns a single NAL unit of type `nal_header & 0x1f` with a `body_len`-byte body.
pub(crate) fn nal(nal_header: u8, body_len: usize) -> Vec<u8> {
    let mut v = Vec::with_capacity(1 + body_len);
    v.push(nal_header);
    v.extend((0..body_len).map(|i| (i * 7 % 256) as u8));
    v
}
