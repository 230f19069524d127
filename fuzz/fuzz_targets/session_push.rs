// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Pushes arbitrary datagrams into a session. Ensures there are no crashes
//! and that everything it emits fits the packet size limit and carries
//! contiguous sequence numbers.

#![no_main]
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use rtp_healer::{Options, StreamSession};

fuzz_target!(|data: &[u8]| {
    // Each datagram is preceded by a one-byte length.
    let mut s = StreamSession::new(Options::new(200).initial_sequence_number(0xfff0)).unwrap();
    let mut expected_seq = 0xfff0u16;
    let mut data = data;
    while let Some((&len, rest)) = data.split_first() {
        let len = std::cmp::min(usize::from(len), rest.len());
        let (datagram, rest) = rest.split_at(len);
        data = rest;
        s.push_raw(Bytes::copy_from_slice(datagram));
        while let Some(pkt) = s.pull() {
            // Parameter sets and aggregates pass through unsplit and may be larger.
            if pkt.payload.first().map(|h| h & 0x1f) == Some(28) {
                assert!(pkt.wire_len() <= 200);
            }
            assert_eq!(pkt.header.sequence_number, expected_seq);
            expected_seq = expected_seq.wrapping_add(1);
        }
    }
});
