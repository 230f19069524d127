// Copyright (C) 2022 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fragments an arbitrary NAL unit under an arbitrary packet size limit and
//! reassembles it. Ensures the following:
//! *   there are no crashes.
//! *   every fragment fits the limit.
//! *   the round trip produces an error or identical data.

#![no_main]
use std::time::Instant;

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use rtp_healer::codec::h264::{classify, Fragmenter, Pushed, Reassembler};
use rtp_healer::rtp::{Header, Packet};

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }
    let max_packet_size = usize::from(u16::from_be_bytes([data[0], data[1]]));
    let pkt = Packet {
        header: Header::new(96, 0, 0, 0),
        payload: Bytes::copy_from_slice(&data[2..]),
    };
    let frags = match Fragmenter::new(max_packet_size).fragment(&pkt) {
        Ok(f) => f,
        Err(_) => return,
    };
    let mut r = Reassembler::new();
    let now = Instant::now();
    let n = frags.len();
    for (i, mut f) in frags.into_iter().enumerate() {
        assert!(f.wire_len() <= max_packet_size);
        f.header.sequence_number = i as u16;
        let info = classify(&f).unwrap();
        assert_eq!(info.start, i == 0);
        assert_eq!(info.end, i + 1 == n);
        match r.push(f, info, now) {
            Pushed::Complete(c) => {
                assert_eq!(i + 1, n);
                assert!(c.inconsistency.is_none());
                assert_eq!(&c.packet.payload[..], &pkt.payload[..]);
                return;
            }
            Pushed::Started { .. } | Pushed::Buffered { .. } => {}
            Pushed::NotCollecting(_) => panic!(),
        }
    }
    panic!("run never completed");
});
