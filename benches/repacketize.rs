// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::num::NonZeroUsize;

use bytes::Bytes;
use criterion::{criterion_group, criterion_main, Criterion};
use rtp_healer::codec::h264::fragment::fragment;
use rtp_healer::rtp::{Header, Packet};
use rtp_healer::{forward, Options, StreamSession};

const SSRC: u32 = 0x4cac_cb2a;

/// One second of synthetic 30 fps video: SPS, PPS, a 40 KiB IDR, and 29 5 KiB
/// P slices, each slice sent as 1400-byte FU-A fragments.
fn stream() -> Vec<Packet> {
    let mut pkts = Vec::new();
    let mut seq = 0u16;
    let mut push = |pkts: &mut Vec<Packet>, ts: u32, payload: Vec<u8>| {
        let mut header = Header::new(96, seq, ts, SSRC);
        header.marker = true;
        let pkt = Packet {
            header,
            payload: Bytes::from(payload),
        };
        let frags = if pkt.payload.len() > 1400 {
            fragment(&pkt, NonZeroUsize::new(1400).unwrap()).unwrap()
        } else {
            vec![pkt]
        };
        for mut f in frags {
            f.header.sequence_number = seq;
            seq = seq.wrapping_add(1);
            pkts.push(f);
        }
    };
    push(&mut pkts, 0, b"\x67\x4d\x00\x1e\x95\xa8\x2d\x0f\x69\xb8\x08\x08\x08\x10".to_vec());
    push(&mut pkts, 0, b"\x68\xee\x3c\x80".to_vec());
    for frame in 0..30u32 {
        let (header, len) = if frame == 0 { (0x65, 40 << 10) } else { (0x41, 5 << 10) };
        let mut payload = vec![header];
        payload.extend((0..len).map(|i| (i % 251) as u8));
        push(&mut pkts, frame * 3000, payload);
    }
    pkts
}

fn criterion_benchmark(c: &mut Criterion) {
    let pkts = stream();
    let bytes: usize = pkts.iter().map(Packet::wire_len).sum();
    let mut g = c.benchmark_group("repacketize");
    g.throughput(criterion::Throughput::Bytes(bytes as u64));
    g.bench_function("session", |b| {
        b.iter(|| {
            let mut s = StreamSession::new(Options::new(1200).initial_sequence_number(0)).unwrap();
            for p in &pkts {
                s.push(p.clone());
                while s.pull().is_some() {}
            }
        })
    });
    let rt = tokio::runtime::Runtime::new().unwrap();
    g.bench_function("forward", |b| {
        b.to_async(&rt).iter(|| async {
            let s = StreamSession::new(Options::new(1200).initial_sequence_number(0)).unwrap();
            let (mut ingest, outbound) = forward::channel(s);
            for p in &pkts {
                ingest.on_packet(p.clone());
            }
            drop(ingest);
            forward::run(outbound, futures::sink::drain()).await.unwrap()
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
