// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! tokio-based forwarding of a [`StreamSession`]'s output.
//!
//! The inbound side runs synchronously on whatever callback delivers RTP
//! packets and never blocks; healed packets cross an unbounded channel to a
//! single sender task which writes them to a [`Sink`].

use bytes::Bytes;
use futures::{Sink, SinkExt};
use log::{debug, warn};
use tokio::sync::mpsc;

use crate::rtp::Packet;
use crate::{Disposition, Error, ErrorInt, StreamSession};

/// Splits `session` into the inbound half and the outbound channel.
pub fn channel(session: StreamSession) -> (Ingest, Outbound) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        Ingest {
            session,
            tx,
            receiver_gone: false,
        },
        Outbound { rx },
    )
}

/// The inbound half: feeds packets to the session and queues its output.
///
/// Dropping this (or calling [`Ingest::teardown`]) ends the stream; the
/// sender task finishes once it has sent everything already queued.
pub struct Ingest {
    session: StreamSession,
    tx: mpsc::UnboundedSender<Packet>,
    receiver_gone: bool,
}

impl Ingest {
    /// Processes one inbound packet, queuing whatever it produces.
    pub fn on_packet(&mut self, pkt: Packet) -> Disposition {
        let d = self.session.push(pkt);
        self.flush();
        d
    }

    /// Like [`Ingest::on_packet`] for a raw RTP datagram.
    pub fn on_datagram(&mut self, data: Bytes) -> Disposition {
        let d = self.session.push_raw(data);
        self.flush();
        d
    }

    #[inline]
    pub fn session(&self) -> &StreamSession {
        &self.session
    }

    /// Ends the stream, returning the number of in-flight fragments discarded.
    pub fn teardown(self) -> usize {
        self.session.teardown()
    }

    fn flush(&mut self) {
        while let Some(pkt) = self.session.pull() {
            if self.tx.send(pkt).is_err() && !self.receiver_gone {
                debug!("sender task is gone; discarding outbound packets");
                self.receiver_gone = true;
            }
        }
    }
}

/// The outbound half, consumed by [`run`].
pub struct Outbound {
    rx: mpsc::UnboundedReceiver<Packet>,
}

/// Sends every packet from `outbound` to `sink` in order.
///
/// Returns the number of packets sent once the [`Ingest`] is gone, or fails
/// on the first sink error.
///
/// A packet that fails to serialize is logged and skipped. Its sequence
/// number was already assigned, so receivers see a gap. Packets from
/// [`Packet::parse`] and from a [`StreamSession`] always serialize; only a
/// hand-built header (eg a payload type of 128 or more, or over 15 CSRCs)
/// can fail.
pub async fn run<S>(mut outbound: Outbound, mut sink: S) -> Result<u64, Error>
where
    S: Sink<Bytes> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let mut sent = 0;
    while let Some(pkt) = outbound.rx.recv().await {
        let data = match pkt.to_bytes() {
            Ok(d) => d,
            Err(e) => {
                warn!("unable to serialize outbound packet {:?}: {}", &pkt, e);
                continue;
            }
        };
        sink.send(data)
            .await
            .map_err(|e| wrap!(ErrorInt::SinkError(Box::new(e))))?;
        sent += 1;
    }
    sink.close()
        .await
        .map_err(|e| wrap!(ErrorInt::SinkError(Box::new(e))))?;
    debug!("ingest closed after {} packets", sent);
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::rtp::seq_less;
    use crate::testutil::{init_logging, nal, packet};
    use crate::{ErrorKind, Options};

    #[tokio::test]
    async fn forwards_in_order() {
        init_logging();
        let session = StreamSession::new(Options::new(650).initial_sequence_number(0xfffd)).unwrap();
        let (mut ingest, outbound) = channel(session);
        let (sink, received) = futures::channel::mpsc::unbounded::<Bytes>();
        let sender = tokio::spawn(run(outbound, sink));

        ingest.on_packet(packet(1, 0, false, b"\x67sps"));
        ingest.on_packet(packet(2, 0, false, b"\x68pps"));
        ingest.on_packet(packet(3, 9000, true, &nal(0x65, 2000)));
        assert!(matches!(
            ingest.on_datagram(Bytes::from_static(b"\x80")),
            Disposition::Dropped(_)
        ));
        assert_eq!(ingest.session().stats().forwarded, 5);
        assert_eq!(ingest.teardown(), 0);

        assert_eq!(sender.await.unwrap().unwrap(), 5);
        let out: Vec<Packet> = received
            .map(|b| Packet::parse(b).unwrap())
            .collect()
            .await;
        assert_eq!(out.len(), 5);
        assert_eq!(out[0].payload[0], 0x18);
        assert_eq!(out[1].payload[1], 0x85);
        assert_eq!(out[4].payload[1], 0x45);
        for w in out.windows(2) {
            assert!(seq_less(w[0].header.sequence_number, w[1].header.sequence_number));
        }
        assert_eq!(out[4].header.sequence_number, 0x0001);
    }

    #[tokio::test]
    async fn sink_failure() {
        let session = StreamSession::new(Options::new(1200)).unwrap();
        let (mut ingest, outbound) = channel(session);
        let (sink, received) = futures::channel::mpsc::unbounded::<Bytes>();
        drop(received);
        ingest.on_packet(packet(1, 0, false, b"\x41p"));
        let e = run(outbound, sink).await.unwrap_err();
        assert_eq!(e.kind(), ErrorKind::Sink);
    }

    #[tokio::test]
    async fn unserializable_packet_skipped() {
        init_logging();
        let session = StreamSession::new(Options::new(1200).initial_sequence_number(0)).unwrap();
        let (mut ingest, outbound) = channel(session);
        let mut bad = packet(1, 0, false, b"\x41bad");
        bad.header.payload_type = 0x80;
        ingest.on_packet(bad);
        ingest.on_packet(packet(2, 0, false, b"\x41good"));
        ingest.teardown();

        let (sink, received) = futures::channel::mpsc::unbounded::<Bytes>();
        assert_eq!(run(outbound, sink).await.unwrap(), 1);
        let out: Vec<Packet> = received
            .map(|b| Packet::parse(b).unwrap())
            .collect()
            .await;
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].payload[..], b"\x41good");
        assert_eq!(out[0].header.sequence_number, 1);
    }

    #[tokio::test]
    async fn sender_gone() {
        let session = StreamSession::new(Options::new(1200)).unwrap();
        let (mut ingest, outbound) = channel(session);
        drop(outbound);
        for i in 0..3 {
            ingest.on_packet(packet(i, 0, false, b"\x41p"));
        }
        assert_eq!(ingest.session().stats().forwarded, 3);
        assert_eq!(ingest.session().pending(), 0);
    }
}
