// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-stream repacketization: [`StreamSession`] and its [`Options`].

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, log_enabled, trace, warn};

use crate::codec::h264::{
    classify, stap_a, validate_fu_a, Fragmenter, NaluInfo, ParameterSetCache, Pushed,
    Reassembler, FU_A_PREFIX_LEN, NAL_TYPE_STAP_A,
};
use crate::rtp::{Packet, MIN_HEADER_LEN};
use crate::{Error, ErrorInt, ErrorKind};

/// The smallest usable `max_packet_size`: a minimal RTP header, the FU-A
/// prefix, and one byte of NAL data.
pub const MIN_MAX_PACKET_SIZE: usize = MIN_HEADER_LEN + FU_A_PREFIX_LEN + 1;

/// The largest usable `max_packet_size`, as bounded by UDP.
pub const MAX_MAX_PACKET_SIZE: usize = u16::MAX as usize;

/// What to do when the outbound queue is full.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Discard the oldest queued units to make room. A unit partly taken by
    /// [`StreamSession::pull`] is never discarded.
    #[default]
    DropOldest,

    /// Discard the unit being queued.
    DropNewest,
}

impl std::fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverflowPolicy::DropOldest => f.pad("drop-oldest"),
            OverflowPolicy::DropNewest => f.pad("drop-newest"),
        }
    }
}

impl std::str::FromStr for OverflowPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "drop-oldest" => OverflowPolicy::DropOldest,
            "drop-newest" => OverflowPolicy::DropNewest,
            _ => bail!(ErrorInt::InvalidArgument(format!(
                "overflow policy {s:?} not understood"
            ))),
        })
    }
}

/// Options which must be decided when creating a [`StreamSession`].
#[derive(Clone, Debug)]
pub struct Options {
    max_packet_size: usize,
    initial_sequence_number: Option<u16>,
    collection_timeout: Option<Duration>,
    max_pending: Option<NonZeroUsize>,
    overflow_policy: OverflowPolicy,
    parameter_sets: ParameterSetCache,
}

impl Options {
    /// Returns options for packets of at most `max_packet_size` bytes,
    /// RTP header included.
    pub fn new(max_packet_size: usize) -> Self {
        Options {
            max_packet_size,
            initial_sequence_number: None,
            collection_timeout: None,
            max_pending: None,
            overflow_policy: OverflowPolicy::default(),
            parameter_sets: ParameterSetCache::new(),
        }
    }

    /// Sets the first outbound sequence number.
    ///
    /// Defaults to a random value, as
    /// [RFC 3550 section 5.1](https://datatracker.ietf.org/doc/html/rfc3550#section-5.1)
    /// recommends.
    pub fn initial_sequence_number(self, initial_sequence_number: u16) -> Self {
        Self {
            initial_sequence_number: Some(initial_sequence_number),
            ..self
        }
    }

    /// Abandons an incomplete FU-A collection once it's older than `timeout`.
    ///
    /// By default a collection waits indefinitely for its end fragment (or a
    /// new start fragment).
    pub fn collection_timeout(self, timeout: Duration) -> Self {
        Self {
            collection_timeout: Some(timeout),
            ..self
        }
    }

    /// Bounds the outbound queue to `max_pending` packets, applying `policy`
    /// when it's full. Unbounded by default.
    ///
    /// The queue holds whole units: a packet together with its injected
    /// STAP-A, or a complete FU-A run. A unit longer than `max_pending` is
    /// always discarded.
    pub fn max_pending(self, max_pending: NonZeroUsize, policy: OverflowPolicy) -> Self {
        Self {
            max_pending: Some(max_pending),
            overflow_policy: policy,
            ..self
        }
    }

    /// Seeds the parameter set cache, for streams that only carry SPS and PPS
    /// out-of-band.
    pub fn parameter_sets(mut self, sps: Bytes, pps: Bytes) -> Self {
        self.parameter_sets.set_sps(sps);
        self.parameter_sets.set_pps(pps);
        self
    }

    /// Seeds the parameter set cache from the SDP `fmtp` parameters'
    /// `sprop-parameter-sets`.
    pub fn format_specific_params(self, format_specific_params: &str) -> Result<Self, Error> {
        Ok(Self {
            parameter_sets: ParameterSetCache::parse_format_specific_params(
                format_specific_params,
            )?,
            ..self
        })
    }

    pub fn validate(&self) -> Result<(), Error> {
        if !(MIN_MAX_PACKET_SIZE..=MAX_MAX_PACKET_SIZE).contains(&self.max_packet_size) {
            bail!(ErrorInt::InvalidArgument(format!(
                "max_packet_size {} is outside [{}, {}]",
                self.max_packet_size, MIN_MAX_PACKET_SIZE, MAX_MAX_PACKET_SIZE
            )));
        }
        if self.collection_timeout == Some(Duration::ZERO) {
            bail!(ErrorInt::InvalidArgument(
                "collection_timeout must be non-zero".to_owned()
            ));
        }
        Ok(())
    }
}

/// Assigns outbound sequence numbers.
///
/// The only writer of outbound sequence numbers, so a stream's output is
/// contiguous modulo 2^16 no matter how packets were split or merged.
#[derive(Debug)]
pub struct Sequencer(AtomicU16);

impl Sequencer {
    pub fn new(initial: u16) -> Self {
        Sequencer(AtomicU16::new(initial))
    }

    /// Returns the next sequence number and advances, wrapping after `0xffff`.
    #[inline]
    pub fn next(&self) -> u16 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the sequence number the next call to [`Sequencer::next`] will return.
    #[inline]
    pub fn current(&self) -> u16 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters for one [`StreamSession`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct SessionStats {
    /// Packets passed to [`StreamSession::push`].
    pub received: u64,

    /// Packets queued for output, including injected and re-fragmented ones.
    /// Packets later discarded by [`OverflowPolicy::DropOldest`] are
    /// subtracted again.
    pub forwarded: u64,

    /// SPS/PPS packets stored in the cache rather than forwarded.
    pub parameter_sets_absorbed: u64,

    /// STAP-A packets queued ahead of an IDR and not since discarded.
    pub stap_a_injected: u64,

    /// Single NAL units split into FU-A packets.
    pub units_fragmented: u64,

    /// Inbound FU-A runs rebuilt into a NAL unit.
    pub runs_reassembled: u64,

    pub dropped_malformed: u64,
    pub dropped_unrecognized: u64,

    /// Oversized FU-A continuation fragments that arrived with no collection in progress.
    pub dropped_stray_fragments: u64,

    /// Packets discarded by the outbound queue's [`OverflowPolicy`], counting
    /// every packet of each discarded unit.
    pub dropped_overflow: u64,

    pub missing_parameter_sets: u64,
    pub inconsistent_fua_sequences: u64,
    pub out_of_order_fragments: u64,
    pub collections_abandoned: u64,
    pub fragments_abandoned: u64,
}

/// The outcome of pushing one packet into a [`StreamSession`].
#[derive(Debug)]
pub enum Disposition {
    /// `packets` packets were queued, zero if the overflow policy discarded
    /// them. `diagnostics` holds non-fatal problems
    /// (`MissingParameterSets`, `InconsistentFuaSequence`) found on the way.
    Forwarded {
        packets: usize,
        diagnostics: Vec<Error>,
    },

    /// An SPS or PPS was stored in the parameter set cache.
    Absorbed,

    /// A FU-A fragment was held for reassembly.
    Buffered,

    /// An oversized FU-A continuation fragment with no collection in progress
    /// was discarded.
    Ignored,

    /// The packet was discarded as malformed or of an unrecognized NAL type.
    Dropped(Error),
}

/// Packets queued together by one push, discarded together on overflow.
#[derive(Copy, Clone, Debug)]
struct QueuedUnit {
    len: usize,
    stap_a: bool,
}

/// Repacketizes one H.264 RTP stream.
///
/// Push inbound packets in arrival order with [`StreamSession::push`], then
/// [`StreamSession::pull`] until it returns `None`. Outbound packets carry
/// sequence numbers from the session's [`Sequencer`].
#[derive(Debug)]
pub struct StreamSession {
    fragmenter: Fragmenter,
    collection_timeout: Option<Duration>,
    max_pending: Option<NonZeroUsize>,
    overflow_policy: OverflowPolicy,
    parameter_sets: ParameterSetCache,
    reassembler: Reassembler,
    sequencer: Sequencer,
    pending: VecDeque<Packet>,

    /// Splits `pending` into units, front first.
    units: VecDeque<QueuedUnit>,

    /// Packets of `units.front()` already pulled.
    front_pulled: usize,
    stats: SessionStats,
}

impl StreamSession {
    pub fn new(options: Options) -> Result<Self, Error> {
        options.validate()?;
        let initial = options
            .initial_sequence_number
            .unwrap_or_else(rand::random::<u16>);
        Ok(StreamSession {
            fragmenter: Fragmenter::new(options.max_packet_size),
            collection_timeout: options.collection_timeout,
            max_pending: options.max_pending,
            overflow_policy: options.overflow_policy,
            parameter_sets: options.parameter_sets,
            reassembler: Reassembler::new(),
            sequencer: Sequencer::new(initial),
            pending: VecDeque::new(),
            units: VecDeque::new(),
            front_pulled: 0,
            stats: SessionStats::default(),
        })
    }

    #[inline]
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    #[inline]
    pub fn parameter_sets(&self) -> &ParameterSetCache {
        &self.parameter_sets
    }

    #[inline]
    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Returns true if a FU-A collection is in progress.
    #[inline]
    pub fn is_collecting(&self) -> bool {
        self.reassembler.is_collecting()
    }

    /// Returns the number of packets waiting for [`StreamSession::pull`].
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns the next outbound packet, if any.
    pub fn pull(&mut self) -> Option<Packet> {
        let pkt = self.pending.pop_front()?;
        if let Some(front) = self.units.front() {
            self.front_pulled += 1;
            if self.front_pulled >= front.len {
                self.units.pop_front();
                self.front_pulled = 0;
            }
        }
        Some(pkt)
    }

    /// Parses a raw RTP datagram and pushes it.
    pub fn push_raw(&mut self, data: Bytes) -> Disposition {
        match Packet::parse(data) {
            Ok(pkt) => self.push(pkt),
            Err(e) => {
                self.stats.received += 1;
                self.drop_packet(e)
            }
        }
    }

    pub fn push(&mut self, pkt: Packet) -> Disposition {
        self.push_at(pkt, Instant::now())
    }

    /// Pushes a packet received at `now`. `now` drives the collection timeout.
    pub fn push_at(&mut self, pkt: Packet, now: Instant) -> Disposition {
        self.stats.received += 1;
        if let Some(timeout) = self.collection_timeout {
            let n = self.reassembler.expire(now, timeout);
            if n > 0 {
                warn!(
                    "[ssrc={:08x}] abandoning {} FU-A fragments collected over more than {:?}",
                    pkt.header.ssrc, n, timeout
                );
                self.record_abandoned(n);
            }
        }

        let info = match classify(&pkt) {
            Ok(i) => i,
            Err(e) => return self.drop_packet(e),
        };
        trace!(
            "[ssrc={:08x}] seq={:04x} ts={} type={} orig={} start={} end={} len={}",
            info.ssrc,
            info.sequence_number,
            info.timestamp,
            info.nal_type,
            info.original_type,
            info.start,
            info.end,
            pkt.wire_len()
        );

        if info.is_parameter_set() {
            self.parameter_sets.update(pkt.payload);
            self.stats.parameter_sets_absorbed += 1;
            return Disposition::Absorbed;
        }

        let mut diagnostics = Vec::new();
        if info.nal_type == NAL_TYPE_STAP_A {
            let nals = match stap_a::parse(&pkt) {
                Ok(n) => n,
                Err(e) => return self.drop_packet(e),
            };
            for nal in nals {
                self.parameter_sets.update(nal);
            }
            let packets = self.emit_unit(None, vec![pkt]);
            return Disposition::Forwarded {
                packets,
                diagnostics,
            };
        }

        let exceeds = self.fragmenter.exceeds(&pkt);
        if info.is_fragment() {
            if self.reassembler.is_collecting() || (exceeds && info.start) {
                return self.collect(pkt, info, now);
            }
            if exceeds {
                debug!(
                    "[ssrc={:08x}, seq={:04x}] dropping {}-byte FU-A continuation with no \
                     collection in progress",
                    info.ssrc,
                    info.sequence_number,
                    pkt.wire_len()
                );
                self.stats.dropped_stray_fragments += 1;
                return Disposition::Ignored;
            }
            let stap = self.parameter_sets_for(&info, &pkt, &mut diagnostics);
            let packets = self.emit_unit(stap, vec![pkt]);
            return Disposition::Forwarded {
                packets,
                diagnostics,
            };
        }

        if exceeds && info.is_single_nal() {
            return match self.fragmenter.fragment(&pkt) {
                Ok(frags) => {
                    self.stats.units_fragmented += 1;
                    self.forward_run(frags, diagnostics)
                }
                Err(e) => self.drop_packet(e),
            };
        }

        // Pass-through: small single NAL units, and aggregation/FU-B types
        // which can't be split.
        let stap = self.parameter_sets_for(&info, &pkt, &mut diagnostics);
        let packets = self.emit_unit(stap, vec![pkt]);
        Disposition::Forwarded {
            packets,
            diagnostics,
        }
    }

    /// Discards the session, returning the number of in-flight fragments dropped.
    pub fn teardown(mut self) -> usize {
        let n = self.reassembler.abandon();
        if n > 0 {
            debug!("teardown discarding {} FU-A fragments mid-collection", n);
        }
        n
    }

    fn collect(&mut self, pkt: Packet, info: NaluInfo, now: Instant) -> Disposition {
        match self.reassembler.push(pkt, info, now) {
            Pushed::Started { abandoned } => {
                self.note_interrupted(&info, abandoned);
                Disposition::Buffered
            }
            Pushed::Buffered { out_of_order } => {
                self.stats.out_of_order_fragments += u64::from(out_of_order);
                Disposition::Buffered
            }
            Pushed::NotCollecting(_) => {
                self.stats.dropped_stray_fragments += 1;
                Disposition::Ignored
            }
            Pushed::Complete(r) => {
                self.note_interrupted(&info, r.abandoned);
                self.stats.out_of_order_fragments += u64::from(r.out_of_order);
                self.stats.runs_reassembled += 1;
                let mut diagnostics = Vec::new();
                if let Some(e) = r.inconsistency {
                    self.diagnose(e, &mut diagnostics);
                }
                trace!(
                    "[ssrc={:08x}] reassembled {}-byte NAL from {} fragments",
                    info.ssrc,
                    r.packet.payload.len(),
                    r.fragments
                );
                match self.fragmenter.fragment(&r.packet) {
                    Ok(frags) => self.forward_run(frags, diagnostics),
                    Err(e) => self.drop_packet(e),
                }
            }
        }
    }

    /// Validates and queues a FU-A run produced by the fragmenter, preceded by
    /// a STAP-A if it starts an IDR.
    fn forward_run(&mut self, frags: Vec<Packet>, mut diagnostics: Vec<Error>) -> Disposition {
        let infos = match frags.iter().map(classify).collect::<Result<Vec<_>, _>>() {
            Ok(i) => i,
            Err(e) => return self.drop_packet(e),
        };
        if let Err(e) = validate_fu_a(&infos) {
            self.diagnose(e, &mut diagnostics);
        }
        let stap = match (infos.first(), frags.first()) {
            (Some(info), Some(first)) => self.parameter_sets_for(info, first, &mut diagnostics),
            _ => None,
        };
        let packets = self.emit_unit(stap, frags);
        Disposition::Forwarded {
            packets,
            diagnostics,
        }
    }

    /// Builds a STAP-A of the cached SPS and PPS if `pkt` begins an IDR unit.
    fn parameter_sets_for(
        &mut self,
        info: &NaluInfo,
        pkt: &Packet,
        diagnostics: &mut Vec<Error>,
    ) -> Option<Packet> {
        if !info.begins_unit() || !info.is_idr {
            return None;
        }
        let built = match self.parameter_sets.both() {
            Some((sps, pps)) => stap_a::build(sps, pps, &pkt.header),
            None => Err(wrap!(ErrorInt::MissingParameterSets {
                ssrc: info.ssrc,
                timestamp: info.timestamp,
                sps_len: self.parameter_sets.sps().map(Bytes::len).unwrap_or(0),
                pps_len: self.parameter_sets.pps().map(Bytes::len).unwrap_or(0),
            })),
        };
        match built {
            Ok(stap) => Some(stap),
            Err(e) => {
                self.diagnose(e, diagnostics);
                None
            }
        }
    }

    /// Stamps `stap_a` (if any) and `pkts` with consecutive sequence numbers
    /// and queues them as one unit. Returns the number queued: all or none.
    fn emit_unit(&mut self, stap_a: Option<Packet>, pkts: Vec<Packet>) -> usize {
        let has_stap_a = stap_a.is_some();
        let len = pkts.len() + usize::from(has_stap_a);
        if len == 0 {
            return 0;
        }
        if !self.make_room(len) {
            debug!(
                "outbound queue full; dropping {}-packet unit ({})",
                len, self.overflow_policy
            );
            self.stats.dropped_overflow += len as u64;
            return 0;
        }
        for mut pkt in stap_a.into_iter().chain(pkts) {
            pkt.header.sequence_number = self.sequencer.next();
            pkt.header.padding = false;
            self.pending.push_back(pkt);
        }
        self.units.push_back(QueuedUnit {
            len,
            stap_a: has_stap_a,
        });
        self.stats.forwarded += len as u64;
        self.stats.stap_a_injected += u64::from(has_stap_a);
        len
    }

    /// Ensures `len` more packets fit in the outbound queue, evicting whole
    /// units under [`OverflowPolicy::DropOldest`]. Returns false if they can't.
    fn make_room(&mut self, len: usize) -> bool {
        let max = match self.max_pending {
            None => return true,
            Some(m) => m.get(),
        };
        if self.overflow_policy == OverflowPolicy::DropNewest {
            return self.pending.len() + len <= max;
        }

        // The unpulled remainder of a partly pulled front unit stays put.
        let (idx, start) = match self.units.front() {
            Some(front) if self.front_pulled > 0 => (1, front.len - self.front_pulled),
            _ => (0, 0),
        };
        if start + len > max {
            return false;
        }
        while self.pending.len() + len > max {
            let unit = match self.units.remove(idx) {
                Some(u) => u,
                None => return false,
            };
            for old in self.pending.drain(start..start + unit.len) {
                trace!("outbound queue full; dropping seq={:04x}", old.header.sequence_number);
            }
            debug!("outbound queue full; dropping oldest {}-packet unit", unit.len);
            self.stats.dropped_overflow += unit.len as u64;
            self.stats.forwarded -= unit.len as u64;
            self.stats.stap_a_injected -= u64::from(unit.stap_a);
        }
        true
    }

    fn note_interrupted(&mut self, info: &NaluInfo, abandoned: usize) {
        if abandoned > 0 {
            warn!(
                "[ssrc={:08x}, seq={:04x}] new FU-A start abandons {} collected fragments",
                info.ssrc, info.sequence_number, abandoned
            );
            self.record_abandoned(abandoned);
        }
    }

    fn record_abandoned(&mut self, fragments: usize) {
        self.stats.collections_abandoned += 1;
        self.stats.fragments_abandoned += fragments as u64;
    }

    fn diagnose(&mut self, e: Error, diagnostics: &mut Vec<Error>) {
        match e.kind() {
            ErrorKind::MissingParameterSets => self.stats.missing_parameter_sets += 1,
            ErrorKind::InconsistentFuaSequence => self.stats.inconsistent_fua_sequences += 1,
            _ => {}
        }
        warn!("{}", e);
        diagnostics.push(e);
    }

    fn drop_packet(&mut self, e: Error) -> Disposition {
        match e.kind() {
            ErrorKind::UnrecognizedNalType => self.stats.dropped_unrecognized += 1,
            _ => self.stats.dropped_malformed += 1,
        }
        if log_enabled!(log::Level::Debug) {
            debug!("dropping packet: {}", e);
        }
        Disposition::Dropped(e)
    }
}
