// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reassembles FU-A runs into the NAL unit they carry.

use std::time::{Duration, Instant};

use bytes::{BufMut, BytesMut};
use log::debug;

use super::{validate::validate_fu_a, NaluInfo, FU_A_PREFIX_LEN, NAL_REF_MASK};
use crate::{
    rtp::{seq_less, Packet},
    Error,
};

/// Result of [`Reassembler::push`].
#[derive(Debug)]
pub enum Pushed {
    /// A start fragment opened a new collection. `abandoned` fragments of a
    /// previous, unfinished collection were discarded.
    Started { abandoned: usize },

    /// The fragment was added to the in-flight collection.
    Buffered { out_of_order: bool },

    /// An end fragment completed the collection.
    Complete(Reassembled),

    /// Not collecting and the fragment isn't a start; it is handed back.
    NotCollecting(Packet),
}

/// A NAL unit rebuilt from a FU-A run.
#[derive(Debug)]
pub struct Reassembled {
    /// The NAL unit as a single NAL unit packet. Its header is the first
    /// fragment's, with the last fragment's marker bit.
    pub packet: Packet,

    /// Number of FU-A packets the unit arrived in.
    pub fragments: usize,

    /// True if the end fragment arrived out of sequence order.
    pub out_of_order: bool,

    /// Set if the inbound run was inconsistent. The packet is rebuilt anyway.
    pub inconsistency: Option<Error>,

    /// Fragments of an unfinished collection discarded when this run began,
    /// if that wasn't already reported by [`Pushed::Started`].
    pub abandoned: usize,
}

#[derive(Debug)]
enum State {
    Idle,
    Collecting { started: Instant },
}

/// A per-stream FU-A state machine.
///
/// At most one NAL unit is in flight. The buffer is non-empty exactly while
/// collecting and is emptied in one step on completion or abandonment.
#[derive(Debug)]
pub struct Reassembler {
    state: State,
    fragments: Vec<(NaluInfo, Packet)>,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    pub fn new() -> Self {
        Reassembler {
            state: State::Idle,
            fragments: Vec::new(),
        }
    }

    #[inline]
    pub fn is_collecting(&self) -> bool {
        matches!(self.state, State::Collecting { .. })
    }

    /// Returns the number of fragments buffered.
    #[inline]
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Feeds a FU-A fragment, classified as `info`, received at `now`.
    pub fn push(&mut self, pkt: Packet, info: NaluInfo, now: Instant) -> Pushed {
        debug_assert!(info.is_fragment());
        if info.start {
            let abandoned = self.abandon();
            self.state = State::Collecting { started: now };
            self.fragments.push((info, pkt));
            if info.end {
                return Pushed::Complete(self.finish(abandoned));
            }
            return Pushed::Started { abandoned };
        }
        if !self.is_collecting() {
            return Pushed::NotCollecting(pkt);
        }
        let out_of_order = match self.fragments.last() {
            Some((prev, _)) if !seq_less(prev.sequence_number, info.sequence_number) => {
                debug!(
                    "[ssrc={:08x}] FU-A fragment seq={:04x} arrived after seq={:04x}",
                    info.ssrc, info.sequence_number, prev.sequence_number
                );
                true
            }
            _ => false,
        };
        self.fragments.push((info, pkt));
        if info.end {
            let mut r = self.finish(0);
            r.out_of_order |= out_of_order;
            return Pushed::Complete(r);
        }
        Pushed::Buffered { out_of_order }
    }

    /// Discards any in-flight collection, returning the number of fragments dropped.
    pub fn abandon(&mut self) -> usize {
        self.state = State::Idle;
        let n = self.fragments.len();
        self.fragments.clear();
        n
    }

    /// Abandons the in-flight collection if it began more than `timeout` before `now`.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> usize {
        match self.state {
            State::Collecting { started } if now.saturating_duration_since(started) > timeout => {
                self.abandon()
            }
            _ => 0,
        }
    }

    fn finish(&mut self, abandoned: usize) -> Reassembled {
        self.state = State::Idle;
        let fragments = std::mem::take(&mut self.fragments);
        let infos: Vec<NaluInfo> = fragments.iter().map(|(i, _)| *i).collect();
        let inconsistency = validate_fu_a(&infos).err();
        let (first_info, first_pkt) = &fragments[0];
        let last_marker = fragments[fragments.len() - 1].1.header.marker;
        let len = 1 + fragments
            .iter()
            .map(|(_, p)| p.payload.len() - FU_A_PREFIX_LEN)
            .sum::<usize>();
        let mut payload = BytesMut::with_capacity(len);
        payload.put_u8((first_info.nal_header & NAL_REF_MASK) | first_info.original_type);
        for (_, p) in &fragments {
            payload.put_slice(&p.payload[FU_A_PREFIX_LEN..]);
        }
        let mut header = first_pkt.header.clone();
        header.marker = last_marker;
        Reassembled {
            packet: Packet {
                header,
                payload: payload.freeze(),
            },
            fragments: fragments.len(),
            out_of_order: false,
            inconsistency,
            abandoned,
        }
    }
}
