// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! H.264 RTP healer.
//!
//! Takes an inbound H.264 RTP stream as produced by cameras and RTSP servers
//! and re-packetizes it ([RFC 6184](https://datatracker.ietf.org/doc/html/rfc6184))
//! so it can be forwarded to a picky consumer such as a WebRTC peer:
//!
//! *   SPS/PPS packets are absorbed into a per-stream cache and re-sent as a
//!     STAP-A immediately before each IDR.
//! *   Oversized NAL units are split into FU-A fragments that fit the
//!     configured maximum packet size.
//! *   Inbound FU-A runs are reassembled, then re-fragmented under that limit.
//! *   Outbound sequence numbers are rewritten so the stream is contiguous.
//!
//! Start with [`StreamSession`] for synchronous use or [`forward::channel`]
//! to hand packets to a tokio sender task.

#![forbid(clippy::print_stderr, clippy::print_stdout)]

/// Wraps the supplied `ErrorInt` and returns it as an `Err`.
macro_rules! bail {
    ($e:expr) => {
        return Err(crate::error::Error(std::sync::Arc::new($e)))
    };
}

macro_rules! wrap {
    ($e:expr) => {
        crate::error::Error(std::sync::Arc::new($e))
    };
}

mod error;

pub mod codec;
pub mod forward;
pub mod rtp;
mod session;

#[cfg(test)]
mod testutil;

pub use error::{Error, ErrorKind};
pub use session::{
    Disposition, Options, OverflowPolicy, Sequencer, SessionStats, StreamSession,
    MAX_MAX_PACKET_SIZE, MIN_MAX_PACKET_SIZE,
};

use error::ErrorInt;
