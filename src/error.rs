// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt::Display, sync::Arc};

use thiserror::Error;

/// An opaque `std::error::Error + Send + Sync + 'static` implementation.
///
/// Currently the focus is on providing detailed human-readable error messages.
/// Packet-level errors include the SSRC and sequence number (or RTP timestamp)
/// so the offending packet can be found in Wireshark.
///
/// Use [`Error::kind`] to inspect the error programmatically.
#[derive(Clone)]
pub struct Error(pub(crate) Arc<ErrorInt>);

impl Error {
    /// Returns the broad category of this error.
    pub fn kind(&self) -> ErrorKind {
        match *self.0 {
            ErrorInt::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ErrorInt::MalformedPacket { .. } => ErrorKind::MalformedPacket,
            ErrorInt::UnrecognizedNalType { .. } => ErrorKind::UnrecognizedNalType,
            ErrorInt::MissingParameterSets { .. } => ErrorKind::MissingParameterSets,
            ErrorInt::InconsistentFuaSequence { .. } => ErrorKind::InconsistentFuaSequence,
            ErrorInt::SinkError(_) => ErrorKind::Sink,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {}

/// The category of an [`Error`].
///
/// None of the packet-level kinds are fatal to a stream: the packet is dropped
/// (`MalformedPacket`, `UnrecognizedNalType`) or forwarded anyway
/// (`MissingParameterSets`, `InconsistentFuaSequence`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The caller supplied a bad argument, such as an unusable `max_packet_size`.
    InvalidArgument,

    /// The payload is too short for its declared NAL type, or the RTP framing is corrupt.
    MalformedPacket,

    /// The NAL type is reserved (0, 30, 31); the packet is discarded.
    UnrecognizedNalType,

    /// A STAP-A couldn't be built because SPS and/or PPS aren't known yet.
    MissingParameterSets,

    /// An outbound FU-A run failed its consistency check.
    InconsistentFuaSequence,

    /// The outbound sink failed.
    Sink,
}

#[derive(Debug, Error)]
pub(crate) enum ErrorInt {
    /// The method's caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("[ssrc={ssrc:08x}, seq={sequence_number:04x}] malformed packet: {description}")]
    MalformedPacket {
        ssrc: u32,
        sequence_number: u16,
        description: String,
    },

    #[error("[ssrc={ssrc:08x}, seq={sequence_number:04x}] unrecognized NAL type {nal_type}")]
    UnrecognizedNalType {
        ssrc: u32,
        sequence_number: u16,
        nal_type: u8,
    },

    #[error(
        "[ssrc={ssrc:08x}, ts={timestamp}] can't build STAP-A: sps is {sps_len} bytes, \
         pps is {pps_len} bytes"
    )]
    MissingParameterSets {
        ssrc: u32,
        timestamp: u32,
        sps_len: usize,
        pps_len: usize,
    },

    #[error("[ssrc={ssrc:08x}, ts={timestamp}] inconsistent FU-A sequence: {description}")]
    InconsistentFuaSequence {
        ssrc: u32,
        timestamp: u32,
        description: String,
    },

    #[error("Error sending packet: {0}")]
    SinkError(#[source] Box<dyn std::error::Error + Send + Sync>),
}
