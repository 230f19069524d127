// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Codec-specific logic.
//!
//! Currently this is only H.264 repacketization: classifying, fragmenting,
//! reassembling, and aggregating NAL units as carried by
//! [RFC 6184](https://datatracker.ietf.org/doc/html/rfc6184). Nothing here
//! looks inside a NAL unit beyond its header byte.

pub mod h264;
