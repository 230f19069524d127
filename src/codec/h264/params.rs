// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Most recently seen SPS and PPS of a stream.

use base64::Engine as _;
use bytes::Bytes;
use pretty_hex::PrettyHex;

use super::{NAL_TYPE_MASK, NAL_TYPE_PPS, NAL_TYPE_SPS};
use crate::{Error, ErrorInt};

/// Holds the latest sequence and picture parameter sets, each as a full NAL
/// unit including its header byte.
///
/// Updated whenever an SPS or PPS passes through the stream (or is supplied
/// out-of-band); never cleared.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ParameterSetCache {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

impl std::fmt::Debug for ParameterSetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let empty = Bytes::new();
        f.debug_struct("ParameterSetCache")
            .field("sps", &self.sps.as_ref().unwrap_or(&empty).hex_dump())
            .field("pps", &self.pps.as_ref().unwrap_or(&empty).hex_dump())
            .finish()
    }
}

impl ParameterSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn sps(&self) -> Option<&Bytes> {
        self.sps.as_ref()
    }

    #[inline]
    pub fn pps(&self) -> Option<&Bytes> {
        self.pps.as_ref()
    }

    pub fn set_sps(&mut self, sps: Bytes) {
        self.sps = Some(sps);
    }

    pub fn set_pps(&mut self, pps: Bytes) {
        self.pps = Some(pps);
    }

    /// Stores `nal` if its header says it's an SPS or PPS. Returns true if stored.
    pub fn update(&mut self, nal: Bytes) -> bool {
        match nal.first().map(|h| h & NAL_TYPE_MASK) {
            Some(NAL_TYPE_SPS) => self.set_sps(nal),
            Some(NAL_TYPE_PPS) => self.set_pps(nal),
            _ => return false,
        }
        true
    }

    /// Returns `(sps, pps)` if both are known and non-empty.
    pub fn both(&self) -> Option<(&Bytes, &Bytes)> {
        match (&self.sps, &self.pps) {
            (Some(sps), Some(pps)) if !sps.is_empty() && !pps.is_empty() => Some((sps, pps)),
            _ => None,
        }
    }

    /// Parses the `sprop-parameter-sets` from the `format-specific-params` of
    /// a SDP `fmtp` media attribute, eg
    /// `packetization-mode=1;profile-level-id=64001E;sprop-parameter-sets=Z2QAHqw0yAeAIn5cBagICAoAAAMAAgAAAwB5HixcsA==,aO48sA==`.
    pub fn parse_format_specific_params(format_specific_params: &str) -> Result<Self, Error> {
        let sprop_parameter_sets = format_specific_params
            .split(';')
            .filter_map(|p| p.trim().split_once('='))
            .find_map(|(key, value)| (key == "sprop-parameter-sets").then_some(value))
            .ok_or_else(|| {
                wrap!(ErrorInt::InvalidArgument(
                    "no sprop-parameter-sets in H.264 format-specific-params".to_owned()
                ))
            })?;

        let mut cache = ParameterSetCache::new();
        for encoded in sprop_parameter_sets.split(',') {
            let nal = base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|e| {
                    wrap!(ErrorInt::InvalidArgument(format!(
                        "parameter set {encoded:?} has invalid base64 encoding: {e}"
                    )))
                })?;

            // GW security GW4089IP leaves Annex B start codes at the end of both
            // SPS and PPS in the sprop-parameter-sets. Strip them out.
            let nal = nal.strip_suffix(b"\x00\x00\x00\x01").unwrap_or(&nal);
            let nal_type = match nal.first() {
                Some(h) => h & NAL_TYPE_MASK,
                None => bail!(ErrorInt::InvalidArgument(
                    "empty NAL in sprop-parameter-sets".to_owned()
                )),
            };
            let slot = match nal_type {
                NAL_TYPE_SPS => &mut cache.sps,
                NAL_TYPE_PPS => &mut cache.pps,
                _ => bail!(ErrorInt::InvalidArgument(format!(
                    "only SPS and PPS expected in parameter sets, got NAL type {nal_type}"
                ))),
            };
            if slot.is_some() {
                bail!(ErrorInt::InvalidArgument(format!(
                    "multiple NALs of type {nal_type} in sprop-parameter-sets"
                )));
            }
            *slot = Some(Bytes::copy_from_slice(nal));
        }
        if cache.both().is_none() {
            bail!(ErrorInt::InvalidArgument(
                "sprop-parameter-sets must contain both SPS and PPS".to_owned()
            ));
        }
        Ok(cache)
    }

    /// Renders the cached sets as `sprop-parameter-sets=<sps>,<pps>`.
    pub fn sprop_parameter_sets(&self) -> Option<String> {
        let (sps, pps) = self.both()?;
        let engine = &base64::engine::general_purpose::STANDARD;
        Some(format!(
            "sprop-parameter-sets={},{}",
            engine.encode(sps),
            engine.encode(pps)
        ))
    }

    /// Renders a SDP `a=fmtp` line for `payload_type` describing this stream
    /// as it leaves the healer (always packetization mode 1).
    pub fn fmtp(&self, payload_type: u8) -> Option<String> {
        let sprop = self.sprop_parameter_sets()?;
        let (sps, _) = self.both()?;
        let profile_level_id = match sps.get(1..4) {
            Some(p) => format!(";profile-level-id={:02X}{:02X}{:02X}", p[0], p[1], p[2]),
            None => String::new(),
        };
        Some(format!(
            "a=fmtp:{payload_type} packetization-mode=1{profile_level_id};{sprop}"
        ))
    }
}
