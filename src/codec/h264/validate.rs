// Copyright (C) 2021 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::NaluInfo;
use crate::{Error, ErrorInt};

/// Checks that `run` describes exactly one fragmented NAL unit: one SSRC, one
/// timestamp, one NAL type, one start bit, and one end bit.
///
/// The result is diagnostic only; callers forward the run either way.
pub fn validate_fu_a(run: &[NaluInfo]) -> Result<(), Error> {
    let first = match run.first() {
        Some(f) => f,
        None => bail!(ErrorInt::InconsistentFuaSequence {
            ssrc: 0,
            timestamp: 0,
            description: "empty run".to_owned(),
        }),
    };
    let fail = |description: String| {
        Err(wrap!(ErrorInt::InconsistentFuaSequence {
            ssrc: first.ssrc,
            timestamp: first.timestamp,
            description,
        }))
    };
    let mut starts = 0;
    let mut ends = 0;
    for i in run {
        if i.nal_type != first.nal_type || i.original_type != first.original_type {
            return fail(format!(
                "seq={:04x} has type {}/{}, expected {}/{}",
                i.sequence_number, i.nal_type, i.original_type, first.nal_type, first.original_type
            ));
        }
        if i.ssrc != first.ssrc {
            return fail(format!("seq={:04x} has ssrc={:08x}", i.sequence_number, i.ssrc));
        }
        if i.timestamp != first.timestamp {
            return fail(format!("seq={:04x} has ts={}", i.sequence_number, i.timestamp));
        }
        starts += usize::from(i.start);
        ends += usize::from(i.end);
    }
    if starts != 1 || ends != 1 {
        return fail(format!(
            "{} packets with {starts} start bits and {ends} end bits",
            run.len()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h264::classify;
    use crate::testutil::packet;
    use crate::ErrorKind;

    fn infos(pkts: &[(u16, &[u8])]) -> Vec<NaluInfo> {
        pkts.iter()
            .map(|&(seq, payload)| classify(&packet(seq, 90, false, payload)).unwrap())
            .collect()
    }

    #[test]
    fn consistent() {
        validate_fu_a(&infos(&[(1, b"\x7c\x85a"), (2, b"\x7c\x05b"), (3, b"\x7c\x45c")])).unwrap();
        validate_fu_a(&infos(&[(1, b"\x7c\xc5a")])).unwrap();
    }

    #[test]
    fn inconsistent() {
        let cases: Vec<Vec<NaluInfo>> = vec![
            vec![],
            infos(&[(1, b"\x7c\x85a"), (2, b"\x7c\x85b"), (3, b"\x7c\x45c")]), // two starts
            infos(&[(1, b"\x7c\x85a"), (2, b"\x7c\x05b")]),                     // no end
            infos(&[(1, b"\x7c\x85a"), (2, b"\x7c\x41b")]),                     // type changes
            {
                let mut v = infos(&[(1, b"\x7c\x85a"), (2, b"\x7c\x45b")]);
                v[1].ssrc ^= 1;
                v
            },
            {
                let mut v = infos(&[(1, b"\x7c\x85a"), (2, b"\x7c\x45b")]);
                v[1].timestamp += 3000;
                v
            },
        ];
        for run in cases {
            let e = validate_fu_a(&run).unwrap_err();
            assert_eq!(e.kind(), ErrorKind::InconsistentFuaSequence, "{run:?}");
        }
    }
}
