//! Property-based tests for the invariants listed in the core's testable
//! properties: codec round-trips, monotone extended sequence numbers, the
//! jitter step bound, and circular RTX retention.
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bytes::Bytes;
use proptest::prelude::*;
use rtp_transport_core::rtx::{RtxBuffer, RtxMode};
use rtp_transport_core::session::member::MemberEntry;
use rtp_transport_core::wire::rtcp::update_jitter;
use rtp_transport_core::wire::rtp::{RtpHeader, RtpPacket};
use std::time::{Duration, SystemTime};

fn arb_header(sn: u16, ts: u32, ssrc: u32, csrc: Vec<u32>) -> RtpHeader {
    RtpHeader {
        version: 2,
        padding: false,
        extension: false,
        csrc_count: csrc.len() as u8,
        marker: false,
        payload_type: 96,
        sequence_number: sn,
        timestamp: ts,
        ssrc,
        csrc,
        extension_header: None,
    }
}

proptest! {
    /// For all codec outputs `B = encode(P)`, `decode(B) == P` for RTP.
    #[test]
    fn rtp_packet_round_trips_for_arbitrary_fields(
        sn in any::<u16>(),
        ts in any::<u32>(),
        ssrc in any::<u32>(),
        csrc in prop::collection::vec(any::<u32>(), 0..15),
        payload in prop::collection::vec(any::<u8>(), 0..64),
    ) {
        let header = arb_header(sn, ts, ssrc, csrc);
        let packet = RtpPacket::new(header.clone(), Bytes::from(payload.clone()));
        let serialized = packet.serialize();
        let parsed = RtpPacket::parse(&serialized).unwrap();

        prop_assert_eq!(parsed.header.sequence_number, header.sequence_number);
        prop_assert_eq!(parsed.header.timestamp, header.timestamp);
        prop_assert_eq!(parsed.header.ssrc, header.ssrc);
        prop_assert_eq!(parsed.header.csrc, header.csrc);
        prop_assert_eq!(parsed.payload.as_ref(), payload.as_slice());
    }

    /// The jitter estimate satisfies `|J_n - J_{n-1}| <= |g_n| / 16`.
    #[test]
    fn jitter_step_is_bounded_by_gap_over_sixteen(
        gaps in prop::collection::vec(-10_000.0f64..10_000.0, 1..64),
    ) {
        let mut jitter = 0.0f64;
        for gap in gaps {
            let next = update_jitter(jitter, gap);
            prop_assert!((next - jitter).abs() <= gap.abs() / 16.0 + 1e-9);
            jitter = next;
        }
    }

    /// Once validated, the extended sequence number is strictly monotone for
    /// any strictly-increasing-with-wraparound progression of wire SNs.
    #[test]
    fn extended_sequence_number_is_monotone_after_validation(
        start in any::<u16>(),
        steps in prop::collection::vec(1u16..500, 1..80),
    ) {
        let mut member = MemberEntry::new(1, start);
        // Two strictly-adjacent packets to clear probation.
        member.update_sequence(start.wrapping_add(1));
        let mut last_ext = member.update_sequence(start.wrapping_add(2)).unwrap();
        let mut current = start.wrapping_add(2);

        for step in steps {
            if step as u32 >= rtp_transport_core::session::member::MAX_DROPOUT {
                continue;
            }
            current = current.wrapping_add(step);
            if let Some(ext) = member.update_sequence(current) {
                prop_assert!(ext > last_ext);
                last_ext = ext;
            }
        }
    }

    /// After M inserts into a capacity-N circular RTX buffer, only the
    /// largest (most-recently-inserted) M' <= N sequence numbers remain.
    #[test]
    fn circular_rtx_buffer_retains_only_the_newest_capacity_entries(
        capacity in 1usize..32,
        insert_count in 1u32..200,
    ) {
        let mut buffer = RtxBuffer::new(RtxMode::Circular, capacity, Duration::from_secs(1));
        let now = SystemTime::now();
        for sn in 0..insert_count as u16 {
            let header = arb_header(sn, 1000, 1, vec![]);
            let packet = RtpPacket::new(header, Bytes::from_static(b"x"));
            buffer.store(&packet, now);
        }

        let expected_len = (insert_count as usize).min(capacity);
        prop_assert_eq!(buffer.len(), expected_len);

        let total = insert_count as u16;
        if (insert_count as usize) > capacity {
            let newest_start = total - capacity as u16;
            for sn in newest_start..total {
                prop_assert!(buffer.lookup(sn).is_some());
            }
        }
    }
}
