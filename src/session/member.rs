//! Per-remote-SSRC member state.
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

use std::time::SystemTime;

/// Number of consecutive well-formed packets required before a member
/// leaves probation (RFC 3550 Appendix A.1, `MIN_SEQUENTIAL`).
pub const MIN_SEQUENTIAL: u16 = 2;
/// Maximum forward sequence-number jump accepted without treating it as a
/// large discontinuity (RFC 3550 Appendix A.1, `MAX_DROPOUT`).
pub const MAX_DROPOUT: u32 = 3000;
/// Maximum backward jump tolerated as reordering rather than a large jump
/// (RFC 3550 Appendix A.1, `MAX_MISORDER`).
pub const MAX_MISORDER: u32 = 100;

/// Interarrival-jitter accumulator state (RFC 3550 Section 6.4.1, A.8).
#[derive(Debug, Clone, Copy, Default)]
pub struct JitterState {
    /// Current smoothed jitter estimate, in RTP timestamp units.
    pub jitter: f64,
    /// Previous `arrival_rtp_ts - packet_rtp_ts`, for the next `D` computation.
    pub previous_transit: Option<i64>,
}

/// RTP-to-wall-clock mapping captured from the member's most recent SR.
#[derive(Debug, Clone, Copy)]
pub struct SenderReportSync {
    /// Middle 32 bits of the SR's NTP timestamp (used as LSR in our reports).
    pub ntp_middle_32: u32,
    pub rtp_timestamp: u32,
    pub arrival_wall_time: SystemTime,
}

/// Per-remote-SSRC member entry (spec.md §3 `MemberEntry`).
#[derive(Debug, Clone)]
pub struct MemberEntry {
    pub ssrc: u32,

    // Sequence-number extension / validation state.
    probation: u16,
    pub validated: bool,
    cycles: u32,
    base_seq: u32,
    max_seq: u16,
    bad_seq: Option<u32>,

    // Counters used for fraction-lost computation.
    pub packets_received: u64,
    pub bytes_received: u64,
    pub octets_interval: u64,
    expected_prior: u32,
    received_prior: u32,

    pub jitter: JitterState,
    pub last_sr: Option<SenderReportSync>,

    /// Wall time of the last RTP packet from this member.
    pub last_rtp_activity: Option<SystemTime>,
    /// Wall time of the last RTCP packet from this member.
    pub last_rtcp_activity: Option<SystemTime>,
    /// Set once a BYE has been received or sent for this member.
    pub left_session: bool,
}

impl MemberEntry {
    /// Create a new member entry on first packet from `ssrc`, with sequence
    /// extension state seeded from the first observed wire sequence number
    /// (RFC 3550 Appendix A.1, `init_seq`).
    pub fn new(ssrc: u32, first_seq: u16) -> Self {
        MemberEntry {
            ssrc,
            probation: MIN_SEQUENTIAL,
            validated: false,
            cycles: 0,
            base_seq: first_seq as u32,
            max_seq: first_seq,
            bad_seq: None,
            packets_received: 0,
            bytes_received: 0,
            octets_interval: 0,
            expected_prior: 0,
            received_prior: 0,
            jitter: JitterState::default(),
            last_sr: None,
            last_rtp_activity: None,
            last_rtcp_activity: None,
            left_session: false,
        }
    }

    /// Result of feeding one wire sequence number through the extension
    /// automaton.
    pub fn extended_highest_sequence_number(&self) -> u32 {
        (self.cycles) | self.max_seq as u32
    }

    pub fn base_sequence_number(&self) -> u32 {
        self.base_seq
    }

    pub fn probation(&self) -> u16 {
        self.probation
    }

    /// Feed one wire sequence number through the RFC 3550 Appendix A.1
    /// `update_seq` automaton. Returns `true` if the packet should be
    /// accepted (and its extended sequence number is then available via
    /// `extended_highest_sequence_number`/the returned value), `false` if
    /// it should be discarded.
    pub fn update_sequence(&mut self, seq: u16) -> Option<u32> {
        let seq32 = seq as u32;

        if self.probation > 0 {
            // Still on probation: require strict adjacency, else restart.
            if seq == self.max_seq.wrapping_add(1) {
                self.probation -= 1;
                self.max_seq = seq;
                if self.probation == 0 {
                    self.validated = true;
                    self.base_seq = seq32;
                    self.cycles = 0;
                    return Some(self.extended_highest_sequence_number());
                }
                return None;
            } else {
                self.probation = MIN_SEQUENTIAL - 1;
                self.max_seq = seq;
                return None;
            }
        }

        // Unsigned 16-bit delta, per RFC 3550 Appendix A.1's `update_seq`.
        let udelta = seq.wrapping_sub(self.max_seq) as u32;

        if udelta < MAX_DROPOUT {
            if seq < self.max_seq {
                // 16-bit counter wrapped forward past 65535.
                self.cycles = self.cycles.wrapping_add(1 << 16);
            }
            self.max_seq = seq;
            self.bad_seq = None;
            Some(self.extended_highest_sequence_number())
        } else if udelta <= 65536 - MAX_MISORDER {
            // Large jump: remember it, and only resync if the very next
            // packet confirms the new position.
            if self.bad_seq == Some(seq32) {
                // Confirmed resync: reset the member the same way probation
                // restart does elsewhere — it must re-validate before its
                // stats/jitter resume, so this packet itself is not counted
                // as a validated arrival.
                self.probation = MIN_SEQUENTIAL - 1;
                self.validated = false;
                self.max_seq = seq;
                self.base_seq = seq32;
                self.cycles = 0;
                self.bad_seq = None;
                None
            } else {
                self.bad_seq = Some((seq32 + 1) & 0xFFFF);
                None
            }
        } else {
            // Duplicate or a reordered packet within the misorder window: ignore.
            None
        }
    }

    /// Update the interarrival jitter estimate for a validated arrival
    /// (spec.md §4.2). `transit` is `arrival_rtp_ts - packet_rtp_ts`.
    pub fn update_jitter(&mut self, transit: i64) {
        if let Some(prev) = self.jitter.previous_transit {
            let d = (transit - prev) as f64;
            self.jitter.jitter += (d.abs() - self.jitter.jitter) / 16.0;
        }
        self.jitter.previous_transit = Some(transit);
    }

    /// `fraction_lost`/`cumulative_lost` per RFC 3550 Appendix A.3, updated
    /// once per RTCP reporting interval; also resets the interval counters.
    pub fn compute_and_reset_interval_stats(&mut self) -> (u8, i32) {
        let extended_max = self.extended_highest_sequence_number();
        let expected = extended_max.wrapping_sub(self.base_seq).wrapping_add(1);
        let lost = expected as i64 - self.packets_received as i64;
        let cumulative_lost = lost.clamp(-(1 << 23) + 1, (1 << 23) - 1) as i32;

        let expected_interval = expected.wrapping_sub(self.expected_prior);
        let received_interval = (self.packets_received as u32).wrapping_sub(self.received_prior);
        let lost_interval = expected_interval as i64 - received_interval as i64;

        let fraction_lost = if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval as i64).min(255) as u8
        };

        self.expected_prior = expected;
        self.received_prior = self.packets_received as u32;
        self.octets_interval = 0;

        (fraction_lost, cumulative_lost)
    }

    pub fn is_synchronized(&self) -> bool {
        self.last_sr.is_some()
    }
}
