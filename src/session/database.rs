//! Remote member database (spec.md §4.2), grounded on the C++ ancestor's
//! `SessionDatabase`: per-SSRC member tracking, sequence validation,
//! jitter, RTP-to-wall-clock synchronization, collision handling, and
//! interval membership bookkeeping.
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

use crate::session::member::MemberEntry;
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A member is presumed gone after this many silent RTCP intervals
/// (spec.md §4.2 "member timeout").
const TIMEOUT_INTERVALS: u32 = 5;
/// A member counts as an active sender if RTP was heard within this many
/// RTCP intervals (spec.md §4.2).
const SENDER_INTERVALS: u32 = 2;

/// Outcome of running an inbound RTP packet through the validation automaton.
#[derive(Debug, Clone, Copy)]
pub struct RtpAdmission {
    pub accepted: bool,
    pub extended_sequence_number: Option<u32>,
    /// Presentation wall time, once an SR-based mapping exists for this member.
    pub presentation_time: Option<SystemTime>,
    pub synchronized: bool,
}

/// Report-ready snapshot of one member, produced once per RTCP interval.
#[derive(Debug, Clone, Copy)]
pub struct MemberReportSnapshot {
    pub ssrc: u32,
    pub fraction_lost: u8,
    pub cumulative_lost: i32,
    pub extended_highest_sequence_number: u32,
    pub interarrival_jitter: u32,
    pub last_sr_middle_32: u32,
    pub delay_since_last_sr: u32,
}

/// The three member pools a transmission-timer pass needs (spec.md §4.3).
pub struct RtcpReportData {
    pub we_sent: bool,
    pub senders: Vec<u32>,
    pub receivers: Vec<u32>,
}

pub struct MemberDatabase {
    members: HashMap<u32, MemberEntry>,
    clock_rate: u32,
}

impl MemberDatabase {
    pub fn new(clock_rate: u32) -> Self {
        MemberDatabase {
            members: HashMap::new(),
            clock_rate,
        }
    }

    pub fn get(&self, ssrc: u32) -> Option<&MemberEntry> {
        self.members.get(&ssrc)
    }

    pub fn contains(&self, ssrc: u32) -> bool {
        self.members.contains_key(&ssrc)
    }

    pub fn total_member_count(&self) -> usize {
        self.members.len()
    }

    pub fn validated_member_count(&self) -> usize {
        self.members.values().filter(|m| m.validated).count()
    }

    pub fn unvalidated_member_count(&self) -> usize {
        self.members.len() - self.validated_member_count()
    }

    pub fn sender_count(&self, now: SystemTime, rtcp_interval: Duration) -> usize {
        self.members
            .values()
            .filter(|m| is_recent_sender(m, now, rtcp_interval))
            .count()
    }

    /// Process one inbound RTP packet: creates the member on first sight,
    /// runs sequence validation, and updates jitter for validated arrivals.
    pub fn process_incoming_rtp(
        &mut self,
        ssrc: u32,
        sequence_number: u16,
        rtp_timestamp: u32,
        payload_bytes: usize,
        arrival_wall: SystemTime,
    ) -> RtpAdmission {
        let member = self
            .members
            .entry(ssrc)
            .or_insert_with(|| MemberEntry::new(ssrc, sequence_number));

        member.last_rtp_activity = Some(arrival_wall);

        let extended = member.update_sequence(sequence_number);
        if extended.is_none() {
            return RtpAdmission {
                accepted: false,
                extended_sequence_number: None,
                presentation_time: None,
                synchronized: member.is_synchronized(),
            };
        }

        member.packets_received += 1;
        member.bytes_received += payload_bytes as u64;
        member.octets_interval += payload_bytes as u64;

        if member.validated {
            let arrival_rtp_ts = wall_to_rtp_units(arrival_wall, self.clock_rate);
            let transit = arrival_rtp_ts as i64 - rtp_timestamp as i64;
            member.update_jitter(transit);
        }

        let presentation_time = member
            .last_sr
            .map(|sr| presentation_time_from_sr(&sr, rtp_timestamp, self.clock_rate));

        RtpAdmission {
            accepted: true,
            extended_sequence_number: extended,
            presentation_time,
            synchronized: member.is_synchronized(),
        }
    }

    /// Record an incoming SR so future RTP arrivals from this member can be
    /// mapped to a presentation wall time (spec.md §4.2).
    pub fn process_incoming_sr(
        &mut self,
        ssrc: u32,
        ntp_timestamp: u64,
        rtp_timestamp: u32,
        arrival_wall: SystemTime,
    ) {
        let member = self
            .members
            .entry(ssrc)
            .or_insert_with(|| MemberEntry::new(ssrc, rtp_timestamp as u16));
        member.last_rtcp_activity = Some(arrival_wall);
        member.last_sr = Some(crate::session::member::SenderReportSync {
            ntp_middle_32: ((ntp_timestamp >> 16) & 0xFFFF_FFFF) as u32,
            rtp_timestamp,
            arrival_wall_time: arrival_wall,
        });
    }

    pub fn note_rtcp_activity(&mut self, ssrc: u32, now: SystemTime) {
        if let Some(member) = self.members.get_mut(&ssrc) {
            member.last_rtcp_activity = Some(now);
        }
    }

    pub fn mark_left(&mut self, ssrc: u32) {
        if let Some(member) = self.members.get_mut(&ssrc) {
            member.left_session = true;
        }
    }

    pub fn remove(&mut self, ssrc: u32) -> Option<MemberEntry> {
        self.members.remove(&ssrc)
    }

    /// Scan the member database once per RTCP interval: evict members silent
    /// for `TIMEOUT_INTERVALS` intervals. Returns the evicted SSRCs.
    pub fn check_member_timeouts(&mut self, now: SystemTime, rtcp_interval: Duration) -> Vec<u32> {
        let timeout = rtcp_interval * TIMEOUT_INTERVALS;
        let expired: Vec<u32> = self
            .members
            .iter()
            .filter_map(|(&ssrc, member)| {
                let last_activity = latest(member.last_rtp_activity, member.last_rtcp_activity);
                match last_activity {
                    Some(t) if now.duration_since(t).unwrap_or_default() >= timeout => Some(ssrc),
                    None => None,
                    _ => None,
                }
            })
            .collect();
        for ssrc in &expired {
            self.members.remove(ssrc);
        }
        expired
    }

    /// Gather each validated member's fraction/cumulative loss for the
    /// outgoing RTCP report, resetting interval counters (spec.md §3
    /// "expected-prior and received-prior counters").
    pub fn gather_report_snapshots(&mut self) -> Vec<MemberReportSnapshot> {
        self.members
            .values_mut()
            .filter(|m| m.validated)
            .map(|member| {
                let (fraction_lost, cumulative_lost) = member.compute_and_reset_interval_stats();
                let delay_since_last_sr = member
                    .last_sr
                    .map(|sr| dlsr_units(sr.arrival_wall_time))
                    .unwrap_or(0);
                MemberReportSnapshot {
                    ssrc: member.ssrc,
                    fraction_lost,
                    cumulative_lost,
                    extended_highest_sequence_number: member.extended_highest_sequence_number(),
                    interarrival_jitter: member.jitter.jitter.abs() as u32,
                    last_sr_middle_32: member.last_sr.map(|sr| sr.ntp_middle_32).unwrap_or(0),
                    delay_since_last_sr,
                }
            })
            .collect()
    }

    /// Split the member set into senders and receivers for the
    /// transmission-timer algorithm (spec.md §4.3).
    pub fn gather_report_data(&self, we_sent: bool, now: SystemTime, rtcp_interval: Duration) -> RtcpReportData {
        let mut senders = Vec::new();
        let mut receivers = Vec::new();
        for (&ssrc, member) in &self.members {
            if is_recent_sender(member, now, rtcp_interval) {
                senders.push(ssrc);
            } else {
                receivers.push(ssrc);
            }
        }
        RtcpReportData {
            we_sent,
            senders,
            receivers,
        }
    }

    /// True if `ssrc` belongs to a foreign endpoint colliding with our own
    /// local SSRC (spec.md §4.2 "collision handling") — i.e. a packet
    /// carrying our SSRC arrived but we have a pre-existing remote entry
    /// for it from a different source address. The address comparison
    /// itself is the transport's job; this just reports whether the
    /// member already looks foreign.
    pub fn looks_foreign(&self, ssrc: u32) -> bool {
        self.members.contains_key(&ssrc)
    }
}

fn is_recent_sender(member: &MemberEntry, now: SystemTime, rtcp_interval: Duration) -> bool {
    match member.last_rtp_activity {
        Some(t) => now.duration_since(t).unwrap_or_default() < rtcp_interval * SENDER_INTERVALS,
        None => false,
    }
}

fn latest(a: Option<SystemTime>, b: Option<SystemTime>) -> Option<SystemTime> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Convert a wall-clock instant into RTP timestamp units at `clock_rate`,
/// for jitter and SR-sync computations. Only differences between two calls
/// are meaningful; the absolute value has no defined epoch.
pub fn wall_to_rtp_units(time: SystemTime, clock_rate: u32) -> u32 {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    (since_epoch.as_secs_f64() * clock_rate as f64) as u32
}

fn presentation_time_from_sr(
    sr: &crate::session::member::SenderReportSync,
    packet_rtp_ts: u32,
    clock_rate: u32,
) -> SystemTime {
    // Signed 32-bit subtraction so that RTP timestamp wraparound is handled.
    let diff = packet_rtp_ts.wrapping_sub(sr.rtp_timestamp) as i32;
    let offset_secs = diff as f64 / clock_rate as f64;
    if offset_secs >= 0.0 {
        sr.arrival_wall_time + Duration::from_secs_f64(offset_secs)
    } else {
        sr.arrival_wall_time - Duration::from_secs_f64(-offset_secs)
    }
}

fn dlsr_units(last_sr_arrival: SystemTime) -> u32 {
    let now = SystemTime::now();
    let elapsed = now.duration_since(last_sr_arrival).unwrap_or_default();
    // Units of 1/65536 second, per RFC 3550 Section 6.4.1.
    (elapsed.as_secs_f64() * 65536.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_packet_creates_member_on_probation() {
        let mut db = MemberDatabase::new(90000);
        let now = SystemTime::now();
        let admission = db.process_incoming_rtp(1, 1000, 90000, 100, now);
        assert!(!admission.accepted); // still on probation
        assert!(db.contains(1));
        assert_eq!(db.unvalidated_member_count(), 1);
    }

    #[test]
    fn member_validates_after_probation_packets() {
        let mut db = MemberDatabase::new(90000);
        let now = SystemTime::now();
        db.process_incoming_rtp(1, 1000, 90000, 100, now);
        db.process_incoming_rtp(1, 1001, 93600, 100, now);
        let admission = db.process_incoming_rtp(1, 1002, 97200, 100, now);
        assert!(admission.accepted);
        assert_eq!(db.validated_member_count(), 1);
    }

    #[test]
    fn no_loss_sequence_yields_zero_fraction_lost() {
        let mut db = MemberDatabase::new(90000);
        let now = SystemTime::now();
        for (i, seq) in (1000u16..1010).enumerate() {
            db.process_incoming_rtp(1, seq, 90000 + (i as u32) * 3600, 100, now);
        }
        let snapshots = db.gather_report_snapshots();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].cumulative_lost, 0);
        assert_eq!(snapshots[0].fraction_lost, 0);
    }

    #[test]
    fn stale_member_is_evicted_after_five_intervals() {
        let mut db = MemberDatabase::new(90000);
        let interval = Duration::from_secs(5);
        let t0 = SystemTime::now();
        db.process_incoming_rtp(1, 1000, 90000, 100, t0);
        let much_later = t0 + interval * 6;
        let evicted = db.check_member_timeouts(much_later, interval);
        assert_eq!(evicted, vec![1]);
        assert!(!db.contains(1));
    }

    #[test]
    fn looks_foreign_detects_pre_existing_remote_entry() {
        let mut db = MemberDatabase::new(90000);
        let now = SystemTime::now();
        assert!(!db.looks_foreign(0xAAAA_AAAA));
        db.process_incoming_rtp(0xAAAA_AAAA, 1, 0, 10, now);
        assert!(db.looks_foreign(0xAAAA_AAAA));
    }
}
