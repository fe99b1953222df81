//! Receiver jitter buffer and playout scheduling (spec.md §4.4), grounded on
//! the C++ ancestor's `RtpJitterBuffer`: key-ordered groups, linear-scan
//! insertion, first-packet-schedules-timer semantics.
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

use crate::wire::rtp::RtpPacket;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Configuration for the jitter buffer (spec.md §6 `buffer_latency_ms`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JitterBufferConfig {
    pub latency_ms: u32,
    /// RTP clock rate of the keys passed to `insert` (spec.md §6 `clock_rate`),
    /// used to convert timestamp-tick deltas between groups into durations.
    pub clock_rate: u32,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        JitterBufferConfig {
            latency_ms: 150,
            clock_rate: 90_000,
        }
    }
}

/// One playout group: all packets sharing a playout key (RTP timestamp, or
/// RTCP-synchronized presentation wall-time), plus its computed deadline
/// (spec.md §3 `PlayoutBufferNode`).
#[derive(Debug, Clone)]
pub struct PlayoutGroup {
    pub key: u32,
    pub deadline: SystemTime,
    pub rtcp_synchronized: bool,
    packets: Vec<RtpPacket>,
    sequence_numbers: std::collections::HashSet<u16>,
}

impl PlayoutGroup {
    fn new(key: u32, deadline: SystemTime, rtcp_synchronized: bool) -> Self {
        PlayoutGroup {
            key,
            deadline,
            rtcp_synchronized,
            packets: Vec::new(),
            sequence_numbers: std::collections::HashSet::new(),
        }
    }

    /// Insert a packet into this group. Returns `false` (duplicate) if its
    /// sequence number is already present.
    fn insert(&mut self, packet: RtpPacket) -> bool {
        if !self.sequence_numbers.insert(packet.header.sequence_number) {
            return false;
        }
        self.packets.push(packet);
        true
    }

    pub fn packets(&self) -> &[RtpPacket] {
        &self.packets
    }
}

/// Running counters exposed by the buffer (spec.md §4.4 "Release").
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayoutStats {
    pub duplicate_count: u64,
    pub late_count: u64,
    pub per_subflow_late: u64,
}

struct JitterBufferState {
    groups: VecDeque<PlayoutGroup>,
    first_key: Option<u32>,
    first_deadline: Option<SystemTime>,
    stats: PlayoutStats,
}

/// Reordering queue converting out-of-order RTP arrivals into a
/// deadline-ordered release stream (spec.md §4.4). Accessed by a network
/// thread (insert) and a timer thread (release); serialized by a single
/// lock, matching the spec's concurrency note.
pub struct JitterBuffer {
    config: JitterBufferConfig,
    state: Mutex<JitterBufferState>,
}

/// Outcome of [`JitterBuffer::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Inserted into an existing group; no new timer needed.
    JoinedExistingGroup,
    /// Created a new group at `deadline`; caller should schedule a release timer.
    NewGroupScheduled,
    Duplicate,
    Late,
}

impl JitterBuffer {
    pub fn new(config: JitterBufferConfig) -> Self {
        JitterBuffer {
            config,
            state: Mutex::new(JitterBufferState {
                groups: VecDeque::new(),
                first_key: None,
                first_deadline: None,
                stats: PlayoutStats::default(),
            }),
        }
    }

    /// Insert an arriving packet, grouped by `key` (spec.md §4.4 "Playout key").
    /// `now` is the arrival wall time.
    pub fn insert(&self, packet: RtpPacket, key: u32, rtcp_synchronized: bool, now: SystemTime) -> InsertOutcome {
        let mut state = self.state.lock().unwrap();

        if let Some(group) = state.groups.iter_mut().find(|g| g.key == key) {
            return if group.insert(packet) {
                InsertOutcome::JoinedExistingGroup
            } else {
                state.stats.duplicate_count += 1;
                InsertOutcome::Duplicate
            };
        }

        let deadline = self.compute_deadline(&mut state, key, now);

        if deadline < now {
            state.stats.late_count += 1;
            if packet.subflow.is_some() {
                state.stats.per_subflow_late += 1;
            }
            return InsertOutcome::Late;
        }

        let mut group = PlayoutGroup::new(key, deadline, rtcp_synchronized);
        group.insert(packet);
        insert_ordered(&mut state.groups, group);

        InsertOutcome::NewGroupScheduled
    }

    fn compute_deadline(&self, state: &mut JitterBufferState, key: u32, arrival: SystemTime) -> SystemTime {
        let latency = Duration::from_millis(self.config.latency_ms as u64);

        match (state.first_key, state.first_deadline) {
            (Some(first_key), Some(first_deadline)) => {
                // 32-bit wraparound-aware signed difference.
                let diff = key.wrapping_sub(first_key) as i32;
                if diff >= 0 {
                    first_deadline + Duration::from_millis(diff as u64 * 1000 / self.effective_clock_rate())
                } else {
                    first_deadline - Duration::from_millis((-diff) as u64 * 1000 / self.effective_clock_rate())
                }
            }
            _ => {
                let deadline = arrival + latency;
                state.first_key = Some(key);
                state.first_deadline = Some(deadline);
                deadline
            }
        }
    }

    fn effective_clock_rate(&self) -> u64 {
        self.config.clock_rate.max(1) as u64
    }

    /// Pop the earliest-deadline group once its deadline has passed.
    pub fn pop_ready(&self, now: SystemTime) -> Option<PlayoutGroup> {
        let mut state = self.state.lock().unwrap();
        match state.groups.front() {
            Some(group) if group.deadline <= now => state.groups.pop_front(),
            _ => None,
        }
    }

    pub fn next_deadline(&self) -> Option<SystemTime> {
        self.state.lock().unwrap().groups.front().map(|g| g.deadline)
    }

    pub fn stats(&self) -> PlayoutStats {
        self.state.lock().unwrap().stats
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        state.groups.clear();
        state.first_key = None;
        state.first_deadline = None;
    }
}

/// Insert `group` into `groups`, which stays sorted by key ascending
/// (wraparound-aware), scanning from the tail as the ancestor implementation does.
fn insert_ordered(groups: &mut VecDeque<PlayoutGroup>, group: PlayoutGroup) {
    let mut insert_at = groups.len();
    for (i, existing) in groups.iter().enumerate().rev() {
        let diff = group.key.wrapping_sub(existing.key) as i32;
        if diff >= 0 {
            insert_at = i + 1;
            break;
        }
        insert_at = i;
    }
    groups.insert(insert_at, group);
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use crate::wire::rtp::RtpHeader;

    fn packet(sn: u16, ts: u32) -> RtpPacket {
        let header = RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: 96,
            sequence_number: sn,
            timestamp: ts,
            ssrc: 1,
            csrc: vec![],
            extension_header: None,
        };
        RtpPacket::new(header, Bytes::from_static(b"x"))
    }

    #[test]
    fn first_packet_schedules_a_new_group() {
        let buffer = JitterBuffer::new(JitterBufferConfig { latency_ms: 150, clock_rate: 90_000 });
        let now = SystemTime::now();
        let outcome = buffer.insert(packet(1, 1000), 1000, false, now);
        assert_eq!(outcome, InsertOutcome::NewGroupScheduled);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn duplicate_sequence_number_in_same_group_is_rejected() {
        let buffer = JitterBuffer::new(JitterBufferConfig { latency_ms: 150, clock_rate: 90_000 });
        let now = SystemTime::now();
        buffer.insert(packet(1, 1000), 1000, false, now);
        let outcome = buffer.insert(packet(1, 1000), 1000, false, now);
        assert_eq!(outcome, InsertOutcome::Duplicate);
        assert_eq!(buffer.stats().duplicate_count, 1);
    }

    #[test]
    fn reordered_arrivals_release_in_key_order() {
        let buffer = JitterBuffer::new(JitterBufferConfig { latency_ms: 150, clock_rate: 90_000 });
        let now = SystemTime::now();
        buffer.insert(packet(1, 1000), 1000, false, now);
        buffer.insert(packet(2, 2000), 2000, false, now);
        buffer.insert(packet(4, 4000), 4000, false, now);
        buffer.insert(packet(3, 3000), 3000, false, now);

        let mut keys = Vec::new();
        let far_future = now + Duration::from_secs(10);
        while let Some(group) = buffer.pop_ready(far_future) {
            keys.push(group.key);
        }
        assert_eq!(keys, vec![1000, 2000, 3000, 4000]);
    }

    #[test]
    fn group_not_released_before_its_deadline() {
        let buffer = JitterBuffer::new(JitterBufferConfig { latency_ms: 150, clock_rate: 90_000 });
        let now = SystemTime::now();
        buffer.insert(packet(1, 1000), 1000, false, now);
        assert!(buffer.pop_ready(now).is_none());
        assert!(buffer.pop_ready(now + Duration::from_millis(200)).is_some());
    }
}
