//! RTX buffer and retransmission packetization (spec.md §4.5, §3 `RtxRecord`).
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

use crate::error::{TransportError, TransportResult};
use crate::wire::rtp::{RtpHeader, RtpPacket};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, SystemTime};

/// Retention policy for stored outbound packets (spec.md §3/§4.5), grounded
/// on `TxBufferManagementMode` (`CIRCULAR_MODE` / `NACK_TIMED_MODE` / `ACK_MODE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RtxMode {
    /// Fixed capacity; oldest sequence number evicted on overflow.
    Circular,
    /// Retained for a fixed duration, then evicted by timer.
    NackTimed,
    /// Retained until ACKed, with a hard upper bound as a backstop.
    Ack,
}

impl Default for RtxMode {
    fn default() -> Self {
        RtxMode::NackTimed
    }
}

/// Default capacity for `Circular` mode (spec.md §4.5).
pub const DEFAULT_CIRCULAR_CAPACITY: usize = 64;
/// Hard upper bound for `Ack` mode so that lost ACKs cannot grow the buffer unbounded.
pub const ACK_MODE_HARD_CAP: usize = 256;

/// One pending retransmission candidate (spec.md §3 `RtxRecord`).
#[derive(Debug, Clone)]
pub struct RtxRecord {
    pub original_sequence_number: u16,
    pub original_payload: Bytes,
    pub original_header: RtpHeader,
    pub stored_at: SystemTime,
    pub last_nack_time: Option<SystemTime>,
    pub ack_time: Option<SystemTime>,
    pub retransmitted_arrival: Option<SystemTime>,
}

/// Outbound-packet store plus recent-arrivals ring, keyed by original
/// sequence number. Grounded on the C++ ancestor's `TransmissionManager`.
pub struct RtxBuffer {
    mode: RtxMode,
    capacity: usize,
    retention: Duration,
    records: HashMap<u16, RtxRecord>,
    /// Insertion order, used by `Circular` eviction and to bound scans.
    order: VecDeque<u16>,
    /// Ring of recently-seen inbound sequence numbers, for duplicate/late
    /// detection ahead of the loss predictor.
    pub recent_arrivals: VecDeque<u32>,
    recent_arrivals_capacity: usize,
}

impl RtxBuffer {
    pub fn new(mode: RtxMode, capacity: usize, retention: Duration) -> Self {
        RtxBuffer {
            mode,
            capacity: match mode {
                RtxMode::Circular => capacity.max(1),
                RtxMode::Ack => ACK_MODE_HARD_CAP,
                RtxMode::NackTimed => capacity.max(1),
            },
            retention,
            records: HashMap::new(),
            order: VecDeque::new(),
            recent_arrivals: VecDeque::new(),
            recent_arrivals_capacity: 128,
        }
    }

    pub fn mode(&self) -> RtxMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Store an outbound packet so it can be retransmitted later. Applies
    /// the retention policy's admission/eviction rule immediately.
    pub fn store(&mut self, packet: &RtpPacket, now: SystemTime) {
        let sn = packet.header.sequence_number;
        self.records.insert(
            sn,
            RtxRecord {
                original_sequence_number: sn,
                original_payload: packet.payload.clone(),
                original_header: packet.header.clone(),
                stored_at: now,
                last_nack_time: None,
                ack_time: None,
                retransmitted_arrival: None,
            },
        );
        self.order.push_back(sn);

        if self.mode == RtxMode::Circular {
            while self.order.len() > self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.records.remove(&oldest);
                }
            }
        } else if self.order.len() > self.capacity {
            // NackTimed/Ack backstop: never grow unbounded even without timers firing.
            if let Some(oldest) = self.order.pop_front() {
                self.records.remove(&oldest);
            }
        }
    }

    pub fn lookup(&self, sequence_number: u16) -> Option<&RtxRecord> {
        self.records.get(&sequence_number)
    }

    pub fn mark_nacked(&mut self, sequence_number: u16, now: SystemTime) {
        if let Some(record) = self.records.get_mut(&sequence_number) {
            record.last_nack_time = Some(now);
        }
    }

    /// `Ack` mode: evict on matching ACK.
    pub fn mark_acked(&mut self, sequence_number: u16, now: SystemTime) {
        if self.mode != RtxMode::Ack {
            return;
        }
        if let Some(record) = self.records.get_mut(&sequence_number) {
            record.ack_time = Some(now);
        }
        self.records.remove(&sequence_number);
        self.order.retain(|&sn| sn != sequence_number);
    }

    /// `NackTimed` mode: evict anything whose retention deadline has passed.
    pub fn evict_expired(&mut self, now: SystemTime) {
        if self.mode != RtxMode::NackTimed {
            return;
        }
        let retention = self.retention;
        let expired: Vec<u16> = self
            .records
            .iter()
            .filter(|(_, r)| now.duration_since(r.stored_at).unwrap_or_default() >= retention)
            .map(|(&sn, _)| sn)
            .collect();
        for sn in expired {
            self.records.remove(&sn);
            self.order.retain(|&s| s != sn);
        }
    }

    pub fn note_arrival(&mut self, extended_sequence_number: u32) {
        self.recent_arrivals.push_back(extended_sequence_number);
        while self.recent_arrivals.len() > self.recent_arrivals_capacity {
            self.recent_arrivals.pop_front();
        }
    }

    pub fn last_n_received(&self, n: usize) -> Vec<u32> {
        self.recent_arrivals
            .iter()
            .rev()
            .take(n)
            .copied()
            .collect()
    }

    /// Build an RTX packet for `sequence_number`: the original RTP packet
    /// (header + payload) wrapped as the payload of a new packet on the
    /// retransmission SSRC/sequence counter (spec.md §4.5, RFC 4588-style).
    pub fn generate_retransmission_packet(
        &mut self,
        sequence_number: u16,
        rtx_ssrc: u32,
        rtx_sequence_number: u16,
        rtx_payload_type: u8,
        now: SystemTime,
    ) -> TransportResult<RtpPacket> {
        let record = self
            .records
            .get_mut(&sequence_number)
            .ok_or(TransportError::RtxLookupMiss { sequence_number })?;
        record.last_nack_time = Some(now);

        let mut inner = BytesMut::with_capacity(2 + record.original_payload.len());
        inner.put_u16(record.original_sequence_number);
        inner.put_slice(&record.original_payload);

        let header = RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: record_marker(record),
            payload_type: rtx_payload_type,
            sequence_number: rtx_sequence_number,
            timestamp: record.original_header.timestamp,
            ssrc: rtx_ssrc,
            csrc: Vec::new(),
            extension_header: None,
        };

        Ok(RtpPacket::new(header, inner.freeze()))
    }

    /// Receiver side of RFC 4588-style RTX: peel the outer header, recover
    /// the original sequence number from the first two payload bytes, and
    /// return the inner packet ready for resubmission to the session.
    pub fn extract_original_packet(rtx_packet: &RtpPacket) -> TransportResult<(u16, Bytes)> {
        if rtx_packet.payload.len() < 2 {
            return Err(TransportError::MalformedDatagram(
                "RTX payload too short to carry original sequence number".to_string(),
            ));
        }
        let original_sn = u16::from_be_bytes([rtx_packet.payload[0], rtx_packet.payload[1]]);
        let original_payload = rtx_packet.payload.slice(2..);
        Ok((original_sn, original_payload))
    }
}

fn record_marker(record: &RtxRecord) -> bool {
    record.original_header.marker
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn sample_packet(sn: u16) -> RtpPacket {
        let header = RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: 96,
            sequence_number: sn,
            timestamp: 1000,
            ssrc: 1,
            csrc: vec![],
            extension_header: None,
        };
        RtpPacket::new(header, Bytes::from_static(b"hello"))
    }

    #[test]
    fn circular_buffer_retains_only_newest_capacity_entries() {
        let mut buffer = RtxBuffer::new(RtxMode::Circular, 4, Duration::from_millis(200));
        let now = SystemTime::now();
        for sn in 0..10u16 {
            buffer.store(&sample_packet(sn), now);
        }
        assert_eq!(buffer.len(), 4);
        for sn in 6..10u16 {
            assert!(buffer.lookup(sn).is_some());
        }
        for sn in 0..6u16 {
            assert!(buffer.lookup(sn).is_none());
        }
    }

    #[test]
    fn ack_mode_evicts_on_ack() {
        let mut buffer = RtxBuffer::new(RtxMode::Ack, 64, Duration::from_millis(200));
        let now = SystemTime::now();
        buffer.store(&sample_packet(1), now);
        assert!(buffer.lookup(1).is_some());
        buffer.mark_acked(1, now);
        assert!(buffer.lookup(1).is_none());
    }

    #[test]
    fn nack_timed_mode_evicts_after_retention_elapses() {
        let mut buffer = RtxBuffer::new(RtxMode::NackTimed, 64, Duration::from_millis(100));
        let now = SystemTime::now();
        buffer.store(&sample_packet(1), now);
        buffer.evict_expired(now + Duration::from_millis(50));
        assert!(buffer.lookup(1).is_some());
        buffer.evict_expired(now + Duration::from_millis(150));
        assert!(buffer.lookup(1).is_none());
    }

    #[test]
    fn rtx_packet_round_trips_through_extraction() {
        let mut buffer = RtxBuffer::new(RtxMode::Circular, 8, Duration::from_millis(200));
        let now = SystemTime::now();
        buffer.store(&sample_packet(42), now);
        let rtx_packet = buffer
            .generate_retransmission_packet(42, 0xAAAA, 7, 97, now)
            .unwrap();
        assert_eq!(rtx_packet.header.ssrc, 0xAAAA);
        assert_eq!(rtx_packet.header.sequence_number, 7);

        let (original_sn, original_payload) = RtxBuffer::extract_original_packet(&rtx_packet).unwrap();
        assert_eq!(original_sn, 42);
        assert_eq!(original_payload, Bytes::from_static(b"hello"));
    }

    #[test]
    fn lookup_miss_is_reported() {
        let mut buffer = RtxBuffer::new(RtxMode::Circular, 8, Duration::from_millis(200));
        let result = buffer.generate_retransmission_packet(1, 0xAAAA, 1, 97, SystemTime::now());
        assert!(matches!(result, Err(TransportError::RtxLookupMiss { sequence_number: 1 })));
    }
}
