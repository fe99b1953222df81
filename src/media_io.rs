//! Media in/out contracts (spec.md §6 "Media in"/"Media out").
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
use bytes::Bytes;
use std::time::SystemTime;

/// One access unit submitted for packetization: an ordered group of media
/// samples sharing one presentation timestamp (spec.md §6, Glossary).
#[derive(Debug, Clone)]
pub struct AccessUnit {
    pub samples: Vec<Bytes>,
    pub presentation_time: SystemTime,
    pub marker_on_last: bool,
}

/// An access unit released from the jitter buffer, ready for the application.
#[derive(Debug, Clone)]
pub struct ReleasedAccessUnit {
    pub samples: Vec<Bytes>,
    pub presentation_time: SystemTime,
    /// Whether `presentation_time` came from an RTCP-synchronized mapping.
    pub rtcp_synced: bool,
}

/// Pluggable payload-format packetizer, keyed by payload type (spec.md §6
/// "Media in"). Concrete payload formats (H.264/Opus/etc.) are out of
/// scope; this is the seam the session calls into.
pub trait Packetizer: Send + Sync {
    /// Split one access unit into one or more RTP packets, with header
    /// fields other than SSRC/sequence number/RTP timestamp already filled.
    fn packetize(&self, unit: &AccessUnit, rtp_timestamp: u32) -> Vec<RtpPacket>;
}

/// Trivial one-sample-per-packet packetizer used where the payload format
/// doesn't need fragmentation or aggregation; a reasonable default for
/// tests and for payload types with no special framing.
#[derive(Debug, Default)]
pub struct PassthroughPacketizer {
    pub payload_type: u8,
}

impl Packetizer for PassthroughPacketizer {
    fn packetize(&self, unit: &AccessUnit, rtp_timestamp: u32) -> Vec<RtpPacket> {
        let last_index = unit.samples.len().saturating_sub(1);
        unit.samples
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                let header = crate::wire::rtp::RtpHeader {
                    version: 2,
                    padding: false,
                    extension: false,
                    csrc_count: 0,
                    marker: unit.marker_on_last && i == last_index,
                    payload_type: self.payload_type,
                    sequence_number: 0, // filled in by the session before send
                    timestamp: rtp_timestamp,
                    ssrc: 0, // filled in by the session before send
                    csrc: Vec::new(),
                    extension_header: None,
                };
                RtpPacket::new(header, sample.clone())
            })
            .collect()
    }
}
