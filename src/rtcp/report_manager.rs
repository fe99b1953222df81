//! Compound RTCP packet assembly (spec.md §4.3 "Packet assembly").
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

use crate::loss::nack_ack::FeedbackBatch;
use crate::session::database::MemberReportSnapshot;
use crate::wire::rtcp::{
    CompoundRtcpPacket, Goodbye, ReceiverReport, ReceptionReport, RtcpRecord, SdesChunk, SdesItem, SenderReport,
};

/// Maximum reception report blocks that fit in one SR/RR (spec.md §4.3).
pub const MAX_REPORT_BLOCKS_PER_PACKET: usize = 31;
/// SDES item type for CNAME (RFC 3550 Section 6.5.1).
const SDES_CNAME: u8 = 1;

/// Assembles SR/RR + SDES + feedback/BYE into one compound packet,
/// round-robining report blocks across intervals once membership exceeds
/// [`MAX_REPORT_BLOCKS_PER_PACKET`] (spec.md §4.3, supplemented feature
/// grounded on the ancestor's `generatePeriodicCompoundRtcpPacket` comment).
pub struct ReportManager {
    cname: String,
    round_robin_cursor: usize,
}

/// Inputs for one regular (non-reduced) compound report.
pub struct RegularReportInputs {
    pub we_sent: bool,
    pub local_ssrc: u32,
    pub sender_info: Option<SenderInfo>,
    pub member_snapshots: Vec<MemberReportSnapshot>,
    pub feedback: FeedbackBatch,
    pub bye: Option<Goodbye>,
}

/// Sender-half fields of an SR, supplied by the caller from its own send counters.
#[derive(Debug, Clone, Copy)]
pub struct SenderInfo {
    pub ntp_timestamp: u64,
    pub rtp_timestamp: u32,
    pub packet_count: u32,
    pub octet_count: u32,
}

impl ReportManager {
    pub fn new(cname: impl Into<String>) -> Self {
        ReportManager {
            cname: cname.into(),
            round_robin_cursor: 0,
        }
    }

    /// Select up to [`MAX_REPORT_BLOCKS_PER_PACKET`] members to report on
    /// this interval, round-robining the cursor across calls when there
    /// are more members than fit in one packet.
    fn select_report_blocks(&mut self, snapshots: &[MemberReportSnapshot]) -> Vec<ReceptionReport> {
        if snapshots.len() <= MAX_REPORT_BLOCKS_PER_PACKET {
            self.round_robin_cursor = 0;
            return snapshots.iter().map(to_reception_report).collect();
        }

        let mut selected = Vec::with_capacity(MAX_REPORT_BLOCKS_PER_PACKET);
        for i in 0..MAX_REPORT_BLOCKS_PER_PACKET {
            let idx = (self.round_robin_cursor + i) % snapshots.len();
            selected.push(to_reception_report(&snapshots[idx]));
        }
        self.round_robin_cursor = (self.round_robin_cursor + MAX_REPORT_BLOCKS_PER_PACKET) % snapshots.len();
        selected
    }

    /// Assemble a regular compound packet: SR (if we sent) or RR, SDES with
    /// CNAME, feedback records, optionally BYE.
    pub fn assemble_regular_report(&mut self, inputs: RegularReportInputs) -> CompoundRtcpPacket {
        let mut packet = CompoundRtcpPacket::new();
        let reports = self.select_report_blocks(&inputs.member_snapshots);

        if inputs.we_sent {
            let sender_info = inputs.sender_info.unwrap_or(SenderInfo {
                ntp_timestamp: 0,
                rtp_timestamp: 0,
                packet_count: 0,
                octet_count: 0,
            });
            packet.push(RtcpRecord::SenderReport(SenderReport {
                ssrc: inputs.local_ssrc,
                ntp_timestamp: sender_info.ntp_timestamp,
                rtp_timestamp: sender_info.rtp_timestamp,
                sender_packet_count: sender_info.packet_count,
                sender_octet_count: sender_info.octet_count,
                reports,
            }));
        } else {
            packet.push(RtcpRecord::ReceiverReport(ReceiverReport {
                ssrc: inputs.local_ssrc,
                reports,
            }));
        }

        packet.push(RtcpRecord::Sdes(vec![SdesChunk {
            ssrc: inputs.local_ssrc,
            items: vec![SdesItem {
                item_type: SDES_CNAME,
                value: self.cname.clone(),
            }],
        }]));

        for nack in inputs.feedback.nacks {
            packet.push(RtcpRecord::Nack(nack));
        }
        for ack in inputs.feedback.acks {
            packet.push(RtcpRecord::Ack(ack));
        }

        if let Some(bye) = inputs.bye {
            packet.push(RtcpRecord::Bye(bye));
        }

        packet
    }

    /// Assemble a reduced-size compound packet: only feedback records, no
    /// leading SR/RR/SDES (spec.md §4.3 "Reduced-size compound").
    pub fn assemble_reduced_report(&self, feedback: FeedbackBatch) -> CompoundRtcpPacket {
        let mut packet = CompoundRtcpPacket::new();
        for nack in feedback.nacks {
            packet.push(RtcpRecord::Nack(nack));
        }
        for ack in feedback.acks {
            packet.push(RtcpRecord::Ack(ack));
        }
        packet
    }
}

fn to_reception_report(snapshot: &MemberReportSnapshot) -> ReceptionReport {
    ReceptionReport {
        ssrc: snapshot.ssrc,
        fraction_lost: snapshot.fraction_lost,
        cumulative_lost: snapshot.cumulative_lost,
        extended_highest_sequence_number: snapshot.extended_highest_sequence_number,
        interarrival_jitter: snapshot.interarrival_jitter,
        last_sr: snapshot.last_sr_middle_32,
        delay_since_last_sr: snapshot.delay_since_last_sr,
    }
}
