//! `RtpSession`: composition root wiring the wire codec, member database,
//! jitter buffer, loss detector, and RTCP scheduler into one per-stream
//! state machine (spec.md §2 "Data flow").
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

use crate::config::{PredictorKind, SessionConfig};
use crate::error::{TransportError, TransportResult};
use crate::jitter::{InsertOutcome, JitterBuffer, JitterBufferConfig};
use crate::loss::nack_ack::FeedbackGenerator;
use crate::loss::predictor::{Ar2Predictor, MovingAveragePredictor, Predictor, PredictorEvent, SimplePredictor};
use crate::random::RandomSource;
use crate::rtx::RtxBuffer;
use crate::session::database::MemberDatabase;
use crate::session::local::LocalState;
use crate::wire::rtcp::{CompoundRtcpPacket, RtcpRecord};
use crate::wire::rtp::RtpPacket;
use std::time::{Instant, SystemTime};
use tracing::{debug, info, warn};

/// Default gap threshold for the `simple` predictor (spec.md §4.5).
const DEFAULT_SIMPLE_GAP_THRESHOLD: u32 = 3;
/// Default sliding-window size for the moving-average predictor.
const DEFAULT_MOVING_AVERAGE_WINDOW: usize = 32;

/// Per-stream session state machine: owns local state, the remote member
/// database, the jitter buffer, the RTX buffer, and the loss predictor.
/// Concurrent external access is forbidden (spec.md §5 "Shared-resource
/// policy") — callers serialize access the same way the rest of the core does.
pub struct RtpSession {
    config: SessionConfig,
    local: LocalState,
    database: MemberDatabase,
    jitter_buffer: JitterBuffer,
    rtx_buffer: RtxBuffer,
    predictor: Box<dyn Predictor>,
    feedback: FeedbackGenerator,
}

/// Outcome of handing one inbound datagram to the session.
#[derive(Debug, Clone, Default)]
pub struct InboundOutcome {
    pub rtp_accepted: bool,
    pub jitter_insert: Option<InsertOutcome>,
    pub collision_detected: bool,
    pub new_local_ssrc: Option<u32>,
}

impl RtpSession {
    pub fn new(config: SessionConfig, random: &dyn RandomSource) -> TransportResult<Self> {
        config.validate()?;

        let local = LocalState::new(random, config.payload_type, config.ssrc, 0);
        let database = MemberDatabase::new(config.clock_rate);
        let jitter_buffer = JitterBuffer::new(JitterBufferConfig {
            latency_ms: config.buffer_latency_ms,
            clock_rate: config.clock_rate,
        });
        let rtx_buffer = RtxBuffer::new(
            config.rtx_mode,
            crate::rtx::DEFAULT_CIRCULAR_CAPACITY,
            std::time::Duration::from_millis(config.rtx_time_ms as u64),
        );
        let predictor: Box<dyn Predictor> = match config.predictor {
            PredictorKind::Simple => Box::new(SimplePredictor::new(DEFAULT_SIMPLE_GAP_THRESHOLD)),
            PredictorKind::MovingAverage => Box::new(MovingAveragePredictor::new(
                DEFAULT_MOVING_AVERAGE_WINDOW,
                config.premature_timeout_prob,
            )),
            PredictorKind::Ar2 => Box::new(Ar2Predictor::new(config.premature_timeout_prob)),
        };
        let feedback = FeedbackGenerator::new(config.feedback_mode);

        Ok(RtpSession {
            config,
            local,
            database,
            jitter_buffer,
            rtx_buffer,
            predictor,
            feedback,
        })
    }

    pub fn local_ssrc(&self) -> u32 {
        self.local.ssrc()
    }

    /// Process one inbound RTP packet (spec.md §2 "Receive path").
    pub fn handle_inbound_rtp(
        &mut self,
        packet: RtpPacket,
        source_is_local_endpoint: bool,
        arrival_wall: SystemTime,
        monotonic_now: Instant,
        random: &dyn RandomSource,
    ) -> InboundOutcome {
        let ssrc = packet.header.ssrc;
        let mut outcome = InboundOutcome::default();

        if ssrc == self.local.ssrc() && !source_is_local_endpoint {
            let new_ssrc = self.local.rekey_ssrc(random);
            info!(old_ssrc = ssrc, new_ssrc, "SSRC collision resolved by re-keying");
            outcome.collision_detected = true;
            outcome.new_local_ssrc = Some(new_ssrc);
        }

        let admission = self.database.process_incoming_rtp(
            ssrc,
            packet.header.sequence_number,
            packet.header.timestamp,
            packet.payload.len(),
            arrival_wall,
        );

        if !admission.accepted {
            debug!(ssrc, sequence_number = packet.header.sequence_number, "RTP packet rejected by sequence validation");
            return outcome;
        }
        outcome.rtp_accepted = true;

        let extended_sn = admission.extended_sequence_number.unwrap_or(packet.header.sequence_number as u32);
        self.rtx_buffer.note_arrival(extended_sn);
        self.feedback.note_arrival(packet.header.sequence_number);

        for event in self.predictor.on_packet_arrival(monotonic_now, extended_sn) {
            match event {
                PredictorEvent::AssumedLost(sn) => {
                    self.feedback.note_assumed_lost(sn as u16);
                }
                PredictorEvent::WasLate(sn) => {
                    self.feedback.note_late_arrival(sn as u16);
                }
            }
        }

        let key = packet.header.timestamp;
        let mut packet = packet;
        packet.arrival_time = Some(arrival_wall);
        packet.extended_sequence_number = Some(extended_sn);
        let rtcp_synced = admission.synchronized;
        let insert_outcome = self.jitter_buffer.insert(packet, key, rtcp_synced, arrival_wall);
        if matches!(insert_outcome, InsertOutcome::Late) {
            warn!(ssrc, "late packet dropped at jitter buffer");
        }
        outcome.jitter_insert = Some(insert_outcome);

        outcome
    }

    /// Process one inbound compound RTCP packet. Rejects the whole datagram
    /// (spec.md §4.1, §7 "a bad datagram does not kill the session") if it
    /// fails compound-packet validation, without touching any session state.
    pub fn handle_inbound_rtcp(&mut self, packet: &CompoundRtcpPacket, arrival_wall: SystemTime) -> TransportResult<()> {
        if let Err(err) = packet.validate(self.config.allow_reduced_rtcp) {
            warn!(error = %err, "rejected malformed compound RTCP packet");
            return Err(err);
        }

        for record in &packet.records {
            match record {
                RtcpRecord::SenderReport(sr) => {
                    self.database.process_incoming_sr(sr.ssrc, sr.ntp_timestamp, sr.rtp_timestamp, arrival_wall);
                }
                RtcpRecord::Bye(bye) => {
                    for &ssrc in &bye.sources {
                        self.database.mark_left(ssrc);
                    }
                }
                RtcpRecord::Nack(nack) => {
                    for sn in nack.lost_sequence_numbers() {
                        self.rtx_buffer.mark_nacked(sn, arrival_wall);
                    }
                }
                RtcpRecord::Ack(ack) => {
                    for sn in ack.received_sequence_numbers() {
                        self.rtx_buffer.mark_acked(sn, arrival_wall);
                    }
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Stamp and store a freshly-packetized outbound packet, assigning the
    /// next sequence number and retaining a copy for retransmission.
    pub fn prepare_outbound(&mut self, mut packet: RtpPacket, now: SystemTime) -> RtpPacket {
        packet.header.ssrc = self.local.ssrc();
        packet.header.sequence_number = self.local.next_sequence_number();
        packet.header.payload_type = self.local.current_payload_type();
        packet.send_time = Some(now);
        self.rtx_buffer.store(&packet, now);
        self.local.set_sender(true);
        packet
    }

    pub fn request_retransmission(&mut self, sequence_number: u16, now: SystemTime) -> TransportResult<RtpPacket> {
        let rtx_ssrc = self.local.rtx_ssrc();
        let rtx_sn = self.local.next_rtx_sequence_number();
        let rtx_pt = self.local.rtx_payload_type();
        self.rtx_buffer
            .generate_retransmission_packet(sequence_number, rtx_ssrc, rtx_sn, rtx_pt, now)
            .map_err(|err| {
                if let TransportError::RtxLookupMiss { sequence_number } = err {
                    warn!(sequence_number, "RTX lookup miss");
                }
                err
            })
    }

    pub fn database(&self) -> &MemberDatabase {
        &self.database
    }

    pub fn jitter_buffer(&self) -> &JitterBuffer {
        &self.jitter_buffer
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Cancel pending state on shutdown (spec.md §5 "Cancellation"): clears
    /// the RTX buffer and jitter buffer; pending NACKs/ACKs are dropped by
    /// simply not draining the feedback generator again.
    pub fn stop(&mut self) {
        self.jitter_buffer.clear();
    }
}
