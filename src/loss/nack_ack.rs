//! NACK/ACK feedback generation and massive-loss suppression (spec.md §4.5).
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

use crate::config::FeedbackMode;
use crate::wire::rtcp::{GenericAck, GenericNack};
use std::collections::BTreeSet;

/// Fraction of packets assumed lost in the last interval above which
/// individual NACKs are suppressed in favour of a single "massive loss"
/// signal (spec.md §4.5 "round-trip-aware suppression").
pub const MASSIVE_LOSS_THRESHOLD: f64 = 0.40;

/// One interval's worth of feedback, ready to fold into a compound RTCP packet.
#[derive(Debug, Clone, Default)]
pub struct FeedbackBatch {
    pub nacks: Vec<GenericNack>,
    pub acks: Vec<GenericAck>,
    /// Set when more than [`MASSIVE_LOSS_THRESHOLD`] of the interval's
    /// packets were assumed lost; individual NACKs are suppressed this round.
    pub massive_loss: bool,
}

/// Accumulates pending-NACK/pending-ACK sequence numbers between RTCP
/// reports and converts them into wire-ready feedback records.
#[derive(Debug, Default)]
pub struct FeedbackGenerator {
    mode: FeedbackModeState,
    pending_nack: BTreeSet<u16>,
    pending_ack: BTreeSet<u16>,
    interval_total: u32,
    interval_assumed_lost: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FeedbackModeState {
    None,
    Nack,
    Ack,
}

impl Default for FeedbackModeState {
    fn default() -> Self {
        FeedbackModeState::None
    }
}

impl FeedbackGenerator {
    pub fn new(mode: FeedbackMode) -> Self {
        FeedbackGenerator {
            mode: match mode {
                FeedbackMode::None => FeedbackModeState::None,
                FeedbackMode::Nack => FeedbackModeState::Nack,
                FeedbackMode::Ack => FeedbackModeState::Ack,
            },
            ..Default::default()
        }
    }

    /// Called once per arriving packet, to track the interval's loss rate.
    pub fn note_arrival(&mut self, sequence_number: u16) {
        self.interval_total += 1;
        if self.mode == FeedbackModeState::Ack {
            self.pending_ack.insert(sequence_number);
        }
    }

    /// Called for every `packet_assumed_lost` event from the predictor.
    pub fn note_assumed_lost(&mut self, sequence_number: u16) {
        self.interval_total += 1;
        self.interval_assumed_lost += 1;
        if self.mode == FeedbackModeState::Nack {
            self.pending_nack.insert(sequence_number);
        }
    }

    /// Called for every `packet_was_late` event: a previously-NACKed SN
    /// that arrived after all is removed from the pending set if not yet
    /// emitted in a feedback record.
    pub fn note_late_arrival(&mut self, sequence_number: u16) {
        self.pending_nack.remove(&sequence_number);
    }

    /// Drain the accumulated state into a feedback batch and reset interval
    /// counters, to be called whenever the session assembles its next
    /// RTCP feedback batch.
    pub fn drain(&mut self, sender_ssrc: u32, media_ssrc: u32) -> FeedbackBatch {
        let massive_loss = self.interval_total > 0
            && (self.interval_assumed_lost as f64 / self.interval_total as f64) >= MASSIVE_LOSS_THRESHOLD;

        let nacks = if massive_loss {
            Vec::new()
        } else {
            encode_nacks(sender_ssrc, media_ssrc, std::mem::take(&mut self.pending_nack))
        };
        let acks = encode_acks(sender_ssrc, media_ssrc, std::mem::take(&mut self.pending_ack));

        if massive_loss {
            // Suppressing NACKs doesn't mean we forget them forever, but the
            // interval that triggered massive loss is over; drop them, the
            // predictor will re-declare anything still missing.
            self.pending_nack.clear();
        }

        self.interval_total = 0;
        self.interval_assumed_lost = 0;

        FeedbackBatch {
            nacks,
            acks,
            massive_loss,
        }
    }
}

/// Pack a set of lost sequence numbers into the minimum number of generic
/// NACK records (each covers a base SN plus a 16-bit follow-up bitmask).
fn encode_nacks(sender_ssrc: u32, media_ssrc: u32, pending: BTreeSet<u16>) -> Vec<GenericNack> {
    let mut sorted: Vec<u16> = pending.into_iter().collect();
    sorted.sort_unstable();

    let mut records = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let base = sorted[i];
        let mut bitmask = 0u16;
        let mut j = i + 1;
        while j < sorted.len() {
            let offset = sorted[j].wrapping_sub(base);
            if offset == 0 || offset > 16 {
                break;
            }
            bitmask |= 1 << (offset - 1);
            j += 1;
        }
        records.push(GenericNack {
            sender_ssrc,
            media_ssrc,
            packet_id: base,
            bitmask_lost: bitmask,
        });
        i = j;
    }
    records
}

/// Pack a set of received sequence numbers into generic ACK records. `base`
/// is the highest SN in each run; bit `j` of the mask marks `base - j - 1`
/// as also received, so records are built from the top of the sorted set
/// downward.
fn encode_acks(sender_ssrc: u32, media_ssrc: u32, pending: BTreeSet<u16>) -> Vec<GenericAck> {
    let mut sorted: Vec<u16> = pending.into_iter().collect();
    sorted.sort_unstable();

    let mut records = Vec::new();
    let mut i = sorted.len();
    while i > 0 {
        let base = sorted[i - 1];
        let mut bitmask = 0u16;
        let mut j = i - 1;
        while j > 0 {
            let offset = base.wrapping_sub(sorted[j - 1]);
            if offset == 0 || offset > 16 {
                break;
            }
            bitmask |= 1 << (offset - 1);
            j -= 1;
        }
        records.push(GenericAck {
            sender_ssrc,
            media_ssrc,
            base_sequence_number: base,
            bitmask_received: bitmask,
        });
        i = j;
    }
    records.reverse();
    records
}
