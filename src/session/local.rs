//! Per-local-participant session state.
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

use crate::random::RandomSource;
use std::sync::Arc;

/// Per-local-participant state: our own SSRC, sequence counters, payload
/// type, and (if retransmission is enabled) a parallel SSRC/sequence pair
/// for the RTX stream.
///
/// Mirrors `RtpSessionState` from the C++ ancestor of this crate closely:
/// one random SSRC and one random initial sequence number/timestamp base
/// per construction, a sender flag, and RTX fields that exist unconditionally
/// even when retransmission is disabled (the session just never reads them).
#[derive(Debug)]
pub struct LocalState {
    current_payload_type: u8,
    ssrc: u32,
    remote_ssrc: Option<u32>,
    sequence_number: u16,
    rtp_timestamp_base: u32,
    is_sender: bool,
    rtx_payload_type: u8,
    rtx_ssrc: u32,
    rtx_sequence_number: u16,
}

impl LocalState {
    /// Create local state with a fixed SSRC and payload type (`ssrc: None`
    /// picks a random one, matching `initialiseRandomVariables`).
    pub fn new(random: &dyn RandomSource, payload_type: u8, ssrc: Option<u32>, rtx_payload_type: u8) -> Self {
        LocalState {
            current_payload_type: payload_type,
            ssrc: ssrc.unwrap_or_else(|| random.next_u32()),
            remote_ssrc: None,
            sequence_number: random.next_u16(),
            rtp_timestamp_base: random.next_u32(),
            is_sender: false,
            rtx_payload_type,
            rtx_ssrc: random.next_u32(),
            rtx_sequence_number: random.next_u16(),
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn remote_ssrc(&self) -> Option<u32> {
        self.remote_ssrc
    }

    pub fn set_remote_ssrc(&mut self, ssrc: u32) {
        self.remote_ssrc = Some(ssrc);
    }

    /// Generate a fresh random SSRC distinct from the current one, for
    /// collision recovery (spec.md §4.2 "collision handling").
    pub fn rekey_ssrc(&mut self, random: &dyn RandomSource) -> u32 {
        let old = self.ssrc;
        let mut new_ssrc = random.next_u32();
        while new_ssrc == old {
            new_ssrc = random.next_u32();
        }
        self.ssrc = new_ssrc;
        new_ssrc
    }

    /// Next outbound sequence number, post-increment (matches
    /// `getNextSequenceNumber`).
    pub fn next_sequence_number(&mut self) -> u16 {
        let current = self.sequence_number;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        current
    }

    pub fn current_sequence_number(&self) -> u16 {
        self.sequence_number
    }

    pub fn rtp_timestamp_base(&self) -> u32 {
        self.rtp_timestamp_base
    }

    pub fn current_payload_type(&self) -> u8 {
        self.current_payload_type
    }

    pub fn set_current_payload_type(&mut self, pt: u8) {
        self.current_payload_type = pt;
    }

    pub fn is_sender(&self) -> bool {
        self.is_sender
    }

    pub fn set_sender(&mut self, is_sender: bool) {
        self.is_sender = is_sender;
    }

    pub fn rtx_payload_type(&self) -> u8 {
        self.rtx_payload_type
    }

    pub fn rtx_ssrc(&self) -> u32 {
        self.rtx_ssrc
    }

    /// Next outbound RTX sequence number, post-increment.
    pub fn next_rtx_sequence_number(&mut self) -> u16 {
        let current = self.rtx_sequence_number;
        self.rtx_sequence_number = self.rtx_sequence_number.wrapping_add(1);
        current
    }

    pub fn current_rtx_sequence_number(&self) -> u16 {
        self.rtx_sequence_number
    }
}

/// Convenience alias for the common case of sharing `LocalState` between the
/// session facade and the scheduler/transmission manager.
pub type SharedRandomSource = Arc<dyn RandomSource>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SeededRandom;

    #[test]
    fn sequence_numbers_increment_and_wrap() {
        let random = SeededRandom::new(1);
        let mut state = LocalState::new(&random, 96, Some(0x1111_1111), 97);
        state.sequence_number = u16::MAX;
        assert_eq!(state.next_sequence_number(), u16::MAX);
        assert_eq!(state.current_sequence_number(), 0);
    }

    #[test]
    fn fixed_ssrc_is_honoured() {
        let random = SeededRandom::new(2);
        let state = LocalState::new(&random, 96, Some(0xDEAD_BEEF), 97);
        assert_eq!(state.ssrc(), 0xDEAD_BEEF);
    }

    #[test]
    fn rekey_never_returns_old_ssrc() {
        let random = SeededRandom::new(3);
        let mut state = LocalState::new(&random, 96, Some(0xAAAA_AAAA), 97);
        let new_ssrc = state.rekey_ssrc(&random);
        assert_ne!(new_ssrc, 0xAAAA_AAAA);
        assert_eq!(state.ssrc(), new_ssrc);
    }
}
