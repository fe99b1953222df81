//! Session configuration (spec.md §6's fixed option set).
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
use crate::rtx::RtxMode;
use serde::{Deserialize, Serialize};

/// Feedback scheme negotiated for the session (spec.md §6 `feedback_mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackMode {
    None,
    Nack,
    Ack,
}

impl Default for FeedbackMode {
    fn default() -> Self {
        FeedbackMode::None
    }
}

/// Predictor implementation selected at construction (spec.md §4.5, §6 `predictor`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictorKind {
    Simple,
    MovingAverage,
    Ar2,
}

impl Default for PredictorKind {
    fn default() -> Self {
        PredictorKind::Simple
    }
}

/// Full set of fixed session options (spec.md §6 table), following the
/// teacher's one-struct-per-component config idiom
/// (`StreamConfig`/`NackConfig`/`JitterBufferConfig`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub payload_type: u8,
    pub clock_rate: u32,
    pub ssrc: Option<u32>,
    pub buffer_latency_ms: u32,
    pub rtcp_bandwidth_fraction: f64,
    pub allow_reduced_rtcp: bool,
    pub feedback_mode: FeedbackMode,
    pub predictor: PredictorKind,
    pub premature_timeout_prob: f64,
    pub rtx_mode: RtxMode,
    pub rtx_time_ms: u32,
    pub rtcp_mux: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            payload_type: 96,
            clock_rate: 90_000,
            ssrc: None,
            buffer_latency_ms: 150,
            rtcp_bandwidth_fraction: 0.05,
            allow_reduced_rtcp: false,
            feedback_mode: FeedbackMode::default(),
            predictor: PredictorKind::default(),
            premature_timeout_prob: 0.05,
            rtx_mode: RtxMode::default(),
            rtx_time_ms: 200,
            rtcp_mux: false,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> TransportResult<()> {
        if self.payload_type > 127 {
            return Err(TransportError::InvalidConfig(format!(
                "payload_type {} exceeds the 7-bit PT field",
                self.payload_type
            )));
        }
        if self.clock_rate == 0 {
            return Err(TransportError::InvalidConfig(
                "clock_rate must be non-zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.rtcp_bandwidth_fraction) {
            return Err(TransportError::InvalidConfig(format!(
                "rtcp_bandwidth_fraction {} out of range [0, 1]",
                self.rtcp_bandwidth_fraction
            )));
        }
        if !(0.0..1.0).contains(&self.premature_timeout_prob) {
            return Err(TransportError::InvalidConfig(format!(
                "premature_timeout_prob {} out of range [0, 1)",
                self.premature_timeout_prob
            )));
        }
        if self.buffer_latency_ms == 0 {
            return Err(TransportError::InvalidConfig(
                "buffer_latency_ms must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
