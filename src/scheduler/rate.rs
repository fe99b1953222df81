//! Pluggable congestion-control interface (spec.md §9: NADA/SCReAM are
//! research plug-ins behind this seam; their algorithm bodies are
//! explicitly a Non-goal of the core).
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

use crate::wire::rtcp::ReceptionReport;

/// Feedback a rate controller consumes to adjust its target send rate,
/// mirroring the `retrieveFeedback`/`processFeedback` split named in the
/// ancestor's NADA/SCReAM scheduler interfaces.
#[derive(Debug, Clone, Copy)]
pub struct RateFeedback {
    pub fraction_lost: u8,
    pub interarrival_jitter: u32,
    pub round_trip_time_ms: Option<u32>,
}

/// Pluggable send-rate policy. The core ships only a trivial fixed-rate
/// implementation; NADA/SCReAM-style algorithms are out of scope
/// (spec.md §9) but plug in here.
pub trait RateController: Send {
    fn process_feedback(&mut self, feedback: RateFeedback);
    fn target_bitrate_bps(&self) -> u32;
}

impl From<&ReceptionReport> for RateFeedback {
    fn from(report: &ReceptionReport) -> Self {
        RateFeedback {
            fraction_lost: report.fraction_lost,
            interarrival_jitter: report.interarrival_jitter,
            round_trip_time_ms: None,
        }
    }
}

/// Pass-through controller holding a constant target bitrate; used when no
/// congestion-control policy is configured.
#[derive(Debug, Clone, Copy)]
pub struct FixedRateController {
    target_bps: u32,
}

impl FixedRateController {
    pub fn new(target_bps: u32) -> Self {
        FixedRateController { target_bps }
    }
}

impl RateController for FixedRateController {
    fn process_feedback(&mut self, _feedback: RateFeedback) {}

    fn target_bitrate_bps(&self) -> u32 {
        self.target_bps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_rate_controller_ignores_feedback() {
        let mut controller = FixedRateController::new(500_000);
        controller.process_feedback(RateFeedback {
            fraction_lost: 255,
            interarrival_jitter: 1000,
            round_trip_time_ms: Some(300),
        });
        assert_eq!(controller.target_bitrate_bps(), 500_000);
    }
}
