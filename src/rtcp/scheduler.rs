//! RTCP transmission-timer algorithm (spec.md §4.3), grounded on RFC 3550
//! Section 6.3's pseudocode and the C++ ancestor's `RtcpReportManager`
//! timing fields (`m_tPrevious`/`m_tNext`/`m_dTransmissionInterval`).
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
use std::time::{Duration, Instant};

/// Removes the bias the exponential-distribution reconsideration algorithm
/// would otherwise introduce (RFC 3550 Section 6.3.1).
const E_COMPENSATION: f64 = 1.21828;
/// Minimum RTCP interval for full (non-reduced-size) compound reports.
const MIN_INTERVAL_FULL: Duration = Duration::from_secs(5);
/// Minimum interval for reduced-size reports, only usable before we have
/// ever sent a report and when the peer advertises support.
const MIN_INTERVAL_REDUCED: Duration = Duration::from_secs(1);
/// Fraction of RTCP bandwidth reserved for senders (spec.md §4.3).
const SENDER_BANDWIDTH_SHARE: f64 = 0.25;
/// Early-feedback dither window multiplier (spec.md §4.3, `l = 0.5`).
const EARLY_FEEDBACK_DITHER_FACTOR: f64 = 0.5;

/// Inputs the scheduler needs at each decision point: a fresh read of
/// session/database state, since membership changes between fires.
#[derive(Debug, Clone, Copy)]
pub struct MembershipSnapshot {
    pub active_members: usize,
    pub senders: usize,
    /// Average compound-RTCP-packet size observed so far, bytes.
    pub avg_rtcp_size: f64,
    /// Total RTCP bandwidth budget, bytes/s (`rtcp_bandwidth_fraction * session_bandwidth`).
    pub rtcp_bandwidth_bps: f64,
}

/// What the caller should do after a scheduler decision point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchedulerDecision {
    /// Reconsideration deferred the send; wait until `retry_at`.
    Reschedule { retry_at: Instant },
    /// Send now; the next regular fire is scheduled at `next_fire`.
    Send { next_fire: Instant },
}

/// Decision for an early-feedback request (spec.md §4.3 "Early feedback").
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EarlyFeedbackDecision {
    /// Denied: ride the next regular report instead.
    Denied,
    /// Schedule an early (possibly reduced-size) report at this time.
    Scheduled { at: Instant },
}

/// Implements the bandwidth-bounded transmission-timer algorithm, including
/// reconsideration, BYE reconsideration, and early-feedback dithering.
pub struct TransmissionTimer {
    allow_reduced_rtcp: bool,
    has_sent_ever: bool,
    previous_report_time: Option<Instant>,
    next_fire_time: Option<Instant>,
    current_interval: Duration,
    early_report_sent_since_last_regular: bool,
}

impl TransmissionTimer {
    pub fn new(allow_reduced_rtcp: bool) -> Self {
        TransmissionTimer {
            allow_reduced_rtcp,
            has_sent_ever: false,
            previous_report_time: None,
            next_fire_time: None,
            current_interval: MIN_INTERVAL_FULL,
            early_report_sent_since_last_regular: false,
        }
    }

    /// Deterministic interval `T_d` (spec.md §4.3), before randomization.
    fn deterministic_interval(&self, snapshot: &MembershipSnapshot, is_sender_pool: Option<bool>) -> Duration {
        let min_interval = if self.allow_reduced_rtcp && !self.has_sent_ever {
            MIN_INTERVAL_REDUCED
        } else {
            MIN_INTERVAL_FULL
        };

        if snapshot.rtcp_bandwidth_bps <= 0.0 {
            return min_interval;
        }

        let (n_eff, bw_eff) = match is_sender_pool {
            Some(true) => (
                snapshot.senders.max(1) as f64,
                snapshot.rtcp_bandwidth_bps * SENDER_BANDWIDTH_SHARE,
            ),
            Some(false) => (
                (snapshot.active_members - snapshot.senders).max(1) as f64,
                snapshot.rtcp_bandwidth_bps * (1.0 - SENDER_BANDWIDTH_SHARE),
            ),
            None => (snapshot.active_members.max(1) as f64, snapshot.rtcp_bandwidth_bps),
        };

        let computed = snapshot.avg_rtcp_size * n_eff / bw_eff;
        Duration::from_secs_f64(computed.max(min_interval.as_secs_f64()))
    }

    /// Whether the sender/receiver pools should be split (spec.md §4.3:
    /// `s > 0 && s < n/4`).
    fn split_pools(snapshot: &MembershipSnapshot) -> bool {
        snapshot.senders > 0 && (snapshot.senders as f64) < (snapshot.active_members as f64 / 4.0)
    }

    /// Randomized interval `T = T_d * Unif(0.5, 1.5) / e_compensation`.
    fn randomized_interval(&self, snapshot: &MembershipSnapshot, is_sender_pool: Option<bool>, random: &dyn RandomSource) -> Duration {
        let deterministic = self.deterministic_interval(snapshot, is_sender_pool);
        let factor = random.uniform(0.5, 1.5) / E_COMPENSATION;
        Duration::from_secs_f64((deterministic.as_secs_f64() * factor).max(0.0))
    }

    /// Compute `T_n`, the current regular-report interval (splitting
    /// sender/receiver pools when warranted, per spec.md §4.3).
    pub fn current_regular_interval(&self, snapshot: &MembershipSnapshot, random: &dyn RandomSource) -> Duration {
        if Self::split_pools(snapshot) {
            // Conservatively, a member schedules against its own pool; here
            // we report the receiver-pool interval, the looser bound, since
            // this local participant is (in the common case) a receiver.
            self.randomized_interval(snapshot, Some(false), random)
        } else {
            self.randomized_interval(snapshot, None, random)
        }
    }

    /// Run one reconsideration pass at a scheduled fire (spec.md §4.3
    /// "Reconsideration").
    pub fn on_fire(&mut self, now: Instant, snapshot: &MembershipSnapshot, random: &dyn RandomSource) -> SchedulerDecision {
        let t_n = self.current_regular_interval(snapshot, random);

        if let Some(tp) = self.previous_report_time {
            if now < tp + t_n {
                let retry_at = tp + t_n;
                self.next_fire_time = Some(retry_at);
                return SchedulerDecision::Reschedule { retry_at };
            }
        }

        self.previous_report_time = Some(now);
        self.has_sent_ever = true;
        self.current_interval = t_n;
        self.early_report_sent_since_last_regular = false;
        let next_fire = now + t_n;
        self.next_fire_time = Some(next_fire);
        SchedulerDecision::Send { next_fire }
    }

    /// BYE reconsideration (spec.md §4.3): identical algorithm, but the
    /// snapshot passed in must already count only BYE-sending members, so
    /// that synchronized-leave storms don't spike RTCP bandwidth.
    pub fn on_bye_fire(&mut self, now: Instant, bye_snapshot: &MembershipSnapshot, random: &dyn RandomSource) -> SchedulerDecision {
        self.on_fire(now, bye_snapshot, random)
    }

    /// Evaluate an early-feedback request against the dither window
    /// (spec.md §4.3 "Early feedback").
    pub fn request_early_feedback(&mut self, now: Instant, random: &dyn RandomSource) -> EarlyFeedbackDecision {
        let t_next = match self.next_fire_time {
            Some(t) => t,
            None => return EarlyFeedbackDecision::Denied,
        };
        let t_rr = self.current_interval;
        let dither_max = t_rr.mul_f64(EARLY_FEEDBACK_DITHER_FACTOR);

        if now + dither_max >= t_next {
            return EarlyFeedbackDecision::Denied;
        }

        if self.early_report_sent_since_last_regular {
            return EarlyFeedbackDecision::Denied;
        }

        self.early_report_sent_since_last_regular = true;
        let jitter = random.uniform(0.0, dither_max.as_secs_f64());
        let at = now + Duration::from_secs_f64(jitter);

        // The regular schedule resumes at tp + 2*T_rr so average bandwidth
        // is preserved (the slot this early report took the place of is skipped).
        if let Some(tp) = self.previous_report_time {
            self.next_fire_time = Some(tp + t_rr + t_rr);
        }

        EarlyFeedbackDecision::Scheduled { at }
    }

    pub fn has_sent_ever(&self) -> bool {
        self.has_sent_ever
    }

    pub fn next_fire_time(&self) -> Option<Instant> {
        self.next_fire_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::SeededRandom;

    fn fixed_snapshot() -> MembershipSnapshot {
        MembershipSnapshot {
            active_members: 2,
            senders: 1,
            avg_rtcp_size: 100.0,
            rtcp_bandwidth_bps: 2.0, // tiny, to force the 5s floor
        }
    }

    #[test]
    fn interval_never_drops_below_five_second_floor() {
        let timer = TransmissionTimer::new(false);
        let random = SeededRandom::new(1);
        let interval = timer.randomized_interval(&fixed_snapshot(), None, &random);
        assert!(interval >= MIN_INTERVAL_FULL.mul_f64(0.5 / E_COMPENSATION));
    }

    #[test]
    fn first_fire_always_sends() {
        let mut timer = TransmissionTimer::new(false);
        let random = SeededRandom::new(2);
        let now = Instant::now();
        let decision = timer.on_fire(now, &fixed_snapshot(), &random);
        assert!(matches!(decision, SchedulerDecision::Send { .. }));
        assert!(timer.has_sent_ever());
    }

    #[test]
    fn firing_too_early_is_rescheduled() {
        let mut timer = TransmissionTimer::new(false);
        let random = SeededRandom::new(3);
        let now = Instant::now();
        timer.on_fire(now, &fixed_snapshot(), &random);

        // Fire again almost immediately; reconsideration should defer it.
        let decision = timer.on_fire(now + Duration::from_millis(1), &fixed_snapshot(), &random);
        assert!(matches!(decision, SchedulerDecision::Reschedule { .. }));
    }

    #[test]
    fn early_feedback_denied_within_dither_window_of_next_report() {
        let mut timer = TransmissionTimer::new(false);
        let random = SeededRandom::new(4);
        let now = Instant::now();
        timer.on_fire(now, &fixed_snapshot(), &random); // schedules next_fire ~5s out
        // Request late in the interval: now + dither_max >= t_next.
        let near_next = now + timer.current_interval - Duration::from_millis(1);
        let decision = timer.request_early_feedback(near_next, &random);
        assert_eq!(decision, EarlyFeedbackDecision::Denied);
    }

    #[test]
    fn early_feedback_granted_well_before_next_report() {
        let mut timer = TransmissionTimer::new(false);
        let random = SeededRandom::new(5);
        let now = Instant::now();
        timer.on_fire(now, &fixed_snapshot(), &random);
        let decision = timer.request_early_feedback(now, &random);
        assert!(matches!(decision, EarlyFeedbackDecision::Scheduled { .. }));
    }
}
