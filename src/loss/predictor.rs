//! Loss predictors (spec.md §4.5): declare a sequence number lost before the
//! jitter buffer would discard it anyway. Three variants, selected at
//! construction, replacing the predictor class hierarchy of the C++
//! ancestor with one trait and three structs.
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

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::time::Instant;

/// One of the two outbound events a predictor emits (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorEvent {
    /// `packet_assumed_lost(sn)` — declare the sequence number lost.
    AssumedLost(u32),
    /// `packet_was_late(sn)` — a previously-assumed-lost SN arrived after all.
    WasLate(u32),
}

/// Result of feeding the predictor an RTX (retransmitted) arrival.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtxArrival {
    pub late: bool,
    pub duplicate: bool,
}

/// Common callback contract every predictor implements (spec.md §4.5).
/// Sequence numbers here are the session's *extended* (32-bit) sequence
/// numbers, so the predictor never has to reason about 16-bit wraparound.
pub trait Predictor: std::fmt::Debug + Send {
    fn on_packet_arrival(&mut self, now: Instant, sn: u32) -> Vec<PredictorEvent>;
    fn on_rtx_packet_arrival(&mut self, now: Instant, original_sn: u32) -> RtxArrival;
    fn on_rtx_requested(&mut self, now: Instant, sn: u32);
    /// Time-driven half: called periodically (or from a deadline timer) to
    /// let time-based predictors declare losses without a new arrival.
    fn check_timeouts(&mut self, now: Instant) -> Vec<PredictorEvent>;
}

/// Declares SN `k` lost the moment a packet with `SN > k + gap_threshold` arrives.
#[derive(Debug)]
pub struct SimplePredictor {
    gap_threshold: u32,
    highest_seen: Option<u32>,
    pending: BTreeSet<u32>,
    assumed_lost: HashSet<u32>,
    rtx_requested: HashSet<u32>,
}

impl SimplePredictor {
    pub fn new(gap_threshold: u32) -> Self {
        SimplePredictor {
            gap_threshold,
            highest_seen: None,
            pending: BTreeSet::new(),
            assumed_lost: HashSet::new(),
            rtx_requested: HashSet::new(),
        }
    }
}

impl Predictor for SimplePredictor {
    fn on_packet_arrival(&mut self, _now: Instant, sn: u32) -> Vec<PredictorEvent> {
        let mut events = Vec::new();

        match self.highest_seen {
            None => self.highest_seen = Some(sn),
            Some(highest) if sn > highest => {
                for missing in (highest + 1)..sn {
                    self.pending.insert(missing);
                }
                self.highest_seen = Some(sn);
            }
            Some(_) => {
                self.pending.remove(&sn);
                if self.assumed_lost.remove(&sn) {
                    events.push(PredictorEvent::WasLate(sn));
                }
            }
        }

        if let Some(highest) = self.highest_seen {
            let ready: Vec<u32> = self
                .pending
                .iter()
                .copied()
                .take_while(|&k| highest >= k + self.gap_threshold)
                .collect();
            for k in ready {
                self.pending.remove(&k);
                self.assumed_lost.insert(k);
                events.push(PredictorEvent::AssumedLost(k));
            }
        }

        events
    }

    fn on_rtx_packet_arrival(&mut self, _now: Instant, original_sn: u32) -> RtxArrival {
        let was_assumed_lost = self.assumed_lost.remove(&original_sn);
        RtxArrival {
            late: !was_assumed_lost,
            duplicate: !self.pending.contains(&original_sn) && !was_assumed_lost && self.highest_seen.map_or(false, |h| original_sn <= h),
        }
    }

    fn on_rtx_requested(&mut self, _now: Instant, sn: u32) {
        self.rtx_requested.insert(sn);
    }

    fn check_timeouts(&mut self, _now: Instant) -> Vec<PredictorEvent> {
        // Gap-threshold based: resolved entirely inside on_packet_arrival.
        Vec::new()
    }
}

/// Shared timing-window machinery for the moving-average and AR(2) predictors:
/// both declare a pending gap lost once elapsed time exceeds `mean + z * sigma`
/// of recent inter-arrival deltas, where `z = Phi^-1(1 - p_premature)`.
#[derive(Debug)]
struct TimingWindow {
    deltas: VecDeque<f64>,
    window_size: usize,
    last_arrival: Option<Instant>,
    z_score: f64,
    /// Sequence number -> time the gap was first observed.
    pending: std::collections::BTreeMap<u32, Instant>,
    assumed_lost: HashSet<u32>,
    highest_seen: Option<u32>,
}

impl TimingWindow {
    fn new(window_size: usize, premature_timeout_prob: f64) -> Self {
        TimingWindow {
            deltas: VecDeque::with_capacity(window_size),
            window_size,
            last_arrival: None,
            z_score: inverse_normal_cdf(1.0 - premature_timeout_prob),
            pending: std::collections::BTreeMap::new(),
            assumed_lost: HashSet::new(),
            highest_seen: None,
        }
    }

    fn record_delta(&mut self, now: Instant) {
        if let Some(last) = self.last_arrival {
            self.deltas.push_back(now.duration_since(last).as_secs_f64());
            if self.deltas.len() > self.window_size {
                self.deltas.pop_front();
            }
        }
        self.last_arrival = Some(now);
    }

    fn mean_and_std(&self) -> (f64, f64) {
        if self.deltas.is_empty() {
            return (0.0, 0.0);
        }
        let n = self.deltas.len() as f64;
        let mean = self.deltas.iter().sum::<f64>() / n;
        let variance = self
            .deltas
            .iter()
            .map(|&d| (d - mean).powi(2))
            .sum::<f64>()
            / n;
        (mean, variance.sqrt())
    }

    fn timeout_secs(&self) -> f64 {
        let (mean, std) = self.mean_and_std();
        (mean + self.z_score * std).max(0.0)
    }

    fn on_arrival(&mut self, now: Instant, sn: u32) -> Vec<PredictorEvent> {
        let mut events = Vec::new();
        self.record_delta(now);

        match self.highest_seen {
            None => self.highest_seen = Some(sn),
            Some(highest) if sn > highest => {
                for missing in (highest + 1)..sn {
                    self.pending.insert(missing, now);
                }
                self.highest_seen = Some(sn);
            }
            Some(_) => {
                self.pending.remove(&sn);
                if self.assumed_lost.remove(&sn) {
                    events.push(PredictorEvent::WasLate(sn));
                }
            }
        }

        events
    }

    fn check_timeouts(&mut self, now: Instant) -> Vec<PredictorEvent> {
        let timeout = self.timeout_secs();
        let mut events = Vec::new();
        let ready: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, &started)| now.duration_since(started).as_secs_f64() >= timeout)
            .map(|(&sn, _)| sn)
            .collect();
        for sn in ready {
            self.pending.remove(&sn);
            self.assumed_lost.insert(sn);
            events.push(PredictorEvent::AssumedLost(sn));
        }
        events
    }

    fn on_rtx_arrival(&mut self, original_sn: u32) -> RtxArrival {
        let was_assumed_lost = self.assumed_lost.remove(&original_sn);
        RtxArrival {
            late: !was_assumed_lost,
            duplicate: false,
        }
    }
}

/// Sliding-window mean/variance predictor.
#[derive(Debug)]
pub struct MovingAveragePredictor {
    window: TimingWindow,
}

impl MovingAveragePredictor {
    pub fn new(window_size: usize, premature_timeout_prob: f64) -> Self {
        MovingAveragePredictor {
            window: TimingWindow::new(window_size, premature_timeout_prob),
        }
    }
}

impl Predictor for MovingAveragePredictor {
    fn on_packet_arrival(&mut self, now: Instant, sn: u32) -> Vec<PredictorEvent> {
        self.window.on_arrival(now, sn)
    }

    fn on_rtx_packet_arrival(&mut self, _now: Instant, original_sn: u32) -> RtxArrival {
        self.window.on_rtx_arrival(original_sn)
    }

    fn on_rtx_requested(&mut self, _now: Instant, _sn: u32) {}

    fn check_timeouts(&mut self, now: Instant) -> Vec<PredictorEvent> {
        self.window.check_timeouts(now)
    }
}

/// Second-order autoregressive predictor: extrapolates the next expected
/// inter-arrival delta from the last two observed deltas, then applies the
/// same premature-timeout tail as the moving-average predictor.
#[derive(Debug)]
pub struct Ar2Predictor {
    window: TimingWindow,
    last_two_deltas: VecDeque<f64>,
}

impl Ar2Predictor {
    pub fn new(premature_timeout_prob: f64) -> Self {
        Ar2Predictor {
            window: TimingWindow::new(16, premature_timeout_prob),
            last_two_deltas: VecDeque::with_capacity(2),
        }
    }

    /// AR(2) linear extrapolation: `d_hat = 2*d_{n-1} - d_{n-2}`.
    fn extrapolated_mean(&self) -> Option<f64> {
        if self.last_two_deltas.len() < 2 {
            return None;
        }
        let d2 = self.last_two_deltas[0];
        let d1 = self.last_two_deltas[1];
        Some((2.0 * d1 - d2).max(0.0))
    }
}

impl Predictor for Ar2Predictor {
    fn on_packet_arrival(&mut self, now: Instant, sn: u32) -> Vec<PredictorEvent> {
        if let Some(last) = self.window.last_arrival {
            let delta = now.duration_since(last).as_secs_f64();
            if self.last_two_deltas.len() == 2 {
                self.last_two_deltas.pop_front();
            }
            self.last_two_deltas.push_back(delta);
        }
        self.window.on_arrival(now, sn)
    }

    fn on_rtx_packet_arrival(&mut self, _now: Instant, original_sn: u32) -> RtxArrival {
        self.window.on_rtx_arrival(original_sn)
    }

    fn on_rtx_requested(&mut self, _now: Instant, _sn: u32) {}

    fn check_timeouts(&mut self, now: Instant) -> Vec<PredictorEvent> {
        // Blend the AR(2) extrapolation in when available; otherwise fall
        // back to the plain moving-average timeout.
        if let Some(mean) = self.extrapolated_mean() {
            let (_, std) = self.window.mean_and_std();
            let timeout = (mean + self.window.z_score * std).max(0.0);
            let mut events = Vec::new();
            let ready: Vec<u32> = self
                .window
                .pending
                .iter()
                .filter(|(_, &started)| now.duration_since(started).as_secs_f64() >= timeout)
                .map(|(&sn, _)| sn)
                .collect();
            for sn in ready {
                self.window.pending.remove(&sn);
                self.window.assumed_lost.insert(sn);
                events.push(PredictorEvent::AssumedLost(sn));
            }
            events
        } else {
            self.window.check_timeouts(now)
        }
    }
}

/// Rational approximation of the inverse standard-normal CDF (Acklam's
/// algorithm), accurate to ~1.15e-9 — plenty for a timeout tail quantile.
fn inverse_normal_cdf(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];

    const P_LOW: f64 = 0.02425;
    let p_high = 1.0 - P_LOW;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= p_high {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn simple_predictor_declares_loss_past_gap_threshold() {
        let mut predictor = SimplePredictor::new(2);
        let t0 = Instant::now();
        predictor.on_packet_arrival(t0, 1);
        let events = predictor.on_packet_arrival(t0, 4); // gap at 2,3; 4 - 2 = 2 >= threshold
        assert!(events.contains(&PredictorEvent::AssumedLost(2)));
    }

    #[test]
    fn simple_predictor_reports_late_arrival() {
        let mut predictor = SimplePredictor::new(1);
        let t0 = Instant::now();
        predictor.on_packet_arrival(t0, 1);
        let events = predictor.on_packet_arrival(t0, 3); // declares 2 lost
        assert!(events.contains(&PredictorEvent::AssumedLost(2)));
        let events = predictor.on_packet_arrival(t0, 2); // 2 arrives late
        assert!(events.contains(&PredictorEvent::WasLate(2)));
    }

    #[test]
    fn inverse_normal_cdf_matches_known_quantiles() {
        assert!((inverse_normal_cdf(0.5)).abs() < 1e-6);
        assert!((inverse_normal_cdf(0.975) - 1.959964).abs() < 1e-4);
    }

    #[test]
    fn moving_average_predictor_times_out_a_stale_gap() {
        let mut predictor = MovingAveragePredictor::new(8, 0.5); // z ~ 0 at p=0.5
        let t0 = Instant::now();
        for i in 0..5u32 {
            predictor.on_packet_arrival(t0 + Duration::from_millis(i as u64 * 20), i);
        }
        // Gap: sn 5 never arrives; sn 6 arrives much later.
        predictor.on_packet_arrival(t0 + Duration::from_millis(100), 6);
        let events = predictor.check_timeouts(t0 + Duration::from_millis(500));
        assert!(events.contains(&PredictorEvent::AssumedLost(5)));
    }
}
