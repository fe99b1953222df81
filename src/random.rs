//! Random-number injection, replacing a process-global singleton with a
//! trait object supplied at construction (spec design note, §9).
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

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

/// Source of randomness for SSRC/sequence-number initialisation and RTCP
/// reconsideration jitter. Tests inject [`SeededRandom`] for reproducible
/// runs; production code uses [`StdRandom`].
pub trait RandomSource: Send + Sync {
    fn next_u32(&self) -> u32;
    fn next_u16(&self) -> u16;
    /// Uniform float in `[low, high)`.
    fn uniform(&self, low: f64, high: f64) -> f64;
}

/// Thread-safe wrapper over the OS RNG.
#[derive(Default)]
pub struct StdRandom;

impl RandomSource for StdRandom {
    fn next_u32(&self) -> u32 {
        rand::thread_rng().gen()
    }

    fn next_u16(&self) -> u16 {
        rand::thread_rng().gen()
    }

    fn uniform(&self, low: f64, high: f64) -> f64 {
        rand::thread_rng().gen_range(low..high)
    }
}

/// Deterministic RNG for tests: same seed, same sequence, every run.
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        SeededRandom {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_u32(&self) -> u32 {
        self.rng.lock().unwrap().gen()
    }

    fn next_u16(&self) -> u16 {
        self.rng.lock().unwrap().gen()
    }

    fn uniform(&self, low: f64, high: f64) -> f64 {
        self.rng.lock().unwrap().gen_range(low..high)
    }
}
