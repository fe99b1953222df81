//! Single-threaded cooperative event loop contract (spec.md §5).
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

use std::collections::BinaryHeap;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Opaque handle to a scheduled timer; cancel it with [`EventLoop::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// The two primitives core components use to schedule work on the loop
/// (spec.md §5): immediate dispatch and deferred dispatch with cancellation.
/// The core never spawns threads; every callback it schedules runs on
/// whatever thread drives this loop.
pub trait EventLoop {
    fn post(&self, work: Box<dyn FnOnce() + Send>);
    fn deadline_timer(&self, delay: Duration, work: Box<dyn FnOnce() + Send>) -> TimerHandle;
    fn cancel(&self, handle: TimerHandle);
}

struct ScheduledTimer {
    handle: TimerHandle,
    fire_at: Instant,
    work: Option<Box<dyn FnOnce() + Send>>,
}

impl PartialEq for ScheduledTimer {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at
    }
}
impl Eq for ScheduledTimer {}
impl PartialOrd for ScheduledTimer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScheduledTimer {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline sorts first.
        other.fire_at.cmp(&self.fire_at)
    }
}

/// In-process test double for [`EventLoop`]: `post` runs immediately,
/// timers are driven explicitly via [`LocalLoop::advance`] rather than wall
/// clock, so tests are deterministic.
pub struct LocalLoop {
    next_id: AtomicU64,
    timers: Mutex<BinaryHeap<ScheduledTimer>>,
    now: Mutex<Instant>,
}

impl LocalLoop {
    pub fn new(start: Instant) -> Self {
        LocalLoop {
            next_id: AtomicU64::new(1),
            timers: Mutex::new(BinaryHeap::new()),
            now: Mutex::new(start),
        }
    }

    pub fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }

    /// Advance simulated time by `delta`, firing (and removing) any timer
    /// whose deadline has now passed, oldest first.
    pub fn advance(&self, delta: Duration) {
        let target = {
            let mut now = self.now.lock().unwrap();
            *now += delta;
            *now
        };

        loop {
            let due = {
                let mut timers = self.timers.lock().unwrap();
                match timers.peek() {
                    Some(t) if t.fire_at <= target => timers.pop(),
                    _ => None,
                }
            };
            match due {
                Some(mut timer) => {
                    if let Some(work) = timer.work.take() {
                        work();
                    }
                }
                None => break,
            }
        }
    }

    pub fn pending_timer_count(&self) -> usize {
        self.timers.lock().unwrap().len()
    }
}

impl EventLoop for LocalLoop {
    fn post(&self, work: Box<dyn FnOnce() + Send>) {
        work();
    }

    fn deadline_timer(&self, delay: Duration, work: Box<dyn FnOnce() + Send>) -> TimerHandle {
        let id = self.next_id.fetch_add(1, AtomicOrdering::Relaxed);
        let handle = TimerHandle(id);
        let fire_at = self.now() + delay;
        self.timers.lock().unwrap().push(ScheduledTimer {
            handle,
            fire_at,
            work: Some(work),
        });
        handle
    }

    fn cancel(&self, handle: TimerHandle) {
        let mut timers = self.timers.lock().unwrap();
        timers.retain(|t| t.handle != handle);
    }
}

impl PartialEq for TimerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn post_runs_immediately() {
        let loop_ = LocalLoop::new(Instant::now());
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        loop_.post(Box::new(move || ran_clone.store(true, AtomicOrdering::SeqCst)));
        assert!(ran.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn timer_fires_once_deadline_is_reached() {
        let loop_ = LocalLoop::new(Instant::now());
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        loop_.deadline_timer(Duration::from_millis(100), Box::new(move || ran_clone.store(true, AtomicOrdering::SeqCst)));
        loop_.advance(Duration::from_millis(50));
        assert!(!ran.load(AtomicOrdering::SeqCst));
        loop_.advance(Duration::from_millis(60));
        assert!(ran.load(AtomicOrdering::SeqCst));
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let loop_ = LocalLoop::new(Instant::now());
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let handle = loop_.deadline_timer(Duration::from_millis(10), Box::new(move || ran_clone.store(true, AtomicOrdering::SeqCst)));
        loop_.cancel(handle);
        loop_.advance(Duration::from_millis(50));
        assert!(!ran.load(AtomicOrdering::SeqCst));
    }
}
