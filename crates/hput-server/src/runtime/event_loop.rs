//! Cooperative timer scheduler for one execution.
//!
//! Every execution context owns exactly one [`EventLoop`]. Nothing else ever
//! touches it, so it needs no cross-thread synchronisation; its job is to
//! fire timers earliest-deadline-first and to stop at the execution deadline.
//!
//! The loop is generic over the callback type so its ordering rules can be
//! tested without a JavaScript engine, and it reads time through a [`Clock`]
//! so tests can use a [`ManualClock`] instead of sleeping.
//!
//! # Draining
//!
//! [`drain`] takes the loop by `&RefCell` rather than `&mut` because the
//! callbacks it fires may call back into the loop (`setTimeout` inside a
//! timer). The borrow is released before each callback runs.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Handle returned to scripts by `setTimeout` / `setInterval`. Never zero.
pub type TimerId = u32;

/// Source of time for deadlines and timer scheduling.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Virtual time that only moves when something sleeps or calls
/// [`ManualClock::advance`].
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, duration: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += duration;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.lock().map(|now| *now).unwrap_or_else(|e| *e.into_inner())
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[derive(Debug)]
struct PendingTimer<C> {
    callback: C,
    fire_at: Instant,
    /// `None` for one-shot timers.
    interval: Option<Duration>,
}

/// What the loop wants to do next.
enum Step<C> {
    Idle,
    WaitUntil(Instant),
    Fire(C),
}

/// How a [`drain`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// No timers remain.
    Idle,
    /// The next timer is not due before the deadline (or the deadline passed).
    Deadline,
    /// The caller's stop condition became true.
    Stopped,
}

/// Pending timers of one execution context.
pub struct EventLoop<C> {
    timers: BTreeMap<TimerId, PendingTimer<C>>,
    next_id: TimerId,
    clock: Arc<dyn Clock>,
}

impl<C: Clone> EventLoop<C> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            timers: BTreeMap::new(),
            next_id: 0,
            clock,
        }
    }

    /// Schedules `callback` to fire once, `delay` from now.
    pub fn set_timeout(&mut self, callback: C, delay: Duration) -> TimerId {
        self.schedule(callback, delay, None)
    }

    /// Schedules `callback` to fire every `interval`, first `interval` from now.
    pub fn set_interval(&mut self, callback: C, interval: Duration) -> TimerId {
        self.schedule(callback, interval, Some(interval))
    }

    fn schedule(&mut self, callback: C, delay: Duration, interval: Option<Duration>) -> TimerId {
        self.next_id = self.next_id.wrapping_add(1).max(1);
        let id = self.next_id;
        self.timers.insert(
            id,
            PendingTimer {
                callback,
                fire_at: self.clock.now() + delay,
                interval,
            },
        );
        id
    }

    /// Removes a timer. Returns whether it was still pending.
    pub fn clear(&mut self, id: TimerId) -> bool {
        self.timers.remove(&id).is_some()
    }

    /// Drops every pending timer and the callbacks they hold.
    pub fn clear_all(&mut self) {
        self.timers.clear();
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Claims the earliest due timer, if any. One-shot timers are removed and
    /// intervals are rescheduled before the callback is handed out, so a slow
    /// callback cannot make an interval fire more than once per step.
    fn step(&mut self) -> Step<C> {
        let now = self.clock.now();
        let Some((&id, next)) = self
            .timers
            .iter()
            .min_by_key(|(id, timer)| (timer.fire_at, **id))
        else {
            return Step::Idle;
        };
        if next.fire_at > now {
            return Step::WaitUntil(next.fire_at);
        }
        match next.interval {
            Some(interval) => match self.timers.get_mut(&id) {
                Some(timer) => {
                    timer.fire_at = now + interval;
                    Step::Fire(timer.callback.clone())
                }
                None => Step::Idle,
            },
            None => match self.timers.remove(&id) {
                Some(timer) => Step::Fire(timer.callback),
                None => Step::Idle,
            },
        }
    }
}

/// Fires due timers until none remain, `deadline` is reached, or `stop`
/// returns true.
///
/// `stop` is checked before every step. `fire` runs with the loop unborrowed
/// and is expected to perform the microtask checkpoint for the callback it
/// ran. The loop never sleeps past `deadline`: when the next timer is due
/// after it, `drain` returns [`DrainOutcome::Deadline`] straight away.
pub fn drain<C: Clone>(
    event_loop: &RefCell<EventLoop<C>>,
    deadline: Instant,
    mut fire: impl FnMut(C),
    mut stop: impl FnMut() -> bool,
) -> DrainOutcome {
    let clock = event_loop.borrow().clock();
    loop {
        if stop() {
            return DrainOutcome::Stopped;
        }
        if event_loop.borrow().is_empty() {
            return DrainOutcome::Idle;
        }
        let now = clock.now();
        if now >= deadline {
            return DrainOutcome::Deadline;
        }
        let step = event_loop.borrow_mut().step();
        match step {
            Step::Idle => return DrainOutcome::Idle,
            Step::WaitUntil(at) if at > deadline => return DrainOutcome::Deadline,
            // Re-enter the loop after sleeping so a timer cleared meanwhile
            // is not fired.
            Step::WaitUntil(at) => clock.sleep(at.saturating_duration_since(now)),
            Step::Fire(callback) => fire(callback),
        }
    }
}
