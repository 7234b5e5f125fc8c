//! Process-wide embassy-time driver with an adjustable replay speed.
//!
//! Virtual time advances at `speed_percent / 100` times wall-clock time. Trace
//! clocks and driver poll timers read this virtual time, so raising the speed
//! replays a capture faster without touching any timestamps.
//!
//! Wakers are kept in a deadline-ordered map and fired by a dedicated
//! `replay-time-scheduler` thread.

use core::task::Waker;
use embassy_time_driver::{Driver, TICK_HZ, time_driver_impl};
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant as StdInstant};

/// Q32.32 fixed point representation of 1.0.
const SCALE_ONE: u64 = 1u64 << 32;

pub const MIN_SPEED_PERCENT: u32 = 1;
pub const MAX_SPEED_PERCENT: u32 = 1000;

/// Upper bound on a single scheduler wait so speed changes take effect promptly.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(25);

#[derive(Debug)]
struct ReplayClock {
    /// Host instant at which `virtual_origin` was valid.
    real_origin: StdInstant,
    /// Virtual tick count at `real_origin`.
    virtual_origin: u64,
    /// Virtual ticks per real tick in Q32.32.
    scale: u64,
    /// Speed as last requested, kept to avoid fixed-point round trips.
    speed_percent: u32,
}

impl ReplayClock {
    fn to_virtual(&self, real: StdInstant) -> u64 {
        let real_ticks = nanos_to_ticks(real.saturating_duration_since(self.real_origin).as_nanos());
        let scaled = (real_ticks as u128 * self.scale as u128 / SCALE_ONE as u128) as u64;
        self.virtual_origin.wrapping_add(scaled)
    }

    fn to_real(&self, virtual_ticks: u64) -> StdInstant {
        // Deadlines before the origin are already due.
        let Some(virtual_delta) = virtual_ticks.checked_sub(self.virtual_origin) else {
            return self.real_origin;
        };
        let real_ticks = virtual_delta as u128 * SCALE_ONE as u128 / self.scale as u128;
        self.real_origin
            .checked_add(ticks_to_duration(real_ticks))
            .unwrap_or_else(|| StdInstant::now() + MAX_WAIT_SLICE)
    }
}

#[derive(Default)]
struct WakeQueue {
    deadlines: BTreeMap<u64, Vec<Waker>>,
}

static CLOCK: OnceLock<Mutex<ReplayClock>> = OnceLock::new();
static QUEUE: OnceLock<Mutex<WakeQueue>> = OnceLock::new();
static QUEUE_CHANGED: OnceLock<Condvar> = OnceLock::new();
static SCHEDULER: OnceLock<()> = OnceLock::new();

/// Serialises tests that change the global replay speed or depend on its value.
#[cfg(test)]
pub(crate) static CLOCK_TEST_GUARD: Mutex<()> = Mutex::new(());

fn nanos_to_ticks(nanos: u128) -> u64 {
    (nanos * TICK_HZ as u128 / 1_000_000_000u128) as u64
}

fn ticks_to_duration(ticks: u128) -> Duration {
    let nanos = ticks * 1_000_000_000u128 / TICK_HZ as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

fn clock() -> MutexGuard<'static, ReplayClock> {
    CLOCK
        .get_or_init(|| {
            Mutex::new(ReplayClock {
                real_origin: StdInstant::now(),
                virtual_origin: 0,
                scale: SCALE_ONE,
                speed_percent: 100,
            })
        })
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn queue() -> MutexGuard<'static, WakeQueue> {
    QUEUE.get_or_init(|| Mutex::new(WakeQueue::default())).lock().unwrap_or_else(PoisonError::into_inner)
}

fn queue_changed() -> &'static Condvar {
    QUEUE_CHANGED.get_or_init(Condvar::new)
}

fn ensure_scheduler() {
    SCHEDULER.get_or_init(|| {
        if let Err(err) = std::thread::Builder::new().name("replay-time-scheduler".into()).spawn(run_scheduler) {
            log::error!("Failed to start replay time scheduler: {}", err);
        }
    });
}

fn run_scheduler() {
    loop {
        // Never touch CLOCK while QUEUE is held: speed changes take them in the other order.
        let next_deadline = {
            let mut guard = queue();
            loop {
                if let Some((&deadline, _)) = guard.deadlines.iter().next() {
                    break deadline;
                }
                guard = queue_changed().wait(guard).unwrap_or_else(PoisonError::into_inner);
            }
        };

        let real_deadline = clock().to_real(next_deadline);
        let now = StdInstant::now();
        if real_deadline > now {
            let wait = (real_deadline - now).min(MAX_WAIT_SLICE);
            let guard = queue();
            let _ = queue_changed().wait_timeout(guard, wait).unwrap_or_else(PoisonError::into_inner);
            continue;
        }

        let virtual_now = clock().to_virtual(StdInstant::now());
        let mut due = Vec::new();
        {
            let mut guard = queue();
            let later = guard.deadlines.split_off(&virtual_now.saturating_add(1));
            let expired = std::mem::replace(&mut guard.deadlines, later);
            for wakers in expired.into_values() {
                due.extend(wakers);
            }
        }
        for waker in due {
            waker.wake();
        }
    }
}

struct ReplayTimeDriver;

impl Driver for ReplayTimeDriver {
    fn now(&self) -> u64 {
        clock().to_virtual(StdInstant::now())
    }

    fn schedule_wake(&self, at: u64, waker: &Waker) {
        ensure_scheduler();
        queue().deadlines.entry(at).or_default().push(waker.clone());
        queue_changed().notify_all();
    }
}

time_driver_impl!(static DRIVER: ReplayTimeDriver = ReplayTimeDriver);

/// Set the replay speed as a percentage of real time (clamped to 1..=1000).
///
/// The virtual "now" is continuous across the change; only the rate at which
/// it advances from here on is affected.
pub fn set_replay_speed_percent(percent: u32) {
    let percent = percent.clamp(MIN_SPEED_PERCENT, MAX_SPEED_PERCENT);
    {
        let mut clock = clock();
        if clock.speed_percent == percent {
            return;
        }
        let now = StdInstant::now();
        // Rebase at "now" so already-scheduled deadlines keep their virtual meaning.
        clock.virtual_origin = clock.to_virtual(now);
        clock.real_origin = now;
        clock.scale = (percent as u128 * SCALE_ONE as u128 / 100) as u64;
        clock.speed_percent = percent;
    }
    // Wake the scheduler so it recomputes the real time of its next deadline.
    drop(queue());
    queue_changed().notify_all();
    log::debug!("Replay speed set to {}%", percent);
}

pub fn replay_speed_percent() -> u32 {
    clock().speed_percent
}
