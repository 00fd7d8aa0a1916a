//! Pausable countdown with periodic tick callbacks.
//!
//! [`CountdownTimer`] runs one countdown at a time on the tokio runtime.
//! Remaining time is always derived from the clock (`tokio::time::Instant`),
//! never from the number of ticks delivered, so pause/resume cycles do not
//! drift and the tick period is purely cosmetic.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use speech_drill::session::CountdownTimer;
//!
//! # async fn example() {
//! let timer = CountdownTimer::new();
//! timer.start(
//!     Duration::from_secs(10),
//!     |remaining| println!("{:.1}s left", remaining.as_secs_f32()),
//!     || println!("done"),
//! );
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Period between two `on_tick` callbacks.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

type TickFn = Arc<dyn Fn(Duration) + Send + Sync>;
type CompleteFn = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct TimerInner {
    /// Length of the current counting stretch (the stored remainder after a
    /// resume).
    total: Duration,
    /// `Some` while counting.
    started_at: Option<Instant>,
    /// `Some` while paused.
    paused_remaining: Option<Duration>,
    on_tick: Option<TickFn>,
    on_complete: Option<CompleteFn>,
    task: Option<JoinHandle<()>>,
    /// Bumped whenever the running task is superseded; a task whose
    /// generation no longer matches must not fire callbacks.
    generation: u64,
}

impl TimerInner {
    fn reset(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.total = Duration::ZERO;
        self.started_at = None;
        self.paused_remaining = None;
        self.on_tick = None;
        self.on_complete = None;
        self.generation = self.generation.wrapping_add(1);
    }
}

// ---------------------------------------------------------------------------
// CountdownTimer
// ---------------------------------------------------------------------------

/// A single pausable/resumable countdown.
///
/// Must be used from within a tokio runtime.
pub struct CountdownTimer {
    inner: Arc<Mutex<TimerInner>>,
}

impl Default for CountdownTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl CountdownTimer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TimerInner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TimerInner> {
        lock_inner(&self.inner)
    }

    /// Start a countdown of `duration`.
    ///
    /// Any countdown already running is discarded without firing its
    /// completion.  `on_tick(duration)` fires immediately, then roughly every
    /// [`TICK_INTERVAL`] with the remaining time; `on_complete` fires exactly
    /// once when the remaining time reaches zero, after which the timer is
    /// back in its initial state.
    pub fn start<T, C>(&self, duration: Duration, on_tick: T, on_complete: C)
    where
        T: Fn(Duration) + Send + Sync + 'static,
        C: FnOnce() + Send + 'static,
    {
        let on_tick: TickFn = Arc::new(on_tick);
        {
            let mut inner = self.lock();
            inner.reset();
            inner.total = duration;
            inner.on_tick = Some(Arc::clone(&on_tick));
            inner.on_complete = Some(Box::new(on_complete));
            spawn_countdown(&self.inner, &mut inner);
        }
        on_tick(duration);
    }

    /// Freeze the countdown.
    ///
    /// Returns `false` (and does nothing) when already paused, when no
    /// countdown is running, or when the countdown is about to complete.
    pub fn pause(&self) -> bool {
        let mut inner = self.lock();
        if inner.paused_remaining.is_some() {
            return false;
        }
        let Some(started_at) = inner.started_at else {
            return false;
        };

        let remaining = inner.total.saturating_sub(started_at.elapsed());
        if remaining.is_zero() {
            return false;
        }

        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.generation = inner.generation.wrapping_add(1);
        inner.started_at = None;
        inner.paused_remaining = Some(remaining);
        log::trace!("timer: paused with {remaining:?} remaining");
        true
    }

    /// Continue a paused countdown from the stored remaining time.
    ///
    /// Returns `false` when not paused or nothing is left to count.
    pub fn resume(&self) -> bool {
        let (remaining, on_tick) = {
            let mut inner = self.lock();
            let Some(remaining) = inner.paused_remaining else {
                return false;
            };
            if remaining.is_zero() {
                return false;
            }
            inner.total = remaining;
            spawn_countdown(&self.inner, &mut inner);
            (remaining, inner.on_tick.clone())
        };

        log::trace!("timer: resumed with {remaining:?} remaining");
        if let Some(tick) = on_tick {
            tick(remaining);
        }
        true
    }

    /// Cancel the countdown and reset all state.  Safe to call repeatedly.
    pub fn stop(&self) {
        self.lock().reset();
    }

    /// Remaining time of the running or paused countdown; zero when idle.
    pub fn remaining(&self) -> Duration {
        let inner = self.lock();
        if let Some(remaining) = inner.paused_remaining {
            return remaining;
        }
        match inner.started_at {
            Some(started_at) => inner.total.saturating_sub(started_at.elapsed()),
            None => Duration::ZERO,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().started_at.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused_remaining.is_some()
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.lock().reset();
    }
}

fn lock_inner(inner: &Mutex<TimerInner>) -> MutexGuard<'_, TimerInner> {
    // Callbacks never run under this lock, so a poisoned guard still holds
    // consistent state.
    inner.lock().unwrap_or_else(|e| e.into_inner())
}

/// Begin counting `inner.total` from now.  Caller holds the lock.
fn spawn_countdown(shared: &Arc<Mutex<TimerInner>>, inner: &mut TimerInner) {
    inner.generation = inner.generation.wrapping_add(1);
    inner.started_at = Some(Instant::now());
    inner.paused_remaining = None;

    let generation = inner.generation;
    let shared = Arc::clone(shared);
    inner.task = Some(tokio::spawn(run_countdown(shared, generation)));
}

async fn run_countdown(shared: Arc<Mutex<TimerInner>>, generation: u64) {
    loop {
        let remaining = {
            let inner = lock_inner(&shared);
            if inner.generation != generation {
                return;
            }
            match inner.started_at {
                Some(started_at) => inner.total.saturating_sub(started_at.elapsed()),
                None => return,
            }
        };

        tokio::time::sleep(remaining.min(TICK_INTERVAL)).await;

        let (remaining, on_tick, on_complete) = {
            let mut inner = lock_inner(&shared);
            if inner.generation != generation {
                return;
            }
            let Some(started_at) = inner.started_at else {
                return;
            };
            let remaining = inner.total.saturating_sub(started_at.elapsed());
            if remaining.is_zero() {
                let on_tick = inner.on_tick.take();
                let on_complete = inner.on_complete.take();
                // Detach rather than abort: this is the running task.
                inner.task = None;
                inner.reset();
                (remaining, on_tick, on_complete)
            } else {
                (remaining, inner.on_tick.clone(), None)
            }
        };

        if let Some(tick) = on_tick {
            tick(remaining);
        }
        if let Some(complete) = on_complete {
            complete();
            return;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
