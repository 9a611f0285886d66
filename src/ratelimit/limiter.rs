//! Interval-paced rate limiter.
//!
//! The limiter lets the first unit after an idle period through at once and
//! then releases at most one queued unit per timer tick:
//!
//! ```text
//!   enqueue ──► WorkLimited ──arm timer──► RateLimited ──tick, queue empty──┐
//!                    ▲                                                    │
//!                    └────────────────── disarm timer ◄──────────────────┘
//!
//!   shutdown ──► ShuttingDown (terminal; queued units delivered canceled)
//! ```
//!
//! All state lives behind one mutex. Forwarding to the task always happens
//! after the lock is released, since a task may run the unit inline or call
//! back into the limiter. A teardown requested while a tick has a unit in
//! hand is parked and posted by that tick, so it still trails the unit.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::config::LimiterConfig;
use crate::error::{PacerError, Result};
use crate::task::{Event, Task, Teardown, TeardownWait, TickCallback, Unit};
use crate::timer::{Timer, TimerError, TimerMode, TimerSource};

/// Name used when a limiter is created without configuration.
const DEFAULT_NAME: &str = "ratelimiter";

/// Where a limiter is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterState {
    /// Idle: no backlog, timer inactive.
    WorkLimited,
    /// Throttling: timer ticking, units queue until released.
    RateLimited,
    /// Terminal: no new work accepted.
    ShuttingDown,
}

impl fmt::Display for LimiterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LimiterState::WorkLimited => "work-limited",
            LimiterState::RateLimited => "rate-limited",
            LimiterState::ShuttingDown => "shutting-down",
        };
        f.write_str(s)
    }
}

/// Why [`RateLimiter::enqueue`] did not succeed cleanly.
#[derive(Debug, Error)]
pub enum EnqueueError<T> {
    /// The limiter is shutting down. The unit is handed back untouched.
    #[error("Rate limiter is shutting down")]
    ShuttingDown(Unit<T>),

    /// The unit was forwarded, but arming the timer failed, so the next
    /// unit will not be throttled either.
    #[error("Timer schedule failed: {0}")]
    TimerScheduleFailed(#[source] TimerError),
}

impl<T> EnqueueError<T> {
    /// Recover the rejected unit, if the limiter kept it from the task.
    pub fn into_unit(self) -> Option<Unit<T>> {
        match self {
            EnqueueError::ShuttingDown(unit) => Some(unit),
            EnqueueError::TimerScheduleFailed(_) => None,
        }
    }
}

impl<T> From<EnqueueError<T>> for PacerError {
    fn from(err: EnqueueError<T>) -> Self {
        match err {
            EnqueueError::ShuttingDown(_) => PacerError::ShuttingDown,
            EnqueueError::TimerScheduleFailed(e) => PacerError::TimerScheduleFailed(e),
        }
    }
}

struct Inner<T> {
    state: LimiterState,
    interval: Duration,
    pending: VecDeque<Unit<T>>,
    timer: Option<Box<dyn Timer>>,
    /// A tick has popped a unit and not yet posted it.
    releasing: bool,
    /// Teardown parked until the releasing tick has posted its unit.
    deferred_teardown: Option<Teardown>,
}

impl<T> Inner<T> {
    fn reset_timer(&mut self, mode: TimerMode) -> std::result::Result<(), TimerError> {
        match self.timer.as_mut() {
            Some(timer) => timer.reset(mode),
            None => Err(TimerError::Detached),
        }
    }
}

struct Shared<T> {
    name: String,
    task: Arc<dyn Task<T>>,
    inner: Mutex<Inner<T>>,
}

impl<T> Shared<T> {
    fn forward(&self, unit: Unit<T>) {
        self.task.post(Event::Unit(unit));
    }

    /// Release one queued unit, or go idle when there is none.
    fn tick(&self) {
        let released = {
            let mut inner = self.inner.lock();
            if inner.state == LimiterState::ShuttingDown {
                trace!(limiter = %self.name, "Ignoring tick while shutting down");
                return;
            }

            match inner.pending.pop_front() {
                Some(unit) => {
                    inner.releasing = true;
                    Some(unit)
                }
                None => {
                    if let Err(e) = inner.reset_timer(TimerMode::Inactive) {
                        warn!(limiter = %self.name, error = %e, "Failed to disarm timer");
                    }
                    inner.state = LimiterState::WorkLimited;
                    debug!(limiter = %self.name, "Backlog drained, timer disarmed");
                    None
                }
            }
        };

        if let Some(unit) = released {
            trace!(limiter = %self.name, "Releasing queued unit");
            self.forward(unit);

            // A teardown requested while the unit was in hand goes out behind it.
            let deferred = {
                let mut inner = self.inner.lock();
                inner.releasing = false;
                inner.deferred_teardown.take()
            };
            if let Some(teardown) = deferred {
                debug!(limiter = %self.name, "Rate limiter teardown posted after release");
                self.task.post(Event::Teardown(teardown));
            }
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let pending = self.inner.get_mut().pending.len();
        if pending > 0 {
            warn!(
                limiter = %self.name,
                pending = pending,
                "Rate limiter released with undelivered units"
            );
        }
        trace!(limiter = %self.name, "Rate limiter state released");
    }
}

/// Paces units of work onto a [`Task`].
///
/// The limiter is `Send + Sync`; share it behind an [`Arc`] to submit from
/// several threads. [`RateLimiter::destroy`] consumes the limiter, so reclaim
/// sole ownership (e.g. with [`Arc::try_unwrap`]) before tearing it down.
pub struct RateLimiter<T> {
    shared: Arc<Shared<T>>,
    teardown: Teardown,
    teardown_wait: TeardownWait,
}

impl<T: Send + 'static> RateLimiter<T> {
    /// Create an idle limiter that posts to `task`, registering its timer
    /// with `timers`.
    pub fn create<S>(timers: &S, task: Arc<dyn Task<T>>, interval: Duration) -> Result<Self>
    where
        S: TimerSource<T> + ?Sized,
    {
        Self::build(DEFAULT_NAME.to_string(), timers, task, interval)
    }

    /// Create a limiter named and paced according to `config`.
    pub fn from_config<S>(
        config: &LimiterConfig,
        timers: &S,
        task: Arc<dyn Task<T>>,
    ) -> Result<Self>
    where
        S: TimerSource<T> + ?Sized,
    {
        Self::build(config.name.clone(), timers, task, config.interval())
    }

    fn build<S>(name: String, timers: &S, task: Arc<dyn Task<T>>, interval: Duration) -> Result<Self>
    where
        S: TimerSource<T> + ?Sized,
    {
        let shared = Arc::new(Shared {
            name,
            task: Arc::clone(&task),
            inner: Mutex::new(Inner {
                state: LimiterState::WorkLimited,
                interval,
                pending: VecDeque::new(),
                timer: None,
                releasing: false,
                deferred_teardown: None,
            }),
        });

        // Ticks only hold a weak reference; the last strong one is released
        // by the teardown sentinel on the task itself.
        let weak: Weak<Shared<T>> = Arc::downgrade(&shared);
        let callback: TickCallback = Arc::new(move || {
            if let Some(shared) = weak.upgrade() {
                shared.tick();
            }
        });

        let timer = timers.create(task, callback).map_err(|e| {
            warn!(limiter = %shared.name, error = %e, "Failed to register rate limiter timer");
            PacerError::ResourceExhausted(e)
        })?;
        shared.inner.lock().timer = Some(timer);

        let (teardown, teardown_wait) = Teardown::new();
        debug!(
            limiter = %shared.name,
            interval = ?interval,
            "Rate limiter created"
        );

        Ok(Self {
            shared,
            teardown,
            teardown_wait,
        })
    }

    /// Change the pacing interval.
    ///
    /// The interval is stored even if re-arming a running timer fails; the
    /// error is returned and the state is left as it was.
    pub fn set_interval(&self, interval: Duration) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        inner.interval = interval;
        if inner.state != LimiterState::RateLimited {
            return Ok(());
        }

        inner
            .reset_timer(TimerMode::Periodic(interval))
            .map_err(|e| {
                warn!(limiter = %self.shared.name, error = %e, "Failed to re-arm timer");
                PacerError::TimerScheduleFailed(e)
            })?;
        debug!(
            limiter = %self.shared.name,
            interval = ?interval,
            "Timer re-armed at new interval"
        );
        Ok(())
    }

    /// Submit a unit.
    ///
    /// When idle the unit is forwarded at once and throttling starts; while
    /// throttling it is queued behind earlier units.
    pub fn enqueue(&self, unit: Unit<T>) -> std::result::Result<(), EnqueueError<T>> {
        let mut result = Ok(());
        let immediate = {
            let mut inner = self.shared.inner.lock();
            let state = inner.state;
            match state {
                LimiterState::ShuttingDown => {
                    trace!(limiter = %self.shared.name, "Rejecting unit while shutting down");
                    return Err(EnqueueError::ShuttingDown(unit));
                }
                LimiterState::RateLimited => {
                    inner.pending.push_back(unit);
                    trace!(
                        limiter = %self.shared.name,
                        pending = inner.pending.len(),
                        "Unit queued"
                    );
                    None
                }
                LimiterState::WorkLimited => {
                    let interval = inner.interval;
                    match inner.reset_timer(TimerMode::Periodic(interval)) {
                        Ok(()) => {
                            inner.state = LimiterState::RateLimited;
                            debug!(
                                limiter = %self.shared.name,
                                interval = ?interval,
                                "Timer armed, throttling"
                            );
                        }
                        Err(e) => {
                            warn!(
                                limiter = %self.shared.name,
                                error = %e,
                                "Failed to arm timer, forwarding unthrottled"
                            );
                            result = Err(EnqueueError::TimerScheduleFailed(e));
                        }
                    }
                    Some(unit)
                }
            }
        };

        if let Some(unit) = immediate {
            trace!(limiter = %self.shared.name, "Forwarding unit immediately");
            self.shared.forward(unit);
        }
        result
    }

    /// Stop accepting work and deliver every queued unit, marked canceled,
    /// in submission order. Calling it again has no further effect.
    pub fn shutdown(&self) {
        let drained = {
            let mut inner = self.shared.inner.lock();
            if inner.state != LimiterState::ShuttingDown {
                debug!(
                    limiter = %self.shared.name,
                    pending = inner.pending.len(),
                    "Rate limiter shutting down"
                );
            }
            inner.state = LimiterState::ShuttingDown;
            if let Err(e) = inner.reset_timer(TimerMode::Inactive) {
                debug!(limiter = %self.shared.name, error = %e, "Failed to disarm timer on shutdown");
            }

            let mut drained = std::mem::take(&mut inner.pending);
            for unit in drained.iter_mut() {
                unit.cancel();
            }
            drained
        };

        for unit in drained {
            self.shared.forward(unit);
        }
    }

    /// Release the timer and hand the limiter's state to the task for
    /// release behind everything already posted to it.
    ///
    /// Call [`RateLimiter::shutdown`] first: units still queued here are
    /// dropped with the state, not delivered. The returned handle resolves
    /// once the task has processed the teardown.
    pub fn destroy(self) -> TeardownWait {
        let RateLimiter {
            shared,
            mut teardown,
            teardown_wait,
        } = self;

        let timer = shared.inner.lock().timer.take();
        if let Some(timer) = timer {
            timer.detach();
        }

        let task = Arc::clone(&shared.task);
        teardown.retain(Box::new(Arc::clone(&shared)));

        let mut inner = shared.inner.lock();
        if inner.releasing {
            debug!(limiter = %shared.name, "Rate limiter teardown deferred behind a released unit");
            inner.deferred_teardown = Some(teardown);
            return teardown_wait;
        }
        drop(inner);

        debug!(limiter = %shared.name, "Rate limiter teardown posted");
        task.post(Event::Teardown(teardown));
        teardown_wait
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LimiterState {
        self.shared.inner.lock().state
    }

    /// Currently configured interval.
    pub fn interval(&self) -> Duration {
        self.shared.inner.lock().interval
    }

    /// Number of units waiting for a tick.
    pub fn pending_len(&self) -> usize {
        self.shared.inner.lock().pending.len()
    }

    /// The name this limiter logs under.
    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

impl<T> fmt::Debug for RateLimiter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("RateLimiter")
            .field("name", &self.shared.name)
            .field("state", &inner.state)
            .field("interval", &inner.interval)
            .field("pending", &inner.pending.len())
            .finish()
    }
}
