//! Timer interface.
//!
//! A timer is bound to one task and one callback. When active it posts
//! [`Event::Tick`](crate::task::Event::Tick) into the task's inbox at a fixed
//! cadence; it never invokes the callback itself.

mod interval;

pub use interval::{IntervalTimer, IntervalTimerSource};

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::task::{Task, TickCallback};

/// Errors reported by timer implementations.
#[derive(Debug, Error)]
pub enum TimerError {
    /// A periodic timer needs a non-zero period.
    #[error("periodic timer requires a non-zero interval")]
    ZeroInterval,

    /// No async runtime was available to drive the timer.
    #[error("no tokio runtime available to drive the timer")]
    NoRuntime,

    /// The timer registration has already been released.
    #[error("timer has been detached")]
    Detached,

    /// Any other backend-specific failure.
    #[error("timer backend error: {0}")]
    Backend(String),
}

/// How a timer should behave after a reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Never fire.
    Inactive,
    /// Fire every period, starting one period from the reset.
    Periodic(Duration),
}

/// A registered timer.
pub trait Timer: Send {
    /// Change the timer's mode. Must not block.
    fn reset(&mut self, mode: TimerMode) -> Result<(), TimerError>;

    /// Release the registration. No tick is posted after this returns,
    /// although ticks posted earlier may still be in the task's inbox.
    fn detach(self: Box<Self>) {}
}

/// Factory for timers bound to a task.
pub trait TimerSource<T> {
    /// Register a new timer in [`TimerMode::Inactive`] mode.
    fn create(
        &self,
        task: Arc<dyn Task<T>>,
        callback: TickCallback,
    ) -> Result<Box<dyn Timer>, TimerError>;
}
