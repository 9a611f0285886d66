//! Task executor interface.
//!
//! A task is a single logical consumer: events posted to it are processed one
//! at a time, in the order a given poster posted them. Timers and rate
//! limiters never call back into user code directly; they post [`Event`]s
//! into a task's inbox and let the consumer act on them.

mod queue;
mod unit;

pub use queue::{Handler, TaskQueue};
pub use unit::Unit;

use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Callback run when a timer tick is processed by its task.
pub type TickCallback = Arc<dyn Fn() + Send + Sync>;

/// An inbox message for a [`Task`].
pub enum Event<T> {
    /// Work to hand to the task's consumer.
    Unit(Unit<T>),
    /// A timer firing; the consumer runs it with [`Tick::fire`].
    Tick(Tick),
    /// A teardown sentinel; the consumer finishes it with
    /// [`Teardown::complete`].
    Teardown(Teardown),
}

impl<T: fmt::Debug> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Unit(unit) => f.debug_tuple("Unit").field(unit).finish(),
            Event::Tick(_) => f.write_str("Tick"),
            Event::Teardown(_) => f.write_str("Teardown"),
        }
    }
}

/// A single-consumer execution context.
pub trait Task<T>: Send + Sync {
    /// Queue an event for serialized delivery.
    ///
    /// Events from one poster are delivered in posting order, and no two
    /// events of the same task are ever processed concurrently.
    fn post(&self, event: Event<T>);
}

/// One timer firing.
pub struct Tick {
    callback: TickCallback,
}

impl Tick {
    /// Create a tick that will run `callback` when fired.
    pub fn new(callback: TickCallback) -> Self {
        Self { callback }
    }

    /// Run the tick's callback on the current (task) context.
    pub fn fire(self) {
        (self.callback)()
    }
}

/// Sentinel that sequences the release of a retained value behind all
/// previously posted events of a task.
///
/// A teardown is allocated up front, armed once with the value to release,
/// and completed by the task. Completing it drops the value and notifies the
/// waiter. Dropping an armed teardown without completing it still releases
/// the value, but the waiter sees the task as closed.
pub struct Teardown {
    retained: Option<Box<dyn Send + Sync>>,
    done: Option<oneshot::Sender<()>>,
}

impl Teardown {
    /// Allocate a sentinel and the waiter that observes its completion.
    pub fn new() -> (Self, TeardownWait) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                retained: None,
                done: Some(tx),
            },
            TeardownWait { done: rx },
        )
    }

    pub(crate) fn retain(&mut self, value: Box<dyn Send + Sync>) {
        self.retained = Some(value);
    }

    /// Release the retained value and wake the waiter.
    pub fn complete(mut self) {
        drop(self.retained.take());
        if let Some(done) = self.done.take() {
            // The waiter may have been dropped; that is fine.
            let _ = done.send(());
        }
    }
}

/// Completion handle returned when a teardown is posted.
#[derive(Debug)]
pub struct TeardownWait {
    done: oneshot::Receiver<()>,
}

impl TeardownWait {
    /// Wait until the task has processed the teardown sentinel.
    pub async fn wait(self) -> crate::error::Result<()> {
        self.done
            .await
            .map_err(|_| crate::error::PacerError::TaskClosed)
    }

    /// Non-blocking check; `true` once the teardown has completed.
    pub fn is_complete(&mut self) -> bool {
        self.done.try_recv().is_ok()
    }
}
