//! Tokio-backed task: an unbounded mpsc inbox drained by one spawned loop.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{Event, Task, Unit};

/// Consumer of the units delivered by a [`TaskQueue`].
pub trait Handler<T>: Send + 'static {
    /// Process one unit. Canceled units are delivered here too.
    fn handle(&mut self, unit: Unit<T>);
}

impl<T, F> Handler<T> for F
where
    F: FnMut(Unit<T>) + Send + 'static,
{
    fn handle(&mut self, unit: Unit<T>) {
        self(unit)
    }
}

/// A task whose events are processed sequentially by a tokio worker.
///
/// The worker exits once every handle to the queue (including those held by
/// limiters and timers) has been dropped and the inbox is empty.
pub struct TaskQueue<T> {
    name: String,
    sender: mpsc::UnboundedSender<Event<T>>,
}

impl<T: Send + 'static> TaskQueue<T> {
    /// Spawn the worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<H>(name: impl Into<String>, handler: H) -> (Arc<Self>, JoinHandle<()>)
    where
        H: Handler<T>,
    {
        let name = name.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run(name.clone(), receiver, handler));

        debug!(task = %name, "Task queue started");
        (Arc::new(Self { name, sender }), worker)
    }

    /// The name this queue logs under.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Send + 'static> Task<T> for TaskQueue<T> {
    fn post(&self, event: Event<T>) {
        if self.sender.send(event).is_err() {
            warn!(task = %self.name, "Posting to a task whose worker has stopped");
        }
    }
}

async fn run<T, H>(name: String, mut receiver: mpsc::UnboundedReceiver<Event<T>>, mut handler: H)
where
    H: Handler<T>,
{
    while let Some(event) = receiver.recv().await {
        match event {
            Event::Unit(unit) => {
                trace!(task = %name, canceled = unit.is_canceled(), "Delivering unit");
                handler.handle(unit);
            }
            Event::Tick(tick) => {
                trace!(task = %name, "Processing timer tick");
                tick.fire();
            }
            Event::Teardown(teardown) => {
                debug!(task = %name, "Completing teardown");
                teardown.complete();
            }
        }
    }

    debug!(task = %name, "Task queue stopped");
}
