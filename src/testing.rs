//! Deterministic task and timer doubles for unit tests.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::task::{Event, Task, Tick, TickCallback, Unit};
use crate::timer::{Timer, TimerError, TimerMode, TimerSource};

/// What a [`ManualTask`] observed, in delivery order.
#[derive(Debug)]
pub(crate) enum Delivered<T> {
    Unit(Unit<T>),
    Teardown,
}

/// A task that only processes its inbox when told to.
pub(crate) struct ManualTask<T> {
    inbox: Mutex<VecDeque<Event<T>>>,
}

impl<T> ManualTask<T> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inbox: Mutex::new(VecDeque::new()),
        })
    }

    pub(crate) fn queued(&self) -> usize {
        self.inbox.lock().len()
    }

    /// Process the inbox until it is empty, including events posted while
    /// processing (ticks forward units into the same inbox).
    pub(crate) fn run(&self) -> Vec<Delivered<T>> {
        let mut delivered = Vec::new();
        loop {
            let event = self.inbox.lock().pop_front();
            match event {
                None => break,
                Some(Event::Unit(unit)) => delivered.push(Delivered::Unit(unit)),
                Some(Event::Tick(tick)) => tick.fire(),
                Some(Event::Teardown(teardown)) => {
                    teardown.complete();
                    delivered.push(Delivered::Teardown);
                }
            }
        }
        delivered
    }

    /// Like [`ManualTask::run`], keeping only units.
    pub(crate) fn run_units(&self) -> Vec<Unit<T>> {
        self.run()
            .into_iter()
            .filter_map(|d| match d {
                Delivered::Unit(unit) => Some(unit),
                Delivered::Teardown => None,
            })
            .collect()
    }
}

impl<T: Send> Task<T> for ManualTask<T> {
    fn post(&self, event: Event<T>) {
        self.inbox.lock().push_back(event);
    }
}

struct ProbeState<T> {
    task: Option<Arc<dyn Task<T>>>,
    callback: Option<TickCallback>,
    mode: TimerMode,
    resets: Vec<TimerMode>,
    detached: bool,
    fail_create: bool,
    fail_periodic: bool,
}

/// Timer source whose single timer is fired by hand.
pub(crate) struct ManualTimerSource<T> {
    state: Arc<Mutex<ProbeState<T>>>,
}

impl<T: Send + 'static> ManualTimerSource<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ProbeState {
                task: None,
                callback: None,
                mode: TimerMode::Inactive,
                resets: Vec::new(),
                detached: false,
                fail_create: false,
                fail_periodic: false,
            })),
        }
    }

    pub(crate) fn failing_create() -> Self {
        let source = Self::new();
        source.state.lock().fail_create = true;
        source
    }

    pub(crate) fn set_fail_periodic(&self, fail: bool) {
        self.state.lock().fail_periodic = fail;
    }

    pub(crate) fn mode(&self) -> TimerMode {
        self.state.lock().mode
    }

    pub(crate) fn resets(&self) -> Vec<TimerMode> {
        self.state.lock().resets.clone()
    }

    pub(crate) fn is_detached(&self) -> bool {
        self.state.lock().detached
    }

    /// The registered tick callback, for simulating a tick that was already
    /// in flight when the timer was detached.
    pub(crate) fn callback(&self) -> Option<TickCallback> {
        self.state.lock().callback.clone()
    }

    /// Post one tick to the bound task if the timer is periodic.
    pub(crate) fn fire(&self) -> bool {
        let (task, callback) = {
            let state = self.state.lock();
            if state.detached || state.mode == TimerMode::Inactive {
                return false;
            }
            match (&state.task, &state.callback) {
                (Some(task), Some(callback)) => (Arc::clone(task), Arc::clone(callback)),
                _ => return false,
            }
        };
        task.post(Event::Tick(Tick::new(callback)));
        true
    }
}

impl<T: Send + 'static> TimerSource<T> for ManualTimerSource<T> {
    fn create(
        &self,
        task: Arc<dyn Task<T>>,
        callback: TickCallback,
    ) -> Result<Box<dyn Timer>, TimerError> {
        let mut state = self.state.lock();
        if state.fail_create {
            return Err(TimerError::Backend("timer table full".to_string()));
        }
        state.task = Some(task);
        state.callback = Some(callback);
        Ok(Box::new(ManualTimer {
            state: Arc::clone(&self.state),
        }))
    }
}

struct ManualTimer<T> {
    state: Arc<Mutex<ProbeState<T>>>,
}

impl<T: Send + 'static> Timer for ManualTimer<T> {
    fn reset(&mut self, mode: TimerMode) -> Result<(), TimerError> {
        let mut state = self.state.lock();
        if state.detached {
            return Err(TimerError::Detached);
        }
        if state.fail_periodic && matches!(mode, TimerMode::Periodic(_)) {
            return Err(TimerError::Backend("reset rejected".to_string()));
        }
        state.mode = mode;
        state.resets.push(mode);
        Ok(())
    }

    fn detach(self: Box<Self>) {
        let mut state = self.state.lock();
        state.detached = true;
        state.mode = TimerMode::Inactive;
    }
}
