//! Tokio interval timer.
//!
//! Each periodic reset spawns a small ticker future that posts tick events
//! to the bound task; resetting or detaching aborts it.
//!
//! Aborting does not wait for a ticker already running on another worker, so
//! every arm carries a generation. A ticker posts only while holding the
//! generation lock and only if its generation is still current; `stop` bumps
//! the generation under the same lock, so once it returns no superseded
//! ticker can post.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::trace;

use super::{Timer, TimerError, TimerMode, TimerSource};
use crate::task::{Event, Task, Tick, TickCallback};

/// Creates [`IntervalTimer`]s on a tokio runtime.
#[derive(Debug, Clone)]
pub struct IntervalTimerSource {
    handle: Handle,
}

impl IntervalTimerSource {
    /// Use an explicit runtime handle.
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running on.
    pub fn current() -> Result<Self, TimerError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|_| TimerError::NoRuntime)
    }
}

impl<T: Send + 'static> TimerSource<T> for IntervalTimerSource {
    fn create(
        &self,
        task: Arc<dyn Task<T>>,
        callback: TickCallback,
    ) -> Result<Box<dyn Timer>, TimerError> {
        Ok(Box::new(IntervalTimer {
            handle: self.handle.clone(),
            task,
            callback,
            generation: Arc::new(Mutex::new(0)),
            ticker: None,
        }))
    }
}

/// A timer driven by [`tokio::time::interval_at`].
pub struct IntervalTimer<T> {
    handle: Handle,
    task: Arc<dyn Task<T>>,
    callback: TickCallback,
    generation: Arc<Mutex<u64>>,
    ticker: Option<JoinHandle<()>>,
}

impl<T> IntervalTimer<T> {
    /// Retire the current ticker. Returns the generation a new ticker owns.
    fn stop(&mut self) -> u64 {
        let next = {
            let mut generation = self.generation.lock();
            *generation += 1;
            *generation
        };
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        next
    }
}

impl<T: Send + 'static> Timer for IntervalTimer<T> {
    fn reset(&mut self, mode: TimerMode) -> Result<(), TimerError> {
        let period = match mode {
            TimerMode::Inactive => {
                trace!("Deactivating interval timer");
                self.stop();
                return Ok(());
            }
            TimerMode::Periodic(period) if period.is_zero() => {
                return Err(TimerError::ZeroInterval);
            }
            TimerMode::Periodic(period) => period,
        };

        let owned = self.stop();
        trace!(?period, generation = owned, "Arming interval timer");

        // The cadence starts from the reset, not from when the ticker is polled.
        let start = Instant::now() + period;
        let task = Arc::clone(&self.task);
        let callback = Arc::clone(&self.callback);
        let generation = Arc::clone(&self.generation);
        self.ticker = Some(self.handle.spawn(async move {
            let mut ticks = time::interval_at(start, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let current = generation.lock();
                if *current != owned {
                    break;
                }
                task.post(Event::Tick(Tick::new(Arc::clone(&callback))));
            }
        }));
        Ok(())
    }

    fn detach(mut self: Box<Self>) {
        self.stop();
    }
}

impl<T> Drop for IntervalTimer<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskQueue, Unit};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct CountingTask {
        posts: AtomicUsize,
    }

    impl Task<()> for CountingTask {
        fn post(&self, _event: Event<()>) {
            self.posts.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting_callback() -> (TickCallback, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        (
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            count,
        )
    }

    #[test]
    fn test_current_without_runtime() {
        assert!(matches!(
            IntervalTimerSource::current(),
            Err(TimerError::NoRuntime)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_ticks_reach_task() {
        let (queue, _worker) = TaskQueue::spawn("timer", |_unit: Unit<()>| {});
        let (callback, count) = counting_callback();
        let source = IntervalTimerSource::current().unwrap();
        let mut timer = TimerSource::<()>::create(&source, queue, callback).unwrap();

        timer
            .reset(TimerMode::Periodic(Duration::from_millis(100)))
            .unwrap();

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(260)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        timer.reset(TimerMode::Inactive).unwrap();
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_keeps_previous_cadence() {
        let (queue, _worker) = TaskQueue::spawn("timer", |_unit: Unit<()>| {});
        let (callback, count) = counting_callback();
        let source = IntervalTimerSource::current().unwrap();
        let mut timer = TimerSource::<()>::create(&source, queue, callback).unwrap();

        timer
            .reset(TimerMode::Periodic(Duration::from_millis(100)))
            .unwrap();
        assert!(matches!(
            timer.reset(TimerMode::Periodic(Duration::ZERO)),
            Err(TimerError::ZeroInterval)
        ));

        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_stops_ticks() {
        let (queue, _worker) = TaskQueue::spawn("timer", |_unit: Unit<()>| {});
        let (callback, count) = counting_callback();
        let source = IntervalTimerSource::current().unwrap();
        let mut timer = TimerSource::<()>::create(&source, queue, callback).unwrap();

        timer
            .reset(TimerMode::Periodic(Duration::from_millis(10)))
            .unwrap();
        time::sleep(Duration::from_millis(35)).await;
        let before = count.load(Ordering::SeqCst);
        assert_eq!(before, 3);

        timer.detach();
        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_superseded_ticker_never_posts() {
        let source = IntervalTimerSource::current().unwrap();

        for round in 0..100 {
            let task = Arc::new(CountingTask::default());
            let (callback, _count) = counting_callback();
            let mut timer =
                TimerSource::<()>::create(&source, task.clone(), callback).unwrap();

            timer
                .reset(TimerMode::Periodic(Duration::from_micros(300)))
                .unwrap();
            time::sleep(Duration::from_millis(2)).await;

            if round % 2 == 0 {
                timer.detach();
            } else {
                timer
                    .reset(TimerMode::Periodic(Duration::from_secs(60)))
                    .unwrap();
            }
            let settled = task.posts.load(Ordering::SeqCst);

            time::sleep(Duration::from_millis(3)).await;
            assert_eq!(
                task.posts.load(Ordering::SeqCst),
                settled,
                "round {} posted after the ticker was retired",
                round
            );
        }
    }
}
