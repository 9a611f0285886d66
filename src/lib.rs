//! Pacer - interval-paced event dispatch
//!
//! This crate paces discrete units of asynchronous work, such as outbound
//! DNS NOTIFY messages, onto a single-consumer task: after the first unit
//! of a burst, at most one unit is released per configured interval. No
//! unit is lost, duplicated, or reordered, and a limiter can be torn down
//! safely while timer ticks are still in flight.
//!
//! ```no_run
//! use std::time::Duration;
//! use pacer::ratelimit::RateLimiter;
//! use pacer::task::{TaskQueue, Unit};
//! use pacer::timer::IntervalTimerSource;
//!
//! # async fn run() -> pacer::error::Result<()> {
//! let (task, worker) = TaskQueue::spawn("notify", |unit: Unit<String>| {
//!     println!("sending NOTIFY for {}", unit.payload());
//! });
//! let timers = IntervalTimerSource::current().map_err(pacer::error::PacerError::ResourceExhausted)?;
//! let limiter = RateLimiter::create(&timers, task.clone(), Duration::from_millis(200))?;
//!
//! limiter.enqueue(Unit::new("example.com".to_string()))?;
//! limiter.enqueue(Unit::new("example.net".to_string()))?;
//!
//! limiter.shutdown();
//! limiter.destroy().wait().await?;
//! drop(task);
//! let _ = worker.await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod task;
pub mod timer;

#[cfg(test)]
mod testing;
