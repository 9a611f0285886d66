//! Units of deferred work.

/// One discrete, exclusively owned piece of work.
///
/// A `Unit` is deliberately not `Clone`: it moves from the submitting caller
/// into a rate limiter, from the limiter's queue into a task, and finally to
/// the task's handler, with exactly one owner at every step.
#[derive(Debug, PartialEq, Eq)]
pub struct Unit<T> {
    payload: T,
    canceled: bool,
}

impl<T> Unit<T> {
    /// Wrap a payload as a fresh, non-canceled unit.
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            canceled: false,
        }
    }

    /// Whether the unit was drained from a limiter during shutdown rather
    /// than released normally.
    pub fn is_canceled(&self) -> bool {
        self.canceled
    }

    /// Borrow the payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Mutably borrow the payload.
    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    /// Consume the unit, returning its payload.
    pub fn into_inner(self) -> T {
        self.payload
    }

    pub(crate) fn cancel(&mut self) {
        self.canceled = true;
    }
}

impl<T> From<T> for Unit<T> {
    fn from(payload: T) -> Self {
        Self::new(payload)
    }
}
