use std::time::Duration;

/// Delay policy for reconnect loops that retry forever.
pub trait Backoff: Send {
    /// Delay before the next attempt.
    fn next_delay(&mut self) -> Duration;

    /// Called after a successful connection.
    fn reset(&mut self);
}

/// Same delay every time.
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Backoff for FixedBackoff {
    fn next_delay(&mut self) -> Duration {
        self.delay
    }

    fn reset(&mut self) {}
}

/// Doubling delay capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.initial;
    }
}
