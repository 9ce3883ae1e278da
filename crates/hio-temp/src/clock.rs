// Licensed under the MIT License.

use std::time::Instant;

/// An abstract source of monotonic time, so the cleaner's age check (`RAM_MAX_AGE`) can
/// be driven deterministically in tests instead of sleeping in real time.
pub trait Clock: std::fmt::Debug + Send + Sync {
    /// The current instant, per this clock's notion of time.
    fn now(&self) -> Instant;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use fake::FakeClock;

#[cfg(any(test, feature = "test-util"))]
mod fake {
    use super::Clock;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    /// A clock a test can fast-forward without sleeping.
    #[derive(Debug)]
    pub struct FakeClock {
        now: Mutex<Instant>,
    }

    impl Default for FakeClock {
        fn default() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }
    }

    impl FakeClock {
        /// Creates a fake clock anchored at the current real instant.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Advances this clock by `duration`.
        pub fn advance(&self, duration: Duration) {
            let mut now = self.now.lock();
            *now += duration;
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            *self.now.lock()
        }
    }

}
