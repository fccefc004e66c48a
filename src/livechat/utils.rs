use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// Per-client logical clock for message timestamps.
///
/// Values follow the wall clock in milliseconds but never repeat or go backwards, so
/// two messages sent from the same client always sort in send order.
#[derive(Debug, Default)]
pub struct MessageClock {
    last: AtomicI64,
}

impl MessageClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> i64 {
        self.tick(Utc::now().timestamp_millis())
    }

    fn tick(&self, wall_ms: i64) -> i64 {
        let mut previous = self.last.load(Ordering::SeqCst);
        loop {
            let next = wall_ms.max(previous + 1);
            match self
                .last
                .compare_exchange(previous, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => previous = actual,
            }
        }
    }
}
