use chrono::{DateTime, NaiveDate, Utc};
use std::sync::RwLock;

/// Injectable time source. Gating and per-day uniqueness both key off
/// `today()`, so every check inside one operation must use the same clock.
pub trait DayClock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

pub struct SystemClock;

impl DayClock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replay.
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write().expect("clock lock poisoned") = now;
    }

    pub fn advance_days(&self, days: i64) {
        let mut now = self.now.write().expect("clock lock poisoned");
        *now += chrono::Duration::days(days);
    }
}

impl DayClock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().expect("clock lock poisoned")
    }
}
