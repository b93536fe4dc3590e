use chrono::{DateTime, Utc};

/// Source of the current instant. Core functions take `now` as a parameter,
/// the HTTP layer reads it from here.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
