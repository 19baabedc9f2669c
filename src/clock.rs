use chrono::{DateTime, Utc};

/// Source of the current wall-clock time.
///
/// The manager never calls `Utc::now()` directly; window bounds are derived
/// through this trait so tests can pin time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
