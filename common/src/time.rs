// Time types used across the engine.
//
// Wall-clock reads go through the Clock trait so that the pipeline,
// lease expiry and cache TTLs can be driven deterministically in tests.

use chrono::{DateTime, Utc};

// Millis timestamps used to determine it using its type
pub type TimestampMillis = u64;

// Seconds timestamps used to determine it using its type
pub type TimestampSeconds = u64;

/// Source of wall-clock UTC time. `now()` is nondecreasing.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;

    // Return timestamp in milliseconds
    // We cast it to u64 as we have plenty of time before it overflows
    fn now_millis(&self) -> TimestampMillis {
        self.now().timestamp_millis() as TimestampMillis
    }
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests and simulations. Time only moves when
/// `advance` or `set` is called.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: std::sync::atomic::AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: TimestampMillis) -> Self {
        ManualClock {
            millis: std::sync::atomic::AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, delta_millis: TimestampMillis) {
        self.millis
            .fetch_add(delta_millis, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set(&self, millis: TimestampMillis) {
        self.millis
            .store(millis, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let millis = self.millis.load(std::sync::atomic::Ordering::SeqCst);
        DateTime::<Utc>::from_timestamp_millis(millis as i64)
            .unwrap_or_else(|| DateTime::<Utc>::MIN_UTC)
    }
}
