use core::time::Duration;
use std::{
    sync::{
        Arc, OnceLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

/// Custom epoch: Wednesday, January 1, 2025 00:00:00 UTC
///
/// With 41 timestamp bits this epoch covers roughly 69 years.
pub const CUSTOM_EPOCH: Duration = Duration::from_millis(1_735_689_600_000);

/// A trait for time sources that return a monotonic or wall-clock timestamp
/// in **milliseconds** relative to a configurable origin.
///
/// # Example
///
/// ```
/// use fleetflake::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// assert_eq!(FixedTime.current_millis(), 1234);
/// ```
pub trait TimeSource {
    /// Returns the current time in milliseconds since the configured epoch.
    fn current_millis(&self) -> u64;
}

/// Milliseconds elapsed since the clock was built, published by a
/// background thread.
#[derive(Debug)]
struct Ticker {
    elapsed_ms: AtomicU64,
    thread: OnceLock<JoinHandle<()>>,
}

impl Ticker {
    /// Wakes once per millisecond until every strong reference is gone.
    fn run(ticker: Weak<Self>) {
        let start = Instant::now();
        let mut next = Duration::ZERO;

        while let Some(ticker) = ticker.upgrade() {
            if let Some(wait) = next.checked_sub(start.elapsed()) {
                thread::sleep(wait);
            }
            let elapsed = start.elapsed();
            ticker
                .elapsed_ms
                .store(elapsed.as_millis() as u64, Ordering::Release);
            // Next whole millisecond after the one just published.
            next = Duration::from_millis(elapsed.as_millis() as u64 + 1);
        }
    }
}

/// A monotonic time source counting milliseconds from a fixed epoch.
///
/// The wall-clock distance to the epoch is sampled once at construction;
/// after that the clock only advances with [`Instant`], so NTP steps never
/// move generated timestamps backwards. Reads are a single atomic load.
/// Clones share one ticker thread, which exits after the last clone drops.
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    ticker: Arc<Ticker>,
    epoch_offset_ms: u64,
}

impl Default for MonotonicClock {
    /// Constructs a monotonic clock aligned to [`CUSTOM_EPOCH`].
    ///
    /// Panics if system time is earlier than the custom epoch.
    fn default() -> Self {
        Self::with_epoch(CUSTOM_EPOCH)
    }
}

impl MonotonicClock {
    /// Constructs a monotonic clock using `epoch` (a [`Duration`] since
    /// 1970-01-01 UTC) as t = 0.
    ///
    /// # Panics
    ///
    /// Panics if the current system time is earlier than `epoch`.
    pub fn with_epoch(epoch: Duration) -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|now| now.checked_sub(epoch))
            .expect("system clock is set before the id epoch");

        let ticker = Arc::new(Ticker {
            elapsed_ms: AtomicU64::new(0),
            thread: OnceLock::new(),
        });
        let weak = Arc::downgrade(&ticker);
        let _ = ticker.thread.set(thread::spawn(move || Ticker::run(weak)));

        Self {
            ticker,
            epoch_offset_ms: since_epoch.as_millis() as u64,
        }
    }
}

impl TimeSource for MonotonicClock {
    fn current_millis(&self) -> u64 {
        self.epoch_offset_ms + self.ticker.elapsed_ms.load(Ordering::Acquire)
    }
}
