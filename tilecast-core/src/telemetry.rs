//! Throughput counters and rate logging.
//!
//! Every counter here is advisory instrumentation: nothing in the
//! pipeline changes behaviour based on these values beyond deciding
//! when to emit a periodic log line. Collectors are explicit
//! instances handed to each component at construction — there is no
//! process-global mutable state.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// ── ThroughputMeter ──────────────────────────────────────────────

/// Wall-clock gate for periodic rate logs.
///
/// `tick(total)` returns the per-second rate derived from the delta
/// since the last emission, but only once per `interval`; in between
/// it returns `None` so callers stay quiet.
pub struct ThroughputMeter {
    interval: Duration,
    mark: Mutex<Mark>,
}

struct Mark {
    at: Instant,
    count: u64,
}

impl ThroughputMeter {
    /// Create a meter that fires at most once per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            mark: Mutex::new(Mark {
                at: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Report the running total; returns `Some(rate_per_sec)` when a
    /// full interval has elapsed since the last emission.
    pub fn tick(&self, total: u64) -> Option<f64> {
        let mut mark = self.mark.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = mark.at.elapsed();
        if elapsed < self.interval {
            return None;
        }
        let delta = total.saturating_sub(mark.count);
        let rate = delta as f64 / elapsed.as_secs_f64();
        mark.at = Instant::now();
        mark.count = total;
        Some(rate)
    }
}

// ── DispatchTelemetry ────────────────────────────────────────────

/// Snapshot of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Messages delivered successfully.
    pub sent: u64,
    /// Per-message delivery failures.
    pub errors: u64,
    /// Total encoded bytes of delivered messages.
    pub bytes: u64,
}

/// Process-lifetime dispatcher counters plus the rate-log gate.
///
/// Monotonically increasing; never reset while the process lives.
pub struct DispatchTelemetry {
    sent: AtomicU64,
    errors: AtomicU64,
    bytes: AtomicU64,
    meter: ThroughputMeter,
}

/// Cadence of the dispatcher throughput log.
pub const DISPATCH_LOG_INTERVAL: Duration = Duration::from_millis(5000);

impl DispatchTelemetry {
    pub fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            meter: ThroughputMeter::new(DISPATCH_LOG_INTERVAL),
        }
    }

    /// Count one delivered message of `bytes` encoded bytes, and
    /// return the messages/sec rate when a log is due.
    pub fn record_sent(&self, bytes: u64) -> Option<f64> {
        let total = self.sent.fetch_add(1, Ordering::Relaxed) + 1;
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        self.meter.tick(total)
    }

    /// Count one failed delivery.
    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            sent: self.sent.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

impl Default for DispatchTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

// ── CaptureStats ─────────────────────────────────────────────────

/// Counters for the inbound stream receiver.
pub struct CaptureStats {
    frames: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
}

impl CaptureStats {
    pub fn new() -> Self {
        Self {
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    /// Count one successfully decoded frame; returns the new total.
    pub fn record_frame(&self) -> u64 {
        self.frames.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count received datagram bytes.
    pub fn record_bytes(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    /// Count one decode failure; returns the new total.
    pub fn record_error(&self) -> u64 {
        self.errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meter_is_quiet_inside_interval() {
        let meter = ThroughputMeter::new(Duration::from_secs(60));
        assert!(meter.tick(10).is_none());
        assert!(meter.tick(20).is_none());
    }

    #[test]
    fn meter_fires_after_interval() {
        let meter = ThroughputMeter::new(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(5));
        let rate = meter.tick(100).expect("meter should fire");
        assert!(rate > 0.0);
    }

    #[test]
    fn dispatch_counters_accumulate() {
        let t = DispatchTelemetry::new();
        t.record_sent(100);
        t.record_sent(50);
        t.record_error();
        let stats = t.snapshot();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.bytes, 150);
    }

    #[test]
    fn capture_counters_accumulate() {
        let s = CaptureStats::new();
        assert_eq!(s.record_frame(), 1);
        assert_eq!(s.record_frame(), 2);
        s.record_bytes(10);
        assert_eq!(s.record_error(), 1);
        assert_eq!(s.frames(), 2);
        assert_eq!(s.bytes(), 10);
        assert_eq!(s.errors(), 1);
    }
}
