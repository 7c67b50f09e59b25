//! Conversion metrics.
//!
//! Cheap atomic counters plus a bounded sample buffer of conversion
//! durations for percentile estimates. A snapshot is serializable so hosts
//! can surface it in diagnostics.

use serde::Serialize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const MAX_DURATION_SAMPLES: usize = 1024;

/// Metrics collected across conversions.
#[derive(Debug, Default)]
pub struct ConversionMetrics {
    conversions_started: AtomicU64,
    conversions_succeeded: AtomicU64,
    conversions_failed: AtomicU64,
    conversions_cancelled: AtomicU64,
    sessions_started: AtomicU64,
    session_failures: AtomicU64,
    exports_attempted: AtomicU64,
    export_failures: AtomicU64,
    duration_samples_ms: Mutex<Vec<u64>>,
}

/// Point-in-time view of the metrics.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub conversions_started: u64,
    pub conversions_succeeded: u64,
    pub conversions_failed: u64,
    pub conversions_cancelled: u64,
    pub sessions_started: u64,
    pub session_failures: u64,
    pub exports_attempted: u64,
    pub export_failures: u64,
    /// Median conversion duration in milliseconds.
    pub duration_p50_ms: Option<u64>,
    /// 95th percentile conversion duration in milliseconds.
    pub duration_p95_ms: Option<u64>,
    /// 99th percentile conversion duration in milliseconds.
    pub duration_p99_ms: Option<u64>,
}

impl ConversionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&self) {
        self.conversions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self, elapsed: Duration) {
        self.conversions_succeeded.fetch_add(1, Ordering::Relaxed);
        self.push_sample(elapsed);
    }

    pub fn record_failed(&self) {
        self.conversions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.conversions_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_failure(&self) {
        self.session_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_export_attempt(&self) {
        self.exports_attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_export_failure(&self) {
        self.export_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn push_sample(&self, elapsed: Duration) {
        let mut samples = self
            .duration_samples_ms
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if samples.len() >= MAX_DURATION_SAMPLES {
            samples.remove(0);
        }
        samples.push(elapsed.as_millis() as u64);
    }

    /// Take a snapshot of the current values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut samples = self
            .duration_samples_ms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        samples.sort_unstable();
        let percentile = |p: f64| -> Option<u64> {
            if samples.is_empty() {
                return None;
            }
            let index = ((samples.len() as f64 * p).ceil() as usize)
                .saturating_sub(1)
                .min(samples.len() - 1);
            Some(samples[index])
        };

        MetricsSnapshot {
            conversions_started: self.conversions_started.load(Ordering::Relaxed),
            conversions_succeeded: self.conversions_succeeded.load(Ordering::Relaxed),
            conversions_failed: self.conversions_failed.load(Ordering::Relaxed),
            conversions_cancelled: self.conversions_cancelled.load(Ordering::Relaxed),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            session_failures: self.session_failures.load(Ordering::Relaxed),
            exports_attempted: self.exports_attempted.load(Ordering::Relaxed),
            export_failures: self.export_failures.load(Ordering::Relaxed),
            duration_p50_ms: percentile(0.50),
            duration_p95_ms: percentile(0.95),
            duration_p99_ms: percentile(0.99),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let metrics = ConversionMetrics::new();
        metrics.record_started();
        metrics.record_started();
        metrics.record_succeeded(Duration::from_millis(150));
        metrics.record_failed();
        metrics.record_cancelled();

        let snap = metrics.snapshot();
        assert_eq!(snap.conversions_started, 2);
        assert_eq!(snap.conversions_succeeded, 1);
        assert_eq!(snap.conversions_failed, 1);
        assert_eq!(snap.conversions_cancelled, 1);
    }

    #[test]
    fn test_percentiles() {
        let metrics = ConversionMetrics::new();
        for ms in 1..=100 {
            metrics.record_succeeded(Duration::from_millis(ms));
        }
        let snap = metrics.snapshot();
        assert_eq!(snap.duration_p50_ms, Some(50));
        assert_eq!(snap.duration_p95_ms, Some(95));
        assert_eq!(snap.duration_p99_ms, Some(99));
    }

    #[test]
    fn test_empty_percentiles_are_none() {
        let snap = ConversionMetrics::new().snapshot();
        assert!(snap.duration_p50_ms.is_none());
    }

    #[test]
    fn test_sample_buffer_is_bounded() {
        let metrics = ConversionMetrics::new();
        for i in 0..(MAX_DURATION_SAMPLES + 10) {
            metrics.record_succeeded(Duration::from_millis(i as u64));
        }
        let samples = metrics.duration_samples_ms.lock().unwrap();
        assert_eq!(samples.len(), MAX_DURATION_SAMPLES);
    }
}
