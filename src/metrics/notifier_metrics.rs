//! Notifier metrics tracking using OpenTelemetry.

use opentelemetry::metrics::{Counter, Histogram, Meter};
use std::time::Instant;

/// Metrics collector for a notifier.
///
/// Cloning shares the underlying instruments, so one collector can be handed
/// to several notifiers.
///
/// # Examples
///
/// ```rust,no_run
/// use policy_watcher::metrics::NotifierMetrics;
/// use opentelemetry::global;
///
/// let meter = global::meter("policy-watcher");
/// let metrics = NotifierMetrics::new(meter);
///
/// metrics.record_notify_sent();
/// ```
#[derive(Clone)]
pub struct NotifierMetrics {
    notify_sent: Counter<u64>,
    notify_failures: Counter<u64>,
    dispatch_delivered: Counter<u64>,
    dispatch_dropped: Counter<u64>,
    dispatch_panics: Counter<u64>,
    callback_duration: Histogram<f64>,
}

impl NotifierMetrics {
    /// Create a new metrics collector with the provided meter.
    pub fn new(meter: Meter) -> Self {
        let notify_sent = meter
            .u64_counter("policy_watcher.notify.sent")
            .with_description("Number of change notifications published")
            .build();

        let notify_failures = meter
            .u64_counter("policy_watcher.notify.failures")
            .with_description("Number of notify calls that failed")
            .build();

        let dispatch_delivered = meter
            .u64_counter("policy_watcher.dispatch.delivered")
            .with_description("Inbound notifications handed to the callback")
            .build();

        let dispatch_dropped = meter
            .u64_counter("policy_watcher.dispatch.dropped")
            .with_description("Inbound notifications dropped because no callback was set")
            .build();

        let dispatch_panics = meter
            .u64_counter("policy_watcher.dispatch.panics")
            .with_description("Callback invocations that panicked")
            .build();

        let callback_duration = meter
            .f64_histogram("policy_watcher.dispatch.duration")
            .with_description("Time spent inside the update callback in seconds")
            .with_unit("s")
            .build();

        Self {
            notify_sent,
            notify_failures,
            dispatch_delivered,
            dispatch_dropped,
            dispatch_panics,
            callback_duration,
        }
    }

    /// Record a successful publish.
    pub fn record_notify_sent(&self) {
        self.notify_sent.add(1, &[]);
    }

    /// Record a failed `notify` call.
    pub fn record_notify_failure(&self) {
        self.notify_failures.add(1, &[]);
    }

    /// Record a callback invocation that returned normally.
    pub fn record_delivered(&self, started: Instant) {
        self.dispatch_delivered.add(1, &[]);
        self.callback_duration
            .record(started.elapsed().as_secs_f64(), &[]);
    }

    /// Record an inbound message with no callback to receive it.
    pub fn record_dropped(&self) {
        self.dispatch_dropped.add(1, &[]);
    }

    /// Record a callback invocation that panicked.
    pub fn record_panic(&self, started: Instant) {
        self.dispatch_panics.add(1, &[]);
        self.callback_duration
            .record(started.elapsed().as_secs_f64(), &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::global;

    #[test]
    fn test_metrics_creation() {
        let metrics = NotifierMetrics::new(global::meter("test"));

        // Test basic operations don't panic
        metrics.record_notify_sent();
        metrics.record_notify_failure();
        metrics.record_delivered(Instant::now());
        metrics.record_dropped();
        metrics.record_panic(Instant::now());
    }

    #[test]
    fn test_metrics_clone() {
        let metrics = NotifierMetrics::new(global::meter("test"));
        let metrics2 = metrics.clone();

        metrics.record_notify_sent();
        metrics2.record_notify_sent();
    }
}
