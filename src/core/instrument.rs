//! Observability hooks shared by the notifier and its dispatch trampoline.

use std::time::Instant;

#[cfg(feature = "metrics")]
use crate::metrics::NotifierMetrics;

/// Fan-out point for metrics. A no-op unless the `metrics` feature is on
/// and a collector was attached.
#[derive(Clone, Default)]
pub(crate) struct Instrumentation {
    #[cfg(feature = "metrics")]
    metrics: Option<NotifierMetrics>,
}

impl Instrumentation {
    #[cfg(feature = "metrics")]
    pub(crate) fn with_metrics(metrics: NotifierMetrics) -> Self {
        Self {
            metrics: Some(metrics),
        }
    }

    pub(crate) fn notify_sent(&self) {
        #[cfg(feature = "metrics")]
        {
            if let Some(metrics) = &self.metrics {
                metrics.record_notify_sent();
            }
        }
    }

    pub(crate) fn notify_failed(&self) {
        #[cfg(feature = "metrics")]
        {
            if let Some(metrics) = &self.metrics {
                metrics.record_notify_failure();
            }
        }
    }

    pub(crate) fn dispatch_delivered(&self, started: Instant) {
        #[cfg(feature = "metrics")]
        {
            if let Some(metrics) = &self.metrics {
                metrics.record_delivered(started);
            }
        }
        #[cfg(not(feature = "metrics"))]
        let _ = started;
    }

    pub(crate) fn dispatch_dropped(&self) {
        #[cfg(feature = "metrics")]
        {
            if let Some(metrics) = &self.metrics {
                metrics.record_dropped();
            }
        }
    }

    pub(crate) fn dispatch_panicked(&self, started: Instant) {
        #[cfg(feature = "metrics")]
        {
            if let Some(metrics) = &self.metrics {
                metrics.record_panic(started);
            }
        }
        #[cfg(not(feature = "metrics"))]
        let _ = started;
    }
}
