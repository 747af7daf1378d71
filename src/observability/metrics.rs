//! Metrics collection and reporting

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time view of the collector
#[derive(Debug, Clone)]
pub struct SystemMetrics {
    /// Total calls that entered the pipeline
    pub total_requests: u64,

    /// Calls that ended in an error
    pub total_errors: u64,

    /// Calls ended by the drain-phase cancellation
    pub cancelled_calls: u64,

    /// Calls currently in flight
    pub in_flight: usize,

    /// Average response time (ms)
    pub avg_response_time_ms: f64,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

/// Latency histogram buckets (in milliseconds)
const LATENCY_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0];

/// Histogram for tracking latency distribution
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<(f64, AtomicU64)>,
    sum: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    fn new(buckets: &[f64]) -> Self {
        Self {
            buckets: buckets.iter().map(|&b| (b, AtomicU64::new(0))).collect(),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    fn observe(&self, value: f64) {
        self.sum.fetch_add(value as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        // Cumulative: every bucket >= value is incremented
        for (bucket, counter) in &self.buckets {
            if value <= *bucket {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn export_prometheus(&self, name: &str, help: &str) -> String {
        let mut output = String::new();

        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} histogram\n", name));

        for (bucket, counter) in &self.buckets {
            let count = counter.load(Ordering::Relaxed);
            output.push_str(&format!("{}_bucket{{le=\"{}\"}} {}\n", name, bucket, count));
        }

        let total_count = self.count.load(Ordering::Relaxed);
        output.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, total_count));

        let sum = self.sum.load(Ordering::Relaxed) as f64;
        output.push_str(&format!("{}_sum {:.3}\n", name, sum));
        output.push_str(&format!("{}_count {}\n", name, total_count));

        output
    }
}

/// Metrics collector shared by the interceptor pipeline and the request handler
#[derive(Debug)]
pub struct MetricsCollector {
    start_time: Instant,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    cancelled_calls: AtomicU64,
    in_flight: AtomicUsize,
    total_response_time_ms: AtomicU64,

    request_latency: Histogram,
    backend_latency: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            cancelled_calls: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            total_response_time_ms: AtomicU64::new(0),
            request_latency: Histogram::new(LATENCY_BUCKETS),
            backend_latency: Histogram::new(LATENCY_BUCKETS),
        }
    }

    /// Record a finished call
    pub fn record_request(&self, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let ms = response_time.as_millis() as u64;
        self.total_response_time_ms.fetch_add(ms, Ordering::Relaxed);
        self.request_latency.observe(ms as f64);
    }

    /// Record backend call latency
    pub fn record_backend_latency(&self, duration: Duration) {
        self.backend_latency.observe(duration.as_millis() as f64);
    }

    pub fn record_error(&self) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.cancelled_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Calls that have entered but not left the pipeline
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Get current metrics
    pub fn get_metrics(&self) -> SystemMetrics {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_response_time = self.total_response_time_ms.load(Ordering::Relaxed);

        let avg_response_time_ms = if total_requests > 0 {
            total_response_time as f64 / total_requests as f64
        } else {
            0.0
        };

        SystemMetrics {
            total_requests,
            total_errors: self.total_errors.load(Ordering::Relaxed),
            cancelled_calls: self.cancelled_calls.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
            avg_response_time_ms,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Export metrics in Prometheus format
    pub fn export_prometheus(&self) -> String {
        let metrics = self.get_metrics();

        let mut output = format!(
            "# HELP softgrep_requests_total Total number of calls\n\
             # TYPE softgrep_requests_total counter\n\
             softgrep_requests_total {}\n\
             \n\
             # HELP softgrep_errors_total Total number of failed calls\n\
             # TYPE softgrep_errors_total counter\n\
             softgrep_errors_total {}\n\
             \n\
             # HELP softgrep_cancelled_total Calls cancelled during shutdown\n\
             # TYPE softgrep_cancelled_total counter\n\
             softgrep_cancelled_total {}\n\
             \n\
             # HELP softgrep_in_flight Calls currently in flight\n\
             # TYPE softgrep_in_flight gauge\n\
             softgrep_in_flight {}\n\
             \n\
             # HELP softgrep_avg_response_time_ms Average response time in milliseconds\n\
             # TYPE softgrep_avg_response_time_ms gauge\n\
             softgrep_avg_response_time_ms {:.2}\n\
             \n\
             # HELP softgrep_uptime_seconds Uptime in seconds\n\
             # TYPE softgrep_uptime_seconds counter\n\
             softgrep_uptime_seconds {}\n\
             \n",
            metrics.total_requests,
            metrics.total_errors,
            metrics.cancelled_calls,
            metrics.in_flight,
            metrics.avg_response_time_ms,
            metrics.uptime_secs,
        );

        output.push_str(&self.request_latency.export_prometheus(
            "softgrep_request_duration_ms",
            "Call duration in milliseconds"
        ));
        output.push('\n');

        output.push_str(&self.backend_latency.export_prometheus(
            "softgrep_backend_duration_ms",
            "Compute backend duration in milliseconds"
        ));

        output
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector() {
        let collector = MetricsCollector::new();

        collector.record_request(Duration::from_millis(100));
        collector.record_request(Duration::from_millis(200));
        collector.record_error();
        collector.record_cancelled();
        collector.call_started();

        let metrics = collector.get_metrics();

        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.total_errors, 1);
        assert_eq!(metrics.cancelled_calls, 1);
        assert_eq!(metrics.in_flight, 1);
        assert_eq!(metrics.avg_response_time_ms, 150.0);

        collector.call_finished();
        assert_eq!(collector.in_flight(), 0);
    }

    #[test]
    fn test_prometheus_export() {
        let collector = MetricsCollector::new();
        collector.record_request(Duration::from_millis(100));
        collector.record_backend_latency(Duration::from_millis(3));

        let prometheus = collector.export_prometheus();

        assert!(prometheus.contains("softgrep_requests_total 1"));
        assert!(prometheus.contains("softgrep_avg_response_time_ms 100.00"));
        assert!(prometheus.contains("softgrep_request_duration_ms_bucket{le=\"100\"} 1"));
        assert!(prometheus.contains("softgrep_backend_duration_ms_count 1"));
    }
}
