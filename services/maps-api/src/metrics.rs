//! Application metrics collection and reporting.

use metrics::counter;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics collector for the maps API.
///
/// Counters are atomics for lock-free JSON snapshots; every increment is
/// mirrored into the Prometheus recorder.
#[derive(Debug)]
pub struct MetricsCollector {
    pub map_requests: AtomicU64,
    pub info_requests: AtomicU64,
    pub time_player_requests: AtomicU64,

    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub stale_served: AtomicU64,

    pub refreshes_enqueued: AtomicU64,
    pub refreshes_debounced: AtomicU64,
    pub refresh_failures: AtomicU64,

    pub query_errors: AtomicU64,

    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            map_requests: AtomicU64::new(0),
            info_requests: AtomicU64::new(0),
            time_player_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
            refreshes_enqueued: AtomicU64::new(0),
            refreshes_debounced: AtomicU64::new(0),
            refresh_failures: AtomicU64::new(0),
            query_errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_request(&self, endpoint: &'static str) {
        match endpoint {
            "map" => &self.map_requests,
            "info" => &self.info_requests,
            _ => &self.time_player_requests,
        }
        .fetch_add(1, Ordering::Relaxed);
        counter!("maps_requests_total", "endpoint" => endpoint).increment(1);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        counter!("maps_cache_hits_total").increment(1);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        counter!("maps_cache_misses_total").increment(1);
    }

    pub fn record_stale_served(&self) {
        self.stale_served.fetch_add(1, Ordering::Relaxed);
        counter!("maps_cache_stale_served_total").increment(1);
    }

    pub fn record_refresh_enqueued(&self) {
        self.refreshes_enqueued.fetch_add(1, Ordering::Relaxed);
        counter!("maps_refreshes_enqueued_total").increment(1);
    }

    pub fn record_refresh_debounced(&self) {
        self.refreshes_debounced.fetch_add(1, Ordering::Relaxed);
        counter!("maps_refreshes_debounced_total").increment(1);
    }

    pub fn record_refresh_failure(&self) {
        self.refresh_failures.fetch_add(1, Ordering::Relaxed);
        counter!("maps_refresh_failures_total").increment(1);
    }

    pub fn record_query_error(&self) {
        self.query_errors.fetch_add(1, Ordering::Relaxed);
        counter!("maps_query_errors_total").increment(1);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            map_requests: self.map_requests.load(Ordering::Relaxed),
            info_requests: self.info_requests.load(Ordering::Relaxed),
            time_player_requests: self.time_player_requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            refreshes_enqueued: self.refreshes_enqueued.load(Ordering::Relaxed),
            refreshes_debounced: self.refreshes_debounced.load(Ordering::Relaxed),
            refresh_failures: self.refresh_failures.load(Ordering::Relaxed),
            query_errors: self.query_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time counter values for the JSON stats endpoint.
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub map_requests: u64,
    pub info_requests: u64,
    pub time_player_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub stale_served: u64,
    pub refreshes_enqueued: u64,
    pub refreshes_debounced: u64,
    pub refresh_failures: u64,
    pub query_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let collector = MetricsCollector::new();
        collector.record_request("map");
        collector.record_request("map");
        collector.record_request("info");
        collector.record_cache_hit();
        collector.record_stale_served();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.map_requests, 2);
        assert_eq!(snapshot.info_requests, 1);
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.stale_served, 1);
        assert_eq!(snapshot.query_errors, 0);
    }
}
