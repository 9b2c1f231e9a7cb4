//! Process-wide counters behind the `GET /` status endpoint.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

use chrono::Utc;
use serde::Serialize;
use sysinfo::System;
use utoipa::ToSchema;

/// Start time and request count for this process. Created once at startup and
/// shared by the request counting layer and the status handler.
#[derive(Debug)]
pub struct ServerStats {
    started_at: Instant,
    requests_processed: AtomicU64,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            requests_processed: AtomicU64::new(0),
        }
    }

    pub fn record_request(&self) {
        self.requests_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_processed(&self) -> u64 {
        self.requests_processed.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Samples host memory now; counters are read without blocking writers.
    pub fn snapshot(&self) -> StatusResponse {
        StatusResponse {
            current_server_time: Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            server_uptime: format_uptime(self.uptime()),
            requests_processed: self.requests_processed(),
            memory_info: MemoryInfo::sample(),
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatusResponse {
    /// UTC, `YYYY-MM-DD HH:MM:SS`.
    pub current_server_time: String,
    /// `H:M:S` with unpadded components.
    pub server_uptime: String,
    pub requests_processed: u64,
    pub memory_info: MemoryInfo,
}

/// Host memory in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct MemoryInfo {
    pub total: u64,
    pub available: u64,
    pub percent: f64,
    pub used: u64,
    pub free: u64,
}

impl MemoryInfo {
    pub fn sample() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self::from_parts(
            system.total_memory(),
            system.available_memory(),
            system.used_memory(),
            system.free_memory(),
        )
    }

    fn from_parts(total: u64, available: u64, used: u64, free: u64) -> Self {
        Self {
            total,
            available,
            percent: usage_percent(total, available),
            used,
            free,
        }
    }
}

/// Share of memory not available, rounded to one decimal.
fn usage_percent(total: u64, available: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let used = total.saturating_sub(available) as f64;
    (used / total as f64 * 1000.0).round() / 10.0
}

fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{}:{}:{}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_components_are_unpadded() {
        assert_eq!(format_uptime(Duration::from_secs(0)), "0:0:0");
        assert_eq!(format_uptime(Duration::from_secs(61)), "0:1:1");
        assert_eq!(format_uptime(Duration::from_secs(3600 * 27 + 5 * 60 + 9)), "27:5:9");
    }

    #[test]
    fn usage_percent_rounds_to_one_decimal() {
        assert_eq!(usage_percent(1000, 250), 75.0);
        assert_eq!(usage_percent(3, 2), 33.3);
        assert_eq!(usage_percent(0, 0), 0.0);
        assert_eq!(usage_percent(100, 200), 0.0);
    }

    #[test]
    fn counter_is_lossless_across_threads() {
        let stats = std::sync::Arc::new(ServerStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..1_000 {
                        stats.record_request();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.requests_processed(), 8_000);
    }

    #[test]
    fn snapshot_reports_current_counts() {
        let stats = ServerStats::new();
        stats.record_request();
        stats.record_request();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.requests_processed, 2);
        assert_eq!(snapshot.server_uptime, "0:0:0");
        assert_eq!(snapshot.current_server_time.len(), "2024-01-01 00:00:00".len());
        assert!(snapshot.memory_info.total >= snapshot.memory_info.free);
    }

    #[test]
    fn memory_info_from_parts_derives_percent() {
        let info = MemoryInfo::from_parts(8_000, 2_000, 5_500, 500);
        assert_eq!(info.percent, 75.0);
        assert_eq!(info.used, 5_500);
    }
}
