use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, Instant},
};

/// Counters updated by every fetch worker of a download.
///
/// They are only meant for display. Nothing in the downloaders reads them back.
#[derive(Debug)]
pub struct DownloadProgress {
    started_at: Instant,

    total_units: AtomicU64,
    completed_units: AtomicU64,
    failed_units: AtomicU64,

    bytes_transferred: AtomicU64,
    /// `0` when unknown
    total_bytes: AtomicU64,
}

impl Default for DownloadProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_units: AtomicU64::new(0),
            completed_units: AtomicU64::new(0),
            failed_units: AtomicU64::new(0),
            bytes_transferred: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
        }
    }

    pub fn add_total_units(&self, units: u64) {
        self.total_units.fetch_add(units, Ordering::Relaxed);
    }

    pub fn set_total_bytes(&self, bytes: u64) {
        self.total_bytes.store(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.bytes_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn complete_unit(&self) {
        self.completed_units.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fail_unit(&self) {
        self.failed_units.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let total_bytes = self.total_bytes.load(Ordering::Relaxed);
        ProgressSnapshot {
            total_units: self.total_units.load(Ordering::Relaxed),
            completed_units: self.completed_units.load(Ordering::Relaxed),
            failed_units: self.failed_units.load(Ordering::Relaxed),
            bytes_transferred: self.bytes_transferred.load(Ordering::Relaxed),
            total_bytes: (total_bytes > 0).then_some(total_bytes),
            elapsed: self.started_at.elapsed(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub total_units: u64,
    pub completed_units: u64,
    pub failed_units: u64,
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    /// Percentage by bytes when the size is known, by units otherwise.
    pub fn percent(&self) -> Option<f64> {
        if let Some(total_bytes) = self.total_bytes {
            return Some(self.bytes_transferred as f64 / total_bytes as f64 * 100.);
        }
        if self.total_units == 0 {
            return None;
        }
        let finished = self.completed_units + self.failed_units;
        Some(finished as f64 / self.total_units as f64 * 100.)
    }

    /// Bytes per second.
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0. {
            return 0.;
        }
        self.bytes_transferred as f64 / secs
    }

    pub fn units_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0. {
            return 0.;
        }
        self.completed_units as f64 / secs
    }

    pub fn eta(&self) -> Option<Duration> {
        if let Some(total_bytes) = self.total_bytes {
            let speed = self.throughput();
            if speed <= 0. {
                return None;
            }
            let remaining = total_bytes.saturating_sub(self.bytes_transferred);
            return Some(Duration::from_secs_f64(remaining as f64 / speed));
        }

        let speed = self.units_per_second();
        if self.total_units == 0 || speed <= 0. {
            return None;
        }
        let remaining = self
            .total_units
            .saturating_sub(self.completed_units + self.failed_units);
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }
}
