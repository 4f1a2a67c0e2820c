use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::info;

const PROGRESS_STEP_PERCENT: u8 = 10;

/// Indexing progress shared between the producer and any sink workers.
#[derive(Debug)]
pub struct Progress {
    label: &'static str,
    total: usize,
    indexed: AtomicUsize,
    failed: AtomicUsize,
    last_percent: Mutex<u8>,
}

impl Progress {
    pub fn new(label: &'static str, total: usize) -> Self {
        Self {
            label,
            total,
            indexed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            last_percent: Mutex::new(0),
        }
    }

    pub fn record_indexed(&self, count: usize) {
        self.indexed.fetch_add(count, Ordering::Relaxed);
        self.maybe_log();
    }

    pub fn record_failed(&self, count: usize) {
        self.failed.fetch_add(count, Ordering::Relaxed);
        self.maybe_log();
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn indexed(&self) -> usize {
        self.indexed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> usize {
        self.indexed().saturating_add(self.failed())
    }

    fn maybe_log(&self) {
        if self.total == 0 {
            return;
        }

        let processed = self.processed();
        let percent = (processed.saturating_mul(100) / self.total).min(100) as u8;

        let Ok(mut last_percent) = self.last_percent.lock() else {
            return;
        };
        let should_log = percent >= last_percent.saturating_add(PROGRESS_STEP_PERCENT)
            || (percent == 100 && *last_percent < 100);

        if should_log {
            *last_percent = percent;
            info!(
                label = self.label,
                percent,
                indexed = self.indexed(),
                failed = self.failed(),
                total = self.total,
                "indexing progress"
            );
        }
    }
}
