//! Live progress: shared counters, a recent-activity window and a polling
//! reporter thread.
//!
//! The engine only ever performs relaxed atomic increments and a short
//! mutex-guarded push; the reporter thread reads snapshots on its own
//! cadence and never mutates crawl state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::model::size::{format_count, format_duration, format_size};
use crate::model::Aggregate;

/// Default number of completed containers kept in [`RecentActivity`].
pub const DEFAULT_RECENT_WINDOW: usize = 10;

/// Running totals for one crawl, shared with the progress thread and the
/// inspection workers.
#[derive(Debug)]
pub struct CrawlStats {
    files: AtomicU64,
    folders: AtomicU64,
    bytes: AtomicU64,
    skipped: AtomicU64,
    inspected: AtomicU64,
    inspect_failed: AtomicU64,
    started: Instant,
    running: AtomicBool,
}

impl Default for CrawlStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlStats {
    pub fn new() -> Self {
        Self {
            files: AtomicU64::new(0),
            folders: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            inspected: AtomicU64::new(0),
            inspect_failed: AtomicU64::new(0),
            started: Instant::now(),
            running: AtomicBool::new(true),
        }
    }

    /// Start from the restored root's totals when resuming.
    pub fn seeded(agg: &Aggregate) -> Self {
        let stats = Self::new();
        stats.files.store(agg.files, Ordering::Relaxed);
        stats.folders.store(agg.folders, Ordering::Relaxed);
        stats.bytes.store(agg.size, Ordering::Relaxed);
        stats
    }

    #[inline]
    pub fn add_file(&self, size: u64) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_folder(&self) {
        self.folders.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_inspected(&self) {
        self.inspected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_inspect_failed(&self) {
        self.inspect_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files: self.files.load(Ordering::Relaxed),
            folders: self.folders.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            inspected: self.inspected.load(Ordering::Relaxed),
            inspect_failed: self.inspect_failed.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
            running: self.running.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CrawlStats`].
#[derive(Clone, Debug, PartialEq)]
pub struct StatsSnapshot {
    pub files: u64,
    pub folders: u64,
    pub bytes: u64,
    pub skipped: u64,
    pub inspected: u64,
    pub inspect_failed: u64,
    pub elapsed: Duration,
    pub running: bool,
}

impl StatsSnapshot {
    /// One-line human summary for console progress.
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "{} files, {} folders, {} in {}",
            format_count(self.files),
            format_count(self.folders),
            format_size(self.bytes),
            format_duration(self.elapsed)
        );
        if self.skipped > 0 {
            line.push_str(&format!(", {} skipped", format_count(self.skipped)));
        }
        if self.inspected + self.inspect_failed > 0 {
            line.push_str(&format!(
                ", {} inspected ({} failed)",
                format_count(self.inspected),
                format_count(self.inspect_failed)
            ));
        }
        line
    }
}

/// A recently completed container.
#[derive(Clone, Debug, PartialEq)]
pub struct ActivityEntry {
    pub path: String,
    pub size: u64,
    pub files: u64,
    pub elapsed_secs: f64,
}

/// Bounded window of the latest completed containers, newest last.
#[derive(Debug)]
pub struct RecentActivity {
    window: Mutex<VecDeque<ActivityEntry>>,
    capacity: usize,
}

impl RecentActivity {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn push(&self, entry: ActivityEntry) {
        let mut window = self.window.lock();
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(entry);
    }

    pub fn snapshot(&self) -> Vec<ActivityEntry> {
        self.window.lock().iter().cloned().collect()
    }
}

impl Default for RecentActivity {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_WINDOW)
    }
}

/// Polls [`CrawlStats`] and [`RecentActivity`] on a background thread and
/// hands each snapshot to a render callback.
pub struct ProgressReporter {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn spawn<F>(
        stats: Arc<CrawlStats>,
        activity: Arc<RecentActivity>,
        interval: Duration,
        mut render: F,
    ) -> Self
    where
        F: FnMut(&StatsSnapshot, &[ActivityEntry]) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("cloudsleuth-progress".into())
            .spawn(move || loop {
                thread::park_timeout(interval);
                let done = stop_flag.load(Ordering::Acquire);
                render(&stats.snapshot(), &activity.snapshot());
                if done {
                    break;
                }
            })
            .expect("failed to spawn progress thread");
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop polling; the final snapshot is rendered before this returns.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop.store(true, Ordering::Release);
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
