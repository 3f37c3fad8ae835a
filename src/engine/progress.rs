//! Progress display for transfer runs
//!
//! One bar per run, advanced once per collection. Disabled by default; the
//! CLI turns it on with `--progress` or `transfer.show_progress`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};

/// Tracks collections finished in a run
pub struct ProgressTracker {
    collections: AtomicU64,
    documents: AtomicU64,
    start_time: Instant,
    bar: Option<ProgressBar>,
}

impl ProgressTracker {
    /// Create a tracker for `total` collections
    pub fn new(total: u64, enable_bar: bool) -> Self {
        let bar = enable_bar.then(|| {
            let bar = ProgressBar::new(total);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} collections {msg}")
            {
                bar.set_style(style.progress_chars("#>-"));
            }
            bar
        });

        Self {
            collections: AtomicU64::new(0),
            documents: AtomicU64::new(0),
            start_time: Instant::now(),
            bar,
        }
    }

    /// Show the collection currently being processed
    pub fn start_collection(&self, name: &str) {
        if let Some(ref bar) = self.bar {
            bar.set_message(name.to_string());
        }
    }

    /// Mark one collection done, having moved `documents` documents
    pub fn finish_collection(&self, documents: u64) {
        let done = self.collections.fetch_add(1, Ordering::Relaxed) + 1;
        let moved = self.documents.fetch_add(documents, Ordering::Relaxed) + documents;

        if let Some(ref bar) = self.bar {
            bar.set_position(done);
            let elapsed = self.start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                bar.set_message(format!("({:.0} docs/sec)", moved as f64 / elapsed));
            }
        }
    }

    pub fn collections_done(&self) -> u64 {
        self.collections.load(Ordering::Relaxed)
    }

    pub fn documents_moved(&self) -> u64 {
        self.documents.load(Ordering::Relaxed)
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_counts() {
        let tracker = ProgressTracker::new(3, false);
        tracker.start_collection("users");
        tracker.finish_collection(10);
        tracker.finish_collection(5);
        assert_eq!(tracker.collections_done(), 2);
        assert_eq!(tracker.documents_moved(), 15);
        tracker.finish();
    }

    #[test]
    fn test_tracker_with_hidden_bar() {
        let tracker = ProgressTracker::new(1, true);
        tracker.finish_collection(1);
        tracker.finish();
    }
}
