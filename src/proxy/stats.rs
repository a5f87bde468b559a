//! Shared URL access statistics.
//!
//! Counts request targets seen by request-direction forwarders and renders
//! the final top-N report.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tokio::sync::Mutex;

/// Number of entries in the final report.
pub const REPORT_TOP_N: usize = 10;

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u64,
    first_seen: u64,
}

#[derive(Debug, Default)]
struct Inner {
    counts: HashMap<String, Entry>,
    next_seen: u64,
}

/// Thread-safe URL occurrence counter.
///
/// Counts are keyed by the verbatim request target and never decrease.
/// Snapshots order by count descending with ties broken by first-insertion
/// order, matching an encounter-order-stable frequency counter.
#[derive(Debug, Default)]
pub struct UrlStats {
    inner: Mutex<Inner>,
}

impl UrlStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence of a request target.
    pub async fn increment(&self, target: &str) {
        let mut guard = self.inner.lock().await;
        let Inner { counts, next_seen } = &mut *guard;
        let entry = counts.entry(target.to_string()).or_insert_with(|| {
            let entry = Entry {
                count: 0,
                first_seen: *next_seen,
            };
            *next_seen += 1;
            entry
        });
        entry.count += 1;
    }

    /// True when no request target has been counted yet.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.counts.is_empty()
    }

    /// Snapshot of up to `n` targets ordered by count descending.
    ///
    /// Computed from a stable copy so concurrent increments cannot skew an
    /// in-progress snapshot.
    pub async fn top_n(&self, n: usize) -> Vec<(String, u64)> {
        let mut entries: Vec<(String, Entry)> = {
            let guard = self.inner.lock().await;
            guard
                .counts
                .iter()
                .map(|(target, entry)| (target.clone(), *entry))
                .collect()
        };

        entries.sort_by(|a, b| {
            b.1.count
                .cmp(&a.1.count)
                .then(a.1.first_seen.cmp(&b.1.first_seen))
        });
        entries.truncate(n);
        entries
            .into_iter()
            .map(|(target, entry)| (target, entry.count))
            .collect()
    }
}

/// Render the report body for a snapshot.
pub fn render_report(entries: &[(String, u64)]) -> String {
    let mut out = String::from("Top Accessed URLs:\n");
    for (url, count) in entries {
        out.push_str(&format!("{}: {} times\n", url, count));
    }
    out
}

/// Persist the final report to `path`.
pub fn write_report(path: &Path, entries: &[(String, u64)]) -> Result<()> {
    std::fs::write(path, render_report(entries))
        .with_context(|| format!("Failed to write report file: {}", path.display()))
}
