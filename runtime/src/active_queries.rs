use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::context::QueryContext;
use crate::runtime_error::{RuntimeError, RuntimeResult};

/// Width in bytes of one slot of the active query log, newline included.
pub const ENTRY_SIZE: usize = 1000;

const FILE_NAME: &str = "queries.active";

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A query found in a slot of the active query log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveQueryEntry {
    pub query: String,
    pub timestamp_sec: i64,
}

/// Bounds the number of concurrently executing queries. Every running query
/// occupies one slot of a fixed size file, so the queries that were running
/// when the process died can be reported on the next start.
pub struct ActiveQueryTracker {
    path: PathBuf,
    max_concurrent: usize,
    file: Mutex<File>,
    free_slots: Mutex<Vec<usize>>,
    slot_freed: Condvar,
}

impl ActiveQueryTracker {
    pub fn new<P: AsRef<Path>>(dir: P, max_concurrent: usize) -> RuntimeResult<Self> {
        let max_concurrent = max_concurrent.max(1);
        let path = dir.as_ref().join(FILE_NAME);
        log_unfinished_queries(&path);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| io_error(&path, e))?;
        let mut blank = Vec::with_capacity(max_concurrent * ENTRY_SIZE);
        for _ in 0..max_concurrent {
            blank.extend_from_slice(&blank_slot());
        }
        file.write_all(&blank).map_err(|e| io_error(&path, e))?;
        file.flush().map_err(|e| io_error(&path, e))?;

        // popped from the back, so the lowest index is handed out first
        let free_slots = (0..max_concurrent).rev().collect();
        Ok(Self {
            path,
            max_concurrent,
            file: Mutex::new(file),
            free_slots: Mutex::new(free_slots),
            slot_freed: Condvar::new(),
        })
    }

    pub fn get_max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Blocks until a slot is free or `ctx` is done, then records `query` in
    /// it and returns the slot index.
    pub fn insert(&self, ctx: &QueryContext, query: &str) -> RuntimeResult<usize> {
        let idx = self.acquire(ctx)?;
        let entry = encode_entry(query, Utc::now().timestamp());
        if let Err(e) = self.write_slot(idx, &entry) {
            self.release(idx);
            return Err(e);
        }
        Ok(idx)
    }

    /// Blanks the slot and makes it available to the next query.
    pub fn delete(&self, idx: usize) {
        if let Err(e) = self.write_slot(idx, &blank_slot()) {
            warn!(slot = idx, error = %e, "cannot clear active query slot");
        }
        self.release(idx);
    }

    /// Queries currently recorded in the log, in slot order.
    pub fn active_queries(&self) -> RuntimeResult<Vec<ActiveQueryEntry>> {
        let content = std::fs::read(&self.path).map_err(|e| io_error(&self.path, e))?;
        Ok(parse_entries(&content))
    }

    fn acquire(&self, ctx: &QueryContext) -> RuntimeResult<usize> {
        let mut free = self.free_slots.lock().unwrap();
        loop {
            if let Some(err) = ctx.err() {
                return Err(RuntimeError::from_context(err, "query queue"));
            }
            if let Some(idx) = free.pop() {
                return Ok(idx);
            }
            free = self.slot_freed.wait_timeout(free, POLL_INTERVAL).unwrap().0;
        }
    }

    fn release(&self, idx: usize) {
        let mut free = self.free_slots.lock().unwrap();
        if !free.contains(&idx) {
            free.push(idx);
        }
        self.slot_freed.notify_one();
    }

    fn write_slot(&self, idx: usize, data: &[u8]) -> RuntimeResult<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start((idx * ENTRY_SIZE) as u64))
            .and_then(|_| file.write_all(data))
            .and_then(|_| file.flush())
            .map_err(|e| io_error(&self.path, e))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> RuntimeError {
    RuntimeError::General(format!("active query log {}: {err}", path.display()))
}

fn blank_slot() -> Vec<u8> {
    let mut slot = vec![b' '; ENTRY_SIZE];
    slot[ENTRY_SIZE - 1] = b'\n';
    slot
}

/// Encodes the entry into exactly `ENTRY_SIZE` bytes, shortening the query
/// until it fits.
fn encode_entry(query: &str, timestamp_sec: i64) -> Vec<u8> {
    let mut query = query;
    loop {
        let entry = ActiveQueryEntry {
            query: query.to_string(),
            timestamp_sec,
        };
        let json = match serde_json::to_vec(&entry) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "cannot encode active query entry");
                return blank_slot();
            }
        };
        if json.len() < ENTRY_SIZE || query.is_empty() {
            let mut slot = blank_slot();
            let n = json.len().min(ENTRY_SIZE - 1);
            slot[..n].copy_from_slice(&json[..n]);
            return slot;
        }
        let excess = json.len() - (ENTRY_SIZE - 1);
        let mut cut = query.len().saturating_sub(excess);
        while !query.is_char_boundary(cut) {
            cut -= 1;
        }
        query = &query[..cut];
    }
}

fn parse_entries(content: &[u8]) -> Vec<ActiveQueryEntry> {
    content
        .split(|b| *b == b'\n')
        .filter_map(|line| {
            let line = std::str::from_utf8(line).ok()?.trim();
            if line.is_empty() {
                return None;
            }
            serde_json::from_str(line).ok()
        })
        .collect()
}

fn log_unfinished_queries(path: &Path) {
    let Ok(content) = std::fs::read(path) else {
        return;
    };
    let entries = parse_entries(&content);
    if entries.is_empty() {
        return;
    }
    info!(count = entries.len(), "queries that were running when the process stopped");
    for entry in entries {
        warn!(query = entry.query.as_str(), timestamp_sec = entry.timestamp_sec, "unfinished query");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn slots_are_written_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ActiveQueryTracker::new(dir.path(), 2).unwrap();
        assert_eq!(tracker.get_max_concurrent(), 2);
        let size = std::fs::metadata(tracker.path()).unwrap().len();
        assert_eq!(size as usize, 2 * ENTRY_SIZE);

        let ctx = QueryContext::background();
        let a = tracker.insert(&ctx, "up").unwrap();
        let b = tracker.insert(&ctx, r#"sum(rate(http_requests_total{job="api"}[5m]))"#).unwrap();
        assert_eq!((a, b), (0, 1));
        let queries: Vec<String> = tracker.active_queries().unwrap().into_iter().map(|e| e.query).collect();
        assert_eq!(queries, vec!["up".to_string(), r#"sum(rate(http_requests_total{job="api"}[5m]))"#.to_string()]);

        tracker.delete(a);
        let queries: Vec<String> = tracker.active_queries().unwrap().into_iter().map(|e| e.query).collect();
        assert_eq!(queries.len(), 1);
        assert_eq!(tracker.insert(&ctx, "again").unwrap(), 0);
    }

    #[test]
    fn long_queries_are_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ActiveQueryTracker::new(dir.path(), 1).unwrap();
        let long = "é".repeat(ENTRY_SIZE);
        tracker.insert(&QueryContext::background(), &long).unwrap();
        let entries = tracker.active_queries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].query.is_empty());
        assert!(entries[0].query.len() < ENTRY_SIZE);
        assert!(long.starts_with(&entries[0].query));
        assert_eq!(std::fs::metadata(tracker.path()).unwrap().len() as usize, ENTRY_SIZE);
    }

    #[test]
    fn encoded_entry_fills_one_slot() {
        let slot = encode_entry(r#"up{job="api"}"#, 1_700_000_000);
        assert_eq!(slot.len(), ENTRY_SIZE);
        assert_eq!(slot[ENTRY_SIZE - 1], b'\n');
        assert_eq!(
            parse_entries(&slot),
            vec![ActiveQueryEntry {
                query: r#"up{job="api"}"#.to_string(),
                timestamp_sec: 1_700_000_000,
            }]
        );
    }

    #[test]
    fn leftover_entries_are_cleared_on_start() {
        let dir = tempfile::tempdir().unwrap();
        {
            let tracker = ActiveQueryTracker::new(dir.path(), 2).unwrap();
            tracker.insert(&QueryContext::background(), "orphan").unwrap();
        }
        let tracker = ActiveQueryTracker::new(dir.path(), 3).unwrap();
        assert!(tracker.active_queries().unwrap().is_empty());
        assert_eq!(std::fs::metadata(tracker.path()).unwrap().len() as usize, 3 * ENTRY_SIZE);
    }

    #[test]
    fn insert_waits_for_a_free_slot() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = Arc::new(ActiveQueryTracker::new(dir.path(), 1).unwrap());
        let ctx = QueryContext::background();
        let first = tracker.insert(&ctx, "first").unwrap();

        let waiter = {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || tracker.insert(&QueryContext::background(), "second"))
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());
        tracker.delete(first);
        assert_eq!(waiter.join().unwrap().unwrap(), first);
    }

    #[test]
    fn insert_gives_up_when_context_ends() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ActiveQueryTracker::new(dir.path(), 1).unwrap();
        tracker.insert(&QueryContext::background(), "busy").unwrap();

        let ctx = QueryContext::background().with_timeout(Duration::from_millis(20));
        assert_eq!(
            tracker.insert(&ctx, "late"),
            Err(RuntimeError::QueryTimeout("query queue".to_string()))
        );
        let ctx = QueryContext::background().with_cancel();
        ctx.cancel();
        assert_eq!(
            tracker.insert(&ctx, "late"),
            Err(RuntimeError::QueryCanceled("query queue".to_string()))
        );
    }
}
