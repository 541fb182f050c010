//! Collaboration Memory
//!
//! Append-only record of every run, persisted as a JSON-lines log with
//! fsync'd writes. A secondary in-memory index (byte offsets, per-worker
//! postings, confidence buckets) is rebuilt on startup and updated on every
//! append. Writes serialize behind a single-writer lock; readers work from a
//! snapshot of the offset index and never block writers.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use kestrel_core::types::{RunRecord, WorkerId};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};

/// Number of confidence histogram buckets (width 0.1).
const CONFIDENCE_BUCKETS: usize = 10;

/// Search filters; all optional, combined conjunctively.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    pub query_substring: Option<String>,
    pub worker: Option<WorkerId>,
    pub min_confidence: Option<f32>,
}

/// Aggregate statistics over the whole log.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total_runs: usize,
    pub per_worker_counts: HashMap<String, usize>,
    pub confidence_histogram: Vec<usize>,
}

#[derive(Debug, Default, Clone)]
struct MemoryIndex {
    /// Byte offset of every record, in append order.
    offsets: Vec<u64>,
    /// Record positions (into `offsets`) per worker.
    by_worker: HashMap<WorkerId, Vec<usize>>,
    /// Record positions per confidence bucket.
    confidence_buckets: Vec<Vec<usize>>,
}

impl MemoryIndex {
    fn new() -> Self {
        Self {
            offsets: Vec::new(),
            by_worker: HashMap::new(),
            confidence_buckets: vec![Vec::new(); CONFIDENCE_BUCKETS],
        }
    }

    fn register(&mut self, offset: u64, record: &RunRecord) {
        let position = self.offsets.len();
        self.offsets.push(offset);
        for worker in &record.selected_workers {
            self.by_worker.entry(*worker).or_default().push(position);
        }
        let bucket = confidence_bucket(record.reflection.confidence);
        self.confidence_buckets[bucket].push(position);
    }
}

/// Durable append-only store of run records.
pub struct CollaborationMemory {
    path: PathBuf,
    writer: Mutex<File>,
    index: RwLock<MemoryIndex>,
}

impl CollaborationMemory {
    /// Open (or create) the log at `path`, rebuilding the index from any
    /// existing records. Undecodable lines are skipped with a warning so one
    /// corrupt record cannot take the whole history down.
    pub fn open(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let writer = OpenOptions::new().create(true).append(true).open(path)?;

        let mut index = MemoryIndex::new();
        if path.exists() {
            let file = File::open(path)?;
            let mut reader = BufReader::new(file);
            let mut offset = 0u64;
            let mut line = String::new();
            loop {
                line.clear();
                let read = reader.read_line(&mut line)?;
                if read == 0 {
                    break;
                }
                match serde_json::from_str::<RunRecord>(line.trim_end()) {
                    Ok(record) => index.register(offset, &record),
                    Err(e) => {
                        warn!(target: "kestrel_memory", "skipping undecodable log line: {}", e)
                    }
                }
                offset += read as u64;
            }
        }

        info!(
            target: "kestrel_memory",
            records = index.offsets.len(),
            path = %path.display(),
            "opened collaboration log"
        );

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
            index: RwLock::new(index),
        })
    }

    /// Atomically append one record. The line is written and fsync'd before
    /// the index is updated, so readers never see an offset without bytes.
    pub async fn append(&self, record: &RunRecord) -> AppResult<()> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock().await;
        let offset = writer.seek(SeekFrom::End(0))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.sync_data()?;
        drop(writer);

        self.index
            .write()
            .map_err(|_| AppError::internal("memory index lock poisoned"))?
            .register(offset, record);
        Ok(())
    }

    /// The `n` most recent records, newest first.
    pub fn recent(&self, n: usize) -> AppResult<Vec<RunRecord>> {
        let offsets = self.snapshot_offsets()?;
        let take = offsets.len().saturating_sub(n);
        let mut records = self.read_at(&offsets[take..])?;
        records.reverse();
        Ok(records)
    }

    /// Records matching every provided filter, newest first.
    pub fn search(&self, query: &MemoryQuery) -> AppResult<Vec<RunRecord>> {
        let (offsets, positions) = {
            let index = self
                .index
                .read()
                .map_err(|_| AppError::internal("memory index lock poisoned"))?;
            let positions: Vec<usize> = match query.worker {
                Some(worker) => index.by_worker.get(&worker).cloned().unwrap_or_default(),
                None => (0..index.offsets.len()).collect(),
            };
            (index.offsets.clone(), positions)
        };

        let candidate_offsets: Vec<u64> = positions.iter().map(|&p| offsets[p]).collect();
        let mut matches: Vec<RunRecord> = self
            .read_at(&candidate_offsets)?
            .into_iter()
            .filter(|record| {
                if let Some(substring) = &query.query_substring {
                    if !record
                        .query
                        .to_lowercase()
                        .contains(&substring.to_lowercase())
                    {
                        return false;
                    }
                }
                if let Some(min) = query.min_confidence {
                    if record.reflection.confidence < min {
                        return false;
                    }
                }
                true
            })
            .collect();
        matches.reverse();
        Ok(matches)
    }

    /// Aggregate statistics from the index alone (no file reads).
    pub fn stats(&self) -> AppResult<MemoryStats> {
        let index = self
            .index
            .read()
            .map_err(|_| AppError::internal("memory index lock poisoned"))?;
        Ok(MemoryStats {
            total_runs: index.offsets.len(),
            per_worker_counts: index
                .by_worker
                .iter()
                .map(|(worker, positions)| (worker.to_string(), positions.len()))
                .collect(),
            confidence_histogram: index
                .confidence_buckets
                .iter()
                .map(Vec::len)
                .collect(),
        })
    }

    fn snapshot_offsets(&self) -> AppResult<Vec<u64>> {
        Ok(self
            .index
            .read()
            .map_err(|_| AppError::internal("memory index lock poisoned"))?
            .offsets
            .clone())
    }

    /// Read and decode the records at the given byte offsets.
    fn read_at(&self, offsets: &[u64]) -> AppResult<Vec<RunRecord>> {
        if offsets.is_empty() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut records = Vec::with_capacity(offsets.len());
        for &offset in offsets {
            reader.seek(SeekFrom::Start(offset))?;
            let mut line = String::new();
            reader.read_line(&mut line)?;
            match serde_json::from_str::<RunRecord>(line.trim_end()) {
                Ok(record) => records.push(record),
                Err(e) => warn!(target: "kestrel_memory", "skipping undecodable record: {}", e),
            }
        }
        Ok(records)
    }
}

fn confidence_bucket(confidence: f32) -> usize {
    ((confidence.clamp(0.0, 1.0) * CONFIDENCE_BUCKETS as f32) as usize)
        .min(CONFIDENCE_BUCKETS - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kestrel_core::types::{Framework, Reflection, TaskKind};

    fn record(query: &str, workers: Vec<WorkerId>, confidence: f32) -> RunRecord {
        RunRecord {
            run_id: uuid::Uuid::new_v4().to_string(),
            parent_run_id: None,
            query: query.to_string(),
            task_kind: TaskKind::Analyze,
            selected_workers: workers,
            framework: Framework::None,
            worker_results: Vec::new(),
            synthesis_text: "brief".to_string(),
            reflection: Reflection {
                confidence,
                ..Reflection::degraded("")
            },
            iteration_count: 1,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    fn open_memory() -> (tempfile::TempDir, CollaborationMemory) {
        let dir = tempfile::tempdir().unwrap();
        let memory = CollaborationMemory::open(&dir.path().join("collaboration.log")).unwrap();
        (dir, memory)
    }

    #[tokio::test]
    async fn append_then_recent_returns_newest_first() {
        let (_dir, memory) = open_memory();
        memory
            .append(&record("first", vec![WorkerId::Analyst], 0.8))
            .await
            .unwrap();
        memory
            .append(&record("second", vec![WorkerId::Geo], 0.9))
            .await
            .unwrap();

        let recent = memory.recent(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].query, "second");

        let both = memory.recent(10).unwrap();
        assert_eq!(both.len(), 2);
        assert_eq!(both[0].query, "second");
        assert_eq!(both[1].query, "first");
    }

    #[tokio::test]
    async fn index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collaboration.log");
        {
            let memory = CollaborationMemory::open(&path).unwrap();
            memory
                .append(&record("persisted", vec![WorkerId::Analyst], 0.7))
                .await
                .unwrap();
        }
        let reopened = CollaborationMemory::open(&path).unwrap();
        let recent = reopened.recent(5).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].query, "persisted");
    }

    #[tokio::test]
    async fn search_filters_compose() {
        let (_dir, memory) = open_memory();
        memory
            .append(&record("Sudan conflict", vec![WorkerId::Analyst, WorkerId::Geo], 0.9))
            .await
            .unwrap();
        memory
            .append(&record("Sudan economy", vec![WorkerId::Analyst], 0.4))
            .await
            .unwrap();
        memory
            .append(&record("Mali governance", vec![WorkerId::Geo], 0.8))
            .await
            .unwrap();

        let results = memory
            .search(&MemoryQuery {
                query_substring: Some("sudan".to_string()),
                worker: Some(WorkerId::Geo),
                min_confidence: Some(0.5),
            })
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].query, "Sudan conflict");
    }

    #[tokio::test]
    async fn stats_count_workers_and_confidence() {
        let (_dir, memory) = open_memory();
        memory
            .append(&record("a", vec![WorkerId::Analyst], 0.95))
            .await
            .unwrap();
        memory
            .append(&record("b", vec![WorkerId::Analyst, WorkerId::Geo], 0.35))
            .await
            .unwrap();

        let stats = memory.stats().unwrap();
        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.per_worker_counts.get("analyst"), Some(&2));
        assert_eq!(stats.per_worker_counts.get("geo"), Some(&1));
        assert_eq!(stats.confidence_histogram[9], 1);
        assert_eq!(stats.confidence_histogram[3], 1);
    }
}
