//! The unit of work and the context shared down a task tree.
//!
//! A task is planned once, when it is constructed: constructors compute every
//! derived value (part size, done flag, buffered content) and fail instead of
//! returning a task if the inputs are invalid. Anything a constructor exposes
//! can be read right after construction, before or while the task executes.
//! [`Task::execute`] consumes the task, so it runs at most once.

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::check::Check;
use crate::config::TransferConfig;
use crate::error::ShuttleResult;
use crate::scheduler::Scheduler;
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a task and of the task that spawned it.
#[derive(Debug, Clone, Copy)]
pub struct TaskMeta {
    pub id: TaskId,
    pub parent: Option<TaskId>,
}

impl TaskMeta {
    pub fn root() -> Self {
        Self {
            id: TaskId::new(),
            parent: None,
        }
    }

    pub fn child_of(parent: &TaskMeta) -> Self {
        Self {
            id: TaskId::new(),
            parent: Some(parent.id),
        }
    }
}

#[async_trait]
pub trait Task: Send + Sized + 'static {
    type Output: Send + 'static;

    fn kind(&self) -> &'static str;

    fn meta(&self) -> &TaskMeta;

    async fn execute(self) -> ShuttleResult<Self::Output>;
}

/// State shared by every task of one transfer. Storage handles are borrowed
/// by tasks, never owned.
pub struct TransferContext {
    pub source: Arc<dyn Storage>,
    pub destination: Arc<dyn Storage>,
    pub scheduler: Scheduler,
    pub config: TransferConfig,
    pub checks: Vec<Arc<dyn Check>>,
    pub stats: TransferStats,
}

impl fmt::Debug for TransferContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferContext")
            .field("source", &self.source.name())
            .field("destination", &self.destination.name())
            .field("scheduler", &self.scheduler)
            .field("config", &self.config)
            .field("checks", &self.checks.iter().map(|c| c.name()).collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
impl TransferContext {
    pub(crate) fn for_tests(
        source: Arc<dyn Storage>,
        destination: Arc<dyn Storage>,
        config: TransferConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            destination,
            scheduler: Scheduler::new(config.max_in_flight),
            config,
            checks: Vec::new(),
            stats: TransferStats::default(),
        })
    }
}

#[derive(Debug, Default)]
pub struct TransferStats {
    files_copied: AtomicU64,
    files_skipped: AtomicU64,
    dirs_copied: AtomicU64,
    parts_written: AtomicU64,
    bytes_written: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub files_copied: u64,
    pub files_skipped: u64,
    pub dirs_copied: u64,
    pub parts_written: u64,
    pub bytes_written: u64,
}

impl TransferStats {
    pub fn record_file(&self) {
        self.files_copied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dir(&self) {
        self.dirs_copied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_part(&self, bytes: u64) {
        self.parts_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_bytes(&self, bytes: u64) {
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files_copied: self.files_copied.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            dirs_copied: self.dirs_copied.load(Ordering::Relaxed),
            parts_written: self.parts_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}
