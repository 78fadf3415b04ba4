use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::check::{BetweenStorageCheck, Check, CheckTask};
use crate::checksum::{checksum_range, Checksum};
use crate::config::TransferConfig;
use crate::directory::CopyDir;
use crate::error::{ShuttleError, ShuttleResult};
use crate::scheduler::Scheduler;
use crate::segmented::CopyLargeFile;
use crate::storage::{ReadOptions, Storage, WriteOptions};
use crate::stream::CopyStream;
use crate::task::{StatsSnapshot, Task, TaskMeta, TransferContext, TransferStats};
use crate::utils::format_bytes;

/// Entry point for copying between two storages.
#[derive(Debug, Clone)]
pub struct Transfer {
    ctx: Arc<TransferContext>,
}

pub struct TransferBuilder {
    source: Arc<dyn Storage>,
    destination: Arc<dyn Storage>,
    config: TransferConfig,
    checks: Vec<Arc<dyn Check>>,
}

impl TransferBuilder {
    pub fn config(mut self, config: TransferConfig) -> Self {
        self.config = config;
        self
    }

    /// Appends a check after the ones named in the configuration.
    pub fn check(mut self, check: Arc<dyn Check>) -> Self {
        self.checks.push(check);
        self
    }

    pub fn build(self) -> ShuttleResult<Transfer> {
        self.config.validate()?;

        let mut checks: Vec<Arc<dyn Check>> = self.config.checks.iter().map(|kind| kind.build()).collect();
        checks.extend(self.checks);

        Ok(Transfer {
            ctx: Arc::new(TransferContext {
                source: self.source,
                destination: self.destination,
                scheduler: Scheduler::new(self.config.max_in_flight),
                config: self.config,
                checks,
                stats: TransferStats::default(),
            }),
        })
    }
}

impl Transfer {
    pub fn builder(source: Arc<dyn Storage>, destination: Arc<dyn Storage>) -> TransferBuilder {
        TransferBuilder {
            source,
            destination,
            config: TransferConfig::default(),
            checks: Vec::new(),
        }
    }

    pub async fn copy_dir(&self, source_path: &str, destination_path: &str) -> ShuttleResult<()> {
        info!(
            "Copying directory {} from {} to {} on {}",
            source_path,
            self.ctx.source.name(),
            destination_path,
            self.ctx.destination.name()
        );
        let task = CopyDir::new(&TaskMeta::root(), Arc::clone(&self.ctx), source_path, destination_path);
        self.ctx.scheduler.sync(task).await
    }

    pub async fn copy_file(&self, source_path: &str, destination_path: &str) -> ShuttleResult<()> {
        let task = CopyFile::new(&TaskMeta::root(), Arc::clone(&self.ctx), source_path, destination_path);
        self.ctx.scheduler.sync(task).await
    }

    /// Copies a source of unknown length as a streamed segmented upload.
    /// Precondition checks do not apply.
    pub async fn copy_stream(&self, source_path: &str, destination_path: &str) -> ShuttleResult<()> {
        let task = CopyStream::new(&TaskMeta::root(), Arc::clone(&self.ctx), source_path, destination_path)?;
        self.ctx.scheduler.sync(task).await?;
        self.ctx.stats.record_file();
        Ok(())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }
}

/// Copies one file: runs the precondition checks, then picks a strategy by
/// size.
pub struct CopyFile {
    meta: TaskMeta,
    ctx: Arc<TransferContext>,
    source_path: String,
    destination_path: String,
}

impl CopyFile {
    pub fn new(parent: &TaskMeta, ctx: Arc<TransferContext>, source_path: &str, destination_path: &str) -> Self {
        Self {
            meta: TaskMeta::child_of(parent),
            ctx,
            source_path: source_path.to_string(),
            destination_path: destination_path.to_string(),
        }
    }
}

#[async_trait]
impl Task for CopyFile {
    type Output = ();

    fn kind(&self) -> &'static str {
        "copy_file"
    }

    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self) -> ShuttleResult<()> {
        let scheduler = &self.ctx.scheduler;
        let pair = scheduler
            .sync(BetweenStorageCheck::new(
                &self.meta,
                Arc::clone(&self.ctx),
                &self.source_path,
                &self.destination_path,
            ))
            .await?;

        // Both outcomes leave the loop, so only the first check is consulted.
        for check in &self.ctx.checks {
            let satisfied = scheduler
                .sync(CheckTask::new(&self.meta, Arc::clone(check), pair.clone()))
                .await?;
            if !satisfied {
                break;
            }
            info!("Skipping {}: check {} passed", self.source_path, check.name());
            self.ctx.stats.record_skip();
            return Ok(());
        }

        let size = pair.source.size;
        if size >= self.ctx.config.auto_multipart_threshold {
            let task = CopyLargeFile::new(
                &self.meta,
                Arc::clone(&self.ctx),
                &self.source_path,
                &self.destination_path,
                size,
            );
            scheduler.sync(task).await?;
        } else {
            let task = CopySmallFile::new(
                &self.meta,
                Arc::clone(&self.ctx),
                &self.source_path,
                &self.destination_path,
                size,
            );
            scheduler.sync(task).await?;
        }

        self.ctx.stats.record_file();
        Ok(())
    }
}

/// Copies a file below the segmentation threshold in one write.
pub struct CopySmallFile {
    meta: TaskMeta,
    ctx: Arc<TransferContext>,
    source_path: String,
    destination_path: String,
    size: u64,
}

impl CopySmallFile {
    pub fn new(
        parent: &TaskMeta,
        ctx: Arc<TransferContext>,
        source_path: &str,
        destination_path: &str,
        size: u64,
    ) -> Self {
        Self {
            meta: TaskMeta::child_of(parent),
            ctx,
            source_path: source_path.to_string(),
            destination_path: destination_path.to_string(),
            size,
        }
    }
}

#[async_trait]
impl Task for CopySmallFile {
    type Output = ();

    fn kind(&self) -> &'static str {
        "copy_small_file"
    }

    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self) -> ShuttleResult<()> {
        let checksum = checksum_range(
            self.ctx.source.as_ref(),
            &self.source_path,
            0,
            self.size,
            self.ctx.config.checksum,
        )
        .await
        .map_err(|e| ShuttleError::unhandled("checksum", &self.source_path, e))?;

        let task = CopySingleFile {
            meta: TaskMeta::child_of(&self.meta),
            ctx: Arc::clone(&self.ctx),
            source_path: self.source_path,
            destination_path: self.destination_path,
            size: self.size,
            checksum: Some(checksum),
        };
        self.ctx.scheduler.sync(task).await
    }
}

/// Single-shot write of a whole object.
pub struct CopySingleFile {
    meta: TaskMeta,
    ctx: Arc<TransferContext>,
    source_path: String,
    destination_path: String,
    size: u64,
    checksum: Option<Checksum>,
}

#[async_trait]
impl Task for CopySingleFile {
    type Output = ();

    fn kind(&self) -> &'static str {
        "copy_single_file"
    }

    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self) -> ShuttleResult<()> {
        let reader = self
            .ctx
            .source
            .read(&self.source_path, ReadOptions::default())
            .await
            .map_err(|e| ShuttleError::unhandled("read", &self.source_path, e))?;

        let options = WriteOptions {
            size: self.size,
            checksum: self.checksum,
        };
        self.ctx
            .destination
            .write(&self.destination_path, reader, options)
            .await
            .map_err(|e| ShuttleError::unhandled("write", &self.destination_path, e))?;

        self.ctx.stats.record_bytes(self.size);
        debug!(
            "Copied {} -> {} ({})",
            self.source_path,
            self.destination_path,
            format_bytes(self.size)
        );
        Ok(())
    }
}
