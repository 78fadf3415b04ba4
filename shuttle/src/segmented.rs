//! Segmented copy of a file whose size is known up front.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::checksum::checksum_range;
use crate::error::{ShuttleError, ShuttleResult};
use crate::storage::{ReadOptions, SegmentId, SegmentPart, Segmenter};
use crate::task::{Task, TaskMeta, TransferContext};
use crate::utils::{calculate_part_size_with, format_bytes};

/// Planned coordinates of one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartDescriptor {
    pub offset: u64,
    pub size: u64,
    /// Set on the last part of the transfer only.
    pub done: bool,
}

/// Plans the part starting at `offset` of a `total` byte transfer.
pub fn plan_part(total: u64, part_size: u64, offset: u64) -> ShuttleResult<PartDescriptor> {
    if part_size == 0 || offset >= total {
        return Err(ShuttleError::InvalidPart { offset, total });
    }
    Ok(PartDescriptor {
        offset,
        size: part_size.min(total - offset),
        done: offset + part_size >= total,
    })
}

pub(crate) fn segmenter_of<'a>(ctx: &'a TransferContext, path: &str) -> ShuttleResult<&'a dyn Segmenter> {
    ctx.destination
        .as_segmenter()
        .ok_or_else(|| ShuttleError::SegmenterUnsupported { path: path.to_string() })
}

/// Parameters shared by every part of one segmented upload.
#[derive(Debug)]
pub struct SegmentUpload {
    pub segment_id: SegmentId,
    pub source_path: String,
    pub destination_path: String,
    pub total_size: u64,
    pub part_size: u64,
}

pub struct CopyLargeFile {
    meta: TaskMeta,
    ctx: Arc<TransferContext>,
    source_path: String,
    destination_path: String,
    total_size: u64,
}

impl CopyLargeFile {
    pub fn new(
        parent: &TaskMeta,
        ctx: Arc<TransferContext>,
        source_path: &str,
        destination_path: &str,
        total_size: u64,
    ) -> Self {
        Self {
            meta: TaskMeta::child_of(parent),
            ctx,
            source_path: source_path.to_string(),
            destination_path: destination_path.to_string(),
            total_size,
        }
    }
}

#[async_trait]
impl Task for CopyLargeFile {
    type Output = ();

    fn kind(&self) -> &'static str {
        "copy_large_file"
    }

    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self) -> ShuttleResult<()> {
        let part_size = calculate_part_size_with(self.total_size, self.ctx.config.part_size)?;
        // An empty source has no first part; fail before a segment is opened.
        plan_part(self.total_size, part_size, 0)?;
        let segmenter = segmenter_of(&self.ctx, &self.destination_path)?;

        let segment_id = segmenter
            .segment_init(&self.destination_path)
            .await
            .map_err(|e| ShuttleError::unhandled("segment init", &self.destination_path, e))?;
        info!(
            "Segmented copy {} -> {}: {} in parts of {} (segment {})",
            self.source_path,
            self.destination_path,
            format_bytes(self.total_size),
            format_bytes(part_size),
            segment_id
        );

        let upload = Arc::new(SegmentUpload {
            segment_id,
            source_path: self.source_path.clone(),
            destination_path: self.destination_path.clone(),
            total_size: self.total_size,
            part_size,
        });

        let mut scope = self.ctx.scheduler.scope();
        let mut offset = 0;
        loop {
            let task = CopyPartialFile::new(&self.meta, Arc::clone(&self.ctx), Arc::clone(&upload), offset)?;
            // Planned values, safe to read while the part executes.
            let part = task.part();
            scope.spawn(task).await?;
            if part.done {
                break;
            }
            offset += part.size;
        }
        debug!("Submitted {} parts for segment {}", scope.submitted(), upload.segment_id);

        scope.wait().await?;
        segmenter
            .segment_complete(&upload.segment_id)
            .await
            .map_err(|e| ShuttleError::unhandled("segment complete", &self.destination_path, e))?;
        Ok(())
    }
}

/// Copies one byte range of the source into an open segment.
pub struct CopyPartialFile {
    meta: TaskMeta,
    ctx: Arc<TransferContext>,
    upload: Arc<SegmentUpload>,
    part: PartDescriptor,
}

impl CopyPartialFile {
    pub fn new(
        parent: &TaskMeta,
        ctx: Arc<TransferContext>,
        upload: Arc<SegmentUpload>,
        offset: u64,
    ) -> ShuttleResult<Self> {
        let part = plan_part(upload.total_size, upload.part_size, offset)?;
        Ok(Self {
            meta: TaskMeta::child_of(parent),
            ctx,
            upload,
            part,
        })
    }

    pub fn part(&self) -> PartDescriptor {
        self.part
    }
}

#[async_trait]
impl Task for CopyPartialFile {
    type Output = ();

    fn kind(&self) -> &'static str {
        "copy_partial_file"
    }

    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self) -> ShuttleResult<()> {
        let PartDescriptor { offset, size, .. } = self.part;
        let source_path = &self.upload.source_path;

        let checksum = checksum_range(
            self.ctx.source.as_ref(),
            source_path,
            offset,
            size,
            self.ctx.config.checksum,
        )
        .await
        .map_err(|e| ShuttleError::unhandled("checksum", source_path, e))?;

        let reader = self
            .ctx
            .source
            .read(source_path, ReadOptions::range(offset, size))
            .await
            .map_err(|e| ShuttleError::unhandled("read", source_path, e))?;

        let segmenter = segmenter_of(&self.ctx, &self.upload.destination_path)?;
        segmenter
            .segment_write(&self.upload.segment_id, SegmentPart { offset, size, checksum }, reader)
            .await
            .map_err(|e| ShuttleError::unhandled("segment write", &self.upload.destination_path, e))?;

        self.ctx.stats.record_part(size);
        debug!("Wrote part [{}, {}) of {}", offset, offset + size, self.upload.destination_path);
        Ok(())
    }
}
