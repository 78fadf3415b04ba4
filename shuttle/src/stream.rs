//! Segmented copy of a source whose size is not known in advance.
//!
//! Parts have a fixed size. Each part is read into a pooled buffer while it is
//! planned; a short read marks the end of the stream.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::buffer_pool::{BufferPool, PooledBuffer};
use crate::checksum::Checksum;
use crate::error::{ShuttleError, ShuttleResult};
use crate::segmented::{segmenter_of, PartDescriptor};
use crate::storage::{ByteReader, ReadOptions, SegmentId, SegmentPart};
use crate::task::{Task, TaskMeta, TransferContext};
use crate::utils::format_bytes;

/// Parameters shared by every part of one streamed upload.
#[derive(Debug)]
pub struct StreamUpload {
    pub segment_id: SegmentId,
    pub source_path: String,
    pub destination_path: String,
    pub part_size: u64,
    pub pool: Arc<BufferPool>,
}

pub struct CopyStream {
    meta: TaskMeta,
    ctx: Arc<TransferContext>,
    source_path: String,
    destination_path: String,
    pool: Arc<BufferPool>,
}

impl CopyStream {
    /// Plans the part buffers: one pool of part-size buffers, at most one per
    /// in-flight part.
    pub fn new(
        parent: &TaskMeta,
        ctx: Arc<TransferContext>,
        source_path: &str,
        destination_path: &str,
    ) -> ShuttleResult<Self> {
        let part_size = ctx.config.part_size;
        let capacity = usize::try_from(part_size).map_err(|_| ShuttleError::InvalidPartSize {
            part_size,
            max: usize::MAX as u64,
        })?;
        let pool = BufferPool::new(capacity, ctx.scheduler.max_in_flight());

        Ok(Self {
            meta: TaskMeta::child_of(parent),
            ctx,
            source_path: source_path.to_string(),
            destination_path: destination_path.to_string(),
            pool,
        })
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

#[async_trait]
impl Task for CopyStream {
    type Output = ();

    fn kind(&self) -> &'static str {
        "copy_stream"
    }

    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self) -> ShuttleResult<()> {
        let segmenter = segmenter_of(&self.ctx, &self.destination_path)?;
        let part_size = self.ctx.config.part_size;

        let segment_id = segmenter
            .segment_init(&self.destination_path)
            .await
            .map_err(|e| ShuttleError::unhandled("segment init", &self.destination_path, e))?;
        info!(
            "Streaming {} -> {} in parts of {} (segment {})",
            self.source_path,
            self.destination_path,
            format_bytes(part_size),
            segment_id
        );

        let mut source = self
            .ctx
            .source
            .read(&self.source_path, ReadOptions::default())
            .await
            .map_err(|e| ShuttleError::unhandled("read", &self.source_path, e))?;

        let upload = Arc::new(StreamUpload {
            segment_id,
            source_path: self.source_path.clone(),
            destination_path: self.destination_path.clone(),
            part_size,
            pool: Arc::clone(&self.pool),
        });

        let mut scope = self.ctx.scheduler.scope();
        let mut offset = 0;
        loop {
            // The slot is taken before the part's buffer is filled.
            let slot = scope.reserve().await?;
            let task = CopyPartialStream::new(
                &self.meta,
                Arc::clone(&self.ctx),
                Arc::clone(&upload),
                &mut source,
                offset,
            )
            .await?;
            let part = task.part();
            scope.spawn_reserved(slot, task);
            if part.done {
                break;
            }
            offset += part.size;
        }
        debug!(
            "Submitted {} stream parts for segment {} using {} buffers",
            scope.submitted(),
            upload.segment_id,
            self.pool.allocated()
        );

        scope.wait().await?;
        segmenter
            .segment_complete(&upload.segment_id)
            .await
            .map_err(|e| ShuttleError::unhandled("segment complete", &self.destination_path, e))?;
        Ok(())
    }
}

/// One streamed part, buffered during planning.
pub struct CopyPartialStream {
    meta: TaskMeta,
    ctx: Arc<TransferContext>,
    upload: Arc<StreamUpload>,
    part: PartDescriptor,
    content: PooledBuffer,
}

impl CopyPartialStream {
    /// Reads up to one part size from `source` into a pooled buffer.
    pub async fn new(
        parent: &TaskMeta,
        ctx: Arc<TransferContext>,
        upload: Arc<StreamUpload>,
        source: &mut ByteReader<'_>,
        offset: u64,
    ) -> ShuttleResult<Self> {
        let mut content = upload.pool.checkout();
        let read = (&mut *source)
            .take(upload.part_size)
            .read_to_end(&mut *content)
            .await
            .map_err(|e| ShuttleError::unhandled("read", &upload.source_path, e))? as u64;

        Ok(Self {
            meta: TaskMeta::child_of(parent),
            ctx,
            part: PartDescriptor {
                offset,
                size: read,
                done: read < upload.part_size,
            },
            upload,
            content,
        })
    }

    pub fn part(&self) -> PartDescriptor {
        self.part
    }
}

#[async_trait]
impl Task for CopyPartialStream {
    type Output = ();

    fn kind(&self) -> &'static str {
        "copy_partial_stream"
    }

    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self) -> ShuttleResult<()> {
        let PartDescriptor { offset, size, .. } = self.part;
        let destination_path = &self.upload.destination_path;
        let checksum = Checksum::of(self.ctx.config.checksum, &self.content);

        let segmenter = segmenter_of(&self.ctx, destination_path)?;
        segmenter
            .segment_write(
                &self.upload.segment_id,
                SegmentPart { offset, size, checksum },
                Box::new(self.content.as_slice()),
            )
            .await
            .map_err(|e| ShuttleError::unhandled("segment write", destination_path, e))?;

        self.ctx.stats.record_part(size);
        debug!("Wrote stream part [{}, {}) of {}", offset, offset + size, destination_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::storage::MemoryStorage;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    struct Broken;

    impl AsyncRead for Broken {
        fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "pipe closed")))
        }
    }

    fn context() -> Arc<TransferContext> {
        TransferContext::for_tests(
            Arc::new(MemoryStorage::new()),
            Arc::new(MemoryStorage::new()),
            TransferConfig::default(),
        )
    }

    fn upload(part_size: u64) -> Arc<StreamUpload> {
        Arc::new(StreamUpload {
            segment_id: SegmentId::new("stream-1"),
            source_path: "in".to_string(),
            destination_path: "out".to_string(),
            part_size,
            pool: BufferPool::new(part_size as usize, 4),
        })
    }

    async fn plan_all(mut source: ByteReader<'_>, upload: &Arc<StreamUpload>) -> ShuttleResult<Vec<PartDescriptor>> {
        let ctx = context();
        let meta = TaskMeta::root();
        let mut parts = Vec::new();
        let mut offset = 0;
        loop {
            let task = CopyPartialStream::new(&meta, Arc::clone(&ctx), Arc::clone(upload), &mut source, offset).await?;
            let part = task.part();
            parts.push(part);
            if part.done {
                return Ok(parts);
            }
            offset += part.size;
        }
    }

    #[tokio::test]
    async fn test_short_read_marks_last_part() {
        let upload = upload(4);
        let parts = plan_all(Box::new(&b"abcdefghijk"[..]), &upload).await.unwrap();
        let shape: Vec<_> = parts.iter().map(|p| (p.offset, p.size, p.done)).collect();
        assert_eq!(shape, vec![(0, 4, false), (4, 4, false), (8, 3, true)]);
    }

    #[tokio::test]
    async fn test_exact_multiple_ends_with_empty_part() {
        let upload = upload(4);
        let parts = plan_all(Box::new(&b"abcdefgh"[..]), &upload).await.unwrap();
        let shape: Vec<_> = parts.iter().map(|p| (p.offset, p.size, p.done)).collect();
        assert_eq!(shape, vec![(0, 4, false), (4, 4, false), (8, 0, true)]);
    }

    #[tokio::test]
    async fn test_empty_source_is_one_empty_part() {
        let upload = upload(4);
        let parts = plan_all(Box::new(&b""[..]), &upload).await.unwrap();
        assert_eq!(parts, vec![PartDescriptor { offset: 0, size: 0, done: true }]);
    }

    #[tokio::test]
    async fn test_read_fault_while_planning_returns_buffer() {
        let upload = upload(4);
        let source = (&b"abcdef"[..]).chain(Broken);
        let err = plan_all(Box::new(source), &upload).await.unwrap_err();

        assert!(matches!(err, ShuttleError::Unhandled { operation: "read", .. }));
        assert_eq!(err.root_cause().to_string(), "pipe closed");
        assert_eq!(upload.pool.allocated(), 1);
        assert_eq!(upload.pool.idle(), 1);
    }
}
