use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::copy_engine::CopyFile;
use crate::error::{ShuttleError, ShuttleResult};
use crate::task::{Task, TaskMeta, TransferContext};
use crate::utils::rebase_key;

/// Copies one directory level, recursing into subdirectories.
///
/// Files are submitted asynchronously as they are listed. Subdirectories run
/// synchronously, so each subtree, including its own file fan-out, finishes
/// before the next entry is dispatched.
pub struct CopyDir {
    meta: TaskMeta,
    ctx: Arc<TransferContext>,
    source_path: String,
    destination_path: String,
}

impl CopyDir {
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
impl Task for CopyDir {
    type Output = ();

    fn kind(&self) -> &'static str {
        "copy_dir"
    }

    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self) -> ShuttleResult<()> {
        debug!("Listing {}", self.source_path);
        let mut entries = self
            .ctx
            .source
            .list(&self.source_path)
            .await
            .map_err(|e| ShuttleError::unhandled("list", &self.source_path, e))?;

        let mut scope = self.ctx.scheduler.scope();
        let mut subdirs = 0usize;
        while let Some(entry) = entries.next().await {
            let object = entry.map_err(|e| ShuttleError::unhandled("list", &self.source_path, e))?;
            let destination = rebase_key(&object.name, &self.source_path, &self.destination_path);

            if object.is_dir() {
                subdirs += 1;
                let task = CopyDir::new(&self.meta, Arc::clone(&self.ctx), &object.name, &destination);
                self.ctx.scheduler.sync(task).await?;
            } else {
                let task = CopyFile::new(&self.meta, Arc::clone(&self.ctx), &object.name, &destination);
                scope.spawn(task).await?;
            }
        }

        let files = scope.submitted();
        scope.wait().await?;
        self.ctx.stats.record_dir();
        info!(
            "Copied directory {} -> {} ({} files, {} subdirectories)",
            self.source_path, self.destination_path, files, subdirs
        );
        Ok(())
    }
}
