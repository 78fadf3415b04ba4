//! Precondition checks deciding whether a file copy can be skipped.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ShuttleError, ShuttleResult};
use crate::storage::Object;
use crate::task::{Task, TaskMeta, TransferContext};

/// Source object and, if present, the destination object it would replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPair {
    pub source: Object,
    pub destination: Option<Object>,
}

/// A precondition test. `true` means the destination is already satisfied
/// and the file copy is skipped.
#[async_trait]
pub trait Check: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, pair: &ObjectPair) -> ShuttleResult<bool>;
}

/// Built-in checks selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    DestinationExists,
    SizeEqual,
}

impl CheckKind {
    pub fn build(self) -> Arc<dyn Check> {
        match self {
            CheckKind::DestinationExists => Arc::new(DestinationExists),
            CheckKind::SizeEqual => Arc::new(SizeEqual),
        }
    }
}

pub struct DestinationExists;

#[async_trait]
impl Check for DestinationExists {
    fn name(&self) -> &'static str {
        "destination_exists"
    }

    async fn check(&self, pair: &ObjectPair) -> ShuttleResult<bool> {
        Ok(pair.destination.is_some())
    }
}

pub struct SizeEqual;

#[async_trait]
impl Check for SizeEqual {
    fn name(&self) -> &'static str {
        "size_equal"
    }

    async fn check(&self, pair: &ObjectPair) -> ShuttleResult<bool> {
        Ok(pair
            .destination
            .as_ref()
            .is_some_and(|dst| dst.size == pair.source.size))
    }
}

/// Looks up the source and destination objects of a file copy.
pub struct BetweenStorageCheck {
    meta: TaskMeta,
    ctx: Arc<TransferContext>,
    source_path: String,
    destination_path: String,
}

impl BetweenStorageCheck {
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
impl Task for BetweenStorageCheck {
    type Output = ObjectPair;

    fn kind(&self) -> &'static str {
        "between_storage_check"
    }

    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self) -> ShuttleResult<ObjectPair> {
        let source = self
            .ctx
            .source
            .stat(&self.source_path)
            .await
            .map_err(|e| ShuttleError::unhandled("stat", &self.source_path, e))?;

        let destination = match self.ctx.destination.stat(&self.destination_path).await {
            Ok(object) => Some(object),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(ShuttleError::unhandled("stat", &self.destination_path, e)),
        };

        Ok(ObjectPair { source, destination })
    }
}

/// Runs one precondition check against an [`ObjectPair`].
pub struct CheckTask {
    meta: TaskMeta,
    check: Arc<dyn Check>,
    pair: ObjectPair,
}

impl CheckTask {
    pub fn new(parent: &TaskMeta, check: Arc<dyn Check>, pair: ObjectPair) -> Self {
        Self {
            meta: TaskMeta::child_of(parent),
            check,
            pair,
        }
    }
}

#[async_trait]
impl Task for CheckTask {
    type Output = bool;

    fn kind(&self) -> &'static str {
        "check"
    }

    fn meta(&self) -> &TaskMeta {
        &self.meta
    }

    async fn execute(self) -> ShuttleResult<bool> {
        let result = self.check.check(&self.pair).await?;
        debug!("Check {} on {} returned {}", self.check.name(), self.pair.source.name, result);
        Ok(result)
    }
}
