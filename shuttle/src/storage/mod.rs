//! Storage capability set consumed by the copy strategies.
//!
//! A source or destination is anything implementing [`Storage`]; a
//! destination that also accepts segmented uploads exposes a [`Segmenter`]
//! through [`Storage::as_segmenter`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::io;
use tokio::io::AsyncRead;

use crate::checksum::Checksum;

pub mod local;
pub mod memory;

pub use local::LocalStorage;
pub use memory::{MemoryStorage, StorageEvent};

/// Byte stream handed between storages.
pub type ByteReader<'a> = Box<dyn AsyncRead + Send + Unpin + 'a>;

/// Lazy listing of one directory level.
pub type ObjectStream = BoxStream<'static, io::Result<Object>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    File,
    Dir,
}

/// An entry produced by listing or stat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    /// Storage-relative key, e.g. `photos/2024/a.jpg`.
    pub name: String,
    pub size: u64,
    pub kind: ObjectKind,
}

impl Object {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            kind: ObjectKind::File,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            size: 0,
            kind: ObjectKind::Dir,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == ObjectKind::Dir
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub offset: Option<u64>,
    pub size: Option<u64>,
}

impl ReadOptions {
    pub fn range(offset: u64, size: u64) -> Self {
        Self {
            offset: Some(offset),
            size: Some(size),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    pub size: u64,
    pub checksum: Option<Checksum>,
}

/// Opaque identifier of an open segmented upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentId(String);

impl SegmentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coordinates of one part inside a segmented upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentPart {
    pub offset: u64,
    pub size: u64,
    pub checksum: Checksum,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Human-readable name used in logs.
    fn name(&self) -> String;

    async fn list(&self, path: &str) -> io::Result<ObjectStream>;

    /// Missing objects fail with [`io::ErrorKind::NotFound`].
    async fn stat(&self, path: &str) -> io::Result<Object>;

    async fn read(&self, path: &str, options: ReadOptions) -> io::Result<ByteReader<'static>>;

    async fn write(&self, path: &str, reader: ByteReader<'_>, options: WriteOptions) -> io::Result<()>;

    fn as_segmenter(&self) -> Option<&dyn Segmenter> {
        None
    }
}

#[async_trait]
pub trait Segmenter: Send + Sync {
    async fn segment_init(&self, path: &str) -> io::Result<SegmentId>;

    /// Writes one part. The destination validates `part.checksum` on arrival.
    async fn segment_write(&self, id: &SegmentId, part: SegmentPart, reader: ByteReader<'_>) -> io::Result<()>;

    async fn segment_complete(&self, id: &SegmentId) -> io::Result<()>;
}

pub(crate) fn checksum_mismatch(path: &str, expected: &Checksum, actual: &Checksum) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("checksum mismatch for {}: expected {}, got {}", path, expected, actual),
    )
}

pub(crate) fn size_mismatch(path: &str, expected: u64, actual: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("size mismatch for {}: expected {} bytes, got {}", path, expected, actual),
    )
}
