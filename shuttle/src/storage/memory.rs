use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::{self, Cursor};
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::{
    checksum_mismatch, size_mismatch, ByteReader, Object, ObjectStream, ReadOptions, SegmentId, SegmentPart,
    Segmenter, Storage, WriteOptions,
};
use crate::checksum::Checksum;

/// Operation journal entry, in the order the storage observed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    List { path: String },
    Stat { path: String },
    Read { path: String, offset: u64, size: u64 },
    Write { path: String, size: u64 },
    SegmentInit { path: String, id: SegmentId },
    SegmentWrite { id: SegmentId, offset: u64, size: u64 },
    SegmentComplete { id: SegmentId },
}

#[derive(Debug)]
struct PendingSegment {
    path: String,
    parts: BTreeMap<u64, Vec<u8>>,
}

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Vec<u8>>,
    segments: HashMap<SegmentId, PendingSegment>,
    journal: Vec<StorageEvent>,
    failing: HashSet<String>,
    next_segment: u64,
}

impl Inner {
    fn check_failure(&self, path: &str) -> io::Result<()> {
        if self.failing.contains(path) {
            return Err(io::Error::other(format!("injected failure on {}", path)));
        }
        Ok(())
    }
}

/// Object store kept entirely in memory.
///
/// Directories are implied by `/`-separated key prefixes. Every operation is
/// appended to a journal readable through [`MemoryStorage::events`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.inner.lock().objects.insert(path.into(), data.into());
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.lock().objects.get(path).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().objects.keys().cloned().collect()
    }

    /// Makes every later operation touching `path` fail.
    pub fn fail_path(&self, path: impl Into<String>) {
        self.inner.lock().failing.insert(path.into());
    }

    pub fn events(&self) -> Vec<StorageEvent> {
        self.inner.lock().journal.clone()
    }

    /// Segmented uploads that were initialized but never completed.
    pub fn open_segments(&self) -> usize {
        self.inner.lock().segments.len()
    }
}

fn dir_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

async fn drain(mut reader: ByteReader<'_>) -> io::Result<Vec<u8>> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data).await?;
    Ok(data)
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> String {
        "memory".to_string()
    }

    async fn list(&self, path: &str) -> io::Result<ObjectStream> {
        let mut inner = self.inner.lock();
        inner.check_failure(path)?;
        inner.journal.push(StorageEvent::List { path: path.to_string() });

        let prefix = dir_prefix(path);
        let mut seen_dirs = BTreeSet::new();
        let mut entries = Vec::new();

        for (key, data) in inner.objects.range(prefix.clone()..) {
            let Some(rest) = key.strip_prefix(&prefix) else {
                break;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    if seen_dirs.insert(dir.to_string()) {
                        entries.push(Ok(Object::dir(format!("{}{}", prefix, dir))));
                    }
                }
                None => entries.push(Ok(Object::file(key.clone(), data.len() as u64))),
            }
        }

        Ok(Box::pin(stream::iter(entries)))
    }

    async fn stat(&self, path: &str) -> io::Result<Object> {
        let mut inner = self.inner.lock();
        inner.check_failure(path)?;
        inner.journal.push(StorageEvent::Stat { path: path.to_string() });

        if let Some(data) = inner.objects.get(path) {
            return Ok(Object::file(path, data.len() as u64));
        }
        let prefix = dir_prefix(path);
        if !prefix.is_empty() && inner.objects.keys().any(|key| key.starts_with(&prefix)) {
            return Ok(Object::dir(path));
        }
        Err(io::Error::new(io::ErrorKind::NotFound, format!("object not found: {}", path)))
    }

    async fn read(&self, path: &str, options: ReadOptions) -> io::Result<ByteReader<'static>> {
        let mut inner = self.inner.lock();
        inner.check_failure(path)?;

        let data = inner
            .objects
            .get(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("object not found: {}", path)))?;
        let len = data.len() as u64;
        let start = options.offset.unwrap_or(0).min(len);
        let end = match options.size {
            Some(size) => start.saturating_add(size).min(len),
            None => len,
        };
        let slice = data[start as usize..end as usize].to_vec();

        inner.journal.push(StorageEvent::Read {
            path: path.to_string(),
            offset: start,
            size: end - start,
        });
        Ok(Box::new(Cursor::new(slice)))
    }

    async fn write(&self, path: &str, reader: ByteReader<'_>, options: WriteOptions) -> io::Result<()> {
        self.inner.lock().check_failure(path)?;
        let data = drain(reader).await?;

        if data.len() as u64 != options.size {
            return Err(size_mismatch(path, options.size, data.len() as u64));
        }
        if let Some(expected) = &options.checksum {
            let actual = Checksum::of(expected.algorithm(), &data);
            if &actual != expected {
                return Err(checksum_mismatch(path, expected, &actual));
            }
        }

        let mut inner = self.inner.lock();
        inner.journal.push(StorageEvent::Write {
            path: path.to_string(),
            size: options.size,
        });
        inner.objects.insert(path.to_string(), data);
        Ok(())
    }

    fn as_segmenter(&self) -> Option<&dyn Segmenter> {
        Some(self)
    }
}

#[async_trait]
impl Segmenter for MemoryStorage {
    async fn segment_init(&self, path: &str) -> io::Result<SegmentId> {
        let mut inner = self.inner.lock();
        inner.check_failure(path)?;

        inner.next_segment += 1;
        let id = SegmentId::new(format!("mem-{}", inner.next_segment));
        inner.segments.insert(
            id.clone(),
            PendingSegment {
                path: path.to_string(),
                parts: BTreeMap::new(),
            },
        );
        inner.journal.push(StorageEvent::SegmentInit {
            path: path.to_string(),
            id: id.clone(),
        });
        debug!("Opened memory segment {} for {}", id, path);
        Ok(id)
    }

    async fn segment_write(&self, id: &SegmentId, part: SegmentPart, reader: ByteReader<'_>) -> io::Result<()> {
        {
            let inner = self.inner.lock();
            let segment = inner
                .segments
                .get(id)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown segment {}", id)))?;
            inner.check_failure(&segment.path)?;
        }

        let data = drain(reader).await?;
        let label = format!("{}@{}", id, part.offset);
        if data.len() as u64 != part.size {
            return Err(size_mismatch(&label, part.size, data.len() as u64));
        }
        let actual = Checksum::of(part.checksum.algorithm(), &data);
        if actual != part.checksum {
            return Err(checksum_mismatch(&label, &part.checksum, &actual));
        }

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let segment = inner
            .segments
            .get_mut(id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown segment {}", id)))?;
        segment.parts.insert(part.offset, data);
        inner.journal.push(StorageEvent::SegmentWrite {
            id: id.clone(),
            offset: part.offset,
            size: part.size,
        });
        Ok(())
    }

    async fn segment_complete(&self, id: &SegmentId) -> io::Result<()> {
        let mut inner = self.inner.lock();
        let segment = inner
            .segments
            .remove(id)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("unknown segment {}", id)))?;

        let mut object = Vec::new();
        for (offset, data) in segment.parts {
            if offset != object.len() as u64 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("segment {} has a gap at offset {}", id, object.len()),
                ));
            }
            object.extend_from_slice(&data);
        }

        inner.journal.push(StorageEvent::SegmentComplete { id: id.clone() });
        inner.objects.insert(segment.path, object);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::ChecksumAlgorithm;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_list_immediate_children() {
        let storage = MemoryStorage::new();
        storage.insert("root/a.txt", "a");
        storage.insert("root/sub/b.txt", "bb");
        storage.insert("root/sub/c.txt", "ccc");
        storage.insert("rootless.txt", "x");

        let entries: Vec<Object> = storage.list("root").await.unwrap().try_collect().await.unwrap();
        assert_eq!(entries, vec![Object::file("root/a.txt", 1), Object::dir("root/sub")]);
    }

    #[tokio::test]
    async fn test_segment_rejects_bad_checksum() {
        let storage = MemoryStorage::new();
        let id = storage.segment_init("obj").await.unwrap();
        let part = SegmentPart {
            offset: 0,
            size: 3,
            checksum: Checksum::of(ChecksumAlgorithm::Md5, b"xyz"),
        };
        let err = storage
            .segment_write(&id, part, Box::new(&b"abc"[..]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_segment_complete_detects_gap() {
        let storage = MemoryStorage::new();
        let id = storage.segment_init("obj").await.unwrap();
        let part = SegmentPart {
            offset: 4,
            size: 2,
            checksum: Checksum::of(ChecksumAlgorithm::Md5, b"ef"),
        };
        storage.segment_write(&id, part, Box::new(&b"ef"[..])).await.unwrap();
        assert!(storage.segment_complete(&id).await.is_err());
        assert!(storage.get("obj").is_none());
    }
}
