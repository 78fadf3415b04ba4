use async_trait::async_trait;
use futures::stream;
use std::io::{self, SeekFrom};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    checksum_mismatch, size_mismatch, ByteReader, Object, ObjectStream, ReadOptions, SegmentId, SegmentPart,
    Segmenter, Storage, WriteOptions,
};
use crate::checksum::{Checksum, ChecksumAlgorithm, Hasher};

const STAGING_DIR: &str = ".shuttle-segments";
const TARGET_FILE: &str = "target";
const COPY_CHUNK: usize = 1024 * 1024;

/// Storage rooted at a local directory.
///
/// Segmented uploads are staged as one file per part under a hidden staging
/// directory and concatenated in offset order on completion.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> io::Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative.components().any(|c| !matches!(c, Component::Normal(_) | Component::CurDir)) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("key escapes storage root: {}", key),
            ));
        }
        Ok(self.root.join(relative))
    }

    fn staging(&self, id: &SegmentId) -> PathBuf {
        self.root.join(STAGING_DIR).join(id.as_str())
    }
}

fn dir_prefix(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

fn part_file_name(offset: u64) -> String {
    format!("{:020}.part", offset)
}

/// Sibling of `target` that a write goes to before it is verified.
fn temp_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
}

/// Streams `reader` into `target`, then checks the byte count and checksum.
///
/// Bytes land in a temporary sibling that is renamed over `target` only once
/// verification passes. On any failure the temporary file is removed and
/// `target` is left untouched.
async fn write_verified(
    target: &Path,
    reader: ByteReader<'_>,
    expected_size: u64,
    checksum: Option<&Checksum>,
) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await?;
    }
    let temp = temp_sibling(target);
    let label = target.display().to_string();

    let verdict = match stream_to_file(&temp, reader, checksum.map(|c| c.algorithm())).await {
        Ok((written, _)) if written != expected_size => Err(size_mismatch(&label, expected_size, written)),
        Ok((_, Some(actual))) => match checksum {
            Some(expected) if &actual != expected => Err(checksum_mismatch(&label, expected, &actual)),
            _ => Ok(()),
        },
        Ok((_, None)) => Ok(()),
        Err(e) => Err(e),
    };

    match verdict {
        Ok(()) => fs::rename(&temp, target).await,
        Err(e) => {
            let _ = fs::remove_file(&temp).await;
            Err(e)
        }
    }
}

async fn stream_to_file(
    path: &Path,
    mut reader: ByteReader<'_>,
    algorithm: Option<ChecksumAlgorithm>,
) -> io::Result<(u64, Option<Checksum>)> {
    let mut file = fs::File::create(path).await?;
    let mut hasher = algorithm.map(Hasher::new);
    let mut buffer = vec![0u8; COPY_CHUNK];
    let mut written = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        if let Some(hasher) = hasher.as_mut() {
            hasher.update(&buffer[..bytes_read]);
        }
        file.write_all(&buffer[..bytes_read]).await?;
        written += bytes_read as u64;
    }
    file.flush().await?;

    Ok((written, hasher.map(Hasher::finish)))
}

#[async_trait]
impl Storage for LocalStorage {
    fn name(&self) -> String {
        format!("local:{}", self.root.display())
    }

    async fn list(&self, path: &str) -> io::Result<ObjectStream> {
        let dir = fs::read_dir(self.resolve(path)?).await?;
        let prefix = dir_prefix(path);

        let entries = stream::unfold(Some(dir), move |state| {
            let prefix = prefix.clone();
            async move {
                let mut dir = state?;
                loop {
                    let entry = match dir.next_entry().await {
                        Ok(Some(entry)) => entry,
                        Ok(None) => return None,
                        Err(e) => return Some((Err(e), None)),
                    };
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if prefix.is_empty() && name == STAGING_DIR {
                        continue;
                    }
                    let key = format!("{}{}", prefix, name);
                    return match entry.metadata().await {
                        Ok(meta) if meta.is_dir() => Some((Ok(Object::dir(key)), Some(dir))),
                        Ok(meta) => Some((Ok(Object::file(key, meta.len())), Some(dir))),
                        Err(e) => Some((Err(e), None)),
                    };
                }
            }
        });

        Ok(Box::pin(entries))
    }

    async fn stat(&self, path: &str) -> io::Result<Object> {
        let meta = fs::metadata(self.resolve(path)?).await?;
        let name = path.trim_matches('/');
        if meta.is_dir() {
            Ok(Object::dir(name))
        } else {
            Ok(Object::file(name, meta.len()))
        }
    }

    async fn read(&self, path: &str, options: ReadOptions) -> io::Result<ByteReader<'static>> {
        let mut file = fs::File::open(self.resolve(path)?).await?;
        if let Some(offset) = options.offset {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        match options.size {
            Some(size) => Ok(Box::new(file.take(size))),
            None => Ok(Box::new(file)),
        }
    }

    async fn write(&self, path: &str, reader: ByteReader<'_>, options: WriteOptions) -> io::Result<()> {
        let target = self.resolve(path)?;
        write_verified(&target, reader, options.size, options.checksum.as_ref()).await?;
        debug!("Wrote {} bytes to {:?}", options.size, target);
        Ok(())
    }

    fn as_segmenter(&self) -> Option<&dyn Segmenter> {
        Some(self)
    }
}

#[async_trait]
impl Segmenter for LocalStorage {
    async fn segment_init(&self, path: &str) -> io::Result<SegmentId> {
        // Validate before staging anything.
        self.resolve(path)?;

        let id = SegmentId::new(Uuid::new_v4().to_string());
        let staging = self.staging(&id);
        fs::create_dir_all(&staging).await?;
        fs::write(staging.join(TARGET_FILE), path.as_bytes()).await?;

        info!("Staging segmented upload {} for {} in {:?}", id, path, staging);
        Ok(id)
    }

    async fn segment_write(&self, id: &SegmentId, part: SegmentPart, reader: ByteReader<'_>) -> io::Result<()> {
        let staging = self.staging(id);
        if !fs::try_exists(&staging).await? {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("unknown segment {}", id)));
        }
        write_verified(&staging.join(part_file_name(part.offset)), reader, part.size, Some(&part.checksum)).await
    }

    async fn segment_complete(&self, id: &SegmentId) -> io::Result<()> {
        let staging = self.staging(id);
        let path = fs::read_to_string(staging.join(TARGET_FILE)).await?;

        let mut parts = Vec::new();
        let mut entries = fs::read_dir(&staging).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(offset) = name.strip_suffix(".part").and_then(|o| o.parse::<u64>().ok()) {
                parts.push((offset, entry.path(), entry.metadata().await?.len()));
            }
        }
        parts.sort_by_key(|(offset, _, _)| *offset);

        let target = self.resolve(&path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut output = fs::File::create(&target).await?;
        let mut expected_offset = 0u64;
        for (offset, part_path, size) in parts {
            if offset != expected_offset {
                drop(output);
                let _ = fs::remove_file(&target).await;
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("segment {} has a gap at offset {}", id, expected_offset),
                ));
            }
            let mut input = fs::File::open(&part_path).await?;
            tokio::io::copy(&mut input, &mut output).await?;
            expected_offset += size;
        }
        output.flush().await?;

        fs::remove_dir_all(&staging).await?;
        info!("Completed segmented upload {}: {} bytes to {:?}", id, expected_offset, target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;
    use tokio::io::{AsyncRead, ReadBuf};

    /// Yields its prefix, then fails like a dropped connection.
    struct BrokenReader {
        prefix: Cursor<Vec<u8>>,
    }

    impl AsyncRead for BrokenReader {
        fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
            let before = buf.filled().len();
            match Pin::new(&mut self.prefix).poll_read(cx, buf) {
                Poll::Ready(Ok(())) if buf.filled().len() == before => Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset mid-object",
                ))),
                other => other,
            }
        }
    }

    async fn dir_names(path: &Path) -> Vec<String> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(path).await.unwrap();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_interrupted_write_leaves_no_file() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());
        let reader = BrokenReader {
            prefix: Cursor::new(b"hello".to_vec()),
        };
        let options = WriteOptions {
            size: 10,
            checksum: None,
        };

        let err = storage.write("out/obj.bin", Box::new(reader), options).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert_eq!(storage.stat("out/obj.bin").await.unwrap_err().kind(), io::ErrorKind::NotFound);
        assert!(dir_names(&temp_dir.path().join("out")).await.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_write_keeps_previous_object() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());
        fs::write(temp_dir.path().join("obj"), b"previous").await.unwrap();

        let options = WriteOptions {
            size: 3,
            checksum: Some(Checksum::of(ChecksumAlgorithm::Md5, b"xyz")),
        };
        assert!(storage.write("obj", Box::new(&b"abc"[..]), options).await.is_err());
        assert_eq!(fs::read(temp_dir.path().join("obj")).await.unwrap(), b"previous");
        assert_eq!(dir_names(temp_dir.path()).await, vec!["obj"]);

        let options = WriteOptions {
            size: 3,
            checksum: Some(Checksum::of(ChecksumAlgorithm::Md5, b"abc")),
        };
        storage.write("obj", Box::new(&b"abc"[..]), options).await.unwrap();
        assert_eq!(fs::read(temp_dir.path().join("obj")).await.unwrap(), b"abc");
        assert_eq!(dir_names(temp_dir.path()).await, vec!["obj"]);
    }

    #[tokio::test]
    async fn test_resolve_rejects_parent_components() {
        let storage = LocalStorage::new("/tmp/root");
        assert!(storage.resolve("../etc/passwd").is_err());
        assert!(storage.resolve("a/./b").is_ok());
    }

    #[tokio::test]
    async fn test_list_hides_staging_dir() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());
        fs::write(temp_dir.path().join("a.txt"), b"abc").await.unwrap();
        let id = storage.segment_init("big.bin").await.unwrap();

        let entries: Vec<Object> = storage.list("").await.unwrap().try_collect().await.unwrap();
        assert_eq!(entries, vec![Object::file("a.txt", 3)]);

        storage.segment_complete(&id).await.unwrap();
        assert_eq!(fs::read(temp_dir.path().join("big.bin")).await.unwrap(), b"");
    }

    #[tokio::test]
    async fn test_ranged_read() {
        let temp_dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(temp_dir.path());
        fs::write(temp_dir.path().join("data"), b"0123456789").await.unwrap();

        let mut reader = storage.read("data", ReadOptions::range(3, 4)).await.unwrap();
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"3456");
    }
}
