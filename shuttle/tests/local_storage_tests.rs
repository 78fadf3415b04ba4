use anyhow::Result;
use async_trait::async_trait;
use shuttle::storage::{ByteReader, ObjectStream, ReadOptions, WriteOptions};
use shuttle::{CheckKind, ChecksumAlgorithm, LocalStorage, Object, Storage, Transfer, TransferConfig};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::fs;
use tokio::io::AsyncReadExt;

fn config() -> TransferConfig {
    TransferConfig {
        part_size: 64,
        auto_multipart_threshold: 256,
        max_in_flight: 3,
        checksum: ChecksumAlgorithm::Md5,
        checks: Vec::new(),
    }
}

fn content(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

async fn create_test_tree(root: &Path) -> Result<()> {
    fs::create_dir_all(root.join("docs/nested")).await?;
    fs::create_dir_all(root.join("media")).await?;
    fs::write(root.join("readme.txt"), content(40, 1)).await?;
    fs::write(root.join("docs/guide.md"), content(200, 2)).await?;
    fs::write(root.join("docs/nested/deep.bin"), content(1000, 3)).await?;
    fs::write(root.join("media/clip.bin"), content(256, 4)).await?;
    fs::write(root.join("media/empty"), b"").await?;
    Ok(())
}

fn storages(src: &TempDir, dst: &TempDir) -> (Arc<dyn Storage>, Arc<dyn Storage>) {
    (
        Arc::new(LocalStorage::new(src.path())),
        Arc::new(LocalStorage::new(dst.path())),
    )
}

#[tokio::test]
async fn test_directory_copy_between_local_roots() -> Result<()> {
    let src = TempDir::new()?;
    let dst = TempDir::new()?;
    create_test_tree(src.path()).await?;

    let (source, destination) = storages(&src, &dst);
    let transfer = Transfer::builder(source, destination).config(config()).build()?;
    transfer.copy_dir("", "mirror").await?;

    for file in ["readme.txt", "docs/guide.md", "docs/nested/deep.bin", "media/clip.bin", "media/empty"] {
        let expected = fs::read(src.path().join(file)).await?;
        let actual = fs::read(dst.path().join("mirror").join(file)).await?;
        assert_eq!(expected, actual, "content mismatch for {}", file);
    }

    let stats = transfer.stats();
    assert_eq!(stats.files_copied, 5);
    assert_eq!(stats.dirs_copied, 4);
    assert_eq!(stats.bytes_written, 40 + 200 + 1000 + 256);
    // 1000 bytes in 64-byte parts plus 256 bytes in 64-byte parts.
    assert_eq!(stats.parts_written, 16 + 4);

    // Completed uploads leave no staged parts behind.
    let mut staging = fs::read_dir(dst.path().join(".shuttle-segments")).await?;
    assert!(staging.next_entry().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_single_large_file_copy() -> Result<()> {
    let src = TempDir::new()?;
    let dst = TempDir::new()?;
    fs::write(src.path().join("archive.tar"), content(777, 9)).await?;

    let (source, destination) = storages(&src, &dst);
    let transfer = Transfer::builder(source, destination).config(config()).build()?;
    transfer.copy_file("archive.tar", "backups/archive.tar").await?;

    assert_eq!(fs::read(dst.path().join("backups/archive.tar")).await?, content(777, 9));
    assert_eq!(transfer.stats().parts_written, 13);
    Ok(())
}

#[tokio::test]
async fn test_stream_copy_from_local_file() -> Result<()> {
    let src = TempDir::new()?;
    let dst = TempDir::new()?;
    fs::write(src.path().join("events.log"), content(300, 5)).await?;

    let mut cfg = config();
    cfg.checksum = ChecksumAlgorithm::Sha256;
    let (source, destination) = storages(&src, &dst);
    let transfer = Transfer::builder(source, destination).config(cfg).build()?;
    transfer.copy_stream("events.log", "logs/events.log").await?;

    assert_eq!(fs::read(dst.path().join("logs/events.log")).await?, content(300, 5));
    // Four full parts and a 44-byte tail.
    assert_eq!(transfer.stats().parts_written, 5);
    Ok(())
}

#[tokio::test]
async fn test_missing_source_directory_fails() -> Result<()> {
    let src = TempDir::new()?;
    let dst = TempDir::new()?;

    let (source, destination) = storages(&src, &dst);
    let transfer = Transfer::builder(source, destination).config(config()).build()?;
    let err = transfer.copy_dir("absent", "absent").await.unwrap_err();

    assert!(err.to_string().contains("list"));
    assert_eq!(transfer.stats().files_copied, 0);
    Ok(())
}

/// Local source whose next whole-object read drops the connection after a
/// few bytes.
struct FlakySource {
    inner: LocalStorage,
    fail_next_read: AtomicBool,
}

#[async_trait]
impl Storage for FlakySource {
    fn name(&self) -> String {
        "flaky".to_string()
    }

    async fn list(&self, path: &str) -> io::Result<ObjectStream> {
        self.inner.list(path).await
    }

    async fn stat(&self, path: &str) -> io::Result<Object> {
        self.inner.stat(path).await
    }

    async fn read(&self, path: &str, options: ReadOptions) -> io::Result<ByteReader<'static>> {
        let reader = self.inner.read(path, options).await?;
        if options.offset.is_none() && self.fail_next_read.swap(false, Ordering::SeqCst) {
            let broken = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset mid-object");
            return Ok(Box::new(reader.take(5).chain(BrokenTail(Some(broken)))));
        }
        Ok(reader)
    }

    async fn write(&self, path: &str, reader: ByteReader<'_>, options: WriteOptions) -> io::Result<()> {
        self.inner.write(path, reader, options).await
    }
}

struct BrokenTail(Option<io::Error>);

impl tokio::io::AsyncRead for BrokenTail {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        _buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.0.take() {
            Some(e) => std::task::Poll::Ready(Err(e)),
            None => std::task::Poll::Ready(Ok(())),
        }
    }
}

#[tokio::test]
async fn test_interrupted_copy_is_retried_not_skipped() -> Result<()> {
    let src = TempDir::new()?;
    let dst = TempDir::new()?;
    fs::write(src.path().join("report.csv"), content(120, 7)).await?;

    let source = Arc::new(FlakySource {
        inner: LocalStorage::new(src.path()),
        fail_next_read: AtomicBool::new(true),
    });
    let destination: Arc<dyn Storage> = Arc::new(LocalStorage::new(dst.path()));
    let mut cfg = config();
    cfg.checks = vec![CheckKind::DestinationExists];

    let first = Transfer::builder(source.clone(), destination.clone()).config(cfg.clone()).build()?;
    let err = first.copy_file("report.csv", "report.csv").await.unwrap_err();
    assert_eq!(err.root_cause().to_string(), "connection reset mid-object");
    assert!(!dst.path().join("report.csv").exists());
    let mut leftovers = fs::read_dir(dst.path()).await?;
    assert!(leftovers.next_entry().await?.is_none());

    let second = Transfer::builder(source, destination).config(cfg).build()?;
    second.copy_file("report.csv", "report.csv").await?;
    let stats = second.stats();
    assert_eq!(stats.files_copied, 1);
    assert_eq!(stats.files_skipped, 0);
    assert_eq!(fs::read(dst.path().join("report.csv")).await?, content(120, 7));
    Ok(())
}
