use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::storage::{ReadOptions, Storage};

const READ_CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Md5,
    Sha256,
}

/// Content digest attached to writes so the destination can validate them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    algorithm: ChecksumAlgorithm,
    digest: Vec<u8>,
}

impl Checksum {
    pub fn of(algorithm: ChecksumAlgorithm, data: &[u8]) -> Self {
        let mut hasher = Hasher::new(algorithm);
        hasher.update(data);
        hasher.finish()
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    pub fn to_hex(&self) -> String {
        self.digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.algorithm {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha256 => "sha256",
        };
        write!(f, "{}:{}", name, self.to_hex())
    }
}

/// Incremental hasher over either supported algorithm.
pub enum Hasher {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl Hasher {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Md5 => Hasher::Md5(md5::Context::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(ctx) => ctx.consume(data),
            Hasher::Sha256(hasher) => hasher.update(data),
        }
    }

    pub fn finish(self) -> Checksum {
        match self {
            Hasher::Md5(ctx) => Checksum {
                algorithm: ChecksumAlgorithm::Md5,
                digest: ctx.compute().0.to_vec(),
            },
            Hasher::Sha256(hasher) => Checksum {
                algorithm: ChecksumAlgorithm::Sha256,
                digest: hasher.finalize().to_vec(),
            },
        }
    }
}

/// Hashes everything `reader` yields. Returns the checksum and the number of
/// bytes consumed.
pub async fn checksum_reader<R>(algorithm: ChecksumAlgorithm, mut reader: R) -> io::Result<(Checksum, u64)>
where
    R: AsyncRead + Unpin,
{
    let mut hasher = Hasher::new(algorithm);
    let mut buffer = vec![0u8; READ_CHUNK];
    let mut total = 0u64;

    loop {
        let bytes_read = reader.read(&mut buffer).await?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
        total += bytes_read as u64;
    }

    Ok((hasher.finish(), total))
}

/// Checksum of `[offset, offset + size)` of `path` on `storage`.
pub async fn checksum_range(
    storage: &dyn Storage,
    path: &str,
    offset: u64,
    size: u64,
    algorithm: ChecksumAlgorithm,
) -> io::Result<Checksum> {
    let reader = storage.read(path, ReadOptions::range(offset, size)).await?;
    let (checksum, read) = checksum_reader(algorithm, reader).await?;
    if read != size {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes at offset {} of {}, read {}", size, offset, path, read),
        ));
    }
    debug!("Checksum of {} [{}, {}): {}", path, offset, offset + size, checksum);
    Ok(checksum)
}
