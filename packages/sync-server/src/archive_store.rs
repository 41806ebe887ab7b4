//! 备份文件存储
//!
//! 每个密钥只保留一份 `quiz_data_<sha256>.zip`，新上传先写临时文件再 rename 覆盖。

use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

const ZIP_MAGIC: &[u8] = b"PK";

/// 上传结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArchive {
    pub filename: String,
    pub size: u64,
    /// 被覆盖的旧文件大小
    pub previous_size: Option<u64>,
}

pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn archive_file_name(token: &str) -> String {
    format!("quiz_data_{}.zip", token_digest(token))
}

pub fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(ZIP_MAGIC)
}

#[derive(Debug, Clone)]
pub struct ArchiveStore {
    dir: PathBuf,
}

impl ArchiveStore {
    pub async fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, token: &str) -> PathBuf {
        self.dir.join(archive_file_name(token))
    }

    /// 写入（覆盖）该密钥的备份
    pub async fn store(&self, token: &str, bytes: &[u8]) -> io::Result<StoredArchive> {
        let filename = archive_file_name(token);
        let target = self.dir.join(&filename);
        let temp = self
            .dir
            .join(format!(".{}.{}.tmp", filename, uuid::Uuid::new_v4().simple()));

        let previous_size = match tokio::fs::metadata(&target).await {
            Ok(meta) => Some(meta.len()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(err),
        };

        if let Err(err) = write_file(&temp, bytes).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(err);
        }
        if let Err(err) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(err);
        }

        let size = bytes.len() as u64;
        match previous_size {
            Some(previous) => tracing::info!(
                token_hash = %&token_digest(token)[..12],
                previous_size = previous,
                size,
                "archive overwritten"
            ),
            None => tracing::info!(
                token_hash = %&token_digest(token)[..12],
                size,
                "archive stored"
            ),
        }

        Ok(StoredArchive {
            filename,
            size,
            previous_size,
        })
    }

    /// 打开该密钥的备份，不存在时返回 None
    pub async fn open(&self, token: &str) -> io::Result<Option<(tokio::fs::File, u64)>> {
        match tokio::fs::File::open(self.path_for(token)).await {
            Ok(file) => {
                let len = file.metadata().await?.len();
                Ok(Some((file, len)))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

async fn write_file(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}
