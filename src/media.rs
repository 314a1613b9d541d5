use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const PUBLIC_PREFIX: &str = "/uploads";

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("no file uploaded")]
    Empty,
    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: u64 },
    #[error("unsupported media type {0:?}")]
    UnsupportedType(Option<String>),
    #[error("storage failure: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoredMedia {
    pub file_name: String,
    pub public_path: String,
    pub mime_type: String,
    pub size: usize,
    pub sha256: String,
}

/// Write-once media directory. Files are named by content hash, so
/// re-uploading the same bytes returns the existing path.
pub struct MediaStore {
    storage_path: PathBuf,
    max_size: u64,
}

fn extension_for(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

impl MediaStore {
    pub async fn open(storage_path: impl AsRef<Path>, max_size: u64) -> std::io::Result<Self> {
        let storage_path = storage_path.as_ref().to_path_buf();
        fs::create_dir_all(&storage_path).await?;

        Ok(MediaStore {
            storage_path,
            max_size,
        })
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    pub async fn store(&self, mime_type: Option<&str>, content: &[u8]) -> Result<StoredMedia, MediaError> {
        if content.is_empty() {
            return Err(MediaError::Empty);
        }
        if content.len() as u64 > self.max_size {
            return Err(MediaError::TooLarge {
                size: content.len(),
                limit: self.max_size,
            });
        }

        // Strip parameters such as "; charset=..."
        let mime_type = mime_type
            .map(|value| value.split(';').next().unwrap_or_default().trim().to_ascii_lowercase());
        let Some(extension) = mime_type.as_deref().and_then(extension_for) else {
            return Err(MediaError::UnsupportedType(mime_type));
        };
        let mime_type = mime_type.unwrap_or_default();

        let sha256 = format!("{:x}", Sha256::digest(content));
        let file_name = format!("{}.{}", sha256, extension);
        let path = self.storage_path.join(&file_name);

        match fs::OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(mut file) => {
                file.write_all(content).await?;
                file.flush().await?;
                log::info!("Stored {} ({} bytes)", file_name, content.len());
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                log::debug!("{} already stored, reusing", file_name);
            }
            Err(e) => return Err(e.into()),
        }

        Ok(StoredMedia {
            public_path: format!("{}/{}", PUBLIC_PREFIX, file_name),
            file_name,
            mime_type,
            size: content.len(),
            sha256,
        })
    }
}
