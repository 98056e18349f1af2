//! 本地磁盘对象存储
//!
//! 键映射为 `root` 下的相对路径，访问地址为 `<public_base_url>/<key>`，
//! 由 HTTP 层的静态文件服务提供下载。

use std::path::{Path, PathBuf};

use application::object_storage::validate_object_key;
use application::{ObjectStorage, ObjectStorageError, StoredObject};
use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone)]
pub struct LocalObjectStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalObjectStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_owned(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, ObjectStorageError> {
        validate_object_key(key)?;
        Ok(self.root.join(key))
    }

    pub fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, key)
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<StoredObject, ObjectStorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ObjectStorageError::Io(e.to_string()))?;
        }

        // create_new 保证同一键不会被覆盖
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| ObjectStorageError::Io(e.to_string()))?;
        file.write_all(&bytes)
            .await
            .map_err(|e| ObjectStorageError::Io(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| ObjectStorageError::Io(e.to_string()))?;

        tracing::debug!(key = %key, size = bytes.len(), mime_type = %mime_type, "对象已写入磁盘");
        Ok(StoredObject {
            key: key.to_owned(),
            url: self.url_for(key),
        })
    }
}
