use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectStorageError {
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error("object storage I/O failed: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub url: String,
}

/// 附件对象存储，键由调用方按租户命名空间生成
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        mime_type: &str,
    ) -> Result<StoredObject, ObjectStorageError>;
}

/// 拒绝空键、绝对路径和 `..` 片段
pub fn validate_object_key(key: &str) -> Result<(), ObjectStorageError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|segment| segment.is_empty() || segment == "..")
    {
        return Err(ObjectStorageError::InvalidKey(key.to_owned()));
    }
    Ok(())
}

/// 内存实现（用于测试）
pub mod memory {
    use std::collections::HashMap;
    use std::sync::{Mutex, PoisonError};

    use super::*;

    #[derive(Debug, Clone)]
    pub struct StoredBlob {
        pub bytes: Vec<u8>,
        pub mime_type: String,
    }

    pub struct MemoryObjectStorage {
        base_url: String,
        objects: Mutex<HashMap<String, StoredBlob>>,
    }

    impl MemoryObjectStorage {
        pub fn new(base_url: impl Into<String>) -> Self {
            Self {
                base_url: base_url.into(),
                objects: Mutex::new(HashMap::new()),
            }
        }

        pub fn get(&self, key: &str) -> Option<StoredBlob> {
            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(key)
                .cloned()
        }
    }

    impl Default for MemoryObjectStorage {
        fn default() -> Self {
            Self::new("/files")
        }
    }

    #[async_trait]
    impl ObjectStorage for MemoryObjectStorage {
        async fn put(
            &self,
            key: &str,
            bytes: Vec<u8>,
            mime_type: &str,
        ) -> Result<StoredObject, ObjectStorageError> {
            validate_object_key(key)?;
            self.objects
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(
                    key.to_owned(),
                    StoredBlob {
                        bytes,
                        mime_type: mime_type.to_owned(),
                    },
                );
            Ok(StoredObject {
                key: key.to_owned(),
                url: format!("{}/{}", self.base_url.trim_end_matches('/'), key),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_keys_are_rejected() {
        assert!(validate_object_key("t/a/file.png").is_ok());
        assert!(validate_object_key("t/../secret").is_err());
        assert!(validate_object_key("/etc/passwd").is_err());
        assert!(validate_object_key("").is_err());
    }
}
