use std::collections::HashSet;
use std::sync::Arc;

use config::UploadConfig;
use domain::{sanitize_file_name, Actor, Attachment, AttachmentId, DomainError};

use crate::{
    clock::Clock, dto::AttachmentDto, error::ApplicationError, object_storage::ObjectStorage,
    repository::ConversationStore,
};

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_bytes: usize,
    pub allowed_mime_types: HashSet<String>,
}

impl From<&UploadConfig> for UploadPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_bytes: config.max_bytes,
            allowed_mime_types: config
                .allowed_mime_types
                .iter()
                .map(|mime| mime.trim().to_ascii_lowercase())
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

pub struct UploadServiceDependencies {
    pub store: Arc<dyn ConversationStore>,
    pub storage: Arc<dyn ObjectStorage>,
    pub clock: Arc<dyn Clock>,
    pub policy: UploadPolicy,
}

/// 附件上传：校验类型与大小，写入对象存储，创建未关联的附件记录
pub struct UploadService {
    deps: UploadServiceDependencies,
}

impl UploadService {
    pub fn new(deps: UploadServiceDependencies) -> Self {
        Self { deps }
    }

    pub fn max_bytes(&self) -> usize {
        self.deps.policy.max_bytes
    }

    pub async fn upload(
        &self,
        actor: &Actor,
        request: UploadRequest,
    ) -> Result<AttachmentDto, ApplicationError> {
        let mime_type = normalize_mime(&request.mime_type);
        if !self.deps.policy.allowed_mime_types.contains(&mime_type) {
            return Err(DomainError::invalid_argument(
                "mime_type",
                format!("`{mime_type}` is not an allowed upload type"),
            )
            .into());
        }
        if request.bytes.is_empty() {
            return Err(DomainError::invalid_argument("file", "file is empty").into());
        }
        if request.bytes.len() > self.deps.policy.max_bytes {
            return Err(DomainError::invalid_argument(
                "file",
                format!("file exceeds {} bytes", self.deps.policy.max_bytes),
            )
            .into());
        }

        let id = AttachmentId::generate();
        let file_name = sanitize_file_name(&request.file_name);
        let key = format!("{}/{}/{}", actor.tenant_id, id, file_name);
        let size_bytes = request.bytes.len() as i64;

        let stored = self
            .deps
            .storage
            .put(&key, request.bytes, &mime_type)
            .await
            .map_err(|err| {
                tracing::error!(tenant_id = %actor.tenant_id, key = %key, error = %err, "附件写入失败");
                ApplicationError::from(err)
            })?;

        let attachment = self
            .deps
            .store
            .create_attachment(Attachment {
                id,
                tenant_id: actor.tenant_id,
                uploader_id: actor.user_id,
                message_id: None,
                file_name,
                mime_type,
                size_bytes,
                storage_key: stored.key,
                url: stored.url,
                created_at: self.deps.clock.now(),
            })
            .await?;

        tracing::info!(
            tenant_id = %actor.tenant_id,
            attachment_id = %attachment.id,
            size_bytes,
            "附件已上传"
        );
        Ok(attachment.into())
    }
}

fn normalize_mime(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::memory::InMemoryConversationStore;
    use crate::object_storage::memory::MemoryObjectStorage;
    use domain::{TenantId, UserId};

    fn service(storage: Arc<MemoryObjectStorage>) -> UploadService {
        UploadService::new(UploadServiceDependencies {
            store: Arc::new(InMemoryConversationStore::new()),
            storage,
            clock: Arc::new(SystemClock),
            policy: UploadPolicy {
                max_bytes: 8,
                allowed_mime_types: ["image/png".to_string()].into_iter().collect(),
            },
        })
    }

    #[tokio::test]
    async fn stores_under_tenant_namespaced_key() {
        let storage = Arc::new(MemoryObjectStorage::new("/files"));
        let service = service(storage.clone());
        let actor = Actor::member(TenantId::generate(), UserId::generate());

        let dto = service
            .upload(
                &actor,
                UploadRequest {
                    file_name: "../My Pic.png".into(),
                    mime_type: "image/PNG; charset=binary".into(),
                    bytes: vec![1, 2, 3],
                },
            )
            .await
            .unwrap();

        let key = format!("{}/{}/My_Pic.png", actor.tenant_id, dto.id);
        assert_eq!(dto.url, format!("/files/{key}"));
        assert_eq!(dto.mime_type, "image/png");
        assert_eq!(storage.get(&key).unwrap().bytes, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn rejects_disallowed_types_and_oversized_files() {
        let service = service(Arc::new(MemoryObjectStorage::default()));
        let actor = Actor::member(TenantId::generate(), UserId::generate());

        let wrong_type = service
            .upload(
                &actor,
                UploadRequest {
                    file_name: "a.exe".into(),
                    mime_type: "application/x-msdownload".into(),
                    bytes: vec![1],
                },
            )
            .await
            .unwrap_err();
        assert_eq!(wrong_type.kind(), domain::ErrorKind::BadRequest);

        let too_big = service
            .upload(
                &actor,
                UploadRequest {
                    file_name: "a.png".into(),
                    mime_type: "image/png".into(),
                    bytes: vec![0; 9],
                },
            )
            .await
            .unwrap_err();
        assert_eq!(too_big.kind(), domain::ErrorKind::BadRequest);
    }
}
