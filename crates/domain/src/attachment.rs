use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{AttachmentId, MessageId, TenantId, Timestamp, UserId};

/// 已上传的对象引用。创建时未关联消息，发送消息时原子关联且只能关联一次。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    pub tenant_id: TenantId,
    pub uploader_id: UserId,
    pub message_id: Option<MessageId>,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub storage_key: String,
    pub url: String,
    pub created_at: Timestamp,
}

impl Attachment {
    pub fn ensure_linkable(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if self.tenant_id != tenant_id {
            return Err(DomainError::attachment_unavailable(format!(
                "attachment {} not found",
                self.id
            )));
        }
        if self.message_id.is_some() {
            return Err(DomainError::attachment_unavailable(format!(
                "attachment {} is already linked to a message",
                self.id
            )));
        }
        Ok(())
    }
}

/// 把客户端提供的文件名收敛为安全的对象键片段。
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(128)
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "file".to_owned()
    } else {
        trimmed.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn attachment(tenant_id: TenantId) -> Attachment {
        Attachment {
            id: AttachmentId::generate(),
            tenant_id,
            uploader_id: UserId::generate(),
            message_id: None,
            file_name: "a.png".into(),
            mime_type: "image/png".into(),
            size_bytes: 10,
            storage_key: "k".into(),
            url: "/files/k".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn linked_or_foreign_attachments_are_rejected() {
        let tenant = TenantId::generate();
        let mut a = attachment(tenant);
        assert!(a.ensure_linkable(tenant).is_ok());
        assert!(a.ensure_linkable(TenantId::generate()).is_err());

        a.message_id = Some(MessageId::generate());
        assert!(matches!(
            a.ensure_linkable(tenant),
            Err(DomainError::AttachmentUnavailable { .. })
        ));
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("my report (1).pdf"), "my_report__1_.pdf");
        assert_eq!(sanitize_file_name(".."), "file");
    }
}
