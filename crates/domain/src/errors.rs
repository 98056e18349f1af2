//! 领域模型错误定义
//!
//! 所有校验与授权失败都在这里建模，每个错误都有稳定的错误码和分类，
//! 上层只需要按分类映射为传输层状态码。

use thiserror::Error;

/// 错误分类，对应对外暴露的错误语义。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    Internal,
}

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    #[error("invalid {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    #[error("channel not found")]
    ChannelNotFound,

    #[error("direct message thread not found")]
    DmThreadNotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error("user not found in tenant")]
    UserNotFound,

    #[error("not a member of this channel")]
    NotChannelMember,

    #[error("not a member of this conversation")]
    NotDmMember,

    #[error("channel is private")]
    PrivateChannel,

    #[error("user already joined channel")]
    AlreadyChannelMember,

    #[error("the last member cannot leave the channel")]
    LastChannelMember,

    #[error("insufficient permissions")]
    InsufficientPermissions,

    #[error("only the author can modify this message")]
    NotMessageAuthor,

    #[error("edit window has expired")]
    EditWindowExpired,

    #[error("message already deleted")]
    MessageDeleted,

    #[error("threads are single level only")]
    ThreadDepthExceeded,

    #[error("parent message does not belong to this conversation")]
    ParentNotInConversation,

    #[error("too many attachments: at most {max}")]
    TooManyAttachments { max: usize },

    #[error("attachment unavailable: {reason}")]
    AttachmentUnavailable { reason: String },

    #[error("message does not belong to this conversation")]
    ReadTargetMismatch,

    #[error("reaction not found")]
    ReactionNotFound,
}

impl DomainError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn attachment_unavailable(reason: impl Into<String>) -> Self {
        Self::AttachmentUnavailable {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. }
            | Self::AlreadyChannelMember
            | Self::LastChannelMember
            | Self::MessageDeleted
            | Self::ThreadDepthExceeded
            | Self::ParentNotInConversation
            | Self::TooManyAttachments { .. }
            | Self::AttachmentUnavailable { .. }
            | Self::ReadTargetMismatch => ErrorKind::BadRequest,
            Self::ChannelNotFound
            | Self::DmThreadNotFound
            | Self::MessageNotFound
            | Self::UserNotFound
            | Self::ReactionNotFound => ErrorKind::NotFound,
            Self::NotChannelMember
            | Self::NotDmMember
            | Self::PrivateChannel
            | Self::InsufficientPermissions
            | Self::NotMessageAuthor
            | Self::EditWindowExpired => ErrorKind::Forbidden,
        }
    }

    /// 稳定的错误码，客户端依赖它做分支判断。
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::ChannelNotFound => "CHANNEL_NOT_FOUND",
            Self::DmThreadNotFound => "DM_THREAD_NOT_FOUND",
            Self::MessageNotFound => "MESSAGE_NOT_FOUND",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::NotChannelMember => "NOT_CHANNEL_MEMBER",
            Self::NotDmMember => "NOT_DM_MEMBER",
            Self::PrivateChannel => "CHANNEL_PRIVATE",
            Self::AlreadyChannelMember => "MEMBERSHIP_EXISTS",
            Self::LastChannelMember => "LAST_CHANNEL_MEMBER",
            Self::InsufficientPermissions => "INSUFFICIENT_PERMISSIONS",
            Self::NotMessageAuthor => "NOT_MESSAGE_AUTHOR",
            Self::EditWindowExpired => "EDIT_WINDOW_EXPIRED",
            Self::MessageDeleted => "MESSAGE_DELETED",
            Self::ThreadDepthExceeded => "THREAD_DEPTH_EXCEEDED",
            Self::ParentNotInConversation => "INVALID_PARENT_MESSAGE",
            Self::TooManyAttachments { .. } => "TOO_MANY_ATTACHMENTS",
            Self::AttachmentUnavailable { .. } => "ATTACHMENT_UNAVAILABLE",
            Self::ReadTargetMismatch => "READ_TARGET_MISMATCH",
            Self::ReactionNotFound => "REACTION_NOT_FOUND",
        }
    }
}

/// 会话存储错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    /// 唯一约束或条件更新失败
    #[error("conflicting write")]
    Conflict,

    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_depth_is_a_bad_request_with_stable_message() {
        let err = DomainError::ThreadDepthExceeded;
        assert_eq!(err.kind(), ErrorKind::BadRequest);
        assert_eq!(err.to_string(), "threads are single level only");
    }

    #[test]
    fn authorization_failures_are_forbidden() {
        for err in [
            DomainError::NotMessageAuthor,
            DomainError::EditWindowExpired,
            DomainError::NotChannelMember,
        ] {
            assert_eq!(err.kind(), ErrorKind::Forbidden, "{err}");
        }
    }
}
