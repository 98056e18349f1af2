use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

/// 消息正文最大字符数。
pub const MAX_MESSAGE_BODY_CHARS: usize = 10_000;

/// 频道名称最大字符数。
pub const MAX_CHANNEL_NAME_CHARS: usize = 80;

/// 表情标识最大字符数。
pub const MAX_EMOJI_CHARS: usize = 64;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// 租户唯一标识。
    TenantId
);
uuid_id!(
    /// 用户唯一标识。
    UserId
);
uuid_id!(
    /// 频道唯一标识。
    ChannelId
);
uuid_id!(
    /// 私信会话唯一标识。
    DmThreadId
);
uuid_id!(
    /// 消息唯一标识。
    MessageId
);
uuid_id!(
    /// 附件唯一标识。
    AttachmentId
);

/// 消息正文，1 到 10000 个字符，不允许全空白。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageBody(String);

impl MessageBody {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::invalid_argument("body", "cannot be empty"));
        }
        if value.chars().count() > MAX_MESSAGE_BODY_CHARS {
            return Err(DomainError::invalid_argument(
                "body",
                format!("must be at most {MAX_MESSAGE_BODY_CHARS} characters"),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MessageBody {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MessageBody> for String {
    fn from(value: MessageBody) -> Self {
        value.0
    }
}

impl fmt::Display for MessageBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 频道名称。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::invalid_argument("name", "cannot be empty"));
        }
        if value.chars().count() > MAX_CHANNEL_NAME_CHARS {
            return Err(DomainError::invalid_argument("name", "too long"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 表情反应标识，可以是 unicode 表情或 `:shortcode:`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Emoji(String);

impl Emoji {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::invalid_argument("emoji", "cannot be empty"));
        }
        if value.chars().count() > MAX_EMOJI_CHARS {
            return Err(DomainError::invalid_argument("emoji", "too long"));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(DomainError::invalid_argument(
                "emoji",
                "cannot contain whitespace",
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Emoji {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Emoji> for String {
    fn from(value: Emoji) -> Self {
        value.0
    }
}

impl fmt::Display for Emoji {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_body_rejects_blank_and_oversized() {
        assert!(MessageBody::new("hello").is_ok());
        assert!(MessageBody::new("   ").is_err());
        assert!(MessageBody::new("").is_err());

        let max = "字".repeat(MAX_MESSAGE_BODY_CHARS);
        assert!(MessageBody::new(max).is_ok(), "按字符计数而不是字节");

        let over = "a".repeat(MAX_MESSAGE_BODY_CHARS + 1);
        assert!(matches!(
            MessageBody::new(over),
            Err(DomainError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn emoji_is_trimmed_and_single_token() {
        assert_eq!(Emoji::parse(" 👍 ").unwrap().as_str(), "👍");
        assert!(Emoji::parse(":thumbs up:").is_err());
        assert!(Emoji::parse("").is_err());
    }

    #[test]
    fn ids_parse_from_strings() {
        let raw = Uuid::new_v4();
        let parsed: MessageId = raw.to_string().parse().unwrap();
        assert_eq!(Uuid::from(parsed), raw);
        assert!("not-a-uuid".parse::<ChannelId>().is_err());
    }
}
