//! Redis 错误类型定义

use application::{ApplicationError, BroadcastError, RateLimitError};
use thiserror::Error;

/// Redis 操作错误
#[derive(Error, Debug)]
pub enum RedisError {
    /// 连接错误
    #[error("Redis 连接错误: {message}")]
    Connection { message: String },

    /// 命令或脚本执行错误
    #[error("Redis 命令错误: {message}")]
    Command { message: String },

    /// 订阅错误
    #[error("Redis 订阅错误: {message}")]
    Subscribe { message: String },

    /// 序列化错误
    #[error("序列化错误: {message}")]
    Serialization { message: String },

    /// 存储的数据无法解析
    #[error("数据格式错误: {message}")]
    InvalidData { message: String },

    /// 配置错误
    #[error("配置错误: {message}")]
    Config { message: String },
}

/// Redis 结果类型
pub type RedisResult<T> = Result<T, RedisError>;

impl From<redis::RedisError> for RedisError {
    fn from(err: redis::RedisError) -> Self {
        match err.kind() {
            redis::ErrorKind::InvalidClientConfig => RedisError::Config {
                message: err.to_string(),
            },
            redis::ErrorKind::IoError => RedisError::Connection {
                message: err.to_string(),
            },
            _ => RedisError::Command {
                message: err.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for RedisError {
    fn from(err: serde_json::Error) -> Self {
        RedisError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<RedisError> for ApplicationError {
    fn from(err: RedisError) -> Self {
        ApplicationError::infrastructure(err.to_string())
    }
}

impl From<RedisError> for BroadcastError {
    fn from(err: RedisError) -> Self {
        BroadcastError::failed(err.to_string())
    }
}

impl From<RedisError> for RateLimitError {
    fn from(err: RedisError) -> Self {
        RateLimitError::Unavailable(err.to_string())
    }
}
