//! 错误类型定义
//!
//! 错误分类遵循同步核心的处理策略：
//! - `Transport`：网络/超时，可由传输层重试
//! - `Validation`：服务端拒绝载荷，对该记录终止，需要操作员可见
//! - `NotFound`：远端不存在（通知触发的拉取静默丢弃，用户直接请求需上报）
//! - `Conflict`：本地状态机拒绝迁移，不允许静默吞掉

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FieldSyncError {
    /// 网络或超时错误，可重试
    #[error("Transport error: {0}")]
    Transport(String),

    /// 服务端校验失败，对该记录终止，不自动重试
    #[error("Validation rejected by server: {0}")]
    Validation(String),

    /// 远端不存在该记录
    #[error("Not found: {0}")]
    NotFound(String),

    /// 本地状态机拒绝该迁移
    #[error("Workflow conflict: {0}")]
    Conflict(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database error: {0}")]
    Database(String),

    #[error("KV store error: {0}")]
    KvStore(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Not initialized: {0}")]
    NotInitialized(String),

    #[error("Shutting down: {0}")]
    ShuttingDown(String),
}

impl From<serde_json::Error> for FieldSyncError {
    fn from(error: serde_json::Error) -> Self {
        FieldSyncError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for FieldSyncError {
    fn from(error: std::io::Error) -> Self {
        FieldSyncError::Io(error.to_string())
    }
}

impl FieldSyncError {
    /// 是否属于可由传输层重试的失败
    pub fn is_retryable(&self) -> bool {
        matches!(self, FieldSyncError::Transport(_))
    }
}

pub type Result<T> = std::result::Result<T, FieldSyncError>;
