//! 网络接口模块 - 远端数据端点与推送失败分类
//!
//! 具体的 REST / 推送传输实现由宿主应用提供，同步核心只依赖这里的
//! trait。分页列表端点接受 page / page_size / updated_since / actor
//! 过滤，返回 {记录列表, 是否还有更多}。
//!
//! ## NOTE: Channel 不做重试
//!
//! EntitySyncChannel does not retry. All retry / backoff policies MUST be
//! implemented by the transport collaborator; `RetryPolicy` below is the
//! contract it is expected to apply (3 attempts with backoff by default).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{FieldSyncError, Result};
use crate::sync::entity_sync::EntityKind;

/// 分页拉取参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageQuery {
    pub page: u32,
    pub page_size: u32,
    /// 只取此水位之后变更的记录（服务端时间域，毫秒）
    pub updated_since: Option<i64>,
    pub actor_type: Option<i32>,
    pub actor_id: Option<i64>,
}

/// 分页拉取响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResponse {
    pub records: Vec<serde_json::Value>,
    pub has_more: bool,
}

/// 远端数据端点
///
/// 错误语义约定：
/// - 网络/超时 → `FieldSyncError::Transport`（可重试）
/// - 服务端校验拒绝 → `FieldSyncError::Validation`（对该记录终止）
/// - 单条拉取远端不存在 → `Ok(None)`，与传输错误严格区分
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    async fn fetch_page(&self, kind: EntityKind, query: &PageQuery) -> Result<PageResponse>;

    async fn fetch_one(&self, kind: EntityKind, id: i64) -> Result<Option<serde_json::Value>>;

    async fn create(&self, kind: EntityKind, payload: &serde_json::Value)
        -> Result<serde_json::Value>;

    async fn update(
        &self,
        kind: EntityKind,
        id: i64,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value>;
}

/// 推送失败原因分类
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum PushFailureReason {
    /// 网络超时 - 可重试
    NetworkTimeout,
    /// 网络不可用 - 等待恢复后重试
    NetworkUnavailable,
    /// 服务端错误 - 根据错误码决定
    ServerError(u16),
    /// 服务端校验拒绝 - 不重试，需操作员可见
    ValidationRejected,
    /// 限流 - 延迟重试
    RateLimited,
    /// 未知错误
    Unknown(String),
}

impl PushFailureReason {
    /// 判断是否可以重试
    pub fn is_retryable(&self) -> bool {
        match self {
            PushFailureReason::NetworkTimeout => true,
            PushFailureReason::NetworkUnavailable => true,
            PushFailureReason::ServerError(code) => {
                // 5xx 服务端错误可重试，4xx 客户端错误不重试
                *code >= 500 && *code < 600
            }
            PushFailureReason::ValidationRejected => false,
            PushFailureReason::RateLimited => true,
            PushFailureReason::Unknown(_) => true, // 保守策略：未知错误可重试
        }
    }

    /// 获取重试延迟倍数
    pub fn delay_multiplier(&self) -> f64 {
        match self {
            PushFailureReason::NetworkTimeout => 1.0,
            PushFailureReason::NetworkUnavailable => 2.0,
            PushFailureReason::ServerError(_) => 1.5,
            PushFailureReason::RateLimited => 3.0, // 限流需要更长延迟
            _ => 1.0,
        }
    }
}

impl From<&FieldSyncError> for PushFailureReason {
    fn from(error: &FieldSyncError) -> Self {
        match error {
            FieldSyncError::Transport(msg) => {
                if msg.contains("timeout") {
                    PushFailureReason::NetworkTimeout
                } else if msg.contains("unavailable") || msg.contains("connection") {
                    PushFailureReason::NetworkUnavailable
                } else {
                    PushFailureReason::Unknown(msg.clone())
                }
            }
            FieldSyncError::Validation(_) => PushFailureReason::ValidationRejected,
            other => PushFailureReason::Unknown(other.to_string()),
        }
    }
}

/// 重试策略配置（由传输层执行，同步通道内部不重试）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// 最大重试次数
    pub max_retries: u32,
    /// 基础延迟时间（秒）
    pub base_delay_seconds: u64,
    /// 最大延迟时间（秒）
    pub max_delay_seconds: u64,
    /// 指数退避因子
    pub backoff_factor: f64,
    /// 随机抖动因子 (0.0-1.0)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_seconds: 1,
            max_delay_seconds: 60,
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// 计算下次重试时间（Unix 秒），不可重试时返回 None
    pub fn calculate_next_retry_time(
        &self,
        retry_count: u32,
        failure_reason: &PushFailureReason,
    ) -> Option<u64> {
        if retry_count >= self.max_retries || !failure_reason.is_retryable() {
            return None;
        }

        // 基础延迟 = base_delay * (backoff_factor ^ retry_count)
        let base_delay =
            self.base_delay_seconds as f64 * self.backoff_factor.powf(retry_count as f64);

        let adjusted_delay = base_delay * failure_reason.delay_multiplier();
        let capped_delay = adjusted_delay.min(self.max_delay_seconds as f64);

        // 添加随机抖动
        let jitter = capped_delay * self.jitter_factor * (rand::random::<f64>() - 0.5);
        let final_delay = (capped_delay + jitter).max(0.0);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Some(now + final_delay as u64)
    }

    pub fn should_retry(&self, retry_count: u32, failure_reason: &PushFailureReason) -> bool {
        retry_count < self.max_retries && failure_reason.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_reason_retryable() {
        assert!(PushFailureReason::NetworkTimeout.is_retryable());
        assert!(PushFailureReason::NetworkUnavailable.is_retryable());
        assert!(PushFailureReason::ServerError(500).is_retryable());
        assert!(!PushFailureReason::ServerError(404).is_retryable());
        assert!(PushFailureReason::RateLimited.is_retryable());
        assert!(!PushFailureReason::ValidationRejected.is_retryable());
    }

    #[test]
    fn test_retry_policy_calculation() {
        let policy = RetryPolicy::default();

        let next_time = policy.calculate_next_retry_time(0, &PushFailureReason::NetworkTimeout);
        assert!(next_time.is_some());

        // 超过最大重试次数
        let next_time = policy.calculate_next_retry_time(10, &PushFailureReason::NetworkTimeout);
        assert!(next_time.is_none());

        // 校验拒绝不重试
        let next_time = policy.calculate_next_retry_time(0, &PushFailureReason::ValidationRejected);
        assert!(next_time.is_none());
    }

    #[test]
    fn test_failure_reason_from_error() {
        let e = FieldSyncError::Transport("request timeout".to_string());
        assert_eq!(PushFailureReason::from(&e), PushFailureReason::NetworkTimeout);

        let e = FieldSyncError::Validation("bad total".to_string());
        assert_eq!(
            PushFailureReason::from(&e),
            PushFailureReason::ValidationRejected
        );
    }
}
