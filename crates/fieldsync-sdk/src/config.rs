//! SDK 配置

use std::path::PathBuf;
use std::time::Duration;

use crate::network::RetryPolicy;

/// 同步核心配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 本地数据目录（副本数据库与 KV 都在这下面）
    pub data_dir: PathBuf,
    /// 批量拉取的页大小（一次同步运行内固定）
    pub page_size: u32,
    /// 通知去重窗口
    pub dedup_window: Duration,
    /// 去重表触发整体清扫的大小阈值
    pub dedup_sweep_threshold: usize,
    /// 分页拉取的 actor 过滤（业务员类型 / id）
    pub actor_type: Option<i32>,
    pub actor_id: Option<i64>,
    /// 传输层应执行的重试策略
    pub retry: RetryPolicy,
    /// 事件总线容量
    pub event_capacity: usize,
}

impl SyncConfig {
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    data_dir: Option<PathBuf>,
    page_size: Option<u32>,
    dedup_window: Option<Duration>,
    dedup_sweep_threshold: Option<usize>,
    actor_type: Option<i32>,
    actor_id: Option<i64>,
    retry: Option<RetryPolicy>,
    event_capacity: Option<usize>,
}

impl SyncConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = Some(size);
        self
    }

    pub fn dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = Some(window);
        self
    }

    pub fn dedup_sweep_threshold(mut self, threshold: usize) -> Self {
        self.dedup_sweep_threshold = Some(threshold);
        self
    }

    /// 拉取时的 actor 过滤（业务员身份）
    pub fn actor(mut self, actor_type: i32, actor_id: i64) -> Self {
        self.actor_type = Some(actor_type);
        self.actor_id = Some(actor_id);
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> SyncConfig {
        SyncConfig {
            data_dir: self.data_dir.unwrap_or_else(|| PathBuf::from("./fieldsync")),
            page_size: self.page_size.unwrap_or(50),
            dedup_window: self.dedup_window.unwrap_or(Duration::from_secs(2)),
            dedup_sweep_threshold: self.dedup_sweep_threshold.unwrap_or(512),
            actor_type: self.actor_type,
            actor_id: self.actor_id,
            retry: self.retry.unwrap_or_default(),
            event_capacity: self.event_capacity.unwrap_or(256),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_defaults() {
        let config = SyncConfig::builder().data_dir("/tmp/x").build();
        assert_eq!(config.page_size, 50);
        assert_eq!(config.dedup_window, Duration::from_secs(2));
        assert_eq!(config.retry.max_retries, 3);
        assert!(config.actor_type.is_none());
    }

    #[test]
    fn builder_overrides() {
        let config = SyncConfig::builder()
            .data_dir("/tmp/x")
            .page_size(100)
            .dedup_window(Duration::from_millis(500))
            .actor(2, 77)
            .build();
        assert_eq!(config.page_size, 100);
        assert_eq!(config.dedup_window, Duration::from_millis(500));
        assert_eq!(config.actor_type, Some(2));
        assert_eq!(config.actor_id, Some(77));
    }
}
