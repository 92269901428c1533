//! 待重放通知队列 - 处理管线不可用时的持久化兜底
//!
//! 推送可能在应用尚未完成初始化时到达：这些载荷先落到 sled 的
//! 待处理列表（id、载荷、到达时间），下次初始化成功后统一重放。
//! 重放规则：
//! - 按入队序号顺序处理
//! - 同一 drain 过程内按组合键（载荷内全部 (kind,id) 对）去重
//! - 处理成功才从持久化存储删除
//! - 单条失败保留待下次 drain，其余条目继续（隔离）

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::Result;
use crate::push::{self, decode_push};
use crate::storage::kv::{keys, KvStore};
use crate::storage::now_millis;
use crate::sync::router::NotificationRouter;

/// 持久化的待处理通知
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingNotice {
    pub seq: i64,
    pub payload: Value,
    pub arrived_at: i64,
}

/// 一次 drain 的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// 成功处理并删除
    pub processed: usize,
    /// 同批重复，直接删除
    pub duplicates: usize,
    /// 载荷无法解析，删除（重试也不可能成功）
    pub invalid: usize,
    /// 处理失败，保留待下次 drain
    pub failed: usize,
}

/// 待重放通知队列
pub struct PendingQueue {
    kv: Arc<KvStore>,
}

impl PendingQueue {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    fn key_for(seq: i64) -> String {
        // 零填充保证 sled 按字典序扫描即按序号序
        format!("{}{:020}", keys::PENDING_PUSH, seq)
    }

    /// 追加一条待处理通知，返回入队序号
    pub async fn append(&self, payload: &Value) -> Result<i64> {
        let seq = self
            .kv
            .increment_counter(keys::COUNTER_PENDING_SEQ, 1)
            .await?;
        let notice = PendingNotice {
            seq,
            payload: payload.clone(),
            arrived_at: now_millis(),
        };
        self.kv.set(Self::key_for(seq).as_str(), &notice).await?;
        info!("推送载荷已入待重放队列: seq={}", seq);
        Ok(seq)
    }

    /// 当前待处理条数
    pub async fn len(&self) -> Result<usize> {
        let entries: Vec<(Vec<u8>, PendingNotice)> =
            self.kv.scan_prefix(keys::PENDING_PUSH.as_bytes()).await?;
        Ok(entries.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// 重放全部待处理通知
    pub async fn drain(&self, router: &NotificationRouter) -> Result<DrainStats> {
        let mut entries: Vec<(Vec<u8>, PendingNotice)> =
            self.kv.scan_prefix(keys::PENDING_PUSH.as_bytes()).await?;
        entries.sort_by_key(|(_, n)| n.seq);

        let mut stats = DrainStats::default();
        let mut seen: HashSet<String> = HashSet::new();

        for (key, notice) in entries {
            let dedup_key = push::compose_dedup_key(&notice.payload);
            if seen.contains(&dedup_key) {
                // 同批重复：它的孪生条目已经处理过
                self.kv.delete(&key).await?;
                stats.duplicates += 1;
                continue;
            }

            let cmd = match decode_push(&notice.payload) {
                Ok(cmd) => cmd,
                Err(e) => {
                    // 解析不了的载荷永远不会成功，删除避免毒丸堆积
                    warn!("待重放载荷无法解析，丢弃: seq={}: {}", notice.seq, e);
                    self.kv.delete(&key).await?;
                    stats.invalid += 1;
                    continue;
                }
            };

            match router.dispatch(cmd).await {
                Ok(()) => {
                    seen.insert(dedup_key);
                    self.kv.delete(&key).await?;
                    stats.processed += 1;
                }
                Err(e) => {
                    // 保留待下次 drain；其余条目继续
                    warn!("重放待处理通知失败，保留: seq={}: {}", notice.seq, e);
                    stats.failed += 1;
                }
            }
        }

        if stats != DrainStats::default() {
            info!(
                "待重放队列 drain 完成: 处理 {} 重复 {} 无效 {} 失败 {}",
                stats.processed, stats.duplicates, stats.invalid, stats.failed
            );
        }
        Ok(stats)
    }
}
