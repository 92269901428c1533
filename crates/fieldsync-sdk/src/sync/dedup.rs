//! 通知去重窗口
//!
//! 防止同一 (种类, id) 通知在短窗口内触发多次并发下载：
//! - 准入检查与记录是同一把锁下的 check-then-set，无竞争窗口
//! - 过期键在下次命中时惰性清除
//! - 活动表超过阈值时做一次整体清扫

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::sync::entity_sync::EntityKind;

/// 去重窗口管理器
pub struct DedupWindow {
    /// 已见通知键 ((kind, id) -> 记录时间)
    seen: Mutex<HashMap<(EntityKind, i64), Instant>>,
    /// 去重窗口时长
    window: Duration,
    /// 触发整体清扫的表大小阈值
    sweep_threshold: usize,
}

impl DedupWindow {
    pub fn new(window: Duration, sweep_threshold: usize) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            window,
            sweep_threshold,
        }
    }

    /// 准入检查：窗口内重复的键被拒绝，否则记录当前时间并放行
    ///
    /// 窗口过期后同键的重复视为一次全新的合法变更通知。
    pub fn admit(&self, kind: EntityKind, id: i64) -> bool {
        let mut seen = self.seen.lock();
        let now = Instant::now();
        let key = (kind, id);

        if let Some(recorded) = seen.get(&key) {
            if now.duration_since(*recorded) < self.window {
                debug!("🔄 窗口内重复通知，丢弃: kind={} id={}", kind, id);
                return false;
            }
            // 过期键惰性清除后按新通知处理
            seen.remove(&key);
        }

        seen.insert(key, now);

        if seen.len() > self.sweep_threshold {
            Self::sweep_locked(&mut seen, self.window);
        }

        true
    }

    /// 整体清扫（需已持有锁）：移除所有超过窗口的记录
    fn sweep_locked(seen: &mut HashMap<(EntityKind, i64), Instant>, window: Duration) {
        let now = Instant::now();
        let initial_count = seen.len();

        seen.retain(|_, recorded| now.duration_since(*recorded) <= window);

        let removed = initial_count - seen.len();
        if removed > 0 {
            info!("🧹 清扫过期去重键: 移除 {} 条，剩余 {} 条", removed, seen.len());
        }
    }

    /// 当前活动表大小
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }

    /// 清空所有记录（登出 / 切换会话时使用）
    pub fn clear(&self) {
        self.seen.lock().clear();
    }
}
