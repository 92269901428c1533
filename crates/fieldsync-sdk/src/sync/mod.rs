//! 同步模块
//!
//! 职责：
//! - 按实体种类的批量拉取 / 推送（entity_sync）
//! - 推送通知的去重窗口与持久化重放（dedup / pending）
//! - 通知到同步通道的路由与刷新信号（router）
//! - 会话失效与按种类写串行化的并发原语

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

pub mod dedup;
pub mod entity_sync;
pub mod pending;
pub mod router;

pub use dedup::DedupWindow;
pub use entity_sync::{EntityKind, EntitySyncChannel, WatermarkStore, SYNC_KINDS};
pub use pending::{DrainStats, PendingQueue};
pub use router::NotificationRouter;

/// 会话守卫
///
/// 远端强制登出后置为失效；所有在途的拉取/推送在落库前检查它，
/// 失效即放弃，不提交未归一化完成的局部写入。
#[derive(Debug, Clone)]
pub struct SessionGuard {
    active: Arc<AtomicBool>,
}

impl SessionGuard {
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn invalidate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    /// 重新登录后恢复
    pub fn reactivate(&self) {
        self.active.store(true, Ordering::SeqCst);
    }
}

impl Default for SessionGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// 按实体种类的写锁表
///
/// 同一种类的批量拉取与通知触发的单条拉取互斥（通知等待，不竞速）；
/// 不同种类可以并发同步。
#[derive(Debug)]
pub struct KindLocks {
    locks: [Arc<Mutex<()>>; 6],
}

impl KindLocks {
    pub fn new() -> Self {
        Self {
            locks: std::array::from_fn(|_| Arc::new(Mutex::new(()))),
        }
    }

    fn index(kind: EntityKind) -> usize {
        match kind {
            EntityKind::Order => 0,
            EntityKind::OrderLine => 1,
            EntityKind::OosMaster => 2,
            EntityKind::OosSub => 3,
            EntityKind::Packing => 4,
            EntityKind::Logout => 5,
        }
    }

    pub async fn acquire(&self, kind: EntityKind) -> OwnedMutexGuard<()> {
        self.locks[Self::index(kind)].clone().lock_owned().await
    }
}

impl Default for KindLocks {
    fn default() -> Self {
        Self::new()
    }
}
