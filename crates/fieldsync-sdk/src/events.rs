//! 事件系统模块 - 同步核心对外的刷新与会话信号
//!
//! 事件总线是显式注入、显式持有的（不是全局单例）：需要发信号或
//! 观察信号的组件各自拿一个克隆。发送是尽力而为 —— 没有订阅者时
//! 只记日志，永不向调用方传播失败。

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::sync::entity_sync::EntityKind;

/// SDK 事件类型
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SdkEvent {
    /// 一批推送通知处理完毕，相关种类的数据已刷新
    DataRefreshed { kinds: Vec<EntityKind> },
    /// 一次批量同步完成
    SyncCompleted { kind: EntityKind, applied: usize },
    /// 订单工作流状态发生迁移
    OrderStateChanged {
        order_id: i64,
        old_state: i32,
        new_state: i32,
    },
    /// 远端强制登出，会话已失效
    SessionTerminated,
}

/// 事件总线
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SdkEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SdkEvent> {
        self.tx.subscribe()
    }

    /// 尽力而为地广播事件；失败（无订阅者）只记日志
    pub fn emit(&self, event: SdkEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("事件无订阅者，丢弃: {}", e);
        }
    }
}

/// UI 刷新标记
///
/// 路由器在一批通知处理完后置位；观察方消费后复位。
#[derive(Debug, Default)]
pub struct RefreshFlag {
    flag: AtomicBool,
}

impl RefreshFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// 读取并复位
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::SeqCst)
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(SdkEvent::SessionTerminated);

        match rx.recv().await.unwrap() {
            SdkEvent::SessionTerminated => {}
            other => panic!("收到意外事件: {:?}", other),
        }
    }

    #[test]
    fn emit_without_subscribers_is_silent() {
        let bus = EventBus::new(16);
        // 不应 panic，也不返回错误
        bus.emit(SdkEvent::DataRefreshed { kinds: vec![] });
    }

    #[test]
    fn refresh_flag_take_resets() {
        let flag = RefreshFlag::new();
        assert!(!flag.take());

        flag.set();
        assert!(flag.is_set());
        assert!(flag.take());
        assert!(!flag.is_set());
        assert!(!flag.take());
    }
}
