//! 通知路由器 - (种类, id) 对到同步通道的派发
//!
//! 职责：
//! - 去重窗口准入后把每个 (种类, id) 对派发到对应通道的单条拉取
//! - 同一载荷内主实体先于子实体处理，避免瞬时孤儿
//! - 登出伪种类短路整个载荷并使会话失效
//! - 一个载荷处理完毕后发出且仅发出一次刷新信号
//! - 单个通知失败不影响同批其余通知（隔离）

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{FieldSyncError, Result};
use crate::events::{EventBus, RefreshFlag, SdkEvent};
use crate::push::PushCommand;
use crate::sync::dedup::DedupWindow;
use crate::sync::entity_sync::{EntityKind, EntitySyncChannel};
use crate::sync::{KindLocks, SessionGuard};

/// 通知路由器
pub struct NotificationRouter {
    channels: HashMap<EntityKind, Arc<EntitySyncChannel>>,
    dedup: Arc<DedupWindow>,
    locks: Arc<KindLocks>,
    events: EventBus,
    refresh: Arc<RefreshFlag>,
    session: SessionGuard,
}

impl NotificationRouter {
    pub fn new(
        channels: HashMap<EntityKind, Arc<EntitySyncChannel>>,
        dedup: Arc<DedupWindow>,
        locks: Arc<KindLocks>,
        events: EventBus,
        refresh: Arc<RefreshFlag>,
        session: SessionGuard,
    ) -> Self {
        Self {
            channels,
            dedup,
            locks,
            events,
            refresh,
            session,
        }
    }

    /// 派发一条已解码的推送命令
    pub async fn dispatch(&self, cmd: PushCommand) -> Result<()> {
        match cmd {
            PushCommand::ForceLogout => {
                warn!("收到远端强制登出，使会话失效并放弃在途同步");
                self.session.invalidate();
                self.dedup.clear();
                self.events.emit(SdkEvent::SessionTerminated);
                Ok(())
            }
            PushCommand::Refresh(pairs) => self.dispatch_refresh(pairs).await,
        }
    }

    async fn dispatch_refresh(&self, pairs: Vec<(EntityKind, i64)>) -> Result<()> {
        // 去重窗口准入：窗口内重复的键不会到达派发环节
        let mut admitted: Vec<(EntityKind, i64)> = pairs
            .into_iter()
            .filter(|(kind, id)| self.dedup.admit(*kind, *id))
            .collect();

        if admitted.is_empty() {
            return Ok(());
        }

        // 主实体先于子实体；稳定排序保持同级的到达顺序
        admitted.sort_by_key(|(kind, _)| kind.dispatch_rank());

        let mut refreshed_kinds: Vec<EntityKind> = Vec::new();
        for (kind, id) in admitted {
            if !self.session.is_active() {
                return Err(FieldSyncError::ShuttingDown(
                    "会话已失效，放弃剩余通知".to_string(),
                ));
            }

            let Some(channel) = self.channels.get(&kind) else {
                warn!("未注册同步通道的实体种类，忽略: {}", kind);
                continue;
            };

            // 与同种类的批量拉取互斥：等待，不竞速
            let _guard = self.locks.acquire(kind).await;
            match channel.pull_one(id).await {
                Ok(Some(_)) => {
                    if !refreshed_kinds.contains(&kind) {
                        refreshed_kinds.push(kind);
                    }
                }
                Ok(None) => {
                    // 通知触发的拉取：远端不存在静默丢弃
                    debug!("通知指向的记录远端不存在: {} id={}", kind, id);
                }
                Err(e) => {
                    // 隔离：单条失败不中断同批其余通知，后台路径只记日志
                    warn!("处理通知失败（同批其余通知继续）: {} id={}: {}", kind, id, e);
                }
            }
        }

        // 整个载荷处理完毕后发一次刷新信号
        self.refresh.set();
        self.events.emit(SdkEvent::DataRefreshed {
            kinds: refreshed_kinds,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{PageQuery, PageResponse, RemoteEndpoint};
    use crate::push::decode_push;
    use crate::storage::StorageManager;
    use crate::sync::entity_sync::WatermarkStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tempfile::TempDir;

    /// 记录调用顺序的端点，按 (kind, id) 返回脚本化记录
    struct RecordingEndpoint {
        calls: StdMutex<Vec<(EntityKind, i64)>>,
        records: HashMap<(&'static str, i64), Value>,
        fail_ids: Vec<i64>,
    }

    impl RecordingEndpoint {
        fn new() -> Self {
            Self {
                calls: StdMutex::new(Vec::new()),
                records: HashMap::new(),
                fail_ids: Vec::new(),
            }
        }

        fn calls(&self) -> Vec<(EntityKind, i64)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RemoteEndpoint for RecordingEndpoint {
        async fn fetch_page(
            &self,
            _kind: EntityKind,
            _query: &PageQuery,
        ) -> crate::error::Result<PageResponse> {
            Ok(PageResponse {
                records: vec![],
                has_more: false,
            })
        }

        async fn fetch_one(&self, kind: EntityKind, id: i64) -> crate::error::Result<Option<Value>> {
            self.calls.lock().unwrap().push((kind, id));
            if self.fail_ids.contains(&id) {
                return Err(FieldSyncError::Transport("stub timeout".to_string()));
            }
            Ok(self.records.get(&(kind.as_str(), id)).cloned())
        }

        async fn create(&self, _kind: EntityKind, _payload: &Value) -> crate::error::Result<Value> {
            Err(FieldSyncError::Transport("未实现".to_string()))
        }

        async fn update(
            &self,
            _kind: EntityKind,
            _id: i64,
            _payload: &Value,
        ) -> crate::error::Result<Value> {
            Err(FieldSyncError::Transport("未实现".to_string()))
        }
    }

    struct Fixture {
        _tmp: TempDir,
        storage: Arc<StorageManager>,
        endpoint: Arc<RecordingEndpoint>,
        router: NotificationRouter,
        events: EventBus,
        refresh: Arc<RefreshFlag>,
        session: SessionGuard,
    }

    async fn build_router(endpoint: RecordingEndpoint, window: Duration) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(StorageManager::new(tmp.path()).await.unwrap());
        let endpoint = Arc::new(endpoint);
        let session = SessionGuard::new();
        let events = EventBus::new(16);
        let refresh = Arc::new(RefreshFlag::new());

        let mut channels = HashMap::new();
        for kind in crate::sync::entity_sync::SYNC_KINDS {
            channels.insert(
                kind,
                Arc::new(EntitySyncChannel::new(
                    kind,
                    endpoint.clone() as Arc<dyn RemoteEndpoint>,
                    storage.clone(),
                    WatermarkStore::new(storage.kv()),
                    session.clone(),
                    50,
                    None,
                    None,
                )),
            );
        }

        let router = NotificationRouter::new(
            channels,
            Arc::new(DedupWindow::new(window, 100)),
            Arc::new(KindLocks::new()),
            events.clone(),
            refresh.clone(),
            session.clone(),
        );

        Fixture {
            _tmp: tmp,
            storage,
            endpoint,
            router,
            events,
            refresh,
            session,
        }
    }

    fn order_record(id: i64) -> Value {
        json!({"id": id, "customer_id": 1, "customer_name": "客户",
               "total_amount": 5.0, "state": 0, "flag": 1, "updated_at": 100})
    }

    #[tokio::test]
    async fn duplicate_within_window_triggers_one_fetch() {
        let mut endpoint = RecordingEndpoint::new();
        endpoint.records.insert(("order", 42), order_record(42));
        let fx = build_router(endpoint, Duration::from_secs(5)).await;

        let payload = json!({"data_ids": [{"kind": 8, "id": 42}]});
        fx.router.dispatch(decode_push(&payload).unwrap()).await.unwrap();
        fx.router.dispatch(decode_push(&payload).unwrap()).await.unwrap();

        assert_eq!(fx.endpoint.calls().len(), 1);
    }

    #[tokio::test]
    async fn repeat_after_window_triggers_second_fetch() {
        let mut endpoint = RecordingEndpoint::new();
        endpoint.records.insert(("order", 42), order_record(42));
        let fx = build_router(endpoint, Duration::from_millis(30)).await;

        let payload = json!({"data_ids": [{"kind": 8, "id": 42}]});
        fx.router.dispatch(decode_push(&payload).unwrap()).await.unwrap();
        fx.router.dispatch(decode_push(&payload).unwrap()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        fx.router.dispatch(decode_push(&payload).unwrap()).await.unwrap();

        assert_eq!(fx.endpoint.calls().len(), 2);
    }

    #[tokio::test]
    async fn master_dispatched_before_sub_within_payload() {
        let mut endpoint = RecordingEndpoint::new();
        endpoint.records.insert(
            ("oos_master", 9),
            json!({"id": 9, "customer_id": 2, "customer_name": "客户", "flag": 1}),
        );
        endpoint.records.insert(
            ("oos_sub", 31),
            json!({"id": 31, "master_id": 9, "product_id": 4, "quantity": 2.0, "status": 3, "flag": 1}),
        );
        let fx = build_router(endpoint, Duration::from_secs(5)).await;

        // 载荷内子行在前，主行在后：派发时必须主先于子
        let payload = json!({"data_ids": [{"kind": 11, "id": 31}, {"kind": 10, "id": 9}]});
        fx.router.dispatch(decode_push(&payload).unwrap()).await.unwrap();

        assert_eq!(
            fx.endpoint.calls(),
            vec![(EntityKind::OosMaster, 9), (EntityKind::OosSub, 31)]
        );

        // 两行都已落库且联结视图正确挂接
        let joined = fx.storage.list_oos_joined().await.unwrap();
        assert_eq!(joined.len(), 1);
        assert_eq!(joined[0].sub.id, 31);
        assert_eq!(joined[0].sub.master_id, 9);
    }

    #[tokio::test]
    async fn orphan_sub_backfilled_by_later_master_notification() {
        let mut endpoint = RecordingEndpoint::new();
        endpoint.records.insert(
            ("oos_sub", 31),
            json!({"id": 31, "master_id": 9, "product_id": 4, "quantity": 2.0, "status": 3, "flag": 1}),
        );
        endpoint.records.insert(
            ("oos_master", 9),
            json!({"id": 9, "customer_id": 2, "customer_name": "客户", "flag": 1}),
        );
        let fx = build_router(endpoint, Duration::from_secs(5)).await;

        // 先到的只有子行：保留为孤儿，联结视图不可见
        let sub_only = json!({"data_ids": [{"kind": 11, "id": 31}]});
        fx.router.dispatch(decode_push(&sub_only).unwrap()).await.unwrap();
        assert!(fx.storage.get_oos_sub(31).await.unwrap().is_some());
        assert!(fx.storage.list_oos_joined().await.unwrap().is_empty());

        // 主行通知晚些到达：联结视图补全
        let master_only = json!({"data_ids": [{"kind": 10, "id": 9}]});
        fx.router.dispatch(decode_push(&master_only).unwrap()).await.unwrap();
        let joined = fx.storage.list_oos_joined().await.unwrap();
        assert_eq!(joined.len(), 1);
    }

    #[tokio::test]
    async fn one_failing_pair_does_not_abort_siblings() {
        let mut endpoint = RecordingEndpoint::new();
        endpoint.fail_ids.push(1);
        endpoint.records.insert(("order", 2), order_record(2));
        let fx = build_router(endpoint, Duration::from_secs(5)).await;

        let payload = json!({"data_ids": [{"kind": 8, "id": 1}, {"kind": 8, "id": 2}]});
        fx.router.dispatch(decode_push(&payload).unwrap()).await.unwrap();

        // 失败的 1 不影响 2 的落库
        assert!(fx.storage.get_order(2).await.unwrap().is_some());
        assert_eq!(fx.endpoint.calls().len(), 2);
    }

    #[tokio::test]
    async fn refresh_signal_emitted_once_per_payload() {
        let mut endpoint = RecordingEndpoint::new();
        endpoint.records.insert(("order", 1), order_record(1));
        endpoint.records.insert(("order", 2), order_record(2));
        let fx = build_router(endpoint, Duration::from_secs(5)).await;

        let mut rx = fx.events.subscribe();
        let payload = json!({"data_ids": [{"kind": 8, "id": 1}, {"kind": 8, "id": 2}]});
        fx.router.dispatch(decode_push(&payload).unwrap()).await.unwrap();

        assert!(fx.refresh.take());
        match rx.try_recv().unwrap() {
            SdkEvent::DataRefreshed { kinds } => assert_eq!(kinds, vec![EntityKind::Order]),
            other => panic!("收到意外事件: {:?}", other),
        }
        // 只发一次
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn logout_short_circuits_and_invalidates_session() {
        let mut endpoint = RecordingEndpoint::new();
        endpoint.records.insert(("order", 5), order_record(5));
        let fx = build_router(endpoint, Duration::from_secs(5)).await;

        let mut rx = fx.events.subscribe();
        let payload = json!({"data_ids": [{"kind": 8, "id": 5}, {"kind": 1, "id": 0}]});
        fx.router.dispatch(decode_push(&payload).unwrap()).await.unwrap();

        // 数据对未被拉取，会话已失效
        assert!(fx.endpoint.calls().is_empty());
        assert!(!fx.session.is_active());
        assert!(matches!(rx.try_recv().unwrap(), SdkEvent::SessionTerminated));
    }

    #[tokio::test]
    async fn unknown_kind_in_registered_channels_is_skipped() {
        let endpoint = RecordingEndpoint::new();
        let fx = build_router(endpoint, Duration::from_secs(5)).await;

        // kind 999 在解码层就被跳过；空载荷不发刷新信号
        let payload = json!({"data_ids": [{"kind": 999, "id": 5}]});
        fx.router.dispatch(decode_push(&payload).unwrap()).await.unwrap();
        assert!(!fx.refresh.take());
    }
}
