//! SDK 门面 - 同步核心的统一入口
//!
//! 组装存储、同步通道、去重窗口、待重放队列与路由器，
//! 对宿主应用暴露：
//! - `sync_all` / `sync_one`：批量同步与单条刷新
//! - `handle_push` / `drain_pending`：推送入口与重启后重放
//! - `apply_workflow_transition`：操作员触发的状态迁移（严格校验）
//! - 订单本地新建 / 推送 / 影子行编辑流
//! - `unviewed_count`：未读角标

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::info;

use crate::config::SyncConfig;
use crate::error::{FieldSyncError, Result};
use crate::events::{EventBus, RefreshFlag, SdkEvent};
use crate::network::RemoteEndpoint;
use crate::push::decode_push;
use crate::storage::workflow::{ActivityFlag, LineStatus, OrderState};
use crate::storage::{Order, OrderLine, StorageManager};
use crate::sync::dedup::DedupWindow;
use crate::sync::entity_sync::{EntityKind, EntitySyncChannel, WatermarkStore, SYNC_KINDS};
use crate::sync::pending::{DrainStats, PendingQueue};
use crate::sync::router::NotificationRouter;
use crate::sync::{KindLocks, SessionGuard};

/// 本地新建订单的行草稿
#[derive(Debug, Clone)]
pub struct OrderLineDraft {
    pub product_id: i64,
    pub product_name: String,
    pub quantity: f64,
    pub unit_price: f64,
}

/// 本地新建订单的草稿
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub customer_id: i64,
    pub customer_name: String,
    pub note: String,
    pub lines: Vec<OrderLineDraft>,
}

/// 同步核心 SDK
pub struct FieldSyncSdk {
    storage: Arc<StorageManager>,
    channels: HashMap<EntityKind, Arc<EntitySyncChannel>>,
    router: NotificationRouter,
    pending: PendingQueue,
    events: EventBus,
    refresh: Arc<RefreshFlag>,
    session: SessionGuard,
    locks: Arc<KindLocks>,
    /// 处理管线是否已就绪；未就绪时推送载荷进持久化兜底队列
    started: AtomicBool,
}

impl FieldSyncSdk {
    /// 初始化 SDK（打开本地副本与 KV，组装同步管线）
    pub async fn initialize(
        config: SyncConfig,
        endpoint: Arc<dyn RemoteEndpoint>,
    ) -> Result<Arc<Self>> {
        let storage = Arc::new(StorageManager::new(&config.data_dir).await?);
        let session = SessionGuard::new();
        let events = EventBus::new(config.event_capacity);
        let refresh = Arc::new(RefreshFlag::new());
        let locks = Arc::new(KindLocks::new());
        let dedup = Arc::new(DedupWindow::new(
            config.dedup_window,
            config.dedup_sweep_threshold,
        ));

        let mut channels = HashMap::new();
        for kind in SYNC_KINDS {
            channels.insert(
                kind,
                Arc::new(EntitySyncChannel::new(
                    kind,
                    endpoint.clone(),
                    storage.clone(),
                    WatermarkStore::new(storage.kv()),
                    session.clone(),
                    config.page_size,
                    config.actor_type,
                    config.actor_id,
                )),
            );
        }

        let router = NotificationRouter::new(
            channels.clone(),
            dedup,
            locks.clone(),
            events.clone(),
            refresh.clone(),
            session.clone(),
        );
        let pending = PendingQueue::new(storage.kv());

        info!("fieldsync SDK 初始化完成: data_dir={}", config.data_dir.display());

        Ok(Arc::new(Self {
            storage,
            channels,
            router,
            pending,
            events,
            refresh,
            session,
            locks,
            started: AtomicBool::new(false),
        }))
    }

    /// 标记处理管线就绪并重放待处理通知
    pub async fn start(&self) -> Result<DrainStats> {
        self.started.store(true, Ordering::SeqCst);
        self.drain_pending().await
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// 关闭：后续推送重新进入持久化兜底队列
    pub async fn shutdown(&self) {
        self.started.store(false, Ordering::SeqCst);
        info!("fieldsync SDK 已关闭");
    }

    pub fn storage(&self) -> Arc<StorageManager> {
        self.storage.clone()
    }

    pub fn session(&self) -> &SessionGuard {
        &self.session
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SdkEvent> {
        self.events.subscribe()
    }

    /// UI 轮询用的刷新标记（观察方消费后复位）
    pub fn refresh_flag(&self) -> Arc<RefreshFlag> {
        self.refresh.clone()
    }

    fn channel(&self, kind: EntityKind) -> Result<&Arc<EntitySyncChannel>> {
        self.channels
            .get(&kind)
            .ok_or_else(|| FieldSyncError::InvalidData(format!("种类 {} 没有同步通道", kind)))
    }

    // ========== 同步 ==========

    /// 批量同步一个实体种类（与同种类的通知拉取互斥）
    pub async fn sync_all(&self, kind: EntityKind) -> Result<usize> {
        let channel = self.channel(kind)?;
        let _guard = self.locks.acquire(kind).await;
        let applied = channel.pull_all().await?;
        self.events.emit(SdkEvent::SyncCompleted { kind, applied });
        Ok(applied)
    }

    /// 批量同步全部数据种类
    pub async fn sync_all_kinds(&self) -> Result<usize> {
        let mut total = 0usize;
        for kind in SYNC_KINDS {
            total += self.sync_all(kind).await?;
        }
        Ok(total)
    }

    /// 用户直接请求的单条刷新：远端不存在要上报，不静默
    pub async fn sync_one(&self, kind: EntityKind, id: i64) -> Result<()> {
        let channel = self.channel(kind)?;
        let _guard = self.locks.acquire(kind).await;
        match channel.pull_one(id).await? {
            Some(_) => Ok(()),
            None => Err(FieldSyncError::NotFound(format!(
                "远端不存在: {} id={}",
                kind, id
            ))),
        }
    }

    /// 推送入口
    ///
    /// 管线未就绪时载荷进持久化兜底队列，初始化完成后由
    /// `drain_pending` 重放；就绪时解码后直接路由。
    pub async fn handle_push(&self, raw: &Value) -> Result<()> {
        if !self.is_started() {
            self.pending.append(raw).await?;
            return Ok(());
        }
        let cmd = decode_push(raw)?;
        self.router.dispatch(cmd).await
    }

    /// 重放持久化兜底队列
    pub async fn drain_pending(&self) -> Result<DrainStats> {
        self.pending.drain(&self.router).await
    }

    // ========== 未读角标 ==========

    pub async fn unviewed_count(&self, kind: EntityKind) -> Result<i64> {
        match kind {
            EntityKind::Order => self.storage.unviewed_order_count().await,
            EntityKind::OrderLine => self.storage.unviewed_order_line_count().await,
            EntityKind::OosMaster => self.storage.unviewed_oos_master_count().await,
            EntityKind::OosSub => self.storage.unviewed_oos_sub_count().await,
            other => Err(FieldSyncError::InvalidData(format!(
                "种类 {} 没有未读角标",
                other
            ))),
        }
    }

    pub async fn mark_viewed(&self, kind: EntityKind, id: i64) -> Result<()> {
        match kind {
            EntityKind::Order => self.storage.mark_order_viewed(id).await,
            EntityKind::OrderLine => self.storage.mark_order_line_viewed(id).await,
            EntityKind::OosMaster => self.storage.mark_oos_master_viewed(id).await,
            EntityKind::OosSub => self.storage.mark_oos_sub_viewed(id).await,
            other => Err(FieldSyncError::InvalidData(format!(
                "种类 {} 没有未读角标",
                other
            ))),
        }
    }

    // ========== 工作流 ==========

    /// 操作员触发的状态迁移（严格校验，非法迁移返回 Conflict 且不落库）
    pub async fn apply_workflow_transition(
        &self,
        kind: EntityKind,
        id: i64,
        new_state: i32,
    ) -> Result<()> {
        match kind {
            EntityKind::Order => {
                let target = OrderState::from_i32(new_state).ok_or_else(|| {
                    FieldSyncError::InvalidData(format!("无效订单状态: {}", new_state))
                })?;
                let old = self.storage.apply_order_transition(id, target).await?;
                self.events.emit(SdkEvent::OrderStateChanged {
                    order_id: id,
                    old_state: old.as_i32(),
                    new_state: target.as_i32(),
                });
                Ok(())
            }
            EntityKind::OrderLine => {
                let target = LineStatus::from_i32(new_state).ok_or_else(|| {
                    FieldSyncError::InvalidData(format!("无效行状态: {}", new_state))
                })?;
                self.storage.apply_order_line_status(id, target).await?;
                Ok(())
            }
            EntityKind::OosSub => {
                let target = LineStatus::from_i32(new_state).ok_or_else(|| {
                    FieldSyncError::InvalidData(format!("无效行状态: {}", new_state))
                })?;
                self.storage.apply_oos_sub_status(id, target).await?;
                Ok(())
            }
            other => Err(FieldSyncError::InvalidData(format!(
                "种类 {} 没有工作流状态机",
                other
            ))),
        }
    }

    // ========== 订单本地新建 / 推送 ==========

    /// 本地新建订单（乐观临时行，负数占位 id），返回占位 id
    pub async fn create_order(&self, draft: OrderDraft) -> Result<i64> {
        let temp_id = self.storage.allocate_local_id().await?;
        let now = chrono::Utc::now().timestamp_millis();

        let total_amount: f64 = draft
            .lines
            .iter()
            .map(|l| l.quantity * l.unit_price)
            .sum();

        let mut lines = Vec::with_capacity(draft.lines.len());
        for line in &draft.lines {
            lines.push(OrderLine {
                id: self.storage.allocate_local_id().await?,
                order_id: temp_id,
                product_id: line.product_id,
                product_name: line.product_name.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                status: LineStatus::New,
                flag: ActivityFlag::Active,
                viewed: true,
                updated_at: now,
            });
        }

        let order = Order {
            id: temp_id,
            customer_id: draft.customer_id,
            customer_name: draft.customer_name,
            note: draft.note,
            total_amount,
            state: OrderState::New,
            flag: ActivityFlag::Temp,
            viewed: true,
            updated_at: now,
        };

        self.storage.insert_order_draft(&order, &lines).await?;
        Ok(temp_id)
    }

    /// 推送本地新建的订单；成功后返回服务端 id（占位行已原子促升）
    pub async fn submit_order(&self, local_id: i64) -> Result<i64> {
        let channel = self.channel(EntityKind::Order)?;
        let _guard = self.locks.acquire(EntityKind::Order).await;
        channel.push_create(local_id).await
    }

    /// 本地直接修改订单（未审批状态）；已审批必须走影子行
    pub async fn update_order(&self, order: &Order) -> Result<()> {
        self.storage.update_order_local(order).await
    }

    /// 推送本地订单修改（未审批状态的直接修改）
    pub async fn push_order_update(&self, id: i64) -> Result<()> {
        let order = self
            .storage
            .get_order(id)
            .await?
            .ok_or_else(|| FieldSyncError::NotFound(format!("订单不存在: {}", id)))?;
        let patch = json!({
            "customer_id": order.customer_id,
            "customer_name": order.customer_name,
            "note": order.note,
            "total_amount": order.total_amount,
        });

        let channel = self.channel(EntityKind::Order)?;
        let _guard = self.locks.acquire(EntityKind::Order).await;
        channel.push_update(id, &patch).await
    }

    // ========== 影子行编辑流 ==========

    /// 开始编辑已审批订单（拷贝到影子表）
    pub async fn begin_order_edit(&self, id: i64) -> Result<Order> {
        self.storage.begin_order_edit(id).await
    }

    /// 编辑累积到影子行，已提交行保持不动
    pub async fn update_order_edit(&self, overlay: &Order) -> Result<()> {
        self.storage.update_order_edit(overlay).await
    }

    /// 合并影子行：推送到服务端，响应合并回已提交行，然后删除影子行
    pub async fn merge_order_edit(&self, id: i64) -> Result<()> {
        let overlay = self
            .storage
            .get_order_overlay(id)
            .await?
            .ok_or_else(|| FieldSyncError::NotFound(format!("订单 {} 没有影子行", id)))?;

        let patch = json!({
            "customer_id": overlay.customer_id,
            "customer_name": overlay.customer_name,
            "note": overlay.note,
            "total_amount": overlay.total_amount,
        });

        let channel = self.channel(EntityKind::Order)?;
        let _guard = self.locks.acquire(EntityKind::Order).await;
        channel.push_update(id, &patch).await?;
        self.storage.delete_order_overlay(id).await?;
        Ok(())
    }

    // ========== 拣货计数 ==========

    /// 记录某行的已拣数量（独立于行字段，不触发行的工作流）
    pub async fn record_packing(&self, line_id: i64, packed_qty: f64) -> Result<()> {
        self.storage.set_packing(line_id, packed_qty).await
    }
}
