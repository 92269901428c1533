//! 实体同步通道 - 单一实体种类的双向同步
//!
//! ## NOTE: Channel 不做重试
//!
//! EntitySyncChannel does not retry. All retry / backoff policies MUST be
//! implemented by the transport collaborator (see `network::RetryPolicy`).
//! 传输错误原样抛给调用方；服务端校验拒绝对该记录终止，不得自动重试。

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{FieldSyncError, Result};
use crate::network::{PageQuery, RemoteEndpoint};
use crate::storage::workflow::ActivityFlag;
use crate::storage::StorageManager;
use crate::sync::SessionGuard;

use super::applier;
use super::{EntityKind, WatermarkStore};

/// 实体同步通道
pub struct EntitySyncChannel {
    kind: EntityKind,
    endpoint: Arc<dyn RemoteEndpoint>,
    storage: Arc<StorageManager>,
    watermarks: WatermarkStore,
    session: SessionGuard,
    page_size: u32,
    actor_type: Option<i32>,
    actor_id: Option<i64>,
}

impl EntitySyncChannel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: EntityKind,
        endpoint: Arc<dyn RemoteEndpoint>,
        storage: Arc<StorageManager>,
        watermarks: WatermarkStore,
        session: SessionGuard,
        page_size: u32,
        actor_type: Option<i32>,
        actor_id: Option<i64>,
    ) -> Self {
        Self {
            kind,
            endpoint,
            storage,
            watermarks,
            session,
            page_size,
            actor_type,
            actor_id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// 拉取并应用一页变更记录，返回 (本页应用条数, 是否还有更多)
    ///
    /// 幂等：结果只会新增/刷新本地行，永不删除；
    /// 同参重复调用除时间戳刷新外是 no-op。
    pub async fn pull_batch(
        &self,
        page: u32,
        page_size: u32,
        updated_since: Option<i64>,
    ) -> Result<(usize, bool)> {
        let (applied, has_more, _) = self.pull_page_inner(page, page_size, updated_since).await?;
        Ok((applied, has_more))
    }

    /// 批量同步：从持久化水位开始逐页拉取直到服务端报告没有更多
    ///
    /// 页号每次调用加一，页大小一次同步运行内固定；
    /// 运行结束后把水位推进到本轮见到的服务端 updated_at 最大值。
    pub async fn pull_all(&self) -> Result<usize> {
        let since = self.watermarks.get(self.kind).await?;
        let mut page = 1u32;
        let mut total = 0usize;
        let mut max_server_ts: Option<i64> = None;

        loop {
            let (applied, has_more, page_max_ts) =
                self.pull_page_inner(page, self.page_size, since).await?;
            total += applied;
            max_server_ts = max_server_ts.max(page_max_ts);
            debug!(
                "entity_sync {} 已同步第 {} 页 {} 条，累计 {}",
                self.kind, page, applied, total
            );
            if !has_more {
                break;
            }
            page += 1;
        }

        if let Some(ts) = max_server_ts {
            self.watermarks.set(self.kind, ts).await?;
        }

        info!("entity_sync {} 完成: {} 条", self.kind, total);
        Ok(total)
    }

    /// 单条拉取（通知触发的刷新 / 失败条目的按需重试）
    ///
    /// 远端不存在返回 `Ok(None)`，与传输错误严格区分 ——
    /// 记录可能尚未出现在权威端，调用方不得按致命处理。
    pub async fn pull_one(&self, id: i64) -> Result<Option<i64>> {
        self.ensure_session()?;

        match self.endpoint.fetch_one(self.kind, id).await? {
            Some(record) => {
                self.ensure_session()?;
                let applied_id = applier::apply(&self.storage, self.kind, &record).await?;
                Ok(Some(applied_id))
            }
            None => {
                debug!("entity_sync {} 单条拉取远端不存在: id={}", self.kind, id);
                Ok(None)
            }
        }
    }

    /// 推送本地新建实体
    ///
    /// 成功后把本地乐观行换成服务端返回的权威行（占位 id 换真 id），
    /// 并在同一响应里级联落库子记录。
    pub async fn push_create(&self, local_id: i64) -> Result<i64> {
        self.ensure_session()?;

        match self.kind {
            EntityKind::Order => self.push_create_order(local_id).await,
            EntityKind::OosMaster => self.push_create_oos(local_id).await,
            other => Err(FieldSyncError::InvalidData(format!(
                "种类 {} 不支持本地新建推送",
                other
            ))),
        }
    }

    /// 推送部分更新
    ///
    /// 服务端可能只回部分字段：响应合并到已存在的本地行上，
    /// 响应中缺席的字段保留本地旧值。
    pub async fn push_update(&self, id: i64, patch: &Value) -> Result<()> {
        self.ensure_session()?;

        let response = self.endpoint.update(self.kind, id, patch).await?;
        self.ensure_session()?;
        applier::apply_merged(&self.storage, self.kind, id, &response).await
    }

    async fn push_create_order(&self, local_id: i64) -> Result<i64> {
        let order = self
            .storage
            .get_order(local_id)
            .await?
            .ok_or_else(|| FieldSyncError::NotFound(format!("本地订单不存在: {}", local_id)))?;
        let lines = self.storage.all_lines_for_order(local_id).await?;

        let payload = json!({
            "client_ref": Uuid::new_v4().to_string(),
            "customer_id": order.customer_id,
            "customer_name": order.customer_name,
            "note": order.note,
            "total_amount": order.total_amount,
            "state": order.state.as_i32(),
            "lines": lines.iter().map(|l| json!({
                "product_id": l.product_id,
                "product_name": l.product_name,
                "quantity": l.quantity,
                "unit_price": l.unit_price,
                "status": l.status.as_i32(),
            })).collect::<Vec<_>>(),
        });

        let response = self.endpoint.create(self.kind, &payload).await?;
        self.ensure_session()?;

        let server_id = applier::entity_id_from(EntityKind::Order, &response)?;
        let mut server_order = applier::parse_order_from_payload(server_id, &response);
        server_order.flag = ActivityFlag::Active;

        let server_lines = match response.get("lines").and_then(Value::as_array) {
            Some(items) => {
                let mut parsed = Vec::with_capacity(items.len());
                for item in items {
                    let line_id = applier::entity_id_from(EntityKind::OrderLine, item)?;
                    let mut line = applier::parse_order_line_from_payload(line_id, item)?;
                    line.order_id = server_id;
                    parsed.push(line);
                }
                Some(parsed)
            }
            None => None,
        };

        self.storage
            .finalize_order_create(local_id, &server_order, server_lines.as_deref())
            .await?;

        info!(
            "✅ 订单推送创建成功: local_id={} server_id={}",
            local_id, server_id
        );
        Ok(server_id)
    }

    async fn push_create_oos(&self, local_id: i64) -> Result<i64> {
        let master = self
            .storage
            .get_oos_master(local_id)
            .await?
            .ok_or_else(|| FieldSyncError::NotFound(format!("本地缺货主事件不存在: {}", local_id)))?;
        let subs = self.storage.subs_for_master(local_id).await?;

        let payload = json!({
            "client_ref": Uuid::new_v4().to_string(),
            "customer_id": master.customer_id,
            "customer_name": master.customer_name,
            "note": master.note,
            "subs": subs.iter().map(|s| json!({
                "product_id": s.product_id,
                "product_name": s.product_name,
                "quantity": s.quantity,
                "status": s.status.as_i32(),
            })).collect::<Vec<_>>(),
        });

        let response = self.endpoint.create(self.kind, &payload).await?;
        self.ensure_session()?;

        let server_id = applier::entity_id_from(EntityKind::OosMaster, &response)?;
        let mut server_master = applier::parse_oos_master_from_payload(server_id, &response);
        server_master.flag = ActivityFlag::Active;

        let server_subs = match response.get("subs").and_then(Value::as_array) {
            Some(items) => {
                let mut parsed = Vec::with_capacity(items.len());
                for item in items {
                    let sub_id = applier::entity_id_from(EntityKind::OosSub, item)?;
                    let mut sub = applier::parse_oos_sub_from_payload(sub_id, item)?;
                    sub.master_id = server_id;
                    parsed.push(sub);
                }
                Some(parsed)
            }
            None => None,
        };

        self.storage
            .finalize_oos_create(local_id, &server_master, server_subs.as_deref())
            .await?;

        info!(
            "✅ 缺货主事件推送创建成功: local_id={} server_id={}",
            local_id, server_id
        );
        Ok(server_id)
    }

    /// 拉一页并逐条应用；会话失效立即放弃，不提交剩余记录
    async fn pull_page_inner(
        &self,
        page: u32,
        page_size: u32,
        updated_since: Option<i64>,
    ) -> Result<(usize, bool, Option<i64>)> {
        self.ensure_session()?;

        let query = PageQuery {
            page,
            page_size,
            updated_since,
            actor_type: self.actor_type,
            actor_id: self.actor_id,
        };
        let response = self.endpoint.fetch_page(self.kind, &query).await?;

        let mut applied = 0usize;
        let mut max_server_ts: Option<i64> = None;
        for record in &response.records {
            self.ensure_session()?;
            applier::apply(&self.storage, self.kind, record).await?;
            applied += 1;
            max_server_ts = max_server_ts.max(applier::server_updated_at(record));
        }

        Ok((applied, response.has_more, max_server_ts))
    }

    fn ensure_session(&self) -> Result<()> {
        if self.session.is_active() {
            Ok(())
        } else {
            Err(FieldSyncError::ShuttingDown(
                "会话已失效，放弃在途同步".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::PageResponse;
    use crate::storage::workflow::{LineStatus, OrderState};
    use crate::storage::{Order, OrderLine};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    /// 脚本化的内存端点
    struct StubEndpoint {
        pages: StdMutex<Vec<PageResponse>>,
        singles: HashMap<i64, Value>,
        create_response: Option<Value>,
        update_response: Option<Value>,
        fetch_page_calls: StdMutex<Vec<PageQuery>>,
    }

    impl StubEndpoint {
        fn empty() -> Self {
            Self {
                pages: StdMutex::new(Vec::new()),
                singles: HashMap::new(),
                create_response: None,
                update_response: None,
                fetch_page_calls: StdMutex::new(Vec::new()),
            }
        }

        fn with_pages(pages: Vec<PageResponse>) -> Self {
            Self {
                pages: StdMutex::new(pages),
                ..Self::empty()
            }
        }
    }

    impl Default for StubEndpoint {
        fn default() -> Self {
            Self::empty()
        }
    }

    #[async_trait]
    impl RemoteEndpoint for StubEndpoint {
        async fn fetch_page(&self, _kind: EntityKind, query: &PageQuery) -> crate::error::Result<PageResponse> {
            self.fetch_page_calls.lock().unwrap().push(query.clone());
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                Ok(PageResponse {
                    records: vec![],
                    has_more: false,
                })
            } else {
                Ok(pages.remove(0))
            }
        }

        async fn fetch_one(&self, _kind: EntityKind, id: i64) -> crate::error::Result<Option<Value>> {
            Ok(self.singles.get(&id).cloned())
        }

        async fn create(&self, _kind: EntityKind, _payload: &Value) -> crate::error::Result<Value> {
            self.create_response
                .clone()
                .ok_or_else(|| FieldSyncError::Transport("stub 未配置 create".to_string()))
        }

        async fn update(&self, _kind: EntityKind, _id: i64, _payload: &Value) -> crate::error::Result<Value> {
            self.update_response
                .clone()
                .ok_or_else(|| FieldSyncError::Transport("stub 未配置 update".to_string()))
        }
    }

    async fn build_channel(
        kind: EntityKind,
        endpoint: StubEndpoint,
    ) -> (TempDir, Arc<StorageManager>, EntitySyncChannel) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(StorageManager::new(temp_dir.path()).await.unwrap());
        let watermarks = WatermarkStore::new(storage.kv());
        let channel = EntitySyncChannel::new(
            kind,
            Arc::new(endpoint),
            storage.clone(),
            watermarks,
            SessionGuard::new(),
            50,
            Some(2),
            Some(77),
        );
        (temp_dir, storage, channel)
    }

    fn order_record(id: i64, updated_at: i64) -> Value {
        json!({"id": id, "customer_id": 1, "customer_name": "客户",
               "total_amount": 5.0, "state": 0, "flag": 1, "updated_at": updated_at})
    }

    #[tokio::test]
    async fn pull_all_pages_until_no_more_and_advances_watermark() {
        let endpoint = StubEndpoint::with_pages(vec![
            PageResponse {
                records: vec![order_record(1, 100), order_record(2, 300)],
                has_more: true,
            },
            PageResponse {
                records: vec![order_record(3, 200)],
                has_more: false,
            },
        ]);
        let (_tmp, storage, channel) = build_channel(EntityKind::Order, endpoint).await;

        let total = channel.pull_all().await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(storage.list_active_orders().await.unwrap().len(), 3);

        // 水位推进到本轮见到的服务端 updated_at 最大值
        let wm = WatermarkStore::new(storage.kv());
        assert_eq!(wm.get(EntityKind::Order).await.unwrap(), Some(300));
    }

    #[tokio::test]
    async fn pull_all_passes_watermark_and_actor_filter() {
        let (_tmp, storage, _) = build_channel(EntityKind::Order, StubEndpoint::empty()).await;
        let wm = WatermarkStore::new(storage.kv());
        wm.set(EntityKind::Order, 12345).await.unwrap();

        let endpoint = StubEndpoint::empty();
        let watermarks = WatermarkStore::new(storage.kv());
        let endpoint = Arc::new(endpoint);
        let channel = EntitySyncChannel::new(
            EntityKind::Order,
            endpoint.clone(),
            storage.clone(),
            watermarks,
            SessionGuard::new(),
            50,
            Some(2),
            Some(77),
        );

        channel.pull_all().await.unwrap();

        let calls = endpoint.fetch_page_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].page, 1);
        assert_eq!(calls[0].page_size, 50);
        assert_eq!(calls[0].updated_since, Some(12345));
        assert_eq!(calls[0].actor_type, Some(2));
        assert_eq!(calls[0].actor_id, Some(77));
    }

    #[tokio::test]
    async fn pull_one_not_found_is_not_fatal() {
        let (_tmp, _storage, channel) =
            build_channel(EntityKind::Order, StubEndpoint::empty()).await;
        assert!(channel.pull_one(404).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pull_one_applies_record() {
        let mut endpoint = StubEndpoint::empty();
        endpoint.singles.insert(5, order_record(5, 100));
        let (_tmp, storage, channel) = build_channel(EntityKind::Order, endpoint).await;

        assert_eq!(channel.pull_one(5).await.unwrap(), Some(5));
        assert!(storage.get_order(5).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn push_create_promotes_and_cascades_lines() {
        let mut endpoint = StubEndpoint::empty();
        endpoint.create_response = Some(json!({
            "id": 4001, "customer_id": 1, "customer_name": "客户",
            "total_amount": 7.5, "state": 0, "flag": 1,
            "lines": [
                {"id": 9001, "order_id": 4001, "product_id": 3,
                 "product_name": "货品", "quantity": 3.0, "unit_price": 2.5, "status": 0}
            ]
        }));
        let (_tmp, storage, channel) = build_channel(EntityKind::Order, endpoint).await;

        let temp_id = storage.allocate_local_id().await.unwrap();
        let line_id = storage.allocate_local_id().await.unwrap();
        let draft = Order {
            id: temp_id,
            customer_id: 1,
            customer_name: "客户".to_string(),
            note: String::new(),
            total_amount: 7.5,
            state: OrderState::New,
            flag: crate::storage::workflow::ActivityFlag::Temp,
            viewed: false,
            updated_at: 0,
        };
        let line = OrderLine {
            id: line_id,
            order_id: temp_id,
            product_id: 3,
            product_name: "货品".to_string(),
            quantity: 3.0,
            unit_price: 2.5,
            status: LineStatus::New,
            flag: crate::storage::workflow::ActivityFlag::Active,
            viewed: false,
            updated_at: 0,
        };
        storage.insert_order_draft(&draft, &[line]).await.unwrap();

        let server_id = channel.push_create(temp_id).await.unwrap();
        assert_eq!(server_id, 4001);

        assert!(storage.get_order(temp_id).await.unwrap().is_none());
        assert!(storage.get_order(4001).await.unwrap().is_some());
        let lines = storage.all_lines_for_order(4001).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].id, 9001);
    }

    #[tokio::test]
    async fn push_update_merges_partial_response() {
        let mut endpoint = StubEndpoint::empty();
        // 服务端只回部分字段
        endpoint.update_response = Some(json!({"id": 6, "total_amount": 99.0}));
        let (_tmp, storage, channel) = build_channel(EntityKind::Order, endpoint).await;

        storage
            .upsert_order(&Order {
                id: 6,
                customer_id: 8,
                customer_name: "保留我".to_string(),
                note: "保留备注".to_string(),
                total_amount: 10.0,
                state: OrderState::New,
                flag: crate::storage::workflow::ActivityFlag::Active,
                viewed: true,
                updated_at: 0,
            })
            .await
            .unwrap();

        channel.push_update(6, &json!({"total_amount": 99.0})).await.unwrap();

        let merged = storage.get_order(6).await.unwrap().unwrap();
        assert_eq!(merged.total_amount, 99.0);
        assert_eq!(merged.customer_name, "保留我");
        assert_eq!(merged.note, "保留备注");
    }

    #[tokio::test]
    async fn invalidated_session_aborts_pull() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(StorageManager::new(temp_dir.path()).await.unwrap());
        let session = SessionGuard::new();
        let channel = EntitySyncChannel::new(
            EntityKind::Order,
            Arc::new(StubEndpoint::empty()),
            storage.clone(),
            WatermarkStore::new(storage.kv()),
            session.clone(),
            50,
            None,
            None,
        );

        session.invalidate();
        let err = channel.pull_all().await.unwrap_err();
        assert!(matches!(err, FieldSyncError::ShuttingDown(_)));
    }
}
