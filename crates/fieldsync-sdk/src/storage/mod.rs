//! 存储模块 - 本地副本的数据持久化层
//!
//! 采用分层架构设计：
//! - StorageManager: 统一的存储管理器，提供领域 API，外部不直接接触 SQLite
//! - DAO Layer: 数据访问层，每张表一个专门的操作模块
//! - Entities: 数据实体定义，类型安全的数据传输
//! - Workflow: 工作流状态机，落库前的迁移校验
//! - KV: sled 持久化，承载水位与待重放通知

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{FieldSyncError, Result};

pub mod dao;
pub mod entities;
pub mod kv;
pub mod sqlite;
pub mod workflow;

pub use entities::*;
pub use workflow::{ActivityFlag, LineStatus, OrderState};

use dao::{OosMasterDao, OosSubDao, OrderDao, OrderLineDao, OverlayDao, PackingDao};
use kv::KvStore;
use sqlite::ReplicaDb;

/// 本地时钟时间戳（毫秒）
///
/// 落库永远盖本地时钟而不是服务端时钟字段，保证设备视角的
/// “最后同步时间”单调。
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// 存储管理器 - 统一的数据访问接口
///
/// 所有副本写入都经由这里；按实体种类的写串行化由上层的
/// 种类锁保证，连接本身由单个互斥量保护。
pub struct StorageManager {
    base_path: PathBuf,
    conn: Arc<Mutex<Connection>>,
    kv: Arc<KvStore>,
}

impl StorageManager {
    /// 创建新的存储管理器
    pub async fn new(base_path: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(base_path)
            .await
            .map_err(|e| FieldSyncError::Io(format!("创建数据目录失败: {}", e)))?;

        let conn = ReplicaDb::open(&base_path.join("replica.db"))?;
        let kv = Arc::new(KvStore::new(base_path).await?);

        Ok(Self {
            base_path: base_path.to_path_buf(),
            conn: Arc::new(Mutex::new(conn)),
            kv,
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn kv(&self) -> Arc<KvStore> {
        self.kv.clone()
    }

    /// 分配本地占位 id（负数，服务端 id 恒为正，二者不会冲突）
    pub async fn allocate_local_id(&self) -> Result<i64> {
        let n = self
            .kv
            .increment_counter(kv::keys::COUNTER_LOCAL_ID, 1)
            .await?;
        Ok(-n)
    }

    // ========== 订单 ==========

    pub async fn upsert_order(&self, order: &Order) -> Result<()> {
        let conn = self.conn.lock().await;
        OrderDao::new(&conn).upsert(order)
    }

    pub async fn get_order(&self, id: i64) -> Result<Option<Order>> {
        let conn = self.conn.lock().await;
        OrderDao::new(&conn).get(id)
    }

    pub async fn list_active_orders(&self) -> Result<Vec<Order>> {
        let conn = self.conn.lock().await;
        OrderDao::new(&conn).list_active()
    }

    pub async fn list_transient_orders(&self) -> Result<Vec<Order>> {
        let conn = self.conn.lock().await;
        OrderDao::new(&conn).list_transient()
    }

    pub async fn mark_order_viewed(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        OrderDao::new(&conn).mark_viewed(id)
    }

    pub async fn unviewed_order_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        OrderDao::new(&conn).unviewed_count()
    }

    /// 本地新建订单（乐观临时行 + 挂属行，一个事务内写入）
    pub async fn insert_order_draft(&self, order: &Order, lines: &[OrderLine]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        OrderDao::new(&tx).upsert(order)?;
        for line in lines {
            OrderLineDao::new(&tx).upsert(line)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// 推送创建成功后的本地收尾：
    /// 占位 id 换服务端 id、行激活、挂属行重新键控、
    /// 服务端级联返回的权威行替换占位行 —— 全部在同一事务内完成。
    pub async fn finalize_order_create(
        &self,
        temp_id: i64,
        server_order: &Order,
        server_lines: Option<&[OrderLine]>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let now = now_millis();
        OrderDao::new(&tx).rekey(temp_id, server_order.id, now)?;
        OrderLineDao::new(&tx).rekey_order(temp_id, server_order.id)?;
        OrderDao::new(&tx).upsert(server_order)?;
        if let Some(lines) = server_lines {
            OrderLineDao::new(&tx).delete_placeholder_lines(server_order.id)?;
            for line in lines {
                OrderLineDao::new(&tx).upsert(line)?;
            }
        }

        tx.commit()?;
        debug!(temp_id, server_id = server_order.id, "订单促升完成");
        Ok(())
    }

    /// 操作员触发的订单状态迁移（严格校验）
    ///
    /// 终态迁移会在同一事务内对所有挂属行做标记级联：
    /// completed 保持 active，rejected / cancelled 软删除挂属行。
    pub async fn apply_order_transition(&self, id: i64, new_state: OrderState) -> Result<OrderState> {
        let mut conn = self.conn.lock().await;

        let current = OrderDao::new(&conn)
            .get(id)?
            .ok_or_else(|| FieldSyncError::NotFound(format!("订单不存在: {}", id)))?;

        if !current.state.can_transition_to(new_state) {
            return Err(FieldSyncError::Conflict(format!(
                "订单 {} 不允许 {:?} -> {:?}",
                id, current.state, new_state
            )));
        }

        let now = now_millis();
        let tx = conn.transaction()?;
        OrderDao::new(&tx).set_state(id, new_state, now)?;
        if new_state.is_terminal() {
            let line_flag = match new_state {
                OrderState::Completed => ActivityFlag::Active,
                _ => ActivityFlag::Deleted,
            };
            OrderLineDao::new(&tx).cascade_flag(id, line_flag, now)?;
        }
        tx.commit()?;

        Ok(current.state)
    }

    /// 本地直接修改订单。已审批状态必须走影子行，终态禁止修改。
    pub async fn update_order_local(&self, order: &Order) -> Result<()> {
        let conn = self.conn.lock().await;
        let dao = OrderDao::new(&conn);
        let current = dao
            .get(order.id)?
            .ok_or_else(|| FieldSyncError::NotFound(format!("订单不存在: {}", order.id)))?;

        if current.state.is_approved() {
            return Err(FieldSyncError::Conflict(format!(
                "订单 {} 已审批，编辑必须走影子行",
                order.id
            )));
        }
        if current.state.is_terminal() {
            return Err(FieldSyncError::Conflict(format!(
                "订单 {} 已进入终态，不可修改",
                order.id
            )));
        }

        dao.upsert(order)
    }

    // ========== 订单行 ==========

    pub async fn upsert_order_line(&self, line: &OrderLine) -> Result<()> {
        let conn = self.conn.lock().await;
        OrderLineDao::new(&conn).upsert(line)
    }

    pub async fn get_order_line(&self, id: i64) -> Result<Option<OrderLine>> {
        let conn = self.conn.lock().await;
        OrderLineDao::new(&conn).get(id)
    }

    pub async fn lines_for_order(&self, order_id: i64) -> Result<Vec<OrderLine>> {
        let conn = self.conn.lock().await;
        OrderLineDao::new(&conn).list_for_order(order_id)
    }

    pub async fn all_lines_for_order(&self, order_id: i64) -> Result<Vec<OrderLine>> {
        let conn = self.conn.lock().await;
        OrderLineDao::new(&conn).list_all_for_order(order_id)
    }

    pub async fn mark_order_line_viewed(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        OrderLineDao::new(&conn).mark_viewed(id)
    }

    pub async fn unviewed_order_line_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        OrderLineDao::new(&conn).unviewed_count()
    }

    /// 操作员触发的订单行状态迁移（严格校验）
    pub async fn apply_order_line_status(&self, id: i64, new_status: LineStatus) -> Result<LineStatus> {
        let conn = self.conn.lock().await;
        let dao = OrderLineDao::new(&conn);
        let current = dao
            .get(id)?
            .ok_or_else(|| FieldSyncError::NotFound(format!("订单行不存在: {}", id)))?;

        if !current.status.can_transition_to(new_status) {
            return Err(FieldSyncError::Conflict(format!(
                "订单行 {} 不允许 {:?} -> {:?}",
                id, current.status, new_status
            )));
        }

        dao.set_status(id, new_status, now_millis())?;
        Ok(current.status)
    }

    // ========== 缺货 ==========

    pub async fn upsert_oos_master(&self, master: &OosMaster) -> Result<()> {
        let conn = self.conn.lock().await;
        OosMasterDao::new(&conn).upsert(master)
    }

    pub async fn get_oos_master(&self, id: i64) -> Result<Option<OosMaster>> {
        let conn = self.conn.lock().await;
        OosMasterDao::new(&conn).get(id)
    }

    pub async fn list_active_oos_masters(&self) -> Result<Vec<OosMaster>> {
        let conn = self.conn.lock().await;
        OosMasterDao::new(&conn).list_active()
    }

    pub async fn unviewed_oos_master_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        OosMasterDao::new(&conn).unviewed_count()
    }

    pub async fn mark_oos_master_viewed(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        OosMasterDao::new(&conn).mark_viewed(id)
    }

    /// 本地新建缺货主事件（乐观临时行 + 挂属子行，一个事务内写入）
    pub async fn insert_oos_draft(&self, master: &OosMaster, subs: &[OosSub]) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        OosMasterDao::new(&tx).upsert(master)?;
        for sub in subs {
            OosSubDao::new(&tx).upsert(sub)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// 推送创建成功后的本地收尾（缺货主事件），与订单促升同一套规则
    pub async fn finalize_oos_create(
        &self,
        temp_id: i64,
        server_master: &OosMaster,
        server_subs: Option<&[OosSub]>,
    ) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let now = now_millis();
        OosMasterDao::new(&tx).rekey(temp_id, server_master.id, now)?;
        OosSubDao::new(&tx).rekey_master(temp_id, server_master.id)?;
        OosMasterDao::new(&tx).upsert(server_master)?;
        if let Some(subs) = server_subs {
            OosSubDao::new(&tx).delete_placeholder_subs(server_master.id)?;
            for sub in subs {
                OosSubDao::new(&tx).upsert(sub)?;
            }
        }

        tx.commit()?;
        debug!(temp_id, server_id = server_master.id, "缺货主事件促升完成");
        Ok(())
    }

    pub async fn upsert_oos_sub(&self, sub: &OosSub) -> Result<()> {
        let conn = self.conn.lock().await;
        OosSubDao::new(&conn).upsert(sub)
    }

    pub async fn get_oos_sub(&self, id: i64) -> Result<Option<OosSub>> {
        let conn = self.conn.lock().await;
        OosSubDao::new(&conn).get(id)
    }

    pub async fn subs_for_master(&self, master_id: i64) -> Result<Vec<OosSub>> {
        let conn = self.conn.lock().await;
        OosSubDao::new(&conn).list_for_master(master_id)
    }

    /// 缺货联结视图（孤儿子行在主行到达前不可见）
    pub async fn list_oos_joined(&self) -> Result<Vec<OosSubJoined>> {
        let conn = self.conn.lock().await;
        OosSubDao::new(&conn).list_joined()
    }

    pub async fn unviewed_oos_sub_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        OosSubDao::new(&conn).unviewed_count()
    }

    pub async fn mark_oos_sub_viewed(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        OosSubDao::new(&conn).mark_viewed(id)
    }

    /// 操作员触发的缺货子行状态迁移（严格校验）
    pub async fn apply_oos_sub_status(&self, id: i64, new_status: LineStatus) -> Result<LineStatus> {
        let conn = self.conn.lock().await;
        let dao = OosSubDao::new(&conn);
        let current = dao
            .get(id)?
            .ok_or_else(|| FieldSyncError::NotFound(format!("缺货子行不存在: {}", id)))?;

        if !current.status.can_transition_to(new_status) {
            return Err(FieldSyncError::Conflict(format!(
                "缺货子行 {} 不允许 {:?} -> {:?}",
                id, current.status, new_status
            )));
        }

        dao.set_status(id, new_status, now_millis())?;
        Ok(current.status)
    }

    // ========== 拣货计数 ==========

    pub async fn set_packing(&self, line_id: i64, packed_qty: f64) -> Result<()> {
        let conn = self.conn.lock().await;
        PackingDao::new(&conn).upsert(&PackingCounter {
            line_id,
            packed_qty,
            updated_at: now_millis(),
        })
    }

    pub async fn get_packing(&self, line_id: i64) -> Result<Option<PackingCounter>> {
        let conn = self.conn.lock().await;
        PackingDao::new(&conn).get(line_id)
    }

    // ========== 编辑影子行 ==========

    /// 开始编辑已审批订单：把已提交行拷贝到影子表
    ///
    /// 已存在影子行时直接返回它（继续上次未完成的编辑）。
    pub async fn begin_order_edit(&self, order_id: i64) -> Result<Order> {
        let conn = self.conn.lock().await;
        let overlay_dao = OverlayDao::new(&conn);
        if let Some(existing) = overlay_dao.get(order_id)? {
            return Ok(existing);
        }

        let order = OrderDao::new(&conn)
            .get(order_id)?
            .ok_or_else(|| FieldSyncError::NotFound(format!("订单不存在: {}", order_id)))?;
        if !order.state.is_approved() {
            return Err(FieldSyncError::Conflict(format!(
                "订单 {} 不在已审批状态，直接修改即可，无需影子行",
                order_id
            )));
        }

        overlay_dao.upsert(&order)?;
        Ok(order)
    }

    /// 更新影子行（订单必须仍处于已审批状态）
    pub async fn update_order_edit(&self, overlay: &Order) -> Result<()> {
        let conn = self.conn.lock().await;
        let order = OrderDao::new(&conn)
            .get(overlay.id)?
            .ok_or_else(|| FieldSyncError::NotFound(format!("订单不存在: {}", overlay.id)))?;
        if !order.state.is_approved() {
            return Err(FieldSyncError::Conflict(format!(
                "订单 {} 已离开已审批状态，影子行不再接受编辑",
                overlay.id
            )));
        }

        OverlayDao::new(&conn).upsert(overlay)
    }

    pub async fn get_order_overlay(&self, order_id: i64) -> Result<Option<Order>> {
        let conn = self.conn.lock().await;
        OverlayDao::new(&conn).get(order_id)
    }

    pub async fn delete_order_overlay(&self, order_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        OverlayDao::new(&conn).delete(order_id)?;
        Ok(())
    }
}
