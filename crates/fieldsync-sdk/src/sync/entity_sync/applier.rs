//! 同步结果应用器 - 将服务端载荷归一化后写入本地表
//!
//! 规则：
//! - 服务端字段名归一化到本地 schema（兼容少量同义字段）
//! - 永远盖本地时钟时间戳，不信任服务端时钟字段
//! - 落库前过一遍工作流状态机：服务端是权威，非法跳变照常落库，
//!   但记 warn 日志（操作员触发的迁移在别处严格校验）
//! - 唯一写入路径是 DAO 的 INSERT OR REPLACE，重复应用同一载荷幂等

use serde_json::Value;
use tracing::warn;

use crate::error::{FieldSyncError, Result};
use crate::storage::workflow::{ActivityFlag, LineStatus, OrderState};
use crate::storage::{now_millis, Order, OrderLine, OosMaster, OosSub, StorageManager};

use super::EntityKind;

/// 将单条服务端记录应用到本地副本，返回实体 id
pub async fn apply(storage: &StorageManager, kind: EntityKind, value: &Value) -> Result<i64> {
    let id = entity_id_from(kind, value)?;

    match kind {
        EntityKind::Order => {
            let incoming = parse_order_from_payload(id, value);
            if let Some(existing) = storage.get_order(id).await? {
                warn_on_illegal_order_jump(id, existing.state, incoming.state);
            }
            storage.upsert_order(&incoming).await?;
        }
        EntityKind::OrderLine => {
            let incoming = parse_order_line_from_payload(id, value)?;
            if let Some(existing) = storage.get_order_line(id).await? {
                warn_on_illegal_line_jump("订单行", id, existing.status, incoming.status);
            }
            storage.upsert_order_line(&incoming).await?;
        }
        EntityKind::OosMaster => {
            let incoming = parse_oos_master_from_payload(id, value);
            storage.upsert_oos_master(&incoming).await?;
        }
        EntityKind::OosSub => {
            let incoming = parse_oos_sub_from_payload(id, value)?;
            if let Some(existing) = storage.get_oos_sub(id).await? {
                warn_on_illegal_line_jump("缺货子行", id, existing.status, incoming.status);
            }
            storage.upsert_oos_sub(&incoming).await?;
        }
        EntityKind::Packing => {
            let qty = get_f64(value, &["packed_qty", "qty"]).unwrap_or(0.0);
            storage.set_packing(id, qty).await?;
        }
        EntityKind::Logout => {
            return Err(FieldSyncError::InvalidData(
                "logout 伪种类没有可应用的数据".to_string(),
            ));
        }
    }

    Ok(id)
}

/// 将部分更新的响应合并到已存在的本地行：响应里没有的字段保留本地旧值
///
/// 本地没有该行时退化为整行应用（服务端返回的就是全部已知内容）。
pub async fn apply_merged(
    storage: &StorageManager,
    kind: EntityKind,
    id: i64,
    value: &Value,
) -> Result<()> {
    match kind {
        EntityKind::Order => {
            match storage.get_order(id).await? {
                Some(existing) => {
                    let merged = merge_order_payload(existing, value);
                    storage.upsert_order(&merged).await?;
                }
                None => {
                    apply(storage, kind, value).await?;
                }
            }
        }
        EntityKind::OrderLine => {
            match storage.get_order_line(id).await? {
                Some(existing) => {
                    let merged = merge_order_line_payload(existing, value);
                    storage.upsert_order_line(&merged).await?;
                }
                None => {
                    apply(storage, kind, value).await?;
                }
            }
        }
        EntityKind::OosMaster => {
            match storage.get_oos_master(id).await? {
                Some(existing) => {
                    let merged = merge_oos_master_payload(existing, value);
                    storage.upsert_oos_master(&merged).await?;
                }
                None => {
                    apply(storage, kind, value).await?;
                }
            }
        }
        EntityKind::OosSub => {
            match storage.get_oos_sub(id).await? {
                Some(existing) => {
                    let merged = merge_oos_sub_payload(existing, value);
                    storage.upsert_oos_sub(&merged).await?;
                }
                None => {
                    apply(storage, kind, value).await?;
                }
            }
        }
        other => {
            return Err(FieldSyncError::InvalidData(format!(
                "种类 {} 不支持合并更新",
                other
            )));
        }
    }

    Ok(())
}

/// 从载荷中提取实体 id（兼容 "id" 与带种类前缀的同义键）
pub fn entity_id_from(kind: EntityKind, value: &Value) -> Result<i64> {
    let alternates: &[&str] = match kind {
        EntityKind::Order => &["id", "order_id"],
        EntityKind::OrderLine => &["id", "line_id", "order_line_id"],
        EntityKind::OosMaster => &["id", "oos_id"],
        EntityKind::OosSub => &["id", "sub_id"],
        EntityKind::Packing => &["line_id", "id"],
        EntityKind::Logout => &["id"],
    };
    get_i64(value, alternates)
        .ok_or_else(|| FieldSyncError::InvalidData(format!("{} 载荷缺少 id", kind)))
}

/// 提取服务端时间域的 updated_at（毫秒或 RFC3339），用于推进水位
pub fn server_updated_at(value: &Value) -> Option<i64> {
    let v = value.get("updated_at")?;
    if let Some(ms) = v.as_i64() {
        return Some(ms);
    }
    v.as_str()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp_millis())
}

fn warn_on_illegal_order_jump(id: i64, from: OrderState, to: OrderState) {
    if from != to && !from.can_transition_to(to) {
        warn!(
            "⚠️ 服务端订单状态跳变越过本地状态机: id={} {:?} -> {:?}，按权威落库",
            id, from, to
        );
    }
}

fn warn_on_illegal_line_jump(label: &str, id: i64, from: LineStatus, to: LineStatus) {
    if from != to && !from.can_transition_to(to) {
        warn!(
            "⚠️ 服务端{}状态跳变越过本地状态机: id={} {:?} -> {:?}，按权威落库",
            label, id, from, to
        );
    }
}

// ========== 按种类的载荷解析 ==========

pub(crate) fn parse_order_from_payload(id: i64, v: &Value) -> Order {
    Order {
        id,
        customer_id: get_i64(v, &["customer_id"]).unwrap_or(0),
        customer_name: get_str(v, &["customer_name", "customer"]),
        note: get_str(v, &["note", "remark"]),
        total_amount: get_f64(v, &["total_amount", "total"]).unwrap_or(0.0),
        state: get_i64(v, &["state", "status"])
            .and_then(|n| OrderState::from_i32(n as i32))
            .unwrap_or(OrderState::New),
        flag: get_i64(v, &["flag"])
            .and_then(|n| ActivityFlag::from_i32(n as i32))
            .unwrap_or(ActivityFlag::Active),
        // 服务端变更到达即视为未读
        viewed: false,
        updated_at: now_millis(),
    }
}

fn merge_order_payload(mut existing: Order, v: &Value) -> Order {
    if let Some(n) = get_i64(v, &["customer_id"]) {
        existing.customer_id = n;
    }
    if let Some(s) = try_str(v, &["customer_name", "customer"]) {
        existing.customer_name = s;
    }
    if let Some(s) = try_str(v, &["note", "remark"]) {
        existing.note = s;
    }
    if let Some(n) = get_f64(v, &["total_amount", "total"]) {
        existing.total_amount = n;
    }
    if let Some(s) = get_i64(v, &["state", "status"]).and_then(|n| OrderState::from_i32(n as i32)) {
        existing.state = s;
    }
    if let Some(f) = get_i64(v, &["flag"]).and_then(|n| ActivityFlag::from_i32(n as i32)) {
        existing.flag = f;
    }
    existing.updated_at = now_millis();
    existing
}

pub(crate) fn parse_order_line_from_payload(id: i64, v: &Value) -> Result<OrderLine> {
    let order_id = get_i64(v, &["order_id"])
        .ok_or_else(|| FieldSyncError::InvalidData(format!("订单行 {} 载荷缺少 order_id", id)))?;
    Ok(OrderLine {
        id,
        order_id,
        product_id: get_i64(v, &["product_id"]).unwrap_or(0),
        product_name: get_str(v, &["product_name", "product"]),
        quantity: get_f64(v, &["quantity", "qty"]).unwrap_or(0.0),
        unit_price: get_f64(v, &["unit_price", "price"]).unwrap_or(0.0),
        status: get_i64(v, &["status"])
            .and_then(|n| LineStatus::from_i32(n as i32))
            .unwrap_or(LineStatus::New),
        flag: get_i64(v, &["flag"])
            .and_then(|n| ActivityFlag::from_i32(n as i32))
            .unwrap_or(ActivityFlag::Active),
        viewed: false,
        updated_at: now_millis(),
    })
}

fn merge_order_line_payload(mut existing: OrderLine, v: &Value) -> OrderLine {
    if let Some(n) = get_i64(v, &["order_id"]) {
        existing.order_id = n;
    }
    if let Some(n) = get_i64(v, &["product_id"]) {
        existing.product_id = n;
    }
    if let Some(s) = try_str(v, &["product_name", "product"]) {
        existing.product_name = s;
    }
    if let Some(n) = get_f64(v, &["quantity", "qty"]) {
        existing.quantity = n;
    }
    if let Some(n) = get_f64(v, &["unit_price", "price"]) {
        existing.unit_price = n;
    }
    if let Some(s) = get_i64(v, &["status"]).and_then(|n| LineStatus::from_i32(n as i32)) {
        existing.status = s;
    }
    if let Some(f) = get_i64(v, &["flag"]).and_then(|n| ActivityFlag::from_i32(n as i32)) {
        existing.flag = f;
    }
    existing.updated_at = now_millis();
    existing
}

pub(crate) fn parse_oos_master_from_payload(id: i64, v: &Value) -> OosMaster {
    OosMaster {
        id,
        customer_id: get_i64(v, &["customer_id"]).unwrap_or(0),
        customer_name: get_str(v, &["customer_name", "customer"]),
        note: get_str(v, &["note", "remark"]),
        flag: get_i64(v, &["flag"])
            .and_then(|n| ActivityFlag::from_i32(n as i32))
            .unwrap_or(ActivityFlag::Active),
        viewed: false,
        updated_at: now_millis(),
    }
}

fn merge_oos_master_payload(mut existing: OosMaster, v: &Value) -> OosMaster {
    if let Some(n) = get_i64(v, &["customer_id"]) {
        existing.customer_id = n;
    }
    if let Some(s) = try_str(v, &["customer_name", "customer"]) {
        existing.customer_name = s;
    }
    if let Some(s) = try_str(v, &["note", "remark"]) {
        existing.note = s;
    }
    if let Some(f) = get_i64(v, &["flag"]).and_then(|n| ActivityFlag::from_i32(n as i32)) {
        existing.flag = f;
    }
    existing.updated_at = now_millis();
    existing
}

pub(crate) fn parse_oos_sub_from_payload(id: i64, v: &Value) -> Result<OosSub> {
    let master_id = get_i64(v, &["master_id", "oos_id"])
        .ok_or_else(|| FieldSyncError::InvalidData(format!("缺货子行 {} 载荷缺少 master_id", id)))?;
    Ok(OosSub {
        id,
        master_id,
        product_id: get_i64(v, &["product_id"]).unwrap_or(0),
        product_name: get_str(v, &["product_name", "product"]),
        quantity: get_f64(v, &["quantity", "qty"]).unwrap_or(0.0),
        status: get_i64(v, &["status"])
            .and_then(|n| LineStatus::from_i32(n as i32))
            .unwrap_or(LineStatus::New),
        flag: get_i64(v, &["flag"])
            .and_then(|n| ActivityFlag::from_i32(n as i32))
            .unwrap_or(ActivityFlag::Active),
        viewed: false,
        updated_at: now_millis(),
    })
}

fn merge_oos_sub_payload(mut existing: OosSub, v: &Value) -> OosSub {
    if let Some(n) = get_i64(v, &["master_id", "oos_id"]) {
        existing.master_id = n;
    }
    if let Some(n) = get_i64(v, &["product_id"]) {
        existing.product_id = n;
    }
    if let Some(s) = try_str(v, &["product_name", "product"]) {
        existing.product_name = s;
    }
    if let Some(n) = get_f64(v, &["quantity", "qty"]) {
        existing.quantity = n;
    }
    if let Some(s) = get_i64(v, &["status"]).and_then(|n| LineStatus::from_i32(n as i32)) {
        existing.status = s;
    }
    if let Some(f) = get_i64(v, &["flag"]).and_then(|n| ActivityFlag::from_i32(n as i32)) {
        existing.flag = f;
    }
    existing.updated_at = now_millis();
    existing
}

// ========== 取值辅助 ==========

fn get_i64(v: &Value, alternates: &[&str]) -> Option<i64> {
    alternates.iter().find_map(|k| v.get(k).and_then(Value::as_i64))
}

fn get_f64(v: &Value, alternates: &[&str]) -> Option<f64> {
    alternates.iter().find_map(|k| v.get(k).and_then(Value::as_f64))
}

fn try_str(v: &Value, alternates: &[&str]) -> Option<String> {
    alternates
        .iter()
        .find_map(|k| v.get(k).and_then(Value::as_str))
        .map(String::from)
}

fn get_str(v: &Value, alternates: &[&str]) -> String {
    try_str(v, alternates).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn create_storage() -> (TempDir, StorageManager) {
        let temp_dir = TempDir::new().unwrap();
        let storage = StorageManager::new(temp_dir.path()).await.unwrap();
        (temp_dir, storage)
    }

    #[tokio::test]
    async fn apply_normalizes_alternate_field_names() {
        let (_tmp, storage) = create_storage().await;

        let payload = json!({
            "order_id": 300,
            "customer_id": 12,
            "customer": "名称走同义字段",
            "remark": "备注走同义字段",
            "total": 55.5,
            "status": 1,
            "flag": 1,
            "updated_at": "2024-06-01T10:00:00+00:00"
        });

        let id = apply(&storage, EntityKind::Order, &payload).await.unwrap();
        assert_eq!(id, 300);

        let order = storage.get_order(300).await.unwrap().unwrap();
        assert_eq!(order.customer_name, "名称走同义字段");
        assert_eq!(order.note, "备注走同义字段");
        assert_eq!(order.total_amount, 55.5);
        assert_eq!(order.state, OrderState::SentToStorekeeper);
        // 落的是本地时钟，不是服务端的 2024 年时间戳
        assert!(order.updated_at > 1_750_000_000_000);
    }

    #[tokio::test]
    async fn apply_twice_is_idempotent() {
        let (_tmp, storage) = create_storage().await;

        let payload = json!({
            "id": 7, "customer_id": 3, "customer_name": "A",
            "total_amount": 10.0, "state": 0, "flag": 1
        });

        apply(&storage, EntityKind::Order, &payload).await.unwrap();
        let first = storage.get_order(7).await.unwrap().unwrap();

        apply(&storage, EntityKind::Order, &payload).await.unwrap();
        let second = storage.get_order(7).await.unwrap().unwrap();

        // 除本地时间戳刷新外完全一致，且行数不变
        assert_eq!(first.customer_name, second.customer_name);
        assert_eq!(first.total_amount, second.total_amount);
        assert_eq!(first.state, second.state);
        assert_eq!(first.flag, second.flag);
        assert_eq!(storage.list_active_orders().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn apply_merged_keeps_absent_fields() {
        let (_tmp, storage) = create_storage().await;

        apply(
            &storage,
            EntityKind::Order,
            &json!({"id": 9, "customer_id": 5, "customer_name": "老字段",
                    "note": "原备注", "total_amount": 20.0, "state": 1, "flag": 1}),
        )
        .await
        .unwrap();

        // 服务端只回了 total_amount：其余字段保留本地旧值
        apply_merged(&storage, EntityKind::Order, 9, &json!({"total_amount": 88.0}))
            .await
            .unwrap();

        let merged = storage.get_order(9).await.unwrap().unwrap();
        assert_eq!(merged.total_amount, 88.0);
        assert_eq!(merged.customer_name, "老字段");
        assert_eq!(merged.note, "原备注");
        assert_eq!(merged.state, OrderState::SentToStorekeeper);
    }

    #[tokio::test]
    async fn oos_sub_requires_master_id() {
        let (_tmp, storage) = create_storage().await;

        let err = apply(&storage, EntityKind::OosSub, &json!({"id": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, FieldSyncError::InvalidData(_)));

        // 有 master_id 即可落库，即使主行尚未到达（孤儿容忍）
        apply(
            &storage,
            EntityKind::OosSub,
            &json!({"id": 1, "master_id": 77, "product_id": 2, "quantity": 4.0, "status": 3}),
        )
        .await
        .unwrap();
        assert!(storage.get_oos_sub(1).await.unwrap().is_some());
    }

    #[test]
    fn server_updated_at_accepts_millis_and_rfc3339() {
        assert_eq!(
            server_updated_at(&json!({"updated_at": 1700000000000i64})),
            Some(1_700_000_000_000)
        );
        let parsed = server_updated_at(&json!({"updated_at": "2023-11-14T22:13:20+00:00"}));
        assert_eq!(parsed, Some(1_700_000_000_000));
        assert_eq!(server_updated_at(&json!({})), None);
    }
}
