//! 数据实体定义 - 本地副本各表对应的类型安全结构

use serde::{Deserialize, Serialize};

use crate::storage::workflow::{ActivityFlag, LineStatus, OrderState};

/// 订单（主实体）
///
/// `id` 为服务端 id；乐观临时行使用本地分配的负数占位 id，
/// 首次推送成功后在同一事务内换成服务端 id。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub customer_id: i64,
    pub customer_name: String,
    pub note: String,
    pub total_amount: f64,
    pub state: OrderState,
    pub flag: ActivityFlag,
    pub viewed: bool,
    /// 本地时钟时间戳（毫秒），每次落库时刷新
    pub updated_at: i64,
}

/// 订单行（子实体，外键指向订单）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub status: LineStatus,
    pub flag: ActivityFlag,
    pub viewed: bool,
    pub updated_at: i64,
}

/// 缺货主事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OosMaster {
    pub id: i64,
    pub customer_id: i64,
    pub customer_name: String,
    pub note: String,
    pub flag: ActivityFlag,
    pub viewed: bool,
    pub updated_at: i64,
}

/// 缺货子行
///
/// `master_id` 允许指向尚未到达的主事件：孤儿行保留在表内，
/// 只是在联结视图中不可见，待主行同步到达后自动补全。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OosSub {
    pub id: i64,
    pub master_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub quantity: f64,
    pub status: LineStatus,
    pub flag: ActivityFlag,
    pub viewed: bool,
    pub updated_at: i64,
}

/// 联结视图返回的缺货子行（携带主事件的客户名）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OosSubJoined {
    pub sub: OosSub,
    pub master_customer_name: String,
}

/// 拣货计数（稀疏侧表，按行实体 id 键控，与行本身字段独立更新）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackingCounter {
    pub line_id: i64,
    pub packed_qty: f64,
    pub updated_at: i64,
}
