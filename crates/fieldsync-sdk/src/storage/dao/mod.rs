//! 数据访问层 - 每张表一个专门的操作模块
//!
//! 所有同步数据的写入统一走各 DAO 的 `upsert`（INSERT OR REPLACE），
//! 保证同一载荷重复应用除时间戳刷新外是 no-op。

pub mod oos;
pub mod order;
pub mod order_line;
pub mod overlay;
pub mod packing;

pub use oos::{OosMasterDao, OosSubDao};
pub use order::OrderDao;
pub use order_line::OrderLineDao;
pub use overlay::OverlayDao;
pub use packing::PackingDao;

use crate::storage::workflow::{ActivityFlag, LineStatus, OrderState};

/// 默认列表过滤条件：软删除、临时、草稿行均不可见
pub(crate) const DEFAULT_LIST_FILTER: &str = "flag > 0 AND flag NOT IN (2, 3)";

pub(crate) fn flag_from_sql(v: i32) -> rusqlite::Result<ActivityFlag> {
    ActivityFlag::from_i32(v).ok_or_else(|| invalid_column(format!("无效活动标记: {}", v)))
}

pub(crate) fn order_state_from_sql(v: i32) -> rusqlite::Result<OrderState> {
    OrderState::from_i32(v).ok_or_else(|| invalid_column(format!("无效订单状态: {}", v)))
}

pub(crate) fn line_status_from_sql(v: i32) -> rusqlite::Result<LineStatus> {
    LineStatus::from_i32(v).ok_or_else(|| invalid_column(format!("无效行状态: {}", v)))
}

fn invalid_column(msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Integer, msg.into())
}
