//! 订单数据访问层 - 管理订单主表与未读数等

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::storage::dao::{flag_from_sql, order_state_from_sql, DEFAULT_LIST_FILTER};
use crate::storage::entities::Order;
use crate::storage::workflow::{ActivityFlag, OrderState};

/// 订单数据访问对象
pub struct OrderDao<'a> {
    conn: &'a Connection,
}

impl<'a> OrderDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// 插入或更新订单（同步数据唯一写入路径）
    pub fn upsert(&self, order: &Order) -> Result<()> {
        let sql = "INSERT OR REPLACE INTO orders (
            id, customer_id, customer_name, note, total_amount,
            state, flag, viewed, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

        self.conn.execute(
            sql,
            params![
                order.id,
                order.customer_id,
                order.customer_name,
                order.note,
                order.total_amount,
                order.state.as_i32(),
                order.flag.as_i32(),
                order.viewed as i32,
                order.updated_at,
            ],
        )?;

        Ok(())
    }

    /// 根据 id 获取订单（包含临时/草稿/已删除行）
    pub fn get(&self, id: i64) -> Result<Option<Order>> {
        let sql = "SELECT * FROM orders WHERE id = ?1";
        let mut stmt = self.conn.prepare(sql)?;
        Ok(stmt
            .query_row(params![id], |row| Self::row_to_order(row))
            .optional()?)
    }

    /// 默认列表：活动订单，按更新时间倒序
    pub fn list_active(&self) -> Result<Vec<Order>> {
        let sql = format!(
            "SELECT * FROM orders WHERE {} ORDER BY updated_at DESC",
            DEFAULT_LIST_FILTER
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| Self::row_to_order(row))?;

        let mut orders = Vec::new();
        for row in rows {
            orders.push(row?);
        }
        Ok(orders)
    }

    /// 临时 / 草稿订单列表（仅专门视图可见）
    pub fn list_transient(&self) -> Result<Vec<Order>> {
        let sql = "SELECT * FROM orders WHERE flag IN (2, 3) ORDER BY updated_at DESC";
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| Self::row_to_order(row))?;

        let mut orders = Vec::new();
        for row in rows {
            orders.push(row?);
        }
        Ok(orders)
    }

    /// 更新工作流状态（合法性校验由调用方负责）
    pub fn set_state(&self, id: i64, state: OrderState, updated_at: i64) -> Result<usize> {
        let sql = "UPDATE orders SET state = ?1, updated_at = ?2 WHERE id = ?3";
        Ok(self
            .conn
            .execute(sql, params![state.as_i32(), updated_at, id])?)
    }

    /// 更新活动标记（软删除也走这里，行永不物理删除）
    pub fn set_flag(&self, id: i64, flag: ActivityFlag, updated_at: i64) -> Result<usize> {
        let sql = "UPDATE orders SET flag = ?1, updated_at = ?2 WHERE id = ?3";
        Ok(self
            .conn
            .execute(sql, params![flag.as_i32(), updated_at, id])?)
    }

    /// 标记为已查看（未读角标消除）
    pub fn mark_viewed(&self, id: i64) -> Result<()> {
        self.conn
            .execute("UPDATE orders SET viewed = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// 未查看的活动订单数
    pub fn unviewed_count(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM orders WHERE viewed = 0 AND flag = 1";
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count)
    }

    /// 将本地占位 id 换成服务端 id，同时激活该行
    ///
    /// 行上挂的订单行由 OrderLineDao::rekey_order 在同一事务内重新键控。
    pub fn rekey(&self, temp_id: i64, server_id: i64, updated_at: i64) -> Result<usize> {
        let sql = "UPDATE orders SET id = ?1, flag = 1, updated_at = ?2 WHERE id = ?3";
        Ok(self
            .conn
            .execute(sql, params![server_id, updated_at, temp_id])?)
    }

    fn row_to_order(row: &Row) -> rusqlite::Result<Order> {
        Ok(Order {
            id: row.get("id")?,
            customer_id: row.get("customer_id")?,
            customer_name: row.get("customer_name")?,
            note: row.get("note")?,
            total_amount: row.get("total_amount")?,
            state: order_state_from_sql(row.get("state")?)?,
            flag: flag_from_sql(row.get("flag")?)?,
            viewed: row.get::<_, i32>("viewed")? != 0,
            updated_at: row.get("updated_at")?,
        })
    }
}
