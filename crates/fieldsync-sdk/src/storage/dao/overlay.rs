//! 编辑影子行数据访问层
//!
//! 影子表与订单表结构完全一致，只在订单处于已审批状态时使用：
//! 编辑累积在影子行里而不是原地改已提交行，同步被打断也不会留下半成品。

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::storage::dao::{flag_from_sql, order_state_from_sql};
use crate::storage::entities::Order;

/// 订单编辑影子行数据访问对象
pub struct OverlayDao<'a> {
    conn: &'a Connection,
}

impl<'a> OverlayDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn upsert(&self, overlay: &Order) -> Result<()> {
        let sql = "INSERT OR REPLACE INTO order_overlays (
            id, customer_id, customer_name, note, total_amount,
            state, flag, viewed, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

        self.conn.execute(
            sql,
            params![
                overlay.id,
                overlay.customer_id,
                overlay.customer_name,
                overlay.note,
                overlay.total_amount,
                overlay.state.as_i32(),
                overlay.flag.as_i32(),
                overlay.viewed as i32,
                overlay.updated_at,
            ],
        )?;

        Ok(())
    }

    pub fn get(&self, order_id: i64) -> Result<Option<Order>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM order_overlays WHERE id = ?1")?;
        Ok(stmt
            .query_row(params![order_id], |row| {
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
            })
            .optional()?)
    }

    /// 影子行合并推送成功后删除
    pub fn delete(&self, order_id: i64) -> Result<usize> {
        Ok(self
            .conn
            .execute("DELETE FROM order_overlays WHERE id = ?1", params![order_id])?)
    }

    pub fn exists(&self, order_id: i64) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM order_overlays WHERE id = ?1",
            params![order_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
