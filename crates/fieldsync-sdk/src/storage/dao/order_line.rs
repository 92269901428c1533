//! 订单行数据访问层

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::storage::dao::{flag_from_sql, line_status_from_sql, DEFAULT_LIST_FILTER};
use crate::storage::entities::OrderLine;
use crate::storage::workflow::{ActivityFlag, LineStatus};

/// 订单行数据访问对象
pub struct OrderLineDao<'a> {
    conn: &'a Connection,
}

impl<'a> OrderLineDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// 插入或更新订单行
    pub fn upsert(&self, line: &OrderLine) -> Result<()> {
        let sql = "INSERT OR REPLACE INTO order_lines (
            id, order_id, product_id, product_name, quantity, unit_price,
            status, flag, viewed, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

        self.conn.execute(
            sql,
            params![
                line.id,
                line.order_id,
                line.product_id,
                line.product_name,
                line.quantity,
                line.unit_price,
                line.status.as_i32(),
                line.flag.as_i32(),
                line.viewed as i32,
                line.updated_at,
            ],
        )?;

        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<OrderLine>> {
        let mut stmt = self.conn.prepare("SELECT * FROM order_lines WHERE id = ?1")?;
        Ok(stmt
            .query_row(params![id], |row| Self::row_to_line(row))
            .optional()?)
    }

    /// 某订单下的可见行
    pub fn list_for_order(&self, order_id: i64) -> Result<Vec<OrderLine>> {
        let sql = format!(
            "SELECT * FROM order_lines WHERE order_id = ?1 AND {} ORDER BY id",
            DEFAULT_LIST_FILTER
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![order_id], |row| Self::row_to_line(row))?;

        let mut lines = Vec::new();
        for row in rows {
            lines.push(row?);
        }
        Ok(lines)
    }

    /// 某订单下的全部行（含临时/已删除，促升与级联用）
    pub fn list_all_for_order(&self, order_id: i64) -> Result<Vec<OrderLine>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM order_lines WHERE order_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![order_id], |row| Self::row_to_line(row))?;

        let mut lines = Vec::new();
        for row in rows {
            lines.push(row?);
        }
        Ok(lines)
    }

    pub fn set_status(&self, id: i64, status: LineStatus, updated_at: i64) -> Result<usize> {
        let sql = "UPDATE order_lines SET status = ?1, updated_at = ?2 WHERE id = ?3";
        Ok(self
            .conn
            .execute(sql, params![status.as_i32(), updated_at, id])?)
    }

    /// 订单进入终态时对所有挂属行做标记级联
    pub fn cascade_flag(&self, order_id: i64, flag: ActivityFlag, updated_at: i64) -> Result<usize> {
        let sql = "UPDATE order_lines SET flag = ?1, updated_at = ?2 WHERE order_id = ?3";
        Ok(self
            .conn
            .execute(sql, params![flag.as_i32(), updated_at, order_id])?)
    }

    /// 订单促升后将挂属行重新键控到服务端订单 id
    pub fn rekey_order(&self, temp_order_id: i64, server_order_id: i64) -> Result<usize> {
        let sql = "UPDATE order_lines SET order_id = ?1 WHERE order_id = ?2";
        Ok(self
            .conn
            .execute(sql, params![server_order_id, temp_order_id])?)
    }

    /// 删除仍挂在占位 id 上的临时行（服务端级联返回权威行时调用）
    pub fn delete_placeholder_lines(&self, order_id: i64) -> Result<usize> {
        let sql = "DELETE FROM order_lines WHERE order_id = ?1 AND id < 0";
        Ok(self.conn.execute(sql, params![order_id])?)
    }

    pub fn mark_viewed(&self, id: i64) -> Result<()> {
        self.conn
            .execute("UPDATE order_lines SET viewed = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn unviewed_count(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM order_lines WHERE viewed = 0 AND flag = 1";
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count)
    }

    fn row_to_line(row: &Row) -> rusqlite::Result<OrderLine> {
        Ok(OrderLine {
            id: row.get("id")?,
            order_id: row.get("order_id")?,
            product_id: row.get("product_id")?,
            product_name: row.get("product_name")?,
            quantity: row.get("quantity")?,
            unit_price: row.get("unit_price")?,
            status: line_status_from_sql(row.get("status")?)?,
            flag: flag_from_sql(row.get("flag")?)?,
            viewed: row.get::<_, i32>("viewed")? != 0,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sqlite::ReplicaDb;
    use tempfile::TempDir;

    fn create_test_db() -> (TempDir, Connection) {
        let temp_dir = TempDir::new().unwrap();
        let conn = ReplicaDb::open(&temp_dir.path().join("test.db")).unwrap();
        (temp_dir, conn)
    }

    fn sample_line(id: i64, order_id: i64) -> OrderLine {
        OrderLine {
            id,
            order_id,
            product_id: 11,
            product_name: "矿泉水".to_string(),
            quantity: 3.0,
            unit_price: 2.5,
            status: LineStatus::New,
            flag: ActivityFlag::Active,
            viewed: false,
            updated_at: 1_000,
        }
    }

    #[test]
    fn cascade_flag_touches_all_lines() {
        let (_tmp, conn) = create_test_db();
        let dao = OrderLineDao::new(&conn);

        dao.upsert(&sample_line(1, 100)).unwrap();
        dao.upsert(&sample_line(2, 100)).unwrap();
        dao.upsert(&sample_line(3, 200)).unwrap();

        let touched = dao.cascade_flag(100, ActivityFlag::Deleted, 2_000).unwrap();
        assert_eq!(touched, 2);

        assert!(dao.list_for_order(100).unwrap().is_empty());
        assert_eq!(dao.list_for_order(200).unwrap().len(), 1);
    }

    #[test]
    fn rekey_order_moves_lines() {
        let (_tmp, conn) = create_test_db();
        let dao = OrderLineDao::new(&conn);

        dao.upsert(&sample_line(-1, -50)).unwrap();
        dao.upsert(&sample_line(-2, -50)).unwrap();

        assert_eq!(dao.rekey_order(-50, 777).unwrap(), 2);
        assert_eq!(dao.list_all_for_order(777).unwrap().len(), 2);
        assert!(dao.list_all_for_order(-50).unwrap().is_empty());
    }

    #[test]
    fn delete_placeholder_lines_keeps_server_rows() {
        let (_tmp, conn) = create_test_db();
        let dao = OrderLineDao::new(&conn);

        dao.upsert(&sample_line(-1, 777)).unwrap();
        dao.upsert(&sample_line(901, 777)).unwrap();

        assert_eq!(dao.delete_placeholder_lines(777).unwrap(), 1);
        let remaining = dao.list_all_for_order(777).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, 901);
    }
}
