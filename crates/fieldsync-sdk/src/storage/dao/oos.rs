//! 缺货数据访问层 - 主事件与子行
//!
//! 子行允许先于主事件到达：孤儿行保留在表内，联结视图查不到它，
//! 待主行同步到达后联结自然补全，不需要延迟应用队列。

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::storage::dao::{flag_from_sql, line_status_from_sql, DEFAULT_LIST_FILTER};
use crate::storage::entities::{OosMaster, OosSub, OosSubJoined};
use crate::storage::workflow::{ActivityFlag, LineStatus};

/// 缺货主事件数据访问对象
pub struct OosMasterDao<'a> {
    conn: &'a Connection,
}

impl<'a> OosMasterDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn upsert(&self, master: &OosMaster) -> Result<()> {
        let sql = "INSERT OR REPLACE INTO oos_masters (
            id, customer_id, customer_name, note, flag, viewed, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

        self.conn.execute(
            sql,
            params![
                master.id,
                master.customer_id,
                master.customer_name,
                master.note,
                master.flag.as_i32(),
                master.viewed as i32,
                master.updated_at,
            ],
        )?;

        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<OosMaster>> {
        let mut stmt = self.conn.prepare("SELECT * FROM oos_masters WHERE id = ?1")?;
        Ok(stmt
            .query_row(params![id], |row| Self::row_to_master(row))
            .optional()?)
    }

    pub fn list_active(&self) -> Result<Vec<OosMaster>> {
        let sql = format!(
            "SELECT * FROM oos_masters WHERE {} ORDER BY updated_at DESC",
            DEFAULT_LIST_FILTER
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| Self::row_to_master(row))?;

        let mut masters = Vec::new();
        for row in rows {
            masters.push(row?);
        }
        Ok(masters)
    }

    pub fn mark_viewed(&self, id: i64) -> Result<()> {
        self.conn
            .execute("UPDATE oos_masters SET viewed = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn unviewed_count(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM oos_masters WHERE viewed = 0 AND flag = 1";
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count)
    }

    /// 将本地占位 id 换成服务端 id，同时激活该行
    pub fn rekey(&self, temp_id: i64, server_id: i64, updated_at: i64) -> Result<usize> {
        let sql = "UPDATE oos_masters SET id = ?1, flag = 1, updated_at = ?2 WHERE id = ?3";
        Ok(self
            .conn
            .execute(sql, params![server_id, updated_at, temp_id])?)
    }

    fn row_to_master(row: &Row) -> rusqlite::Result<OosMaster> {
        Ok(OosMaster {
            id: row.get("id")?,
            customer_id: row.get("customer_id")?,
            customer_name: row.get("customer_name")?,
            note: row.get("note")?,
            flag: flag_from_sql(row.get("flag")?)?,
            viewed: row.get::<_, i32>("viewed")? != 0,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// 缺货子行数据访问对象
pub struct OosSubDao<'a> {
    conn: &'a Connection,
}

impl<'a> OosSubDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn upsert(&self, sub: &OosSub) -> Result<()> {
        let sql = "INSERT OR REPLACE INTO oos_subs (
            id, master_id, product_id, product_name, quantity,
            status, flag, viewed, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

        self.conn.execute(
            sql,
            params![
                sub.id,
                sub.master_id,
                sub.product_id,
                sub.product_name,
                sub.quantity,
                sub.status.as_i32(),
                sub.flag.as_i32(),
                sub.viewed as i32,
                sub.updated_at,
            ],
        )?;

        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<OosSub>> {
        let mut stmt = self.conn.prepare("SELECT * FROM oos_subs WHERE id = ?1")?;
        Ok(stmt
            .query_row(params![id], |row| Self::row_to_sub(row))
            .optional()?)
    }

    pub fn list_for_master(&self, master_id: i64) -> Result<Vec<OosSub>> {
        let sql = format!(
            "SELECT * FROM oos_subs WHERE master_id = ?1 AND {} ORDER BY id",
            DEFAULT_LIST_FILTER
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![master_id], |row| Self::row_to_sub(row))?;

        let mut subs = Vec::new();
        for row in rows {
            subs.push(row?);
        }
        Ok(subs)
    }

    /// 联结视图：只返回主事件已到达的子行，孤儿行在主行到达前不可见
    pub fn list_joined(&self) -> Result<Vec<OosSubJoined>> {
        let sql = "SELECT s.*, m.customer_name AS master_customer_name
                   FROM oos_subs s
                   JOIN oos_masters m ON m.id = s.master_id
                   WHERE s.flag > 0 AND s.flag NOT IN (2, 3)
                     AND m.flag > 0 AND m.flag NOT IN (2, 3)
                   ORDER BY s.updated_at DESC";
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(OosSubJoined {
                sub: Self::row_to_sub(row)?,
                master_customer_name: row.get("master_customer_name")?,
            })
        })?;

        let mut joined = Vec::new();
        for row in rows {
            joined.push(row?);
        }
        Ok(joined)
    }

    pub fn set_status(&self, id: i64, status: LineStatus, updated_at: i64) -> Result<usize> {
        let sql = "UPDATE oos_subs SET status = ?1, updated_at = ?2 WHERE id = ?3";
        Ok(self
            .conn
            .execute(sql, params![status.as_i32(), updated_at, id])?)
    }

    pub fn mark_viewed(&self, id: i64) -> Result<()> {
        self.conn
            .execute("UPDATE oos_subs SET viewed = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn unviewed_count(&self) -> Result<i64> {
        let sql = "SELECT COUNT(*) FROM oos_subs WHERE viewed = 0 AND flag = 1";
        let count: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(count)
    }

    /// 主事件促升后将子行重新键控到服务端主事件 id
    pub fn rekey_master(&self, temp_master_id: i64, server_master_id: i64) -> Result<usize> {
        let sql = "UPDATE oos_subs SET master_id = ?1 WHERE master_id = ?2";
        Ok(self
            .conn
            .execute(sql, params![server_master_id, temp_master_id])?)
    }

    /// 删除仍挂在占位 id 上的临时子行（服务端级联返回权威行时调用）
    pub fn delete_placeholder_subs(&self, master_id: i64) -> Result<usize> {
        let sql = "DELETE FROM oos_subs WHERE master_id = ?1 AND id < 0";
        Ok(self.conn.execute(sql, params![master_id])?)
    }

    fn row_to_sub(row: &Row) -> rusqlite::Result<OosSub> {
        Ok(OosSub {
            id: row.get("id")?,
            master_id: row.get("master_id")?,
            product_id: row.get("product_id")?,
            product_name: row.get("product_name")?,
            quantity: row.get("quantity")?,
            status: line_status_from_sql(row.get("status")?)?,
            flag: flag_from_sql(row.get("flag")?)?,
            viewed: row.get::<_, i32>("viewed")? != 0,
            updated_at: row.get("updated_at")?,
        })
    }
}
