//! 拣货计数数据访问层 - 按行实体 id 键控的稀疏侧表

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::storage::entities::PackingCounter;

/// 拣货计数数据访问对象
pub struct PackingDao<'a> {
    conn: &'a Connection,
}

impl<'a> PackingDao<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// 更新某行的已拣数量（与行本身字段相互独立）
    pub fn upsert(&self, counter: &PackingCounter) -> Result<()> {
        let sql = "INSERT OR REPLACE INTO packing_counters (line_id, packed_qty, updated_at)
                   VALUES (?1, ?2, ?3)";
        self.conn.execute(
            sql,
            params![counter.line_id, counter.packed_qty, counter.updated_at],
        )?;
        Ok(())
    }

    pub fn get(&self, line_id: i64) -> Result<Option<PackingCounter>> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM packing_counters WHERE line_id = ?1")?;
        Ok(stmt
            .query_row(params![line_id], |row| {
                Ok(PackingCounter {
                    line_id: row.get("line_id")?,
                    packed_qty: row.get("packed_qty")?,
                    updated_at: row.get("updated_at")?,
                })
            })
            .optional()?)
    }
}
