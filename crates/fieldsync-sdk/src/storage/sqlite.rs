//! SQLite 存储模块 - 本地副本数据库
//!
//! 本模块提供：
//! - 副本数据库的打开与 PRAGMA 优化
//! - 每个实体种类一张表的建表逻辑
//! - 同步数据唯一的写入路径是 INSERT OR REPLACE（幂等）

use std::path::Path;

use rusqlite::Connection;

use crate::error::{FieldSyncError, Result};

/// 副本数据库组件
pub struct ReplicaDb;

impl ReplicaDb {
    /// 打开（必要时创建）副本数据库并建表
    pub fn open(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path)
            .map_err(|e| FieldSyncError::Database(format!("打开数据库失败: {}", e)))?;

        // 启用 WAL 模式和其他优化
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| FieldSyncError::Database(format!("设置 WAL 模式失败: {}", e)))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|e| FieldSyncError::Database(format!("设置同步模式失败: {}", e)))?;
        conn.pragma_update(None, "cache_size", "-16000") // 16MB 缓存
            .map_err(|e| FieldSyncError::Database(format!("设置缓存大小失败: {}", e)))?;

        Self::create_tables(&conn)?;

        Ok(conn)
    }

    /// 创建数据库表
    pub fn create_tables(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS orders (
                id INTEGER PRIMARY KEY,
                customer_id INTEGER NOT NULL DEFAULT 0,
                customer_name TEXT NOT NULL DEFAULT '',
                note TEXT NOT NULL DEFAULT '',
                total_amount REAL NOT NULL DEFAULT 0,
                state INTEGER NOT NULL DEFAULT 0,
                flag INTEGER NOT NULL DEFAULT 1,
                viewed INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS order_lines (
                id INTEGER PRIMARY KEY,
                order_id INTEGER NOT NULL,
                product_id INTEGER NOT NULL DEFAULT 0,
                product_name TEXT NOT NULL DEFAULT '',
                quantity REAL NOT NULL DEFAULT 0,
                unit_price REAL NOT NULL DEFAULT 0,
                status INTEGER NOT NULL DEFAULT 0,
                flag INTEGER NOT NULL DEFAULT 1,
                viewed INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_order_lines_order ON order_lines (order_id);
            CREATE TABLE IF NOT EXISTS oos_masters (
                id INTEGER PRIMARY KEY,
                customer_id INTEGER NOT NULL DEFAULT 0,
                customer_name TEXT NOT NULL DEFAULT '',
                note TEXT NOT NULL DEFAULT '',
                flag INTEGER NOT NULL DEFAULT 1,
                viewed INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS oos_subs (
                id INTEGER PRIMARY KEY,
                master_id INTEGER NOT NULL,
                product_id INTEGER NOT NULL DEFAULT 0,
                product_name TEXT NOT NULL DEFAULT '',
                quantity REAL NOT NULL DEFAULT 0,
                status INTEGER NOT NULL DEFAULT 0,
                flag INTEGER NOT NULL DEFAULT 1,
                viewed INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_oos_subs_master ON oos_subs (master_id);
            CREATE TABLE IF NOT EXISTS packing_counters (
                line_id INTEGER PRIMARY KEY,
                packed_qty REAL NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS order_overlays (
                id INTEGER PRIMARY KEY,
                customer_id INTEGER NOT NULL DEFAULT 0,
                customer_name TEXT NOT NULL DEFAULT '',
                note TEXT NOT NULL DEFAULT '',
                total_amount REAL NOT NULL DEFAULT 0,
                state INTEGER NOT NULL DEFAULT 0,
                flag INTEGER NOT NULL DEFAULT 1,
                viewed INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL DEFAULT 0
            );",
        )
        .map_err(|e| FieldSyncError::Database(format!("创建数据库表失败: {}", e)))?;

        Ok(())
    }
}
