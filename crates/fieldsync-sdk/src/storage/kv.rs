//! KV 存储模块 - 基于 sled 的持久化键值存储
//!
//! 承载需要跨进程重启存活的同步状态：
//! - 每个实体种类的同步水位（watermark）
//! - 待重放的推送通知列表
//! - 本地占位 id / 待处理序号等原子计数器

use std::path::Path;

use serde::{Deserialize, Serialize};
use sled::Db;

use crate::error::{FieldSyncError, Result};

/// KV 存储组件
#[derive(Debug)]
pub struct KvStore {
    db: Db,
}

impl KvStore {
    /// 创建新的 KV 存储实例
    pub async fn new(base_path: &Path) -> Result<Self> {
        let kv_path = base_path.join("kv");

        tokio::fs::create_dir_all(&kv_path)
            .await
            .map_err(|e| FieldSyncError::Io(format!("创建 KV 存储目录失败: {}", e)))?;

        // 打开 sled 数据库（进程重启后旧实例可能刚释放锁，重试多次带退避）
        const MAX_OPEN_RETRIES: u32 = 8;
        const RETRY_DELAY_MS: u64 = 300;
        let mut db_opt: Option<Db> = None;
        let mut last_err: Option<sled::Error> = None;
        for attempt in 0..MAX_OPEN_RETRIES {
            match sled::open(&kv_path) {
                Ok(d) => {
                    db_opt = Some(d);
                    break;
                }
                Err(e) => {
                    let msg = format!("{}", e);
                    last_err = Some(e);
                    let is_lock = msg.contains("could not acquire lock")
                        || msg.contains("Resource temporarily unavailable")
                        || msg.contains("WouldBlock");
                    if is_lock && attempt + 1 < MAX_OPEN_RETRIES {
                        let delay_ms = RETRY_DELAY_MS * (1 << attempt);
                        tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
                    } else {
                        break;
                    }
                }
            }
        }
        let db = db_opt.ok_or_else(|| {
            FieldSyncError::KvStore(
                last_err
                    .map(|e| format!("打开 sled 数据库失败: {}", e))
                    .unwrap_or_else(|| "打开 sled 数据库失败".to_string()),
            )
        })?;

        Ok(Self { db })
    }

    /// 设置键值对
    pub async fn set<K, V>(&self, key: K, value: &V) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: Serialize,
    {
        let value_bytes = serde_json::to_vec(value)
            .map_err(|e| FieldSyncError::Serialization(format!("序列化值失败: {}", e)))?;

        self.db
            .insert(key, value_bytes)
            .map_err(|e| FieldSyncError::KvStore(format!("设置键值对失败: {}", e)))?;

        Ok(())
    }

    /// 获取键值对
    pub async fn get<K, V>(&self, key: K) -> Result<Option<V>>
    where
        K: AsRef<[u8]>,
        V: for<'de> Deserialize<'de>,
    {
        let result = self
            .db
            .get(key)
            .map_err(|e| FieldSyncError::KvStore(format!("获取键值对失败: {}", e)))?;

        match result {
            Some(value_bytes) => {
                let value = serde_json::from_slice(&value_bytes)
                    .map_err(|e| FieldSyncError::Serialization(format!("反序列化值失败: {}", e)))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// 删除键值对
    pub async fn delete<K>(&self, key: K) -> Result<Option<Vec<u8>>>
    where
        K: AsRef<[u8]>,
    {
        let result = self
            .db
            .remove(key)
            .map_err(|e| FieldSyncError::KvStore(format!("删除键值对失败: {}", e)))?;

        Ok(result.map(|v| v.to_vec()))
    }

    /// 检查键是否存在
    pub async fn exists<K>(&self, key: K) -> Result<bool>
    where
        K: AsRef<[u8]>,
    {
        let result = self
            .db
            .contains_key(key)
            .map_err(|e| FieldSyncError::KvStore(format!("检查键存在失败: {}", e)))?;

        Ok(result)
    }

    /// 获取指定前缀的所有键值对
    pub async fn scan_prefix<V>(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, V)>>
    where
        V: for<'de> Deserialize<'de>,
    {
        let mut results = Vec::new();

        for result in self.db.scan_prefix(prefix) {
            let (key, value_bytes) =
                result.map_err(|e| FieldSyncError::KvStore(format!("扫描前缀失败: {}", e)))?;

            let value = serde_json::from_slice(&value_bytes)
                .map_err(|e| FieldSyncError::Serialization(format!("反序列化值失败: {}", e)))?;

            results.push((key.to_vec(), value));
        }

        Ok(results)
    }

    /// 原子性增加计数器
    pub async fn increment_counter(&self, key: &str, delta: i64) -> Result<i64> {
        loop {
            let (current_value, current_bytes) = match self
                .db
                .get(key)
                .map_err(|e| FieldSyncError::KvStore(format!("获取计数器失败: {}", e)))?
            {
                Some(bytes) => {
                    let value_str = std::str::from_utf8(&bytes)
                        .map_err(|e| FieldSyncError::KvStore(format!("计数器值格式错误: {}", e)))?;
                    let value = value_str
                        .parse::<i64>()
                        .map_err(|e| FieldSyncError::KvStore(format!("计数器值解析失败: {}", e)))?;
                    (value, Some(bytes))
                }
                None => (0, None),
            };

            let new_value = current_value + delta;
            let new_value_bytes = new_value.to_string().into_bytes();

            // 使用 compare_and_swap 实现原子性
            let result = self
                .db
                .compare_and_swap(key, current_bytes, Some(new_value_bytes))
                .map_err(|e| FieldSyncError::KvStore(format!("原子增加失败: {}", e)))?;

            match result {
                Ok(_) => return Ok(new_value),
                Err(_) => {
                    // CAS 失败则重试
                    tokio::time::sleep(tokio::time::Duration::from_millis(1)).await;
                    continue;
                }
            }
        }
    }
}

/// 常用的键前缀常量
pub mod keys {
    /// 同步水位前缀
    pub const WATERMARK: &str = "sync_watermark:";
    /// 待重放推送通知前缀
    pub const PENDING_PUSH: &str = "pending_push:";
    /// 本地占位 id 计数器
    pub const COUNTER_LOCAL_ID: &str = "counter_local_id";
    /// 待处理通知序号计数器
    pub const COUNTER_PENDING_SEQ: &str = "counter_pending_seq";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_kv_store_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::new(temp_dir.path()).await.unwrap();

        let test_data = json!({
            "name": "test",
            "value": 123
        });

        store.set("test_key", &test_data).await.unwrap();
        let retrieved: serde_json::Value = store.get("test_key").await.unwrap().unwrap();
        assert_eq!(retrieved, test_data);

        assert!(store.exists("test_key").await.unwrap());
        assert!(!store.exists("non_existent_key").await.unwrap());

        store.delete("test_key").await.unwrap();
        let deleted: Option<serde_json::Value> = store.get("test_key").await.unwrap();
        assert!(deleted.is_none());
    }

    #[tokio::test]
    async fn test_kv_store_scan_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::new(temp_dir.path()).await.unwrap();

        for i in 1..=3 {
            store
                .set(format!("key{}", i), &json!({ "value": i }))
                .await
                .unwrap();
        }
        store.set("other", &json!({ "value": 0 })).await.unwrap();

        let results: Vec<(Vec<u8>, serde_json::Value)> = store.scan_prefix(b"key").await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_kv_store_counter() {
        let temp_dir = TempDir::new().unwrap();
        let store = KvStore::new(temp_dir.path()).await.unwrap();

        let counter_key = "test_counter";

        let result1 = store.increment_counter(counter_key, 5).await.unwrap();
        assert_eq!(result1, 5);

        let result2 = store.increment_counter(counter_key, 3).await.unwrap();
        assert_eq!(result2, 8);

        let result3 = store.increment_counter(counter_key, -2).await.unwrap();
        assert_eq!(result3, 6);
    }
}
