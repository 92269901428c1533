//! 同步水位存储
//!
//! 键格式：sync_watermark:{entity_kind}
//!
//! 水位取服务端时间域的 updated_at 最大值（拉取过滤 updated_since
//! 在服务端时间域比较），必须跨进程重启存活以保证幂等。

use std::sync::Arc;

use crate::error::Result;
use crate::storage::kv::{keys, KvStore};

use super::EntityKind;

/// 存储每个实体种类的同步水位（毫秒）
#[derive(Clone)]
pub struct WatermarkStore {
    kv: Arc<KvStore>,
}

impl WatermarkStore {
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }

    fn key(kind: EntityKind) -> String {
        format!("{}{}", keys::WATERMARK, kind.as_str())
    }

    pub async fn get(&self, kind: EntityKind) -> Result<Option<i64>> {
        let key = Self::key(kind);
        self.kv.get::<&str, i64>(key.as_str()).await
    }

    pub async fn set(&self, kind: EntityKind, watermark: i64) -> Result<()> {
        let key = Self::key(kind);
        self.kv.set(key.as_str(), &watermark).await
    }
}
