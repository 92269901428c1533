//! FieldSync SDK - 弱网外勤作业的同步核心
//!
//! 面向连接不可靠的外勤销售场景：销售单、库存与缺货数据缓存在本地
//! 副本，与远端存储增量对账。本 SDK 提供：
//! - 🔁 按实体种类的分页拉取 / 推送（幂等，服务端恒为权威）
//! - 📡 推送通知驱动的增量刷新：去重窗口 + 重启后持久化重放
//! - 🧭 通知路由：主实体先于子实体，登出伪种类短路
//! - 🗂 工作流状态机：订单审批流与缺货行状态，决定视图可见性
//! - 📝 影子行编辑：已审批订单的修改不碰已提交行
//! - ⚙️ 事件总线：显式注入的刷新 / 会话信号
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use serde_json::Value;
//!
//! use fieldsync_sdk::network::{PageQuery, PageResponse, RemoteEndpoint};
//! use fieldsync_sdk::{EntityKind, FieldSyncSdk, SyncConfig};
//!
//! /// 宿主应用提供的 REST 适配（超时与重试也在这一层做）
//! struct HttpEndpoint;
//!
//! #[async_trait]
//! impl RemoteEndpoint for HttpEndpoint {
//!     async fn fetch_page(
//!         &self,
//!         _kind: EntityKind,
//!         _query: &PageQuery,
//!     ) -> fieldsync_sdk::Result<PageResponse> {
//!         unimplemented!()
//!     }
//!     async fn fetch_one(
//!         &self,
//!         _kind: EntityKind,
//!         _id: i64,
//!     ) -> fieldsync_sdk::Result<Option<Value>> {
//!         unimplemented!()
//!     }
//!     async fn create(
//!         &self,
//!         _kind: EntityKind,
//!         _payload: &Value,
//!     ) -> fieldsync_sdk::Result<Value> {
//!         unimplemented!()
//!     }
//!     async fn update(
//!         &self,
//!         _kind: EntityKind,
//!         _id: i64,
//!         _payload: &Value,
//!     ) -> fieldsync_sdk::Result<Value> {
//!         unimplemented!()
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder()
//!         .data_dir("/path/to/data")
//!         .actor(2, 77)
//!         .build();
//!
//!     let sdk = FieldSyncSdk::initialize(config, Arc::new(HttpEndpoint)).await?;
//!
//!     // 标记管线就绪并重放离线期间积压的推送
//!     sdk.start().await?;
//!
//!     // 批量同步订单
//!     sdk.sync_all(EntityKind::Order).await?;
//!
//!     // 推送传输交付的载荷直接交给 SDK
//!     sdk.handle_push(&serde_json::json!({"data_ids": [{"kind": 8, "id": 42}]}))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod network;
pub mod push;
pub mod sdk;
pub mod storage;
pub mod sync;

// 重新导出核心类型，方便使用
pub use config::{SyncConfig, SyncConfigBuilder};
pub use error::{FieldSyncError, Result};
pub use events::{EventBus, RefreshFlag, SdkEvent};
pub use network::{PageQuery, PageResponse, PushFailureReason, RemoteEndpoint, RetryPolicy};
pub use push::{decode_push, PushCommand};
pub use sdk::{FieldSyncSdk, OrderDraft, OrderLineDraft};
pub use storage::{
    ActivityFlag, LineStatus, Order, OrderLine, OosMaster, OosSub, OosSubJoined, OrderState,
    PackingCounter, StorageManager,
};
pub use sync::{
    DedupWindow, DrainStats, EntityKind, EntitySyncChannel, KindLocks, NotificationRouter,
    PendingQueue, SessionGuard, WatermarkStore, SYNC_KINDS,
};

/// SDK 版本号 - 来自 Cargo.toml
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
