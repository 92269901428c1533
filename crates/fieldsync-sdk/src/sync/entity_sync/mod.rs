//! 实体同步 - 按实体种类的分页拉取 / 推送与落库
//!
//! 统一走 RemoteEndpoint 分页协议 + 水位 + 应用器，所有种类共享
//! 一份 upsert 实现（没有各调用点各写一套 SQL 的回头路）。

pub mod applier;
pub mod channel;
pub mod entity_kind;
pub mod watermark_store;

pub use channel::EntitySyncChannel;
pub use entity_kind::EntityKind;
pub use watermark_store::WatermarkStore;

/// 参与批量同步的数据种类（logout 是伪种类，不在其中）
pub const SYNC_KINDS: [EntityKind; 5] = [
    EntityKind::Order,
    EntityKind::OrderLine,
    EntityKind::OosMaster,
    EntityKind::OosSub,
    EntityKind::Packing,
];
