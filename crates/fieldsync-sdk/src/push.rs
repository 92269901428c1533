//! 推送载荷解码 - 传输边界上的一次性强类型化
//!
//! 推送传输交付的载荷形如 `{"data_ids": [{"kind": 8, "id": 42}, ...]}`。
//! 这里一次性解码成带标签的命令：要么是一组 (种类, id) 刷新对，
//! 要么是远端强制登出。后续环节不再接触动态嵌套 map。

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::error::Result;
use crate::sync::entity_sync::EntityKind;

#[derive(Debug, Clone, Deserialize)]
struct RawPushPayload {
    data_ids: Vec<RawDataId>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawDataId {
    kind: i32,
    id: i64,
}

/// 解码后的推送命令
#[derive(Debug, Clone, PartialEq)]
pub enum PushCommand {
    /// 刷新一组实体（顺序无约束，路由器负责主先于子）
    Refresh(Vec<(EntityKind, i64)>),
    /// 远端强制登出：短路同载荷的其余处理
    ForceLogout,
}

/// 在传输边界解码推送载荷
///
/// 未识别的 kind 编码记日志后跳过，永不致命；
/// 载荷中出现登出伪种类时立即短路，不再处理其余数据对。
pub fn decode_push(raw: &Value) -> Result<PushCommand> {
    let payload: RawPushPayload = serde_json::from_value(raw.clone())?;

    let mut pairs = Vec::with_capacity(payload.data_ids.len());
    for item in &payload.data_ids {
        match EntityKind::from_code(item.kind) {
            Some(EntityKind::Logout) => {
                return Ok(PushCommand::ForceLogout);
            }
            Some(kind) => pairs.push((kind, item.id)),
            None => {
                warn!("未识别的推送种类编码，跳过: kind={} id={}", item.kind, item.id);
            }
        }
    }

    Ok(PushCommand::Refresh(pairs))
}

/// 组合去重键：载荷内全部 (kind, id) 对排序后拼接
///
/// 用于 drain 过程中同一批内的去重；无法解析的载荷退化为原文本身。
pub fn compose_dedup_key(raw: &Value) -> String {
    match serde_json::from_value::<RawPushPayload>(raw.clone()) {
        Ok(payload) => {
            let mut parts: Vec<String> = payload
                .data_ids
                .iter()
                .map(|d| format!("{}:{}", d.kind, d.id))
                .collect();
            parts.sort();
            parts.join(",")
        }
        Err(_) => raw.to_string(),
    }
}
