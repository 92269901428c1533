//! 实体种类枚举 - 推送载荷中的受控小整数编码
//!
//! kind 编码为受控枚举，新增需客户端与服务端同步升级。
//! 编码 1 是伪种类：远端强制登出，不对应任何数据表。

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// 同步实体种类（与推送载荷 data_ids 的 kind 编码一致）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Order,
    OrderLine,
    OosMaster,
    OosSub,
    Packing,
    Logout,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::OrderLine => "order_line",
            Self::OosMaster => "oos_master",
            Self::OosSub => "oos_sub",
            Self::Packing => "packing",
            Self::Logout => "logout",
        }
    }

    /// 推送载荷里的整数编码
    pub fn code(self) -> i32 {
        match self {
            Self::Logout => 1,
            Self::Order => 8,
            Self::OrderLine => 9,
            Self::OosMaster => 10,
            Self::OosSub => 11,
            Self::Packing => 12,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(Self::Logout),
            8 => Some(Self::Order),
            9 => Some(Self::OrderLine),
            10 => Some(Self::OosMaster),
            11 => Some(Self::OosSub),
            12 => Some(Self::Packing),
            _ => None,
        }
    }

    /// 是否为数据种类（可被拉取落库）
    pub fn is_data(self) -> bool {
        !matches!(self, Self::Logout)
    }

    /// 同一批通知内的派发次序：主实体先于子实体，避免瞬时孤儿
    pub fn dispatch_rank(self) -> u8 {
        match self {
            Self::Order | Self::OosMaster => 0,
            _ => 1,
        }
    }

    /// 是否有未读角标语义
    pub fn has_unviewed_badge(self) -> bool {
        matches!(
            self,
            Self::Order | Self::OrderLine | Self::OosMaster | Self::OosSub
        )
    }
}

impl FromStr for EntityKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order" => Ok(Self::Order),
            "order_line" => Ok(Self::OrderLine),
            "oos_master" => Ok(Self::OosMaster),
            "oos_sub" => Ok(Self::OosSub),
            "packing" => Ok(Self::Packing),
            "logout" => Ok(Self::Logout),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn code_roundtrip() {
        for kind in [
            EntityKind::Order,
            EntityKind::OrderLine,
            EntityKind::OosMaster,
            EntityKind::OosSub,
            EntityKind::Packing,
            EntityKind::Logout,
        ] {
            assert_eq!(EntityKind::from_code(kind.code()), Some(kind));
        }
        assert!(EntityKind::from_code(42).is_none());
    }

    #[test]
    fn as_str_and_from_str() {
        assert_eq!(EntityKind::Order.as_str(), "order");
        assert_eq!(EntityKind::from_str("oos_sub").unwrap(), EntityKind::OosSub);
        assert!(EntityKind::from_str("unknown").is_err());
    }

    #[test]
    fn masters_dispatch_before_subs() {
        assert!(EntityKind::Order.dispatch_rank() < EntityKind::OrderLine.dispatch_rank());
        assert!(EntityKind::OosMaster.dispatch_rank() < EntityKind::OosSub.dispatch_rank());
    }

    #[test]
    fn logout_is_not_data() {
        assert!(!EntityKind::Logout.is_data());
        assert!(EntityKind::Packing.is_data());
    }
}
