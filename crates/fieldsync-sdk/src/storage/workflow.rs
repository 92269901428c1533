//! 工作流状态机 - 订单审批流与缺货行状态
//!
//! 两套状态机决定行在各视图中的可见性与合法操作：
//! - `OrderState`：订单审批流（含可选的复核分支）
//! - `LineStatus`：订单行 / 缺货行状态
//! - `ActivityFlag`：行活动标记（与工作流状态正交）

use serde::{Deserialize, Serialize};

/// 订单审批状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    New,
    SentToStorekeeper,
    VerifiedByStorekeeper,
    Completed,
    Rejected,
    Cancelled,
    SentToChecker,
    CheckerIsChecking,
}

impl OrderState {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::New => 0,
            Self::SentToStorekeeper => 1,
            Self::VerifiedByStorekeeper => 2,
            Self::Completed => 3,
            Self::Rejected => 4,
            Self::Cancelled => 5,
            Self::SentToChecker => 6,
            Self::CheckerIsChecking => 7,
        }
    }

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::New),
            1 => Some(Self::SentToStorekeeper),
            2 => Some(Self::VerifiedByStorekeeper),
            3 => Some(Self::Completed),
            4 => Some(Self::Rejected),
            5 => Some(Self::Cancelled),
            6 => Some(Self::SentToChecker),
            7 => Some(Self::CheckerIsChecking),
            _ => None,
        }
    }

    /// 终态：completed / rejected / cancelled
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Cancelled)
    }

    /// 已审批状态：此后编辑必须走影子行（overlay），不允许原地改已提交行
    pub fn is_approved(self) -> bool {
        matches!(
            self,
            Self::VerifiedByStorekeeper | Self::SentToChecker | Self::CheckerIsChecking
        )
    }

    /// 检查是否可以从当前状态迁移到目标状态
    pub fn can_transition_to(self, target: OrderState) -> bool {
        // cancelled 可从任意非终态进入
        if target == Self::Cancelled {
            return !self.is_terminal();
        }
        match (self, target) {
            (Self::New, Self::SentToStorekeeper) => true,
            (Self::SentToStorekeeper, Self::VerifiedByStorekeeper) => true,
            (Self::VerifiedByStorekeeper, Self::Completed) => true,
            (Self::VerifiedByStorekeeper, Self::Rejected) => true,
            // 需要复核时在验证与完成之间插入复核分支
            (Self::VerifiedByStorekeeper, Self::SentToChecker) => true,
            (Self::SentToChecker, Self::CheckerIsChecking) => true,
            (Self::CheckerIsChecking, Self::Completed) => true,
            (Self::CheckerIsChecking, Self::Rejected) => true,
            _ => false,
        }
    }
}

/// 订单行 / 缺货行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LineStatus {
    New,
    NotChecked,
    InStock,
    OutOfStock,
    Reported,
    NotAvailable,
    Cancelled,
    Replaced,
}

impl LineStatus {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::New => 0,
            Self::NotChecked => 1,
            Self::InStock => 2,
            Self::OutOfStock => 3,
            Self::Reported => 4,
            Self::NotAvailable => 5,
            Self::Cancelled => 6,
            Self::Replaced => 7,
        }
    }

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::New),
            1 => Some(Self::NotChecked),
            2 => Some(Self::InStock),
            3 => Some(Self::OutOfStock),
            4 => Some(Self::Reported),
            5 => Some(Self::NotAvailable),
            6 => Some(Self::Cancelled),
            7 => Some(Self::Replaced),
            _ => None,
        }
    }

    /// 检查是否可以从当前状态迁移到目标状态
    ///
    /// cancelled 的行不允许再迁移。
    pub fn can_transition_to(self, target: LineStatus) -> bool {
        if self == Self::Cancelled {
            return false;
        }
        // notAvailable / cancelled / replaced 可按需从任意非 cancelled 状态进入
        if matches!(target, Self::NotAvailable | Self::Cancelled | Self::Replaced) {
            return true;
        }
        match (self, target) {
            (Self::New, Self::NotChecked) => true,
            (Self::NotChecked, Self::InStock) => true,
            (Self::NotChecked, Self::OutOfStock) => true,
            (Self::OutOfStock, Self::Reported) => true,
            _ => false,
        }
    }
}

/// 行活动标记（软删除 / 活动 / 临时 / 草稿），与工作流状态正交
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityFlag {
    Deleted,
    Active,
    Temp,
    Draft,
}

impl ActivityFlag {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Deleted => 0,
            Self::Active => 1,
            Self::Temp => 2,
            Self::Draft => 3,
        }
    }

    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(Self::Deleted),
            1 => Some(Self::Active),
            2 => Some(Self::Temp),
            3 => Some(Self::Draft),
            _ => None,
        }
    }

    /// 临时 / 草稿行不出现在默认列表查询中
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Temp | Self::Draft)
    }
}
