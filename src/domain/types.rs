// ==========================================
// CAMA 导入引擎 - 领域类型定义
// ==========================================
// 职责: 厂商 / 分隔符 / 决策状态 / 熔断状态等基础枚举
// 红线: 纯类型，不含 IO
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ==========================================
// 厂商类型 (Vendor Kind)
// ==========================================
// Microsystems: 管道分隔 .txt
// BRT: CSV / TAB 分隔
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VendorKind {
    Microsystems,
    Brt,
}

impl VendorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorKind::Microsystems => "MICROSYSTEMS",
            VendorKind::Brt => "BRT",
        }
    }
}

impl fmt::Display for VendorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VendorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MICROSYSTEMS" => Ok(VendorKind::Microsystems),
            "BRT" => Ok(VendorKind::Brt),
            other => Err(format!("未知厂商: {}", other)),
        }
    }
}

// ==========================================
// 分隔符 (Delimiter)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Delimiter {
    Pipe,
    Comma,
    Tab,
}

impl Delimiter {
    pub fn as_byte(&self) -> u8 {
        match self {
            Delimiter::Pipe => b'|',
            Delimiter::Comma => b',',
            Delimiter::Tab => b'\t',
        }
    }

    /// 管道格式不做引号处理（源系统原样输出）
    pub fn uses_quoting(&self) -> bool {
        !matches!(self, Delimiter::Pipe)
    }
}

impl fmt::Display for Delimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delimiter::Pipe => write!(f, "PIPE"),
            Delimiter::Comma => write!(f, "COMMA"),
            Delimiter::Tab => write!(f, "TAB"),
        }
    }
}

// ==========================================
// 售价变更决策 (Sale Decision)
// ==========================================
// 序列化格式: snake_case (与审计表一致)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleDecision {
    Pending,  // 待人工审核
    KeepOld,  // 保留原售价
    UseNew,   // 采用新售价
    KeepBoth, // 两者都保留（新售价仅进入历史）
}

impl SaleDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleDecision::Pending => "pending",
            SaleDecision::KeepOld => "keep_old",
            SaleDecision::UseNew => "use_new",
            SaleDecision::KeepBoth => "keep_both",
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, SaleDecision::Pending)
    }
}

impl fmt::Display for SaleDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SaleDecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "pending" => Ok(SaleDecision::Pending),
            "keep_old" => Ok(SaleDecision::KeepOld),
            "use_new" => Ok(SaleDecision::UseNew),
            "keep_both" => Ok(SaleDecision::KeepBoth),
            other => Err(format!("未知售价决策: {}", other)),
        }
    }
}

// ==========================================
// 熔断器状态 (Breaker State)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerState::Closed => write!(f, "CLOSED"),
            BreakerState::Open => write!(f, "OPEN"),
            BreakerState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

// ==========================================
// 失败分类 (Failure Kind)
// ==========================================
// 超时单独计数，连续超时更快触发熔断
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    Timeout,
    Other,
}

// ==========================================
// 信息来源分类 (Info Source Category)
// ==========================================
// 来源: 代码表中 INFO BY 描述的关键字
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoSourceCategory {
    Entry,      // 入户（业主/配偶/租户/代理人）
    Refusal,    // 拒绝
    Estimation, // 估算
    Invalid,    // 无效（敲门未应）
    Priced,     // 已定价
}
