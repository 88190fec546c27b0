//! 规则作用域、匹配掩码与规则类型

use serde::{Deserialize, Serialize};
use std::fmt;

/// 规则作用域
///
/// 在规则 JSON 与缓存条目中以整数编码。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Scope {
    /// 不限作用域
    Global = 1,
    /// 同一分类内
    Category = 2,
    /// 同一 UTM 来源内
    UtmSource = 4,
}

impl Scope {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Global),
            2 => Some(Self::Category),
            4 => Some(Self::UtmSource),
            _ => None,
        }
    }
}

impl From<Scope> for u8 {
    fn from(scope: Scope) -> Self {
        scope.code()
    }
}

impl TryFrom<u8> for Scope {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(i64::from(code)).ok_or_else(|| format!("未知的作用域编码: {}", code))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "global"),
            Self::Category => write!(f, "category"),
            Self::UtmSource => write!(f, "utm_source"),
        }
    }
}

/// 身份属性匹配掩码
///
/// 各标志位互不重叠，规则合并时按求和累加。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchingMask(u32);

impl MatchingMask {
    /// 同一联系人 ID
    pub const EXPLICIT: Self = Self(1);
    pub const EMAIL: Self = Self(2);
    pub const PHONE: Self = Self(4);
    pub const MOBILE: Self = Self(8);
    /// address1/address2/city/state/zipcode/country
    pub const ADDRESS: Self = Self(16);

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0 && flag.0 != 0
    }

    /// 合并两条规则的掩码（求和）
    pub fn merge(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }
}

impl std::ops::BitOr for MatchingMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// 冲突所属的规则类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Exclusive,
    Duplicate,
    Limits,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exclusive => "exclusive",
            Self::Duplicate => "duplicate",
            Self::Limits => "limits",
        }
    }

    /// 规则集名称，用于解析错误信息
    pub fn rule_set_name(&self) -> &'static str {
        match self {
            Self::Exclusive => "Exclusive",
            Self::Duplicate => "Duplicate",
            Self::Limits => "Limits",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
