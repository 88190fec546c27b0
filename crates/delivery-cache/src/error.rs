//! 投递缓存错误类型
//!
//! `CacheError` 是系统错误（规则解析、时间窗口、存储）；
//! `EligibilityError::Conflict` 是业务信号，调用方应渲染为“未发送”而不是故障。

use crate::models::{CacheEntry, RuleType};
use crate::store::LimitHit;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// 缓存层错误
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("{rule_set} 规则解析失败: {message}")]
    RuleParse { rule_set: String, message: String },

    #[error("无效的时间窗口: {0}")]
    InvalidDuration(String),

    #[error("无效的时区: {0}")]
    InvalidTimezone(String),

    #[error("历史存储错误: {0}")]
    Store(String),

    #[error("历史存储调用超时: operation={operation}, timeout_ms={timeout_ms}")]
    StoreTimeout { operation: String, timeout_ms: u64 },
}

impl CacheError {
    /// 存储故障与超时可重试；配置错误重试无意义
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_) | Self::StoreTimeout { .. })
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::RuleParse { .. } => "RULE_PARSE_ERROR",
            Self::InvalidDuration(_) => "INVALID_DURATION",
            Self::InvalidTimezone(_) => "INVALID_TIMEZONE",
            Self::Store(_) => "STORE_ERROR",
            Self::StoreTimeout { .. } => "STORE_TIMEOUT",
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;

/// 冲突命中的历史记录
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MatchedRecord {
    /// exclusive / duplicate 命中的缓存条目
    Entry(Box<CacheEntry>),
    /// 达到额度的规则及窗口内计数
    Limit(LimitHit),
}

/// 投递冲突
#[derive(Debug, Clone, Serialize)]
pub struct Conflict {
    pub message: String,
    /// 409（exclusive/duplicate）或 429（limits）
    pub status_code: u16,
    pub rule_type: RuleType,
    pub matched: MatchedRecord,
}

impl Conflict {
    pub const EXCLUSIVE_MESSAGE: &'static str = "Skipping exclusive Contact.";
    pub const DUPLICATE_MESSAGE: &'static str = "Skipping duplicate Contact.";
    pub const LIMITS_MESSAGE: &'static str =
        "Not able to send contact to client due to an exceeded budget.";

    pub fn exclusive(entry: CacheEntry) -> Self {
        Self {
            message: Self::EXCLUSIVE_MESSAGE.to_string(),
            status_code: 409,
            rule_type: RuleType::Exclusive,
            matched: MatchedRecord::Entry(Box::new(entry)),
        }
    }

    pub fn duplicate(entry: CacheEntry) -> Self {
        Self {
            message: Self::DUPLICATE_MESSAGE.to_string(),
            status_code: 409,
            rule_type: RuleType::Duplicate,
            matched: MatchedRecord::Entry(Box::new(entry)),
        }
    }

    pub fn limits(hit: LimitHit) -> Self {
        Self {
            message: Self::LIMITS_MESSAGE.to_string(),
            status_code: 429,
            rule_type: RuleType::Limits,
            matched: MatchedRecord::Limit(hit),
        }
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.message, self.rule_type, self.status_code)
    }
}

/// 资格评估错误
#[derive(Debug, Error)]
pub enum EligibilityError {
    #[error("投递冲突: {0}")]
    Conflict(Conflict),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl EligibilityError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Conflict(_) => false,
            Self::Cache(err) => err.is_retryable(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Conflict(conflict) => match conflict.rule_type {
                RuleType::Exclusive => "EXCLUSIVE_CONFLICT",
                RuleType::Duplicate => "DUPLICATE_CONFLICT",
                RuleType::Limits => "LIMIT_EXCEEDED",
            },
            Self::Cache(err) => err.code(),
        }
    }

    /// 冲突时返回冲突详情
    pub fn as_conflict(&self) -> Option<&Conflict> {
        match self {
            Self::Conflict(conflict) => Some(conflict),
            Self::Cache(_) => None,
        }
    }
}

impl From<Conflict> for EligibilityError {
    fn from(conflict: Conflict) -> Self {
        Self::Conflict(conflict)
    }
}
