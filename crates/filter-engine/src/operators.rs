//! 过滤操作符定义
//!
//! 操作符表是静态数据：每个操作符是否接受字面值、适用于哪些值类型。

use crate::error::{FilterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 叶子值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    Datetime,
}

impl ValueType {
    /// 解析 QueryBuilder 的 type 字段，integer/double 等细分类型归并到三大类
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "string" | "boolean" => Some(Self::String),
            "number" | "integer" | "double" => Some(Self::Number),
            "datetime" | "date" | "time" => Some(Self::Datetime),
            _ => None,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String => write!(f, "string"),
            Self::Number => write!(f, "number"),
            Self::Datetime => write!(f, "datetime"),
        }
    }
}

const ALL_TYPES: &[ValueType] = &[ValueType::String, ValueType::Number, ValueType::Datetime];
const ORDERED_TYPES: &[ValueType] = &[ValueType::Number, ValueType::Datetime];
const STRING_ONLY: &[ValueType] = &[ValueType::String];

/// 叶子操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    // 通用比较
    Equal,
    NotEqual,
    In,
    NotIn,

    // 有序比较
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Between,

    // 字符串操作
    BeginsWith,
    NotBeginsWith,
    Contains,
    NotContains,
    EndsWith,
    NotEndsWith,

    // 空值检查
    IsEmpty,
    IsNotEmpty,
    IsNull,
    IsNotNull,

    // 正则
    Regex,
    NotRegex,
}

impl Operator {
    pub const ALL: [Operator; 21] = [
        Self::Equal,
        Self::NotEqual,
        Self::In,
        Self::NotIn,
        Self::Less,
        Self::LessOrEqual,
        Self::Greater,
        Self::GreaterOrEqual,
        Self::Between,
        Self::BeginsWith,
        Self::NotBeginsWith,
        Self::Contains,
        Self::NotContains,
        Self::EndsWith,
        Self::NotEndsWith,
        Self::IsEmpty,
        Self::IsNotEmpty,
        Self::IsNull,
        Self::IsNotNull,
        Self::Regex,
        Self::NotRegex,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::NotEqual => "not_equal",
            Self::In => "in",
            Self::NotIn => "not_in",
            Self::Less => "less",
            Self::LessOrEqual => "less_or_equal",
            Self::Greater => "greater",
            Self::GreaterOrEqual => "greater_or_equal",
            Self::Between => "between",
            Self::BeginsWith => "begins_with",
            Self::NotBeginsWith => "not_begins_with",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::EndsWith => "ends_with",
            Self::NotEndsWith => "not_ends_with",
            Self::IsEmpty => "is_empty",
            Self::IsNotEmpty => "is_not_empty",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
            Self::Regex => "regex",
            Self::NotRegex => "not_regex",
        }
    }

    /// 是否接受规则中的字面值
    pub fn accepts_value(&self) -> bool {
        !matches!(
            self,
            Self::IsEmpty | Self::IsNotEmpty | Self::IsNull | Self::IsNotNull
        )
    }

    /// 适用的值类型
    pub fn applies_to(&self) -> &'static [ValueType] {
        match self {
            Self::Equal | Self::NotEqual | Self::In | Self::NotIn => ALL_TYPES,
            Self::Less | Self::LessOrEqual | Self::Greater | Self::GreaterOrEqual | Self::Between => {
                ORDERED_TYPES
            }
            Self::IsNull | Self::IsNotNull => ALL_TYPES,
            _ => STRING_ONLY,
        }
    }

    pub fn supports(&self, value_type: ValueType) -> bool {
        self.applies_to().contains(&value_type)
    }

    /// 不接受字面值时使用的默认规则值
    pub fn default_value(&self) -> serde_json::Value {
        match self {
            Self::IsEmpty | Self::IsNotEmpty => serde_json::Value::String(String::new()),
            _ => serde_json::Value::Null,
        }
    }

    /// 规则值是否必须是数组（字符串会按 CSV 拆分）
    pub fn requires_array(&self) -> bool {
        matches!(self, Self::In | Self::NotIn | Self::Between)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Operator {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == normalized)
            .ok_or_else(|| FilterError::Evaluation(format!("未知的操作符: {}", s)))
    }
}

/// 分组逻辑操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    /// 大小写不敏感，忽略首尾空白
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "and" => Ok(Self::And),
            "or" => Ok(Self::Or),
            _ => Err(FilterError::Condition(raw.to_string())),
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_table_size() {
        assert_eq!(Operator::ALL.len(), 21);
        let without_value: Vec<_> = Operator::ALL
            .iter()
            .filter(|op| !op.accepts_value())
            .collect();
        assert_eq!(without_value.len(), 4);
    }

    #[test]
    fn test_operator_round_trips_through_str() {
        for op in Operator::ALL {
            assert_eq!(op.as_str().parse::<Operator>().unwrap(), op);
        }
        assert!("like".parse::<Operator>().is_err());
    }

    #[test]
    fn test_applies_to() {
        assert!(Operator::Equal.supports(ValueType::Datetime));
        assert!(Operator::Between.supports(ValueType::Number));
        assert!(!Operator::Between.supports(ValueType::String));
        assert!(!Operator::Regex.supports(ValueType::Number));
        assert!(Operator::IsNull.supports(ValueType::Number));
        assert!(!Operator::IsEmpty.supports(ValueType::Number));
    }

    #[test]
    fn test_default_values() {
        assert_eq!(Operator::IsEmpty.default_value(), serde_json::json!(""));
        assert_eq!(Operator::IsNotNull.default_value(), serde_json::Value::Null);
    }

    #[test]
    fn test_logical_operator_parse() {
        assert_eq!(LogicalOperator::parse(" AND ").unwrap(), LogicalOperator::And);
        assert_eq!(LogicalOperator::parse("Or").unwrap(), LogicalOperator::Or);
        assert!(matches!(
            LogicalOperator::parse("xor"),
            Err(FilterError::Condition(_))
        ));
    }

    #[test]
    fn test_value_type_aliases() {
        assert_eq!(ValueType::parse("integer"), Some(ValueType::Number));
        assert_eq!(ValueType::parse("date"), Some(ValueType::Datetime));
        assert_eq!(ValueType::parse("blob"), None);
    }
}
