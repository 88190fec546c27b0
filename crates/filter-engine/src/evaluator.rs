//! 条件评估器
//!
//! 实现各操作符的求值逻辑。比较采用宽松语义：数字字符串按数值比较，
//! 布尔与 null 按真值比较；`not_equal` 是唯一的严格比较（类型与值都要相同）。

use crate::error::{FilterError, Result};
use crate::operators::Operator;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use std::cmp::Ordering;

/// 上下文中找不到字段时参与比较的值
const UNRESOLVED: Value = Value::Bool(false);

/// 条件评估器
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    /// 评估条件
    ///
    /// # Arguments
    /// * `context_value` - 从上下文中解析出的值，None 表示字段不存在
    /// * `operator` - 操作符
    /// * `rule_value` - 规则中的值（已按操作符规整为标量或数组）
    pub fn evaluate(
        context_value: Option<&Value>,
        operator: Operator,
        rule_value: &Value,
    ) -> Result<bool> {
        // null 检查需要区分“不存在”与其他值
        let is_null = matches!(context_value, None | Some(Value::Null));
        let context_value = context_value.unwrap_or(&UNRESOLVED);

        match operator {
            Operator::IsNull => Ok(is_null),
            Operator::IsNotNull => Ok(!is_null),
            Operator::Equal => Ok(loose_eq(context_value, rule_value)),
            Operator::NotEqual => Ok(!strict_eq(context_value, rule_value)),
            Operator::In => Ok(Self::in_list(context_value, rule_value)),
            Operator::NotIn => Ok(!Self::in_list(context_value, rule_value)),
            Operator::Less => Ok(Self::ordered(context_value, rule_value, |o| o.is_lt())),
            Operator::LessOrEqual => Ok(Self::ordered(context_value, rule_value, |o| o.is_le())),
            Operator::Greater => Ok(Self::ordered(context_value, rule_value, |o| o.is_gt())),
            Operator::GreaterOrEqual => {
                Ok(Self::ordered(context_value, rule_value, |o| o.is_ge()))
            }
            Operator::Between => Self::between(context_value, rule_value),
            Operator::BeginsWith => Ok(Self::text(context_value, rule_value, |c, r| c.starts_with(r))),
            Operator::NotBeginsWith => {
                Ok(Self::text(context_value, rule_value, |c, r| !c.starts_with(r)))
            }
            Operator::Contains => Ok(Self::text(context_value, rule_value, |c, r| c.contains(r))),
            Operator::NotContains => {
                Ok(Self::text(context_value, rule_value, |c, r| !c.contains(r)))
            }
            Operator::EndsWith => Ok(Self::text(context_value, rule_value, |c, r| c.ends_with(r))),
            Operator::NotEndsWith => {
                Ok(Self::text(context_value, rule_value, |c, r| !c.ends_with(r)))
            }
            Operator::IsEmpty => Ok(Self::is_blank(context_value)),
            Operator::IsNotEmpty => Ok(!Self::is_blank(context_value)),
            Operator::Regex => Self::regex_match(context_value, rule_value),
            Operator::NotRegex => Self::regex_match(context_value, rule_value).map(|m| !m),
        }
    }

    /// 列表成员检查（宽松相等）
    fn in_list(field: &Value, expected: &Value) -> bool {
        match expected {
            Value::Array(items) => items.iter().any(|item| loose_eq(field, item)),
            _ => false,
        }
    }

    /// 有序比较；无法比较（数组、对象）时为 false
    fn ordered<F>(field: &Value, expected: &Value, accept: F) -> bool
    where
        F: Fn(Ordering) -> bool,
    {
        loose_cmp(field, expected).is_some_and(accept)
    }

    /// 范围比较，两端都包含；端点取列表中的最小值与最大值
    fn between(field: &Value, expected: &Value) -> Result<bool> {
        let items = expected
            .as_array()
            .filter(|items| !items.is_empty())
            .ok_or_else(|| FilterError::Evaluation("between requires a list of values".to_string()))?;

        let pick = |wanted: Ordering| {
            items.iter().skip(1).fold(&items[0], |best, item| {
                if loose_cmp(item, best) == Some(wanted) {
                    item
                } else {
                    best
                }
            })
        };
        let min = pick(Ordering::Less);
        let max = pick(Ordering::Greater);

        Ok(loose_eq(field, min)
            || loose_eq(field, max)
            || (loose_cmp(field, min) == Some(Ordering::Greater)
                && loose_cmp(field, max) == Some(Ordering::Less)))
    }

    /// 字符串操作；任一侧无法转为字符串时为 false
    fn text<F>(field: &Value, expected: &Value, test: F) -> bool
    where
        F: Fn(&str, &str) -> bool,
    {
        match (to_text(field), to_text(expected)) {
            (Some(field), Some(expected)) => test(&field, &expected),
            _ => false,
        }
    }

    /// 去除首尾空白后为空串或 "0"
    fn is_blank(value: &Value) -> bool {
        match to_text(value) {
            Some(text) => {
                let trimmed = text.trim();
                trimmed.is_empty() || trimmed == "0"
            }
            None => !truthy(value),
        }
    }

    /// 正则匹配
    fn regex_match(field: &Value, expected: &Value) -> Result<bool> {
        let pattern = to_text(expected).unwrap_or_default();
        let subject = to_text(field).unwrap_or_default();

        let regex = compile_pattern(&pattern)?;

        Ok(regex.is_match(&subject))
    }
}

/// 编译带分隔符的正则
///
/// 首尾都不是 `/` 时自动包裹为 `/pattern/`；结尾分隔符之后的字符作为标志位（i/m/s/x/u）。
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    let invalid = || FilterError::Evaluation("Invalid regex pattern.".to_string());

    let delimited = if !pattern.starts_with('/') && !pattern.ends_with('/') {
        format!("/{}/", pattern)
    } else {
        pattern.to_string()
    };

    let body = delimited.strip_prefix('/').ok_or_else(invalid)?;
    let end = body.rfind('/').ok_or_else(invalid)?;
    let (expression, flags) = (&body[..end], &body[end + 1..]);

    let mut builder = RegexBuilder::new(expression);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            // Rust 正则默认按 Unicode 处理
            'u' => {}
            _ => return Err(invalid()),
        }
    }

    builder.build().map_err(|_| invalid())
}

/// 值的字符串形式；数组和对象没有字符串形式
pub fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(true) => Some("1".to_string()),
        Value::Bool(false) => Some(String::new()),
        Value::Number(n) => Some(number_text(n)),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn number_text(n: &serde_json::Number) -> String {
    if n.is_f64() {
        if let Some(f) = n.as_f64() {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                return format!("{}", f as i64);
            }
            return f.to_string();
        }
    }
    n.to_string()
}

/// 真值判断
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !(s.is_empty() || s == "0"),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// 数字字符串（允许首尾空白、符号、小数点和指数）
fn parse_numeric(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty()
        || !trimmed.bytes().any(|b| b.is_ascii_digit())
        || !trimmed
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'))
    {
        return None;
    }
    trimmed.parse().ok()
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_numeric(s),
        _ => None,
    }
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt);
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

/// 宽松相等
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), other) | (other, Value::Bool(x)) => *x == truthy(other),
        (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
        (Value::Null, other) | (other, Value::Null) => !truthy(other),
        (Value::Number(_), Value::Number(_)) => match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
            _ => false,
        },
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            match (parse_numeric(s), n.as_f64()) {
                (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
                _ => number_text(n) == *s,
            }
        }
        (Value::String(x), Value::String(y)) => match (parse_numeric(x), parse_numeric(y)) {
            (Some(p), Some(q)) => (p - q).abs() < f64::EPSILON,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| loose_eq(p, q))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(key, p)| y.get(key).is_some_and(|q| loose_eq(p, q)))
        }
        _ => false,
    }
}

/// 严格相等：类型与值都相同（整数 1 与浮点 1.0 不相等）
pub fn strict_eq(a: &Value, b: &Value) -> bool {
    a == b
}

/// 宽松排序
///
/// 两侧都是数字（或数字字符串）时按数值；两侧都能解析为日期时间时按时间；
/// 其余字符串按字节序；涉及布尔或 null 时按真值。数组与对象不可比较。
pub fn loose_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => None,
        (Value::Bool(_) | Value::Null, _) | (_, Value::Bool(_) | Value::Null) => {
            Some(truthy(a).cmp(&truthy(b)))
        }
        _ => {
            if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
                return x.partial_cmp(&y);
            }
            let (x, y) = (to_text(a)?, to_text(b)?);
            if let (Some(p), Some(q)) = (parse_datetime(&x), parse_datetime(&y)) {
                return Some(p.cmp(&q));
            }
            Some(x.as_str().cmp(y.as_str()))
        }
    }
}
