//! 规则规范化
//!
//! 把 client 上声明式的 exclusive / duplicate / limits 规则 JSON 变成有序的
//! [`NormalizedRule`] 列表：先剔除与当前作用域无关的规则，再按
//! `(duration, scope, value)` 合并等价规则。

use crate::error::{CacheError, Result};
use crate::models::{
    ClientRuleConfig, MatchingMask, NormalizedRule, RuleKey, RuleType, Scope, ScopeContext,
};
use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

/// 规则规范化器（无状态）
pub struct RuleNormalizer;

impl RuleNormalizer {
    /// 解析并规范化一组规则
    ///
    /// `scope` 为 None 时不做无关性过滤。
    pub fn normalize(
        raw: &str,
        rule_type: RuleType,
        require_matching: bool,
        scope: Option<&ScopeContext<'_>>,
    ) -> Result<Vec<NormalizedRule>> {
        let mut rules = Self::decode(raw, rule_type)?;
        if let Some(scope) = scope {
            Self::exclude_irrelevant(&mut rules, scope);
        }
        let merged = Self::merge(&rules, require_matching);

        debug!(
            rule_type = rule_type.as_str(),
            raw_count = rules.len(),
            merged_count = merged.len(),
            "rules normalized"
        );
        Ok(merged)
    }

    /// 独占规则：需要 matching，按作用域过滤
    pub fn exclusive_rules(
        client: &ClientRuleConfig,
        scope: &ScopeContext<'_>,
    ) -> Result<Vec<NormalizedRule>> {
        Self::normalize(&client.exclusive, RuleType::Exclusive, true, Some(scope))
    }

    /// 重复规则：需要 matching，不做作用域过滤
    pub fn duplicate_rules(client: &ClientRuleConfig) -> Result<Vec<NormalizedRule>> {
        Self::normalize(&client.duplicate, RuleType::Duplicate, true, None)
    }

    /// 额度规则：不需要 matching，按作用域过滤
    pub fn limit_rules(
        client: &ClientRuleConfig,
        scope: &ScopeContext<'_>,
    ) -> Result<Vec<NormalizedRule>> {
        Self::normalize(&client.limits, RuleType::Limits, false, Some(scope))
    }

    /// 取出 `rules` 数组中的对象
    ///
    /// 空字符串表示没有规则；缺少 `rules` 或其不是数组同样视为没有规则。
    pub fn decode(raw: &str, rule_type: RuleType) -> Result<Vec<Map<String, Value>>> {
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        let parse_error = |message: String| CacheError::RuleParse {
            rule_set: rule_type.rule_set_name().to_string(),
            message,
        };

        let value: Value = serde_json::from_str(raw).map_err(|e| parse_error(e.to_string()))?;
        let Value::Object(mut root) = value else {
            return Err(parse_error("规则必须是 JSON 对象".to_string()));
        };

        Ok(match root.remove("rules") {
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        })
    }

    /// 剔除比当前作用域更窄、且不适用于本次投递的规则
    pub fn exclude_irrelevant(rules: &mut Vec<Map<String, Value>>, scope: &ScopeContext<'_>) {
        rules.retain(|rule| {
            let value = rule.get("value");
            match rule.get("scope").and_then(as_int).and_then(Scope::from_code) {
                Some(Scope::UtmSource) => {
                    let declared = value.map(as_text).unwrap_or_default();
                    let declared = declared.trim();
                    declared.is_empty() || Some(declared) == scope.utm_source
                }
                Some(Scope::Category) => match value {
                    Some(v) if is_truthy(v) => {
                        as_int(v).is_some_and(|id| Some(id) == scope.category_id)
                    }
                    _ => true,
                },
                _ => true,
            }
        });
    }

    /// 合并等价规则，按键降序输出
    pub fn merge(rules: &[Map<String, Value>], require_matching: bool) -> Vec<NormalizedRule> {
        let mut merged: HashMap<RuleKey, NormalizedRule> = HashMap::new();

        for rule in rules {
            let scope_raw = rule.get("scope").filter(|v| is_truthy(v));
            let duration = rule.get("duration").filter(|v| is_truthy(v));
            let matching = rule.get("matching").filter(|v| is_truthy(v));
            let (Some(scope_raw), Some(duration)) = (scope_raw, duration) else {
                continue;
            };
            if require_matching && matching.is_none() {
                continue;
            }

            let Some(scope) = as_int(scope_raw).and_then(Scope::from_code) else {
                warn!(scope = %scope_raw, "unknown rule scope skipped");
                continue;
            };

            let mask = matching
                .and_then(as_int)
                .and_then(|bits| u32::try_from(bits).ok())
                .map(MatchingMask::from_bits)
                .unwrap_or_default();
            // 显式的 0 也参与取最小值；缺失或非数字表示不限额
            let quantity = rule
                .get("quantity")
                .filter(|v| v.is_number() || v.is_string())
                .and_then(as_int)
                .and_then(|q| u32::try_from(q).ok());

            let candidate = NormalizedRule {
                scope,
                duration: as_text(duration),
                value: rule.get("value").map(as_text).unwrap_or_default(),
                matching: mask,
                quantity,
            };

            merged
                .entry(candidate.key())
                .and_modify(|existing| {
                    existing.matching = existing.matching.merge(mask);
                    existing.quantity = match (existing.quantity, quantity) {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                })
                .or_insert(candidate);
        }

        let mut out: Vec<NormalizedRule> = merged.into_values().collect();
        out.sort_by_cached_key(|rule| std::cmp::Reverse(rule.key().sort_key()));
        out
    }
}

/// 宽松取整：数字取整数部分，字符串按前导数字解析
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            let end = s
                .char_indices()
                .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && c == '-')))
                .map_or(s.len(), |(i, _)| i);
            s[..end].parse().ok()
        }
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => String::new(),
        other => other.to_string(),
    }
}

/// 非空判断：null、false、0、""、"0"、空数组与空对象为空
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
