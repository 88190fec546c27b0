//! 表达式解析器
//!
//! 将 QueryBuilder JSON 解析为 `RuleNode` 树，并预先提取字段路径。
//! 结构错误（非对象、缺少 rules、非法分组条件）在这里失败；
//! 叶子级别的缺失留给求值阶段作为诊断处理。

use crate::error::{FilterError, Result};
use crate::models::{RuleGroup, RuleLeaf, RuleNode};
use crate::operators::LogicalOperator;
use serde_json::{Map, Value};
use std::collections::HashSet;

/// 解析后的过滤表达式
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    root: RuleGroup,
    /// 表达式中引用的全部字段路径
    pub required_fields: HashSet<String>,
}

impl CompiledFilter {
    pub fn root(&self) -> &RuleGroup {
        &self.root
    }

    /// 顶层 rules 为空
    pub fn is_empty(&self) -> bool {
        self.root.rules.is_empty()
    }
}

/// 表达式解析器
#[derive(Debug, Default)]
pub struct RuleParser;

impl RuleParser {
    pub fn new() -> Self {
        Self
    }

    /// 从 JSON 字符串解析
    pub fn parse_str(&self, json: &str) -> Result<CompiledFilter> {
        let value: Value = serde_json::from_str(json)?;
        self.parse_value(&value)
    }

    /// 从 JSON 值解析
    pub fn parse_value(&self, value: &Value) -> Result<CompiledFilter> {
        let object = value
            .as_object()
            .ok_or_else(|| FilterError::Parse("The query is not valid JSON".to_string()))?;

        if !matches!(object.get("rules"), Some(Value::Array(_))) {
            return Err(FilterError::Parse(
                "The query has no rules array".to_string(),
            ));
        }

        let root = self.parse_group(object, "root")?;

        let mut required_fields = HashSet::new();
        for node in &root.rules {
            Self::collect_fields(node, &mut required_fields);
        }

        Ok(CompiledFilter {
            root,
            required_fields,
        })
    }

    /// 解析分组；调用方保证 `rules` 是数组
    fn parse_group(&self, object: &Map<String, Value>, path: &str) -> Result<RuleGroup> {
        let condition = match object.get("condition") {
            None | Some(Value::Null) => LogicalOperator::And,
            Some(Value::String(raw)) => LogicalOperator::parse(raw)?,
            Some(other) => return Err(FilterError::Condition(other.to_string())),
        };

        let children = object
            .get("rules")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        let mut rules = Vec::with_capacity(children.len());
        for (i, child) in children.iter().enumerate() {
            let child_path = format!("{}.rules[{}]", path, i);
            let child = child.as_object().ok_or_else(|| {
                FilterError::Parse(format!("规则 '{}' 不是对象", child_path))
            })?;

            if matches!(child.get("rules"), Some(Value::Array(_))) {
                rules.push(RuleNode::Group(self.parse_group(child, &child_path)?));
            } else {
                rules.push(RuleNode::Leaf(Self::parse_leaf(child)));
            }
        }

        Ok(RuleGroup { condition, rules })
    }

    fn parse_leaf(object: &Map<String, Value>) -> RuleLeaf {
        let raw_operator = Self::text(object, "operator");
        let operator = raw_operator.as_deref().and_then(|op| op.parse().ok());

        RuleLeaf {
            id: Self::text(object, "id"),
            field: Self::text(object, "field"),
            value_type: Self::text(object, "type"),
            input: Self::text(object, "input"),
            raw_operator,
            operator,
            value: object.get("value").cloned().unwrap_or(Value::Null),
        }
    }

    /// 取标量字段的文本形式；null 与缺失等价
    fn text(object: &Map<String, Value>, key: &str) -> Option<String> {
        match object.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn collect_fields(node: &RuleNode, fields: &mut HashSet<String>) {
        match node {
            RuleNode::Leaf(leaf) => {
                if let Some(field) = &leaf.field {
                    fields.insert(field.clone());
                }
            }
            RuleNode::Group(group) => {
                for child in &group.rules {
                    Self::collect_fields(child, fields);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::Operator;

    #[test]
    fn test_parse_nested_tree() {
        let json = r#"{
            "condition": "OR",
            "rules": [
                {"id": "age", "field": "age", "type": "integer", "input": "number", "operator": "greater", "value": 18},
                {"condition": "and", "rules": [
                    {"id": "email", "field": "lead.email", "type": "string", "input": "text", "operator": "ends_with", "value": "@example.com"}
                ]}
            ]
        }"#;

        let compiled = RuleParser::new().parse_str(json).unwrap();
        assert_eq!(compiled.root().condition, LogicalOperator::Or);
        assert_eq!(compiled.root().rules.len(), 2);
        assert!(compiled.required_fields.contains("age"));
        assert!(compiled.required_fields.contains("lead.email"));

        match &compiled.root().rules[1] {
            RuleNode::Group(group) => {
                assert_eq!(group.condition, LogicalOperator::And);
                match &group.rules[0] {
                    RuleNode::Leaf(leaf) => assert_eq!(leaf.operator, Some(Operator::EndsWith)),
                    other => panic!("expected leaf, got {:?}", other),
                }
            }
            other => panic!("expected group, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_condition_defaults_to_and() {
        let compiled = RuleParser::new().parse_str(r#"{"rules": []}"#).unwrap();
        assert_eq!(compiled.root().condition, LogicalOperator::And);
        assert!(compiled.is_empty());
    }

    #[test]
    fn test_structural_errors() {
        let parser = RuleParser::new();
        assert!(matches!(parser.parse_str("not json"), Err(FilterError::Parse(_))));
        assert!(matches!(parser.parse_str("[1, 2]"), Err(FilterError::Parse(_))));
        assert!(matches!(
            parser.parse_str(r#"{"condition": "AND"}"#),
            Err(FilterError::Parse(_))
        ));
        assert!(matches!(
            parser.parse_str(r#"{"rules": "age > 1"}"#),
            Err(FilterError::Parse(_))
        ));
        assert!(matches!(
            parser.parse_str(r#"{"rules": [42]}"#),
            Err(FilterError::Parse(_))
        ));
    }

    #[test]
    fn test_invalid_condition_is_fatal() {
        let parser = RuleParser::new();
        assert!(matches!(
            parser.parse_str(r#"{"condition": "XOR", "rules": []}"#),
            Err(FilterError::Condition(_))
        ));
        assert!(matches!(
            parser.parse_str(r#"{"rules": [{"condition": "nand", "rules": []}]}"#),
            Err(FilterError::Condition(_))
        ));
    }

    #[test]
    fn test_incomplete_leaf_is_not_a_parse_error() {
        let compiled = RuleParser::new()
            .parse_str(r#"{"rules": [{"field": "age", "operator": "like"}]}"#)
            .unwrap();

        match &compiled.root().rules[0] {
            RuleNode::Leaf(leaf) => {
                assert!(!leaf.is_well_formed());
                assert_eq!(leaf.raw_operator.as_deref(), Some("like"));
                assert_eq!(leaf.operator, None);
                assert_eq!(leaf.value, Value::Null);
            }
            other => panic!("expected leaf, got {:?}", other),
        }
    }
}
