//! 过滤器
//!
//! 对表达式做短路求值，把叶子级别的问题累积为可读的诊断信息。
//! 只有结构性错误（解析、分组条件）会中断调用。

use crate::error::{FilterError, Result};
use crate::evaluator::{ConditionEvaluator, to_text};
use crate::models::{FilterContext, RuleGroup, RuleLeaf, RuleNode};
use crate::operators::{LogicalOperator, ValueType};
use crate::parser::{CompiledFilter, RuleParser};
use gate_shared::observability::metrics::record_filter_evaluation;
use serde_json::Value;
use std::time::Instant;
use tracing::debug;

const DEFAULT_MAX_STRING_LENGTH: usize = 32;

/// 过滤器
///
/// 诊断信息在同一实例的多次调用之间累积，直到调用 `clear_errors`。
pub struct FilterHelper {
    parser: RuleParser,
    errors: Vec<String>,
    /// 诊断中值的最大长度（字节），超出部分截断并追加省略号
    max_string_length: usize,
    trace_enabled: bool,
    trace: Vec<String>,
}

impl FilterHelper {
    pub fn new() -> Self {
        Self {
            parser: RuleParser::new(),
            errors: Vec::new(),
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
            trace_enabled: false,
            trace: Vec::new(),
        }
    }

    /// 启用求值追踪
    pub fn with_trace(mut self) -> Self {
        self.trace_enabled = true;
        self
    }

    pub fn with_max_string_length(mut self, max_string_length: usize) -> Self {
        self.max_string_length = max_string_length;
        self
    }

    /// 累积的诊断信息
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
        self.trace.clear();
    }

    /// 求值追踪（仅在 `with_trace` 后记录）
    pub fn trace(&self) -> &[String] {
        &self.trace
    }

    /// 对 JSON 表达式求值
    ///
    /// 空表达式或空 rules 返回 `default_when_empty`；
    /// 默认值为 false 时记录 "No rules to evaluate."。
    pub fn filter(
        &mut self,
        expression: &str,
        context: &FilterContext,
        default_when_empty: bool,
    ) -> Result<bool> {
        if expression.trim().is_empty() {
            return Ok(self.no_rules(default_when_empty));
        }

        let compiled = self.parser.parse_str(expression)?;
        self.filter_compiled(&compiled, context, default_when_empty)
    }

    /// 对已解析的表达式求值
    pub fn filter_compiled(
        &mut self,
        compiled: &CompiledFilter,
        context: &FilterContext,
        default_when_empty: bool,
    ) -> Result<bool> {
        if compiled.is_empty() {
            return Ok(self.no_rules(default_when_empty));
        }

        let start = Instant::now();
        let matched = self.evaluate_group(compiled.root(), context, "root");
        record_filter_evaluation(matched, start.elapsed().as_secs_f64());

        debug!(
            matched,
            fields = compiled.required_fields.len(),
            diagnostics = self.errors.len(),
            "filter evaluated"
        );

        Ok(matched)
    }

    /// 对单个节点求值（调用方自行构建的树）
    pub fn filter_node(&mut self, node: &RuleNode, context: &FilterContext) -> bool {
        self.evaluate_node(node, context, "root")
    }

    fn no_rules(&mut self, default_when_empty: bool) -> bool {
        if !default_when_empty {
            self.record("No rules to evaluate.".to_string());
        }
        default_when_empty
    }

    fn record(&mut self, message: String) {
        debug!(diagnostic = %message, "filter diagnostic");
        self.errors.push(message);
    }

    fn push_trace(&mut self, line: String) {
        if self.trace_enabled {
            self.trace.push(line);
        }
    }

    fn evaluate_node(&mut self, node: &RuleNode, context: &FilterContext, path: &str) -> bool {
        match node {
            RuleNode::Group(group) => self.evaluate_group(group, context, path),
            RuleNode::Leaf(leaf) => self.evaluate_leaf(leaf, context, path),
        }
    }

    /// 评估逻辑组（短路求值），空组为 true
    fn evaluate_group(&mut self, group: &RuleGroup, context: &FilterContext, path: &str) -> bool {
        self.push_trace(format!(
            "{}: {} group ({} children)",
            path,
            group.condition,
            group.rules.len()
        ));

        for (i, child) in group.rules.iter().enumerate() {
            let child_path = format!("{}.rules[{}]", path, i);
            let matched = self.evaluate_node(child, context, &child_path);

            match (group.condition, matched) {
                (LogicalOperator::And, false) => {
                    self.push_trace(format!("{}: AND short-circuit at child {}", path, i));
                    return false;
                }
                (LogicalOperator::Or, true) => {
                    self.push_trace(format!("{}: OR short-circuit at child {}", path, i));
                    return true;
                }
                _ => {}
            }
        }

        match group.condition {
            LogicalOperator::And => true,
            LogicalOperator::Or => group.rules.is_empty(),
        }
    }

    fn evaluate_leaf(&mut self, leaf: &RuleLeaf, context: &FilterContext, path: &str) -> bool {
        if !leaf.is_well_formed() {
            self.record("Rules are missconfigured.".to_string());
            self.push_trace(format!("{}: misconfigured => NOT_MATCHED", path));
            return false;
        }

        let rule_value = match Self::rule_value(leaf) {
            Ok(value) => value,
            Err(err) => {
                let message = match err {
                    FilterError::Evaluation(message) => message,
                    other => other.to_string(),
                };
                let minified = self.minify_text(&message);
                self.record(format!(
                    "Error attempting to get a value from a rule: {}",
                    minified
                ));
                return false;
            }
        };

        let field = leaf.field.as_deref().unwrap_or_default();
        let context_value = leaf.field.as_deref().and_then(|f| context.get_field(f));

        let matched = match leaf.operator {
            Some(operator) => {
                if let Some(value_type) = leaf.value_type.as_deref().and_then(ValueType::parse) {
                    if !operator.supports(value_type) {
                        debug!(field, %operator, %value_type, "operator does not apply to declared type");
                    }
                }

                match ConditionEvaluator::evaluate(context_value, operator, &rule_value) {
                    Ok(matched) => matched,
                    Err(FilterError::Evaluation(message)) => {
                        self.record(message);
                        false
                    }
                    Err(other) => {
                        self.record(other.to_string());
                        false
                    }
                }
            }
            None => false,
        };

        self.push_trace(format!(
            "{}: {} {} {} => {}",
            path,
            field,
            leaf.raw_operator.as_deref().unwrap_or_default(),
            rule_value,
            if matched { "MATCHED" } else { "NOT_MATCHED" }
        ));

        if !matched {
            let rule_text = self.minify(&rule_value);
            let context_text = self.minify(context_value.unwrap_or(&Value::Bool(false)));
            self.record(format!(
                "{} must be {} {} value was {}.",
                field,
                operator_words(leaf.raw_operator.as_deref().unwrap_or_default()),
                rule_text,
                context_text
            ));
        }

        matched
    }

    /// 规整规则值
    ///
    /// 不接受值的操作符使用默认值；in/not_in/between 要求数组，字符串按 CSV 拆分；
    /// 其他操作符要求标量，单元素数组会被展开。
    fn rule_value(leaf: &RuleLeaf) -> Result<Value> {
        if let Some(operator) = leaf.operator {
            if !operator.accepts_value() {
                return Ok(operator.default_value());
            }
        }

        let field = match (&leaf.raw_operator, &leaf.field) {
            (Some(_), Some(field)) => field,
            _ => return Ok(Value::Null),
        };

        let requires_array = leaf.operator.is_some_and(|op| op.requires_array());

        match &leaf.value {
            Value::String(s) if requires_array => Ok(Value::Array(
                split_csv(s).into_iter().map(Value::String).collect(),
            )),
            Value::Array(_) if requires_array => Ok(leaf.value.clone()),
            Value::Array(items) => match items.as_slice() {
                [single] => Ok(single.clone()),
                _ => Err(FilterError::Evaluation(format!(
                    "Field ({}) should not be an array, but it is.",
                    field
                ))),
            },
            _ if requires_array => Err(FilterError::Evaluation(format!(
                "Field ({}) should be an array, but it isn't.",
                field
            ))),
            other => Ok(other.clone()),
        }
    }

    /// 诊断用的值摘要
    fn minify(&self, value: &Value) -> String {
        let text = match value {
            Value::Array(items) => items
                .iter()
                .map(|item| to_text(item).unwrap_or_else(|| item.to_string()))
                .collect::<Vec<_>>()
                .join(","),
            other => to_text(other).unwrap_or_else(|| other.to_string()),
        };
        self.minify_text(&text)
    }

    /// 去除 HTML 标签、合并空白、截断
    fn minify_text(&self, text: &str) -> String {
        let collapsed = strip_tags(text)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        if collapsed.len() > self.max_string_length {
            let mut cut = self.max_string_length;
            while !collapsed.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}…", &collapsed[..cut])
        } else if collapsed.is_empty() {
            "empty".to_string()
        } else {
            collapsed
        }
    }
}

impl Default for FilterHelper {
    fn default() -> Self {
        Self::new()
    }
}

/// 操作符的可读形式：下划线换成空格，去掉末尾所有的 `s`（`less` 变为 `le`）
fn operator_words(operator: &str) -> String {
    operator.replace('_', " ").trim_end_matches('s').to_string()
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

/// 按逗号拆分，支持双引号包裹与 `""` 转义
fn split_csv(input: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.trim().is_empty() => {
                current.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}
