//! 过滤引擎数据模型

use crate::operators::{LogicalOperator, Operator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 条件树节点：分组或叶子
#[derive(Debug, Clone, PartialEq)]
pub enum RuleNode {
    Group(RuleGroup),
    Leaf(RuleLeaf),
}

/// 逻辑分组
#[derive(Debug, Clone, PartialEq)]
pub struct RuleGroup {
    pub condition: LogicalOperator,
    pub rules: Vec<RuleNode>,
}

/// 叶子条件
///
/// 字段都保留为可选：缺失或未知操作符不是解析错误，而是在求值时记录诊断。
#[derive(Debug, Clone, PartialEq)]
pub struct RuleLeaf {
    pub id: Option<String>,
    pub field: Option<String>,
    /// 声明的值类型（QueryBuilder 的 type 字段，原样保存）
    pub value_type: Option<String>,
    pub input: Option<String>,
    /// 原始操作符文本，用于诊断信息
    pub raw_operator: Option<String>,
    /// 解析后的操作符；未知时为 None
    pub operator: Option<Operator>,
    /// 缺省视为 null
    pub value: Value,
}

impl RuleLeaf {
    /// id/field/type/input/operator 齐全且操作符已知
    pub fn is_well_formed(&self) -> bool {
        self.id.is_some()
            && self.field.is_some()
            && self.value_type.is_some()
            && self.input.is_some()
            && self.operator.is_some()
    }
}

/// 求值上下文
///
/// 扁平或两层的键值映射。字段路径只展开一层：`lead.email` 先取 `lead`，
/// 再在其内部取 `email`。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterContext {
    values: Map<String, Value>,
}

impl FilterContext {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    /// 从 JSON 值构建；非对象视为空上下文
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(values) => Self { values },
            _ => Self::default(),
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 按字段路径取值
    ///
    /// 路径按第一个 `.` 拆分；首段存在且还有剩余路径时只在嵌套映射内查找剩余部分，
    /// 否则按完整字段名在顶层查找。
    pub fn get_field(&self, path: &str) -> Option<&Value> {
        if let Some((head, rest)) = path.split_once('.') {
            match self.values.get(head) {
                Some(Value::Null) | None => {}
                Some(Value::Object(nested)) => return nested.get(rest),
                Some(_) => return None,
            }
        }
        self.values.get(path)
    }
}

impl From<Map<String, Value>> for FilterContext {
    fn from(values: Map<String, Value>) -> Self {
        Self::new(values)
    }
}
