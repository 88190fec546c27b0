//! 过滤表达式引擎
//!
//! 对 jQuery QueryBuilder 形态的 JSON 条件树进行求值，支持：
//! - 嵌套 AND/OR 分组与短路求值
//! - 21 种叶子操作符（比较、包含、空值、正则）
//! - 非致命的叶子错误，以诊断信息的形式累积

pub mod error;
pub mod evaluator;
pub mod filter;
pub mod models;
pub mod operators;
pub mod parser;

pub use error::{FilterError, Result};
pub use evaluator::ConditionEvaluator;
pub use filter::FilterHelper;
pub use models::{FilterContext, RuleGroup, RuleLeaf, RuleNode};
pub use operators::{LogicalOperator, Operator, ValueType};
pub use parser::{CompiledFilter, RuleParser};
