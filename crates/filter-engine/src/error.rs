//! 过滤引擎错误类型

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FilterError {
    /// 表达式结构非法（非 JSON、非对象、缺少 rules 数组），整次调用失败
    #[error("规则解析失败: {0}")]
    Parse(String),

    /// 分组条件既不是 and 也不是 or，整次调用失败
    #[error("无效的分组条件 '{0}'，只能是 'and' 或 'or'")]
    Condition(String),

    /// 单个叶子无法求值；调用方将其记录为诊断信息并把该叶子视为 false
    #[error("规则评估失败: {0}")]
    Evaluation(String),
}

impl FilterError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(_) => "FILTER_PARSE_ERROR",
            Self::Condition(_) => "FILTER_CONDITION_ERROR",
            Self::Evaluation(_) => "FILTER_EVALUATION_ERROR",
        }
    }

    /// 过滤错误均由输入决定，重试不会改变结果
    pub fn is_retryable(&self) -> bool {
        false
    }
}

impl From<serde_json::Error> for FilterError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(format!("JSON parsing threw an error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;
