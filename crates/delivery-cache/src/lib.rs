//! 投递缓存与资格评估
//!
//! 针对每个联系人与投递目标（client），回答三个问题：
//! - 是否处于其他投递的独占期内（exclusive）
//! - 是否与近期缓存的联系人重复（duplicate）
//! - 是否已达到投递额度（limits）
//!
//! 规则以 JSON 声明，经 [`normalizer`] 过滤合并后，
//! 针对 [`store::HistoricalStore`] 中按时间窗口与作用域筛选的历史条目求值。

pub mod builder;
pub mod eligibility;
pub mod error;
pub mod models;
pub mod normalizer;
pub mod phone;
pub mod store;
pub mod window;

pub use builder::CacheEntryBuilder;
pub use eligibility::Eligibility;
pub use error::{CacheError, Conflict, EligibilityError, MatchedRecord, Result};
pub use models::{
    CacheEntry, ClientRuleConfig, Contact, ContactSnapshot, Eligible, EvaluationContext,
    MatchingMask, NormalizedRule, RuleKey, RuleType, Scope, ScopeContext, UtmTag,
};
pub use normalizer::RuleNormalizer;
pub use store::{AdmissionPermit, HistoricalStore, LimitHit, MemoryCacheStore};
pub use window::DurationSpec;
