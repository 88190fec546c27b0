//! 数据模型

mod client;
mod contact;
mod entry;
mod enums;

pub use client::{ClientRuleConfig, Eligible, EvaluationContext, ScopeContext};
pub use contact::{Contact, ContactSnapshot, UtmTag};
pub use entry::{CacheEntry, NormalizedRule, RuleKey};
pub use enums::{MatchingMask, RuleType, Scope};
