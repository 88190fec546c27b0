//! 历史投递存储
//!
//! 定义存储接口，资格评估只依赖该 trait，便于替换持久化实现与 mock 测试。

mod matching;
mod memory;

pub use matching::{fields_match, scope_matches};
pub use memory::MemoryCacheStore;

use crate::error::Result;
use crate::models::{
    CacheEntry, ClientRuleConfig, ContactSnapshot, EvaluationContext, NormalizedRule,
};
use crate::window::{self, DurationSpec};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tokio::sync::OwnedMutexGuard;

/// 额度命中：规则及其窗口内的投递次数
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LimitHit {
    pub rule: NormalizedRule,
    pub count: usize,
}

/// 准入许可
///
/// 持有期间其他准入流程不能并发执行“检查 + 写入”。不需要串行化的存储返回 `unguarded()`。
#[derive(Debug)]
pub struct AdmissionPermit {
    _guard: Option<OwnedMutexGuard<()>>,
}

impl AdmissionPermit {
    pub fn new(guard: OwnedMutexGuard<()>) -> Self {
        Self {
            _guard: Some(guard),
        }
    }

    pub fn unguarded() -> Self {
        Self { _guard: None }
    }

    pub fn is_guarded(&self) -> bool {
        self._guard.is_some()
    }
}

/// 历史投递存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoricalStore: Send + Sync {
    /// 回溯窗口起点
    fn oldest_date_added(
        &self,
        duration: &str,
        timezone: FixedOffset,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        window::oldest_date_added(&DurationSpec::parse(duration)?, timezone, reference)
    }

    /// 独占期结束时间
    fn exclusive_expire_date(
        &self,
        duration: &str,
        timezone: FixedOffset,
        reference: DateTime<Utc>,
    ) -> Result<DateTime<Utc>> {
        window::exclusive_expire_date(&DurationSpec::parse(duration)?, timezone, reference)
    }

    /// 查找仍处于独占期、且按其自身模式与作用域匹配该联系人的条目（任意 client）
    async fn find_exclusive(
        &self,
        snapshot: &ContactSnapshot,
        client: &ClientRuleConfig,
        ctx: &EvaluationContext,
    ) -> Result<Option<CacheEntry>>;

    /// 查找本 client 在规则窗口内与该联系人重复的条目
    async fn find_duplicate(
        &self,
        snapshot: &ContactSnapshot,
        client: &ClientRuleConfig,
        rules: &[NormalizedRule],
        ctx: &EvaluationContext,
    ) -> Result<Option<CacheEntry>>;

    /// 找出第一条窗口内投递次数已达额度的规则
    async fn find_limit(
        &self,
        client: &ClientRuleConfig,
        rules: &[NormalizedRule],
        ctx: &EvaluationContext,
    ) -> Result<Option<LimitHit>>;

    /// 写入一次投递的全部条目
    async fn save_entries(&self, entries: Vec<CacheEntry>) -> Result<()>;

    /// 获取准入许可
    async fn admission_lock(&self) -> AdmissionPermit;

    /// 清空身份映射缓存
    fn clear_identity_cache(&self);
}
