//! 内存历史存储
//!
//! 按 client 分区的 DashMap 实现，适用于测试、开发环境与单进程部署。

use super::{fields_match, scope_matches, AdmissionPermit, HistoricalStore, LimitHit};
use crate::error::Result;
use crate::models::{
    CacheEntry, ClientRuleConfig, ContactSnapshot, EvaluationContext, NormalizedRule, Scope,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// 内存历史存储
#[derive(Debug, Default, Clone)]
pub struct MemoryCacheStore {
    /// client_id -> 该 client 的全部条目
    partitions: Arc<DashMap<i64, Vec<CacheEntry>>>,
    /// 最近写入条目的身份映射
    identity: Arc<Mutex<HashMap<Uuid, CacheEntry>>>,
    admission: Arc<tokio::sync::Mutex<()>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置历史条目
    pub fn with_entries(entries: impl IntoIterator<Item = CacheEntry>) -> Self {
        let store = Self::new();
        store.insert_history(entries);
        store
    }

    /// 直接写入历史条目，不经过身份映射
    pub fn insert_history(&self, entries: impl IntoIterator<Item = CacheEntry>) {
        for entry in entries {
            self.partitions.entry(entry.client_id).or_default().push(entry);
        }
    }

    /// 按 ID 查找：先查身份映射，再扫描分区
    pub fn entry(&self, id: Uuid) -> Option<CacheEntry> {
        if let Some(entry) = self.identity.lock().get(&id) {
            return Some(entry.clone());
        }
        self.partitions
            .iter()
            .find_map(|partition| partition.value().iter().find(|e| e.id == id).cloned())
    }

    pub fn entries_for_client(&self, client_id: i64) -> Vec<CacheEntry> {
        self.partitions
            .get(&client_id)
            .map(|partition| partition.value().clone())
            .unwrap_or_default()
    }

    pub fn identity_cache_len(&self) -> usize {
        self.identity.lock().len()
    }

    /// 条目总数
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 本 client 在规则窗口与作用域内的条目
    fn windowed<'a>(
        &self,
        partition: &'a [CacheEntry],
        rule: &NormalizedRule,
        client: &ClientRuleConfig,
        ctx: &EvaluationContext,
    ) -> Result<impl Iterator<Item = &'a CacheEntry> + use<'a>> {
        let oldest = self.oldest_date_added(&rule.duration, ctx.timezone, ctx.send_date)?;
        let scope = rule.scope;
        let category_id = client.category_id;
        let utm_source = ctx.utm_source.clone();

        Ok(partition.iter().filter(move |entry| {
            entry.date_added >= oldest
                && scope_matches(scope, entry, category_id, utm_source.as_deref())
        }))
    }
}

#[async_trait]
impl HistoricalStore for MemoryCacheStore {
    async fn find_exclusive(
        &self,
        snapshot: &ContactSnapshot,
        client: &ClientRuleConfig,
        ctx: &EvaluationContext,
    ) -> Result<Option<CacheEntry>> {
        let found = self
            .partitions
            .iter()
            .flat_map(|partition| {
                partition
                    .value()
                    .iter()
                    .filter(|entry| entry.is_exclusive_at(ctx.send_date))
                    .filter(|entry| {
                        let pattern = entry.exclusive_pattern.unwrap_or_default();
                        let scope = entry.exclusive_scope.unwrap_or(Scope::Global);
                        scope_matches(scope, entry, client.category_id, ctx.utm_source.as_deref())
                            && fields_match(pattern, snapshot, &entry.snapshot)
                    })
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .max_by_key(|entry| entry.date_added);

        Ok(found)
    }

    async fn find_duplicate(
        &self,
        snapshot: &ContactSnapshot,
        client: &ClientRuleConfig,
        rules: &[NormalizedRule],
        ctx: &EvaluationContext,
    ) -> Result<Option<CacheEntry>> {
        let Some(partition) = self.partitions.get(&client.id) else {
            return Ok(None);
        };

        for rule in rules {
            let found = self
                .windowed(partition.value(), rule, client, ctx)?
                .find(|entry| fields_match(rule.matching, snapshot, &entry.snapshot));
            if let Some(entry) = found {
                debug!(client_id = client.id, entry_id = %entry.id, duration = %rule.duration, "duplicate entry found");
                return Ok(Some(entry.clone()));
            }
        }
        Ok(None)
    }

    async fn find_limit(
        &self,
        client: &ClientRuleConfig,
        rules: &[NormalizedRule],
        ctx: &EvaluationContext,
    ) -> Result<Option<LimitHit>> {
        // 没有历史的 client 计数为 0，额度为 0 的规则依然命中
        let partition = self.partitions.get(&client.id);
        let history: &[CacheEntry] = partition.as_deref().map_or(&[], Vec::as_slice);

        for rule in rules {
            let Some(quantity) = rule.quantity else {
                continue;
            };
            // 一次投递可能写入多条条目，按 delivery_id 计数
            let count = self
                .windowed(history, rule, client, ctx)?
                .map(|entry| entry.delivery_id)
                .collect::<HashSet<_>>()
                .len();

            if count >= quantity as usize {
                return Ok(Some(LimitHit {
                    rule: rule.clone(),
                    count,
                }));
            }
        }
        Ok(None)
    }

    async fn save_entries(&self, entries: Vec<CacheEntry>) -> Result<()> {
        {
            let mut identity = self.identity.lock();
            for entry in &entries {
                identity.insert(entry.id, entry.clone());
            }
        }
        self.insert_history(entries);
        Ok(())
    }

    async fn admission_lock(&self) -> AdmissionPermit {
        AdmissionPermit::new(Arc::clone(&self.admission).lock_owned().await)
    }

    fn clear_identity_cache(&self) {
        self.identity.lock().clear();
    }
}
