//! 缓存条目构建
//!
//! 一次成功投递生成的条目：每条独占规则一条（带到期时间、模式与作用域），
//! 没有独占规则时生成一条默认条目。同一次投递的条目共享 `delivery_id`。

use crate::error::Result;
use crate::models::{
    CacheEntry, ClientRuleConfig, Contact, ContactSnapshot, EvaluationContext, NormalizedRule,
};
use crate::normalizer::RuleNormalizer;
use crate::store::HistoricalStore;
use gate_shared::observability::metrics;
use std::sync::OnceLock;
use tracing::{debug, instrument};
use uuid::Uuid;

pub struct CacheEntryBuilder<'a, S: HistoricalStore + ?Sized> {
    store: &'a S,
    contact: &'a Contact,
    client: &'a ClientRuleConfig,
    ctx: &'a EvaluationContext,
    default_region: &'a str,
    snapshot: OnceLock<ContactSnapshot>,
}

impl<'a, S: HistoricalStore + ?Sized> CacheEntryBuilder<'a, S> {
    pub fn new(
        store: &'a S,
        contact: &'a Contact,
        client: &'a ClientRuleConfig,
        ctx: &'a EvaluationContext,
        default_region: &'a str,
    ) -> Self {
        Self {
            store,
            contact,
            client,
            ctx,
            default_region,
            snapshot: OnceLock::new(),
        }
    }

    /// 联系人快照（只计算一次）
    pub fn snapshot(&self) -> &ContactSnapshot {
        self.snapshot
            .get_or_init(|| ContactSnapshot::from_contact(self.contact, self.default_region))
    }

    pub fn exclusive_rules(&self) -> Result<Vec<NormalizedRule>> {
        RuleNormalizer::exclusive_rules(self.client, &self.ctx.scope())
    }

    /// 生成本次投递的全部条目
    pub fn build_entries(&self) -> Result<Vec<CacheEntry>> {
        let delivery_id = Uuid::new_v4();
        let rules = self.exclusive_rules()?;

        if rules.is_empty() {
            return Ok(vec![self.base_entry(delivery_id)]);
        }

        rules
            .iter()
            .map(|rule| {
                let expire = self.store.exclusive_expire_date(
                    &rule.duration,
                    self.ctx.timezone,
                    self.ctx.send_date,
                )?;
                let mut entry = self.base_entry(delivery_id);
                entry.exclusive_expire_date = Some(expire);
                entry.exclusive_pattern = Some(rule.matching);
                entry.exclusive_scope = Some(rule.scope);
                Ok(entry)
            })
            .collect()
    }

    /// 构建并写入存储，随后清空存储的身份映射
    #[instrument(skip(self), fields(client_id = self.client.id, contact_id = self.contact.id))]
    pub async fn persist(&self) -> Result<Vec<CacheEntry>> {
        let entries = self.build_entries()?;
        self.store.save_entries(entries.clone()).await?;
        self.store.clear_identity_cache();

        metrics::record_cache_entries_saved(entries.len());
        debug!(count = entries.len(), "cache entries saved");
        Ok(entries)
    }

    fn base_entry(&self, delivery_id: Uuid) -> CacheEntry {
        CacheEntry {
            id: Uuid::new_v4(),
            delivery_id,
            client_id: self.client.id,
            snapshot: self.snapshot().clone(),
            category_id: self.ctx.category_id,
            utm_source: self.ctx.utm_source.clone(),
            date_added: self.ctx.send_date,
            exclusive_expire_date: None,
            exclusive_pattern: None,
            exclusive_scope: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchingMask, Scope};
    use crate::store::MemoryCacheStore;
    use chrono::{Duration, FixedOffset, TimeZone, Utc};
    use serde_json::json;

    fn ctx() -> EvaluationContext {
        EvaluationContext {
            send_date: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            timezone: FixedOffset::east_opt(0).unwrap(),
            utm_source: Some("google".to_string()),
            category_id: Some(4),
        }
    }

    fn contact() -> Contact {
        Contact {
            id: 7,
            email: Some(" a@example.com ".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_default_entry_without_exclusive_rules() {
        let store = MemoryCacheStore::new();
        let client = ClientRuleConfig {
            id: 3,
            category_id: Some(4),
            ..Default::default()
        };
        let (contact, ctx) = (contact(), ctx());
        let builder = CacheEntryBuilder::new(&store, &contact, &client, &ctx, "US");

        let entries = builder.build_entries().unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.client_id, 3);
        assert_eq!(entry.snapshot.email.as_deref(), Some("a@example.com"));
        assert_eq!(entry.category_id, Some(4));
        assert_eq!(entry.utm_source.as_deref(), Some("google"));
        assert_eq!(entry.exclusive_expire_date, None);
    }

    #[test]
    fn test_one_entry_per_exclusive_rule() {
        let store = MemoryCacheStore::new();
        let client = ClientRuleConfig {
            id: 3,
            exclusive: json!({"rules": [
                {"scope": 1, "duration": "P1D", "matching": 2},
                {"scope": 4, "duration": "P7D", "value": "google", "matching": 1}
            ]})
            .to_string(),
            ..Default::default()
        };
        let (contact, ctx) = (contact(), ctx());
        let builder = CacheEntryBuilder::new(&store, &contact, &client, &ctx, "US");

        let entries = builder.build_entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].delivery_id, entries[1].delivery_id);
        assert_ne!(entries[0].id, entries[1].id);

        // 按键降序：P7D 在前
        assert_eq!(entries[0].exclusive_scope, Some(Scope::UtmSource));
        assert_eq!(entries[0].exclusive_pattern, Some(MatchingMask::EXPLICIT));
        assert_eq!(
            entries[0].exclusive_expire_date,
            Some(ctx.send_date + Duration::days(7))
        );
        assert_eq!(entries[1].exclusive_pattern, Some(MatchingMask::EMAIL));
        assert_eq!(
            entries[1].exclusive_expire_date,
            Some(ctx.send_date + Duration::days(1))
        );
    }

    #[test]
    fn test_persist_saves_and_clears_identity_cache() {
        let store = MemoryCacheStore::new();
        let client = ClientRuleConfig {
            id: 3,
            ..Default::default()
        };
        let (contact, ctx) = (contact(), ctx());
        let builder = CacheEntryBuilder::new(&store, &contact, &client, &ctx, "US");

        let saved = tokio_test::block_on(builder.persist()).unwrap();

        assert_eq!(saved.len(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.identity_cache_len(), 0);
        assert_eq!(store.entries_for_client(3), saved);
    }

    #[test]
    fn test_snapshot_is_memoized() {
        let store = MemoryCacheStore::new();
        let client = ClientRuleConfig::default();
        let (contact, ctx) = (contact(), ctx());
        let builder = CacheEntryBuilder::new(&store, &contact, &client, &ctx, "US");

        assert!(std::ptr::eq(builder.snapshot(), builder.snapshot()));
    }
}
