//! 投递资格评估
//!
//! 依次执行独占、重复、额度三项检查；任一冲突即返回
//! [`EligibilityError::Conflict`]。所有存储调用都受 `store_timeout` 约束。

use crate::builder::CacheEntryBuilder;
use crate::error::{CacheError, Conflict, EligibilityError};
use crate::models::{
    CacheEntry, ClientRuleConfig, Contact, ContactSnapshot, Eligible, EvaluationContext, RuleType,
};
use crate::normalizer::RuleNormalizer;
use crate::store::HistoricalStore;
use chrono::{DateTime, Utc};
use gate_shared::config::EligibilityConfig;
use gate_shared::observability::metrics;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

type Result<T> = std::result::Result<T, EligibilityError>;

/// 资格评估器
pub struct Eligibility<S: HistoricalStore + ?Sized> {
    store: Arc<S>,
    config: EligibilityConfig,
}

impl<S: HistoricalStore + ?Sized> Eligibility<S> {
    pub fn new(store: Arc<S>, config: EligibilityConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// 解析单次评估上下文，`send_date` 为空时取当前时间
    pub fn context(
        &self,
        contact: &Contact,
        client: &ClientRuleConfig,
        send_date: Option<DateTime<Utc>>,
    ) -> std::result::Result<EvaluationContext, CacheError> {
        EvaluationContext::resolve(contact, client, send_date, &self.config)
    }

    /// 独占检查
    ///
    /// client 设置了 `exclusive_ignore` 时直接跳过。
    #[instrument(skip_all, fields(client_id = client.id, contact_id = contact.id))]
    pub async fn check_exclusive(
        &self,
        contact: &Contact,
        client: &ClientRuleConfig,
        ctx: &EvaluationContext,
    ) -> Result<Eligible> {
        if client.exclusive_ignore {
            debug!("client 忽略独占规则");
            metrics::record_eligibility_check(RuleType::Exclusive.as_str(), "skipped");
            return Ok(Eligible::Ignored);
        }

        let snapshot = self.snapshot(contact);
        let found = self
            .bounded("find_exclusive", self.store.find_exclusive(&snapshot, client, ctx))
            .await;

        self.conclude(RuleType::Exclusive, found.map(|hit| hit.map(Conflict::exclusive)))
    }

    /// 重复检查
    #[instrument(skip_all, fields(client_id = client.id, contact_id = contact.id))]
    pub async fn check_duplicate(
        &self,
        contact: &Contact,
        client: &ClientRuleConfig,
        ctx: &EvaluationContext,
    ) -> Result<Eligible> {
        let rules = self.rules(RuleType::Duplicate, RuleNormalizer::duplicate_rules(client))?;
        if rules.is_empty() {
            metrics::record_eligibility_check(RuleType::Duplicate.as_str(), "eligible");
            return Ok(Eligible::Clear);
        }

        let snapshot = self.snapshot(contact);
        let found = self
            .bounded(
                "find_duplicate",
                self.store.find_duplicate(&snapshot, client, &rules, ctx),
            )
            .await;

        self.conclude(RuleType::Duplicate, found.map(|hit| hit.map(Conflict::duplicate)))
    }

    /// 额度检查
    #[instrument(skip_all, fields(client_id = client.id))]
    pub async fn check_limits(
        &self,
        client: &ClientRuleConfig,
        ctx: &EvaluationContext,
    ) -> Result<Eligible> {
        let rules = self.rules(
            RuleType::Limits,
            RuleNormalizer::limit_rules(client, &ctx.scope()),
        )?;
        if rules.is_empty() {
            metrics::record_eligibility_check(RuleType::Limits.as_str(), "eligible");
            return Ok(Eligible::Clear);
        }

        let found = self
            .bounded("find_limit", self.store.find_limit(client, &rules, ctx))
            .await;

        self.conclude(RuleType::Limits, found.map(|hit| hit.map(Conflict::limits)))
    }

    /// 依次执行独占、重复、额度检查，遇到第一个冲突即返回
    pub async fn check_all(
        &self,
        contact: &Contact,
        client: &ClientRuleConfig,
        ctx: &EvaluationContext,
    ) -> Result<()> {
        self.check_exclusive(contact, client, ctx).await?;
        self.check_duplicate(contact, client, ctx).await?;
        self.check_limits(client, ctx).await?;
        Ok(())
    }

    /// 准入：检查通过后写入缓存条目
    ///
    /// 检查与写入在准入许可内完成，并发投递不会同时通过同一额度。
    #[instrument(skip_all, fields(client_id = client.id, contact_id = contact.id))]
    pub async fn admit(
        &self,
        contact: &Contact,
        client: &ClientRuleConfig,
        send_date: Option<DateTime<Utc>>,
    ) -> Result<Vec<CacheEntry>> {
        let ctx = self.context(contact, client, send_date)?;

        let store = Arc::clone(&self.store);
        let _permit = self
            .bounded("admission_lock", async move { Ok(store.admission_lock().await) })
            .await?;

        self.check_all(contact, client, &ctx).await?;

        let builder = CacheEntryBuilder::new(
            self.store.as_ref(),
            contact,
            client,
            &ctx,
            &self.config.default_phone_region,
        );
        let entries = self.bounded("save_entries", builder.persist()).await?;

        info!(entries = entries.len(), "联系人已准入");
        Ok(entries)
    }

    fn snapshot(&self, contact: &Contact) -> ContactSnapshot {
        ContactSnapshot::from_contact(contact, &self.config.default_phone_region)
    }

    /// 规则解析失败计为 error
    fn rules<T>(
        &self,
        rule_type: RuleType,
        parsed: std::result::Result<T, CacheError>,
    ) -> std::result::Result<T, CacheError> {
        parsed.inspect_err(|err| {
            warn!(rule_type = rule_type.as_str(), error = %err, "规则解析失败");
            metrics::record_eligibility_check(rule_type.as_str(), "error");
        })
    }

    /// 把存储查询结果转换为检查结果并记录指标
    fn conclude(
        &self,
        rule_type: RuleType,
        found: std::result::Result<Option<Conflict>, CacheError>,
    ) -> Result<Eligible> {
        match found {
            Ok(None) => {
                metrics::record_eligibility_check(rule_type.as_str(), "eligible");
                Ok(Eligible::Clear)
            }
            Ok(Some(conflict)) => {
                info!(rule_type = rule_type.as_str(), status = conflict.status_code, "投递冲突");
                metrics::record_eligibility_check(rule_type.as_str(), "conflict");
                Err(conflict.into())
            }
            Err(err) => {
                warn!(rule_type = rule_type.as_str(), error = %err, "资格检查失败");
                metrics::record_eligibility_check(rule_type.as_str(), "error");
                Err(err.into())
            }
        }
    }

    /// 为单次存储调用加上超时
    async fn bounded<T, F>(&self, operation: &str, call: F) -> std::result::Result<T, CacheError>
    where
        F: Future<Output = std::result::Result<T, CacheError>>,
    {
        let timeout = self.config.store_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, timeout_ms = self.config.store_timeout_ms, "历史存储调用超时");
                metrics::record_store_timeout(operation);
                Err(CacheError::StoreTimeout {
                    operation: operation.to_string(),
                    timeout_ms: self.config.store_timeout_ms,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchingMask, NormalizedRule, Scope};
    use crate::store::{LimitHit, MockHistoricalStore};
    use chrono::TimeZone;
    use serde_json::json;
    use uuid::Uuid;

    fn send_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn contact() -> Contact {
        Contact {
            id: 10,
            email: Some("a@example.com".to_string()),
            ..Default::default()
        }
    }

    fn client() -> ClientRuleConfig {
        ClientRuleConfig {
            id: 1,
            duplicate: json!({"rules": [{"scope": 1, "duration": "P1D", "matching": 2}]}).to_string(),
            limits: json!({"rules": [{"scope": 1, "duration": "P1D", "quantity": 3}]}).to_string(),
            ..Default::default()
        }
    }

    fn cached_entry() -> CacheEntry {
        CacheEntry {
            id: Uuid::new_v4(),
            delivery_id: Uuid::new_v4(),
            client_id: 2,
            snapshot: ContactSnapshot {
                contact_id: 10,
                ..Default::default()
            },
            category_id: None,
            utm_source: None,
            date_added: send_date(),
            exclusive_expire_date: None,
            exclusive_pattern: None,
            exclusive_scope: None,
        }
    }

    fn eligibility(store: MockHistoricalStore) -> Eligibility<MockHistoricalStore> {
        Eligibility::new(Arc::new(store), EligibilityConfig::default())
    }

    fn ctx(eligibility: &Eligibility<MockHistoricalStore>) -> EvaluationContext {
        eligibility
            .context(&contact(), &client(), Some(send_date()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_exclusive_conflict() {
        let mut store = MockHistoricalStore::new();
        store
            .expect_find_exclusive()
            .times(1)
            .returning(|_, _, _| Ok(Some(cached_entry())));
        let eligibility = eligibility(store);
        let ctx = ctx(&eligibility);

        let err = eligibility
            .check_exclusive(&contact(), &client(), &ctx)
            .await
            .unwrap_err();

        let conflict = err.as_conflict().unwrap();
        assert_eq!(conflict.message, "Skipping exclusive Contact.");
        assert_eq!(conflict.status_code, 409);
        assert_eq!(err.code(), "EXCLUSIVE_CONFLICT");
    }

    #[tokio::test]
    async fn test_exclusive_ignore_skips_store() {
        let mut store = MockHistoricalStore::new();
        store.expect_find_exclusive().never();
        let eligibility = eligibility(store);
        let ctx = ctx(&eligibility);
        let client = ClientRuleConfig {
            exclusive_ignore: true,
            ..client()
        };

        let result = eligibility.check_exclusive(&contact(), &client, &ctx).await;
        assert_eq!(result.unwrap(), Eligible::Ignored);
    }

    #[tokio::test]
    async fn test_duplicate_passes_normalized_rules() {
        let mut store = MockHistoricalStore::new();
        store
            .expect_find_duplicate()
            .withf(|snapshot, client, rules, _| {
                snapshot.email.as_deref() == Some("a@example.com")
                    && client.id == 1
                    && rules.len() == 1
                    && rules[0].matching == MatchingMask::EMAIL
            })
            .times(1)
            .returning(|_, _, _, _| Ok(Some(cached_entry())));
        let eligibility = eligibility(store);
        let ctx = ctx(&eligibility);

        let err = eligibility
            .check_duplicate(&contact(), &client(), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_CONFLICT");
        assert_eq!(err.as_conflict().unwrap().message, "Skipping duplicate Contact.");
    }

    #[tokio::test]
    async fn test_no_duplicate_rules_skip_store() {
        let mut store = MockHistoricalStore::new();
        store.expect_find_duplicate().never();
        let eligibility = eligibility(store);
        let ctx = ctx(&eligibility);
        let client = ClientRuleConfig {
            duplicate: String::new(),
            ..client()
        };

        let result = eligibility.check_duplicate(&contact(), &client, &ctx).await;
        assert_eq!(result.unwrap(), Eligible::Clear);
    }

    #[tokio::test]
    async fn test_limit_conflict_is_429() {
        let mut store = MockHistoricalStore::new();
        store.expect_find_limit().times(1).returning(|_, rules, _| {
            Ok(Some(LimitHit {
                rule: rules[0].clone(),
                count: 3,
            }))
        });
        let eligibility = eligibility(store);
        let ctx = ctx(&eligibility);

        let err = eligibility.check_limits(&client(), &ctx).await.unwrap_err();
        let conflict = err.as_conflict().unwrap();
        assert_eq!(conflict.status_code, 429);
        assert_eq!(
            conflict.message,
            "Not able to send contact to client due to an exceeded budget."
        );
        assert_eq!(err.code(), "LIMIT_EXCEEDED");
    }

    #[tokio::test]
    async fn test_malformed_rules_are_errors() {
        let eligibility = eligibility(MockHistoricalStore::new());
        let ctx = ctx(&eligibility);
        let client = ClientRuleConfig {
            limits: "{oops".to_string(),
            ..client()
        };

        let err = eligibility.check_limits(&client, &ctx).await.unwrap_err();
        assert_eq!(err.code(), "RULE_PARSE_ERROR");
        assert!(err.as_conflict().is_none());
    }

    #[tokio::test]
    async fn test_store_failure_is_not_a_conflict() {
        let mut store = MockHistoricalStore::new();
        store
            .expect_find_limit()
            .returning(|_, _, _| Err(CacheError::Store("connection reset".to_string())));
        let eligibility = eligibility(store);
        let ctx = ctx(&eligibility);

        let err = eligibility.check_limits(&client(), &ctx).await.unwrap_err();
        assert!(err.as_conflict().is_none());
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_check_all_stops_at_first_conflict() {
        let mut store = MockHistoricalStore::new();
        store
            .expect_find_exclusive()
            .returning(|_, _, _| Ok(None));
        store
            .expect_find_duplicate()
            .returning(|_, _, _, _| Ok(Some(cached_entry())));
        store.expect_find_limit().never();
        let eligibility = eligibility(store);
        let ctx = ctx(&eligibility);

        let err = eligibility
            .check_all(&contact(), &client(), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.as_conflict().unwrap().rule_type, RuleType::Duplicate);
    }

    #[tokio::test]
    async fn test_admit_persists_after_checks() {
        let mut store = MockHistoricalStore::new();
        store
            .expect_admission_lock()
            .times(1)
            .returning(crate::store::AdmissionPermit::unguarded);
        store.expect_find_exclusive().returning(|_, _, _| Ok(None));
        store.expect_find_duplicate().returning(|_, _, _, _| Ok(None));
        store.expect_find_limit().returning(|_, _, _| Ok(None));
        store
            .expect_save_entries()
            .withf(|entries| entries.len() == 1 && entries[0].client_id == 1)
            .times(1)
            .returning(|_| Ok(()));
        store.expect_clear_identity_cache().times(1).return_const(());
        let eligibility = eligibility(store);

        let entries = eligibility
            .admit(&contact(), &client(), Some(send_date()))
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].date_added, send_date());
    }

    #[tokio::test]
    async fn test_slow_store_times_out() {
        let store = MockHistoricalStore::new();
        let config = EligibilityConfig {
            store_timeout_ms: 5,
            ..Default::default()
        };
        let eligibility = Eligibility::new(Arc::new(store), config);

        let slow = async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok::<_, CacheError>(())
        };
        let err = eligibility.bounded("find_limit", slow).await.unwrap_err();
        assert!(matches!(err, CacheError::StoreTimeout { timeout_ms: 5, .. }));

        let rule = NormalizedRule {
            scope: Scope::Global,
            duration: "P1D".to_string(),
            value: String::new(),
            matching: MatchingMask::default(),
            quantity: Some(1),
        };
        let ok = eligibility
            .bounded("find_limit", async { Ok::<_, CacheError>(rule.clone()) })
            .await
            .unwrap();
        assert_eq!(ok, rule);
    }
}
