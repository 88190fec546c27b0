//! 缓存条目与规范化规则

use crate::models::{ContactSnapshot, MatchingMask, Scope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 缓存条目
///
/// 创建时归 `CacheEntryBuilder` 所有，持久化后归历史存储所有，之后不可变。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: Uuid,
    /// 同一次投递生成的条目共享此 ID（每条独占规则一条）
    pub delivery_id: Uuid,
    pub client_id: i64,
    #[serde(flatten)]
    pub snapshot: ContactSnapshot,
    pub category_id: Option<i64>,
    pub utm_source: Option<String>,
    /// 发送时间
    pub date_added: DateTime<Utc>,
    #[serde(default)]
    pub exclusive_expire_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exclusive_pattern: Option<MatchingMask>,
    #[serde(default)]
    pub exclusive_scope: Option<Scope>,
}

impl CacheEntry {
    /// 独占期在 `at` 之后才结束
    pub fn is_exclusive_at(&self, at: DateTime<Utc>) -> bool {
        self.exclusive_expire_date.is_some_and(|expire| expire > at)
    }
}

/// 规范化规则的标识键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub duration: String,
    pub scope: Scope,
    pub value: String,
}

impl RuleKey {
    /// 排序用的字符串形式 `duration-scope-value`
    pub fn sort_key(&self) -> String {
        format!("{}-{}-{}", self.duration, self.scope.code(), self.value)
    }
}

/// 规范化后的 exclusive / duplicate / limits 规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedRule {
    pub scope: Scope,
    pub duration: String,
    pub value: String,
    pub matching: MatchingMask,
    #[serde(default)]
    pub quantity: Option<u32>,
}

impl NormalizedRule {
    pub fn key(&self) -> RuleKey {
        RuleKey {
            duration: self.duration.clone(),
            scope: self.scope,
            value: self.value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entry_json_is_flat() {
        let entry = CacheEntry {
            id: Uuid::new_v4(),
            delivery_id: Uuid::new_v4(),
            client_id: 3,
            snapshot: ContactSnapshot {
                contact_id: 11,
                email: Some("a@example.com".to_string()),
                ..Default::default()
            },
            category_id: None,
            utm_source: Some("google".to_string()),
            date_added: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            exclusive_expire_date: None,
            exclusive_pattern: Some(MatchingMask::EMAIL),
            exclusive_scope: Some(Scope::Global),
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["contact_id"], 11);
        assert_eq!(json["email"], "a@example.com");
        assert_eq!(json["exclusive_pattern"], 2);
        assert_eq!(json["exclusive_scope"], 1);

        let back: CacheEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_is_exclusive_at() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut entry = CacheEntry {
            id: Uuid::new_v4(),
            delivery_id: Uuid::new_v4(),
            client_id: 1,
            snapshot: ContactSnapshot::default(),
            category_id: None,
            utm_source: None,
            date_added: now,
            exclusive_expire_date: None,
            exclusive_pattern: None,
            exclusive_scope: None,
        };
        assert!(!entry.is_exclusive_at(now));

        entry.exclusive_expire_date = Some(now + chrono::Duration::hours(1));
        assert!(entry.is_exclusive_at(now));
        assert!(!entry.is_exclusive_at(now + chrono::Duration::hours(1)));
    }

    #[test]
    fn test_sort_key() {
        let key = RuleKey {
            duration: "P1D".to_string(),
            scope: Scope::UtmSource,
            value: "google".to_string(),
        };
        assert_eq!(key.sort_key(), "P1D-4-google");
    }
}
