//! 投递目标配置与单次评估上下文

use crate::error::Result;
use crate::models::Contact;
use crate::window::parse_timezone;
use chrono::{DateTime, FixedOffset, Utc};
use gate_shared::config::EligibilityConfig;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// 投递目标（client）的规则配置，由外部配置源提供，只读
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientRuleConfig {
    pub id: i64,
    /// 独占规则 JSON
    #[serde(default, deserialize_with = "rule_blob")]
    pub exclusive: String,
    /// 重复规则 JSON
    #[serde(default, deserialize_with = "rule_blob")]
    pub duplicate: String,
    /// 额度规则 JSON
    #[serde(default, deserialize_with = "rule_blob")]
    pub limits: String,
    /// 为 true 时跳过独占检查
    #[serde(default)]
    pub exclusive_ignore: bool,
    #[serde(default)]
    pub category_id: Option<i64>,
    /// 时区覆盖（固定偏移）；缺省使用全局配置
    #[serde(default)]
    pub timezone: Option<String>,
}

/// 规则字段既可以是 JSON 字符串，也可以直接内嵌为对象
fn rule_blob<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(raw) => raw,
        other => other.to_string(),
    })
}

/// 规则无关性过滤所需的作用域信息
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScopeContext<'a> {
    pub utm_source: Option<&'a str>,
    pub category_id: Option<i64>,
}

/// 单次评估上下文
///
/// 发送时间与时区在一次评估开始时确定，后续所有窗口计算都基于它，
/// 保证多步判断的一致性。
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationContext {
    pub send_date: DateTime<Utc>,
    pub timezone: FixedOffset,
    /// 联系人的首个 UTM 来源
    pub utm_source: Option<String>,
    /// 投递目标的分类
    pub category_id: Option<i64>,
}

impl EvaluationContext {
    /// 解析本次评估的上下文
    ///
    /// 时区优先使用 client 覆盖值；覆盖值无效时记录警告并回落到全局默认值，
    /// 全局默认值无效则返回错误。`send_date` 为空时取当前时间。
    pub fn resolve(
        contact: &Contact,
        client: &ClientRuleConfig,
        send_date: Option<DateTime<Utc>>,
        config: &EligibilityConfig,
    ) -> Result<Self> {
        let timezone = match client.timezone.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => match parse_timezone(raw) {
                Ok(tz) => tz,
                Err(err) => {
                    warn!(client_id = client.id, timezone = raw, error = %err, "client timezone ignored");
                    parse_timezone(&config.default_timezone)?
                }
            },
            _ => parse_timezone(&config.default_timezone)?,
        };

        Ok(Self {
            send_date: send_date.unwrap_or_else(Utc::now),
            timezone,
            utm_source: contact.first_utm_source(),
            category_id: client.category_id,
        })
    }

    pub fn scope(&self) -> ScopeContext<'_> {
        ScopeContext {
            utm_source: self.utm_source.as_deref(),
            category_id: self.category_id,
        }
    }
}

/// 检查通过
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Eligible {
    /// 已检查且无冲突
    Clear,
    /// 按配置跳过（如 exclusive_ignore）
    Ignored,
}
