//! 联系人及其规范化快照

use crate::phone;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// UTM 标签（联系人的来源记录）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtmTag {
    pub source: Option<String>,
    pub date_added: DateTime<Utc>,
}

/// 联系人（只读输入）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: i64,
    #[serde(default)]
    pub address1: Option<String>,
    #[serde(default)]
    pub address2: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub zipcode: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub mobile: Option<String>,
    #[serde(default)]
    pub utm_tags: Vec<UtmTag>,
}

impl Contact {
    /// 最早记录的非空 UTM 来源
    pub fn first_utm_source(&self) -> Option<String> {
        self.utm_tags
            .iter()
            .filter_map(|tag| {
                let source = tag.source.as_deref()?.trim();
                (!source.is_empty()).then_some((tag.date_added, source))
            })
            .min_by_key(|(date_added, _)| *date_added)
            .map(|(_, source)| source.to_string())
    }
}

/// 联系人身份属性的规范化快照
///
/// 地址类字段按单词首字母大写后去除首尾空白；邮编与邮箱只去空白；
/// 电话与手机规范化为 E.164，无法解析时省略。空值一律为 None。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSnapshot {
    pub contact_id: i64,
    pub address1: Option<String>,
    pub address2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub zipcode: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub mobile: Option<String>,
}

impl ContactSnapshot {
    pub fn from_contact(contact: &Contact, default_region: &str) -> Self {
        Self {
            contact_id: contact.id,
            address1: title_trimmed(contact.address1.as_deref()),
            address2: title_trimmed(contact.address2.as_deref()),
            city: title_trimmed(contact.city.as_deref()),
            state: title_trimmed(contact.state.as_deref()),
            country: title_trimmed(contact.country.as_deref()),
            zipcode: trimmed(contact.zipcode.as_deref()),
            email: trimmed(contact.email.as_deref()),
            phone: contact
                .phone
                .as_deref()
                .and_then(|raw| phone::canonicalize(raw, default_region)),
            mobile: contact
                .mobile
                .as_deref()
                .and_then(|raw| phone::canonicalize(raw, default_region)),
        }
    }

    /// 地址相关字段，按匹配顺序
    pub fn address_fields(&self) -> [Option<&str>; 6] {
        [
            self.address1.as_deref(),
            self.address2.as_deref(),
            self.city.as_deref(),
            self.state.as_deref(),
            self.zipcode.as_deref(),
            self.country.as_deref(),
        ]
    }
}

fn trimmed(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn title_trimmed(value: Option<&str>) -> Option<String> {
    trimmed(value).map(|value| title_case(&value))
}

/// 每个单词的首字母大写，其余字符保持原样
fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut at_word_start = true;
    for c in value.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = c.is_whitespace();
    }
    out
}
