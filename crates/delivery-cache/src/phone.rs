//! 电话号码规范化（E.164）
//!
//! 基于 libphonenumber 元数据：带 `+` 的号码按国际格式解析，
//! 其余号码按默认地区解析。无法解析或不是有效号码时返回 None，调用方直接省略该字段。

use phonenumber::{Mode, country};

/// 将原始号码规范化为 E.164
pub fn canonicalize(raw: &str, default_region: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let region = default_region.trim().to_ascii_uppercase().parse::<country::Id>().ok();
    let number = phonenumber::parse(region, trimmed).ok()?;
    if !phonenumber::is_valid(&number) {
        return None;
    }

    Some(number.format().mode(Mode::E164).to_string())
}
