//! 条目匹配规则（各存储实现共用）

use crate::models::{CacheEntry, ContactSnapshot, MatchingMask, Scope};

/// 条目是否落在作用域内
///
/// Global 不限；Category 要求条目分类等于 client 分类；
/// UtmSource 要求条目 UTM 来源等于联系人的 UTM 来源。上下文缺值时不匹配。
pub fn scope_matches(
    scope: Scope,
    entry: &CacheEntry,
    category_id: Option<i64>,
    utm_source: Option<&str>,
) -> bool {
    match scope {
        Scope::Global => true,
        Scope::Category => category_id.is_some() && entry.category_id == category_id,
        Scope::UtmSource => utm_source.is_some_and(|utm| entry.utm_source.as_deref() == Some(utm)),
    }
}

/// 按掩码比较联系人快照与历史条目
///
/// 所有选中且来访联系人非空的字段都必须相等；没有可比较字段时视为不匹配。
pub fn fields_match(mask: MatchingMask, incoming: &ContactSnapshot, entry: &ContactSnapshot) -> bool {
    let mut compared = 0usize;

    if mask.contains(MatchingMask::EXPLICIT) {
        if incoming.contact_id != entry.contact_id {
            return false;
        }
        compared += 1;
    }

    let checks: [(MatchingMask, Option<&str>, Option<&str>, bool); 3] = [
        (MatchingMask::EMAIL, incoming.email.as_deref(), entry.email.as_deref(), true),
        (MatchingMask::PHONE, incoming.phone.as_deref(), entry.phone.as_deref(), false),
        (MatchingMask::MOBILE, incoming.mobile.as_deref(), entry.mobile.as_deref(), false),
    ];
    for (flag, mine, theirs, ignore_case) in checks {
        if !mask.contains(flag) {
            continue;
        }
        let Some(mine) = mine else { continue };
        if !same(mine, theirs, ignore_case) {
            return false;
        }
        compared += 1;
    }

    if mask.contains(MatchingMask::ADDRESS) {
        for (mine, theirs) in incoming.address_fields().into_iter().zip(entry.address_fields()) {
            let Some(mine) = mine else { continue };
            if !same(mine, theirs, true) {
                return false;
            }
            compared += 1;
        }
    }

    compared > 0
}

fn same(mine: &str, theirs: Option<&str>, ignore_case: bool) -> bool {
    match theirs {
        Some(theirs) if ignore_case => mine.eq_ignore_ascii_case(theirs),
        Some(theirs) => mine == theirs,
        None => false,
    }
}
