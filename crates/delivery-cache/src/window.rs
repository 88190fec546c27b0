//! 时间窗口
//!
//! 两种写法：
//! - `P` 开头为 ISO-8601 滚动窗口（`P1D`、`PT12H`、`P1M`），从参考时间直接回推；
//! - 不带 `P` 的为日历对齐窗口（`1D`、`1W`、`1M`、`1Y`），先锚定到下一个日历单位的起点，
//!   再回推 n 个单位，因此 `1D` 表示“本地今天零点以来”。
//!
//! 周以周一为起点。时区只支持固定偏移，不加载时区数据库。

use crate::error::{CacheError, Result};
use chrono::{
    DateTime, Datelike, Days, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, TimeZone,
    Utc,
};
use regex::Regex;
use std::sync::LazyLock;

static ROLLING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$")
        .unwrap()
});

static CALENDAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)([YMWD])$").unwrap());

static OFFSET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([+-])(\d{2}):?(\d{2})?$").unwrap());

/// 日历单位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarUnit {
    Day,
    Week,
    Month,
    Year,
}

/// 解析后的时间窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationSpec {
    /// 滚动窗口
    Rolling {
        years: u32,
        months: u32,
        weeks: u32,
        days: u32,
        hours: u32,
        minutes: u32,
        seconds: u32,
    },
    /// 日历对齐窗口
    Calendar { unit: CalendarUnit, count: u32 },
}

impl DurationSpec {
    pub fn parse(raw: &str) -> Result<Self> {
        let normalized = raw.trim().to_ascii_uppercase();
        let invalid = || CacheError::InvalidDuration(raw.to_string());

        if let Some(caps) = ROLLING_RE.captures(&normalized) {
            // "P" 与 "PT" 本身没有任何分量
            if normalized == "P" || normalized.ends_with('T') {
                return Err(invalid());
            }
            let part = |i: usize| -> Result<u32> {
                caps.get(i)
                    .map(|m| m.as_str().parse::<u32>().map_err(|_| invalid()))
                    .unwrap_or(Ok(0))
            };
            return Ok(Self::Rolling {
                years: part(1)?,
                months: part(2)?,
                weeks: part(3)?,
                days: part(4)?,
                hours: part(5)?,
                minutes: part(6)?,
                seconds: part(7)?,
            });
        }

        if let Some(caps) = CALENDAR_RE.captures(&normalized) {
            let count: u32 = caps[1].parse().map_err(|_| invalid())?;
            if count == 0 {
                return Err(invalid());
            }
            let unit = match &caps[2] {
                "D" => CalendarUnit::Day,
                "W" => CalendarUnit::Week,
                "M" => CalendarUnit::Month,
                _ => CalendarUnit::Year,
            };
            return Ok(Self::Calendar { unit, count });
        }

        Err(invalid())
    }

    pub fn is_calendar_aligned(&self) -> bool {
        matches!(self, Self::Calendar { .. })
    }
}

/// 解析固定偏移时区：`UTC`、`GMT`、`Z`、`+05:00`、`-0800`、`+05`
pub fn parse_timezone(raw: &str) -> Result<FixedOffset> {
    let trimmed = raw.trim();
    let invalid = || CacheError::InvalidTimezone(raw.to_string());

    if matches!(trimmed.to_ascii_uppercase().as_str(), "UTC" | "GMT" | "Z") {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let caps = OFFSET_RE.captures(trimmed).ok_or_else(invalid)?;
    let hours: i32 = caps[2].parse().map_err(|_| invalid())?;
    let minutes: i32 = caps
        .get(3)
        .map(|m| m.as_str().parse().map_err(|_| invalid()))
        .transpose()?
        .unwrap_or(0);
    if hours > 14 || minutes > 59 {
        return Err(invalid());
    }

    let seconds = (hours * 3600 + minutes * 60) * if &caps[1] == "-" { -1 } else { 1 };
    FixedOffset::east_opt(seconds).ok_or_else(invalid)
}

/// 回溯窗口的起点（含）
pub fn oldest_date_added(
    spec: &DurationSpec,
    timezone: FixedOffset,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let local = reference.with_timezone(&timezone);

    match *spec {
        DurationSpec::Rolling { .. } => shift(local, spec, Direction::Back),
        DurationSpec::Calendar { unit, count } => {
            let anchor = next_unit_start(local.date_naive(), unit)?;
            let start = step_date(anchor, unit, count, Direction::Back)?;
            at_local_midnight(start, timezone)
        }
    }
}

/// 独占期结束时间
///
/// 滚动窗口为参考时间加上时长；日历对齐窗口在当前日历单位（含之后 n-1 个单位）结束时到期。
pub fn exclusive_expire_date(
    spec: &DurationSpec,
    timezone: FixedOffset,
    reference: DateTime<Utc>,
) -> Result<DateTime<Utc>> {
    let local = reference.with_timezone(&timezone);

    match *spec {
        DurationSpec::Rolling { .. } => shift(local, spec, Direction::Forward),
        DurationSpec::Calendar { unit, count } => {
            let anchor = next_unit_start(local.date_naive(), unit)?;
            let end = step_date(anchor, unit, count - 1, Direction::Forward)?;
            at_local_midnight(end, timezone)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Back,
    Forward,
}

fn overflow() -> CacheError {
    CacheError::InvalidDuration("时间窗口超出可表示范围".to_string())
}

/// 滚动窗口平移：先按月（年折算为月），再按天与时分秒
fn shift(
    local: DateTime<FixedOffset>,
    spec: &DurationSpec,
    direction: Direction,
) -> Result<DateTime<Utc>> {
    let DurationSpec::Rolling {
        years,
        months,
        weeks,
        days,
        hours,
        minutes,
        seconds,
    } = *spec
    else {
        return Err(overflow());
    };

    let total_months = Months::new(years.saturating_mul(12).saturating_add(months));
    let total_days = Days::new(u64::from(weeks) * 7 + u64::from(days));
    let clock = Duration::hours(i64::from(hours))
        + Duration::minutes(i64::from(minutes))
        + Duration::seconds(i64::from(seconds));

    let shifted = match direction {
        Direction::Back => local
            .checked_sub_months(total_months)
            .and_then(|t| t.checked_sub_days(total_days))
            .and_then(|t| t.checked_sub_signed(clock)),
        Direction::Forward => local
            .checked_add_months(total_months)
            .and_then(|t| t.checked_add_days(total_days))
            .and_then(|t| t.checked_add_signed(clock)),
    };

    shifted.map(|t| t.with_timezone(&Utc)).ok_or_else(overflow)
}

/// 下一个日历单位的起始日期
fn next_unit_start(date: NaiveDate, unit: CalendarUnit) -> Result<NaiveDate> {
    let next = match unit {
        CalendarUnit::Day => date.checked_add_days(Days::new(1)),
        CalendarUnit::Week => {
            let until_monday = 7 - u64::from(date.weekday().num_days_from_monday());
            date.checked_add_days(Days::new(until_monday))
        }
        CalendarUnit::Month => date
            .with_day(1)
            .and_then(|first| first.checked_add_months(Months::new(1))),
        CalendarUnit::Year => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1),
    };
    next.ok_or_else(overflow)
}

fn step_date(
    date: NaiveDate,
    unit: CalendarUnit,
    count: u32,
    direction: Direction,
) -> Result<NaiveDate> {
    let stepped = match (unit, direction) {
        (CalendarUnit::Day, Direction::Back) => date.checked_sub_days(Days::new(u64::from(count))),
        (CalendarUnit::Day, Direction::Forward) => {
            date.checked_add_days(Days::new(u64::from(count)))
        }
        (CalendarUnit::Week, Direction::Back) => {
            date.checked_sub_days(Days::new(u64::from(count) * 7))
        }
        (CalendarUnit::Week, Direction::Forward) => {
            date.checked_add_days(Days::new(u64::from(count) * 7))
        }
        (CalendarUnit::Month, Direction::Back) => date.checked_sub_months(Months::new(count)),
        (CalendarUnit::Month, Direction::Forward) => date.checked_add_months(Months::new(count)),
        (CalendarUnit::Year, Direction::Back) => {
            date.checked_sub_months(Months::new(count.saturating_mul(12)))
        }
        (CalendarUnit::Year, Direction::Forward) => {
            date.checked_add_months(Months::new(count.saturating_mul(12)))
        }
    };
    stepped.ok_or_else(overflow)
}

fn at_local_midnight(date: NaiveDate, timezone: FixedOffset) -> Result<DateTime<Utc>> {
    let midnight: NaiveDateTime = date.and_hms_opt(0, 0, 0).ok_or_else(overflow)?;
    timezone
        .from_local_datetime(&midnight)
        .single()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn tz(raw: &str) -> FixedOffset {
        parse_timezone(raw).unwrap()
    }

    #[test]
    fn test_parse_rolling() {
        assert_eq!(
            DurationSpec::parse("P1DT12H").unwrap(),
            DurationSpec::Rolling {
                years: 0,
                months: 0,
                weeks: 0,
                days: 1,
                hours: 12,
                minutes: 0,
                seconds: 0
            }
        );
        assert!(matches!(
            DurationSpec::parse("P1M").unwrap(),
            DurationSpec::Rolling { months: 1, .. }
        ));
        assert!(matches!(
            DurationSpec::parse("PT30M").unwrap(),
            DurationSpec::Rolling { minutes: 30, .. }
        ));
    }

    #[test]
    fn test_parse_calendar() {
        assert_eq!(
            DurationSpec::parse("1D").unwrap(),
            DurationSpec::Calendar {
                unit: CalendarUnit::Day,
                count: 1
            }
        );
        assert_eq!(
            DurationSpec::parse(" 2w ").unwrap(),
            DurationSpec::Calendar {
                unit: CalendarUnit::Week,
                count: 2
            }
        );
        assert!(DurationSpec::parse("1D").unwrap().is_calendar_aligned());
    }

    #[test]
    fn test_parse_invalid() {
        for raw in ["", "P", "PT", "0D", "1H", "1D2W", "P1X", "tomorrow"] {
            assert!(
                matches!(DurationSpec::parse(raw), Err(CacheError::InvalidDuration(_))),
                "{raw} should be invalid"
            );
        }
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(tz("UTC").local_minus_utc(), 0);
        assert_eq!(tz("Z").local_minus_utc(), 0);
        assert_eq!(tz("+05:30").local_minus_utc(), 5 * 3600 + 30 * 60);
        assert_eq!(tz("-0800").local_minus_utc(), -8 * 3600);
        assert_eq!(tz("+09").local_minus_utc(), 9 * 3600);
        assert!(parse_timezone("Europe/Paris").is_err());
        assert!(parse_timezone("+25:00").is_err());
    }

    #[test]
    fn test_rolling_window() {
        let reference = utc(2024, 3, 15, 10, 30);
        let spec = DurationSpec::parse("P1D").unwrap();

        assert_eq!(
            oldest_date_added(&spec, tz("UTC"), reference).unwrap(),
            utc(2024, 3, 14, 10, 30)
        );
        assert_eq!(
            exclusive_expire_date(&spec, tz("UTC"), reference).unwrap(),
            utc(2024, 3, 16, 10, 30)
        );
    }

    #[test]
    fn test_rolling_month_clamps_to_month_end() {
        let spec = DurationSpec::parse("P1M").unwrap();
        assert_eq!(
            oldest_date_added(&spec, tz("UTC"), utc(2024, 3, 31, 0, 0)).unwrap(),
            utc(2024, 2, 29, 0, 0)
        );
    }

    #[test]
    fn test_calendar_day_starts_at_local_midnight() {
        let spec = DurationSpec::parse("1D").unwrap();
        // 本地时间 2024-03-15 05:30 (-05:00)
        let reference = utc(2024, 3, 15, 10, 30);

        assert_eq!(
            oldest_date_added(&spec, tz("-05:00"), reference).unwrap(),
            utc(2024, 3, 15, 5, 0)
        );
        assert_eq!(
            exclusive_expire_date(&spec, tz("-05:00"), reference).unwrap(),
            utc(2024, 3, 16, 5, 0)
        );
    }

    #[test]
    fn test_calendar_day_follows_local_date() {
        let spec = DurationSpec::parse("1D").unwrap();
        // UTC 已经是 3 月 16 日，但 -05:00 本地仍是 3 月 15 日晚上
        let reference = utc(2024, 3, 16, 2, 0);

        assert_eq!(
            oldest_date_added(&spec, tz("-05:00"), reference).unwrap(),
            utc(2024, 3, 15, 5, 0)
        );
    }

    #[test]
    fn test_calendar_week_starts_monday() {
        let spec = DurationSpec::parse("1W").unwrap();
        // 2024-03-14 是周四
        let reference = utc(2024, 3, 14, 12, 0);

        assert_eq!(
            oldest_date_added(&spec, tz("UTC"), reference).unwrap(),
            utc(2024, 3, 11, 0, 0)
        );
        assert_eq!(
            exclusive_expire_date(&spec, tz("UTC"), reference).unwrap(),
            utc(2024, 3, 18, 0, 0)
        );
    }

    #[test]
    fn test_calendar_month_and_year() {
        let reference = utc(2024, 3, 14, 12, 0);

        let month = DurationSpec::parse("2M").unwrap();
        assert_eq!(
            oldest_date_added(&month, tz("UTC"), reference).unwrap(),
            utc(2024, 2, 1, 0, 0)
        );
        assert_eq!(
            exclusive_expire_date(&month, tz("UTC"), reference).unwrap(),
            utc(2024, 5, 1, 0, 0)
        );

        let year = DurationSpec::parse("1Y").unwrap();
        assert_eq!(
            oldest_date_added(&year, tz("UTC"), reference).unwrap(),
            utc(2024, 1, 1, 0, 0)
        );
        assert_eq!(
            exclusive_expire_date(&year, tz("UTC"), reference).unwrap(),
            utc(2025, 1, 1, 0, 0)
        );
    }
}
