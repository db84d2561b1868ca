//! 相对日期解析：按参考时区的「今天」把 today / tomorrow / next Monday / 明天 / 下周一 等解析为具体日期
//!
//! 用于两处：规范化模型返回的非 ISO dueDate，以及本地兜底提取时从原文中找截止日期。

use std::sync::OnceLock;

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use regex::Regex;

static ISO_RE: OnceLock<Regex> = OnceLock::new();
static IN_N_RE: OnceLock<Regex> = OnceLock::new();
static WEEKDAY_RE: OnceLock<Regex> = OnceLock::new();
static CN_WEEKDAY_RE: OnceLock<Regex> = OnceLock::new();
static CN_IN_N_RE: OnceLock<Regex> = OnceLock::new();

const EN_WEEKDAYS: [(&str, Weekday); 7] = [
    ("monday", Weekday::Mon),
    ("tuesday", Weekday::Tue),
    ("wednesday", Weekday::Wed),
    ("thursday", Weekday::Thu),
    ("friday", Weekday::Fri),
    ("saturday", Weekday::Sat),
    ("sunday", Weekday::Sun),
];

fn en_weekday(s: &str) -> Option<Weekday> {
    let s = s.to_lowercase();
    EN_WEEKDAYS
        .iter()
        .find(|(name, _)| name.starts_with(&s) && s.len() >= 3)
        .map(|(_, wd)| *wd)
}

fn cn_weekday(c: &str) -> Option<Weekday> {
    match c {
        "一" | "1" => Some(Weekday::Mon),
        "二" | "2" => Some(Weekday::Tue),
        "三" | "3" => Some(Weekday::Wed),
        "四" | "4" => Some(Weekday::Thu),
        "五" | "5" => Some(Weekday::Fri),
        "六" | "6" => Some(Weekday::Sat),
        "日" | "天" | "7" => Some(Weekday::Sun),
        _ => None,
    }
}

/// 今天起（含今天）的下一个指定星期几
fn upcoming(today: NaiveDate, wd: Weekday) -> NaiveDate {
    let diff = (wd.num_days_from_monday() as i64 - today.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    today + Duration::days(diff)
}

/// 严格晚于今天的下一个指定星期几（next Monday）
fn strictly_next(today: NaiveDate, wd: Weekday) -> NaiveDate {
    let d = upcoming(today, wd);
    if d == today {
        d + Duration::days(7)
    } else {
        d
    }
}

/// 下周（周一起算）的指定星期几（下周一）
fn in_next_week(today: NaiveDate, wd: Weekday) -> NaiveDate {
    let monday_this_week = today - Duration::days(today.weekday().num_days_from_monday() as i64);
    monday_this_week + Duration::days(7 + wd.num_days_from_monday() as i64)
}

/// today + days；超出日期范围时返回 None
fn add_days(today: NaiveDate, days: i64) -> Option<NaiveDate> {
    today.checked_add_signed(Duration::try_days(days)?)
}

/// 解析一段日期表达（可以是整句，取其中第一个可识别的日期）
pub fn resolve_relative_date(text: &str, today: NaiveDate) -> Option<NaiveDate> {
    let lower = text.to_lowercase();

    let iso = ISO_RE.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("valid regex"));
    if let Some(c) = iso.captures(&lower) {
        let (y, m, d) = (c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?);
        if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
            return Some(date);
        }
    }

    // 中文：后天 / 明天 / 今天 / 下周X / 周X / N天后
    if lower.contains("大后天") {
        return Some(today + Duration::days(3));
    }
    if lower.contains("后天") {
        return Some(today + Duration::days(2));
    }
    if lower.contains("明天") || lower.contains("明早") || lower.contains("明晚") {
        return Some(today + Duration::days(1));
    }
    let cn_wd = CN_WEEKDAY_RE
        .get_or_init(|| Regex::new(r"(下)?(?:周|星期|礼拜)([一二三四五六日天1-7])").expect("valid regex"));
    if let Some(c) = cn_wd.captures(&lower) {
        if let Some(wd) = cn_weekday(&c[2]) {
            return Some(if c.get(1).is_some() {
                in_next_week(today, wd)
            } else {
                upcoming(today, wd)
            });
        }
    }
    if lower.contains("下周") {
        return Some(today + Duration::days(7));
    }
    let cn_in_n = CN_IN_N_RE.get_or_init(|| Regex::new(r"(\d+)\s*(天|周)后").expect("valid regex"));
    if let Some(c) = cn_in_n.captures(&lower) {
        let n: i64 = c[1].parse().ok()?;
        let days = if &c[2] == "周" { n.checked_mul(7)? } else { n };
        return add_days(today, days);
    }
    if lower.contains("今天") || lower.contains("今晚") {
        return Some(today);
    }

    // English
    if lower.contains("day after tomorrow") {
        return Some(today + Duration::days(2));
    }
    if contains_word(&lower, "tomorrow") || contains_word(&lower, "tmr") {
        return Some(today + Duration::days(1));
    }
    let in_n = IN_N_RE.get_or_init(|| Regex::new(r"\bin\s+(\d+)\s+(day|days|week|weeks)\b").expect("valid regex"));
    if let Some(c) = in_n.captures(&lower) {
        let n: i64 = c[1].parse().ok()?;
        let days = if c[2].starts_with("week") { n.checked_mul(7)? } else { n };
        return add_days(today, days);
    }
    let weekday = WEEKDAY_RE.get_or_init(|| {
        Regex::new(r"\b(next|this)?\s*(mon|tue|tues|wed|thu|thur|thurs|fri|sat|sun)(?:day|nesday|rsday|urday|sday)?\b")
            .expect("valid regex")
    });
    if let Some(c) = weekday.captures(&lower) {
        // sat / sun 单独出现多半是普通单词，只认全称
        let bare_weekend = matches!(&c[2], "sat" | "sun") && !c[0].ends_with("day");
        if let Some(wd) = en_weekday(&c[2]).filter(|_| !bare_weekend) {
            return Some(match c.get(1).map(|m| m.as_str()) {
                Some("next") => strictly_next(today, wd),
                _ => upcoming(today, wd),
            });
        }
    }
    if lower.contains("next week") {
        return Some(today + Duration::days(7));
    }
    if contains_word(&lower, "today") || contains_word(&lower, "tonight") {
        return Some(today);
    }
    None
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == word)
}

/// 规范化截止日期字段：空 -> None；ISO 直接解析；其余按相对日期解析
pub fn normalize_due_date(raw: &str, today: NaiveDate) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") || raw.eq_ignore_ascii_case("none") {
        return None;
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%Y-%m-%d") {
        return Some(d);
    }
    resolve_relative_date(raw, today)
}
