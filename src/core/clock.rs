//! 参考时区时钟
//!
//! 相对日期（今天、明天、下周一）一律按调用方提供的「当前时间」在固定参考时区内解析，
//! 不依赖模型自己对 now 的理解。测试用 FixedClock 固定时间。

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

/// 时钟 trait：返回参考时区下的当前时间
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Tz>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }

    fn timezone(&self) -> Tz {
        self.now().timezone()
    }
}

/// 系统时钟：UTC 当前时间换算到参考时区
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }
}

/// 固定时钟（测试用）
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    now: DateTime<Tz>,
}

impl FixedClock {
    pub fn new(now: DateTime<Tz>) -> Self {
        Self { now }
    }

    /// 参考时区某天的 09:00
    pub fn on_date(tz: Tz, date: NaiveDate) -> Self {
        let naive = date.and_hms_opt(9, 0, 0).unwrap_or_default();
        let now = tz
            .from_local_datetime(&naive)
            .earliest()
            .unwrap_or_else(|| tz.from_utc_datetime(&naive));
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Tz> {
        self.now
    }
}

/// 解析 IANA 时区名，失败时回退 UTC 并告警
pub fn parse_timezone(name: &str) -> Tz {
    name.parse::<Tz>().unwrap_or_else(|_| {
        tracing::warn!("Unknown timezone {:?}, falling back to UTC", name);
        Tz::UTC
    })
}

/// 嵌入 prompt 的当前时间描述，如 "2025-01-10 (Friday) 09:00 Asia/Shanghai"
pub fn describe_now(now: &DateTime<Tz>) -> String {
    format!(
        "{} ({}) {} {}",
        now.format("%Y-%m-%d"),
        now.format("%A"),
        now.format("%H:%M"),
        now.timezone().name()
    )
}
