//! 摘要任务：morning_digest（今天到期/已逾期 + 全部 P1）与 evening_review（按状态分组的未完成任务）

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;

use crate::config::DigestJobConfig;
use crate::core::TaskbeeError;
use crate::store::{bullet_list, Priority, Task, TaskStatus};

pub const MORNING_DIGEST: &str = "morning_digest";
pub const EVENING_REVIEW: &str = "evening_review";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestKind {
    MorningDigest,
    EveningReview,
}

impl DigestKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim() {
            MORNING_DIGEST => Some(DigestKind::MorningDigest),
            EVENING_REVIEW => Some(DigestKind::EveningReview),
            _ => None,
        }
    }
}

/// 一个每日定时任务
#[derive(Debug, Clone, PartialEq)]
pub struct DigestJob {
    pub name: String,
    pub kind: DigestKind,
    /// 参考时区的触发时刻
    pub at: NaiveTime,
}

impl DigestJob {
    pub fn from_config(cfg: &DigestJobConfig) -> Result<Self, TaskbeeError> {
        let kind = DigestKind::from_name(&cfg.name).ok_or_else(|| {
            TaskbeeError::Config(format!("unknown digest job '{}'", cfg.name))
        })?;
        let at = NaiveTime::parse_from_str(cfg.time.trim(), "%H:%M").map_err(|e| {
            TaskbeeError::Config(format!("digest job '{}': bad time '{}': {}", cfg.name, cfg.time, e))
        })?;
        Ok(Self {
            name: cfg.name.clone(),
            kind,
            at,
        })
    }
}

/// 严格晚于 now 的下一次触发时间（夏令时跳过的时刻顺延到下一天）
pub fn next_fire(at: NaiveTime, now: DateTime<Tz>) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = tz.from_local_datetime(&date.and_time(at)).earliest() {
            if candidate > now {
                return candidate;
            }
        }
        date += Duration::days(1);
    }
    now + Duration::days(1)
}

/// 渲染摘要文本（tasks 为全部未完成记录）
pub fn render(kind: DigestKind, tasks: &[Task], today: NaiveDate) -> String {
    match kind {
        DigestKind::MorningDigest => render_morning(tasks, today),
        DigestKind::EveningReview => render_evening(tasks, today),
    }
}

fn render_morning(tasks: &[Task], today: NaiveDate) -> String {
    let due: Vec<Task> = tasks
        .iter()
        .filter(|t| t.due_date.map(|d| d <= today).unwrap_or(false))
        .cloned()
        .collect();
    let urgent: Vec<Task> = tasks
        .iter()
        .filter(|t| t.priority == Priority::P1 && !due.iter().any(|d| d.id == t.id))
        .cloned()
        .collect();
    if due.is_empty() && urgent.is_empty() {
        return format!("☀️ *Good morning!* Nothing due on {}. 🎉", today);
    }
    let mut sections = vec![format!("☀️ *Good morning!* Here's what needs attention on {}:", today)];
    if !due.is_empty() {
        sections.push(format!("*Due today or overdue* ({})\n{}", due.len(), bullet_list(&due)));
    }
    if !urgent.is_empty() {
        sections.push(format!("*P1* ({})\n{}", urgent.len(), bullet_list(&urgent)));
    }
    sections.join("\n\n")
}

fn render_evening(tasks: &[Task], today: NaiveDate) -> String {
    if tasks.is_empty() {
        return format!("🌙 *Evening review* ({}): all clear, no open tasks. 🎉", today);
    }
    let mut sections = vec![format!(
        "🌙 *Evening review* ({}): {} open task(s)",
        today,
        tasks.len()
    )];
    for status in [TaskStatus::InProgress, TaskStatus::Todo] {
        let group: Vec<Task> = tasks.iter().filter(|t| t.status == status).cloned().collect();
        if !group.is_empty() {
            sections.push(format!("*{}* ({})\n{}", status, group.len(), bullet_list(&group)));
        }
    }
    sections.join("\n\n")
}
