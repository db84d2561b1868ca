//! 任务记录类型：Task / NewTask / TaskFilter，以及分类、优先级、状态枚举

use std::collections::HashSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 任务分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Category {
    #[default]
    Work,
    Personal,
    Idea,
    Health,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Work => "Work",
            Category::Personal => "Personal",
            Category::Idea => "Idea",
            Category::Health => "Health",
        }
    }

    /// 宽松解析（大小写不敏感），无法识别时返回 None
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "work" | "工作" => Some(Category::Work),
            "personal" | "个人" | "生活" => Some(Category::Personal),
            "idea" | "想法" | "灵感" => Some(Category::Idea),
            "health" | "健康" => Some(Category::Health),
            _ => None,
        }
    }
}

/// 任务优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    P1,
    P2,
    P3,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::P2
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::P1 => "P1",
            Priority::P2 => "P2",
            Priority::P3 => "P3",
        }
    }

    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "P1" | "HIGH" | "URGENT" => Some(Priority::P1),
            "P2" | "MEDIUM" | "NORMAL" => Some(Priority::P2),
            "P3" | "LOW" => Some(Priority::P3),
            _ => None,
        }
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TaskStatus {
    #[default]
    Todo,
    #[serde(rename = "In Progress")]
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "Todo",
            TaskStatus::InProgress => "In Progress",
            TaskStatus::Done => "Done",
        }
    }

    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(['_', '-'], " ").as_str() {
            "todo" | "to do" | "not started" => Some(TaskStatus::Todo),
            "in progress" | "doing" | "started" => Some(TaskStatus::InProgress),
            "done" | "completed" | "complete" | "finished" => Some(TaskStatus::Done),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, TaskStatus::Done)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 外部记录存储中的一条任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: TaskStatus,
    pub assignee: Option<String>,
    /// 跨轮携带的不透明上下文签名
    pub context_signature: Option<String>,
    /// 关联的会话线程标识
    pub thread_key: Option<String>,
    /// 记录的可访问地址（如 Notion 页面 URL）
    pub url: Option<String>,
}

impl Task {
    /// 一行摘要，供工具结果与摘要推送使用
    pub fn one_line(&self) -> String {
        let mut line = format!("{} [{} · {}]", self.title, self.status, self.priority.as_str());
        if let Some(due) = self.due_date {
            line.push_str(&format!(" due {}", due));
        }
        if let Some(a) = &self.assignee {
            line.push_str(&format!(" @{}", a));
        }
        line
    }
}

/// 渲染为项目符号列表，每条一行
pub fn bullet_list(tasks: &[Task]) -> String {
    tasks
        .iter()
        .map(|t| format!("• {}", t.one_line()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 创建任务所需字段
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub summary: String,
    pub category: Category,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub assignee: Option<String>,
    pub context_signature: Option<String>,
    pub thread_key: Option<String>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }
}

/// 创建结果：记录 id 与定位地址
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedTask {
    pub id: String,
    pub url: String,
}

/// 查询条件（各条件为 AND 关系）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    /// 仅未完成（状态不为 Done）
    pub open_only: bool,
    /// 截止日期不晚于该日（无截止日期的记录不匹配）
    pub due_on_or_before: Option<NaiveDate>,
    /// 标题或负责人包含该文本（大小写不敏感）
    pub text: Option<String>,
    pub priority: Option<Priority>,
}

impl TaskFilter {
    pub fn open() -> Self {
        Self {
            open_only: true,
            ..Default::default()
        }
    }

    pub fn text(term: impl Into<String>) -> Self {
        Self {
            text: Some(term.into()),
            ..Default::default()
        }
    }

    /// 本地判定（内存存储与测试使用；Notion 侧翻译为服务端 filter）
    pub fn matches(&self, task: &Task) -> bool {
        if self.open_only && !task.status.is_open() {
            return false;
        }
        if let Some(limit) = self.due_on_or_before {
            match task.due_date {
                Some(d) if d <= limit => {}
                _ => return false,
            }
        }
        if let Some(p) = self.priority {
            if task.priority != p {
                return false;
            }
        }
        if let Some(term) = &self.text {
            let term = term.to_lowercase();
            let in_title = task.title.to_lowercase().contains(&term);
            let in_assignee = task
                .assignee
                .as_deref()
                .map(|a| a.to_lowercase().contains(&term))
                .unwrap_or(false);
            if !in_title && !in_assignee {
                return false;
            }
        }
        true
    }
}

/// 切分为小写词集合（中文按字切分，保证模糊匹配对中文标题也有效）
fn tokenize_lower(s: &str) -> HashSet<String> {
    let mut tokens = HashSet::new();
    for word in s.split(|c: char| !c.is_alphanumeric()) {
        if word.is_empty() {
            continue;
        }
        if word.chars().any(|c| c > '\u{2E80}') {
            tokens.extend(word.chars().map(|c| c.to_string()));
        } else if word.chars().count() > 1 {
            tokens.insert(word.to_lowercase());
        }
    }
    tokens
}

/// 标题相似度：词集合 Jaccard，0.0 ~ 1.0；包含关系直接记 1.0
pub fn title_similarity(query: &str, title: &str) -> f64 {
    let q = query.trim().to_lowercase();
    let t = title.trim().to_lowercase();
    if q.is_empty() || t.is_empty() {
        return 0.0;
    }
    if t.contains(&q) {
        return 1.0;
    }
    let a = tokenize_lower(&q);
    let b = tokenize_lower(&t);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(&b).count() as f64;
    let union = a.union(&b).count() as f64;
    inter / union
}

/// 模糊匹配最低分
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.3;

/// 在候选中选出与 query 最接近的任务（低于阈值返回 None）
pub fn best_fuzzy_match<'a>(query: &str, candidates: &'a [Task]) -> Option<&'a Task> {
    candidates
        .iter()
        .map(|t| (title_similarity(query, &t.title), t))
        .filter(|(score, _)| *score >= FUZZY_MATCH_THRESHOLD)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(_, t)| t)
}
