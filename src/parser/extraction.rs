//! 提取结果类型：ThoughtExtraction（一条结构化意图）与宽松的原始形态 RawExtraction
//!
//! 模型输出字段名、大小写、取值都不稳定，先反序列化为 RawExtraction（全部可选），
//! 再规范化为强类型的 ThoughtExtraction。

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::parser::dates::normalize_due_date;
use crate::store::{Category, NewTask, Priority, SEARCH_ALL};

/// 兜底标题的最大字符数
pub const FALLBACK_TITLE_CHARS: usize = 50;

/// 意图：每条提取恰好一个
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    #[default]
    NewTask,
    UpdateTask,
    Query,
    DeleteTask,
}

impl Intent {
    pub fn parse_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "new_task" | "new" | "create" | "create_task" | "add" => Some(Intent::NewTask),
            "update_task" | "update" | "edit" => Some(Intent::UpdateTask),
            "query" | "search" | "list" | "query_task" | "query_tasks" => Some(Intent::Query),
            "delete_task" | "delete" | "remove" | "archive" => Some(Intent::DeleteTask),
            _ => None,
        }
    }

    /// 需要 targetTitle 的意图
    pub fn needs_target(&self) -> bool {
        matches!(self, Intent::UpdateTask | Intent::DeleteTask)
    }
}

/// 一条结构化意图
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThoughtExtraction {
    pub title: String,
    pub summary: String,
    pub category: Category,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub assignee: Option<String>,
    pub intent: Intent,
    /// update_task / delete_task 的模糊匹配键
    pub target_title: Option<String>,
    /// query 的检索词；"all" 表示全部未完成记录
    pub search_query: Option<String>,
}

impl ThoughtExtraction {
    /// 本地兜底：取输入前 ~50 个字符作标题的 new_task，并尝试从原文解析截止日期
    pub fn fallback(text: &str, today: NaiveDate) -> Self {
        let one_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut title: String = one_line.chars().take(FALLBACK_TITLE_CHARS).collect();
        if one_line.chars().count() > FALLBACK_TITLE_CHARS {
            title = title.trim_end().to_string();
            title.push('…');
        }
        if title.is_empty() {
            title = "Untitled".to_string();
        }
        Self {
            title,
            summary: one_line,
            category: Category::default(),
            priority: Priority::default(),
            due_date: crate::parser::dates::resolve_relative_date(text, today),
            assignee: None,
            intent: Intent::NewTask,
            target_title: None,
            search_query: None,
        }
    }

    /// 检索词是否为「全部」哨兵
    pub fn is_search_all(&self) -> bool {
        self.search_query
            .as_deref()
            .map(|q| q.eq_ignore_ascii_case(SEARCH_ALL))
            .unwrap_or(false)
    }

    /// 转为新建记录字段
    pub fn to_new_task(&self, thread_key: Option<String>, signature: Option<String>) -> NewTask {
        NewTask {
            title: self.title.clone(),
            summary: self.summary.clone(),
            category: self.category,
            priority: self.priority,
            due_date: self.due_date,
            assignee: self.assignee.clone(),
            context_signature: signature,
            thread_key,
        }
    }
}

/// 模型原始输出（字段全部可选，兼容 camelCase 与 snake_case）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawExtraction {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default, alias = "dueDate", alias = "due")]
    pub due_date: Option<String>,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default, alias = "targetTitle")]
    pub target_title: Option<String>,
    #[serde(default, alias = "searchQuery")]
    pub search_query: Option<String>,
}

fn clean(s: &Option<String>) -> Option<String> {
    s.as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null") && !v.eq_ignore_ascii_case("none"))
        .map(String::from)
}

/// 「全部」的各种说法统一为哨兵 "all"
fn normalize_search_query(q: Option<String>) -> Option<String> {
    q.map(|q| {
        let lower = q.to_lowercase();
        let all_words = ["all", "all tasks", "everything", "*", "所有", "全部", "所有任务", "全部任务"];
        if all_words.contains(&lower.as_str()) {
            SEARCH_ALL.to_string()
        } else {
            q
        }
    })
}

impl RawExtraction {
    /// 是否携带了可用信息（否则视为解析失败）
    pub fn is_meaningful(&self) -> bool {
        clean(&self.title).is_some()
            || clean(&self.target_title).is_some()
            || clean(&self.search_query).is_some()
    }

    /// 规范化为 ThoughtExtraction；source_text 用于补全缺失标题
    pub fn normalize(self, source_text: &str, today: NaiveDate) -> ThoughtExtraction {
        let intent = self
            .intent
            .as_deref()
            .and_then(Intent::parse_loose)
            .unwrap_or_default();
        let mut target_title = clean(&self.target_title);
        let mut search_query = normalize_search_query(clean(&self.search_query));
        let title = clean(&self.title)
            .or_else(|| target_title.clone())
            .or_else(|| search_query.clone())
            .unwrap_or_else(|| ThoughtExtraction::fallback(source_text, today).title);

        if intent.needs_target() && target_title.is_none() {
            target_title = Some(title.clone());
        }
        if intent == Intent::Query && search_query.is_none() {
            search_query = Some(SEARCH_ALL.to_string());
        }

        ThoughtExtraction {
            summary: clean(&self.summary).unwrap_or_else(|| title.clone()),
            title,
            category: self
                .category
                .as_deref()
                .and_then(Category::parse_loose)
                .unwrap_or_default(),
            priority: self
                .priority
                .as_deref()
                .and_then(Priority::parse_loose)
                .unwrap_or_default(),
            due_date: self
                .due_date
                .as_deref()
                .and_then(|d| normalize_due_date(d, today)),
            assignee: clean(&self.assignee),
            intent,
            target_title,
            search_query,
        }
    }
}

/// 从模型返回的 JSON 中取出提取列表：支持顶层数组、{"tasks": [...]}、{"items": [...]}、{"extractions": [...]} 与单个对象
pub fn raw_items(value: Value) -> Vec<RawExtraction> {
    let items = match value {
        Value::Array(arr) => arr,
        Value::Object(mut map) => {
            let list_key = ["tasks", "items", "extractions", "thoughts"]
                .into_iter()
                .find(|k| map.get(*k).map(Value::is_array).unwrap_or(false));
            match list_key.and_then(|k| map.remove(k)) {
                Some(Value::Array(arr)) => arr,
                _ => vec![Value::Object(map)],
            }
        }
        _ => Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawExtraction>(v).ok())
        .filter(RawExtraction::is_meaningful)
        .collect()
}

/// 模型可能在 JSON 顶层附带签名
pub fn signature_field(value: &Value) -> Option<String> {
    ["contextSignature", "context_signature", "signature", "thoughtSignature"]
        .iter()
        .find_map(|k| value.get(*k).and_then(Value::as_str))
        .filter(|s| !s.trim().is_empty())
        .map(String::from)
}
