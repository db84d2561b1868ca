//! 结构化解析器：自由文本 -> 一条或多条 ThoughtExtraction
//!
//! 每次调用都把参考时区的当前时间写进 prompt，让模型按它解析相对日期；
//! 模型输出依次走策略链，全部失败时落到本地兜底（多条提取路径上永不报错）。

use std::sync::Arc;

use crate::core::{describe_now, fallback_signature, Clock, TaskbeeError};
use crate::llm::{LlmClient, Message, ThinkingLevel};
use crate::parser::extraction::{raw_items, signature_field, RawExtraction, ThoughtExtraction};
use crate::parser::list_items::split_list_items;
use crate::parser::strategies::extract_json;

/// 多条提取的结果
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    /// 按原文出现顺序
    pub extractions: Vec<ThoughtExtraction>,
    pub signature: String,
    /// 是否走了本地兜底
    pub degraded: bool,
}

const EXTRACTION_RULES: &str = r#"You turn chat messages into task-manager intents.

Return ONLY JSON of the form {"tasks": [ ... ]}. Each element:
{
  "title": "short imperative title",
  "summary": "one sentence",
  "category": "Work" | "Personal" | "Idea" | "Health",
  "priority": "P1" | "P2" | "P3",
  "dueDate": "YYYY-MM-DD" or "",
  "assignee": "name" or null,
  "intent": "new_task" | "update_task" | "query" | "delete_task",
  "targetTitle": "title of the existing task" or null,
  "searchQuery": "search text" or null
}

Rules:
- If the message contains several bulleted, numbered or line-separated items, emit one element per item, in order. Never merge items.
- Exactly one intent per element.
- update_task / delete_task must set targetTitle to the existing task being referred to.
- query: set searchQuery to the name, project or person being asked about; use "all" when the user asks for every open task.
- Resolve relative dates (today, tomorrow, next Monday, 明天, 下周一) against the current time below, never your own notion of now.
- Default priority P2, default category Work."#;

/// 结构化解析器
pub struct StructuredParser {
    llm: Arc<dyn LlmClient>,
    clock: Arc<dyn Clock>,
}

impl StructuredParser {
    pub fn new(llm: Arc<dyn LlmClient>, clock: Arc<dyn Clock>) -> Self {
        Self { llm, clock }
    }

    fn prompt(&self, text: &str) -> Vec<Message> {
        let now = describe_now(&self.clock.now());
        let items = split_list_items(text);
        let hint = if items.len() > 1 {
            format!("\n\nThe message contains {} separate items.", items.len())
        } else {
            String::new()
        };
        vec![
            Message::system(format!("{}\n\nCurrent time: {}{}", EXTRACTION_RULES, now, hint)),
            Message::user(text.to_string()),
        ]
    }

    /// 本地兜底：每个列表项一条 new_task（单项输入即一条）
    fn fallback(&self, text: &str) -> Vec<ThoughtExtraction> {
        let today = self.clock.today();
        let items = split_list_items(text);
        if items.is_empty() {
            return vec![ThoughtExtraction::fallback(text, today)];
        }
        items
            .iter()
            .map(|item| ThoughtExtraction::fallback(item, today))
            .collect()
    }

    /// 多条提取：永不返回错误，失败时降级为本地兜底
    pub async fn extract_all(&self, text: &str, level: ThinkingLevel) -> ParseOutcome {
        let today = self.clock.today();
        let completion = match self.llm.complete(&self.prompt(text), level).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Extraction provider failed ({}), using local fallback", e);
                return ParseOutcome {
                    extractions: self.fallback(text),
                    signature: fallback_signature(text, None),
                    degraded: true,
                };
            }
        };

        let parsed = extract_json(&completion.text).map(|(value, strategy)| {
            let sig = signature_field(&value);
            let items: Vec<ThoughtExtraction> = raw_items(value)
                .into_iter()
                .map(|raw| raw.normalize(text, today))
                .collect();
            (items, sig, strategy)
        });

        match parsed {
            Some((items, sig, strategy)) if !items.is_empty() => {
                let expected = split_list_items(text).len();
                if expected > 1 && items.len() != expected {
                    tracing::warn!(
                        "Extraction count {} differs from detected list items {}",
                        items.len(),
                        expected
                    );
                }
                tracing::info!(count = items.len(), strategy, "extraction parsed");
                ParseOutcome {
                    extractions: items,
                    signature: completion
                        .signature
                        .or(sig)
                        .unwrap_or_else(|| fallback_signature(text, None)),
                    degraded: false,
                }
            }
            _ => {
                tracing::warn!(
                    "Extraction output not decodable, using local fallback: {}",
                    preview(&completion.text)
                );
                ParseOutcome {
                    extractions: self.fallback(text),
                    signature: completion
                        .signature
                        .unwrap_or_else(|| fallback_signature(text, None)),
                    degraded: true,
                }
            }
        }
    }

    /// 单条提取：取第一条结果；模型不可达时报错，输出不可解析时本地兜底。
    /// 兜底签名带时间戳，两次相同文本的调用也不会复用签名。
    pub async fn extract_one(
        &self,
        text: &str,
        level: ThinkingLevel,
    ) -> Result<(ThoughtExtraction, String), TaskbeeError> {
        let today = self.clock.today();
        let completion = self.llm.complete(&self.prompt(text), level).await?;
        let stamp = Some(self.clock.now().timestamp_millis());

        let first = extract_json(&completion.text).and_then(|(value, _)| {
            let sig = signature_field(&value);
            raw_items(value)
                .into_iter()
                .next()
                .map(|raw: RawExtraction| (raw.normalize(text, today), sig))
        });
        let (extraction, sig) = match first {
            Some(found) => found,
            None => {
                tracing::warn!("Single extraction not decodable, using local fallback");
                (ThoughtExtraction::fallback(text, today), None)
            }
        };
        let signature = completion
            .signature
            .or(sig)
            .unwrap_or_else(|| fallback_signature(text, stamp));
        Ok((extraction, signature))
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s.to_string()
    }
}
