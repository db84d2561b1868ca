//! 提取模式：结构化解析出若干条意图，按原文顺序逐条处理
//!
//! - new_task：创建记录并给出链接
//! - query：检索后让模型组织回答，模型失败时输出确定性的列表
//! - delete_task：按目标标题检索，全部归档并报告数量
//! - update_task：模糊找到记录，再走线程回复分类器并应用结果
//!
//! 每条独立处理：一条失败或查找未命中只影响它自己那一行。

use std::sync::Arc;

use crate::capture::apply::apply_decision;
use crate::capture::classifier::{TaskSnapshot, ThreadUpdateClassifier};
use crate::capture::status::StatusMessage;
use crate::core::{describe_now, Clock, TaskbeeError};
use crate::integrations::InboundMessage;
use crate::llm::{LlmClient, Message, ThinkingLevel};
use crate::parser::{Intent, StructuredParser, ThoughtExtraction};
use crate::store::{bullet_list, Task, TaskStore, SEARCH_ALL};

const ANSWER_RULES: &str = "You answer questions about the user's task list. Use only the tasks given below; do not invent tasks. Be brief and use Slack mrkdwn bullet lists. Reply in the user's language.";

pub struct ExtractionFlow {
    store: Arc<dyn TaskStore>,
    llm: Arc<dyn LlmClient>,
    clock: Arc<dyn Clock>,
    parser: StructuredParser,
    classifier: Arc<ThreadUpdateClassifier>,
    effort: ThinkingLevel,
}

impl ExtractionFlow {
    pub fn new(
        store: Arc<dyn TaskStore>,
        llm: Arc<dyn LlmClient>,
        clock: Arc<dyn Clock>,
        classifier: Arc<ThreadUpdateClassifier>,
        effort: ThinkingLevel,
    ) -> Self {
        Self {
            parser: StructuredParser::new(llm.clone(), clock.clone()),
            store,
            llm,
            clock,
            classifier,
            effort,
        }
    }

    pub async fn run(
        &self,
        msg: &InboundMessage,
        status: &StatusMessage,
    ) -> Result<String, TaskbeeError> {
        let outcome = self.parser.extract_all(&msg.text, self.effort).await;
        let total = outcome.extractions.len();
        tracing::info!(count = total, degraded = outcome.degraded, "extraction flow started");

        let mut lines = Vec::with_capacity(total);
        for (i, ex) in outcome.extractions.iter().enumerate() {
            if total > 1 {
                status
                    .update(&format!("⏳ Working on {}/{}: {}", i + 1, total, ex.title))
                    .await;
            }
            // 多条时分类器只看本条内容
            let reply = if total > 1 {
                item_reply(ex)
            } else {
                msg.text.as_str()
            };
            let line = match self
                .process_one(ex, msg, reply, &outcome.signature, status)
                .await
            {
                Ok(text) => text,
                Err(TaskbeeError::LookupMiss(m)) => {
                    tracing::warn!(intent = ?ex.intent, "lookup miss: {}", m);
                    format!("⚠️ {}", m)
                }
                Err(e) => {
                    tracing::error!(intent = ?ex.intent, "extraction item failed: {}", e);
                    format!("❌ Couldn't handle *{}*: {}", ex.title, e)
                }
            };
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    async fn process_one(
        &self,
        ex: &ThoughtExtraction,
        msg: &InboundMessage,
        reply: &str,
        signature: &str,
        status: &StatusMessage,
    ) -> Result<String, TaskbeeError> {
        match ex.intent {
            Intent::NewTask => {
                let new_task =
                    ex.to_new_task(Some(msg.thread_root().to_string()), Some(signature.to_string()));
                let created = self.store.create(&new_task).await?;
                let mut text = format!("✅ Created *{}*", ex.title);
                if let Some(due) = ex.due_date {
                    text.push_str(&format!(" (due {})", due));
                }
                text.push_str(&format!(" <{}|open>", created.url));
                Ok(text)
            }
            Intent::Query => {
                let term = ex.search_query.as_deref().unwrap_or(SEARCH_ALL);
                status.update("🔍 Searching tasks…").await;
                let tasks = self.store.search(term).await?;
                Ok(self.answer_query(&msg.text, term, &tasks).await)
            }
            Intent::DeleteTask => {
                let target = ex.target_title.as_deref().unwrap_or(&ex.title);
                let matches = self.store.search_open(target).await?;
                if matches.is_empty() {
                    return Err(TaskbeeError::LookupMiss(format!(
                        "No tasks found matching *{}*.",
                        target
                    )));
                }
                for task in &matches {
                    self.store.archive(&task.id).await?;
                }
                Ok(format!(
                    "🗑️ Archived {} task(s) matching *{}*.",
                    matches.len(),
                    target
                ))
            }
            Intent::UpdateTask => {
                let target = ex.target_title.as_deref().unwrap_or(&ex.title);
                let task = self
                    .store
                    .find_by_fuzzy_title(target)
                    .await?
                    .ok_or_else(|| {
                        TaskbeeError::LookupMiss(format!("No task found matching *{}*.", target))
                    })?;
                let decision = self
                    .classifier
                    .classify(
                        task.context_signature.as_deref(),
                        reply,
                        &TaskSnapshot::from(&task),
                    )
                    .await;
                apply_decision(self.store.as_ref(), &task, &decision, reply).await
            }
        }
    }

    /// 检索结果 -> 回答；模型失败或返回空时输出确定性列表
    async fn answer_query(&self, question: &str, term: &str, tasks: &[Task]) -> String {
        if tasks.is_empty() {
            return if term.eq_ignore_ascii_case(SEARCH_ALL) {
                "🎉 No open tasks.".to_string()
            } else {
                format!("No tasks found matching *{}*.", term)
            };
        }
        let messages = vec![
            Message::system(format!(
                "{}\n\nCurrent time: {}",
                ANSWER_RULES,
                describe_now(&self.clock.now())
            )),
            Message::user(format!(
                "Question: {}\n\nTasks:\n{}",
                question,
                bullet_list(tasks)
            )),
        ];
        match self.llm.complete(&messages, ThinkingLevel::Low).await {
            Ok(c) if !c.text.trim().is_empty() => c.text.trim().to_string(),
            Ok(_) => list_answer(term, tasks),
            Err(e) => {
                tracing::warn!("Answer synthesis failed ({}), listing results", e);
                list_answer(term, tasks)
            }
        }
    }
}

fn list_answer(term: &str, tasks: &[Task]) -> String {
    let header = if term.eq_ignore_ascii_case(SEARCH_ALL) {
        format!("*Open tasks* ({})", tasks.len())
    } else {
        format!("*Tasks matching \"{}\"* ({})", term, tasks.len())
    };
    format!("{}\n{}", header, bullet_list(tasks))
}

fn item_reply(ex: &ThoughtExtraction) -> &str {
    let summary = ex.summary.trim();
    if summary.is_empty() {
        ex.title.trim()
    } else {
        summary
    }
}
