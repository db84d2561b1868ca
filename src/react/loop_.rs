//! 智能体主循环
//!
//! ProviderTurn -> (有工具调用? -> 依次执行工具 -> ProviderTurn | -> 结束)。
//! 同一轮里的多个工具调用按收到的顺序串行执行：后一个调用可能依赖前一个的结果（如刚创建的记录 id）。
//! 工具失败以 {"error": ...} 回填给模型；只有提供方调用本身失败才向上返回错误。

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::core::{describe_now, Clock, TaskbeeError};
use crate::llm::{LlmClient, Message, ToolDeclaration};
use crate::react::events::LoopEvent;
use crate::tools::{ToolContext, ToolDispatcher, ToolResult};

/// 默认最多调用提供方的轮数
pub const DEFAULT_MAX_ITERATIONS: usize = 5;
/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

const STYLE_RULES: &str = r#"You are a task assistant living in a team chat. You manage the user's task list only through the tools provided.

Rules:
- Always look tasks up with search_tasks before updating, noting or archiving them; use the ids it returns, never invent ids.
- To delete tasks use archive_tasks. Nothing is ever hard-deleted.
- When the user lists several items, create one task per item.
- Resolve relative dates (today, tomorrow, next Monday, 明天, 下周一) against the current time below and pass dueDate as YYYY-MM-DD.
- If a request is ambiguous, ask one short clarifying question instead of guessing.
- If a tool returns an error, tell the user plainly what failed.
- Reply in the user's language. Keep answers short; use Slack mrkdwn (*bold*, bullet lists). Confirm what you did, with task titles."#;

/// 循环结果
#[derive(Debug, Clone)]
pub struct LoopOutcome {
    /// 给用户的最终文本（保证非空）
    pub reply: String,
    /// 实际调用提供方的轮数
    pub iterations: usize,
    /// 执行过的工具调用数
    pub tool_calls: usize,
    /// 是否因达到上限而结束
    pub cap_reached: bool,
}

fn send_event(tx: Option<&UnboundedSender<LoopEvent>>, ev: LoopEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!("{}...", s.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>())
    } else {
        s.to_string()
    }
}

/// 智能体循环控制器
pub struct AgenticLoop {
    llm: Arc<dyn LlmClient>,
    dispatcher: Arc<ToolDispatcher>,
    clock: Arc<dyn Clock>,
    max_iterations: usize,
}

impl AgenticLoop {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        dispatcher: Arc<ToolDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            llm,
            dispatcher,
            clock,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// 设置轮数上限（至少 1）
    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = n.max(1);
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    fn system_prompt(&self, tools: &[ToolDeclaration]) -> String {
        let tool_lines: Vec<String> = tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect();
        format!(
            "{}\n\nAvailable tools:\n{}\n\nCurrent time: {}",
            STYLE_RULES,
            tool_lines.join("\n"),
            describe_now(&self.clock.now())
        )
    }

    /// 执行一次完整循环；对话只存在于本次调用内
    pub async fn run(
        &self,
        text: &str,
        ctx: &ToolContext,
        event_tx: Option<&UnboundedSender<LoopEvent>>,
    ) -> Result<LoopOutcome, TaskbeeError> {
        let tools = self.dispatcher.declarations();
        let mut messages = vec![
            Message::system(self.system_prompt(&tools)),
            Message::user(text.to_string()),
        ];
        let mut last_text: Option<String> = None;
        let mut executed: Vec<String> = Vec::new();

        for iteration in 1..=self.max_iterations {
            send_event(
                event_tx,
                LoopEvent::ProviderTurn {
                    iteration,
                    max_iterations: self.max_iterations,
                },
            );
            let turn = self.llm.converse(&messages, &tools).await?;
            let turn_text = turn
                .text
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from);
            if turn_text.is_some() {
                last_text = turn_text.clone();
            }

            if !turn.has_tool_calls() {
                tracing::info!(iteration, tools = executed.len(), "agentic loop finished");
                return Ok(LoopOutcome {
                    reply: last_text.unwrap_or_else(|| fallback_reply(&executed, false)),
                    iterations: iteration,
                    tool_calls: executed.len(),
                    cap_reached: false,
                });
            }

            messages.push(Message::assistant_tool_calls(
                turn_text.unwrap_or_default(),
                turn.tool_calls.clone(),
            ));
            for call in &turn.tool_calls {
                send_event(
                    event_tx,
                    LoopEvent::ToolCall {
                        tool: call.name.clone(),
                        args: call.arguments.clone(),
                    },
                );
                let result = self
                    .dispatcher
                    .dispatch_raw(ctx, &call.name, call.arguments.clone())
                    .await;
                let content = result.to_content();
                match &result {
                    ToolResult::Error { error } => send_event(
                        event_tx,
                        LoopEvent::ToolFailure {
                            tool: call.name.clone(),
                            reason: error.clone(),
                        },
                    ),
                    _ => send_event(
                        event_tx,
                        LoopEvent::Observation {
                            tool: call.name.clone(),
                            preview: preview(&content),
                        },
                    ),
                }
                messages.push(Message::tool_result(call, content));
                executed.push(call.name.clone());
            }
        }

        tracing::warn!(
            max_iterations = self.max_iterations,
            tools = executed.len(),
            "agentic loop reached iteration cap"
        );
        send_event(
            event_tx,
            LoopEvent::CapReached {
                iterations: self.max_iterations,
            },
        );
        Ok(LoopOutcome {
            reply: last_text.unwrap_or_else(|| fallback_reply(&executed, true)),
            iterations: self.max_iterations,
            tool_calls: executed.len(),
            cap_reached: true,
        })
    }
}

/// 提供方没有给出任何文本时的兜底回复
fn fallback_reply(executed: &[String], cap_reached: bool) -> String {
    let mut reply = if cap_reached {
        "⚠️ I ran out of steps before finishing this request.".to_string()
    } else {
        "✅ Done.".to_string()
    };
    if !executed.is_empty() {
        reply.push_str(&format!(" Actions taken: {}.", executed.join(", ")));
    }
    reply
}
