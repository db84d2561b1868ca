//! 把分类结果落到存储上，并生成给用户看的一行确认

use crate::capture::classifier::{ThreadDecision, UpdateAction};
use crate::core::TaskbeeError;
use crate::store::{Task, TaskStatus, TaskStore};

/// 应用一条分类结果；返回确认文本
pub async fn apply_decision(
    store: &dyn TaskStore,
    task: &Task,
    decision: &ThreadDecision,
    reply: &str,
) -> Result<String, TaskbeeError> {
    let title = &task.title;
    let text = match decision.action {
        UpdateAction::Completed => {
            store.update_status(&task.id, TaskStatus::Done).await?;
            format!("✅ Marked *{}* as Done.", title)
        }
        UpdateAction::InProgress => {
            store.update_status(&task.id, TaskStatus::InProgress).await?;
            format!("🔄 *{}* is now In Progress.", title)
        }
        UpdateAction::Detail => {
            let note = decision
                .updates
                .note
                .clone()
                .unwrap_or_else(|| reply.trim().to_string());
            store.append_note(&task.id, &note).await?;
            format!("📝 Added a note to *{}*.", title)
        }
        UpdateAction::Rescheduled => match decision.updates.due_date {
            Some(date) => {
                store.update_due_date(&task.id, date).await?;
                format!("📅 Moved *{}* to {}.", title, date)
            }
            None => {
                store.append_note(&task.id, reply.trim()).await?;
                format!(
                    "📝 Couldn't tell the new date, so I added your reply to *{}* as a note.",
                    title
                )
            }
        },
        UpdateAction::Deleted => {
            store.archive(&task.id).await?;
            return Ok(format!("🗑️ Archived *{}*.", title));
        }
        UpdateAction::Unchanged => format!("👍 No changes to *{}*.", title),
    };

    if task.context_signature.as_deref() != Some(decision.signature.as_str()) {
        if let Err(e) = store.update_signature(&task.id, &decision.signature).await {
            tracing::warn!(task_id = %task.id, "signature update failed: {}", e);
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::classifier::TaskUpdates;
    use crate::store::{InMemoryTaskStore, NewTask};
    use chrono::NaiveDate;

    fn decision(action: UpdateAction, updates: TaskUpdates) -> ThreadDecision {
        ThreadDecision {
            action,
            updates,
            signature: "sig-2".to_string(),
            degraded: false,
        }
    }

    async fn seeded() -> (InMemoryTaskStore, Task) {
        let store = InMemoryTaskStore::new();
        let mut new = NewTask::new("Buy milk");
        new.context_signature = Some("sig-1".to_string());
        let created = store.create(&new).await.unwrap();
        let task = store.get(&created.id).await.unwrap().unwrap();
        (store, task)
    }

    #[tokio::test]
    async fn test_completed_sets_done_and_signature() {
        let (store, task) = seeded().await;
        let text = apply_decision(&store, &task, &decision(UpdateAction::Completed, TaskUpdates::default()), "done")
            .await
            .unwrap();
        assert!(text.contains("Done"));
        let after = store.get(&task.id).await.unwrap().unwrap();
        assert_eq!(after.status, TaskStatus::Done);
        assert_eq!(after.context_signature.as_deref(), Some("sig-2"));
    }

    #[tokio::test]
    async fn test_reschedule_and_note() {
        let (store, task) = seeded().await;
        let due = NaiveDate::from_ymd_opt(2025, 1, 13);
        apply_decision(
            &store,
            &task,
            &decision(UpdateAction::Rescheduled, TaskUpdates { note: None, due_date: due }),
            "push to monday",
        )
        .await
        .unwrap();
        assert_eq!(store.get(&task.id).await.unwrap().unwrap().due_date, due);

        apply_decision(&store, &task, &decision(UpdateAction::Rescheduled, TaskUpdates::default()), "later")
            .await
            .unwrap();
        assert_eq!(store.notes(&task.id), vec!["later".to_string()]);
    }

    #[tokio::test]
    async fn test_deleted_archives() {
        let (store, task) = seeded().await;
        apply_decision(&store, &task, &decision(UpdateAction::Deleted, TaskUpdates::default()), "drop it")
            .await
            .unwrap();
        assert!(store.is_archived(&task.id));
    }

    #[tokio::test]
    async fn test_missing_record_propagates() {
        let (store, mut task) = seeded().await;
        task.id = "gone".to_string();
        let err = apply_decision(&store, &task, &decision(UpdateAction::Completed, TaskUpdates::default()), "done")
            .await
            .unwrap_err();
        assert!(matches!(err, TaskbeeError::Store(_)));
    }
}
