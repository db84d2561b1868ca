//! 定时摘要：按参考时区的每日时刻把摘要推送到配置的频道

pub mod digest;

use std::sync::Arc;

use chrono::DateTime;
use chrono_tz::Tz;
use tokio_util::sync::CancellationToken;

use crate::config::DigestSection;
use crate::core::{Clock, TaskbeeError};
use crate::integrations::ChatGateway;
use crate::store::{TaskStore, SEARCH_ALL};

pub use digest::{next_fire, render, DigestJob, DigestKind, EVENING_REVIEW, MORNING_DIGEST};

pub struct DigestScheduler {
    store: Arc<dyn TaskStore>,
    gateway: Arc<dyn ChatGateway>,
    clock: Arc<dyn Clock>,
    channel: String,
    jobs: Vec<DigestJob>,
}

impl DigestScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        gateway: Arc<dyn ChatGateway>,
        clock: Arc<dyn Clock>,
        channel: impl Into<String>,
        jobs: Vec<DigestJob>,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            channel: channel.into(),
            jobs,
        }
    }

    /// 从配置构建；未启用或没有频道时返回 Ok(None)
    pub fn from_config(
        cfg: &DigestSection,
        store: Arc<dyn TaskStore>,
        gateway: Arc<dyn ChatGateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<Option<Self>, TaskbeeError> {
        if !cfg.enabled {
            return Ok(None);
        }
        let Some(channel) = cfg.channel.as_deref().filter(|c| !c.trim().is_empty()) else {
            tracing::warn!("digest enabled but no channel configured, scheduler disabled");
            return Ok(None);
        };
        let jobs = cfg
            .jobs
            .iter()
            .map(DigestJob::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Self::new(store, gateway, clock, channel, jobs)))
    }

    pub fn jobs(&self) -> &[DigestJob] {
        &self.jobs
    }

    /// 最近一次要触发的任务及时间
    pub fn next_due(&self, now: DateTime<Tz>) -> Option<(&DigestJob, DateTime<Tz>)> {
        self.jobs
            .iter()
            .map(|job| (job, next_fire(job.at, now)))
            .min_by_key(|(_, at)| *at)
    }

    /// 立即执行一次摘要并推送，返回推送的文本
    pub async fn run_job(&self, kind: DigestKind) -> Result<String, TaskbeeError> {
        let tasks = self.store.search(SEARCH_ALL).await?;
        let text = render(kind, &tasks, self.clock.today());
        self.gateway.send_message(&self.channel, &text, None).await?;
        Ok(text)
    }

    /// 循环等待下一次触发，直到 cancel 被取消
    pub async fn run(self, cancel: CancellationToken) {
        tracing::info!(jobs = self.jobs.len(), channel = %self.channel, "digest scheduler started");
        loop {
            let now = self.clock.now();
            let Some((job, at)) = self.next_due(now) else {
                tracing::info!("no digest jobs configured, scheduler exiting");
                return;
            };
            let (name, kind) = (job.name.clone(), job.kind);
            let wait = (at - now).to_std().unwrap_or_default();
            tracing::debug!(job = %name, at = %at, "next digest scheduled");

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("digest scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match self.run_job(kind).await {
                Ok(_) => tracing::info!(job = %name, "digest sent"),
                Err(e) => tracing::error!(job = %name, "digest failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DigestJobConfig;
    use crate::core::FixedClock;
    use crate::integrations::{GatewayCall, RecordingGateway};
    use crate::store::{InMemoryTaskStore, NewTask, Priority};
    use chrono::{NaiveDate, TimeZone};

    fn clock() -> Arc<dyn Clock> {
        Arc::new(FixedClock::on_date(
            chrono_tz::Asia::Shanghai,
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
        ))
    }

    fn section(enabled: bool, channel: Option<&str>) -> DigestSection {
        DigestSection {
            enabled,
            channel: channel.map(str::to_string),
            jobs: vec![
                DigestJobConfig {
                    name: MORNING_DIGEST.to_string(),
                    time: "08:30".to_string(),
                },
                DigestJobConfig {
                    name: EVENING_REVIEW.to_string(),
                    time: "18:00".to_string(),
                },
            ],
        }
    }

    #[test]
    fn test_from_config_disabled_or_without_channel() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let gateway: Arc<dyn ChatGateway> = Arc::new(RecordingGateway::new());
        assert!(DigestScheduler::from_config(&section(false, Some("C1")), store.clone(), gateway.clone(), clock())
            .unwrap()
            .is_none());
        assert!(DigestScheduler::from_config(&section(true, None), store.clone(), gateway.clone(), clock())
            .unwrap()
            .is_none());
        let s = DigestScheduler::from_config(&section(true, Some("C1")), store, gateway, clock())
            .unwrap()
            .unwrap();
        assert_eq!(s.jobs().len(), 2);
    }

    #[test]
    fn test_next_due_picks_earliest() {
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        let gateway: Arc<dyn ChatGateway> = Arc::new(RecordingGateway::new());
        let s = DigestScheduler::from_config(&section(true, Some("C1")), store, gateway, clock())
            .unwrap()
            .unwrap();
        // 09:00 已过早报，下一次是 18:00 晚报
        let (job, at) = s.next_due(clock().now()).unwrap();
        assert_eq!(job.kind, DigestKind::EveningReview);
        assert_eq!(
            at,
            chrono_tz::Asia::Shanghai.with_ymd_and_hms(2025, 1, 10, 18, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_run_job_posts_to_channel() {
        let store = Arc::new(InMemoryTaskStore::new());
        let mut urgent = NewTask::new("Ship release");
        urgent.priority = Priority::P1;
        store.create(&urgent).await.unwrap();
        let gateway = Arc::new(RecordingGateway::new());
        let s = DigestScheduler::new(store, gateway.clone(), clock(), "C-digest", vec![]);

        let text = s.run_job(DigestKind::MorningDigest).await.unwrap();
        assert!(text.contains("Ship release"));
        match &gateway.calls()[0] {
            GatewayCall::Sent { channel, thread_key, .. } => {
                assert_eq!(channel, "C-digest");
                assert!(thread_key.is_none());
            }
            other => panic!("unexpected call: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let s = DigestScheduler::from_config(
            &section(true, Some("C1")),
            Arc::new(InMemoryTaskStore::new()),
            Arc::new(RecordingGateway::new()),
            clock(),
        )
        .unwrap()
        .unwrap();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(s.run(cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
