use std::time::Duration;

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::task::relay::TaskRelay;

/// Background driver that polls unfinished tasks until they settle.
#[derive(Clone)]
pub struct TaskPoller {
    relay: TaskRelay,
    interval: Duration,
    timeout: Duration,
    concurrency: usize,
}

impl TaskPoller {
    pub fn new(
        relay: TaskRelay,
        interval: Duration,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            relay,
            interval,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                timeout_secs = self.timeout.as_secs(),
                concurrency = self.concurrency,
                "task poller started"
            );

            let mut ticker = interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => self.poll_once(&shutdown).await,
                }
            }

            info!("task poller stopped");
        })
    }

    /// Expires stale tasks, then polls the rest once.
    pub async fn poll_once(&self, cancel: &CancellationToken) {
        let timeout = chrono::Duration::from_std(self.timeout).unwrap_or(chrono::Duration::MAX);
        match self.relay.expire(Utc::now(), timeout).await {
            Ok(0) => {}
            Ok(expired) => info!(expired, "expired stale tasks"),
            Err(error) => warn!(%error, "failed to expire stale tasks"),
        }

        let pending = self.relay.store().unfinished().await;
        if pending.is_empty() {
            return;
        }
        debug!(count = pending.len(), "polling unfinished tasks");

        stream::iter(pending)
            .for_each_concurrent(self.concurrency, |task| async move {
                let result = self.relay.poll(task.channel_id, &task.task_id, cancel).await;
                if let Err(error) = result {
                    log_poll_error(task.channel_id, &task.task_id, &error);
                }
            })
            .await;
    }
}

fn log_poll_error(channel_id: u32, task_id: &str, error: &GatewayError) {
    match error {
        GatewayError::Task(task_error) if task_error.is_retryable() => {
            debug!(channel_id, task_id, %error, "poll failed, retrying next tick");
        }
        _ => warn!(channel_id, task_id, %error, "poll failed"),
    }
}
