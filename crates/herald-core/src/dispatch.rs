//! Periodic publisher for the schedule store.
//!
//! Every cycle loads the schedule, delivers each due post to the broadcast
//! channel once, and writes back whatever survives. A due post leaves the
//! queue after its attempt whether or not the send succeeded, unless the
//! [`DeliveryPolicy`] allows further attempts.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_observability::{emit_event, EventKind, ObservabilityEvent, ProcessKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Level};

use crate::error::Result;
use crate::outbox::{Outbox, SendMessage};
use crate::schedule::ScheduleStore;

pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_secs(60);

const COMPONENT: &str = "herald.dispatch";
const DELIVERY_FAILED: &str = "POST_DELIVERY_FAILED";

/// How many times a due post may be attempted before it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub max_attempts: u32,
}

impl Default for DeliveryPolicy {
    /// At most one attempt per post.
    fn default() -> Self {
        Self { max_attempts: 1 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub delivered: usize,
    pub failed: usize,
    pub dropped_malformed: usize,
    /// Posts not yet due.
    pub retained: usize,
    /// Failed posts kept for another attempt.
    pub requeued: usize,
}

impl CycleReport {
    pub fn is_idle(&self) -> bool {
        self.delivered == 0 && self.failed == 0 && self.dropped_malformed == 0
    }
}

pub struct PostDispatcher {
    store: Arc<ScheduleStore>,
    outbox: Arc<dyn Outbox>,
    channel_id: String,
    interval: Duration,
    policy: DeliveryPolicy,
}

impl PostDispatcher {
    pub fn new(store: Arc<ScheduleStore>, outbox: Arc<dyn Outbox>, channel_id: String) -> Self {
        Self {
            store,
            outbox,
            channel_id,
            interval: DEFAULT_DISPATCH_INTERVAL,
            policy: DeliveryPolicy::default(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.policy = DeliveryPolicy {
            max_attempts: policy.max_attempts.max(1),
        };
        self
    }

    /// Run a single check-and-flush pass against `now`. If the schedule
    /// cannot be read the cycle is abandoned and nothing is written.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let _guard = self.store.lock().await;
        let loaded = self.store.load_checked().await?;

        let mut report = CycleReport {
            dropped_malformed: loaded.malformed,
            ..CycleReport::default()
        };
        let mut survivors = Vec::with_capacity(loaded.posts.len());

        for mut post in loaded.posts {
            if !post.is_due(now) {
                report.retained += 1;
                survivors.push(post);
                continue;
            }

            let message = SendMessage {
                content: post.text.clone(),
                recipient: self.channel_id.clone(),
                reply_to: None,
            };
            match self.outbox.send(&message).await {
                Ok(()) => {
                    report.delivered += 1;
                    info!(
                        "published scheduled post to {}: {}",
                        self.channel_id,
                        preview(&post.text)
                    );
                    emit_event(
                        Level::INFO,
                        ProcessKind::Bot,
                        ObservabilityEvent::new(EventKind::PostDelivered, COMPONENT)
                            .chat(&self.channel_id)
                            .status("delivered"),
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    post.attempts += 1;
                    let requeue = post.attempts < self.policy.max_attempts;
                    let detail = format!(
                        "attempt {}/{}: {e}",
                        post.attempts, self.policy.max_attempts
                    );
                    if requeue {
                        warn!(
                            "delivery to {} failed ({detail}), will retry",
                            self.channel_id
                        );
                    } else {
                        warn!(
                            "delivery to {} failed ({detail}), dropping post {}",
                            self.channel_id,
                            preview(&post.text)
                        );
                    }
                    emit_event(
                        Level::WARN,
                        ProcessKind::Bot,
                        ObservabilityEvent::new(EventKind::PostFailed, COMPONENT)
                            .chat(&self.channel_id)
                            .status(if requeue { "requeued" } else { "dropped" })
                            .error_code(DELIVERY_FAILED)
                            .detail(&detail),
                    );
                    if requeue {
                        report.requeued += 1;
                        survivors.push(post);
                    }
                }
            }
        }

        self.store.save(&survivors).await?;
        Ok(report)
    }

    /// Run cycles every `interval` until `cancel` fires. A cycle in flight
    /// always completes before the loop exits.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "post dispatcher started (channel {}, interval {}s, max attempts {})",
            self.channel_id,
            self.interval.as_secs(),
            self.policy.max_attempts
        );

        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_cycle(Utc::now()).await {
                Ok(report) if report.is_idle() => {
                    debug!("dispatch cycle idle ({} pending)", report.retained)
                }
                Ok(report) => info!(
                    "dispatch cycle: delivered={} failed={} malformed={} pending={} requeued={}",
                    report.delivered,
                    report.failed,
                    report.dropped_malformed,
                    report.retained,
                    report.requeued
                ),
                Err(e) => error!("dispatch cycle failed: {e}"),
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("post dispatcher stopped");
    }
}

fn preview(text: &str) -> String {
    if text.chars().count() > 50 {
        let truncated: String = text.chars().take(50).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}
