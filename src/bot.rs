//! The reminder pipeline: intent detection, time resolution, scheduling
//! and reply rendering for one conversational turn.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::delivery::{ConversationId, Notifier};
use crate::intent;
use crate::scheduler::{OneShotJob, OneShotScheduler};
use crate::timeparse;

const CLARIFY_TIME_REPLY: &str = "我不太確定時間，可以再說一次嗎？例如「明天下午5點提醒我買菜」";
const SCHEDULER_BUSY_REPLY: &str = "提醒功能暫時忙碌中，請稍後再試一次。";

/// Outcome of one conversational turn.
///
/// `NotReminder` means the text carried no time expression at all; the
/// caller routes it to its ordinary conversation handling.
#[derive(Debug, Clone, PartialEq)]
pub enum ReminderReply {
    NotReminder,
    Scheduled { fire_at: DateTime<Tz>, task: String },
    TimeNotUnderstood,
    SchedulerBusy,
}

impl ReminderReply {
    /// Renders the reply text to push back to the user, `None` for
    /// `NotReminder`.
    pub fn render(&self) -> Option<String> {
        match self {
            Self::NotReminder => None,
            Self::Scheduled { fire_at, task } => Some(format!(
                "✅ 已設定提醒！\n🕓 時間：{}\n📌 內容：{}",
                fire_at.format("%Y-%m-%d %H:%M"),
                task
            )),
            Self::TimeNotUnderstood => Some(CLARIFY_TIME_REPLY.to_owned()),
            Self::SchedulerBusy => Some(SCHEDULER_BUSY_REPLY.to_owned()),
        }
    }
}

/// Fired-side job: pushes the task text back to the originating
/// conversation through the notifier.
struct NotifyJob {
    conversation: ConversationId,
    task: String,
    notifier: Arc<dyn Notifier>,
}

#[async_trait]
impl OneShotJob for NotifyJob {
    async fn run(&self) -> anyhow::Result<()> {
        self.notifier
            .push_text(&self.conversation, &format!("⏰ 提醒：{}", self.task))
            .await
    }
}

pub struct ReminderBot {
    scheduler: OneShotScheduler,
    notifier: Arc<dyn Notifier>,
    timezone: Tz,
}

impl ReminderBot {
    pub fn new(scheduler: OneShotScheduler, notifier: Arc<dyn Notifier>, timezone: Tz) -> Self {
        Self {
            scheduler,
            notifier,
            timezone,
        }
    }

    pub async fn handle_text(&self, conversation: &ConversationId, text: &str) -> ReminderReply {
        let Some(intent) = intent::detect(text) else {
            return ReminderReply::NotReminder;
        };

        let Some(fire_at) = timeparse::resolve_in_zone(&intent.time_text, self.timezone) else {
            log::info!("Could not resolve time expression {:?}", intent.time_text);
            return ReminderReply::TimeNotUnderstood;
        };

        let job = Arc::new(NotifyJob {
            conversation: conversation.clone(),
            task: intent.task.clone(),
            notifier: Arc::clone(&self.notifier),
        });

        match self
            .scheduler
            .register(fire_at.with_timezone(&Utc), job)
            .await
        {
            Ok(_handle) => {
                log::info!(
                    "Reminder for conversation {conversation} scheduled at {fire_at}: {:?}",
                    intent.task
                );
                ReminderReply::Scheduled {
                    fire_at,
                    task: intent.task,
                }
            }
            Err(error) => {
                log::error!("Could not register reminder for conversation {conversation}: {error}");
                ReminderReply::SchedulerBusy
            }
        }
    }
}
