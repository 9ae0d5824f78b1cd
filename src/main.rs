use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use tixing::appsettings::AppSettings;
use tixing::bot::ReminderBot;
use tixing::delivery::{ConversationId, Notifier};
use tixing::scheduler::OneShotScheduler;

/// Stands in for the host application's delivery channel: fired reminders
/// are printed to the console they were typed into.
struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn push_text(&self, conversation: &ConversationId, text: &str) -> anyhow::Result<()> {
        println!("[{conversation}] {text}");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    pretty_env_logger::init();

    let settings = AppSettings::load().context("Could not load application settings")?;
    let timezone = settings.timezone()?;
    log::info!("Resolving reminder times in {timezone}");

    let scheduler = OneShotScheduler::new(settings.scheduler.max_pending_jobs);
    let bot = ReminderBot::new(scheduler, Arc::new(ConsoleNotifier), timezone);
    let conversation = ConversationId::new("console");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match bot.handle_text(&conversation, line).await.render() {
            Some(reply) => println!("{reply}"),
            // Not a reminder: the surrounding chat application would hand
            // this to its completion service.
            None => println!("(一般對話)"),
        }
    }

    Ok(())
}
