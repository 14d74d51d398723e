//! Human-in-the-loop controller: routes inbound SMS to the state machine.
//!
//! Three intents, matched in order: a job-posting URL starts an
//! application, a known command executes, and anything else is treated as
//! the answer to the oldest open approval. Replies always go out through
//! the `send_notification` queue, never inline.

use std::sync::Arc;

use crate::broker::QueueName;
use crate::dispatcher::{messages, DispatchError, Dispatcher};
use crate::payloads::SendNotificationTask;

pub mod signature;

pub use signature::{original_webhook_url, WebhookValidator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Url(String),
    Command(Command),
    Answer(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Help,
    Status,
    Report,
    Stop,
    Start,
}

pub fn parse_intent(body: &str) -> Intent {
    let trimmed = body.trim();

    if (trimmed.starts_with("http://") || trimmed.starts_with("https://"))
        && url::Url::parse(trimmed).is_ok()
    {
        return Intent::Url(trimmed.to_string());
    }

    match trimmed.to_lowercase().as_str() {
        "help" | "h" => Intent::Command(Command::Help),
        "status" => Intent::Command(Command::Status),
        "report" => Intent::Command(Command::Report),
        "stop" => Intent::Command(Command::Stop),
        "start" => Intent::Command(Command::Start),
        _ => Intent::Answer(trimmed.to_string()),
    }
}

/// Strip channel prefixes some gateways prepend to the sender number.
pub fn clean_number(from: &str) -> String {
    from.replace("whatsapp:", "").replace("sms:", "").trim().to_string()
}

pub struct HitlController {
    dispatcher: Arc<Dispatcher>,
}

impl HitlController {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    pub async fn handle_inbound(&self, from: &str, body: &str) -> Result<(), DispatchError> {
        let from = clean_number(from);
        let intent = parse_intent(body);

        tracing::info!(from = %from, intent = ?intent_name(&intent), "inbound sms");

        match intent {
            Intent::Url(url) => self.handle_url(&from, &url).await,
            Intent::Command(command) => self.handle_command(&from, command).await,
            Intent::Answer(answer) => self.handle_answer(&from, &answer).await,
        }
    }

    async fn handle_url(&self, from: &str, url: &str) -> Result<(), DispatchError> {
        let details = match self.dispatcher.scraper.scrape(url).await {
            Ok(details) => details,
            Err(e) => {
                tracing::warn!(error = %e, url, "posting scrape failed");
                self.reply(from, "❌ Couldn't read that job posting. Try again later?".into())
                    .await?;
                return Ok(());
            }
        };

        let company = details.company_name.clone();
        let title = details.title.clone();
        let role = self.dispatcher.upsert_scraped_role(url, details).await?;

        self.reply(from, messages::ingested(&title, &company)).await?;

        match self.dispatcher.trigger_application(role.id).await {
            Ok(_) => {}
            Err(DispatchError::Paused) => {
                self.reply(from, messages::paused()).await?;
            }
            Err(e) => return Err(e),
        }

        Ok(())
    }

    async fn handle_command(&self, from: &str, command: Command) -> Result<(), DispatchError> {
        let profile = self
            .dispatcher
            .store
            .default_profile()
            .await?
            .ok_or(DispatchError::NotFound("profile"))?;

        let reply = match command {
            Command::Help => messages::help(),
            Command::Status => {
                let pending = self.dispatcher.pending_approval_count().await?;
                messages::status(pending)
            }
            Command::Report => self.dispatcher.report_text().await?,
            Command::Stop => {
                self.dispatcher.set_automation_paused(profile.id, true).await?;
                messages::paused()
            }
            Command::Start => {
                self.dispatcher.set_automation_paused(profile.id, false).await?;
                messages::resumed()
            }
        };

        self.reply(from, reply).await
    }

    async fn handle_answer(&self, from: &str, answer: &str) -> Result<(), DispatchError> {
        let profile = self
            .dispatcher
            .store
            .default_profile()
            .await?
            .ok_or(DispatchError::NotFound("profile"))?;

        let Some(app) = self
            .dispatcher
            .store
            .oldest_waiting_approval(profile.id)
            .await?
        else {
            // No open approval: keep the message for later inspection and
            // point the user at the commands.
            self.dispatcher
                .store
                .record_unmatched_inbound(from, answer)
                .await?;
            return self.reply(from, messages::unmatched_reply()).await;
        };

        self.dispatcher.resume_application(app.id, answer).await?;
        self.reply(from, messages::answer_received()).await
    }

    async fn reply(&self, to: &str, body: String) -> Result<(), DispatchError> {
        let payload = SendNotificationTask {
            body,
            to: Some(to.to_string()),
        };
        self.dispatcher
            .broker
            .publish(
                QueueName::SendNotification,
                serde_json::to_value(&payload)?,
                0,
            )
            .await?;
        Ok(())
    }
}

fn intent_name(intent: &Intent) -> &'static str {
    match intent {
        Intent::Url(_) => "url",
        Intent::Command(_) => "command",
        Intent::Answer(_) => "answer",
    }
}
