//! Status message rendering.
//!
//! Every job owns one status message that is edited in place as the job
//! progresses. Edits are best-effort: the message may have been deleted, the
//! edit may be a no-op, or Telegram may be rate limiting us.

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{MessageId, ParseMode};
use teloxide::utils::html;

use crate::core::error::AppResult;

/// How a status text is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// In-flight progress, rendered in italics
    Italic,
    /// Final outcome, rendered as plain text
    Plain,
}

/// Destination of user-visible status updates.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn render(&self, chat_id: ChatId, message_id: MessageId, text: &str, tone: Tone) -> AppResult<()>;
}

/// Renders a status text, logging and swallowing any failure.
pub async fn render_quietly(sink: &dyn StatusSink, chat_id: ChatId, message_id: MessageId, text: &str, tone: Tone) {
    if let Err(e) = sink.render(chat_id, message_id, text, tone).await {
        log::debug!("Status edit failed chat_id={} text={:?}: {}", chat_id, text, e);
    }
}

/// Edits the status message through the Bot API.
#[derive(Clone)]
pub struct TelegramStatus {
    bot: Bot,
}

impl TelegramStatus {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// Wraps text in `<i>` with HTML escaping.
pub fn italic(text: &str) -> String {
    format!("<i>{}</i>", html::escape(text))
}

#[async_trait]
impl StatusSink for TelegramStatus {
    async fn render(&self, chat_id: ChatId, message_id: MessageId, text: &str, tone: Tone) -> AppResult<()> {
        match tone {
            Tone::Italic => {
                self.bot
                    .edit_message_text(chat_id, message_id, italic(text))
                    .parse_mode(ParseMode::Html)
                    .await?;
            }
            Tone::Plain => {
                self.bot.edit_message_text(chat_id, message_id, text).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::AppError;

    struct FailingSink;

    #[async_trait]
    impl StatusSink for FailingSink {
        async fn render(&self, _: ChatId, _: MessageId, _: &str, _: Tone) -> AppResult<()> {
            Err(AppError::Delivery("message to edit not found".to_string()))
        }
    }

    #[test]
    fn test_italic_escapes_html() {
        assert_eq!(italic("Downloading... 42%"), "<i>Downloading... 42%</i>");
        assert_eq!(italic("a <b> & c"), "<i>a &lt;b&gt; &amp; c</i>");
    }

    #[tokio::test]
    async fn test_render_quietly_swallows_errors() {
        render_quietly(&FailingSink, ChatId(1), MessageId(2), "Done.", Tone::Plain).await;
    }
}
