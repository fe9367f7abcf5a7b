//! Command, link and picker handlers plus the job submission helpers

use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, Message, MessageId, ParseMode};

use super::keyboards::{parse_callback, playlist_keyboard, quality_keyboard, PickerAction};
use super::types::{HandlerDeps, HandlerError};
use crate::core::services::AppContext;
use crate::download::queue::Job;
use crate::download::selection::{PendingSelection, SelectionError};
use crate::download::worker::failure_text;
use crate::telegram::bot::Command;
use crate::telegram::status::{italic, render_quietly, StatusSink, Tone};

pub const START_TEXT: &str = "Send me a link to a video or audio and I'll download it and send you the file.";
pub const HELP_TEXT: &str = "Commands:\n/start - start\n/help - help\n\nJust send a URL. If the link contains multiple files or multiple quality options, the bot will show selection buttons.";
pub const CHECKING_TEXT: &str = "Checking the link...";
pub const INVALID_LINK_TEXT: &str = "Invalid link. Expected an http/https URL.";
pub const EXPIRED_TEXT: &str = "This selection session has expired. Please send the link again.";
pub const NOT_YOURS_TEXT: &str = "This selection is not for you.";
pub const CHOOSE_QUALITY_TEXT: &str = "Choose download quality:";
pub const TOOLS_MISSING_TEXT: &str = "ffmpeg was not found on the server, but downloading video+audio requires merging tracks.\n\nInstall ffmpeg (or point FFMPEG_LOCATION at it) and try again.";

/// Reply after a job was queued.
pub fn added_to_queue_text(position: usize) -> String {
    format!("Added to the queue. Position: {}.\nPlease wait...", position)
}

pub fn is_http_url(text: &str) -> bool {
    url::Url::parse(text.trim())
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host().is_some())
        .unwrap_or(false)
}

/// Enqueues a job and tells the requester its position.
pub async fn submit_job(context: &AppContext, status: &dyn StatusSink, job: Job) -> usize {
    let chat_id = job.chat_id;
    let message_id = job.status_message_id;
    let max_height = job.max_height;
    let urls = job.urls.len();

    let position = context.queue.enqueue(job).await;
    log::info!(
        "Enqueued job chat_id={} urls={} max_height={:?} queue_pos={}",
        chat_id,
        urls,
        max_height,
        position
    );
    render_quietly(status, chat_id, message_id, &added_to_queue_text(position), Tone::Italic).await;
    position
}

/// Consumes a pending selection and enqueues the job built from it.
///
/// Returns `None` when the token is unknown or expired.
pub async fn submit_selection(
    context: &AppContext,
    status: &dyn StatusSink,
    token: &str,
    message_id: MessageId,
) -> Option<usize> {
    let selection = context.selections.take(token).await?;
    Some(submit_job(context, status, selection.into_job(message_id)).await)
}

pub(super) async fn handle_command(bot: &Bot, msg: &Message, cmd: Command) -> Result<(), HandlerError> {
    let text = match cmd {
        Command::Start => START_TEXT,
        Command::Help => HELP_TEXT,
    };
    bot.send_message(msg.chat.id, text).await?;
    Ok(())
}

/// Probes a link and either queues it right away or shows a picker.
pub(super) async fn handle_url_message(bot: &Bot, msg: &Message, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let Some(user) = msg.from.as_ref() else {
        return Ok(());
    };
    let chat_id = msg.chat.id;
    let url = text.trim().to_string();
    log::info!("Incoming URL chat_id={} user_id={} url={}", chat_id, user.id, url);

    if !is_http_url(&url) {
        bot.send_message(chat_id, INVALID_LINK_TEXT).await?;
        return Ok(());
    }

    let acquirer = deps.acquirer.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || acquirer.check_ready()).await? {
        log::error!("{} backend not ready: {}", deps.acquirer.name(), e);
        bot.send_message(chat_id, TOOLS_MISSING_TEXT).await?;
        return Ok(());
    }

    let status_msg = bot
        .send_message(chat_id, italic(CHECKING_TEXT))
        .parse_mode(ParseMode::Html)
        .await?;

    let acquirer = deps.acquirer.clone();
    let probe_url = url.clone();
    let probe = match tokio::task::spawn_blocking(move || acquirer.probe(&probe_url)).await? {
        Ok(probe) => probe,
        Err(e) => {
            log::warn!("Probe failed for {}: {}", url, e);
            bot.edit_message_text(chat_id, status_msg.id, failure_text(&url)).await?;
            return Ok(());
        }
    };

    let selection = PendingSelection::new(chat_id, user.id, url)
        .with_playlist(probe.playlist_entries)
        .with_heights(probe.heights);

    if selection.playlist_entries.len() > 1 {
        let text = format!(
            "Multiple files were found at the link: {}.\nSelect one file to download.",
            selection.playlist_entries.len()
        );
        let token = deps.context.selections.create(selection.clone()).await;
        bot.edit_message_text(chat_id, status_msg.id, italic(&text))
            .parse_mode(ParseMode::Html)
            .reply_markup(playlist_keyboard(&token, &selection, 0, deps.page_size))
            .await?;
        return Ok(());
    }

    if selection.heights.len() >= 2 {
        let token = deps.context.selections.create(selection.clone()).await;
        bot.edit_message_text(
            chat_id,
            status_msg.id,
            italic("Multiple quality options are available. Choose: "),
        )
        .parse_mode(ParseMode::Html)
        .reply_markup(quality_keyboard(&token, &selection.heights))
        .await?;
        return Ok(());
    }

    let job = selection.into_job(status_msg.id);
    submit_job(&deps.context, deps.status.as_ref(), job).await;
    Ok(())
}

/// Handles presses on the playlist and quality pickers.
pub(super) async fn handle_picker_callback(bot: &Bot, q: &CallbackQuery, deps: &HandlerDeps) -> Result<(), HandlerError> {
    let Some((token, action)) = q.data.as_deref().and_then(parse_callback) else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };
    let Some((chat_id, message_id)) = q.message.as_ref().map(|m| (m.chat().id, m.id())) else {
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    };

    let selections = &deps.context.selections;
    let Some(pending) = selections.get(&token).await else {
        bot.answer_callback_query(q.id.clone()).await?;
        bot.edit_message_text(chat_id, message_id, EXPIRED_TEXT).await?;
        return Ok(());
    };
    if pending.user_id != q.from.id || pending.chat_id != chat_id {
        bot.answer_callback_query(q.id.clone())
            .text(NOT_YOURS_TEXT)
            .show_alert(true)
            .await?;
        return Ok(());
    }

    let change: Box<dyn FnOnce(&mut PendingSelection) + Send> = match action {
        PickerAction::Noop => {
            bot.answer_callback_query(q.id.clone()).await?;
            return Ok(());
        }
        PickerAction::Page(page) => {
            bot.answer_callback_query(q.id.clone()).await?;
            bot.edit_message_reply_markup(chat_id, message_id)
                .reply_markup(playlist_keyboard(&token, &pending, page, deps.page_size))
                .await?;
            return Ok(());
        }
        PickerAction::Pick(index) => Box::new(move |s: &mut PendingSelection| s.select_entry(index)),
        PickerAction::Best => Box::new(|s: &mut PendingSelection| s.selected_height = None),
        PickerAction::Height(height) => Box::new(move |s: &mut PendingSelection| s.selected_height = Some(height)),
    };

    let updated = match selections.update(&token, q.from.id, change).await {
        Ok(updated) => updated,
        Err(SelectionError::NotOwner) => {
            bot.answer_callback_query(q.id.clone())
                .text(NOT_YOURS_TEXT)
                .show_alert(true)
                .await?;
            return Ok(());
        }
        Err(SelectionError::NotFound) => {
            bot.answer_callback_query(q.id.clone()).await?;
            bot.edit_message_text(chat_id, message_id, EXPIRED_TEXT).await?;
            return Ok(());
        }
    };

    match action {
        PickerAction::Pick(_) if updated.heights.len() >= 2 => {
            bot.answer_callback_query(q.id.clone()).await?;
            bot.edit_message_text(chat_id, message_id, italic(CHOOSE_QUALITY_TEXT))
                .parse_mode(ParseMode::Html)
                .reply_markup(quality_keyboard(&token, &updated.heights))
                .await?;
            return Ok(());
        }
        PickerAction::Best => {
            bot.answer_callback_query(q.id.clone()).text("Selected: best").await?;
        }
        PickerAction::Height(height) => {
            bot.answer_callback_query(q.id.clone())
                .text(format!("Selected: up to {}p", height))
                .await?;
        }
        _ => {
            bot.answer_callback_query(q.id.clone()).await?;
        }
    }

    submit_selection(&deps.context, deps.status.as_ref(), &token, message_id).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_http_url() {
        assert!(is_http_url("https://www.youtube.com/watch?v=abc"));
        assert!(is_http_url("  http://example.com/a.mp4 "));
        assert!(!is_http_url("ftp://example.com/file"));
        assert!(!is_http_url("file:///etc/passwd"));
        assert!(!is_http_url("hello there"));
        assert!(!is_http_url(""));
    }

    #[test]
    fn test_added_to_queue_text() {
        assert_eq!(added_to_queue_text(2), "Added to the queue. Position: 2.\nPlease wait...");
    }
}
