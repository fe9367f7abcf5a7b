//! Inline keyboards of the playlist and quality pickers and their callback data.
//!
//! Callback data is `pl:<token>:<action>` for the playlist picker and
//! `q:<token>:<action>` for the quality picker, well within Telegram's
//! 64-byte limit with 16-character tokens.

use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::download::selection::PendingSelection;

/// Quality buttons shown besides "Best".
const MAX_HEIGHT_BUTTONS: usize = 6;

/// A decoded picker button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickerAction {
    /// Show another page of the playlist
    Page(usize),
    /// Pick one playlist entry (1-based index)
    Pick(u32),
    /// Page counter button, does nothing
    Noop,
    /// Best available quality
    Best,
    /// Cap the video height
    Height(u32),
}

/// Splits callback data into the selection token and the action.
pub fn parse_callback(data: &str) -> Option<(String, PickerAction)> {
    let mut parts = data.splitn(3, ':');
    let scope = parts.next()?;
    let token = parts.next().filter(|t| !t.is_empty())?;
    let action = parts.next()?;

    let action = match (scope, action) {
        ("pl", "noop") => PickerAction::Noop,
        ("pl", a) if a.starts_with('p') => PickerAction::Page(a[1..].parse().ok()?),
        ("pl", a) if a.starts_with('t') => PickerAction::Pick(a[1..].parse().ok()?),
        ("q", "best") => PickerAction::Best,
        ("q", a) if a.starts_with('h') => PickerAction::Height(a[1..].parse().ok()?),
        _ => return None,
    };
    Some((token.to_string(), action))
}

fn format_duration(secs: Option<u32>) -> String {
    match secs {
        Some(s) if s > 0 => format!(" ({}:{:02})", s / 60, s % 60),
        _ => String::new(),
    }
}

/// One page of playlist entries plus a navigation row.
pub fn playlist_keyboard(token: &str, selection: &PendingSelection, page: usize, page_size: usize) -> InlineKeyboardMarkup {
    let page_size = page_size.max(1);
    let total = selection.playlist_entries.len();
    let page_count = total.div_ceil(page_size).max(1);
    let page = page.min(page_count - 1);
    let start = page * page_size;
    let end = (start + page_size).min(total);

    let mut rows: Vec<Vec<InlineKeyboardButton>> = selection.playlist_entries[start..end]
        .iter()
        .map(|entry| {
            let mark = if selection.selected_indices.contains(&entry.index) {
                "🔘"
            } else {
                "⚪"
            };
            let title: String = entry.title.chars().take(40).collect();
            vec![InlineKeyboardButton::callback(
                format!("{} {}. {}{}", mark, entry.index, title, format_duration(entry.duration_secs)),
                format!("pl:{}:t{}", token, entry.index),
            )]
        })
        .collect();

    let mut nav = Vec::new();
    if page > 0 {
        nav.push(InlineKeyboardButton::callback("⬅️", format!("pl:{}:p{}", token, page - 1)));
    }
    nav.push(InlineKeyboardButton::callback(
        format!("{}/{}", page + 1, page_count),
        format!("pl:{}:noop", token),
    ));
    if page + 1 < page_count {
        nav.push(InlineKeyboardButton::callback("➡️", format!("pl:{}:p{}", token, page + 1)));
    }
    rows.push(nav);

    InlineKeyboardMarkup::new(rows)
}

/// "Best" plus up to six height caps.
pub fn quality_keyboard(token: &str, heights: &[u32]) -> InlineKeyboardMarkup {
    let mut rows = vec![vec![InlineKeyboardButton::callback("Best", format!("q:{}:best", token))]];
    rows.extend(heights.iter().take(MAX_HEIGHT_BUTTONS).map(|h| {
        vec![InlineKeyboardButton::callback(
            format!("Up to {}p", h),
            format!("q:{}:h{}", token, h),
        )]
    }));
    InlineKeyboardMarkup::new(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::selection::PlaylistEntry;
    use teloxide::types::{ChatId, InlineKeyboardButtonKind, UserId};

    fn selection(entries: u32) -> PendingSelection {
        PendingSelection::new(ChatId(1), UserId(2), "http://x/list").with_playlist(
            (1..=entries)
                .map(|index| PlaylistEntry {
                    index,
                    title: format!("Track {}", index),
                    url: format!("http://x/{}", index),
                    duration_secs: Some(125),
                })
                .collect(),
        )
    }

    fn callback_data(button: &InlineKeyboardButton) -> &str {
        match button.kind {
            InlineKeyboardButtonKind::CallbackData(ref data) => data,
            _ => panic!("not a callback button"),
        }
    }

    #[test]
    fn test_parse_callback() {
        let token = "0123456789abcdef";
        assert_eq!(
            parse_callback(&format!("pl:{}:t3", token)),
            Some((token.to_string(), PickerAction::Pick(3)))
        );
        assert_eq!(
            parse_callback(&format!("pl:{}:p0", token)),
            Some((token.to_string(), PickerAction::Page(0)))
        );
        assert_eq!(
            parse_callback(&format!("pl:{}:noop", token)),
            Some((token.to_string(), PickerAction::Noop))
        );
        assert_eq!(
            parse_callback(&format!("q:{}:best", token)),
            Some((token.to_string(), PickerAction::Best))
        );
        assert_eq!(
            parse_callback(&format!("q:{}:h720", token)),
            Some((token.to_string(), PickerAction::Height(720)))
        );
    }

    #[test]
    fn test_parse_callback_rejects_garbage() {
        assert_eq!(parse_callback("pl:abc:tx"), None);
        assert_eq!(parse_callback("pl::t1"), None);
        assert_eq!(parse_callback("q:abc:t1"), None);
        assert_eq!(parse_callback("menu:main"), None);
        assert_eq!(parse_callback(""), None);
    }

    #[test]
    fn test_playlist_keyboard_pages() {
        let mut sel = selection(12);
        sel.select_entry(11);

        let first = playlist_keyboard("tok", &sel, 0, 5);
        assert_eq!(first.inline_keyboard.len(), 6);
        assert_eq!(first.inline_keyboard[0][0].text, "⚪ 1. Track 1 (2:05)");
        let nav: Vec<&str> = first.inline_keyboard[5].iter().map(|b| b.text.as_str()).collect();
        assert_eq!(nav, vec!["1/3", "➡️"]);

        let last = playlist_keyboard("tok", &sel, 2, 5);
        assert_eq!(last.inline_keyboard.len(), 3);
        assert_eq!(last.inline_keyboard[0][0].text, "🔘 11. Track 11 (2:05)");
        assert_eq!(callback_data(&last.inline_keyboard[0][0]), "pl:tok:t11");
        let nav: Vec<&str> = last.inline_keyboard[2].iter().map(|b| b.text.as_str()).collect();
        assert_eq!(nav, vec!["⬅️", "3/3"]);
    }

    #[test]
    fn test_playlist_keyboard_clamps_page() {
        let keyboard = playlist_keyboard("tok", &selection(3), 9, 10);
        assert_eq!(keyboard.inline_keyboard.len(), 4);
        assert_eq!(keyboard.inline_keyboard[3][0].text, "1/1");
    }

    #[test]
    fn test_quality_keyboard() {
        let keyboard = quality_keyboard("tok", &[2160, 1440, 1080, 720, 480, 360, 240]);
        assert_eq!(keyboard.inline_keyboard.len(), 7);
        assert_eq!(keyboard.inline_keyboard[0][0].text, "Best");
        assert_eq!(callback_data(&keyboard.inline_keyboard[0][0]), "q:tok:best");
        assert_eq!(keyboard.inline_keyboard[1][0].text, "Up to 2160p");
        assert_eq!(callback_data(&keyboard.inline_keyboard[6][0]), "q:tok:h360");
    }
}
