//! Telegram bot handler tree configuration
//!
//! The handlers are organized so integration tests can drive the same
//! submission helpers as production code.

mod commands;
mod keyboards;
mod schema;
mod types;

pub use commands::{added_to_queue_text, is_http_url, submit_job, submit_selection};
pub use keyboards::{parse_callback, playlist_keyboard, quality_keyboard, PickerAction};
pub use schema::schema;
pub use types::{HandlerDeps, HandlerError};
