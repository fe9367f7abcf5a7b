//! Telegram bot integration and handlers

pub mod bot;
pub mod delivery;
pub mod handlers;
pub mod status;

pub use bot::{create_bot, setup_bot_commands, Command};
pub use delivery::{FileDelivery, TelegramDelivery};
pub use status::{StatusSink, TelegramStatus, Tone};
