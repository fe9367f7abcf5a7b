//! Linkdrop - Telegram bot that downloads media from links and sends the files back
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, logging and the process-wide services
//! - `download`: job queue, selections, progress reporting and the worker
//! - `telegram`: bot setup, handlers, status rendering and file delivery
//! - `cli`: command line interface

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod cli;
pub mod core;
pub mod download;
pub mod telegram;

// Re-export commonly used types for convenience
pub use core::{config, AppContext, AppError, AppResult, Services};
pub use download::{Job, JobQueue, SelectionStore, Worker};
