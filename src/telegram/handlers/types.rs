//! Handler types and dependencies

use std::sync::Arc;

use crate::core::services::AppContext;
use crate::download::source::Acquirer;
use crate::telegram::status::StatusSink;

/// Error type for handlers
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Dependencies required by handlers
#[derive(Clone)]
pub struct HandlerDeps {
    /// Queue and selection store shared with the worker
    pub context: Arc<AppContext>,
    /// Used to probe links before a job is built
    pub acquirer: Arc<dyn Acquirer>,
    pub status: Arc<dyn StatusSink>,
    /// Playlist entries per picker page
    pub page_size: usize,
}

impl HandlerDeps {
    pub fn new(
        context: Arc<AppContext>,
        acquirer: Arc<dyn Acquirer>,
        status: Arc<dyn StatusSink>,
        page_size: usize,
    ) -> Self {
        Self {
            context,
            acquirer,
            status,
            page_size: page_size.max(1),
        }
    }
}
