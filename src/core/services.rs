//! Process-wide services.
//!
//! [`AppContext`] is the state shared with every chat interaction (the job
//! queue and the selection store). [`Services`] owns the background tasks that
//! consume it: the single worker and the optional selection sweeper. Both are
//! started once at startup and stopped through [`Services::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::download::queue::JobQueue;
use crate::download::selection::SelectionStore;
use crate::download::worker::{Worker, WorkerHandle};

/// State shared between producers (handlers) and the worker.
pub struct AppContext {
    pub queue: Arc<JobQueue>,
    pub selections: Arc<SelectionStore>,
}

impl AppContext {
    pub fn new(selection_ttl: Duration) -> Self {
        Self {
            queue: Arc::new(JobQueue::new()),
            selections: Arc::new(SelectionStore::new(selection_ttl)),
        }
    }
}

/// Running background services.
pub struct Services {
    context: Arc<AppContext>,
    cancel: CancellationToken,
    worker: WorkerHandle,
    sweeper: Option<JoinHandle<()>>,
}

impl Services {
    /// Spawns the worker and, when `sweep_every` is set, the selection sweeper.
    ///
    /// `worker` must consume `context.queue`.
    pub fn start(context: Arc<AppContext>, worker: Worker, sweep_every: Option<Duration>) -> Self {
        let cancel = CancellationToken::new();
        let worker = worker.spawn(cancel.child_token());
        let sweeper = sweep_every.map(|every| {
            log::info!("Selection sweeper running every {:?}", every);
            Arc::clone(&context.selections).spawn_sweeper(every, cancel.child_token())
        });
        Self {
            context,
            cancel,
            worker,
            sweeper,
        }
    }

    pub fn context(&self) -> Arc<AppContext> {
        Arc::clone(&self.context)
    }

    pub fn worker_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Stops the worker and the sweeper and waits for both.
    pub async fn shutdown(self) {
        log::info!("Shutting down services");
        self.cancel.cancel();
        self.worker.shutdown().await;
        if let Some(sweeper) = self.sweeper {
            if let Err(e) = sweeper.await {
                log::warn!("Selection sweeper ended abnormally: {}", e);
            }
        }
        log::info!("Services stopped");
    }
}
