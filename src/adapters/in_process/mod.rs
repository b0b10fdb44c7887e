//! In-process dispatcher: Implementation of TaskDispatcher.
//!
//! Runs every site of a task on its own thread and collects results over a
//! channel. Useful for simulations, tests and single-machine deployments where
//! each "site" is a separate data holder in the same process.
//!
//! A site thread that panics drops its sender without reporting, so the site
//! is missing from the results. The coordinator treats that like any other
//! site that never answered.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::domain::{SiteId, SiteRequest, SiteResult};
use crate::ports::{DispatchError, SiteHandler, TaskDispatcher, TaskHandle};

/// A dispatched task whose results have not been collected yet.
struct PendingTask {
    results_rx: Receiver<SiteResult>,
    workers: Vec<JoinHandle<()>>,
}

/// Dispatcher running site handlers on local threads.
#[derive(Default)]
pub struct InProcessDispatcher {
    handlers: BTreeMap<SiteId, Arc<dyn SiteHandler>>,
    pending: Mutex<HashMap<u64, PendingTask>>,
    next_task_id: AtomicU64,
}

impl InProcessDispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a site handler, replacing any handler with the same site id.
    #[must_use]
    pub fn with_site(mut self, handler: Arc<dyn SiteHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn register(&mut self, handler: Arc<dyn SiteHandler>) {
        self.handlers.insert(handler.site().clone(), handler);
    }

    fn spawn_site(
        site: SiteId,
        handler: Arc<dyn SiteHandler>,
        request: Arc<SiteRequest>,
        tx: mpsc::Sender<SiteResult>,
    ) -> Result<JoinHandle<()>, DispatchError> {
        thread::Builder::new()
            .name(format!("site-{site}"))
            .spawn(move || {
                let outcome = handler.handle(&request).map_err(|e| e.to_string());
                if let Err(e) = &outcome {
                    tracing::warn!("Site {site} failed {}: {e}", request.round());
                }
                let _ = tx.send(SiteResult { site, outcome });
            })
            .map_err(|e| DispatchError::Transport(format!("cannot start site worker: {e}")))
    }
}

impl TaskDispatcher for InProcessDispatcher {
    fn organisations(&self) -> Vec<SiteId> {
        self.handlers.keys().cloned().collect()
    }

    fn create_task(
        &self,
        request: SiteRequest,
        sites: &[SiteId],
    ) -> Result<TaskHandle, DispatchError> {
        // Resolve every site before starting any thread.
        let targets = sites
            .iter()
            .map(|site| {
                self.handlers
                    .get(site)
                    .map(|h| (site.clone(), Arc::clone(h)))
                    .ok_or_else(|| DispatchError::UnknownSite(site.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let id = self.next_task_id.fetch_add(1, Ordering::SeqCst);
        let round = request.round();
        let request = Arc::new(request);
        let (tx, rx) = mpsc::channel();

        let mut workers = Vec::with_capacity(targets.len());
        for (site, handler) in targets {
            workers.push(Self::spawn_site(site, handler, Arc::clone(&request), tx.clone())?);
        }
        drop(tx);

        self.pending
            .lock()
            .map_err(|_| DispatchError::Transport("task table lock poisoned".to_string()))?
            .insert(
                id,
                PendingTask {
                    results_rx: rx,
                    workers,
                },
            );

        tracing::debug!("Created task {id} ({round}) for {} site(s)", sites.len());
        Ok(TaskHandle {
            id,
            round,
            sites: sites.to_vec(),
        })
    }

    fn wait_for_results(&self, handle: &TaskHandle) -> Result<Vec<SiteResult>, DispatchError> {
        let task = self
            .pending
            .lock()
            .map_err(|_| DispatchError::Transport("task table lock poisoned".to_string()))?
            .remove(&handle.id)
            .ok_or(DispatchError::UnknownTask(handle.id))?;

        // Ends once every worker has sent its result or died.
        let results: Vec<SiteResult> = task.results_rx.iter().collect();

        for worker in task.workers {
            if worker.join().is_err() {
                tracing::warn!("A site worker of task {} panicked", handle.id);
            }
        }

        Ok(results)
    }
}
