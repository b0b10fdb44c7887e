//! Dispatch port: Traits for sending round requests to sites.
//!
//! The coordinator only sees `create_task` and `wait_for_results`. How a request
//! reaches a site (threads, a task server, a message queue) is the adapter's business.

use crate::domain::{Round, SiteId, SiteRequest, SiteResponse, SiteResult};

/// Errors raised by a dispatcher itself, as opposed to errors reported by sites.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown task: {0}")]
    UnknownTask(u64),

    #[error("Unknown organisation: {0}")]
    UnknownSite(SiteId),

    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Handle to a dispatched round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: u64,
    pub round: Round,
    /// Sites the request was sent to
    pub sites: Vec<SiteId>,
}

/// Trait for coordinator → site task dispatch.
pub trait TaskDispatcher: Send + Sync {
    /// Every organisation reachable through this dispatcher.
    fn organisations(&self) -> Vec<SiteId>;

    /// Send `request` to `sites`.
    ///
    /// # Errors
    /// Returns `DispatchError` if the task cannot be created.
    fn create_task(
        &self,
        request: SiteRequest,
        sites: &[SiteId],
    ) -> Result<TaskHandle, DispatchError>;

    /// Block until the task is finished and return whatever the sites reported.
    ///
    /// Sites that never reported are simply absent from the result; the caller
    /// decides what that means.
    ///
    /// # Errors
    /// Returns `DispatchError` if the handle is unknown or the transport fails.
    fn wait_for_results(&self, handle: &TaskHandle) -> Result<Vec<SiteResult>, DispatchError>;
}

/// Trait for the site-side handler of round requests.
pub trait SiteHandler: Send + Sync {
    fn site(&self) -> &SiteId;

    /// Answer one round request from the site's own partition.
    ///
    /// # Errors
    /// Any error fails this site's contribution to the round.
    fn handle(&self, request: &SiteRequest) -> crate::Result<SiteResponse>;
}
