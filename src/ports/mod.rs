//! Ports layer: Trait definitions for external operations.
//!
//! Following Hexagonal Architecture, these traits define the boundaries
//! between the protocol and its collaborators (noise source, instrument
//! scoring, task transport).

mod dispatch;
mod privacy;
mod scorer;

pub use dispatch::{DispatchError, SiteHandler, TaskDispatcher, TaskHandle};
pub use privacy::{DifferentialPrivacy, DpError};
pub use scorer::InstrumentScorer;
