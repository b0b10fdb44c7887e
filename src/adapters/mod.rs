//! Adapters layer: Concrete implementations of ports.
//!
//! These modules contain the actual integrations:
//! - `laplace`: Laplace mechanism over a ChaCha20 CSPRNG
//! - `hads`: HADS questionnaire scoring
//! - `in_process`: thread-per-site task dispatch
//! - `sanitize`: participant data filtering for logs
//! - `files`: JSON task and partition loading

pub mod files;
pub mod hads;
pub mod in_process;
pub mod laplace;
pub mod sanitize;

pub use hads::HadsScorer;
pub use in_process::InProcessDispatcher;
pub use laplace::LaplaceMechanism;
