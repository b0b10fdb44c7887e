//! Instrument scorer port: Trait turning item responses into scale scores.
//!
//! Scoring tables are instrument specific. The protocol only needs to know
//! which variables come out and how to read them.

use crate::domain::{ItemsToScore, SitePartition, VariableDescriptor};

/// Trait for questionnaire scoring.
pub trait InstrumentScorer: Send + Sync {
    /// Check that the requested scales and item mapping make sense for this instrument.
    ///
    /// # Errors
    /// Returns `FedScoreError::UserInput` describing the first problem found.
    fn check_input_structure(&self, items: &ItemsToScore) -> crate::Result<()>;

    /// Variables produced by scoring `items`.
    fn scored_variables(&self, items: &ItemsToScore) -> Vec<VariableDescriptor>;

    /// Score a partition.
    ///
    /// Returns a copy with one column per scored variable. A variable whose item
    /// columns are not all present at the site is left out entirely; a row with
    /// invalid responses gets a missing value.
    ///
    /// # Errors
    /// Returns error if the mapping cannot be applied.
    fn score(&self, items: &ItemsToScore, partition: &SitePartition)
        -> crate::Result<SitePartition>;
}
