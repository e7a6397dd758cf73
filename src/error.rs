//! Domain error kinds surfaced to callers.
//!
//! These are logic and validity errors, not transient faults: none of them
//! should be retried. They travel inside `anyhow::Error` so call sites can
//! `downcast_ref::<CoreError>()` when they need to branch on the kind.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// A classification link already exists and overwrite was not requested.
    #[error("document '{0}' is already classified; request overwrite to replace the link")]
    AlreadyClassified(String),

    /// Word tokens already exist for the document and replace mode was not
    /// requested.
    #[error("document '{0}' already has word tokens; use replace mode to re-propagate")]
    AlreadyPropagated(String),

    /// Token propagation was attempted before classification.
    #[error("document '{0}' has no classification; classify it before propagating tokens")]
    NotClassified(String),

    /// An event window overlaps the baseline's own reference period, which
    /// would validate the window against itself.
    #[error("event window {window} overlaps the baseline reference period {reference}")]
    OverlappingReference { window: String, reference: String },
}
