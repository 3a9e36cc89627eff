//! Weighted LoRA composition
//!
//! Merging several LoRA files into one delta is done by the model library.
//! This module only fixes the contract: strengths go into the merge, the
//! inputs are never modified, and a rejected set is reported with the
//! library's own message.

pub use lorastack_core::ComposedLora;
use std::path::PathBuf;
use thiserror::Error;

/// Composition errors
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("{0}")]
    Rejected(String),
}

/// Merges weighted LoRA files into a single delta
pub trait LoraComposer {
    /// Compose `(path, strength)` pairs, in order
    fn compose(&self, loras: &[(PathBuf, f64)]) -> Result<ComposedLora, ComposeError>;
}

impl<F> LoraComposer for F
where
    F: Fn(&[(PathBuf, f64)]) -> Result<ComposedLora, ComposeError>,
{
    fn compose(&self, loras: &[(PathBuf, f64)]) -> Result<ComposedLora, ComposeError> {
        self(loras)
    }
}
