//! Native LoRA interface
//!
//! Models that compose LoRAs internally expose parameter replacement and a
//! strength setter instead of a LoRA list. Calls replace the model's LoRA
//! state wholesale; an implementation must leave its previous state intact
//! when a call fails.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Error reported by a native model
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct NativeError(pub String);

/// A merged LoRA delta produced from several weighted files
#[derive(Debug, Clone)]
pub struct ComposedLora {
    /// The files and strengths that went into the merge
    pub sources: Vec<(PathBuf, f64)>,
    /// Serialized merged tensors
    pub payload: Arc<[u8]>,
}

impl ComposedLora {
    /// Create a composed delta
    pub fn new(sources: Vec<(PathBuf, f64)>, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            sources,
            payload: payload.into(),
        }
    }
}

/// LoRA parameters to install on a native model
#[derive(Debug, Clone)]
pub enum LoraParams {
    /// Remove all LoRA parameters
    Clear,
    /// A single LoRA file, strength set separately
    File(PathBuf),
    /// A pre-merged delta with strengths already folded in
    Composed(ComposedLora),
}

/// Interface of models that manage LoRA composition themselves
pub trait NativeLoraModel: Send + Sync {
    /// Replace the installed LoRA parameters
    fn update_lora_params(&self, params: LoraParams) -> Result<(), NativeError>;

    /// Set the strength of a single installed LoRA
    fn set_lora_strength(&self, strength: f64);
}
