//! Node execution errors

use crate::adapter::AdapterError;
use lorastack_lora::{ComposeError, ConvertError, LoaderError, ResolveError};
use thiserror::Error;

/// Errors that abort a node execution
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Model structure not recognized: unsupported diffusion module {kind}")]
    UnrecognizedModelKind { kind: String },

    #[error("LoRA not found: {name}")]
    LoraNotFound {
        name: String,
        #[source]
        source: ResolveError,
    },

    #[error("LoRA composition failed: {0}")]
    CompositionFailure(String),

    #[error("Native model rejected LoRA parameters: {0}")]
    NativeFailure(String),

    #[error("Invalid LoRA file {path}: {reason}")]
    InvalidLoraFile { path: String, reason: String },

    #[error("Failed to read LoRA: {0}")]
    Convert(#[from] ConvertError),

    #[error("Failed to load LoRA: {0}")]
    Load(#[from] LoaderError),

    #[error("Pipeline adapter call failed: {0}")]
    Adapter(#[from] AdapterError),

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Input {name} has the wrong type, expected {expected}")]
    WrongInputType { name: String, expected: &'static str },
}

impl NodeError {
    /// Build a `LoraNotFound` error for a selected name
    pub fn lora_not_found(name: impl Into<String>, source: ResolveError) -> Self {
        Self::LoraNotFound {
            name: name.into(),
            source,
        }
    }
}

impl From<ComposeError> for NodeError {
    fn from(error: ComposeError) -> Self {
        Self::CompositionFailure(error.to_string())
    }
}
