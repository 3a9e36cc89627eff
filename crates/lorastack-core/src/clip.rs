//! Text encoder handles

use crate::handle::Patch;
use std::sync::Arc;

/// Host handle to a loaded text encoder
#[derive(Debug, Clone)]
pub struct ClipHandle {
    /// Encoder name
    pub name: String,
    /// Shared encoder weights
    pub weights: Arc<Vec<u8>>,
    /// Weight patches, applied in order
    pub patches: Vec<Patch>,
}

impl ClipHandle {
    /// Create a new handle
    pub fn new(name: impl Into<String>, weights: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            weights: Arc::new(weights),
            patches: Vec::new(),
        }
    }

    /// Append a patch
    pub fn add_patches(&mut self, patch: Patch) {
        self.patches.push(patch);
    }
}
