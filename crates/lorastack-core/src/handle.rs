//! Model handles
//!
//! A [`ModelHandle`] is what flows along `MODEL` edges of the host graph. It
//! is cheap to clone: the container holding the diffusion module is shared
//! through an `Arc`, so a clone that wants a different module has to install
//! a new container rather than edit the shared one.

use crate::module::DiffusionSlot;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    /// Host memory
    Cpu,
    /// CUDA device by ordinal
    Cuda(u32),
}

/// Denoiser architecture parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnetConfig {
    /// Latent input channels
    pub in_channels: usize,
    /// Latent output channels
    pub out_channels: usize,
}

impl Default for UnetConfig {
    fn default() -> Self {
        Self {
            in_channels: 16,
            out_channels: 16,
        }
    }
}

/// Model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model family (e.g. "flux")
    pub model_type: String,
    /// Denoiser parameters
    pub unet_config: UnetConfig,
}

impl ModelConfig {
    /// Create a config with default denoiser parameters
    pub fn new(model_type: impl Into<String>) -> Self {
        Self {
            model_type: model_type.into(),
            unet_config: UnetConfig::default(),
        }
    }

    /// Set the latent input channels
    pub fn with_in_channels(mut self, in_channels: usize) -> Self {
        self.unet_config.in_channels = in_channels;
        self
    }
}

/// Container holding the diffusion module and its config
#[derive(Debug, Clone)]
pub struct ModelContainer {
    /// The diffusion slot
    pub diffusion_model: DiffusionSlot,
    /// Model configuration
    pub model_config: Arc<ModelConfig>,
}

impl ModelContainer {
    /// Create a new container
    pub fn new(diffusion_model: DiffusionSlot, model_config: ModelConfig) -> Self {
        Self {
            diffusion_model,
            model_config: Arc::new(model_config),
        }
    }

    /// A copy of this container with a different diffusion slot
    pub fn with_diffusion_model(&self, diffusion_model: DiffusionSlot) -> Self {
        Self {
            diffusion_model,
            model_config: Arc::clone(&self.model_config),
        }
    }

    /// A copy of this container with a different config
    pub fn with_model_config(&self, model_config: ModelConfig) -> Self {
        Self {
            diffusion_model: self.diffusion_model.clone(),
            model_config: Arc::new(model_config),
        }
    }
}

/// A weight patch recorded on a handle
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    /// LoRA file the patch came from
    pub source: PathBuf,
    /// Keys the patch applies to
    pub keys: Arc<[String]>,
    /// Patch strength
    pub strength: f64,
}

/// Host handle to a loaded diffusion model
#[derive(Debug, Clone)]
pub struct ModelHandle {
    /// Model container
    pub model: Arc<ModelContainer>,
    /// Device used for inference
    pub load_device: Device,
    /// Device weights are moved to when idle
    pub offload_device: Device,
    /// Model size in bytes
    pub size: u64,
    /// Weight patches, applied in order
    pub patches: Vec<Patch>,
    patches_uuid: Uuid,
}

impl ModelHandle {
    /// Create a new handle
    pub fn new(model: ModelContainer, load_device: Device, offload_device: Device) -> Self {
        Self {
            model: Arc::new(model),
            load_device,
            offload_device,
            size: 0,
            patches: Vec::new(),
            patches_uuid: Uuid::new_v4(),
        }
    }

    /// The diffusion slot of the container
    pub fn diffusion_model(&self) -> &DiffusionSlot {
        &self.model.diffusion_model
    }

    /// Identifier of the current patch set
    pub fn patches_uuid(&self) -> Uuid {
        self.patches_uuid
    }

    /// Append patches, returning the keys that were added
    pub fn add_patches(&mut self, patch: Patch) -> Arc<[String]> {
        let keys = Arc::clone(&patch.keys);
        self.patches.push(patch);
        self.patches_uuid = Uuid::new_v4();
        keys
    }

    /// Check if two handles share the same container
    pub fn shares_container(&self, other: &ModelHandle) -> bool {
        Arc::ptr_eq(&self.model, &other.model)
    }
}
