//! Diffusion modules and the optimized-module indirection
//!
//! The host stores one diffusion module per model container. That module is
//! either the LoRA-list wrapper defined here, a native model that composes
//! LoRAs itself, or something this crate knows nothing about. A compile step
//! run by the host may have put an [`Indirection`] in front of it.

use crate::native::NativeLoraModel;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Shared, host-owned value carried by reference
pub type Opaque = Arc<dyn Any + Send + Sync>;

/// A module that can sit in a model container's diffusion slot
pub trait DiffusionModule: Any + Send + Sync + fmt::Debug {
    /// Concrete kind name, used in diagnostics
    fn kind(&self) -> &str;

    /// Upcast for concrete-type inspection
    fn as_any(&self) -> &dyn Any;

    /// Native LoRA interface, if this module manages LoRAs itself
    fn as_native(&self) -> Option<&dyn NativeLoraModel> {
        None
    }
}

/// The quantized transformer shared by every wrapper built around it
#[derive(Debug)]
pub struct Transformer {
    /// Model name
    pub name: String,
    /// Quantization precision (e.g. "int4", "fp4")
    pub precision: String,
    /// Packed weight storage
    pub weights: Vec<u8>,
}

impl Transformer {
    /// Create a new transformer
    pub fn new(name: impl Into<String>, precision: impl Into<String>, weights: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            precision: precision.into(),
            weights,
        }
    }
}

/// Runtime state the wrapper keeps between sampling steps
#[derive(Debug, Clone, Default)]
pub struct WrapperState {
    /// Timestep of the previous forward call
    pub prev_timestep: Option<f64>,
    /// First-block cache context
    pub cache_context: Option<Opaque>,
    /// Time/text embedding saved before a PuLID patch replaced it
    pub original_time_text_embed: Option<Opaque>,
}

/// Wrapper that applies a list of LoRA files on top of a shared transformer
///
/// The LoRA list is plain data; the wrapper hands it to the transformer at
/// forward time. Two wrappers with different lists can share one transformer.
#[derive(Debug, Clone)]
pub struct FluxWrapper {
    /// The transformer, shared by reference
    pub transformer: Arc<Transformer>,
    /// Model config
    pub config: Option<Opaque>,
    /// PuLID identity pipeline
    pub pulid_pipeline: Option<Opaque>,
    /// Replacement forward function
    pub customized_forward: Option<Opaque>,
    /// Keyword arguments for the customized forward
    pub forward_kwargs: Option<Opaque>,
    /// Runtime state
    pub state: WrapperState,
    /// LoRA files and their strengths, in application order
    pub loras: Vec<(PathBuf, f64)>,
}

impl FluxWrapper {
    /// Kind name reported for this wrapper
    pub const KIND: &'static str = "ComfyFluxWrapper";

    /// Create a wrapper with no LoRAs
    pub fn new(transformer: Arc<Transformer>) -> Self {
        Self {
            transformer,
            config: None,
            pulid_pipeline: None,
            customized_forward: None,
            forward_kwargs: None,
            state: WrapperState::default(),
            loras: Vec::new(),
        }
    }

    /// Set the model config
    pub fn with_config(mut self, config: Opaque) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the PuLID pipeline
    pub fn with_pulid_pipeline(mut self, pipeline: Opaque) -> Self {
        self.pulid_pipeline = Some(pipeline);
        self
    }

    /// Set a customized forward function and its keyword arguments
    pub fn with_customized_forward(mut self, forward: Opaque, kwargs: Option<Opaque>) -> Self {
        self.customized_forward = Some(forward);
        self.forward_kwargs = kwargs;
        self
    }

    /// Set the LoRA list
    pub fn with_loras(mut self, loras: Vec<(PathBuf, f64)>) -> Self {
        self.loras = loras;
        self
    }

    /// A wrapper around the same transformer with the same non-LoRA
    /// configuration and runtime state, and the given LoRA list
    pub fn rebuild(&self, loras: Vec<(PathBuf, f64)>) -> Self {
        Self {
            transformer: Arc::clone(&self.transformer),
            config: self.config.clone(),
            pulid_pipeline: self.pulid_pipeline.clone(),
            customized_forward: self.customized_forward.clone(),
            forward_kwargs: self.forward_kwargs.clone(),
            state: self.state.clone(),
            loras,
        }
    }
}

impl DiffusionModule for FluxWrapper {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Options of the compile step that produced an optimized module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indirection {
    /// Compiler backend
    pub backend: String,
    /// Compile mode
    pub mode: Option<String>,
    /// Whether the whole graph was captured
    pub fullgraph: bool,
    /// Dynamic shape handling
    pub dynamic: Option<bool>,
}

impl Indirection {
    /// Indirection for the given compiler backend with default options
    pub fn compiled(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            mode: None,
            fullgraph: false,
            dynamic: None,
        }
    }

    /// Set the compile mode
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }
}

/// The diffusion slot of a model container
#[derive(Debug, Clone)]
pub struct DiffusionSlot {
    indirection: Option<Indirection>,
    module: Arc<dyn DiffusionModule>,
}

impl DiffusionSlot {
    /// A slot holding the module directly
    pub fn direct(module: Arc<dyn DiffusionModule>) -> Self {
        Self {
            indirection: None,
            module,
        }
    }

    /// A slot holding the module behind an optimized-module indirection
    pub fn optimized(indirection: Indirection, module: Arc<dyn DiffusionModule>) -> Self {
        Self {
            indirection: Some(indirection),
            module,
        }
    }

    /// The indirection, if the module was optimized
    pub fn indirection(&self) -> Option<&Indirection> {
        self.indirection.as_ref()
    }

    /// The real module, one level below any indirection
    pub fn module(&self) -> &Arc<dyn DiffusionModule> {
        &self.module
    }

    /// A slot with the same indirection around a different module
    pub fn rewrap(&self, module: Arc<dyn DiffusionModule>) -> Self {
        Self {
            indirection: self.indirection.clone(),
            module,
        }
    }
}
