//! Host collaborators shared by the loader nodes

use crate::config::StackerConfig;
use crate::error::NodeError;
use lorastack_lora::{
    FormatConverter, LORA_CATEGORY, LoraComposer, LoraStack, PathResolver, SafetensorsConverter,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Resolver, composer and converter used while executing nodes
#[derive(Clone)]
pub struct NodeContext {
    /// Resolves selected names to files
    pub resolver: Arc<dyn PathResolver + Send + Sync>,
    /// Merges several LoRAs for native models
    pub composer: Option<Arc<dyn LoraComposer + Send + Sync>>,
    /// Reads tensor layouts of LoRA files
    pub converter: Arc<dyn FormatConverter + Send + Sync>,
    /// Node configuration
    pub config: StackerConfig,
}

impl NodeContext {
    /// Create a context around a resolver, with the safetensors converter and
    /// no composer
    pub fn new(resolver: Arc<dyn PathResolver + Send + Sync>) -> Self {
        Self {
            resolver,
            composer: None,
            converter: Arc::new(SafetensorsConverter::default()),
            config: StackerConfig::default(),
        }
    }

    /// Set the composer
    pub fn with_composer(mut self, composer: Arc<dyn LoraComposer + Send + Sync>) -> Self {
        self.composer = Some(composer);
        self
    }

    /// Set the format converter
    pub fn with_converter(mut self, converter: Arc<dyn FormatConverter + Send + Sync>) -> Self {
        self.converter = converter;
        self
    }

    /// Set the node configuration
    pub fn with_config(mut self, config: StackerConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve a single LoRA name
    pub fn resolve(&self, name: &str) -> Result<PathBuf, NodeError> {
        self.resolver
            .resolve(LORA_CATEGORY, name)
            .map_err(|source| NodeError::lora_not_found(name, source))
    }

    /// Resolve every entry of a stack, in order
    ///
    /// Fails on the first name that does not resolve.
    pub fn resolve_stack(&self, stack: &LoraStack) -> Result<Vec<(PathBuf, f64)>, NodeError> {
        stack
            .iter()
            .map(|entry| Ok::<_, NodeError>((self.resolve(&entry.name)?, entry.strength)))
            .collect()
    }

    /// Choices for LoRA selector widgets
    pub fn lora_choices(&self) -> Vec<String> {
        self.resolver.lora_choices()
    }
}

impl fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeContext")
            .field("composer", &self.composer.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
