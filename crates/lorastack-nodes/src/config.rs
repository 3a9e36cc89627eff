//! Loader node configuration

use lorastack_lora::{LoaderConfig, NormalizeConfig};
use serde::{Deserialize, Serialize};

/// Configuration shared by the loader nodes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackerConfig {
    /// Slot limits and the zero-strength threshold
    pub normalize: NormalizeConfig,
    /// Widen the model's latent input channels to fit LoRAs that extend
    /// the input embedding (legacy behaviour)
    pub widen_in_channels: bool,
    /// Maximum LoRA file size in bytes when a node reads whole files
    pub max_file_size: Option<u64>,
}

impl StackerConfig {
    /// Enable or disable in-channel widening
    pub fn with_widen_in_channels(mut self, enabled: bool) -> Self {
        self.widen_in_channels = enabled;
        self
    }

    /// Loader configuration derived from this config
    pub fn loader_config(&self) -> LoaderConfig {
        let mut config = LoaderConfig::default();
        if let Some(max) = self.max_file_size {
            config.max_file_size = max;
        }
        config
    }
}
