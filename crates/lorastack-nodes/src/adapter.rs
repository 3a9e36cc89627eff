//! Adapter-set LoRA stacker
//!
//! Pipelines that manage LoRAs as named adapters are updated in place: every
//! existing adapter is unloaded, each enabled slot is loaded under its own
//! adapter name, and the loaded set is activated with its weights.

use crate::context::NodeContext;
use crate::error::NodeError;
use crate::node::{
    CachePolicy, HostObject, InputSchema, InputSpec, LoaderNode, NodeArgs, NodeDescriptor,
    ObjectKind, OutputSpec, SlotLayout, fixed_slot_inputs,
};
use lorastack_lora::{InputValue, NONE_SENTINEL, stack};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{Level, info, span, warn};

/// Error reported by a pipeline
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct AdapterError(pub String);

/// Where adapter weights are loaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoraSource {
    /// A weights file inside a local directory
    File { dir: PathBuf, weight_name: String },
    /// A hub repository id
    Repo(String),
}

impl LoraSource {
    /// Source for a resolved path; anything that is not a local file is
    /// treated as a repository id
    pub fn from_path(path: &Path) -> Self {
        match (path.is_file(), path.parent(), path.file_name()) {
            (true, Some(dir), Some(name)) => Self::File {
                dir: dir.to_path_buf(),
                weight_name: name.to_string_lossy().into_owned(),
            },
            _ => Self::Repo(path.to_string_lossy().into_owned()),
        }
    }
}

/// A pipeline holding LoRAs as named adapters
///
/// Calls act on the shared pipeline through `&self`.
pub trait AdapterPipeline: Send + Sync + fmt::Debug {
    /// Names of the loaded adapters
    fn adapter_names(&self) -> Vec<String>;

    /// Unload every adapter
    fn unload_lora_weights(&self) -> Result<(), AdapterError>;

    /// Load weights under `adapter_name`
    fn load_lora_weights(&self, source: &LoraSource, adapter_name: &str)
    -> Result<(), AdapterError>;

    /// Activate adapters with the given weights
    fn set_adapters(&self, names: &[String], weights: &[f64]) -> Result<(), AdapterError>;
}

/// Adapter name for slot `i`
pub fn adapter_name(i: usize) -> String {
    format!("lora_{i}")
}

/// LoRA stacker for adapter pipelines
#[derive(Debug, Clone)]
pub struct AdapterLoraStacker {
    ctx: NodeContext,
    slots: usize,
}

impl AdapterLoraStacker {
    /// Create a stacker with `slots` slot pairs
    pub fn new(ctx: NodeContext, slots: usize) -> Self {
        Self {
            ctx,
            slots: slots.clamp(1, stack::MAX_SLOTS),
        }
    }

    /// Registration key for a slot count
    pub fn class_name(slots: usize) -> String {
        format!("SDNQLoraStackerV2_{slots}")
    }

    /// Enabled slots as `(index, name, strength)`, without deduplication
    ///
    /// A slot is enabled only when both its name and weight are present.
    pub fn enabled_slots(&self, args: &NodeArgs) -> Vec<(usize, String, f64)> {
        let threshold = self.ctx.config.normalize.zero_threshold;

        (1..=self.slots)
            .filter_map(|i| {
                let name = args
                    .widgets
                    .get(&stack::lora_name_key(i))
                    .and_then(InputValue::as_str)?;
                let strength = args
                    .widgets
                    .get(&stack::lora_weight_key(i))
                    .and_then(InputValue::as_f64)?;

                if name.is_empty() || name == NONE_SENTINEL || strength.abs() < threshold {
                    return None;
                }
                Some((i, name.to_string(), strength))
            })
            .collect()
    }
}

impl LoaderNode for AdapterLoraStacker {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            class_name: Self::class_name(self.slots),
            display_name: "SDNQ LoRA Stacker V2".to_string(),
            category: "loaders".to_string(),
            description: format!("Load up to {} LoRAs.", self.slots),
            layout: SlotLayout::Fixed { slots: self.slots },
            inputs: InputSchema {
                required: vec![InputSpec::object(
                    "model",
                    ObjectKind::Pipeline,
                    "The diffusion model loaded by SDNQ Model Loader (DiffusionPipeline).",
                )],
                optional: fixed_slot_inputs(self.slots, &self.ctx.lora_choices()),
            },
            outputs: vec![OutputSpec {
                kind: ObjectKind::Pipeline,
                tooltip: "The modified diffusion model.".to_string(),
            }],
            cache_policy: CachePolicy::Memoize,
        }
    }

    fn execute(&mut self, args: &NodeArgs) -> Result<Vec<HostObject>, NodeError> {
        let class = Self::class_name(self.slots);
        let _span = span!(Level::DEBUG, "execute_node", class = %class).entered();

        let pipeline = Arc::clone(args.pipeline("model")?);

        let existing = pipeline.adapter_names();
        if !existing.is_empty() {
            info!(count = existing.len(), adapters = ?existing, "Unloading existing adapters");
            if let Err(e) = pipeline.unload_lora_weights() {
                warn!(error = %e, "Could not unload existing adapters");
            }
        }

        let mut names = Vec::new();
        let mut weights = Vec::new();

        for (i, name, strength) in self.enabled_slots(args) {
            let path = match self.ctx.resolve(&name) {
                Ok(path) => path,
                Err(e) => {
                    warn!(slot = i, error = %e, "Could not resolve LoRA path");
                    continue;
                }
            };

            let adapter = adapter_name(i);
            match pipeline.load_lora_weights(&LoraSource::from_path(&path), &adapter) {
                Ok(()) => {
                    info!(slot = i, name = %name, strength, "LoRA loaded");
                    names.push(adapter);
                    weights.push(strength);
                }
                Err(e) => {
                    warn!(slot = i, name = %name, error = %e, "Failed to load LoRA");
                }
            }
        }

        if names.is_empty() {
            info!("No LoRAs to load");
        } else {
            pipeline.set_adapters(&names, &weights)?;
            info!(count = names.len(), "LoRAs applied to pipeline");
        }

        Ok(vec![HostObject::Pipeline(pipeline)])
    }
}
