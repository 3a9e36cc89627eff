//! Standard LoRA stacker for model and text encoder
//!
//! Unlike the FLUX loaders this node applies each LoRA as weight patches on
//! both the diffusion model and the text encoder, one entry at a time, with
//! equal model and encoder strength.

use crate::context::NodeContext;
use crate::error::NodeError;
use crate::node::{
    CachePolicy, HostObject, InputSchema, InputSpec, LoaderNode, NodeArgs, NodeDescriptor,
    ObjectKind, OutputSpec, SlotLayout, fixed_slot_inputs,
};
use lorastack_core::{ClipHandle, ModelHandle, Patch};
use lorastack_lora::{InputMode, LoraFile, LoraLoader, LoraStack, stack::MAX_SLOTS};
use std::sync::Arc;
use tracing::{Level, debug, span};

/// Applies one loaded LoRA to a model and text encoder pair
pub trait LoraPatcher: Send + Sync {
    /// Return patched clones of `model` and `clip`
    fn patch(
        &self,
        model: &ModelHandle,
        clip: &ClipHandle,
        lora: &LoraFile,
        strength_model: f64,
        strength_clip: f64,
    ) -> Result<(ModelHandle, ClipHandle), NodeError>;
}

/// Check if a LoRA key targets the text encoder
pub fn is_text_encoder_key(key: &str) -> bool {
    key.starts_with("lora_te") || key.starts_with("text_encoder")
}

/// Patcher that splits LoRA keys between model and text encoder by prefix
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyRemapPatcher;

impl LoraPatcher for KeyRemapPatcher {
    fn patch(
        &self,
        model: &ModelHandle,
        clip: &ClipHandle,
        lora: &LoraFile,
        strength_model: f64,
        strength_clip: f64,
    ) -> Result<(ModelHandle, ClipHandle), NodeError> {
        let (clip_keys, model_keys): (Vec<String>, Vec<String>) = lora
            .keys()
            .map(str::to_string)
            .partition(|key| is_text_encoder_key(key));

        let mut new_model = model.clone();
        let mut new_clip = clip.clone();

        if !model_keys.is_empty() {
            new_model.add_patches(Patch {
                source: lora.path.clone(),
                keys: Arc::from(model_keys),
                strength: strength_model,
            });
        }
        if !clip_keys.is_empty() {
            new_clip.add_patches(Patch {
                source: lora.path.clone(),
                keys: Arc::from(clip_keys),
                strength: strength_clip,
            });
        }

        Ok((new_model, new_clip))
    }
}

/// LoRA stacker producing a patched `MODEL` and `CLIP`
pub struct LoraStacker {
    ctx: NodeContext,
    slots: usize,
    loader: LoraLoader,
    patcher: Arc<dyn LoraPatcher>,
    loaded: Option<LoraFile>,
}

impl LoraStacker {
    /// Create a stacker with `slots` slot pairs and the key-remapping patcher
    pub fn new(ctx: NodeContext, slots: usize) -> Self {
        let loader = LoraLoader::new(ctx.config.loader_config());
        Self {
            ctx,
            slots: slots.clamp(1, MAX_SLOTS),
            loader,
            patcher: Arc::new(KeyRemapPatcher),
            loaded: None,
        }
    }

    /// Replace the patcher
    pub fn with_patcher(mut self, patcher: Arc<dyn LoraPatcher>) -> Self {
        self.patcher = patcher;
        self
    }

    /// Registration key for a slot count
    pub fn class_name(slots: usize) -> String {
        format!("LoraStackerV2_{slots}")
    }

    /// Load a file, reusing the last one when the path matches
    fn load(&mut self, path: &std::path::Path) -> Result<&LoraFile, NodeError> {
        if self.loaded.as_ref().is_some_and(|f| f.path != path) {
            self.loaded = None;
        }

        let file = match self.loaded.take() {
            Some(file) => {
                debug!(path = %path.display(), "Reusing loaded LoRA");
                file
            }
            None => self.loader.load(path)?,
        };

        Ok(self.loaded.insert(file))
    }
}

impl LoaderNode for LoraStacker {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            class_name: Self::class_name(self.slots),
            display_name: "LoRA Stacker V2".to_string(),
            category: "loaders".to_string(),
            description: format!("Load up to {} LoRAs.", self.slots),
            layout: SlotLayout::Fixed { slots: self.slots },
            inputs: InputSchema {
                required: vec![
                    InputSpec::object(
                        "model",
                        ObjectKind::Model,
                        "The diffusion model loaded by Nunchaku FLUX DiT Loader.",
                    ),
                    InputSpec::object("clip", ObjectKind::Clip, "The CLIP model."),
                ],
                optional: fixed_slot_inputs(self.slots, &self.ctx.lora_choices()),
            },
            outputs: vec![
                OutputSpec {
                    kind: ObjectKind::Model,
                    tooltip: "The modified diffusion model.".to_string(),
                },
                OutputSpec {
                    kind: ObjectKind::Clip,
                    tooltip: "The modified CLIP model.".to_string(),
                },
            ],
            cache_policy: CachePolicy::Memoize,
        }
    }

    fn execute(&mut self, args: &NodeArgs) -> Result<Vec<HostObject>, NodeError> {
        let class = Self::class_name(self.slots);
        let _span = span!(Level::DEBUG, "execute_node", class = %class).entered();

        let mut model = args.model("model")?.clone();
        let mut clip = args.clip("clip")?.clone();

        let stack = LoraStack::from_inputs(
            &args.widgets,
            self.slots,
            InputMode::Simple,
            &self.ctx.config.normalize,
        );

        for entry in &stack {
            let path = self.ctx.resolve(&entry.name)?;
            let patcher = Arc::clone(&self.patcher);
            let lora = self.load(&path)?;

            (model, clip) = patcher.patch(&model, &clip, lora, entry.strength, entry.strength)?;
            debug!(name = %entry.name, strength = entry.strength, "Applied LoRA");
        }

        Ok(vec![HostObject::Model(model), HostObject::Clip(clip)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconstruct::tests::wrapper_model;
    use lorastack_lora::{LORA_CATEGORY, LoraFolders, SafetensorsHeader, TensorInfo};
    use std::path::Path;
    use tempfile::TempDir;

    fn write_lora(path: &Path, keys: &[&str]) {
        let mut header = SafetensorsHeader::default();
        for (i, key) in keys.iter().enumerate() {
            let start = (i * 4) as u64;
            header.tensors.insert(
                key.to_string(),
                TensorInfo {
                    dtype: "F32".to_string(),
                    shape: vec![1],
                    data_offsets: [start, start + 4],
                },
            );
        }
        let mut bytes = header.to_bytes().unwrap();
        bytes.resize(bytes.len() + header.data_size() as usize, 0);
        std::fs::write(path, bytes).unwrap();
    }

    fn stacker(dir: &Path) -> LoraStacker {
        let mut folders = LoraFolders::empty();
        folders.add_search_path(LORA_CATEGORY, dir);
        LoraStacker::new(NodeContext::new(Arc::new(folders)), 10)
    }

    fn args(model: &ModelHandle, clip: &ClipHandle) -> NodeArgs {
        NodeArgs::new()
            .with_object("model", HostObject::Model(model.clone()))
            .with_object("clip", HostObject::Clip(clip.clone()))
    }

    #[test]
    fn test_text_encoder_keys() {
        assert!(is_text_encoder_key("lora_te1_text_model_encoder_layers_0.lora_up.weight"));
        assert!(is_text_encoder_key("text_encoders.clip_l.transformer.lora_A.weight"));
        assert!(!is_text_encoder_key("lora_unet_double_blocks_0.lora_up.weight"));
    }

    #[test]
    fn test_patches_model_and_clip() {
        let temp_dir = TempDir::new().unwrap();
        write_lora(
            &temp_dir.path().join("style.safetensors"),
            &["lora_te1_layer.lora_up.weight", "lora_unet_block.lora_up.weight"],
        );

        let model = wrapper_model(Vec::new());
        let clip = ClipHandle::new("clip_l", vec![0; 8]);
        let mut node = stacker(temp_dir.path());

        let outputs = node
            .execute(&args(&model, &clip).with_slot(1, "style.safetensors", 0.8))
            .unwrap();

        let new_model = outputs[0].as_model().unwrap();
        let new_clip = outputs[1].as_clip().unwrap();
        assert_eq!(new_model.patches.len(), 1);
        assert_eq!(&*new_model.patches[0].keys, ["lora_unet_block.lora_up.weight"]);
        assert_eq!(new_model.patches[0].strength, 0.8);
        assert_eq!(new_clip.patches.len(), 1);
        assert_eq!(new_clip.patches[0].strength, 0.8);

        assert!(model.patches.is_empty());
        assert!(clip.patches.is_empty());
        assert_ne!(new_model.patches_uuid(), model.patches_uuid());
    }

    #[test]
    fn test_applies_in_stack_order() {
        let temp_dir = TempDir::new().unwrap();
        write_lora(&temp_dir.path().join("a.safetensors"), &["lora_unet_a.weight"]);
        write_lora(&temp_dir.path().join("b.safetensors"), &["lora_unet_b.weight"]);

        let model = wrapper_model(Vec::new());
        let clip = ClipHandle::new("clip_l", vec![0; 8]);
        let mut node = stacker(temp_dir.path());

        let outputs = node
            .execute(
                &args(&model, &clip)
                    .with_slot(1, "b.safetensors", 0.5)
                    .with_slot(2, "a.safetensors", 1.0)
                    .with_slot(3, "b.safetensors", 0.2),
            )
            .unwrap();

        let patches = &outputs[0].as_model().unwrap().patches;
        let keys: Vec<&str> = patches.iter().map(|p| p.keys[0].as_str()).collect();
        assert_eq!(keys, vec!["lora_unet_b.weight", "lora_unet_a.weight"]);
        assert!(outputs[1].as_clip().unwrap().patches.is_empty());
    }

    #[test]
    fn test_file_cache_keeps_last_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.safetensors");
        write_lora(&path, &["lora_unet_a.weight"]);

        let model = wrapper_model(Vec::new());
        let clip = ClipHandle::new("clip_l", vec![0; 8]);
        let mut node = stacker(temp_dir.path());
        let args = args(&model, &clip).with_slot(1, "a.safetensors", 1.0);

        node.execute(&args).unwrap();
        let first_hash = node.loaded.as_ref().unwrap().hash;

        // Served from the cache even after the file changes on disk
        write_lora(&path, &["lora_unet_b.weight"]);
        let outputs = node.execute(&args).unwrap();

        assert_eq!(node.loaded.as_ref().unwrap().hash, first_hash);
        assert_eq!(
            &*outputs[0].as_model().unwrap().patches[0].keys,
            ["lora_unet_a.weight"]
        );
    }

    #[test]
    fn test_missing_lora() {
        let temp_dir = TempDir::new().unwrap();
        let model = wrapper_model(Vec::new());
        let clip = ClipHandle::new("clip_l", vec![0; 8]);
        let mut node = stacker(temp_dir.path());

        let result = node.execute(&args(&model, &clip).with_slot(1, "gone.safetensors", 1.0));
        assert!(matches!(result, Err(NodeError::LoraNotFound { .. })));
    }

    #[test]
    fn test_descriptor_outputs() {
        let temp_dir = TempDir::new().unwrap();
        let desc = stacker(temp_dir.path()).descriptor();

        assert_eq!(desc.class_name, "LoraStackerV2_10");
        assert_eq!(desc.cache_policy, CachePolicy::Memoize);
        let kinds: Vec<ObjectKind> = desc.outputs.iter().map(|o| o.kind).collect();
        assert_eq!(kinds, vec![ObjectKind::Model, ObjectKind::Clip]);
    }
}
