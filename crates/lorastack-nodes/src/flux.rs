//! FLUX multi-LoRA loader nodes
//!
//! Both nodes take a `MODEL`, normalise their slot widgets into a
//! [`LoraStack`] and return a model with exactly that stack applied.

use crate::context::NodeContext;
use crate::dispatch::classify;
use crate::error::NodeError;
use crate::node::{
    CachePolicy, HostObject, InputSchema, InputSpec, LoaderNode, NodeArgs, NodeDescriptor,
    ObjectKind, OutputSpec, SlotLayout, dynamic_slot_inputs, fixed_slot_inputs,
};
use crate::reconstruct::rebuild;
use lorastack_core::ModelHandle;
use lorastack_lora::{InputMode, LoraStack, stack::MAX_SLOTS};
use tracing::{Level, debug, span};

/// Default slot count of the dynamic node
pub const DEFAULT_LORA_COUNT: usize = 3;

/// Apply `stack` to `model`, the shared core of the FLUX nodes
pub fn apply_stack(
    model: &ModelHandle,
    stack: &LoraStack,
    ctx: &NodeContext,
) -> Result<ModelHandle, NodeError> {
    let classified = classify(model)?;
    debug!(
        strategy = classified.strategy.name(),
        loras = stack.len(),
        "Applying LoRA stack"
    );
    rebuild(model, classified, stack, ctx)
}

fn model_input(tooltip: &str) -> InputSpec {
    InputSpec::object("model", ObjectKind::Model, tooltip)
}

/// FLUX loader with `lora_count` and `input_mode` widgets
#[derive(Debug, Clone)]
pub struct FluxLoraMultiLoader {
    ctx: NodeContext,
}

impl FluxLoraMultiLoader {
    /// Registration key
    pub const CLASS_NAME: &'static str = "FluxLoraMultiLoader";
    /// Title shown in the UI
    pub const DISPLAY_NAME: &'static str = "FLUX LoRA Multi Loader";

    /// Create a new node
    pub fn new(ctx: NodeContext) -> Self {
        Self { ctx }
    }

    /// Normalise the widgets of one invocation
    pub fn stack(&self, args: &NodeArgs) -> LoraStack {
        let mode = args
            .widget_str("input_mode")
            .map(InputMode::from_name)
            .unwrap_or_default();
        let count = args
            .widget_i64("lora_count")
            .map(|c| c.clamp(1, MAX_SLOTS as i64) as usize)
            .unwrap_or(DEFAULT_LORA_COUNT);

        LoraStack::from_inputs(&args.widgets, count, mode, &self.ctx.config.normalize)
    }
}

impl LoaderNode for FluxLoraMultiLoader {
    fn descriptor(&self) -> NodeDescriptor {
        let mut required = vec![model_input(
            "The diffusion model the LoRAs will be applied to. \
             Make sure the model is loaded by `Nunchaku FLUX DiT Loader`.",
        )];
        required.extend(dynamic_slot_inputs(&self.ctx.lora_choices()));

        NodeDescriptor {
            class_name: Self::CLASS_NAME.to_string(),
            display_name: Self::DISPLAY_NAME.to_string(),
            category: "FLUX".to_string(),
            description: "Apply multiple LoRAs to a diffusion model in a single node. \
                Equivalent to chaining multiple LoRA nodes but more convenient for managing many LoRAs. \
                Supports up to 10 LoRAs simultaneously. Use 'lora_count' to control how many LoRAs are processed. \
                Set unused slots to 'None' to skip them."
                .to_string(),
            layout: SlotLayout::Dynamic,
            inputs: InputSchema {
                required,
                optional: Vec::new(),
            },
            outputs: vec![OutputSpec {
                kind: ObjectKind::Model,
                tooltip: "The modified diffusion model with all LoRAs applied.".to_string(),
            }],
            cache_policy: CachePolicy::AlwaysExecute,
        }
    }

    fn execute(&mut self, args: &NodeArgs) -> Result<Vec<HostObject>, NodeError> {
        let _span = span!(Level::DEBUG, "execute_node", class = Self::CLASS_NAME).entered();

        let model = args.model("model")?;
        let stack = self.stack(args);
        let model = apply_stack(model, &stack, &self.ctx)?;

        Ok(vec![HostObject::Model(model)])
    }
}

/// FLUX loader with a fixed number of `(name, weight)` slots
#[derive(Debug, Clone)]
pub struct FluxLoraMultiLoaderFixed {
    ctx: NodeContext,
    slots: usize,
}

impl FluxLoraMultiLoaderFixed {
    /// Create a node with `slots` slot pairs (at most ten)
    pub fn new(ctx: NodeContext, slots: usize) -> Self {
        Self {
            ctx,
            slots: slots.clamp(1, MAX_SLOTS),
        }
    }

    /// Registration key for a slot count
    pub fn class_name(slots: usize) -> String {
        format!("FluxLoraMultiLoader_{slots}")
    }

    /// Number of slot pairs
    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Normalise the widgets of one invocation
    pub fn stack(&self, args: &NodeArgs) -> LoraStack {
        LoraStack::from_inputs(
            &args.widgets,
            self.slots,
            InputMode::Simple,
            &self.ctx.config.normalize,
        )
    }
}

impl LoaderNode for FluxLoraMultiLoaderFixed {
    fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            class_name: Self::class_name(self.slots),
            display_name: "FLUX LoRA Loader V2".to_string(),
            category: "FLUX/MultiLoader".to_string(),
            description: format!("Load up to {} LoRAs.", self.slots),
            layout: SlotLayout::Fixed { slots: self.slots },
            inputs: InputSchema {
                required: vec![model_input(
                    "The diffusion model loaded by Nunchaku FLUX DiT Loader.",
                )],
                optional: fixed_slot_inputs(self.slots, &self.ctx.lora_choices()),
            },
            outputs: vec![OutputSpec {
                kind: ObjectKind::Model,
                tooltip: "The modified diffusion model.".to_string(),
            }],
            cache_policy: CachePolicy::AlwaysExecute,
        }
    }

    fn execute(&mut self, args: &NodeArgs) -> Result<Vec<HostObject>, NodeError> {
        let class = Self::class_name(self.slots);
        let _span = span!(Level::DEBUG, "execute_node", class = %class).entered();

        let model = args.model("model")?;
        let stack = self.stack(args);
        let model = apply_stack(model, &stack, &self.ctx)?;

        Ok(vec![HostObject::Model(model)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{FakeResolver, lora_path};
    use crate::reconstruct::tests::{
        NativeCall, RecordingComposer, RecordingNative, model_with, wrapper_model, wrapper_of,
    };
    use lorastack_core::DiffusionSlot;
    use std::sync::Arc;

    fn context(names: &[&str]) -> NodeContext {
        NodeContext::new(Arc::new(FakeResolver::with(names)))
    }

    fn output_model(outputs: Vec<HostObject>) -> ModelHandle {
        assert_eq!(outputs.len(), 1);
        outputs[0].as_model().unwrap().clone()
    }

    #[test]
    fn test_dynamic_node_respects_lora_count() {
        let mut node = FluxLoraMultiLoader::new(context(&["a", "b", "c"]));
        let model = wrapper_model(Vec::new());
        let args = NodeArgs::new()
            .with_object("model", HostObject::Model(model.clone()))
            .with_widget("lora_count", 2i64)
            .with_slot(1, "a", 1.0)
            .with_slot(2, "b", 0.5)
            .with_slot(3, "c", 0.8);

        let result = output_model(node.execute(&args).unwrap());

        assert_eq!(
            wrapper_of(&result).loras,
            vec![(lora_path("a"), 1.0), (lora_path("b"), 0.5)]
        );
        assert!(wrapper_of(&model).loras.is_empty());
    }

    #[test]
    fn test_dynamic_node_default_count() {
        let node = FluxLoraMultiLoader::new(context(&[]));
        let args = NodeArgs::new()
            .with_slot(1, "a", 1.0)
            .with_slot(3, "c", 1.0)
            .with_slot(4, "d", 1.0);

        assert_eq!(node.stack(&args).names(), vec!["a", "c"]);
    }

    #[test]
    fn test_dynamic_node_advanced_mode() {
        let node = FluxLoraMultiLoader::new(context(&[]));
        let args = NodeArgs::new()
            .with_widget("input_mode", "advanced")
            .with_widget("lora_count", 1i64)
            .with_widget("lora_name_1", "a")
            .with_widget("lora_wt_1", 0.0)
            .with_widget("model_str_1", 0.6)
            .with_widget("clip_str_1", 0.0);

        let stack = node.stack(&args);
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.entries()[0].strength, 0.6);
    }

    #[test]
    fn test_fixed_node_native_model() {
        let native = Arc::new(RecordingNative::default());
        let model = model_with(DiffusionSlot::direct(native.clone()));
        let composer = Arc::new(RecordingComposer::default());
        let mut node = FluxLoraMultiLoaderFixed::new(
            context(&["a", "b"]).with_composer(composer.clone()),
            10,
        );
        let args = NodeArgs::new()
            .with_object("model", HostObject::Model(model.clone()))
            .with_slot(1, "a", 1.0)
            .with_slot(2, "b", 0.5)
            .with_slot(7, "a", 0.3);

        let result = output_model(node.execute(&args).unwrap());

        assert!(result.shares_container(&model));
        assert_eq!(
            native.calls(),
            vec![NativeCall::Composed(vec![
                (lora_path("a"), 1.0),
                (lora_path("b"), 0.5)
            ])]
        );
        assert_eq!(composer.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_fixed_node_all_slots_empty() {
        let mut node = FluxLoraMultiLoaderFixed::new(context(&[]), 10);
        let model = wrapper_model(vec![(lora_path("old"), 1.0)]);
        let args = NodeArgs::new()
            .with_object("model", HostObject::Model(model))
            .with_slot(1, "None", 1.0);

        let result = output_model(node.execute(&args).unwrap());
        assert!(wrapper_of(&result).loras.is_empty());
    }

    #[test]
    fn test_missing_model_input() {
        let mut node = FluxLoraMultiLoaderFixed::new(context(&[]), 10);
        let result = node.execute(&NodeArgs::new());
        assert!(matches!(result, Err(NodeError::MissingInput(name)) if name == "model"));
    }

    #[test]
    fn test_descriptors() {
        let dynamic = FluxLoraMultiLoader::new(context(&["a"])).descriptor();
        assert_eq!(dynamic.class_name, "FluxLoraMultiLoader");
        assert_eq!(dynamic.cache_policy, CachePolicy::AlwaysExecute);
        assert_eq!(dynamic.inputs.required.len(), 1 + 2 + 40);

        let fixed = FluxLoraMultiLoaderFixed::new(context(&["a"]), 10).descriptor();
        assert_eq!(fixed.class_name, "FluxLoraMultiLoader_10");
        assert_eq!(fixed.inputs.optional.len(), 20);
        assert_eq!(fixed.outputs[0].kind, ObjectKind::Model);
    }
}
