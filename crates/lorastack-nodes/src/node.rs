//! Node abstraction
//!
//! A loader node declares its inputs and outputs through a
//! [`NodeDescriptor`] and turns one set of [`NodeArgs`] into its outputs.
//! The host owns scheduling; a node only runs when asked to.

use crate::adapter::AdapterPipeline;
use crate::error::NodeError;
use lorastack_core::{ClipHandle, ModelHandle};
use lorastack_lora::{InputMode, InputValue, NodeInputs, stack};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Type of an object edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjectKind {
    /// Diffusion model handle
    Model,
    /// Text encoder handle
    Clip,
    /// Pipeline with named adapters
    Pipeline,
}

/// A host object flowing along a graph edge
#[derive(Debug, Clone)]
pub enum HostObject {
    Model(ModelHandle),
    Clip(ClipHandle),
    Pipeline(Arc<dyn AdapterPipeline>),
}

impl HostObject {
    /// Edge type of this object
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Model(_) => ObjectKind::Model,
            Self::Clip(_) => ObjectKind::Clip,
            Self::Pipeline(_) => ObjectKind::Pipeline,
        }
    }

    /// Identity of the object for change detection
    ///
    /// Two objects with the same identity are interchangeable as node inputs.
    pub fn identity(&self) -> String {
        match self {
            Self::Model(handle) => format!(
                "model:{:p}:{}",
                Arc::as_ptr(&handle.model),
                handle.patches_uuid()
            ),
            Self::Clip(clip) => format!(
                "clip:{:p}:{}",
                Arc::as_ptr(&clip.weights),
                clip.patches.len()
            ),
            Self::Pipeline(pipeline) => format!("pipeline:{:p}", Arc::as_ptr(pipeline)),
        }
    }

    /// The model handle, if this is one
    pub fn as_model(&self) -> Option<&ModelHandle> {
        match self {
            Self::Model(handle) => Some(handle),
            _ => None,
        }
    }

    /// The text encoder handle, if this is one
    pub fn as_clip(&self) -> Option<&ClipHandle> {
        match self {
            Self::Clip(clip) => Some(clip),
            _ => None,
        }
    }
}

/// Arguments of one node invocation
#[derive(Debug, Clone, Default)]
pub struct NodeArgs {
    /// Object inputs by name
    pub objects: BTreeMap<String, HostObject>,
    /// Widget values by name
    pub widgets: NodeInputs,
}

impl NodeArgs {
    /// Create empty arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object input
    pub fn with_object(mut self, name: impl Into<String>, object: HostObject) -> Self {
        self.objects.insert(name.into(), object);
        self
    }

    /// Add a widget value
    pub fn with_widget(mut self, name: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.widgets.insert(name.into(), value.into());
        self
    }

    /// Add LoRA slot `i` in simple mode
    pub fn with_slot(self, i: usize, name: &str, strength: f64) -> Self {
        self.with_widget(stack::lora_name_key(i), name)
            .with_widget(stack::lora_weight_key(i), strength)
    }

    fn object(&self, name: &str) -> Result<&HostObject, NodeError> {
        self.objects
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    /// Get a required model input
    pub fn model(&self, name: &str) -> Result<&ModelHandle, NodeError> {
        self.object(name)?
            .as_model()
            .ok_or_else(|| NodeError::WrongInputType {
                name: name.to_string(),
                expected: "MODEL",
            })
    }

    /// Get a required text encoder input
    pub fn clip(&self, name: &str) -> Result<&ClipHandle, NodeError> {
        self.object(name)?
            .as_clip()
            .ok_or_else(|| NodeError::WrongInputType {
                name: name.to_string(),
                expected: "CLIP",
            })
    }

    /// Get a required pipeline input
    pub fn pipeline(&self, name: &str) -> Result<&Arc<dyn AdapterPipeline>, NodeError> {
        match self.object(name)? {
            HostObject::Pipeline(pipeline) => Ok(pipeline),
            _ => Err(NodeError::WrongInputType {
                name: name.to_string(),
                expected: "PIPELINE",
            }),
        }
    }

    /// Integer widget value, if present and integral
    pub fn widget_i64(&self, name: &str) -> Option<i64> {
        self.widgets.get(name).and_then(InputValue::as_i64)
    }

    /// String widget value, if present
    pub fn widget_str(&self, name: &str) -> Option<&str> {
        self.widgets.get(name).and_then(InputValue::as_str)
    }
}

/// Widget or edge type of a declared input
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum InputKind {
    /// Object edge
    Object { kind: ObjectKind },
    /// Selector with fixed options
    Combo {
        options: Vec<String>,
        default: Option<String>,
    },
    /// Floating point widget
    Float {
        default: f64,
        min: Option<f64>,
        max: Option<f64>,
        step: f64,
    },
    /// Integer widget
    Int {
        default: i64,
        min: i64,
        max: i64,
        step: i64,
    },
}

/// A declared input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputSpec {
    /// Input name
    pub name: String,
    /// Input type
    #[serde(flatten)]
    pub kind: InputKind,
    /// Tooltip
    pub tooltip: String,
}

impl InputSpec {
    /// Declare an input
    pub fn new(name: impl Into<String>, kind: InputKind, tooltip: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            tooltip: tooltip.into(),
        }
    }

    /// Declare an object input
    pub fn object(name: impl Into<String>, kind: ObjectKind, tooltip: impl Into<String>) -> Self {
        Self::new(name, InputKind::Object { kind }, tooltip)
    }
}

/// Declared inputs, split by whether the host must supply them
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputSchema {
    /// Inputs that must be connected or set
    pub required: Vec<InputSpec>,
    /// Inputs that may be left out
    pub optional: Vec<InputSpec>,
}

impl InputSchema {
    /// Find an input by name
    pub fn get(&self, name: &str) -> Option<&InputSpec> {
        self.required
            .iter()
            .chain(self.optional.iter())
            .find(|spec| spec.name == name)
    }

    /// Total number of inputs
    pub fn len(&self) -> usize {
        self.required.len() + self.optional.len()
    }

    /// Check if no inputs are declared
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A declared output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputSpec {
    /// Output type
    pub kind: ObjectKind,
    /// Tooltip
    pub tooltip: String,
}

/// How the host may reuse results of this node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Reuse outputs while inputs are unchanged
    Memoize,
    /// Run on every evaluation
    AlwaysExecute,
}

/// How a node lays out its LoRA slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "layout", rename_all = "snake_case")]
pub enum SlotLayout {
    /// A fixed number of `(name, weight)` pairs
    Fixed { slots: usize },
    /// `lora_count` and `input_mode` widgets over a block of ten slots
    Dynamic,
}

/// Everything the host needs to register and draw a node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDescriptor {
    /// Registration key
    pub class_name: String,
    /// Title shown in the UI
    pub display_name: String,
    /// Menu category
    pub category: String,
    /// Help text
    pub description: String,
    /// Slot layout
    pub layout: SlotLayout,
    /// Declared inputs
    pub inputs: InputSchema,
    /// Declared outputs
    pub outputs: Vec<OutputSpec>,
    /// Result reuse policy
    pub cache_policy: CachePolicy,
}

impl NodeDescriptor {
    /// Inputs the UI shows for a dynamic layout at the given mode and count
    ///
    /// Fixed layouts show every input.
    pub fn visible_inputs(&self, mode: InputMode, lora_count: usize) -> Vec<&str> {
        let count = lora_count.clamp(1, stack::MAX_SLOTS);

        self.inputs
            .required
            .iter()
            .chain(self.inputs.optional.iter())
            .map(|spec| spec.name.as_str())
            .filter(|name| match self.layout {
                SlotLayout::Fixed { .. } => true,
                SlotLayout::Dynamic => match slot_field(name) {
                    None => true,
                    Some((field, i)) => i <= count && field.visible_in(mode),
                },
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotField {
    Name,
    Weight,
    ModelStrength,
    ClipStrength,
}

impl SlotField {
    fn visible_in(self, mode: InputMode) -> bool {
        match (self, mode) {
            (Self::Name, _) => true,
            (Self::Weight, InputMode::Simple) => true,
            (Self::ModelStrength | Self::ClipStrength, InputMode::Advanced) => true,
            _ => false,
        }
    }
}

fn slot_field(name: &str) -> Option<(SlotField, usize)> {
    const PREFIXES: &[(&str, SlotField)] = &[
        ("lora_name_", SlotField::Name),
        ("lora_wt_", SlotField::Weight),
        ("model_str_", SlotField::ModelStrength),
        ("clip_str_", SlotField::ClipStrength),
    ];

    PREFIXES.iter().find_map(|(prefix, field)| {
        name.strip_prefix(prefix)
            .and_then(|i| i.parse().ok())
            .map(|i| (*field, i))
    })
}

/// Selector for LoRA slot `i`
fn lora_name_spec(i: usize, choices: &[String], tooltip: String) -> InputSpec {
    InputSpec::new(
        stack::lora_name_key(i),
        InputKind::Combo {
            options: choices.to_vec(),
            default: Some(stack::NONE_SENTINEL.to_string()),
        },
        tooltip,
    )
}

fn strength_spec(name: String, step: f64, bounded: bool, tooltip: String) -> InputSpec {
    let (min, max) = if bounded {
        (Some(-100.0), Some(100.0))
    } else {
        (None, None)
    };
    InputSpec::new(
        name,
        InputKind::Float {
            default: 1.0,
            min,
            max,
            step,
        },
        tooltip,
    )
}

/// `(lora_name_i, lora_wt_i)` pairs for a fixed layout
pub fn fixed_slot_inputs(slots: usize, choices: &[String]) -> Vec<InputSpec> {
    let slots = slots.min(stack::MAX_SLOTS);
    let mut inputs = Vec::with_capacity(slots * 2);

    for i in 1..=slots {
        inputs.push(lora_name_spec(i, choices, format!("LoRA {i} filename")));
        inputs.push(strength_spec(
            stack::lora_weight_key(i),
            0.001,
            false,
            format!("LoRA {i} Strength"),
        ));
    }

    inputs
}

/// Mode and count widgets plus the ten-slot block for a dynamic layout
pub fn dynamic_slot_inputs(choices: &[String]) -> Vec<InputSpec> {
    let mut inputs = vec![
        InputSpec::new(
            "input_mode",
            InputKind::Combo {
                options: vec![
                    InputMode::Simple.name().to_string(),
                    InputMode::Advanced.name().to_string(),
                ],
                default: Some(InputMode::Simple.name().to_string()),
            },
            "Input mode: 'simple' shows only LoRA name and weight, 'advanced' shows separate model and clip strengths.",
        ),
        InputSpec::new(
            "lora_count",
            InputKind::Int {
                default: 3,
                min: 1,
                max: stack::MAX_SLOTS as i64,
                step: 1,
            },
            "Number of LoRA slots to process.",
        ),
    ];

    for i in 1..=stack::MAX_SLOTS {
        inputs.push(lora_name_spec(
            i,
            choices,
            format!("The file name of LoRA {i}. Select 'None' to skip this slot."),
        ));
        inputs.push(strength_spec(
            stack::lora_weight_key(i),
            0.01,
            true,
            format!("Overall strength for LoRA {i} (simple mode). This value can be negative."),
        ));
        inputs.push(strength_spec(
            stack::model_strength_key(i),
            0.01,
            true,
            format!("Model strength for LoRA {i} (advanced mode). This value can be negative."),
        ));
        inputs.push(strength_spec(
            stack::clip_strength_key(i),
            0.01,
            true,
            format!("CLIP strength for LoRA {i} (advanced mode). This value can be negative."),
        ));
    }

    inputs
}

/// A node the host can run
pub trait LoaderNode: Send {
    /// Describe the node's inputs and outputs
    fn descriptor(&self) -> NodeDescriptor;

    /// Run the node once
    fn execute(&mut self, args: &NodeArgs) -> Result<Vec<HostObject>, NodeError>;
}
