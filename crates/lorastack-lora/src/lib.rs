//! lorastack LoRA - LoRA asset handling
//!
//! Resolves, reads and inspects LoRA files, and turns the slot widgets of a
//! loader node into a normalised stack.
//!
//! # Stack Normalisation
//!
//! ```text
//! slot 1: ("a.safetensors", 1.0)  ─┐
//! slot 2: ("b.safetensors", 0.0)   ├─▶ filter ─▶ dedupe ─▶ [("a.safetensors", 1.0),
//! slot 3: ("None", 5.0)            │                        ("c.safetensors", 0.5)]
//! slot 4: ("a.safetensors", 0.3)   │
//! slot 5: ("c.safetensors", 0.5)  ─┘
//! ```
//!
//! - Unset slots (`"None"` or empty) are skipped
//! - Strengths below `1e-5` in magnitude are skipped
//! - The first occurrence of a name wins; later repeats are dropped

pub mod compose;
pub mod convert;
pub mod header;
pub mod loader;
pub mod registry;
pub mod stack;

pub use compose::{ComposeError, LoraComposer};
pub use convert::{
    ConvertError, FormatConverter, SafetensorsConverter, TensorMapping, X_EMBEDDER_LORA_A,
};
pub use header::{HeaderError, SafetensorsHeader, TensorInfo};
pub use loader::{LoaderConfig, LoaderError, LoraFile, LoraLoader};
pub use registry::{LORA_CATEGORY, LoraFolders, PathResolver, ResolveError};
pub use stack::{
    AcceptedSlot, InputMode, InputValue, LoraStack, NONE_SENTINEL, NodeInputs, NormalizeConfig,
    StackEntry,
};
