//! lorastack Core - Host object model
//!
//! Types describing the model objects a node-based image-generation host hands
//! to the LoRA loader nodes, and the interfaces those objects expose.
//!
//! # Object Graph
//!
//! ```text
//! ModelHandle ──Arc──▶ ModelContainer ──▶ DiffusionSlot ──▶ Option<Indirection>
//!                           │                   │
//!                           ▼                   ▼
//!                      ModelConfig      Arc<dyn DiffusionModule>
//!                                        ├── FluxWrapper { loras, Arc<Transformer> }
//!                                        └── native model (update_lora_params)
//! ```
//!
//! Everything behind an `Arc` is shared between handles. A node that wants a
//! different LoRA set builds new containers and wrappers around the same
//! `Arc<Transformer>`; it never writes through a shared pointer.

pub mod clip;
pub mod handle;
pub mod module;
pub mod native;

pub use clip::ClipHandle;
pub use handle::{Device, ModelConfig, ModelContainer, ModelHandle, Patch, UnetConfig};
pub use module::{
    DiffusionModule, DiffusionSlot, FluxWrapper, Indirection, Opaque, Transformer, WrapperState,
};
pub use native::{ComposedLora, LoraParams, NativeError, NativeLoraModel};
