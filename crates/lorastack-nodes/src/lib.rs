//! lorastack Nodes - Multi-LoRA loader nodes
//!
//! Loader nodes read up to ten LoRA slots, normalise them into a stack and
//! return a model that carries exactly that stack. The input model is never
//! modified.
//!
//! # Execution
//!
//! ```text
//! slot widgets ─▶ LoraStack ──────────────────────────┐
//!                                                     ▼
//! MODEL ─▶ classify ─┬─ Wrapper ─▶ rebuild container + wrapper ─▶ MODEL'
//!                    └─ Native  ─▶ clear / set / compose      ─▶ MODEL
//! ```
//!
//! The standard and adapter-set stackers share the slot handling but apply
//! LoRAs through weight patches and named adapters respectively.

pub mod adapter;
pub mod cache;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod flux;
pub mod node;
pub mod reconstruct;
pub mod registry;
pub mod standard;

// Re-export commonly used types
pub use adapter::{AdapterError, AdapterLoraStacker, AdapterPipeline, LoraSource};
pub use cache::{CacheStats, ExecutionCache};
pub use config::StackerConfig;
pub use context::NodeContext;
pub use dispatch::{Classified, Strategy, classify};
pub use error::NodeError;
pub use flux::{FluxLoraMultiLoader, FluxLoraMultiLoaderFixed, apply_stack};
pub use node::{
    CachePolicy, HostObject, InputSchema, LoaderNode, NodeArgs, NodeDescriptor, ObjectKind,
};
pub use reconstruct::rebuild;
pub use registry::NodeRegistry;
pub use standard::{KeyRemapPatcher, LoraPatcher, LoraStacker};
