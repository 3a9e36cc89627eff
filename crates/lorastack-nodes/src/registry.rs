//! Node class registry
//!
//! Maps the class names the host stores in saved graphs to node constructors
//! and display names.

use crate::adapter::AdapterLoraStacker;
use crate::context::NodeContext;
use crate::flux::{FluxLoraMultiLoader, FluxLoraMultiLoaderFixed};
use crate::node::{LoaderNode, NodeDescriptor};
use crate::standard::LoraStacker;
use lorastack_lora::stack::MAX_SLOTS;
use std::collections::BTreeMap;
use tracing::info;

type Constructor = Box<dyn Fn(&NodeContext) -> Box<dyn LoaderNode> + Send + Sync>;

struct Registration {
    display_name: String,
    construct: Constructor,
}

/// Registered node classes
pub struct NodeRegistry {
    ctx: NodeContext,
    nodes: BTreeMap<String, Registration>,
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new(ctx: NodeContext) -> Self {
        Self {
            ctx,
            nodes: BTreeMap::new(),
        }
    }

    /// Create a registry with every built-in node
    ///
    /// The fixed-slot variants are registered with ten slots.
    pub fn with_builtin(ctx: NodeContext) -> Self {
        let mut registry = Self::new(ctx);

        registry.register(
            FluxLoraMultiLoader::CLASS_NAME,
            FluxLoraMultiLoader::DISPLAY_NAME,
            |ctx| Box::new(FluxLoraMultiLoader::new(ctx.clone())),
        );
        registry.register(
            FluxLoraMultiLoaderFixed::class_name(MAX_SLOTS),
            "FLUX LoRA Loader V2",
            |ctx| Box::new(FluxLoraMultiLoaderFixed::new(ctx.clone(), MAX_SLOTS)),
        );
        registry.register(LoraStacker::class_name(MAX_SLOTS), "LoRA Stacker V2", |ctx| {
            Box::new(LoraStacker::new(ctx.clone(), MAX_SLOTS))
        });
        registry.register(
            AdapterLoraStacker::class_name(MAX_SLOTS),
            "SDNQ LoRA Stacker V2",
            |ctx| Box::new(AdapterLoraStacker::new(ctx.clone(), MAX_SLOTS)),
        );

        info!(count = registry.len(), "Registered loader nodes");
        registry
    }

    /// Register a node class
    pub fn register<F>(
        &mut self,
        class_name: impl Into<String>,
        display_name: impl Into<String>,
        construct: F,
    ) where
        F: Fn(&NodeContext) -> Box<dyn LoaderNode> + Send + Sync + 'static,
    {
        self.nodes.insert(
            class_name.into(),
            Registration {
                display_name: display_name.into(),
                construct: Box::new(construct),
            },
        );
    }

    /// Create a node instance by class name
    pub fn create(&self, class_name: &str) -> Option<Box<dyn LoaderNode>> {
        self.nodes
            .get(class_name)
            .map(|registration| (registration.construct)(&self.ctx))
    }

    /// Display name of a class
    pub fn display_name(&self, class_name: &str) -> Option<&str> {
        self.nodes
            .get(class_name)
            .map(|registration| registration.display_name.as_str())
    }

    /// Class name to display name mappings
    pub fn display_names(&self) -> BTreeMap<&str, &str> {
        self.nodes
            .iter()
            .map(|(class, registration)| (class.as_str(), registration.display_name.as_str()))
            .collect()
    }

    /// Descriptors of every registered class
    pub fn descriptors(&self) -> Vec<NodeDescriptor> {
        self.nodes
            .values()
            .map(|registration| (registration.construct)(&self.ctx).descriptor())
            .collect()
    }

    /// Get number of registered classes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if no classes are registered
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
