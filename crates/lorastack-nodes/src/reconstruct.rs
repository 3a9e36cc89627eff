//! Non-mutating model reconstruction
//!
//! Builds the model handle a loader node returns. The input handle is only
//! borrowed: for wrapper models a fresh container and wrapper are allocated
//! around the shared transformer, for native models the LoRA state is handed
//! to the model itself and the same container is returned.
//!
//! ```text
//! original ──▶ container ──▶ [indirection] ──▶ FluxWrapper { loras: old } ──┐
//!                                                                          ├──▶ Arc<Transformer>
//! rebuilt  ──▶ container'──▶ [indirection'] ──▶ FluxWrapper { loras: new } ──┘
//! ```

use crate::context::NodeContext;
use crate::dispatch::{Classified, Strategy};
use crate::error::NodeError;
use lorastack_core::{
    DiffusionModule, FluxWrapper, Indirection, LoraParams, ModelHandle, NativeLoraModel,
};
use lorastack_lora::{LoraStack, X_EMBEDDER_LORA_A};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Build the handle that applies `stack` to `original`
pub fn rebuild(
    original: &ModelHandle,
    classified: Classified<'_>,
    stack: &LoraStack,
    ctx: &NodeContext,
) -> Result<ModelHandle, NodeError> {
    let loras = ctx.resolve_stack(stack)?;

    match classified.strategy {
        Strategy::Wrapper(wrapper) => {
            rebuild_wrapper(original, wrapper, classified.indirection, loras, ctx)
        }
        Strategy::Native(native) => {
            apply_native(native, loras, ctx)?;
            Ok(original.clone())
        }
    }
}

fn rebuild_wrapper(
    original: &ModelHandle,
    wrapper: &FluxWrapper,
    indirection: Option<&Indirection>,
    loras: Vec<(PathBuf, f64)>,
    ctx: &NodeContext,
) -> Result<ModelHandle, NodeError> {
    let widened = if ctx.config.widen_in_channels {
        let current = original.model.model_config.unet_config.in_channels;
        Some(widened_in_channels(&loras, current, ctx)?).filter(|c| *c > current)
    } else {
        None
    };

    debug!(
        count = loras.len(),
        optimized = indirection.is_some(),
        "Rebuilding wrapper"
    );

    let module: Arc<dyn DiffusionModule> = Arc::new(wrapper.rebuild(loras));
    let slot = original.diffusion_model().rewrap(module);
    let mut container = original.model.with_diffusion_model(slot);

    if let Some(in_channels) = widened {
        info!(
            from = container.model_config.unet_config.in_channels,
            to = in_channels,
            "Widening latent input channels"
        );
        let config = container.model_config.as_ref().clone().with_in_channels(in_channels);
        container = container.with_model_config(config);
    }

    let mut rebuilt = original.clone();
    rebuilt.model = Arc::new(container);
    Ok(rebuilt)
}

/// Largest input channel count any LoRA in `loras` needs, at least `current`
fn widened_in_channels(
    loras: &[(PathBuf, f64)],
    current: usize,
    ctx: &NodeContext,
) -> Result<usize, NodeError> {
    let mut max_in_channels = current;

    for (path, _) in loras {
        let mapping = ctx.converter.convert_to_canonical(path)?;
        let Some(shape) = mapping.get(X_EMBEDDER_LORA_A) else {
            continue;
        };

        let invalid = |reason: String| NodeError::InvalidLoraFile {
            path: path.display().to_string(),
            reason,
        };
        let channels = *shape
            .get(1)
            .ok_or_else(|| invalid(format!("{X_EMBEDDER_LORA_A} has shape {shape:?}")))?;
        if channels % 4 != 0 {
            return Err(invalid(format!(
                "{X_EMBEDDER_LORA_A} input width {channels} is not a multiple of 4"
            )));
        }

        max_in_channels = max_in_channels.max(channels / 4);
    }

    Ok(max_in_channels)
}

fn apply_native(
    native: &dyn NativeLoraModel,
    loras: Vec<(PathBuf, f64)>,
    ctx: &NodeContext,
) -> Result<(), NodeError> {
    let native_failure = |e: lorastack_core::NativeError| NodeError::NativeFailure(e.0);

    match loras.as_slice() {
        [] => {
            debug!("Clearing native LoRA parameters");
            native
                .update_lora_params(LoraParams::Clear)
                .map_err(native_failure)
        }
        [(path, strength)] => {
            debug!(path = %path.display(), strength, "Applying single LoRA natively");
            native
                .update_lora_params(LoraParams::File(path.clone()))
                .map_err(native_failure)?;
            native.set_lora_strength(*strength);
            Ok(())
        }
        _ => {
            let composer = ctx.composer.as_ref().ok_or_else(|| {
                NodeError::CompositionFailure("no LoRA composer configured".to_string())
            })?;
            debug!(count = loras.len(), "Composing LoRAs for native model");
            let composed = composer.compose(&loras)?;
            native
                .update_lora_params(LoraParams::Composed(composed))
                .map_err(native_failure)
        }
    }
}
