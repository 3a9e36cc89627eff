//! Model-kind dispatch
//!
//! Decides how LoRAs reach a model by looking at the real diffusion module,
//! one level below any optimized-module indirection.

use crate::error::NodeError;
use lorastack_core::{FluxWrapper, Indirection, ModelHandle, NativeLoraModel};
use std::fmt;

/// How LoRAs are applied to a model
#[derive(Clone, Copy)]
pub enum Strategy<'a> {
    /// The module is a wrapper carrying an explicit LoRA list
    Wrapper(&'a FluxWrapper),
    /// The module composes LoRAs itself
    Native(&'a dyn NativeLoraModel),
}

impl Strategy<'_> {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            Self::Wrapper(_) => "wrapper",
            Self::Native(_) => "native",
        }
    }
}

impl fmt::Debug for Strategy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wrapper(wrapper) => f.debug_tuple("Wrapper").field(wrapper).finish(),
            Self::Native(_) => f.write_str("Native(..)"),
        }
    }
}

/// Result of classifying a model handle
#[derive(Debug, Clone, Copy)]
pub struct Classified<'a> {
    /// Strategy for the real module
    pub strategy: Strategy<'a>,
    /// Indirection wrapping the real module, if any
    pub indirection: Option<&'a Indirection>,
}

/// Classify the diffusion module of `model`
pub fn classify(model: &ModelHandle) -> Result<Classified<'_>, NodeError> {
    let slot = model.diffusion_model();
    let module = slot.module();

    let strategy = if let Some(wrapper) = module.as_any().downcast_ref::<FluxWrapper>() {
        Strategy::Wrapper(wrapper)
    } else if let Some(native) = module.as_native() {
        Strategy::Native(native)
    } else {
        return Err(NodeError::UnrecognizedModelKind {
            kind: module.kind().to_string(),
        });
    };

    Ok(Classified {
        strategy,
        indirection: slot.indirection(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorastack_core::{
        DiffusionModule, DiffusionSlot, Device, LoraParams, ModelConfig, ModelContainer,
        NativeError, Transformer,
    };
    use std::any::Any;
    use std::sync::Arc;

    #[derive(Debug)]
    struct PlainUnet;

    impl DiffusionModule for PlainUnet {
        fn kind(&self) -> &str {
            "UNetModel"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct Nunchaku;

    impl NativeLoraModel for Nunchaku {
        fn update_lora_params(&self, _params: LoraParams) -> Result<(), NativeError> {
            Ok(())
        }

        fn set_lora_strength(&self, _strength: f64) {}
    }

    impl DiffusionModule for Nunchaku {
        fn kind(&self) -> &str {
            "NunchakuFluxTransformer"
        }

        fn as_any(&self) -> &dyn Any {
            self
        }

        fn as_native(&self) -> Option<&dyn NativeLoraModel> {
            Some(self)
        }
    }

    fn handle(slot: DiffusionSlot) -> ModelHandle {
        ModelHandle::new(
            ModelContainer::new(slot, ModelConfig::new("flux")),
            Device::Cuda(0),
            Device::Cpu,
        )
    }

    fn wrapper() -> Arc<dyn DiffusionModule> {
        Arc::new(FluxWrapper::new(Arc::new(Transformer::new(
            "flux-dev",
            "int4",
            vec![0; 8],
        ))))
    }

    #[test]
    fn test_classify_wrapper() {
        let model = handle(DiffusionSlot::direct(wrapper()));
        let classified = classify(&model).unwrap();

        assert!(matches!(classified.strategy, Strategy::Wrapper(_)));
        assert!(classified.indirection.is_none());
    }

    #[test]
    fn test_classify_looks_through_indirection() {
        let indirection = Indirection::compiled("inductor").with_mode("max-autotune");
        let model = handle(DiffusionSlot::optimized(indirection.clone(), wrapper()));
        let classified = classify(&model).unwrap();

        assert!(matches!(classified.strategy, Strategy::Wrapper(_)));
        assert_eq!(classified.indirection, Some(&indirection));
    }

    #[test]
    fn test_classify_native() {
        let model = handle(DiffusionSlot::direct(Arc::new(Nunchaku)));
        let classified = classify(&model).unwrap();

        assert_eq!(classified.strategy.name(), "native");
    }

    #[test]
    fn test_classify_unrecognized() {
        let model = handle(DiffusionSlot::direct(Arc::new(PlainUnet)));
        let result = classify(&model);

        match result {
            Err(NodeError::UnrecognizedModelKind { kind }) => assert_eq!(kind, "UNetModel"),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
