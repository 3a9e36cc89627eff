//! Canonical LoRA key naming
//!
//! LoRA files for the same transformer come out of several trainers with
//! different key conventions. The converter maps them onto one canonical
//! naming (`transformer.<module>.lora_A.weight`) so callers can look up a
//! tensor without caring which tool produced the file. Only tensor shapes are
//! returned; weights stay on disk.

use crate::header::{DEFAULT_MAX_HEADER_SIZE, HeaderError, SafetensorsHeader};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Canonical key of the latent input embedding's down projection
pub const X_EMBEDDER_LORA_A: &str = "transformer.x_embedder.lora_A.weight";

/// Tensor shapes by canonical key
pub type TensorMapping = BTreeMap<String, Vec<usize>>;

/// Conversion errors
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Cannot read {path}: {source}")]
    Header {
        path: PathBuf,
        #[source]
        source: HeaderError,
    },
}

/// Converts a LoRA file into canonical tensor naming
pub trait FormatConverter {
    /// Read the tensor shapes of `path` under canonical names
    fn convert_to_canonical(&self, path: &Path) -> Result<TensorMapping, ConvertError>;
}

/// Converter that reads safetensors headers
#[derive(Debug, Clone)]
pub struct SafetensorsConverter {
    max_header_size: u64,
}

impl SafetensorsConverter {
    /// Create a converter with the given header size limit
    pub fn new(max_header_size: u64) -> Self {
        Self { max_header_size }
    }

    /// Canonicalise every key of a parsed header
    pub fn canonicalize(header: &SafetensorsHeader) -> TensorMapping {
        header
            .tensors
            .iter()
            .map(|(name, info)| (canonical_key(name), info.shape.clone()))
            .collect()
    }
}

impl Default for SafetensorsConverter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HEADER_SIZE)
    }
}

impl FormatConverter for SafetensorsConverter {
    fn convert_to_canonical(&self, path: &Path) -> Result<TensorMapping, ConvertError> {
        let header = SafetensorsHeader::read(path, self.max_header_size).map_err(|source| {
            ConvertError::Header {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self::canonicalize(&header))
    }
}

/// Module renames from the reference checkpoint layout
const MODULE_RENAMES: &[(&str, &str)] = &[
    ("img_in", "x_embedder"),
    ("txt_in", "context_embedder"),
    ("final_layer.linear", "proj_out"),
    ("final_layer_linear", "proj_out"),
];

/// Map one key onto canonical naming
pub fn canonical_key(key: &str) -> String {
    let (module, suffix) = split_suffix(key);

    let module = module
        .strip_prefix("lora_unet_")
        .or_else(|| module.strip_prefix("diffusion_model."))
        .or_else(|| module.strip_prefix("transformer."))
        .or_else(|| module.strip_prefix("base_model.model."))
        .unwrap_or(module);

    let module = MODULE_RENAMES
        .iter()
        .find(|(from, _)| *from == module)
        .map(|(_, to)| *to)
        .unwrap_or(module);

    format!("transformer.{module}{suffix}")
}

fn split_suffix(key: &str) -> (&str, &'static str) {
    const SUFFIXES: &[(&str, &str)] = &[
        (".lora_down.weight", ".lora_A.weight"),
        (".lora_up.weight", ".lora_B.weight"),
        (".lora_A.weight", ".lora_A.weight"),
        (".lora_B.weight", ".lora_B.weight"),
        (".alpha", ".alpha"),
    ];

    SUFFIXES
        .iter()
        .find_map(|(from, to)| key.strip_suffix(from).map(|module| (module, *to)))
        .unwrap_or((key, ""))
}
