//! safetensors header reader
//!
//! A safetensors file starts with a little-endian `u64` header length
//! followed by a JSON object mapping tensor names to dtype, shape and byte
//! offsets, plus an optional `__metadata__` string map. Parsing and
//! validation are done by the `safetensors` crate; files on disk are
//! memory-mapped so reading the header never pulls the weights into memory.

use memmap2::Mmap;
use safetensors::{SafeTensorError, SafeTensors};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Key of the metadata entry in the header object
const METADATA_KEY: &str = "__metadata__";

/// Bytes of the header length prefix
const LEN_PREFIX: u64 = 8;

/// Default upper bound on the header length
pub const DEFAULT_MAX_HEADER_SIZE: u64 = 100 * 1024 * 1024; // 100MB

/// Header errors
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("File too short for a safetensors header")]
    Truncated,

    #[error("Header too large: {size} > {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("Invalid safetensors file: {0}")]
    Safetensors(#[from] SafeTensorError),

    #[error("Header serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Description of one tensor in the file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorInfo {
    /// Element type (e.g. "BF16")
    pub dtype: String,
    /// Tensor shape
    pub shape: Vec<usize>,
    /// Start and end byte offsets relative to the data section
    pub data_offsets: [u64; 2],
}

impl TensorInfo {
    /// Number of elements
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }
}

impl From<&safetensors::tensor::TensorInfo> for TensorInfo {
    fn from(info: &safetensors::tensor::TensorInfo) -> Self {
        let (start, end) = info.data_offsets;
        Self {
            dtype: format!("{:?}", info.dtype),
            shape: info.shape.clone(),
            data_offsets: [start as u64, end as u64],
        }
    }
}

/// Parsed safetensors header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafetensorsHeader {
    /// Tensors by name
    pub tensors: BTreeMap<String, TensorInfo>,
    /// Free-form metadata
    pub metadata: BTreeMap<String, String>,
}

impl SafetensorsHeader {
    /// Parse and validate the header of an in-memory file
    ///
    /// Tensor offsets must tile the data section exactly.
    pub fn parse(bytes: &[u8], max_header_size: u64) -> Result<Self, HeaderError> {
        let len_bytes: [u8; 8] = bytes
            .get(..LEN_PREFIX as usize)
            .and_then(|b| b.try_into().ok())
            .ok_or(HeaderError::Truncated)?;
        let size = u64::from_le_bytes(len_bytes);
        if size > max_header_size {
            return Err(HeaderError::TooLarge {
                size,
                max: max_header_size,
            });
        }
        if size.saturating_add(LEN_PREFIX) > bytes.len() as u64 {
            return Err(HeaderError::Truncated);
        }

        let (_, metadata) = SafeTensors::read_metadata(bytes)?;

        let tensors = metadata
            .tensors()
            .into_iter()
            .map(|(name, info)| (name, TensorInfo::from(info)))
            .collect();
        let metadata = metadata
            .metadata()
            .as_ref()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        Ok(Self { tensors, metadata })
    }

    /// Read the header of a file on disk
    pub fn read(path: impl AsRef<Path>, max_header_size: u64) -> Result<Self, HeaderError> {
        let file = File::open(path.as_ref())?;
        if file.metadata()?.len() < LEN_PREFIX {
            return Err(HeaderError::Truncated);
        }

        // SAFETY: the map is read-only and dropped before this function returns
        let mmap = unsafe { Mmap::map(&file)? };
        Self::parse(&mmap, max_header_size)
    }

    /// Serialize this header into the on-disk prefix (length + JSON)
    pub fn to_bytes(&self) -> Result<Vec<u8>, HeaderError> {
        let mut object = serde_json::Map::new();
        if !self.metadata.is_empty() {
            object.insert(METADATA_KEY.to_string(), serde_json::to_value(&self.metadata)?);
        }
        for (name, info) in &self.tensors {
            object.insert(name.clone(), serde_json::to_value(info)?);
        }

        let json = serde_json::to_vec(&object)?;
        let mut bytes = Vec::with_capacity(LEN_PREFIX as usize + json.len());
        bytes.extend_from_slice(&(json.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&json);
        Ok(bytes)
    }

    /// Get a tensor by name
    pub fn get(&self, name: &str) -> Option<&TensorInfo> {
        self.tensors.get(name)
    }

    /// Tensor names in sorted order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Total size of the data section in bytes
    pub fn data_size(&self) -> u64 {
        self.tensors
            .values()
            .map(|t| t.data_offsets[1])
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a complete safetensors file with zeroed BF16 data
    pub(crate) fn safetensors_bytes(tensors: &[(&str, Vec<usize>)]) -> Vec<u8> {
        let mut header = SafetensorsHeader::default();
        let mut offset = 0u64;

        for (name, shape) in tensors {
            let len = shape.iter().product::<usize>() as u64 * 2;
            header.tensors.insert(
                name.to_string(),
                TensorInfo {
                    dtype: "BF16".to_string(),
                    shape: shape.clone(),
                    data_offsets: [offset, offset + len],
                },
            );
            offset += len;
        }

        let mut bytes = header.to_bytes().unwrap();
        bytes.resize(bytes.len() + offset as usize, 0);
        bytes
    }

    #[test]
    fn test_parse_tensors_and_metadata() {
        let mut header = SafetensorsHeader::default();
        header
            .metadata
            .insert("format".to_string(), "pt".to_string());
        header.tensors.insert(
            "x_embedder.lora_A.weight".to_string(),
            TensorInfo {
                dtype: "BF16".to_string(),
                shape: vec![16, 128],
                data_offsets: [0, 4096],
            },
        );

        let mut bytes = header.to_bytes().unwrap();
        bytes.resize(bytes.len() + 4096, 0);

        let parsed = SafetensorsHeader::parse(&bytes, DEFAULT_MAX_HEADER_SIZE).unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.get("x_embedder.lora_A.weight").unwrap().numel(), 2048);
    }

    #[test]
    fn test_parse_truncated() {
        let result = SafetensorsHeader::parse(&[1, 2, 3], DEFAULT_MAX_HEADER_SIZE);
        assert!(matches!(result, Err(HeaderError::Truncated)));

        let mut bytes = safetensors_bytes(&[("a", vec![4, 4])]);
        let header_len = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
        bytes.truncate(8 + header_len - 1);
        let result = SafetensorsHeader::parse(&bytes, DEFAULT_MAX_HEADER_SIZE);
        assert!(matches!(result, Err(HeaderError::Truncated)));
    }

    #[test]
    fn test_parse_header_too_large() {
        let bytes = safetensors_bytes(&[("a", vec![4, 4])]);
        let result = SafetensorsHeader::parse(&bytes, 8);
        assert!(matches!(result, Err(HeaderError::TooLarge { .. })));
    }

    #[test]
    fn test_parse_incomplete_data_section() {
        let mut bytes = safetensors_bytes(&[("a", vec![4, 4])]);
        bytes.truncate(bytes.len() - 1);

        let result = SafetensorsHeader::parse(&bytes, DEFAULT_MAX_HEADER_SIZE);
        assert!(matches!(result, Err(HeaderError::Safetensors(_))));
    }

    #[test]
    fn test_parse_rejects_wrong_tensor_size() {
        let mut header = SafetensorsHeader::default();
        header.tensors.insert(
            "a".to_string(),
            TensorInfo {
                dtype: "F32".to_string(),
                shape: vec![4],
                data_offsets: [0, 8],
            },
        );
        let mut bytes = header.to_bytes().unwrap();
        bytes.resize(bytes.len() + 8, 0);

        let result = SafetensorsHeader::parse(&bytes, DEFAULT_MAX_HEADER_SIZE);
        assert!(matches!(result, Err(HeaderError::Safetensors(_))));
    }

    #[test]
    fn test_read_from_disk() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("lora.safetensors");
        std::fs::write(&path, safetensors_bytes(&[("a", vec![2, 8]), ("b", vec![8, 2])])).unwrap();

        let header = SafetensorsHeader::read(&path, DEFAULT_MAX_HEADER_SIZE).unwrap();
        assert_eq!(header.names().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(header.get("b").unwrap().dtype, "BF16");
        assert_eq!(header.data_size(), 64);
    }

    #[test]
    fn test_read_empty_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.safetensors");
        std::fs::write(&path, b"").unwrap();

        let result = SafetensorsHeader::read(&path, DEFAULT_MAX_HEADER_SIZE);
        assert!(matches!(result, Err(HeaderError::Truncated)));
    }
}
