//! LoRA file loading from disk

use crate::header::{DEFAULT_MAX_HEADER_SIZE, HeaderError, SafetensorsHeader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Loader errors
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Weights not found: {0}")]
    WeightsNotFound(PathBuf),

    #[error("File too large: {size} > {max}")]
    TooLarge { size: u64, max: u64 },

    #[error("Invalid header in {path}: {source}")]
    InvalidHeader {
        path: PathBuf,
        #[source]
        source: HeaderError,
    },

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Parse and validate the safetensors header on load
    pub verify_header: bool,
    /// Maximum file size in bytes
    pub max_file_size: u64,
    /// Maximum header size in bytes
    pub max_header_size: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            verify_header: true,
            max_file_size: 4 * 1024 * 1024 * 1024, // 4GB
            max_header_size: DEFAULT_MAX_HEADER_SIZE,
        }
    }
}

/// A LoRA file read into memory
#[derive(Debug, Clone)]
pub struct LoraFile {
    /// Source path
    pub path: PathBuf,
    /// Content hash (blake3)
    pub hash: [u8; 32],
    /// Parsed header
    pub header: SafetensorsHeader,
    /// File contents
    pub bytes: Arc<[u8]>,
}

impl LoraFile {
    /// Tensor names in the file
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.header.names()
    }

    /// Content hash as a hex string
    pub fn hash_hex(&self) -> String {
        hex_encode(&self.hash)
    }

    /// Verify the contents still match the recorded hash
    pub fn verify(&self) -> bool {
        *blake3::hash(&self.bytes).as_bytes() == self.hash
    }
}

/// LoRA file loader
pub struct LoraLoader {
    config: LoaderConfig,
}

impl LoraLoader {
    /// Create a new loader
    pub fn new(config: LoaderConfig) -> Self {
        Self { config }
    }

    /// Get configuration
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load a LoRA file
    pub fn load(&self, path: impl AsRef<Path>) -> Result<LoraFile, LoaderError> {
        let path = path.as_ref();

        if !path.is_file() {
            return Err(LoaderError::WeightsNotFound(path.to_path_buf()));
        }

        let metadata = std::fs::metadata(path)?;
        if metadata.len() > self.config.max_file_size {
            return Err(LoaderError::TooLarge {
                size: metadata.len(),
                max: self.config.max_file_size,
            });
        }

        let bytes = std::fs::read(path)?;
        let header = if self.config.verify_header {
            SafetensorsHeader::parse(&bytes, self.config.max_header_size).map_err(|source| {
                LoaderError::InvalidHeader {
                    path: path.to_path_buf(),
                    source,
                }
            })?
        } else {
            SafetensorsHeader::default()
        };

        let hash = *blake3::hash(&bytes).as_bytes();
        debug!(
            path = %path.display(),
            tensors = header.tensors.len(),
            bytes = bytes.len(),
            "Loaded LoRA file"
        );

        Ok(LoraFile {
            path: path.to_path_buf(),
            hash,
            header,
            bytes: Arc::from(bytes),
        })
    }

    /// Load a LoRA file and check it against an expected hash
    pub fn load_verified(
        &self,
        path: impl AsRef<Path>,
        expected: &[u8; 32],
    ) -> Result<LoraFile, LoaderError> {
        let file = self.load(path)?;
        if &file.hash != expected {
            return Err(LoaderError::HashMismatch {
                expected: hex_encode(expected),
                actual: file.hash_hex(),
            });
        }
        Ok(file)
    }

    /// Read only the header of a LoRA file
    pub fn read_header(&self, path: impl AsRef<Path>) -> Result<SafetensorsHeader, LoaderError> {
        let path = path.as_ref();

        if !path.is_file() {
            return Err(LoaderError::WeightsNotFound(path.to_path_buf()));
        }

        SafetensorsHeader::read(path, self.config.max_header_size).map_err(|source| {
            LoaderError::InvalidHeader {
                path: path.to_path_buf(),
                source,
            }
        })
    }
}

impl Default for LoraLoader {
    fn default() -> Self {
        Self::new(LoaderConfig::default())
    }
}

/// Encode bytes as hex string
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::tests::safetensors_bytes;
    use tempfile::TempDir;

    fn write_lora(dir: &Path) -> PathBuf {
        let path = dir.join("style.safetensors");
        let bytes = safetensors_bytes(&[
            ("transformer.x_embedder.lora_A.weight", vec![16, 256]),
            ("transformer.x_embedder.lora_B.weight", vec![3072, 16]),
        ]);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_lora(temp_dir.path());

        let loader = LoraLoader::default();
        let loaded = loader.load(&path).unwrap();

        assert_eq!(loaded.path, path);
        assert_eq!(loaded.keys().count(), 2);
        assert!(loaded.verify());
    }

    #[test]
    fn test_load_missing() {
        let temp_dir = TempDir::new().unwrap();

        let result = LoraLoader::default().load(temp_dir.path().join("missing.safetensors"));
        assert!(matches!(result, Err(LoaderError::WeightsNotFound(_))));
    }

    #[test]
    fn test_file_size_limit() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_lora(temp_dir.path());

        let loader = LoraLoader::new(LoaderConfig {
            max_file_size: 16,
            ..Default::default()
        });

        let result = loader.load(&path);
        assert!(matches!(result, Err(LoaderError::TooLarge { .. })));
    }

    #[test]
    fn test_invalid_header() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.safetensors");
        std::fs::write(&path, [9, 9, 9, 9]).unwrap();

        let result = LoraLoader::default().load(&path);
        assert!(matches!(result, Err(LoaderError::InvalidHeader { .. })));

        let unchecked = LoraLoader::new(LoaderConfig {
            verify_header: false,
            ..Default::default()
        });
        assert!(unchecked.load(&path).is_ok());
    }

    #[test]
    fn test_hash_verification() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_lora(temp_dir.path());

        let loader = LoraLoader::default();
        let hash = loader.load(&path).unwrap().hash;
        assert!(loader.load_verified(&path, &hash).is_ok());

        let result = loader.load_verified(&path, &[0; 32]);
        assert!(matches!(result, Err(LoaderError::HashMismatch { .. })));
    }

    #[test]
    fn test_read_header_only() {
        let temp_dir = TempDir::new().unwrap();
        let path = write_lora(temp_dir.path());

        let header = LoraLoader::default().read_header(&path).unwrap();
        let a = header.get("transformer.x_embedder.lora_A.weight").unwrap();
        assert_eq!(a.shape, vec![16, 256]);
    }
}
