//! LoRA folder registry
//!
//! Maps asset categories to search directories and resolves the file names
//! shown in the node UI to absolute paths.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Category LoRA files are registered under
pub const LORA_CATEGORY: &str = "loras";

/// File extensions recognised as model weights
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["safetensors", "ckpt", "pt", "pt2", "bin", "pth", "sft"];

/// Path resolution errors
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("{category} file not found: {name}")]
    NotFound { category: String, name: String },
}

/// Resolves asset names to absolute paths
pub trait PathResolver {
    /// Resolve `name` within `category`
    fn resolve(&self, category: &str, name: &str) -> Result<PathBuf, ResolveError>;

    /// List the names available in `category`
    fn filename_list(&self, category: &str) -> Vec<String>;

    /// Choices for a LoRA selector widget, sentinel first
    fn lora_choices(&self) -> Vec<String> {
        let mut choices = vec![crate::stack::NONE_SENTINEL.to_string()];
        choices.extend(self.filename_list(LORA_CATEGORY));
        choices
    }
}

/// Registry of asset search directories by category
#[derive(Debug, Clone)]
pub struct LoraFolders {
    /// Search directories by category, in priority order
    folders: BTreeMap<String, Vec<PathBuf>>,
}

impl LoraFolders {
    /// Create a registry with the default LoRA search paths
    pub fn new() -> Self {
        let mut folders = Self::empty();
        folders.add_search_path(LORA_CATEGORY, PathBuf::from("loras"));
        folders.add_search_path(
            LORA_CATEGORY,
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("lorastack")
                .join("loras"),
        );
        folders
    }

    /// Create a registry with no search paths
    pub fn empty() -> Self {
        Self {
            folders: BTreeMap::new(),
        }
    }

    /// Add a search path to a category
    pub fn add_search_path(&mut self, category: impl Into<String>, path: impl Into<PathBuf>) {
        self.folders.entry(category.into()).or_default().push(path.into());
    }

    /// Get the search paths of a category
    pub fn search_paths(&self, category: &str) -> &[PathBuf] {
        self.folders.get(category).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl PathResolver for LoraFolders {
    fn resolve(&self, category: &str, name: &str) -> Result<PathBuf, ResolveError> {
        let paths = self
            .folders
            .get(category)
            .ok_or_else(|| ResolveError::UnknownCategory(category.to_string()))?;

        let not_found = || ResolveError::NotFound {
            category: category.to_string(),
            name: name.to_string(),
        };

        let relative = Path::new(name);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if name.is_empty() || escapes {
            return Err(not_found());
        }

        for root in paths {
            let candidate = root.join(relative);
            if candidate.is_file() {
                debug!(category, name, path = %candidate.display(), "Resolved asset");
                return Ok(std::path::absolute(&candidate).unwrap_or(candidate));
            }
        }

        Err(not_found())
    }

    /// Names are relative to their search directory, use `/` as separator,
    /// and are sorted and deduplicated across directories.
    fn filename_list(&self, category: &str) -> Vec<String> {
        let mut names = Vec::new();

        for root in self.search_paths(category) {
            collect_files(root, root, &mut names);
        }

        names.sort();
        names.dedup();
        names
    }
}

impl Default for LoraFolders {
    fn default() -> Self {
        Self::new()
    }
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out);
        } else if has_supported_extension(&path) {
            if let Ok(relative) = path.strip_prefix(root) {
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn folders_with(dir: &Path) -> LoraFolders {
        let mut folders = LoraFolders::empty();
        folders.add_search_path(LORA_CATEGORY, dir);
        folders
    }

    #[test]
    fn test_filename_list() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("style")).unwrap();
        std::fs::write(temp_dir.path().join("b.safetensors"), [0]).unwrap();
        std::fs::write(temp_dir.path().join("style/a.safetensors"), [0]).unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), [0]).unwrap();

        let folders = folders_with(temp_dir.path());
        let names = folders.filename_list(LORA_CATEGORY);

        assert_eq!(names, vec!["b.safetensors", "style/a.safetensors"]);
    }

    #[test]
    fn test_lora_choices_start_with_sentinel() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.safetensors"), [0]).unwrap();

        let choices = folders_with(temp_dir.path()).lora_choices();
        assert_eq!(choices, vec!["None", "a.safetensors"]);
    }

    #[test]
    fn test_resolve_first_search_path_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        std::fs::write(first.path().join("a.safetensors"), [1]).unwrap();
        std::fs::write(second.path().join("a.safetensors"), [2]).unwrap();

        let mut folders = folders_with(first.path());
        folders.add_search_path(LORA_CATEGORY, second.path());

        let path = folders.resolve(LORA_CATEGORY, "a.safetensors").unwrap();
        assert_eq!(std::fs::read(path).unwrap(), vec![1]);
    }

    #[test]
    fn test_resolve_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let folders = folders_with(temp_dir.path());

        let result = folders.resolve(LORA_CATEGORY, "missing.safetensors");
        assert!(matches!(result, Err(ResolveError::NotFound { .. })));
    }

    #[test]
    fn test_resolve_rejects_parent_components() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("loras")).unwrap();
        std::fs::write(temp_dir.path().join("secret.safetensors"), [0]).unwrap();

        let folders = folders_with(&temp_dir.path().join("loras"));
        let result = folders.resolve(LORA_CATEGORY, "../secret.safetensors");

        assert!(matches!(result, Err(ResolveError::NotFound { .. })));
    }

    #[test]
    fn test_resolve_unknown_category() {
        let folders = LoraFolders::empty();
        let result = folders.resolve("checkpoints", "model.safetensors");
        assert!(matches!(result, Err(ResolveError::UnknownCategory(_))));
    }
}
