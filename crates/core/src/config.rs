use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Content types a Go binary may be delivered as.
pub const DEFAULT_CONTENT_FILTER: [&str; 6] = [
    // Windows exe
    "executable/windows/",
    "executable/dll32",
    "executable/pe32",
    // Linux elf
    "executable/linux/elf64",
    "executable/linux/elf32",
    "executable/mach-o",
];

/// Serializable settings describing the plugin and what content it accepts.
///
/// Read from a JSON or YAML file; any missing field takes its default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Data-type prefixes the host should route to this plugin.
    pub content_filter_data_types: Vec<String>,
    /// Optional extra compiler-release catalog (YAML or JSON).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler_catalog: Option<PathBuf>,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            name: "GoInfo".to_string(),
            version: "2025.09.15".to_string(),
            description:
                "A plugin that uses a Go binary analyzer to extract metadata from compiled Golang binaries"
                    .to_string(),
            content_filter_data_types: DEFAULT_CONTENT_FILTER.iter().map(|s| s.to_string()).collect(),
            compiler_catalog: None,
        }
    }
}

impl PluginSettings {
    /// Load settings from `path`, choosing YAML for `.yaml`/`.yml` and JSON otherwise.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let mut settings: PluginSettings = parse_by_extension(path, &text)?;
        // Resolve a relative catalog path against the settings file location.
        if let (Some(catalog), Some(parent)) = (settings.compiler_catalog.as_ref(), path.parent())
        {
            if catalog.is_relative() {
                settings.compiler_catalog = Some(parent.join(catalog));
            }
        }
        Ok(settings)
    }

    /// True when `data_type` falls under one of the configured filter prefixes.
    pub fn accepts(&self, data_type: &str) -> bool {
        self.content_filter_data_types.iter().any(|prefix| data_type.starts_with(prefix.as_str()))
    }
}

/// Deserialize `text` as YAML or JSON depending on the extension of `path`.
pub(crate) fn parse_by_extension<T: serde::de::DeserializeOwned>(
    path: &Path,
    text: &str,
) -> Result<T, ConfigError> {
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        serde_yaml::from_str(text)
            .map_err(|e| ConfigError::Parse { path: path.to_path_buf(), message: e.to_string() })
    } else {
        serde_json::from_str(text)
            .map_err(|e| ConfigError::Parse { path: path.to_path_buf(), message: e.to_string() })
    }
}
