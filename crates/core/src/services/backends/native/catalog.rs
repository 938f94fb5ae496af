//! Release catalog used to resolve a version marker to a compiler identity.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::config::{parse_by_extension, ConfigError};
use crate::model::CompilerIdentity;

const BUILTIN_RELEASES: &str = include_str!("releases.yaml");

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GoRelease {
    pub name: String,
    pub timestamp: String,
}

#[derive(Debug, Default, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    releases: Vec<GoRelease>,
}

/// Known Go releases keyed by version name.
#[derive(Debug, Clone, Default)]
pub struct CompilerCatalog {
    releases: HashMap<String, String>,
}

impl CompilerCatalog {
    /// The releases shipped with the crate.
    pub fn builtin() -> Self {
        let file: CatalogFile =
            serde_yaml::from_str(BUILTIN_RELEASES).expect("built-in release catalog is valid YAML");
        Self::from_releases(file.releases)
    }

    /// The built-in releases extended (and overridden) by a JSON or YAML file.
    pub fn builtin_with(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let file: CatalogFile = parse_by_extension(path, &text)?;
        let mut catalog = Self::builtin();
        catalog.extend(file.releases);
        Ok(catalog)
    }

    pub fn from_releases(releases: impl IntoIterator<Item = GoRelease>) -> Self {
        let mut catalog = Self::default();
        catalog.extend(releases);
        catalog
    }

    fn extend(&mut self, releases: impl IntoIterator<Item = GoRelease>) {
        for release in releases {
            self.releases.insert(release.name, release.timestamp);
        }
    }

    pub fn lookup(&self, name: &str) -> Option<CompilerIdentity> {
        self.releases
            .get(name)
            .map(|timestamp| CompilerIdentity { name: name.to_string(), timestamp: timestamp.clone() })
    }

    pub fn len(&self) -> usize {
        self.releases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.releases.is_empty()
    }
}
