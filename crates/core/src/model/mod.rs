//! Core data model for what an analyzer reports about a Go binary.
//!
//! These types are produced by a [`GoBinary`](crate::services::analyzer::GoBinary)
//! handle and consumed by the extractors in [`crate::analysis`]. None of them
//! outlive a single invocation.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A compiler/toolchain key-value pair embedded in the binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSetting {
    pub key: String,
    pub value: String,
}

impl BuildSetting {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }
}

/// Resolved identity of the Go toolchain release that built the binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerIdentity {
    /// Release name, e.g. `go1.15`.
    pub name: String,
    /// Commit timestamp of the release tag (RFC 3339).
    pub timestamp: String,
}

/// A function or method symbol belonging to a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSymbol {
    pub name: String,
    pub package_name: String,
    pub start_offset: u64,
    pub end_offset: u64,
}

impl FunctionSymbol {
    pub fn new(
        name: impl Into<String>,
        package_name: impl Into<String>,
        start_offset: u64,
        end_offset: u64,
    ) -> Self {
        Self {
            name: name.into(),
            package_name: package_name.into(),
            start_offset,
            end_offset: end_offset.max(start_offset),
        }
    }

    /// Length of the symbol's code in bytes.
    pub fn size(&self) -> u64 {
        self.end_offset.saturating_sub(self.start_offset)
    }
}

/// A user-defined package and the symbols attributed to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub file_path: String,
    pub functions: Vec<FunctionSymbol>,
    pub methods: Vec<FunctionSymbol>,
}

impl Package {
    pub fn new(name: impl Into<String>, file_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_path: file_path.into(),
            functions: Vec::new(),
            methods: Vec::new(),
        }
    }
}

/// A third-party dependency discovered in the binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorPackage {
    pub name: String,
}

impl VendorPackage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeMethod {
    pub name: String,
}

/// A runtime type descriptor found in the binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    pub name: String,
    pub package_path: String,
    /// Kind as Go spells it (`struct`, `ptr`, `interface`, ...).
    pub kind: String,
    pub address: u64,
    pub length: u64,
    pub methods: Vec<TypeMethod>,
}

/// Names of the packages the analyzer attributed to the program itself.
///
/// Filled while packages are extracted and read when filtering types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPackageSet {
    names: HashSet<String>,
}

impl UserPackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        self.names.insert(name.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_size_is_end_minus_start() {
        let f = FunctionSymbol::new("main", "main", 4638816, 4639616);
        assert_eq!(f.size(), 800);
    }

    #[test]
    fn function_end_never_precedes_start() {
        let f = FunctionSymbol::new("broken", "main", 100, 40);
        assert_eq!(f.end_offset, 100);
        assert_eq!(f.size(), 0);
    }

    #[test]
    fn user_package_set_membership() {
        let mut set = UserPackageSet::new();
        assert!(set.is_empty());
        assert!(set.insert("main"));
        assert!(!set.insert("main"));
        assert!(set.contains("main"));
        assert!(!set.contains("runtime"));
        assert_eq!(set.len(), 1);
    }
}
