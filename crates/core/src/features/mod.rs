//! Feature vocabulary and the sink records are delivered to.
//!
//! Downstream consumers key off the feature *name*, so the vocabulary is a
//! closed enum rather than free strings.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed set of feature names this plugin emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureName {
    GoCompilerFlag,
    GoBuildId,
    GoCompilerVersion,
    GoCompilerTimestamp,
    GoPackage,
    GoPackageFunction,
    GoPackageMethod,
    GoVendorPackage,
    GoFile,
    GoType,
    GoTypeMethod,
    Malformed,
}

impl FeatureName {
    /// Every feature name, in declaration order.
    pub const ALL: [FeatureName; 12] = [
        FeatureName::GoCompilerFlag,
        FeatureName::GoBuildId,
        FeatureName::GoCompilerVersion,
        FeatureName::GoCompilerTimestamp,
        FeatureName::GoPackage,
        FeatureName::GoPackageFunction,
        FeatureName::GoPackageMethod,
        FeatureName::GoVendorPackage,
        FeatureName::GoFile,
        FeatureName::GoType,
        FeatureName::GoTypeMethod,
        FeatureName::Malformed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureName::GoCompilerFlag => "go_compiler_flag",
            FeatureName::GoBuildId => "go_build_id",
            FeatureName::GoCompilerVersion => "go_compiler_version",
            FeatureName::GoCompilerTimestamp => "go_compiler_timestamp",
            FeatureName::GoPackage => "go_package",
            FeatureName::GoPackageFunction => "go_package_function",
            FeatureName::GoPackageMethod => "go_package_method",
            FeatureName::GoVendorPackage => "go_vendor_package",
            FeatureName::GoFile => "go_file",
            FeatureName::GoType => "go_type",
            FeatureName::GoTypeMethod => "go_type_method",
            FeatureName::Malformed => "malformed",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            FeatureName::GoCompilerFlag => "A flag used at compile time of the go binary.",
            FeatureName::GoBuildId => "Go build ID",
            FeatureName::GoCompilerVersion => "Go compiler version",
            FeatureName::GoCompilerTimestamp => "Go compiler timestamp",
            FeatureName::GoPackage => "User defined packages in a Go binary",
            FeatureName::GoPackageFunction => "Functions in user defined packages",
            FeatureName::GoPackageMethod => "Methods in user defined packages",
            FeatureName::GoVendorPackage => "Packages from 3rd party vendors in a Go binary",
            FeatureName::GoFile => "Files in a Go build",
            FeatureName::GoType => "Types in a Go binary",
            FeatureName::GoTypeMethod => "Methods of a type",
            FeatureName::Malformed => "File appears to be a corrupted PE file.",
        }
    }
}

impl fmt::Display for FeatureName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of a feature for hosts that register the vocabulary up front.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeatureDescriptor {
    pub name: FeatureName,
    /// Value type; every feature here carries a string value.
    pub kind: &'static str,
    pub description: &'static str,
}

/// All feature declarations, in declaration order.
pub fn feature_catalog() -> Vec<FeatureDescriptor> {
    FeatureName::ALL
        .into_iter()
        .map(|name| FeatureDescriptor { name, kind: "string", description: name.description() })
        .collect()
}

/// A single named evidence tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub name: FeatureName,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl FeatureRecord {
    pub fn new(name: FeatureName, value: impl Into<String>) -> Self {
        Self { name, value: value.into(), label: None, offset: None, size: None }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_location(mut self, offset: u64, size: u64) -> Self {
        self.offset = Some(offset);
        self.size = Some(size);
        self
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Feature {name} was rejected: {reason}")]
    Rejected { name: FeatureName, reason: String },
}

/// Destination for feature records produced during an invocation.
pub trait FeatureSink {
    fn add_feature(&mut self, record: FeatureRecord) -> Result<(), SinkError>;
}

/// In-memory sink that keeps records in emission order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeatureBuffer {
    records: Vec<FeatureRecord>,
}

impl FeatureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[FeatureRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<FeatureRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records with the given name, in emission order.
    pub fn by_name(&self, name: FeatureName) -> impl Iterator<Item = &FeatureRecord> {
        self.records.iter().filter(move |r| r.name == name)
    }

    /// Values of the records with the given name, in emission order.
    pub fn values(&self, name: FeatureName) -> Vec<&str> {
        self.by_name(name).map(|r| r.value.as_str()).collect()
    }
}

impl FeatureSink for FeatureBuffer {
    fn add_feature(&mut self, record: FeatureRecord) -> Result<(), SinkError> {
        self.records.push(record);
        Ok(())
    }
}
