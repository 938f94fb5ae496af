use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::model::{BuildSetting, CompilerIdentity, Package, TypeDescriptor, VendorPackage};

/// Errors raised by a Go binary analyzer.
///
/// The rendered message is what open-time classification matches against,
/// so variants keep the wording the Go tooling uses for the same failures.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("unsupported file")]
    UnsupportedFile,
    #[error("unsupported architecture")]
    UnsupportedArchitecture,
    #[error("error when parsing the {format} file: {message}")]
    Parse { format: &'static str, message: String },
    #[error("no goversion found")]
    NoGoVersion,
    #[error("no pclntab found")]
    NoPclntab,
    #[error("no moduledata found")]
    NoModuleData,
    #[error("not a Go executable: no build info found")]
    NoBuildInfo,
    #[error("failed to read file: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Other(String),
}

/// An analyzer capable of opening candidate Go binaries.
///
/// Implementations may panic on hostile input; the loader contains that.
pub trait AnalyzerBackend: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn GoBinary>, AnalyzerError>;
    fn name(&self) -> &'static str;
}

/// Handle to a binary opened by an analyzer.
pub trait GoBinary {
    /// Raw toolchain version marker (e.g. `go1.15`), `None` when there is none.
    fn compiler_version(&self) -> Result<Option<String>, AnalyzerError>;

    /// Build settings recorded by the toolchain.
    fn build_settings(&self) -> Result<Vec<BuildSetting>, AnalyzerError>;

    /// The Go build id; empty when the binary carries none.
    fn build_id(&self) -> String;

    /// Release identity of the compiler, when it can be resolved.
    fn compiler(&self) -> Option<CompilerIdentity>;

    /// User-defined packages.
    fn packages(&self) -> Result<Vec<Package>, AnalyzerError>;

    /// Third-party dependencies.
    fn vendors(&self) -> Result<Vec<VendorPackage>, AnalyzerError>;

    /// Every type descriptor, including standard library and runtime types.
    fn types(&self) -> Result<Vec<TypeDescriptor>, AnalyzerError>;

    /// Release resources held by the handle.
    fn close(&mut self) {}
}

/// Registry for analyzers; callers select by name.
#[derive(Default)]
pub struct AnalyzerRegistry {
    analyzers: HashMap<String, Arc<dyn AnalyzerBackend>>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self { analyzers: HashMap::new() }
    }

    pub fn register<A: AnalyzerBackend + 'static>(&mut self, analyzer: A) -> &mut Self {
        self.analyzers.insert(analyzer.name().to_string(), Arc::new(analyzer));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn AnalyzerBackend>> {
        self.analyzers.get(name).cloned()
    }

    /// Return a sorted list of registered analyzer names for error messages/help.
    pub fn names(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.analyzers.keys().cloned().collect();
        keys.sort();
        keys
    }
}

/// Registry populated with every analyzer compiled into this build.
///
/// `compiler_catalog` extends the built-in release list used to resolve
/// compiler identities.
pub fn default_analyzer_registry(
    compiler_catalog: Option<&Path>,
) -> Result<AnalyzerRegistry, crate::config::ConfigError> {
    #[allow(unused_mut)]
    let mut registry = AnalyzerRegistry::new();
    #[cfg(feature = "native-analyzer")]
    {
        let catalog = match compiler_catalog {
            Some(path) => crate::services::backends::CompilerCatalog::builtin_with(path)?,
            None => crate::services::backends::CompilerCatalog::builtin(),
        };
        registry.register(crate::services::backends::NativeAnalyzer::with_catalog(catalog));
    }
    #[cfg(not(feature = "native-analyzer"))]
    let _ = compiler_catalog;
    Ok(registry)
}
