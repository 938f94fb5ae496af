//! Analyzer implementations compiled into this build.

#[cfg(feature = "native-analyzer")]
pub mod native;

#[cfg(feature = "native-analyzer")]
pub use native::{CompilerCatalog, GoRelease, NativeAnalyzer, NativeGoBinary};
