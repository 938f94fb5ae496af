//! Feature extraction stages run against an opened Go binary.
//!
//! Each stage walks one part of what the analyzer reports and turns it into
//! feature records. Stages run in order: compiler metadata, packages,
//! vendor packages, types. Only the compiler metadata stage is best effort.

use thiserror::Error;
use tracing::{debug, warn};

use crate::features::{FeatureName, FeatureRecord, FeatureSink, SinkError};
use crate::model::UserPackageSet;
use crate::services::analyzer::{AnalyzerError, GoBinary};

/// Failure of an extraction stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Emit build settings, the build id, and the compiler identity.
///
/// Build settings are supplementary; failing to read them is logged and skipped.
pub fn extract_compiler_metadata(
    binary: &dyn GoBinary,
    sink: &mut dyn FeatureSink,
) -> Result<(), SinkError> {
    match binary.build_settings() {
        Ok(settings) => {
            for setting in settings {
                sink.add_feature(
                    FeatureRecord::new(FeatureName::GoCompilerFlag, setting.value)
                        .with_label(setting.key),
                )?;
            }
        }
        Err(err) => debug!(error = %err, "build settings unavailable"),
    }

    sink.add_feature(FeatureRecord::new(FeatureName::GoBuildId, binary.build_id()))?;

    if let Some(compiler) = binary.compiler() {
        sink.add_feature(FeatureRecord::new(FeatureName::GoCompilerVersion, compiler.name))?;
        sink.add_feature(FeatureRecord::new(
            FeatureName::GoCompilerTimestamp,
            compiler.timestamp,
        ))?;
    }
    Ok(())
}

/// Emit packages, their files, functions, and methods.
///
/// Returns the names of every package seen, for filtering types later.
pub fn extract_packages(
    binary: &dyn GoBinary,
    sink: &mut dyn FeatureSink,
) -> Result<UserPackageSet, StageError> {
    let packages = binary.packages()?;
    let mut user_packages = UserPackageSet::new();

    for package in packages {
        sink.add_feature(FeatureRecord::new(FeatureName::GoPackage, package.name.clone()))?;
        user_packages.insert(package.name);

        if package.file_path != "." {
            sink.add_feature(FeatureRecord::new(FeatureName::GoFile, package.file_path))?;
        }
        for function in package.functions {
            let size = function.size();
            sink.add_feature(
                FeatureRecord::new(FeatureName::GoPackageFunction, function.name)
                    .with_label(function.package_name)
                    .with_location(function.start_offset, size),
            )?;
        }
        for method in package.methods {
            let size = method.size();
            sink.add_feature(
                FeatureRecord::new(FeatureName::GoPackageMethod, method.name)
                    .with_label(method.package_name)
                    .with_location(method.start_offset, size),
            )?;
        }
    }

    debug!(packages = user_packages.len(), "extracted user packages");
    Ok(user_packages)
}

/// Emit one record per third-party dependency, in discovery order.
pub fn extract_vendor_packages(
    binary: &dyn GoBinary,
    sink: &mut dyn FeatureSink,
) -> Result<(), StageError> {
    let vendors = binary.vendors()?;
    debug!(vendors = vendors.len(), "extracted vendor packages");
    for vendor in vendors {
        sink.add_feature(FeatureRecord::new(FeatureName::GoVendorPackage, vendor.name))?;
    }
    Ok(())
}

/// Emit types owned by user packages, and their methods.
///
/// The analyzer reports standard library and runtime types alongside user
/// code; only types whose package path is in `user_packages` are kept.
pub fn extract_types(
    binary: &dyn GoBinary,
    user_packages: &UserPackageSet,
    sink: &mut dyn FeatureSink,
) -> Result<(), StageError> {
    let types = binary.types()?;
    let total = types.len();
    let mut kept = 0usize;

    for ty in types {
        if !user_packages.contains(&ty.package_path) {
            continue;
        }
        kept += 1;
        sink.add_feature(
            FeatureRecord::new(FeatureName::GoType, ty.name.clone())
                .with_label(ty.kind)
                .with_location(ty.address, ty.length),
        )?;
        // Method offsets from the analyzer are relative to an unrelated base; omit them.
        for method in ty.methods {
            sink.add_feature(
                FeatureRecord::new(FeatureName::GoTypeMethod, method.name).with_label(&ty.name),
            )?;
        }
    }

    if total > 0 && kept == 0 && !user_packages.is_empty() {
        warn!(total, "no type descriptor matched a user package");
    }
    debug!(total, kept, "filtered type descriptors");
    Ok(())
}
