use std::path::Path;

use anyhow::{Context, Result};

use goinfo_core::config::PluginSettings;

/// Settings from `config` when given, defaults otherwise.
pub fn load_settings(config: Option<&Path>) -> Result<PluginSettings> {
    match config {
        Some(path) => PluginSettings::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => Ok(PluginSettings::default()),
    }
}

/// Print the effective plugin settings.
pub fn show_settings_command(config: Option<&Path>, json: bool) -> Result<()> {
    let settings = load_settings(config)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    println!("{} v{}", settings.name, settings.version);
    println!("{}", settings.description);
    println!("Content filter:");
    for data_type in &settings.content_filter_data_types {
        println!("- {data_type}");
    }
    if let Some(catalog) = &settings.compiler_catalog {
        println!("Compiler catalog: {}", catalog.display());
    }
    Ok(())
}
