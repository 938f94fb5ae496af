use anyhow::Result;

use goinfo_core::features::feature_catalog;

/// Print every feature the plugin can emit.
pub fn list_features_command(json: bool) -> Result<()> {
    let catalog = feature_catalog();

    if json {
        println!("{}", serde_json::to_string_pretty(&catalog)?);
        return Ok(());
    }

    println!("Features:");
    for descriptor in catalog {
        println!("- {} ({}): {}", descriptor.name, descriptor.kind, descriptor.description);
    }
    Ok(())
}
