use anyhow::Result;
use serde::Serialize;

use goinfo_core::services::analyzer::default_analyzer_registry;

#[derive(Debug, Serialize)]
pub struct AnalyzerInfo {
    pub name: String,
    pub description: String,
}

fn describe(name: &str) -> String {
    match name {
        "native" => "Built-in reader for ELF, PE, and Mach-O Go binaries".to_string(),
        other => format!("Analyzer '{other}'"),
    }
}

/// List the analyzers compiled into this binary.
pub fn list_analyzers_command(json: bool) -> Result<()> {
    let registry = default_analyzer_registry(None)?;
    let entries: Vec<AnalyzerInfo> = registry
        .names()
        .into_iter()
        .map(|name| AnalyzerInfo { description: describe(&name), name })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("Analyzers: (none)");
        return Ok(());
    }

    println!("Analyzers:");
    for entry in entries {
        println!("- {}: {}", entry.name, entry.description);
    }
    Ok(())
}
