use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::ValueEnum;
use serde::Serialize;
use tracing::{debug, info};

use goinfo_core::features::{FeatureBuffer, FeatureRecord};
use goinfo_core::services::analyzer::default_analyzer_registry;
use goinfo_core::services::loader::{AnalysisOutcome, GoInfoPlugin};

use crate::commands::load_settings;
use crate::sha256_file;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

/// Inputs for one `analyze` invocation.
#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub path: PathBuf,
    pub analyzer: String,
    pub config: Option<PathBuf>,
    /// Host-assigned content type; checked against the settings filter when set.
    pub data_type: Option<String>,
    pub format: OutputFormat,
}

impl AnalyzeOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            analyzer: "native".to_string(),
            config: None,
            data_type: None,
            format: OutputFormat::Text,
        }
    }
}

/// Everything one invocation produced.
#[derive(Debug, Serialize)]
pub struct AnalysisReport {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub analyzer: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub started_at: String,
    pub finished_at: String,
    /// Records grouped by feature name, each group in emission order.
    pub features: BTreeMap<String, Vec<FeatureRecord>>,
}

impl AnalysisReport {
    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

fn group_features(records: Vec<FeatureRecord>) -> BTreeMap<String, Vec<FeatureRecord>> {
    let mut grouped: BTreeMap<String, Vec<FeatureRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.name.as_str().to_string()).or_default().push(record);
    }
    grouped
}

/// Run the plugin over `options.path` and collect the report.
pub fn build_report(options: &AnalyzeOptions) -> Result<AnalysisReport> {
    let settings = load_settings(options.config.as_deref())?;
    let registry = default_analyzer_registry(settings.compiler_catalog.as_deref())?;
    let analyzer = registry.get(&options.analyzer).ok_or_else(|| {
        anyhow!(
            "Unknown analyzer '{}'. Available: {}",
            options.analyzer,
            registry.names().join(", ")
        )
    })?;

    let started_at = Utc::now().to_rfc3339();
    let mut sink = FeatureBuffer::new();
    let outcome = match options.data_type.as_deref() {
        Some(data_type) if !settings.accepts(data_type) => {
            debug!(data_type, "content type filtered out");
            AnalysisOutcome::OptOut(format!(
                "Content type {data_type} is not handled by this plugin"
            ))
        }
        _ => GoInfoPlugin::new(&settings, &*analyzer).execute(&options.path, &mut sink),
    };
    let finished_at = Utc::now().to_rfc3339();
    info!(status = outcome.status(), features = sink.len(), "analysis finished");

    Ok(AnalysisReport {
        path: options.path.display().to_string(),
        sha256: sha256_file(&options.path).ok(),
        analyzer: analyzer.name().to_string(),
        status: outcome.status().to_string(),
        message: outcome.message(),
        started_at,
        finished_at,
        features: group_features(sink.into_records()),
    })
}

fn render_record(record: &FeatureRecord) -> String {
    let mut line = record.value.clone();
    if let Some(label) = &record.label {
        let _ = write!(line, " [{label}]");
    }
    match (record.offset, record.size) {
        (Some(offset), Some(size)) => {
            let _ = write!(line, " @{offset:#x} ({size} bytes)");
        }
        (Some(offset), None) => {
            let _ = write!(line, " @{offset:#x}");
        }
        _ => {}
    }
    line
}

/// Human-readable rendering of a report.
pub fn render_text(report: &AnalysisReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "File: {}", report.path);
    if let Some(sha) = &report.sha256 {
        let _ = writeln!(out, "SHA-256: {sha}");
    }
    let _ = writeln!(out, "Analyzer: {}", report.analyzer);
    let _ = writeln!(out, "Status: {}", report.status);
    if let Some(message) = &report.message {
        let _ = writeln!(out, "Message: {message}");
    }
    if report.features.is_empty() {
        let _ = writeln!(out, "Features: (none)");
        return out;
    }
    let _ = writeln!(out, "Features:");
    for (name, records) in &report.features {
        let _ = writeln!(out, "  {name}:");
        for record in records {
            let _ = writeln!(out, "    - {}", render_record(record));
        }
    }
    out
}

/// Analyze a file and print the report; fails when the invocation ended in error.
pub fn analyze_command(options: &AnalyzeOptions) -> Result<()> {
    let report = build_report(options)?;

    match options.format {
        OutputFormat::Text => print!("{}", render_text(&report)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
    }

    if report.is_error() {
        return Err(anyhow!(
            "Analysis of {} failed: {}",
            report.path,
            report.message.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(())
}
