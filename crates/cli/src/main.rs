use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use goinfo::commands::{
    analyze_command, list_analyzers_command, list_features_command, show_settings_command,
    AnalyzeOptions, OutputFormat,
};
use goinfo::init_tracing;

/// Extract forensic metadata from compiled Go binaries.
///
/// This CLI is a thin wrapper around `goinfo-core`. All substantive logic
/// lives in the library so it can be tested thoroughly and reused from other
/// frontends.
#[derive(Parser, Debug)]
#[command(
    name = "goinfo",
    version,
    about = "Extract forensic metadata from compiled Go binaries",
    long_about = None
)]
struct Cli {
    /// Log at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze one binary and print the extracted features.
    ///
    /// Exits non-zero only when the invocation ends in an error; opt-outs
    /// (unsupported or non-Go files) are reported and exit cleanly.
    Analyze {
        /// Path to the binary to analyze.
        #[arg(long)]
        path: PathBuf,

        /// Analyzer to open the binary with.
        #[arg(long, default_value = "native")]
        analyzer: String,

        /// Settings file (JSON, or YAML by `.yaml`/`.yml` extension).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Content type assigned by the host (e.g. `executable/linux/elf64`).
        #[arg(long)]
        data_type: Option<String>,

        /// Output format.
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List the feature names this tool can emit.
    Features {
        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Show the effective plugin settings.
    Settings {
        /// Settings file to load instead of the defaults.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// List the analyzers compiled into this binary.
    Analyzers {
        /// Emit JSON instead of human-readable text.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Analyze { path, analyzer, config, data_type, format } => {
            analyze_command(&AnalyzeOptions { path, analyzer, config, data_type, format })?
        }
        Command::Features { json } => list_features_command(json)?,
        Command::Settings { config, json } => show_settings_command(config.as_deref(), json)?,
        Command::Analyzers { json } => list_analyzers_command(json)?,
    }

    Ok(())
}
