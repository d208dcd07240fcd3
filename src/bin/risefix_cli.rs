//! Risefix CLI - Legacy xAPI Package Restorer
//!
//! Commands: convert, diagnose
//! Prints the diagnostic report to stdout (JSON with --json)
//! Exit codes: 0 success, 2 validation failure, 1 fatal error

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use risefix_core::diagnose::diagnose;
use risefix_core::ConversionPipeline;

#[derive(Parser)]
#[command(name = "risefix-cli")]
#[command(about = "Risefix CLI - Legacy xAPI Package Restorer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Emit machine-readable JSON instead of the report text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a new export into the legacy layout and validate it
    Convert {
        /// Root of the new export (the package that no longer tracks)
        new_export: PathBuf,

        /// Root of the donor package (an older export known to track)
        donor: PathBuf,

        /// Output root; must be empty or absent
        output: PathBuf,
    },

    /// Validate a converted package without touching it
    Diagnose {
        /// Package root to inspect
        output: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Convert {
            new_export,
            donor,
            output,
        } => {
            let pipeline = ConversionPipeline::new(&new_export, &donor, &output);
            let summary = match pipeline.run() {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    return ExitCode::FAILURE;
                }
            };

            let report = match diagnose(&output) {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    return ExitCode::FAILURE;
                }
            };

            if cli.json {
                let out = serde_json::json!({
                    "summary": summary,
                    "report": report,
                });
                println!("{}", serde_json::to_string_pretty(&out).unwrap());
            } else {
                print!("{}", report.render());
            }

            if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2) // Validation failure
            }
        }

        Commands::Diagnose { output } => {
            let report = match diagnose(&output) {
                Ok(r) => r,
                Err(e) => {
                    eprintln!("ERROR: {}", e);
                    return ExitCode::FAILURE;
                }
            };

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report).unwrap());
            } else {
                print!("{}", report.render());
            }

            if report.passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2) // Validation failure
            }
        }
    }
}
