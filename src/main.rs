use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use ee_export::earth_engine::EarthEngine;
use ee_export::export_config::{export_config_toml, ExportConfig};
use ee_export::workflow::ExportRun;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Export the least cloudy Earth Engine image around a point")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Select, clip and export an image as described by a config file
    Run {
        #[arg(short, long, default_value = "export.toml")]
        config: PathBuf,
        /// Service account key, overriding the config file
        #[arg(long)]
        credentials: Option<PathBuf>,
        /// Cloud project the export is billed to, defaults to the key's project
        #[arg(long)]
        project: Option<String>,
        /// Poll the export task until it finishes
        #[arg(long)]
        wait: bool,
    },
    /// Write a starter config file
    Template {
        #[arg(default_value = "export.toml")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Template { output } => {
            if output.exists() {
                return Err(anyhow!("{} already exists", output.display()));
            }
            ExportConfig::from_template(&export_config_toml())?.write(&output)?;
            info!(path = %output.display(), "Wrote config template");
            Ok(ExitCode::SUCCESS)
        }
        Command::Run {
            config,
            credentials,
            project,
            wait,
        } => {
            let mut export_config = ExportConfig::read(&config)
                .with_context(|| format!("failed to read config {}", config.display()))?;
            if let Some(credentials) = credentials {
                export_config.credentials = credentials;
            }
            if project.is_some() {
                export_config.project = project;
            }
            export_config.wait |= wait;

            let job = export_config.validate()?;
            let api = EarthEngine::new()?.with_project(export_config.project.clone());

            // Failures are logged by the run itself
            let mut run = ExportRun::new(&api, &job);
            match run.execute().await {
                Ok(_) => Ok(ExitCode::SUCCESS),
                Err(_) => Ok(ExitCode::FAILURE),
            }
        }
    }
}
