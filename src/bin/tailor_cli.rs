//! Tailor CLI - Bridge interface for the web layer
//!
//! Commands: sanitize, inspect, extract-text, update-text, dispatch
//! Outputs JSON to stdout, logs to stderr
//! Exit codes: 0 success, 1 usage or I/O error, 2 failed action

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, error};
use tracing_subscriber::{fmt, EnvFilter};

use tailor_core::{ActionError, ActionResponse, AppConfig, CoreError, DesignService, TextUpdates};

#[derive(Parser)]
#[command(name = "tailor-cli")]
#[command(about = "Tailor CLI - Garment Design Engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Overrides storage.data_dir
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sanitize an SVG file
    Sanitize {
        file: PathBuf,

        /// Print the full report instead of bare markup
        #[arg(long)]
        report: bool,
    },

    /// Sanitize an SVG upload and report its size and text elements
    Inspect { file: PathBuf },

    /// List the text elements of an SVG file
    ExtractText { file: PathBuf },

    /// Apply text updates to an SVG file
    UpdateText {
        file: PathBuf,

        /// JSON object of text id to new content
        #[arg(short, long)]
        updates: String,
    },

    /// Run a transport action, from the argument or stdin
    Dispatch { request: Option<String> },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(message) => {
            eprintln!(r#"{{"error": "Failed to load config: {}"}}"#, message);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);

    match cli.command {
        Commands::Sanitize { file, report } => {
            let raw = match read_file(&file) {
                Ok(raw) => raw,
                Err(code) => return code,
            };
            let sanitized = tailor_core::sanitize_report(&raw);
            if report {
                if emit(&sanitized) { ExitCode::SUCCESS } else { ExitCode::FAILURE }
            } else {
                println!("{}", sanitized.markup);
                ExitCode::SUCCESS
            }
        }

        Commands::Inspect { file } => {
            let raw = match read_file(&file) {
                Ok(raw) => raw,
                Err(code) => return code,
            };
            let filename = file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let service = DesignService::in_memory(&config);
            action_result(service.ingest_upload(&raw, &filename))
        }

        Commands::ExtractText { file } => {
            let markup = match read_text(&file) {
                Ok(markup) => markup,
                Err(code) => return code,
            };
            action_result(DesignService::in_memory(&config).extract_text(&markup))
        }

        Commands::UpdateText { file, updates } => {
            let markup = match read_text(&file) {
                Ok(markup) => markup,
                Err(code) => return code,
            };
            let updates: TextUpdates = match serde_json::from_str(&updates) {
                Ok(u) => u,
                Err(e) => {
                    println!(r#"{{"success": false, "error": "Invalid updates: {}"}}"#, e);
                    return ExitCode::FAILURE;
                }
            };
            action_result(DesignService::in_memory(&config).update_text(&markup, &updates))
        }

        Commands::Dispatch { request } => {
            let body = match request {
                Some(body) => body,
                None => {
                    let mut body = String::new();
                    if let Err(e) = io::stdin().read_to_string(&mut body) {
                        eprintln!(r#"{{"error": "Failed to read stdin: {}"}}"#, e);
                        return ExitCode::FAILURE;
                    }
                    body
                }
            };
            let service = match DesignService::open(&config) {
                Ok(service) => service,
                Err(e) => {
                    error!(error = %e, "failed to open design store");
                    eprintln!(r#"{{"error": "Failed to open store: {}"}}"#, e);
                    return ExitCode::FAILURE;
                }
            };
            finish(&service.dispatch_json(&body))
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig, String> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::discover(),
    }
    .map_err(|e| e.to_string())?;
    if let Some(data_dir) = &cli.data_dir {
        config.storage.data_dir = data_dir.clone();
    }
    Ok(config)
}

fn init_logging(config: &AppConfig) {
    let filter = EnvFilter::try_new(config.logging.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(filter).with_writer(io::stderr);
    if subscriber.try_init().is_err() {
        // already installed
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, ExitCode> {
    fs::read(path).map_err(|e| {
        eprintln!(r#"{{"error": "Failed to read {}: {}"}}"#, path.display(), e);
        ExitCode::FAILURE
    })
}

fn read_text(path: &Path) -> Result<String, ExitCode> {
    let raw = read_file(path)?;
    debug!(path = %path.display(), bytes = raw.len(), "read input");
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

fn emit<T: Serialize>(value: &T) -> bool {
    match serde_json::to_string_pretty(value) {
        Ok(json) => {
            println!("{}", json);
            true
        }
        Err(e) => {
            eprintln!(r#"{{"error": "Failed to encode output: {}"}}"#, e);
            false
        }
    }
}

fn action_result<T: Serialize>(result: Result<T, CoreError>) -> ExitCode {
    let response = match result {
        Ok(data) => match serde_json::to_value(data) {
            Ok(data) => ActionResponse::ok(data),
            Err(e) => {
                eprintln!(r#"{{"error": "Failed to encode output: {}"}}"#, e);
                return ExitCode::FAILURE;
            }
        },
        Err(e) => ActionResponse::failed(ActionError::from(&e)),
    };
    finish(&response)
}

fn finish(response: &ActionResponse) -> ExitCode {
    if !emit(response) {
        return ExitCode::FAILURE;
    }
    if response.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2) // Action failure
    }
}
