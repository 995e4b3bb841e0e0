// pml-cli/src/main.rs
// ============================================================================
// Module: PML Gateway CLI Entry Point
// Description: Command dispatcher for serving and configuration workflows.
// Purpose: Provide a safe CLI for the gateway server and authoring tasks.
// Dependencies: clap, pml-config, pml-core, pml-mcp, tokio
// ============================================================================

//! ## Overview
//! The CLI serves the gateway, validates configuration, prints the example
//! config, and debugs snippet structures for capability authoring. Inputs are
//! untrusted and validated before use.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use pml_config::GatewayConfig;
use pml_config::config_toml_example;
use pml_core::build_structure;
use pml_mcp::McpServer;
use pml_mcp::NoopMetrics;
use pml_mcp::StderrAuditSink;
use pml_mcp::wire;
use thiserror::Error;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "pml-gateway", disable_help_subcommand = true, arg_required_else_help = true)]
struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway server.
    Serve {
        /// Path to pml-gateway.toml.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Configuration workflows.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print the canonical structure and hash of a snippet file.
    Structure {
        /// Path to the snippet file.
        file: PathBuf,
    },
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a configuration file.
    Validate {
        /// Path to pml-gateway.toml.
        #[arg(long)]
        config: PathBuf,
    },
    /// Print the commented example configuration.
    Example,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI failures.
#[derive(Debug, Error)]
enum CliError {
    /// Configuration failure.
    #[error(transparent)]
    Config(#[from] pml_config::ConfigError),
    /// Wiring failure.
    #[error(transparent)]
    Wire(#[from] pml_mcp::WireError),
    /// Server failure.
    #[error(transparent)]
    Server(#[from] pml_mcp::McpServerError),
    /// Snippet parse failure.
    #[error(transparent)]
    Parse(#[from] pml_core::ParseError),
    /// Structure hashing failure.
    #[error(transparent)]
    Hash(#[from] pml_core::HashError),
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(String),
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point.
fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "error: {error}");
            ExitCode::FAILURE
        }
    }
}

/// Dispatches a parsed command.
fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Serve {
            config,
        } => serve(config),
        Command::Config {
            command,
        } => match command {
            ConfigCommand::Validate {
                config,
            } => {
                GatewayConfig::load(Some(&config))?;
                write_stdout("config ok\n")
            }
            ConfigCommand::Example => write_stdout(config_toml_example()),
        },
        Command::Structure {
            file,
        } => structure(&file),
    }
}

/// Runs the gateway server until interrupted.
fn serve(config_path: Option<PathBuf>) -> Result<(), CliError> {
    let config = GatewayConfig::load(config_path.as_deref())?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| CliError::Io(err.to_string()))?;
    runtime.block_on(async {
        let components = wire(&config).await?;
        let server = McpServer::new(
            &config,
            components.router,
            Arc::new(NoopMetrics),
            Arc::new(StderrAuditSink),
        )?;
        server.serve().await?;
        components.sink.close().await;
        Ok(())
    })
}

/// Prints the canonical structure and hash for a snippet file.
fn structure(file: &std::path::Path) -> Result<(), CliError> {
    let source = std::fs::read_to_string(file).map_err(|err| CliError::Io(err.to_string()))?;
    let structure = build_structure(&source)?;
    let hash = structure.canonical_hash()?;
    let rendered = serde_json::to_string_pretty(&structure)
        .map_err(|err| CliError::Io(err.to_string()))?;
    write_stdout(&format!("{rendered}\ncode_hash: {}\n", hash.value))
}

/// Writes text to stdout.
fn write_stdout(text: &str) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(text.as_bytes())
        .map_err(|err| CliError::Io(err.to_string()))
}
