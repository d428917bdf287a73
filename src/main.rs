//! Toolkit Gateway - process-backed JSON-RPC gateway to a per-user tool worker.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use toolkit_gateway::config::{ConfigLoader, GatewayConfig};
use toolkit_gateway::gateway::{Gateway, GatewayError};
use toolkit_gateway::tools::{fallback_tools, ToolDescriptor};

#[derive(Parser)]
#[command(
    name = "toolkit-gateway",
    about = "Drive, Gmail and Calendar tools through a supervised worker process",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Config file to use instead of the default search path.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List tools. Without --user, prints the built-in list.
    Tools {
        /// Start a worker for this user and print its live catalog.
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Call one tool as a user.
    Call {
        #[arg(short, long)]
        user: String,
        /// Tool name.
        #[arg(short, long)]
        tool: String,
        /// Tool arguments as a JSON object.
        #[arg(short, long, default_value = "{}")]
        args: String,
    },
    /// Start a worker for a user and print the gateway status.
    Check {
        #[arg(short, long)]
        user: String,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<GatewayConfig, String> {
    let loader = path.map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    loader.load().map_err(|e| e.to_string())
}

fn print_tools(tools: &[ToolDescriptor]) {
    for tool in tools {
        println!("{:<42} {}", tool.name, tool.description);
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{rendered}");
    Ok(())
}

async fn run(command: Commands, config: GatewayConfig) -> Result<(), String> {
    if let Commands::Tools { user: None } = command {
        print_tools(&fallback_tools());
        return Ok(());
    }

    let gateway = Gateway::new(config);
    let outcome = match command {
        Commands::Tools { user } => {
            let user = user.unwrap_or_default();
            gateway.ensure_ready(&user).await.map(|()| {
                print_tools(&gateway.list_tools());
            })
        }
        Commands::Call { user, tool, args } => {
            let arguments: serde_json::Value = serde_json::from_str(&args)
                .map_err(|e| format!("Invalid --args JSON: {e}"))?;
            gateway
                .invoke_as(&user, &tool, arguments)
                .await
                .map(|text| println!("{text}"))
        }
        Commands::Check { user } => {
            let result = gateway.ensure_ready(&user).await;
            print_json(&gateway.status())?;
            result
        }
    };
    gateway.shutdown().await;
    outcome.map_err(|e: GatewayError| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match load_config(cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };
    tracing::debug!(program = %config.worker.program, "Configuration loaded");

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
