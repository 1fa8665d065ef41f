//! skillbridge: run a specialist agent or delegate to one

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use skillbridge_a2a::{
    A2aClient, A2aServer, DelegateToSpecialistTool, HostAgent, KeywordResolver, TaskSendParams,
};
use skillbridge_core::{SkillbridgeConfig, ToolRegistry};

#[derive(Parser)]
#[command(name = "skillbridge")]
#[command(about = "Delegate tasks between agents over A2A, executed by MCP tool servers")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.skillbridge/config.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the specialist agent over HTTP
    Specialist {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,

        /// Tool server executable
        #[arg(long)]
        tool_server: Option<String>,

        /// Have the tool server return mock data
        #[arg(long)]
        mock: bool,
    },

    /// Fetch and print a specialist's agent card
    Discover {
        /// Specialist base URL
        url: String,
    },

    /// Send one task and print the resulting task
    Send {
        /// Specialist base URL
        url: String,

        /// Task message text
        text: String,

        #[arg(long)]
        session_id: Option<String>,
    },

    /// Pick a specialist skill for an utterance and delegate to it
    Ask {
        utterance: String,

        /// Specialist base URL (repeatable; default from config)
        #[arg(long = "specialist")]
        specialists: Vec<String>,
    },

    /// Print the tool definitions a host offers to a model, given its specialists
    Tools {
        /// Specialist base URL (repeatable; default from config)
        #[arg(long = "specialist")]
        specialists: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

/// Command-line flags override file and environment settings
fn apply_specialist_flags(
    config: &mut SkillbridgeConfig,
    host: Option<String>,
    port: Option<u16>,
    tool_server: Option<String>,
    mock: bool,
) {
    if let Some(host) = host {
        config.specialist.host = host;
    }
    if let Some(port) = port {
        config.specialist.port = port;
    }
    if let Some(command) = tool_server {
        config.tool_server.command = command;
    }
    if mock {
        config.tool_server.mock_data = true;
    }
}

/// Tools a host exposes to an LLM tool loop
fn host_tools(host: Arc<HostAgent>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(DelegateToSpecialistTool::new(host)));
    registry
}

fn specialist_urls(config: &SkillbridgeConfig, flags: Vec<String>) -> Vec<String> {
    if flags.is_empty() {
        config.host.specialists.clone()
    } else {
        flags
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received, shutting down");
}

async fn run_specialist(config: SkillbridgeConfig) -> Result<()> {
    let addr = config.specialist.bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(
        "Specialist '{}' using tool server '{}' ({} data)",
        config.agent.name,
        config.tool_server.command,
        if config.tool_server.mock_data { "mock" } else { "live" }
    );
    A2aServer::from_config(&config)
        .serve(listener, shutdown_signal())
        .await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if cli.verbose { "debug" } else { "info" })
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = SkillbridgeConfig::load(cli.config.as_deref())?;
    let client = A2aClient::with_timeout(config.host.request_timeout())
        .context("Failed to build HTTP client")?;

    match cli.command {
        Commands::Specialist {
            host,
            port,
            tool_server,
            mock,
        } => {
            apply_specialist_flags(&mut config, host, port, tool_server, mock);
            config.validate()?;
            run_specialist(config).await?;
        }

        Commands::Discover { url } => {
            let card = client.discover(&url).await?;
            println!("{}", serde_json::to_string_pretty(&card)?);
        }

        Commands::Send {
            url,
            text,
            session_id,
        } => {
            let mut params = TaskSendParams::from_text(text);
            if session_id.is_some() {
                params.session_id = session_id;
            }
            let task = client.send_task(&url, &params).await?;
            println!("{}", serde_json::to_string_pretty(&task)?);
        }

        Commands::Ask {
            utterance,
            specialists,
        } => {
            let urls = specialist_urls(&config, specialists);
            let host = HostAgent::connect(client, &urls).await;
            let outcome = host.ask(&KeywordResolver, &utterance).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        Commands::Tools { specialists } => {
            let urls = specialist_urls(&config, specialists);
            let host = Arc::new(HostAgent::connect(client, &urls).await);
            let tools = host_tools(host).list_tools();
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }

        Commands::Config => {
            print!("{}", config.to_toml_string()?);
        }
    }

    Ok(())
}
