//! skillbridge-market-mcp: MCP tool server for market prices
//!
//! Exposes `get_current_stock_price` and `get_bitcoin_price` over STDIO
//! JSON-RPC 2.0. Stdout carries the protocol; logs go to stderr.
//!
//! Usage:
//!   skillbridge-market-mcp [--mock]
//!
//! Mock mode returns fixed prices and is also enabled by
//! `SKILLBRIDGE_MOCK_DATA=1`, which the specialist sets from its config.

mod tools;

use anyhow::Result;
use clap::Parser;
use clap::builder::BoolishValueParser;
use std::sync::Arc;
use tracing::info;

use skillbridge_core::config::ENV_MOCK_DATA;
use skillbridge_mcp::McpServer;

use tools::{DEFAULT_QUOTE_URL, DEFAULT_TICKER_URL, MarketData};

#[derive(Parser, Debug)]
#[command(name = "skillbridge-market-mcp", version, about = "MCP tool server for market prices")]
struct Args {
    /// Return fixed prices instead of calling upstream APIs
    #[arg(long, env = ENV_MOCK_DATA, value_parser = BoolishValueParser::new())]
    mock: bool,

    /// Chart API base URL for stock quotes
    #[arg(long, default_value = DEFAULT_QUOTE_URL)]
    quote_url: String,

    /// Bitcoin ticker URL
    #[arg(long, default_value = DEFAULT_TICKER_URL)]
    ticker_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let market = if args.mock {
        MarketData::mock()
    } else {
        MarketData::live(args.quote_url, args.ticker_url)?
    };

    info!(
        "skillbridge-market-mcp v{} starting on STDIO ({} data)",
        env!("CARGO_PKG_VERSION"),
        if market.is_mock() { "mock" } else { "live" }
    );

    let registry = Arc::new(tools::registry(Arc::new(market)));
    McpServer::new("skillbridge-market-mcp", env!("CARGO_PKG_VERSION"), registry)
        .serve_stdio()
        .await
}
