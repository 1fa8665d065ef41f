//! Market data tools: stock price and bitcoin price
//!
//! Both tools run against [`MarketData`], which is either fixed mock values or
//! live HTTP lookups. Failures (unknown symbol, upstream outage) are returned as
//! errors and reach the caller as `isError` results.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use skillbridge_core::{ToolHandler, ToolRegistry, json_schema};

pub const DEFAULT_QUOTE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";
pub const DEFAULT_TICKER_URL: &str = "https://blockchain.info/ticker";

const MOCK_STOCK_PRICE: f64 = 999.99;
const MOCK_BITCOIN: [(&str, f64); 3] = [("USD", 65000.0), ("EUR", 60000.0), ("GBP", 51000.0)];

/// Where prices come from
pub enum MarketData {
    Mock,
    Live {
        http: reqwest::Client,
        quote_url: String,
        ticker_url: String,
    },
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: ChartMeta,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    regular_market_price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    last: f64,
}

/// Upper-case and sanity-check a symbol before it goes into a URL
fn normalize_symbol(raw: &str) -> Result<String> {
    let symbol = raw.trim().to_ascii_uppercase();
    let valid = !symbol.is_empty()
        && symbol.len() <= 10
        && symbol
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '^');
    if !valid {
        return Err(anyhow!("Symbol '{}' not found.", raw.trim()));
    }
    Ok(symbol)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl MarketData {
    pub fn mock() -> Self {
        Self::Mock
    }

    pub fn live(quote_url: impl Into<String>, ticker_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("skillbridge-market-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self::Live {
            http,
            quote_url: quote_url.into().trim_end_matches('/').to_string(),
            ticker_url: ticker_url.into(),
        })
    }

    pub fn is_mock(&self) -> bool {
        matches!(self, Self::Mock)
    }

    /// `{symbol, price, currency}` for one ticker
    pub async fn stock_price(&self, raw_symbol: &str) -> Result<Value> {
        let symbol = normalize_symbol(raw_symbol)?;

        let (http, quote_url) = match self {
            Self::Mock => {
                debug!("Mock price for {}", symbol);
                return Ok(serde_json::json!({
                    "symbol": symbol,
                    "price": MOCK_STOCK_PRICE,
                    "currency": "USD",
                    "mocked": true,
                }));
            }
            Self::Live {
                http, quote_url, ..
            } => (http, quote_url),
        };

        let url = format!("{}/{}", quote_url, symbol);
        info!("Fetching price for {} from {}", symbol, url);
        let resp = http
            .get(&url)
            .query(&[("interval", "1m"), ("range", "1d")])
            .send()
            .await
            .with_context(|| format!("Failed to fetch price for {}", symbol))?;
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();

        let chart = match serde_json::from_str::<ChartResponse>(&body) {
            Ok(parsed) => parsed.chart,
            Err(_) if !status.is_success() => {
                return Err(anyhow!(
                    "Could not retrieve current price data for symbol '{}': HTTP {}",
                    symbol,
                    status
                ));
            }
            Err(e) => return Err(anyhow!("Unexpected quote response for {}: {}", symbol, e)),
        };

        if let Some(error) = chart.error {
            warn!("Quote lookup for {} failed: {}", symbol, error.description);
            return Err(anyhow!(
                "Symbol '{}' not found or data unavailable.",
                symbol
            ));
        }

        let meta = chart
            .result
            .and_then(|results| results.into_iter().next())
            .map(|r| r.meta)
            .ok_or_else(|| anyhow!("Symbol '{}' not found or data unavailable.", symbol))?;
        let price = meta.regular_market_price.ok_or_else(|| {
            anyhow!(
                "Could not retrieve current price data for symbol '{}'.",
                symbol
            )
        })?;
        let currency = meta.currency.unwrap_or_else(|| "USD".to_string());

        info!("Found price {} {} for {}", price, currency, symbol);
        Ok(serde_json::json!({
            "symbol": symbol,
            "price": round2(price),
            "currency": currency,
        }))
    }

    /// `{USD, EUR, GBP}` last trade prices
    pub async fn bitcoin_price(&self) -> Result<Value> {
        let (http, ticker_url) = match self {
            Self::Mock => {
                let mut result = serde_json::Map::new();
                for (currency, price) in MOCK_BITCOIN {
                    result.insert(currency.to_string(), serde_json::json!(price));
                }
                result.insert("mocked".to_string(), Value::Bool(true));
                return Ok(Value::Object(result));
            }
            Self::Live {
                http, ticker_url, ..
            } => (http, ticker_url),
        };

        info!("Fetching bitcoin ticker from {}", ticker_url);
        let ticker: HashMap<String, TickerEntry> = http
            .get(ticker_url.as_str())
            .send()
            .await
            .context("Failed to fetch bitcoin ticker")?
            .error_for_status()
            .context("Bitcoin ticker request failed")?
            .json()
            .await
            .context("Failed to parse bitcoin ticker")?;

        let mut result = serde_json::Map::new();
        for currency in ["USD", "EUR", "GBP"] {
            let price = ticker.get(currency).map(|t| t.last);
            result.insert(currency.to_string(), serde_json::json!(price));
        }
        Ok(Value::Object(result))
    }
}

pub struct StockPriceTool {
    market: Arc<MarketData>,
}

impl StockPriceTool {
    pub fn new(market: Arc<MarketData>) -> Self {
        Self { market }
    }
}

#[async_trait]
impl ToolHandler for StockPriceTool {
    fn name(&self) -> &str {
        "get_current_stock_price"
    }

    fn description(&self) -> &str {
        "Fetch the current stock price for a ticker symbol (e.g. MSFT, GOOGL). \
         Returns symbol, price and currency."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "symbol": {
                    "type": "string",
                    "description": "Stock ticker symbol, e.g. MSFT"
                }
            }),
            vec!["symbol"],
        )
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let symbol = input
            .get("symbol")
            .or_else(|| input.get("ticker_symbol"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing 'symbol' parameter"))?;
        self.market.stock_price(symbol).await
    }
}

pub struct BitcoinPriceTool {
    market: Arc<MarketData>,
}

impl BitcoinPriceTool {
    pub fn new(market: Arc<MarketData>) -> Self {
        Self { market }
    }
}

#[async_trait]
impl ToolHandler for BitcoinPriceTool {
    fn name(&self) -> &str {
        "get_bitcoin_price"
    }

    fn description(&self) -> &str {
        "Fetch the current bitcoin price in USD, EUR and GBP."
    }

    fn input_schema(&self) -> Value {
        json_schema(serde_json::json!({}), vec![])
    }

    async fn execute(&self, _input: Value) -> Result<Value> {
        self.market.bitcoin_price().await
    }
}

/// Registry with every market tool
pub fn registry(market: Arc<MarketData>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(StockPriceTool::new(market.clone())));
    registry.register(Arc::new(BitcoinPriceTool::new(market)));
    registry
}
