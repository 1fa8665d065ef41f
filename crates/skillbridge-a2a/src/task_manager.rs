//! Task manager: one task, one tool server process, one tool call
//!
//! `submitted -> working -> {completed | failed}`, with `canceled` reachable
//! while working. The tool server is spawned fresh for every task and is always
//! torn down before the task leaves `working`.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use skillbridge_core::SkillbridgeConfig;
use skillbridge_mcp::{ChannelConfig, McpError, StdioChannel, ToolClient};

use crate::protocol::{Artifact, Task, TaskSendParams, TaskState};

/// Ticker symbol with an optional share-class suffix (`BRK.B`, `RDS-A`)
static TICKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z]{1,5}(?:[.-][A-Z]{1,2})?$").expect("ticker pattern is valid")
});

/// All-caps words that are never tickers
const NOT_TICKERS: &[&str] = &["I", "A", "USD", "EUR", "GBP", "ETF", "OK"];

/// The single tool call a task resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    StockPrice { symbol: String },
    BitcoinPrice,
}

impl Invocation {
    /// Resolve free text to an invocation, or `None` when nothing usable is in it
    pub fn parse(text: &str) -> Option<Self> {
        let words: Vec<&str> = text
            .split_whitespace()
            .map(|w| w.trim_matches(|c: char| !c.is_ascii_alphanumeric()))
            .filter(|w| !w.is_empty())
            .collect();

        if words
            .iter()
            .any(|w| w.eq_ignore_ascii_case("bitcoin") || w.eq_ignore_ascii_case("btc"))
        {
            return Some(Self::BitcoinPrice);
        }

        if let Some(symbol) = words
            .iter()
            .find(|w| TICKER.is_match(w) && !NOT_TICKERS.contains(*w))
        {
            return Some(Self::StockPrice {
                symbol: symbol.to_string(),
            });
        }

        // A lone lowercase word is taken as the symbol itself
        if let [word] = words.as_slice() {
            let upper = word.to_ascii_uppercase();
            if TICKER.is_match(&upper) {
                return Some(Self::StockPrice { symbol: upper });
            }
        }

        None
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::StockPrice { .. } => "get_current_stock_price",
            Self::BitcoinPrice => "get_bitcoin_price",
        }
    }

    pub fn arguments(&self) -> Value {
        match self {
            Self::StockPrice { symbol } => serde_json::json!({ "symbol": symbol }),
            Self::BitcoinPrice => serde_json::json!({}),
        }
    }

    /// Name of the artifact the result is packaged into
    pub fn artifact_name(&self) -> &'static str {
        match self {
            Self::StockPrice { .. } => "stock_price_data",
            Self::BitcoinPrice => "bitcoin_price_data",
        }
    }
}

/// Why a working task did not complete
#[derive(Debug)]
struct TaskFailure {
    code: &'static str,
    message: String,
}

impl TaskFailure {
    fn canceled() -> Self {
        Self {
            code: "Canceled",
            message: "caller disconnected before the task finished".to_string(),
        }
    }

    fn deadline(limit: Duration) -> Self {
        Self {
            code: "Timeout",
            message: format!("task did not finish within {limit:?}"),
        }
    }
}

impl From<McpError> for TaskFailure {
    fn from(err: McpError) -> Self {
        Self {
            code: err.kind(),
            message: err.to_string(),
        }
    }
}

pub struct TaskManager {
    channel: ChannelConfig,
    call_timeout: Duration,
    task_timeout: Duration,
}

impl TaskManager {
    pub fn new(config: &SkillbridgeConfig) -> Self {
        Self {
            channel: ChannelConfig::from_config(
                "tool-server",
                &config.tool_server,
                &config.timeouts,
            ),
            call_timeout: config.timeouts.call(),
            task_timeout: config.timeouts.task(),
        }
    }

    pub fn with_channel(
        channel: ChannelConfig,
        call_timeout: Duration,
        task_timeout: Duration,
    ) -> Self {
        Self {
            channel,
            call_timeout,
            task_timeout,
        }
    }

    /// Drive one task to a terminal state.
    ///
    /// Never fails: every error becomes a `failed` (or `canceled`) task. The tool
    /// server process has been reaped by the time this returns.
    pub async fn handle(&self, params: TaskSendParams, cancel: CancellationToken) -> Task {
        let mut task = Task::submitted(params);
        info!("Task {} submitted (session {})", task.id, task.session_id);

        if cancel.is_cancelled() {
            finish(&mut task, Err(TaskFailure::canceled()), "");
            return task;
        }

        let text = task.message.text();
        let Some(invocation) = Invocation::parse(&text) else {
            let message = if text.trim().is_empty() {
                "task message contains no text".to_string()
            } else {
                format!("could not find a ticker symbol in '{}'", text.trim())
            };
            finish(
                &mut task,
                Err(TaskFailure {
                    code: "InvalidInput",
                    message,
                }),
                "",
            );
            return task;
        };

        if let Err(e) = task.transition(TaskState::Working) {
            warn!("Task {}: {}", task.id, e);
            return task;
        }
        debug!("Task {} working: {:?}", task.id, invocation);

        let outcome = self.run(&invocation, &cancel).await;
        finish(&mut task, outcome, invocation.artifact_name());
        task
    }

    /// Spawn, call once, tear down. The channel is closed on every path.
    ///
    /// The task deadline and cancellation cover both the handshake and the call.
    async fn run(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<Map<String, Value>, TaskFailure> {
        let deadline = Instant::now() + self.task_timeout;
        let mut channel = StdioChannel::spawn(&self.channel).await?;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TaskFailure::canceled()),
            res = tokio::time::timeout_at(deadline, self.exchange(&mut channel, invocation, deadline)) => {
                res.unwrap_or_else(|_| Err(TaskFailure::deadline(self.task_timeout)))
            }
        };

        channel.close().await;
        result
    }

    async fn exchange(
        &self,
        channel: &mut StdioChannel,
        invocation: &Invocation,
        deadline: Instant,
    ) -> Result<Map<String, Value>, TaskFailure> {
        channel.initialize(self.channel.handshake_timeout).await?;

        let timeout = self
            .call_timeout
            .min(deadline.saturating_duration_since(Instant::now()));
        ToolClient::new(channel)
            .invoke(invocation.tool_name(), invocation.arguments(), timeout)
            .await
            .map_err(TaskFailure::from)
    }
}

fn finish(task: &mut Task, outcome: Result<Map<String, Value>, TaskFailure>, artifact_name: &str) {
    let applied = match outcome {
        Ok(data) => task.complete(Artifact::data(artifact_name, data)),
        Err(failure) if failure.code == "Canceled" => task.cancel(failure.message),
        Err(failure) => task.fail(failure.code, failure.message),
    };
    if let Err(e) = applied {
        warn!("Task {}: {}", task.id, e);
        return;
    }

    match (&task.state, &task.error) {
        (TaskState::Completed, _) => info!("Task {} completed", task.id),
        (state, Some(error)) => warn!(
            "Task {} {}: {} ({})",
            task.id, state, error.message, error.code
        ),
        (state, None) => info!("Task {} {}", task.id, state),
    }
}
