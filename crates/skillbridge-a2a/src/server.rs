//! A2A server: agent card discovery and synchronous task submission

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use skillbridge_core::SkillbridgeConfig;

use crate::protocol::*;
use crate::task_manager::TaskManager;

/// Shared, read-only server state; holds no per-task data
#[derive(Clone)]
pub struct A2aServer {
    card: Arc<AgentCard>,
    manager: Arc<TaskManager>,
}

impl A2aServer {
    pub fn new(card: AgentCard, manager: TaskManager) -> Self {
        Self {
            card: Arc::new(card),
            manager: Arc::new(manager),
        }
    }

    pub fn from_config(config: &SkillbridgeConfig) -> Self {
        Self::new(build_agent_card(config), TaskManager::new(config))
    }

    pub fn card(&self) -> &AgentCard {
        &self.card
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/.well-known/agent.json", get(get_agent_card))
            .route("/tasks/send", post(send_task))
            .route("/", post(handle_rpc))
            .with_state(self)
    }

    /// Serve on `listener` until `shutdown` resolves
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr().context("listener has no local address")?;
        info!("A2A server '{}' listening on {}", self.card.name, addr);
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await
            .context("A2A server failed")?;
        info!("A2A server stopped");
        Ok(())
    }
}

/// Agent card built from configuration; never changes afterwards
pub fn build_agent_card(config: &SkillbridgeConfig) -> AgentCard {
    let json = vec!["application/json".to_string()];
    AgentCard {
        name: config.agent.name.clone(),
        description: config.agent.description.clone(),
        url: config.specialist.public_url(),
        provider: AgentProvider {
            organization: config.agent.organization.clone(),
        },
        version: config.agent.version.clone(),
        capabilities: AgentCapabilities::default(),
        default_input_modes: vec!["text/plain".to_string()],
        default_output_modes: json.clone(),
        skills: vec![
            AgentSkill {
                id: "get_stock_price_skill".to_string(),
                name: "Get Stock Price".to_string(),
                description: "Retrieves the current stock price for a given ticker symbol."
                    .to_string(),
                tags: vec![
                    "finance".to_string(),
                    "stocks".to_string(),
                    "price lookup".to_string(),
                ],
                examples: vec![
                    "What is the price of GOOGL?".to_string(),
                    "Stock price for MSFT".to_string(),
                ],
                output_modes: json.clone(),
            },
            AgentSkill {
                id: "get_bitcoin_price_skill".to_string(),
                name: "Get Bitcoin Price".to_string(),
                description: "Retrieves the current bitcoin price in USD, EUR and GBP."
                    .to_string(),
                tags: vec![
                    "finance".to_string(),
                    "crypto".to_string(),
                    "bitcoin".to_string(),
                ],
                examples: vec!["What is bitcoin trading at?".to_string()],
                output_modes: json,
            },
        ],
    }
}

async fn get_agent_card(State(server): State<A2aServer>) -> Json<AgentCard> {
    debug!("Serving agent card");
    Json(server.card.as_ref().clone())
}

async fn send_task(
    State(server): State<A2aServer>,
    payload: Result<Json<TaskSendParams>, JsonRejection>,
) -> Response {
    let params = match payload {
        Ok(Json(params)) => params,
        Err(rejection) => {
            warn!("Rejected task submission: {}", rejection.body_text());
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new("InvalidRequest", rejection.body_text())),
            )
                .into_response();
        }
    };

    info!("POST /tasks/send: task {}", params.id);
    let task = run_task(&server.manager, params).await;
    (StatusCode::OK, Json(task)).into_response()
}

/// Run the manager on its own task so teardown completes even if this
/// request future is dropped (client disconnect), which fires the token.
async fn run_task(manager: &Arc<TaskManager>, params: TaskSendParams) -> Task {
    let token = CancellationToken::new();
    let guard = token.clone().drop_guard();
    let fallback = params.clone();
    let manager = Arc::clone(manager);

    let joined = tokio::spawn(async move { manager.handle(params, token).await }).await;
    guard.disarm();

    match joined {
        Ok(task) => task,
        Err(e) => {
            error!("Task {} aborted: {}", fallback.id, e);
            let mut task = Task::submitted(fallback);
            if let Err(e) = task.fail("InternalError", format!("task aborted: {e}")) {
                warn!("{}", e);
            }
            task
        }
    }
}

/// JSON-RPC 2.0 endpoint carrying the same task contract
async fn handle_rpc(
    State(server): State<A2aServer>,
    payload: Result<Json<RpcRequest>, JsonRejection>,
) -> Json<RpcResponse> {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!("Rejected JSON-RPC request: {}", rejection.body_text());
            return Json(RpcResponse::error(
                Value::Null,
                PARSE_ERROR,
                rejection.body_text(),
            ));
        }
    };

    debug!("A2A JSON-RPC {}", request.method);
    let id = request.id;
    let response = match request.method.as_str() {
        "tasks/send" => match serde_json::from_value::<TaskSendParams>(request.params) {
            Ok(params) => {
                let task = run_task(&server.manager, params).await;
                match serde_json::to_value(&task) {
                    Ok(value) => RpcResponse::success(id, value),
                    Err(e) => RpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
                }
            }
            Err(e) => RpcResponse::error(id, INVALID_PARAMS, format!("invalid task: {e}")),
        },
        "tasks/sendSubscribe" => {
            RpcResponse::error(id, UNSUPPORTED_OPERATION, "streaming is not supported")
        }
        "tasks/get" | "tasks/cancel" => {
            let task_id = request
                .params
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            RpcResponse::error(id, TASK_NOT_FOUND, format!("task not found: {task_id}"))
        }
        other => RpcResponse::error(id, METHOD_NOT_FOUND, format!("method not found: {other}")),
    };
    Json(response)
}
