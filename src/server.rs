//! Thin HTTP dispatcher over the tool registry.
//!
//! The RPC protocol and transports proper are external collaborators; this
//! server only exposes the tool table and the JSON contracts:
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | Tool names, descriptions, parameter schemas |
//! | `POST` | `/tools/{name}` | Invoke one tool with a JSON object |
//! | `GET`  | `/health` | Liveness check |
//!
//! Tool failures are structured error objects in a `200` body — the
//! dispatcher already converts every error; transport-level codes are
//! reserved for malformed requests.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::tools::{ToolContext, ToolRegistry};

#[derive(Clone)]
struct AppState {
    registry: Arc<ToolRegistry>,
    context: Arc<ToolContext>,
}

/// Run the tool server until the process is terminated.
pub async fn run_server(
    bind: &str,
    registry: Arc<ToolRegistry>,
    context: Arc<ToolContext>,
) -> anyhow::Result<()> {
    let state = AppState { registry, context };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/tools/list", get(handle_list))
        .route("/tools/:name", post(handle_tool))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    tracing::info!(bind = bind, "tool server listening");
    println!("lex tool server listening on http://{}", bind);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_list(State(state): State<AppState>) -> Json<Value> {
    let tools: Vec<Value> = state
        .registry
        .tools()
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name(),
                "description": tool.description(),
                "parameters": tool.parameters_schema(),
            })
        })
        .collect();
    Json(json!({ "tools": tools }))
}

async fn handle_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<Value>,
) -> Json<Value> {
    let result = state.registry.dispatch(&name, params, &state.context).await;
    Json(result)
}

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
