//! # API Module
//!
//! HTTP handlers for the 3xpl explorer server, mounted under `/api`.
//!
//! ## Available Endpoints
//!
//! - `GET /health` - Liveness check
//! - `POST /aggregate/:family` - Run a read-only SQL query over one aggregation
//!   family (`block_transfers`, `transaction_transfers`, `address_mempool`,
//!   `address_balances`, `address_transfers`)
//! - `POST /rpc` - JSON-RPC endpoint for MCP tool calls

pub mod aggregate;
pub mod health;
pub mod rpc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;

/// Builds the full application router with the API nested under `/api`.
pub fn create_router(state: AppState) -> Router {
    let api_router = Router::new()
        // Health check
        .route("/health", get(health::health_handler))
        // Aggregation
        .route("/aggregate/:family", post(aggregate::aggregate_handler))
        // JSON-RPC endpoint for MCP tool calls
        .route("/rpc", post(rpc::rpc_handler));

    Router::new()
        .nest("/api", api_router)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
