//! REST API routes configuration

use crate::api::handlers::{self, ApiState};
use crate::api::websocket::ws_handler;
use axum::{
    http::{StatusCode, Uri},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::{Any, CorsLayer};

/// Unknown paths get a JSON 404 instead of an empty body
async fn fallback_handler(uri: Uri) -> (StatusCode, Json<handlers::ApiError>) {
    (
        StatusCode::NOT_FOUND,
        Json(handlers::ApiError {
            error: format!("no route for {}", uri.path()),
            code: "NOT_FOUND".to_string(),
        }),
    )
}

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ws", get(ws_handler))
        // Wallet
        .route("/api/wallet", get(handlers::get_wallet_info))
        .route("/api/wallet/deposits", post(handlers::record_deposit))
        // Transactions
        .route(
            "/api/transactions",
            get(handlers::list_transactions).post(handlers::propose_transaction),
        )
        .route(
            "/api/transactions/pending",
            get(handlers::get_pending_transactions),
        )
        .route("/api/transactions/{id}", get(handlers::get_transaction))
        .route(
            "/api/transactions/{id}/sign",
            post(handlers::sign_transaction),
        )
        .route(
            "/api/transactions/{id}/reject",
            post(handlers::reject_transaction),
        )
        .route(
            "/api/transactions/{id}/execute",
            post(handlers::execute_transaction),
        )
        .route(
            "/api/transactions/{id}/cancel",
            post(handlers::cancel_transaction),
        )
        // Signers
        .route(
            "/api/signers",
            get(handlers::list_signers).post(handlers::add_signer),
        )
        .route(
            "/api/signers/{identity}",
            get(handlers::get_signer_info).delete(handlers::remove_signer),
        )
        // Policy
        .route(
            "/api/policy",
            get(handlers::get_policy).put(handlers::update_policy),
        )
        .route("/api/policy/history", get(handlers::get_policy_history))
        // Emergency
        .route("/api/emergency", get(handlers::list_emergency_actions))
        .route("/api/emergency/freeze", post(handlers::initiate_freeze))
        .route("/api/emergency/unfreeze", post(handlers::initiate_unfreeze))
        .route(
            "/api/emergency/{id}/execute",
            post(handlers::execute_emergency_action),
        )
        .route(
            "/api/emergency/{id}/cancel",
            post(handlers::cancel_emergency_action),
        )
        // Audit
        .route("/api/audit", get(handlers::get_audit_trail))
        .route("/api/audit/verify", get(handlers::verify_audit_chain))
        .fallback(fallback_handler)
        .with_state(state)
        .layer(cors)
}
