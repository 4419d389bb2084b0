//! REST API handlers for custody operations
//!
//! The upstream identity layer authenticates callers and forwards the
//! verified principal in the `x-principal` header.

use crate::access::{Principal, Role, Signer};
use crate::api::websocket::WsBroadcaster;
use crate::audit::{AuditEvent, AuditQuery};
use crate::emergency::EmergencyAction;
use crate::engine::{AuditChainStatus, CustodyEngine, WalletInfo};
use crate::error::CustodyError;
use crate::multisig::{Proposal, Transaction};
use crate::policy::{Policy, PolicyVersion};
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Header carrying the authenticated caller identity
pub const PRINCIPAL_HEADER: &str = "x-principal";

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<CustodyEngine>,
    pub ws_broadcaster: Arc<WsBroadcaster>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub code: String,
}

pub type ApiRejection = (StatusCode, Json<ApiError>);

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub wallet_id: String,
    pub frozen: bool,
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Deserialize)]
pub struct DepositRequest {
    pub amount: u64,
}

#[derive(Deserialize)]
pub struct AddSignerRequest {
    pub identity: Principal,
    pub role: Role,
}

#[derive(Deserialize)]
pub struct EmergencyRequest {
    #[serde(default)]
    pub reason: String,
}

// ============================================================================
// Caller identity
// ============================================================================

/// Authenticated caller taken from [`PRINCIPAL_HEADER`]
#[derive(Debug, Clone)]
pub struct Caller(pub Principal);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts
            .headers
            .get(PRINCIPAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(ApiError {
                        error: format!("missing {} header", PRINCIPAL_HEADER),
                        code: "MISSING_PRINCIPAL".to_string(),
                    }),
                )
            })?;

        Ok(Caller(Principal::new(identity)))
    }
}

/// Map an engine error to its HTTP status and stable code
pub fn api_error(e: CustodyError) -> ApiRejection {
    let status = match &e {
        CustodyError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        CustodyError::WalletFrozen => StatusCode::LOCKED,
        CustodyError::TransactionNotFound(_)
        | CustodyError::SignerNotFound(_)
        | CustodyError::EmergencyActionNotFound(_) => StatusCode::NOT_FOUND,
        CustodyError::NotPending { .. }
        | CustodyError::Expired(_)
        | CustodyError::AlreadySigned
        | CustodyError::AlreadyRejected
        | CustodyError::ExecutionInProgress(_)
        | CustodyError::TooEarly { .. } => StatusCode::CONFLICT,
        CustodyError::PolicyViolation(_)
        | CustodyError::InsufficientBalance { .. }
        | CustodyError::InvalidPayload(_)
        | CustodyError::InvalidConfiguration(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CustodyError::Storage(_) | CustodyError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (
        status,
        Json(ApiError {
            code: e.code().to_string(),
            error: e.to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let info = state.engine.get_wallet_info().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        wallet_id: info.wallet_id,
        frozen: info.is_frozen,
    })
}

/// GET /api/wallet - Wallet summary (available while frozen)
pub async fn get_wallet_info(State(state): State<ApiState>) -> Json<WalletInfo> {
    Json(state.engine.get_wallet_info().await)
}

/// POST /api/wallet/deposits - Record inbound funds
pub async fn record_deposit(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Json(req): Json<DepositRequest>,
) -> Result<Json<WalletInfo>, ApiRejection> {
    state
        .engine
        .record_deposit(&caller, req.amount)
        .await
        .map(Json)
        .map_err(api_error)
}

/// GET /api/transactions - Every transaction in proposal order
pub async fn list_transactions(State(state): State<ApiState>) -> Json<Vec<Transaction>> {
    Json(state.engine.list_transactions().await)
}

/// GET /api/transactions/pending
pub async fn get_pending_transactions(State(state): State<ApiState>) -> Json<Vec<Transaction>> {
    Json(state.engine.get_pending_transactions().await)
}

/// POST /api/transactions - Propose a transaction
pub async fn propose_transaction(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Json(proposal): Json<Proposal>,
) -> Result<(StatusCode, Json<Transaction>), ApiRejection> {
    let tx = state
        .engine
        .propose_transaction(&caller, proposal)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// GET /api/transactions/{id}
pub async fn get_transaction(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<Transaction>, ApiRejection> {
    state
        .engine
        .get_transaction(&id)
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /api/transactions/{id}/sign
pub async fn sign_transaction(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<Transaction>, ApiRejection> {
    state
        .engine
        .sign_transaction(&caller, &id)
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /api/transactions/{id}/reject
pub async fn reject_transaction(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<Transaction>, ApiRejection> {
    state
        .engine
        .reject_transaction(&caller, &id)
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /api/transactions/{id}/execute
pub async fn execute_transaction(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<Transaction>, ApiRejection> {
    state
        .engine
        .execute_transaction(&caller, &id)
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /api/transactions/{id}/cancel
pub async fn cancel_transaction(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<Transaction>, ApiRejection> {
    state
        .engine
        .cancel_transaction(&caller, &id)
        .await
        .map(Json)
        .map_err(api_error)
}

/// GET /api/signers
pub async fn list_signers(State(state): State<ApiState>) -> Json<Vec<Signer>> {
    Json(state.engine.list_signers().await)
}

/// GET /api/signers/{identity}
pub async fn get_signer_info(
    State(state): State<ApiState>,
    Path(identity): Path<String>,
) -> Result<Json<Signer>, ApiRejection> {
    state
        .engine
        .get_signer_info(&Principal::new(identity))
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /api/signers - Propose adding a signer
pub async fn add_signer(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Json(req): Json<AddSignerRequest>,
) -> Result<(StatusCode, Json<Transaction>), ApiRejection> {
    let tx = state
        .engine
        .add_signer(&caller, req.identity, req.role)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// DELETE /api/signers/{identity} - Propose removing a signer
pub async fn remove_signer(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Path(identity): Path<String>,
) -> Result<(StatusCode, Json<Transaction>), ApiRejection> {
    let tx = state
        .engine
        .remove_signer(&caller, Principal::new(identity))
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// GET /api/policy
pub async fn get_policy(State(state): State<ApiState>) -> Json<Policy> {
    Json(state.engine.current_policy().await)
}

/// GET /api/policy/history
pub async fn get_policy_history(State(state): State<ApiState>) -> Json<Vec<PolicyVersion>> {
    Json(state.engine.policy_history().await)
}

/// PUT /api/policy - Propose a policy change
pub async fn update_policy(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Json(policy): Json<Policy>,
) -> Result<(StatusCode, Json<Transaction>), ApiRejection> {
    let tx = state
        .engine
        .update_policy(&caller, policy)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(tx)))
}

/// GET /api/emergency
pub async fn list_emergency_actions(State(state): State<ApiState>) -> Json<Vec<EmergencyAction>> {
    Json(state.engine.get_emergency_actions().await)
}

/// POST /api/emergency/freeze
pub async fn initiate_freeze(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Json(req): Json<EmergencyRequest>,
) -> Result<(StatusCode, Json<EmergencyAction>), ApiRejection> {
    let action = state
        .engine
        .initiate_emergency_freeze(&caller, &req.reason)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(action)))
}

/// POST /api/emergency/unfreeze
pub async fn initiate_unfreeze(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Json(req): Json<EmergencyRequest>,
) -> Result<(StatusCode, Json<EmergencyAction>), ApiRejection> {
    let action = state
        .engine
        .initiate_emergency_unfreeze(&caller, &req.reason)
        .await
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(action)))
}

/// POST /api/emergency/{id}/execute
pub async fn execute_emergency_action(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<EmergencyAction>, ApiRejection> {
    state
        .engine
        .execute_emergency_action(&caller, &id)
        .await
        .map(Json)
        .map_err(api_error)
}

/// POST /api/emergency/{id}/cancel
pub async fn cancel_emergency_action(
    State(state): State<ApiState>,
    Caller(caller): Caller,
    Path(id): Path<String>,
) -> Result<Json<EmergencyAction>, ApiRejection> {
    state
        .engine
        .cancel_emergency_action(&caller, &id)
        .await
        .map(Json)
        .map_err(api_error)
}

/// GET /api/audit - Filtered audit trail
pub async fn get_audit_trail(
    State(state): State<ApiState>,
    Query(query): Query<AuditQuery>,
) -> Json<Vec<AuditEvent>> {
    Json(state.engine.get_audit_trail(&query).await)
}

/// GET /api/audit/verify - Recompute the audit hash chain
pub async fn verify_audit_chain(State(state): State<ApiState>) -> Json<AuditChainStatus> {
    Json(state.engine.verify_audit_chain().await)
}
