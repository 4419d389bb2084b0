//! REST API module
//!
//! HTTP front end over [`CustodyEngine`](crate::engine::CustodyEngine).
//! Mutating endpoints require the `x-principal` header.
//!
//! # Endpoints
//!
//! ## Wallet
//! - `GET /api/wallet` - Balance, freeze flag, limits and threshold
//! - `POST /api/wallet/deposits` - Record inbound funds
//!
//! ## Transactions
//! - `GET /api/transactions` - All transactions
//! - `POST /api/transactions` - Propose
//! - `GET /api/transactions/pending` - Pending only
//! - `GET /api/transactions/{id}` - Single transaction
//! - `POST /api/transactions/{id}/sign|reject|execute|cancel`
//!
//! ## Signers
//! - `GET /api/signers` - Signer set
//! - `POST /api/signers` - Propose adding a signer
//! - `GET /api/signers/{identity}` - Signer record
//! - `DELETE /api/signers/{identity}` - Propose removing a signer
//!
//! ## Policy
//! - `GET /api/policy` - Current policy
//! - `PUT /api/policy` - Propose a policy change
//! - `GET /api/policy/history` - Every published version
//!
//! ## Emergency
//! - `GET /api/emergency` - Queued and resolved actions
//! - `POST /api/emergency/freeze|unfreeze` - Queue an action
//! - `POST /api/emergency/{id}/execute|cancel`
//!
//! ## Audit
//! - `GET /api/audit` - Filtered trail (query string: category, min_severity, actor, correlation_id, since, until, limit)
//! - `GET /api/audit/verify` - Recompute the hash chain
//!
//! ## WebSocket
//! - `GET /ws` - Live audit events

pub mod handlers;
pub mod routes;
pub mod websocket;

pub use handlers::{ApiState, Caller};
pub use routes::create_router;
pub use websocket::WsBroadcaster;
