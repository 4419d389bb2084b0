//! Execution dispatcher

pub mod executor;

pub use executor::{
    external_failure, settle, ComplianceCheck, ExecutionStep, FundsDispatch, FundsOutcome,
};
