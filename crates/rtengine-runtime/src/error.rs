//! Runtime error taxonomy
//!
//! Parse and type errors are produced by the parser and core crates; the
//! kinds below cover plan construction, operator setup, per-event
//! processing and engine control operations.

use crate::flow::FlowId;
use crate::session::SessionId;
use thiserror::Error;

/// Schema or DAG construction failure; the flow is never deployed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct PlanError {
    pub message: String,
}

impl PlanError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure while opening an operator during flow deployment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to open operator '{operator}': {message}")]
pub struct OpenError {
    pub operator: String,
    pub message: String,
}

impl OpenError {
    pub fn new(operator: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operator: operator.into(),
            message: message.into(),
        }
    }
}

/// Per-event processing failure. Logged; the offending event is dropped
/// and the operator keeps running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure of an engine control operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("no flow with id {0}")]
    UnknownFlow(FlowId),

    #[error("no session with id {0:?}")]
    UnknownSession(SessionId),

    #[error("no injectable source named '{0}'")]
    UnknownSource(String),

    #[error("engine is not running")]
    Stopped,

    #[error("{0}")]
    Rejected(String),
}
