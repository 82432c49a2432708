//! Crate-wide error type.
//!
//! One enum covers every failure a control-plane operation can report;
//! the HTTP layer maps each variant onto a status code in one place.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::config::schema::ConfigKey;
use crate::orchestrator::NodeId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no document for key {0}")]
    NotFound(String),

    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("version conflict on {key}: expected {expected}, current is {actual}")]
    VersionConflict {
        key: ConfigKey,
        expected: u64,
        actual: u64,
    },

    #[error("malformed bundle: {0}")]
    MalformedBundle(String),

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("not configured: {0}")]
    NotConfigured(&'static str),

    #[error("failed to apply configuration to {node}: {cause}")]
    ApplyFailed { node: NodeId, cause: String },

    #[error("restart failed for {}", format_nodes(.0))]
    RestartFailed(Vec<NodeId>),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// HTTP status this error maps onto.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::VersionConflict { .. } => StatusCode::CONFLICT,
            Error::MalformedBundle(_) => StatusCode::BAD_REQUEST,
            Error::InvalidCertificate(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::NotConfigured(_) => StatusCode::CONFLICT,
            Error::ApplyFailed { .. } | Error::RestartFailed(_) => StatusCode::BAD_GATEWAY,
            Error::Persistence(_) | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

fn format_nodes(nodes: &[NodeId]) -> String {
    nodes
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
