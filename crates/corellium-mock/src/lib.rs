//! `corellium-mock` is an in-process mock of the device-virtualization
//! REST API and of the agents running inside virtual devices.
//!
//! It is meant to be started by tests on an ephemeral local port. The mock
//! keeps every resource in memory and drives assessments through their
//! lifecycle the same way the real service does: a request such as
//! "start monitoring" moves an assessment into a transient status, and the
//! following reads observe it settling into the next stable one.
//!
//! Every request is appended to a call log, so that tests can check
//! which side effects happened, and in which order.
//!
//! The agent channel is a WebSocket endpoint whose behavior is chosen per
//! instance through [`AgentBehavior`], making it possible to reproduce
//! correct answers as well as malformed frames, application errors, and
//! abnormal closures.
//!
//! [`AgentBehavior`]: crate::state::AgentBehavior

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Error management.
pub mod error;
/// The mock server.
pub mod server;
/// The in-memory state shared by all the routes.
pub mod state;

mod agent;
mod images;
mod instances;
mod matrix;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use serde::Serialize;

use crate::state::CreationAnswer;

// Paths shared by the routers.
pub(crate) const API_ROOT: &str = "/api/v1";
pub(crate) const MATRIX_ROOT: &str = "/api/v1/services/matrix";

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": message.into(),
        })),
    )
        .into_response()
}

pub(crate) fn creation_response<T: Serialize>(record: T, answer: CreationAnswer) -> Response {
    match answer {
        CreationAnswer::Record => Json(record).into_response(),
        CreationAnswer::EmptyObject => Json(serde_json::json!({})).into_response(),
        CreationAnswer::EmptyBody => StatusCode::CREATED.into_response(),
    }
}
