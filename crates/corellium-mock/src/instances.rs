use std::collections::HashMap;

use corellium::instance::InstanceState;

use axum::Router;
use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};

use serde_json::Value;

use crate::error_response;
use crate::state::MockState;

pub(crate) fn router() -> Router<MockState> {
    Router::new()
        .route("/instances", get(list))
        .route("/instances/{id}", get(instance))
        .route("/instances/{id}/start", post(start))
        .route("/instances/{id}/stop", post(stop))
        .route("/instances/{id}/reboot", post(reboot))
        .route("/instances/{id}/input", post(input))
}

fn no_instance(id: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("No instance with id {id}"))
}

async fn list(
    State(state): State<MockState>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.record("GET /instances").await;
    let name = query.get("name").map(String::as_str);
    Json(state.instances(name).await).into_response()
}

async fn instance(State(state): State<MockState>, Path(id): Path<String>) -> Response {
    state.record(format!("GET /instances/{id}")).await;
    match state.instance(&id).await {
        Some(instance) => Json(instance).into_response(),
        None => no_instance(&id),
    }
}

async fn power(state: &MockState, id: &str, action: &str, target: InstanceState) -> Response {
    state.record(format!("POST /instances/{id}/{action}")).await;
    if state.set_instance_state(id, target).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        no_instance(id)
    }
}

async fn start(State(state): State<MockState>, Path(id): Path<String>) -> Response {
    power(&state, &id, "start", InstanceState::On).await
}

async fn stop(State(state): State<MockState>, Path(id): Path<String>) -> Response {
    power(&state, &id, "stop", InstanceState::Off).await
}

async fn reboot(State(state): State<MockState>, Path(id): Path<String>) -> Response {
    power(&state, &id, "reboot", InstanceState::On).await
}

async fn input(
    State(state): State<MockState>,
    Path(id): Path<String>,
    Json(input): Json<Value>,
) -> Response {
    state.record(format!("POST /instances/{id}/input {input}")).await;
    match state.instance(&id).await {
        Some(instance) if instance.is_on() => StatusCode::NO_CONTENT.into_response(),
        Some(instance) => error_response(
            StatusCode::CONFLICT,
            format!("Instance is {}, input requires it on", instance.state),
        ),
        None => no_instance(&id),
    }
}
