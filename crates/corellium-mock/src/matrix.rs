use std::collections::HashMap;

use corellium::assessment::{AssessmentStatus, CreateAssessment};

use axum::Router;
use axum::extract::{Json, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};

use crate::{creation_response, error_response};
use crate::state::{MockState, Transition};

pub(crate) fn router() -> Router<MockState> {
    Router::new()
        .route("/{instance_id}/assessments", post(create))
        .route(
            "/{instance_id}/instances/{target_id}/assessments",
            get(list),
        )
        .route(
            "/{instance_id}/assessments/{assessment_id}",
            get(assessment).delete(delete),
        )
        .route(
            "/{instance_id}/assessments/{assessment_id}/start",
            post(start_monitoring),
        )
        .route(
            "/{instance_id}/assessments/{assessment_id}/stop",
            post(stop_monitoring),
        )
        .route(
            "/{instance_id}/assessments/{assessment_id}/test",
            post(run_checks),
        )
        .route(
            "/{instance_id}/assessments/{assessment_id}/download",
            get(download),
        )
}

fn no_assessment(id: &str) -> Response {
    error_response(StatusCode::NOT_FOUND, format!("No assessment with id {id}"))
}

async fn create(
    State(state): State<MockState>,
    Path(instance_id): Path<String>,
    Json(body): Json<CreateAssessment>,
) -> Response {
    state.record("POST /assessments").await;
    if body.instance_id != instance_id {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Instance in path and body differ",
        );
    }
    let (assessment, answer) = state.create_assessment(body).await;
    creation_response(assessment, answer)
}

async fn list(
    State(state): State<MockState>,
    Path((_, target_id)): Path<(String, String)>,
) -> Response {
    state.record("GET /assessments").await;
    Json(state.assessments(&target_id).await).into_response()
}

async fn assessment(
    State(state): State<MockState>,
    Path((_, assessment_id)): Path<(String, String)>,
) -> Response {
    state
        .record(format!("GET /assessments/{assessment_id}"))
        .await;
    match state.assessment(&assessment_id).await {
        Some(assessment) => Json(assessment).into_response(),
        None => no_assessment(&assessment_id),
    }
}

async fn delete(
    State(state): State<MockState>,
    Path((_, assessment_id)): Path<(String, String)>,
) -> Response {
    state
        .record(format!("DELETE /assessments/{assessment_id}"))
        .await;
    if state.delete_assessment(&assessment_id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        no_assessment(&assessment_id)
    }
}

async fn transition(
    state: &MockState,
    assessment_id: &str,
    action: &str,
    from: AssessmentStatus,
    transient: AssessmentStatus,
    settled: &[AssessmentStatus],
) -> Response {
    state
        .record(format!("POST /assessments/{assessment_id}/{action}"))
        .await;
    match state
        .advance_assessment(assessment_id, from, transient, settled)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(Transition::NotFound) => no_assessment(assessment_id),
        Err(Transition::WrongStatus(status)) => error_response(
            StatusCode::CONFLICT,
            format!("Cannot {action} an assessment in status {status}"),
        ),
    }
}

async fn start_monitoring(
    State(state): State<MockState>,
    Path((_, assessment_id)): Path<(String, String)>,
) -> Response {
    transition(
        &state,
        &assessment_id,
        "start",
        AssessmentStatus::New,
        AssessmentStatus::StartingMonitoring,
        &[AssessmentStatus::Monitoring],
    )
    .await
}

async fn stop_monitoring(
    State(state): State<MockState>,
    Path((_, assessment_id)): Path<(String, String)>,
) -> Response {
    transition(
        &state,
        &assessment_id,
        "stop",
        AssessmentStatus::Monitoring,
        AssessmentStatus::StoppingMonitoring,
        &[AssessmentStatus::ReadyForTesting],
    )
    .await
}

async fn run_checks(
    State(state): State<MockState>,
    Path((_, assessment_id)): Path<(String, String)>,
) -> Response {
    transition(
        &state,
        &assessment_id,
        "test",
        AssessmentStatus::ReadyForTesting,
        AssessmentStatus::Testing,
        &[AssessmentStatus::GeneratingReport, AssessmentStatus::Complete],
    )
    .await
}

async fn download(
    State(state): State<MockState>,
    Path((_, assessment_id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state
        .record(format!("GET /assessments/{assessment_id}/download"))
        .await;

    let Some(assessment) = state.assessment(&assessment_id).await else {
        return no_assessment(&assessment_id);
    };

    match query.get("format").map(String::as_str) {
        Some("html") => (
            [(header::CONTENT_TYPE, "text/html")],
            format!(
                "<html><body><h1>Assessment {assessment_id}</h1><p>{}</p></body></html>",
                assessment.status
            ),
        )
            .into_response(),
        None | Some("json") => match serde_json::to_string(&assessment) {
            // The report is delivered as text, clients parse it.
            Ok(report) => ([(header::CONTENT_TYPE, "text/plain")], report).into_response(),
            Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
        Some(other) => error_response(
            StatusCode::BAD_REQUEST,
            format!("Unknown report format {other}"),
        ),
    }
}
