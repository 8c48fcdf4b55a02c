use corellium::image::{Image, ImageKind};

use axum::Router;
use axum::extract::{Json, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};

use serde_json::Map;

use crate::creation_response;
use crate::state::{MockState, StoredImage};

pub(crate) fn router() -> Router<MockState> {
    Router::new()
        .route("/images", post(create))
        .route("/images/{id}", get(image).delete(delete))
}

// Image routes report errors through a `message` field.
fn message_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "message": message.into(),
        })),
    )
        .into_response()
}

async fn create(State(state): State<MockState>, mut multipart: Multipart) -> Response {
    state.record("POST /images").await;

    let mut stored = StoredImage {
        image: Image {
            id: None,
            name: None,
            kind: None,
            extra: Map::new(),
        },
        project: None,
        instance: None,
        encoding: None,
        file: Vec::new(),
    };

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return message_response(StatusCode::BAD_REQUEST, e.body_text()),
        };

        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };

        let data = match field.bytes().await {
            Ok(data) => data,
            Err(e) => return message_response(StatusCode::BAD_REQUEST, e.body_text()),
        };
        let text = || String::from_utf8_lossy(&data).into_owned();

        match name.as_str() {
            "file" => stored.file = data.to_vec(),
            "name" => stored.image.name = Some(text()),
            "type" => {
                stored.image.kind = serde_json::from_value(serde_json::Value::String(text()))
                    .ok()
                    .or(Some(ImageKind::Unknown));
            }
            "project" => stored.project = Some(text()),
            "instance" => stored.instance = Some(text()),
            "encoding" => stored.encoding = Some(text()),
            _ => {}
        }
    }

    if stored.image.name.is_none() {
        return message_response(StatusCode::BAD_REQUEST, "Missing image name");
    }

    let (image, answer) = state.store_image(stored).await;
    creation_response(image, answer)
}

async fn image(State(state): State<MockState>, Path(id): Path<String>) -> Response {
    state.record(format!("GET /images/{id}")).await;
    match state.image(&id).await {
        Some(image) => Json(image).into_response(),
        None => message_response(StatusCode::NOT_FOUND, "Image not found"),
    }
}

async fn delete(State(state): State<MockState>, Path(id): Path<String>) -> Response {
    state.record(format!("DELETE /images/{id}")).await;
    if state.delete_image(&id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        message_response(StatusCode::NOT_FOUND, "Image not found")
    }
}
