use corellium::command::Command;
use corellium::frame::CommandResponse;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;

use serde_json::json;

use tracing::{debug, warn};

use crate::error_response;
use crate::state::{AgentBehavior, MockState};

pub(crate) fn router() -> Router<MockState> {
    Router::new().route("/agent/{info}", get(upgrade))
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<MockState>,
    Path(info): Path<String>,
) -> Response {
    let Some(behavior) = state.agent_behavior(&info).await else {
        return error_response(StatusCode::NOT_FOUND, format!("No agent at {info}"));
    };
    ws.on_upgrade(move |socket| serve(socket, state, info, behavior))
}

async fn serve(mut socket: WebSocket, state: MockState, info: String, behavior: AgentBehavior) {
    let command = receive_command(&mut socket).await;
    state.agent_connected(&info, command.clone()).await;

    let Some(command) = command else {
        return;
    };
    debug!("Agent {info} received `{}:{}`", command.kind, command.op);

    let id = command.id;
    let answers = match behavior {
        AgentBehavior::Echo => vec![Message::Text(
            CommandResponse::success(id, json!({"result": "ok"}))
                .encode_text()
                .into(),
        )],
        AgentBehavior::EchoBinary => vec![Message::Binary(
            CommandResponse::success(id, json!({"result": "ok"})).encode_binary(),
        )],
        AgentBehavior::Fail(message) => vec![Message::Text(
            CommandResponse::failure(id, message).encode_text().into(),
        )],
        AgentBehavior::ForeignIdFirst => vec![
            Message::Text(
                CommandResponse::success(id.wrapping_add(1), json!({"result": "stale"}))
                    .encode_text()
                    .into(),
            ),
            Message::Text(
                CommandResponse::success(id, json!({"result": "ok"}))
                    .encode_text()
                    .into(),
            ),
        ],
        AgentBehavior::Close(code) => vec![Message::Close(Some(CloseFrame {
            code,
            reason: "closing".into(),
        }))],
        AgentBehavior::Malformed => vec![Message::Text("not json".into())],
        AgentBehavior::Silent => Vec::new(),
    };

    for answer in answers {
        if let Err(e) = socket.send(answer).await {
            warn!("Agent {info} failed to answer: {e}");
            return;
        }
    }

    // Wait for the client to close the connection.
    while let Some(message) = socket.recv().await {
        match message {
            Ok(Message::Close(_)) => {
                state.agent_closed(&info).await;
                return;
            }
            Ok(_) => {}
            Err(e) => {
                debug!("Agent {info} connection dropped: {e}");
                return;
            }
        }
    }
}

async fn receive_command(socket: &mut WebSocket) -> Option<Command> {
    while let Some(message) = socket.recv().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        };

        match Command::decode(text.as_str()) {
            Ok(command) => return Some(command),
            Err(e) => {
                warn!("Agent received an invalid command: {e}");
                return None;
            }
        }
    }
    None
}
