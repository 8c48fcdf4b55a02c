use std::time::Duration;

use corellium::command::{Command, CommandParameters};
use corellium::frame::{self, Frame};

use futures_util::{SinkExt, StreamExt};

use rand::Rng;

use serde_json::Value;

use tokio::net::TcpStream;

use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use tracing::{debug, info};

use crate::client::Client;
use crate::error::{Error, ErrorKind, Result};
use crate::instances::Instances;
use crate::transport::{Transport, join_path, websocket_endpoint};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Correlation identifiers are drawn from this range.
const CORRELATION_IDS: std::ops::Range<u32> = 0..1000;

/// Sends a command to the agent of an instance and waits for the
/// correlated response.
///
/// It is a shorthand for [`Client::agent`] followed by
/// [`Agent::send_command`].
///
/// # Errors
///
/// See [`Agent::send_command`].
pub async fn send_command(
    client: &Client,
    instance_id: &str,
    kind: &str,
    op: &str,
    parameters: Option<CommandParameters>,
) -> Result<Value> {
    client
        .agent(instance_id)
        .send_command(kind, op, parameters)
        .await
}

/// The agent running inside an instance.
///
/// Every command opens its own connection, which is closed as soon as the
/// command settles.
#[derive(Debug, Clone)]
pub struct Agent {
    transport: Transport,
    instances: Instances,
    api_root: String,
    instance_id: String,
    timeout: Option<Duration>,
}

impl Agent {
    pub(crate) fn new(transport: Transport, api_root: &str, instance_id: String) -> Self {
        Self {
            instances: Instances::new(transport.clone(), api_root),
            transport,
            api_root: api_root.into(),
            instance_id,
            timeout: None,
        }
    }

    /// Sets the maximum time to wait for a response once the command has
    /// been sent.
    ///
    /// No limit is applied by default.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Returns the identifier of the instance the agent runs in.
    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Sends a command and waits for the correlated response.
    ///
    /// The whole decoded response object is returned, correlation
    /// identifier included. A normal closure before any response yields
    /// [`Value::Null`].
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::Precondition`] when the instance exposes no agent,
    ///   in which case no connection is attempted
    /// - [`ErrorKind::Application`] when the agent answers with an error,
    ///   carrying its message verbatim
    /// - [`ErrorKind::Protocol`] when a received frame cannot be decoded
    /// - [`ErrorKind::Transport`] when the connection fails or is closed
    ///   with a code other than the normal one
    /// - [`ErrorKind::Timeout`] when the response does not arrive in time
    pub async fn send_command(
        &self,
        kind: &str,
        op: &str,
        parameters: Option<CommandParameters>,
    ) -> Result<Value> {
        let instance = self.instances.get(&self.instance_id).await?;
        let Some(info) = instance.agent_address() else {
            return Err(Error::new(ErrorKind::Precondition, "No agent info returned"));
        };

        let url = format!(
            "{}{}",
            websocket_endpoint(self.transport.endpoint())?,
            join_path(&self.api_root, &format!("agent/{info}"))
        );

        let id = rand::thread_rng().gen_range(CORRELATION_IDS);
        let command = Command::new(kind, op, id);
        let command = match parameters {
            Some(parameters) => command.parameters(parameters),
            None => command,
        };
        let encoded = command.encode()?;

        debug!("Connecting to agent at {url}");
        let (mut socket, _) = connect_async(url.as_str()).await?;
        info!("Sending `{kind}:{op}` with id {id} to instance {}", self.instance_id);

        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, exchange(&mut socket, id, encoded))
                .await
                .unwrap_or_else(|_| {
                    Err(Error::new(
                        ErrorKind::Timeout,
                        format!("No response to `{kind}:{op}` within {timeout:?}"),
                    ))
                }),
            None => exchange(&mut socket, id, encoded).await,
        };

        // The peer might have closed the connection already.
        if let Err(e) = socket.close(None).await {
            debug!("Closing the agent connection: {e}");
        }

        result
    }
}

async fn exchange(socket: &mut Socket, id: u32, encoded: String) -> Result<Value> {
    socket.send(Message::Text(encoded.into())).await?;

    while let Some(message) = socket.next().await {
        let frame = match message? {
            Message::Text(text) => Frame::Text(text.as_str().to_owned()),
            Message::Binary(data) => Frame::Binary(data),
            Message::Close(close) => {
                let code = close.map_or(CloseCode::Status, |close| close.code);
                if code == CloseCode::Normal {
                    debug!("Agent closed the connection before answering");
                    return Ok(Value::Null);
                }
                return Err(Error::new(
                    ErrorKind::Transport,
                    format!("WebSocket closed with code {}", u16::from(code)),
                ));
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        let response = frame::decode(frame)?;
        if response.id != id {
            debug!("Ignoring response {} while waiting for {id}", response.id);
            continue;
        }

        return response
            .into_result()
            .map_err(|message| Error::new(ErrorKind::Application, message));
    }

    Err(Error::new(
        ErrorKind::Transport,
        "WebSocket ended before a response was received",
    ))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use corellium::command::CommandParameters;
    use corellium::instance::{Instance, InstanceState};

    use corellium_mock::state::{AgentBehavior, MockApi, MockState};

    use serde_json::{Value, json};

    use crate::error::ErrorKind;
    use crate::tests::{check_function_with_mock, client};

    use super::send_command;

    const INSTANCE: &str = "instance-1";
    const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

    fn agent_state(behavior: AgentBehavior) -> MockState {
        MockApi::new()
            .instance(
                Instance::new(INSTANCE, InstanceState::On).agent_info("abc"),
                behavior,
            )
            .build()
    }

    async fn assert_closed_once(state: &MockState) {
        assert_eq!(state.agent_connections().await, 1);
        assert_eq!(state.wait_for_agent_closes(1, CLOSE_TIMEOUT).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn echo() {
        let state = agent_state(AgentBehavior::Echo);

        check_function_with_mock(state.clone(), |endpoint| async move {
            let client = client(&endpoint);
            let response = send_command(&client, INSTANCE, "wifi", "connect", None)
                .await
                .unwrap();

            let commands = state.commands().await;
            assert_eq!(commands.len(), 1);
            assert_eq!(commands[0].kind, "wifi");
            assert_eq!(commands[0].op, "connect");
            assert!(commands[0].id < 1000);

            assert_eq!(response, json!({"id": commands[0].id, "result": "ok"}));
            assert_closed_once(&state).await;

            assert_eq!(
                state.calls().await,
                [
                    "GET /instances/instance-1",
                    "AGENT connect abc",
                    "AGENT close abc"
                ]
            );
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn parameters() {
        let state = agent_state(AgentBehavior::Echo);

        check_function_with_mock(state.clone(), |endpoint| async move {
            let mut parameters = CommandParameters::new();
            parameters
                .str("ssid", "cafe")
                .bool("hidden", false)
                .u64("id", 7);

            client(&endpoint)
                .agent(INSTANCE)
                .send_command("wifi", "connect", Some(parameters))
                .await
                .unwrap();

            let command = &state.commands().await[0];
            assert_eq!(command.parameters.get("ssid"), Some(&json!("cafe")));
            assert_eq!(command.parameters.get("hidden"), Some(&json!(false)));
            // The correlation identifier is never overwritten.
            assert_eq!(command.parameters.get("id"), None);
            assert!(command.id < 1000);
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn binary_frame() {
        let state = agent_state(AgentBehavior::EchoBinary);

        check_function_with_mock(state.clone(), |endpoint| async move {
            let response = client(&endpoint)
                .agent(INSTANCE)
                .send_command("app", "list", None)
                .await
                .unwrap();

            let id = state.commands().await[0].id;
            assert_eq!(response, json!({"id": id, "result": "ok"}));
            assert_closed_once(&state).await;
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn foreign_identifier_ignored() {
        let state = agent_state(AgentBehavior::ForeignIdFirst);

        check_function_with_mock(state.clone(), |endpoint| async move {
            let response = client(&endpoint)
                .agent(INSTANCE)
                .send_command("system", "status", None)
                .await
                .unwrap();

            assert_eq!(response["result"], "ok");
            assert_eq!(response["id"], state.commands().await[0].id);
            assert_closed_once(&state).await;
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn missing_agent_info() {
        let state = MockApi::new()
            .instance(
                Instance::new(INSTANCE, InstanceState::On),
                AgentBehavior::Echo,
            )
            .build();

        check_function_with_mock(state.clone(), |endpoint| async move {
            let error = client(&endpoint)
                .agent(INSTANCE)
                .send_command("wifi", "connect", None)
                .await
                .unwrap_err();

            assert_eq!(error.kind(), ErrorKind::Precondition);
            assert_eq!(error.description(), "No agent info returned");
            assert_eq!(state.agent_connections().await, 0);
            assert_eq!(state.calls().await, ["GET /instances/instance-1"]);
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unknown_instance() {
        let state = agent_state(AgentBehavior::Echo);

        check_function_with_mock(state.clone(), |endpoint| async move {
            let error = client(&endpoint)
                .agent("instance-2")
                .send_command("wifi", "connect", None)
                .await
                .unwrap_err();

            assert_eq!(error.kind(), ErrorKind::Application);
            assert_eq!(error.description(), "No instance with id instance-2");
            assert_eq!(state.agent_connections().await, 0);
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn error_payload() {
        let state = agent_state(AgentBehavior::Fail("boom".into()));

        check_function_with_mock(state.clone(), |endpoint| async move {
            let error = client(&endpoint)
                .agent(INSTANCE)
                .send_command("frida", "attach", None)
                .await
                .unwrap_err();

            assert_eq!(error.kind(), ErrorKind::Application);
            assert_eq!(error.description(), "boom");
            assert_closed_once(&state).await;
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_frame() {
        let state = agent_state(AgentBehavior::Malformed);

        check_function_with_mock(state.clone(), |endpoint| async move {
            let error = client(&endpoint)
                .agent(INSTANCE)
                .send_command("wifi", "connect", None)
                .await
                .unwrap_err();

            assert_eq!(error.kind(), ErrorKind::Protocol);
            assert_closed_once(&state).await;
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn abnormal_close() {
        let state = agent_state(AgentBehavior::Close(1011));

        check_function_with_mock(state.clone(), |endpoint| async move {
            let error = client(&endpoint)
                .agent(INSTANCE)
                .send_command("wifi", "connect", None)
                .await
                .unwrap_err();

            assert_eq!(error.kind(), ErrorKind::Transport);
            assert_eq!(error.description(), "WebSocket closed with code 1011");
            assert_closed_once(&state).await;
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn normal_close() {
        let state = agent_state(AgentBehavior::Close(1000));

        check_function_with_mock(state.clone(), |endpoint| async move {
            let response = client(&endpoint)
                .agent(INSTANCE)
                .send_command("wifi", "connect", None)
                .await
                .unwrap();

            assert_eq!(response, Value::Null);
            assert_closed_once(&state).await;
        })
        .await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn response_timeout() {
        let state = agent_state(AgentBehavior::Silent);

        check_function_with_mock(state.clone(), |endpoint| async move {
            let error = client(&endpoint)
                .agent(INSTANCE)
                .timeout(Duration::from_millis(200))
                .send_command("wifi", "connect", None)
                .await
                .unwrap_err();

            assert_eq!(error.kind(), ErrorKind::Timeout);
            assert_closed_once(&state).await;
        })
        .await;
    }
}
