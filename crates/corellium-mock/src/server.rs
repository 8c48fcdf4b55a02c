use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};

use axum::Router;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use tracing::{error, info};

use crate::error::{Error, ErrorKind, Result};
use crate::state::MockState;
use crate::{API_ROOT, MATRIX_ROOT, agent, images, instances, matrix};

// Default HTTP address.
//
// Only the local machine is considered.
const DEFAULT_HTTP_ADDRESS: Ipv4Addr = Ipv4Addr::LOCALHOST;

// Default port.
//
// Zero asks the operating system for a free port.
const DEFAULT_SERVER_PORT: u16 = 0;

fn router(state: MockState) -> Router {
    let api = Router::new()
        .merge(instances::router())
        .merge(images::router())
        .merge(agent::router());

    Router::new()
        .nest(API_ROOT, api)
        .nest(MATRIX_ROOT, matrix::router())
        .with_state(state)
}

async fn bind(http_address: Ipv4Addr, port: u16) -> Result<TcpListener> {
    let listener_bind = format!("{http_address}:{port}");
    TcpListener::bind(&listener_bind)
        .await
        .map_err(|e| Error::new(ErrorKind::Bind, format!("{listener_bind}: {e}")))
}

/// A mock server.
#[derive(Debug)]
pub struct Server {
    // HTTP address.
    http_address: Ipv4Addr,
    // Server port.
    port: u16,
    // Mock state.
    state: MockState,
}

impl Server {
    /// Creates a [`Server`] from the given [`MockState`].
    #[must_use]
    pub const fn new(state: MockState) -> Self {
        Self {
            http_address: DEFAULT_HTTP_ADDRESS,
            port: DEFAULT_SERVER_PORT,
            state,
        }
    }

    /// Sets the server `IPv4` address.
    #[must_use]
    pub const fn address(mut self, http_address: Ipv4Addr) -> Self {
        self.http_address = http_address;
        self
    }

    /// Sets the server port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Runs the server until the given signal completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or to serve.
    pub async fn run_with_graceful_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = bind(self.http_address, self.port).await?;
        serve(listener, self.state, signal).await
    }

    /// Binds the server and runs it in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind.
    pub async fn spawn(self) -> Result<RunningServer> {
        let listener = bind(self.http_address, self.port).await?;
        let address = listener
            .local_addr()
            .map_err(|e| Error::new(ErrorKind::Bind, e.to_string()))?;

        let (shutdown, signal) = oneshot::channel::<()>();
        let handle = tokio::spawn(serve(listener, self.state, async move {
            // A dropped sender also stops the server.
            let _ = signal.await;
        }));

        Ok(RunningServer {
            address,
            shutdown,
            handle,
        })
    }
}

async fn serve<F>(listener: TcpListener, state: MockState, signal: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(address) = listener.local_addr() {
        info!("Mock reachable at this HTTP address: {address}");
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| Error::new(ErrorKind::Serve, e.to_string()))
}

/// A [`Server`] running in the background.
#[derive(Debug)]
pub struct RunningServer {
    address: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl RunningServer {
    /// Returns the address the server is bound to.
    #[must_use]
    pub const fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns the endpoint clients must be configured with.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("http://{}/", self.address)
    }

    /// Stops the server and waits for it to terminate.
    pub async fn shutdown(self) {
        // The receiver is gone only if the server already stopped.
        let _ = self.shutdown.send(());

        match self.handle.await {
            Ok(Ok(())) => info!("Mock stopped"),
            Ok(Err(e)) => error!("Mock failed: {e}"),
            Err(e) => error!("Failed to await the mock task: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use corellium::instance::{Instance, InstanceState};

    use serde_json::{Value, json};

    use crate::state::{AgentBehavior, MockApi};

    use super::Server;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn serve_instances() {
        let state = MockApi::new()
            .instance(
                Instance::new("instance-1", InstanceState::On).agent_info("agent-1"),
                AgentBehavior::Echo,
            )
            .build();

        let server = Server::new(state.clone()).spawn().await.unwrap();
        let endpoint = server.endpoint();

        let instance: Value = reqwest::get(format!("{endpoint}api/v1/instances/instance-1"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(
            instance,
            json!({"id": "instance-1", "state": "on", "agent": {"info": "agent-1"}})
        );

        let response = reqwest::get(format!("{endpoint}api/v1/instances/unknown"))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        assert_eq!(
            response.json::<Value>().await.unwrap(),
            json!({"error": "No instance with id unknown"})
        );

        assert_eq!(
            state.calls().await,
            vec!["GET /instances/instance-1", "GET /instances/unknown"]
        );

        server.shutdown().await;
    }
}
