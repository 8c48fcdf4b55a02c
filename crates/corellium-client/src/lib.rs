//! `corellium-client` is a client of the device-virtualization REST API,
//! of the agents running inside virtual devices, and of the assessment
//! service.
//!
//! A [`Client`] is built from a [`Config`] and owns one HTTP transport.
//! From it, immutable per-resource handles are obtained, each one holding
//! its own clone of the transport:
//!
//! - [`Instances`] and [`Images`] manage virtual devices and uploaded
//!   files.
//! - [`Agent`] sends a command to the agent of a device over a WebSocket
//!   connection opened for that command alone. The command carries a
//!   random correlation identifier, and only the frame carrying the same
//!   identifier settles the exchange. Frames carrying any other
//!   identifier are ignored.
//! - [`Matrix`] manages the assessments of the applications running in a
//!   device, and runs an assessment from creation to completion through
//!   a sequential workflow.
//!
//! Long-running operations are awaited by polling their status at a fixed
//! interval. Polling stops as soon as a failure status shows up, and can be
//! bounded by a number of attempts, a deadline, or a cancellation token.
//!
//! Every failure is reported through a single [`Error`] type whose
//! [`ErrorKind`] tells apart transport failures, malformed data, errors
//! returned by the remote side, missing preconditions, failed workflows,
//! and expired or cancelled waits.
//!
//! [`Agent`]: crate::agent::Agent
//! [`Client`]: crate::client::Client
//! [`Config`]: crate::config::Config
//! [`Error`]: crate::error::Error
//! [`ErrorKind`]: crate::error::ErrorKind
//! [`Images`]: crate::images::Images
//! [`Instances`]: crate::instances::Instances
//! [`Matrix`]: crate::matrix::Matrix

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Commands sent to device agents.
pub mod agent;
/// Extraction of error messages from failed responses.
pub mod api_error;
/// The client and its per-resource handles.
pub mod client;
/// Client configuration.
pub mod config;
/// Error management.
pub mod error;
/// Uploaded images.
pub mod images;
/// Virtual device instances.
pub mod instances;
/// Assessments.
pub mod matrix;
/// Status polling.
pub mod poller;
/// The HTTP transport.
pub mod transport;
/// The assessment workflow.
pub mod workflow;

pub use agent::send_command;
pub use poller::wait_until;

#[cfg(test)]
pub(crate) mod tests {
    use std::future::Future;

    use corellium_mock::server::Server;
    use corellium_mock::state::MockState;

    use crate::client::Client;
    use crate::config::Config;

    pub(crate) fn client(endpoint: &str) -> Client {
        Client::new(Config::new().endpoint(endpoint)).unwrap()
    }

    pub(crate) async fn check_function_with_mock<F, Fut>(state: MockState, function: F)
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = ()>,
    {
        // Several tests might install a subscriber concurrently.
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let server = Server::new(state).spawn().await.unwrap();

        function(server.endpoint()).await;

        server.shutdown().await;
    }
}
