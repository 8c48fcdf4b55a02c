use corellium::instance::{Input, Instance};

use tracing::info;

use crate::error::Result;
use crate::transport::{Transport, join_path};

/// Virtual device instances.
#[derive(Debug, Clone)]
pub struct Instances {
    transport: Transport,
    root: String,
}

impl Instances {
    pub(crate) fn new(transport: Transport, api_root: &str) -> Self {
        Self {
            transport,
            root: join_path(api_root, "instances"),
        }
    }

    fn path(&self, id: &str) -> String {
        join_path(&self.root, id)
    }

    fn action(&self, id: &str, action: &str) -> String {
        join_path(&self.path(id), action)
    }

    /// Retrieves an [`Instance`].
    ///
    /// # Errors
    ///
    /// Fails when the instance does not exist or cannot be retrieved.
    pub async fn get(&self, id: &str) -> Result<Instance> {
        self.transport.get(&self.path(id)).await
    }

    /// Lists all instances.
    ///
    /// # Errors
    ///
    /// Fails when the list cannot be retrieved.
    pub async fn list(&self) -> Result<Vec<Instance>> {
        self.transport.get(&self.root).await
    }

    /// Lists the instances with the given name.
    ///
    /// # Errors
    ///
    /// Fails when the list cannot be retrieved.
    pub async fn search(&self, name: &str) -> Result<Vec<Instance>> {
        self.transport.get_query(&self.root, &[("name", name)]).await
    }

    /// Powers an instance on.
    ///
    /// # Errors
    ///
    /// Fails when the request is refused.
    pub async fn start(&self, id: &str) -> Result<()> {
        info!("Starting instance {id}");
        self.transport.post_empty(&self.action(id, "start")).await
    }

    /// Powers an instance off.
    ///
    /// # Errors
    ///
    /// Fails when the request is refused.
    pub async fn stop(&self, id: &str) -> Result<()> {
        info!("Stopping instance {id}");
        self.transport.post_empty(&self.action(id, "stop")).await
    }

    /// Reboots an instance.
    ///
    /// # Errors
    ///
    /// Fails when the request is refused.
    pub async fn reboot(&self, id: &str) -> Result<()> {
        info!("Rebooting instance {id}");
        self.transport.post_empty(&self.action(id, "reboot")).await
    }

    /// Delivers an [`Input`] sequence to an instance.
    ///
    /// # Errors
    ///
    /// Fails when the input is refused, for example because the instance is
    /// not powered on.
    pub async fn input(&self, id: &str, input: &Input) -> Result<()> {
        self.transport.post(&self.action(id, "input"), input).await
    }
}
