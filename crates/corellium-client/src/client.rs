use crate::agent::Agent;
use crate::config::Config;
use crate::error::Result;
use crate::images::Images;
use crate::instances::Instances;
use crate::matrix::Matrix;
use crate::transport::{Transport, join_path};

/// A client of the device-virtualization API.
///
/// A [`Client`] owns one configured [`Transport`] and hands out immutable
/// handles, each one holding its own clone of the transport.
#[derive(Debug, Clone)]
pub struct Client {
    transport: Transport,
    api_root: String,
    matrix_root: String,
}

impl Client {
    /// Creates a [`Client`] from a [`Config`].
    ///
    /// # Errors
    ///
    /// Fails when the configuration is not valid.
    pub fn new(config: Config) -> Result<Self> {
        let transport = Transport::new(&config)?;
        Ok(Self {
            transport,
            api_root: join_path(&config.api_root, "v1"),
            matrix_root: config.matrix_root.into_owned(),
        })
    }

    /// Returns the underlying [`Transport`].
    #[must_use]
    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Returns the [`Instances`] handle.
    #[must_use]
    pub fn instances(&self) -> Instances {
        Instances::new(self.transport.clone(), &self.api_root)
    }

    /// Returns the [`Images`] handle.
    #[must_use]
    pub fn images(&self) -> Images {
        Images::new(self.transport.clone(), &self.api_root)
    }

    /// Returns the [`Agent`] handle of the given instance.
    #[must_use]
    pub fn agent(&self, instance_id: impl Into<String>) -> Agent {
        Agent::new(self.transport.clone(), &self.api_root, instance_id.into())
    }

    /// Returns the [`Matrix`] handle managing the assessments of the given
    /// instance.
    #[must_use]
    pub fn matrix(&self, instance_id: impl Into<String>) -> Matrix {
        Matrix::new(
            self.transport.clone(),
            self.instances(),
            self.images(),
            &self.matrix_root,
            instance_id.into(),
        )
    }
}
