//! `corellium` is a library of the wire types exchanged between a client of
//! the device-virtualization API and the services it talks to.
//!
//! Two families of data are described here:
//!
//! - The messages carried by the duplex channel between a client and the
//!   agent running inside a virtual device. A client sends a [`Command`]
//!   composed of a subsystem, an operation, a correlation identifier, and a
//!   set of free-form parameters. The agent answers with a frame that,
//!   once decoded, becomes a [`CommandResponse`] carrying the same
//!   identifier along with either a payload or an error message.
//!
//! - The records returned by the REST API, such as virtual device
//!   instances, uploaded images, and assessments. Only the fields the
//!   client reasons about are typed; everything else is preserved as raw
//!   JSON so that no information returned by the API gets lost.
//!
//! This crate performs no I/O. Opening connections and issuing requests is
//! up to the client crate.
//!
//! [`Command`]: crate::command::Command
//! [`CommandResponse`]: crate::frame::CommandResponse

#![forbid(unsafe_code)]
#![deny(missing_docs)]

/// Assessment records and their lifecycle.
pub mod assessment;
/// Command envelopes sent to a device agent.
pub mod command;
/// Inbound agent frames and their decoding.
pub mod frame;
/// Image records and uploads.
pub mod image;
/// Virtual device instance records.
pub mod instance;

#[cfg(test)]
pub(crate) fn serialize<T: serde::Serialize>(value: T) -> serde_json::Value {
    serde_json::to_value(value).unwrap()
}

#[cfg(test)]
pub(crate) fn deserialize<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> T {
    serde_json::from_value(value).unwrap()
}
