use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Power state of a virtual device instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// The instance is being created.
    Creating,
    /// The instance is booting.
    Booting,
    /// The instance is powered on.
    On,
    /// The instance is powered off.
    Off,
    /// The instance is rebooting.
    Rebooting,
    /// The instance is being paused.
    Pausing,
    /// The instance is paused.
    Paused,
    /// The instance is being deleted.
    Deleting,
    /// The instance failed.
    Error,
    /// Any state this crate does not know about.
    #[serde(other)]
    Unknown,
}

impl InstanceState {
    const fn description(self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Booting => "booting",
            Self::On => "on",
            Self::Off => "off",
            Self::Rebooting => "rebooting",
            Self::Pausing => "pausing",
            Self::Paused => "paused",
            Self::Deleting => "deleting",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// Agent connection data of an instance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Opaque path segment addressing the agent channel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
}

/// A virtual device instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    /// Instance identifier.
    pub id: String,
    /// Instance name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Power state.
    pub state: InstanceState,
    /// Project the instance belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Agent connection data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentInfo>,
    /// All the other fields returned by the API.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Instance {
    /// Creates an [`Instance`] in the given state.
    #[must_use]
    pub fn new(id: impl Into<String>, state: InstanceState) -> Self {
        Self {
            id: id.into(),
            name: None,
            state,
            project: None,
            agent: None,
            extra: Map::new(),
        }
    }

    /// Sets the instance name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the instance project.
    #[must_use]
    pub fn project(mut self, project: impl Into<String>) -> Self {
        self.project = Some(project.into());
        self
    }

    /// Sets the agent information.
    #[must_use]
    pub fn agent_info(mut self, info: impl Into<String>) -> Self {
        self.agent = Some(AgentInfo {
            info: Some(info.into()),
        });
        self
    }

    /// Returns the agent information, if the agent is reachable.
    ///
    /// Empty strings are treated as missing.
    #[must_use]
    pub fn agent_address(&self) -> Option<&str> {
        self.agent
            .as_ref()
            .and_then(|agent| agent.info.as_deref())
            .filter(|info| !info.is_empty())
    }

    /// Checks whether the instance is powered on.
    #[must_use]
    pub fn is_on(&self) -> bool {
        self.state == InstanceState::On
    }
}

/// Input delivered to an instance, such as touches or button presses.
///
/// The payload is forwarded as-is to the input endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Input(pub Value);

impl Input {
    /// Creates an [`Input`] from a raw JSON value.
    #[must_use]
    pub const fn new(value: Value) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::{deserialize, serialize};

    use super::{Instance, InstanceState};

    #[test]
    fn instance_with_agent() {
        let instance: Instance = deserialize(json!({
            "id": "abc-123",
            "name": "iphone",
            "state": "on",
            "project": "p-1",
            "agent": {"info": "agent-xyz"},
            "flavor": "iphone6",
        }));

        assert!(instance.is_on());
        assert_eq!(instance.agent_address(), Some("agent-xyz"));
        assert_eq!(instance.extra.get("flavor"), Some(&json!("iphone6")));
        assert_eq!(
            instance,
            Instance::new("abc-123", InstanceState::On)
                .name("iphone")
                .project("p-1")
                .agent_info("agent-xyz")
                .extra_field("flavor", json!("iphone6"))
        );
    }

    #[test]
    fn instance_without_agent() {
        let instance: Instance = deserialize(json!({"id": "a", "state": "on"}));
        assert_eq!(instance.agent_address(), None);

        let instance: Instance = deserialize(json!({"id": "a", "state": "on", "agent": {}}));
        assert_eq!(instance.agent_address(), None);

        let instance: Instance =
            deserialize(json!({"id": "a", "state": "on", "agent": {"info": ""}}));
        assert_eq!(instance.agent_address(), None);
    }

    #[test]
    fn unknown_state() {
        let instance: Instance = deserialize(json!({"id": "a", "state": "hibernating"}));
        assert_eq!(instance.state, InstanceState::Unknown);
        assert!(!instance.is_on());
    }

    #[test]
    fn state_names() {
        for state in [
            InstanceState::Creating,
            InstanceState::Booting,
            InstanceState::On,
            InstanceState::Off,
            InstanceState::Rebooting,
            InstanceState::Pausing,
            InstanceState::Paused,
            InstanceState::Deleting,
            InstanceState::Error,
        ] {
            assert_eq!(serialize(state), json!(state.to_string()));
        }
    }

    impl Instance {
        fn extra_field(mut self, name: &str, value: serde_json::Value) -> Self {
            self.extra.insert(name.into(), value);
            self
        }
    }
}
