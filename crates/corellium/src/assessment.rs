use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Assessment status.
///
/// An assessment moves through these values in order. Transitions are
/// performed by the service in response to client requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssessmentStatus {
    /// Created, waiting for monitoring to start.
    New,
    /// Monitoring is starting.
    StartingMonitoring,
    /// The application is being monitored.
    Monitoring,
    /// Monitoring is stopping.
    StoppingMonitoring,
    /// Monitoring is over, checks can run.
    ReadyForTesting,
    /// Checks are running.
    Testing,
    /// The report is being generated.
    GeneratingReport,
    /// The assessment completed.
    Complete,
    /// The assessment failed.
    Failed,
    /// Any status this crate does not know about, or no status at all.
    #[default]
    #[serde(other)]
    Unknown,
}

impl AssessmentStatus {
    const fn description(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::StartingMonitoring => "startingMonitoring",
            Self::Monitoring => "monitoring",
            Self::StoppingMonitoring => "stoppingMonitoring",
            Self::ReadyForTesting => "readyForTesting",
            Self::Testing => "testing",
            Self::GeneratingReport => "generatingReport",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    /// Checks whether no further transition can happen.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for AssessmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.description().fmt(f)
    }
}

/// An assessment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    /// Assessment identifier.
    ///
    /// It might be missing from a creation response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Assessment status.
    ///
    /// It might be missing from a creation response.
    #[serde(default)]
    pub status: AssessmentStatus,
    /// Bundle identifier of the assessed application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    /// Instance running the application.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    /// Keywords wordlist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wordlist_id: Option<String>,
    /// All the other fields returned by the API.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Assessment {
    /// Creates an [`Assessment`] with the given identifier and status.
    #[must_use]
    pub fn new(id: impl Into<String>, status: AssessmentStatus) -> Self {
        Self {
            id: Some(id.into()),
            status,
            bundle_id: None,
            instance_id: None,
            wordlist_id: None,
            extra: Map::new(),
        }
    }
}

/// The body of an assessment creation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAssessment {
    /// Bundle identifier of the application to assess.
    pub bundle_id: String,
    /// Instance running the application.
    pub instance_id: String,
    /// Keywords wordlist.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wordlist_id: Option<String>,
}

/// Format of a downloaded assessment report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    /// A JSON report.
    #[default]
    Json,
    /// An HTML report.
    Html,
}

impl ReportFormat {
    /// Returns the name used on the wire.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Html => "html",
        }
    }
}
