//! Typed request and response bodies of the deployment manager
//!
//! Every response is decoded into a struct; a missing required field or an
//! unknown status value is a decode error rather than a silent default.
//! Additional keys the service adds over time are ignored.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Remote-owned deployment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentStatus {
    Draft,
    Starting,
    Running,
    Stopping,
    Stopped,
    Archived,
    Error,
    InsufficientFunds,
}

impl DeploymentStatus {
    /// Statuses that end a polling loop
    pub fn is_stable(&self) -> bool {
        matches!(
            self,
            Self::Running | Self::Stopped | Self::Archived | Self::Error | Self::InsufficientFunds
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Starting => "STARTING",
            Self::Running => "RUNNING",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
            Self::Archived => "ARCHIVED",
            Self::Error => "ERROR",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeploymentStrategy {
    #[default]
    #[serde(rename = "SIMPLE")]
    Simple,
    #[serde(rename = "SIMPLE-EXTEND")]
    SimpleExtend,
    #[serde(rename = "SCHEDULED")]
    Scheduled,
    #[serde(rename = "INFINITE")]
    Infinite,
}

impl std::str::FromStr for DeploymentStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SIMPLE" => Ok(Self::Simple),
            "SIMPLE-EXTEND" | "SIMPLE_EXTEND" => Ok(Self::SimpleExtend),
            "SCHEDULED" => Ok(Self::Scheduled),
            "INFINITE" => Ok(Self::Infinite),
            other => Err(format!("unknown deployment strategy '{}'", other)),
        }
    }
}

/// Entry of a deployment's event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub category: String,
    #[serde(rename = "deploymentId", default)]
    pub deployment_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub tx: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl DeploymentEvent {
    pub fn new(category: impl Into<String>, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            deployment_id: None,
            kind: kind.into(),
            message: message.into(),
            tx: None,
            created_at: None,
        }
    }
}

/// Deployment record as returned by create / get
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub status: DeploymentStatus,
    pub market: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub vault: String,
    pub replicas: u32,
    pub timeout: u64,
    pub strategy: DeploymentStrategy,
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default)]
    pub events: Vec<DeploymentEvent>,
}

impl Deployment {
    /// Event messages joined for error reports
    pub fn event_log(&self) -> String {
        render_events(&self.events)
    }
}

pub fn render_events(events: &[DeploymentEvent]) -> String {
    events
        .iter()
        .map(|e| format!("[{}/{}] {}", e.category, e.kind, e.message))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `POST /deployment/create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentCreateBody {
    pub name: String,
    pub market: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipfs_definition_hash: Option<String>,
    pub replicas: u32,
    pub timeout: u64,
    pub strategy: DeploymentStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

/// Response of start / stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStatusResponse {
    pub status: DeploymentStatus,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct ReplicaCountBody {
    pub replicas: u32,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct TimeoutBody {
    pub timeout: u64,
}
