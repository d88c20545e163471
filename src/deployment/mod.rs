//! Deployment manager client and lifecycle drivers
//!
//! - `api` / `client`: the HTTP seam and its reqwest implementation
//! - `retry`: bounded start with confirmation-timeout recovery
//! - `tracker`: status polling until a stable status
//! - `diagnostics`: event-log classification shared by both drivers

pub mod api;
pub mod client;
pub mod diagnostics;
pub mod errors;
pub mod retry;
pub mod tracker;
pub mod types;

pub use api::{DeploymentApi, DeploymentResult};
pub use client::{ClientSettings, DeploymentClient};
pub use diagnostics::{Diagnosis, DiagnosticMatcher};
pub use errors::DeploymentError;
pub use retry::{RestartPolicy, StartController, StartReport};
pub use tracker::{DeploymentTracker, TrackReport, TrackerPolicy};
pub use types::{
    Deployment, DeploymentCreateBody, DeploymentEvent, DeploymentStatus, DeploymentStatusResponse,
    DeploymentStrategy,
};
