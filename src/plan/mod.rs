//! Turning an ordered keyframe sequence into an executable workflow plan.
//!
//! The planning itself is delegated to a [`service::CognitiveService`]; this
//! module validates what comes back and compiles it to input events.

pub mod executor;
pub mod service;
pub mod step;

use thiserror::Error;

pub use executor::{execute_plan, DryRunDriver, Screen};
pub use service::{analyze_workflow, ReplayService};

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("no keyframe could be uploaded")]
    NoArtifacts,
    #[error("planning request failed")]
    Service(#[from] service::ServiceError),
    #[error("reply is not a JSON list of steps")]
    Malformed(#[from] serde_json::Error),
    #[error("step {step_id}: unknown action {action:?}")]
    UnknownAction { step_id: u32, action: String },
    #[error("step {step_id}: missing {field}")]
    MissingField { step_id: u32, field: &'static str },
    #[error("step {step_id}: coordinates ({x}, {y}) are outside the screen")]
    CoordinatesOutOfRange { step_id: u32, x: f64, y: f64 },
}
