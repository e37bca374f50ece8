//! Core domain logic for the ReDIB access-call portal.
//! This crate is the single source of truth for business invariants.

pub mod clock;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, PortalConfig};
pub use db::{open_db, open_db_in_memory, DbError};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::application::{Application, ApplicationId, NodeResolution, RequestedAccess};
pub use model::status::{ApplicationStatus, NodeDecision, Resolution, TransitionError};
pub use repo::{RepoError, RepoResult};
pub use service::error::{ValidationError, WorkflowError, WorkflowResult};
pub use service::node_resolution_service::{
    AggregationDetails, AggregationOutcome, NodeDecisionRequest, NodeResolutionService,
};
pub use service::notify::{EmailNotifier, NoopNotifier, Notifier};
pub use service::resolution_service::ResolutionService;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
