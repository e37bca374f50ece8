//! Workflow services for the access-call portal.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Own every multi-row write and its `BEGIN IMMEDIATE` transaction.
//! - Queue outbound emails; delivery stays outside the core.

pub mod acceptance_service;
pub mod aggregation;
pub mod call_service;
pub mod error;
pub mod evaluation_service;
pub mod feasibility_service;
pub mod node_resolution_service;
pub mod notify;
pub mod outbox;
pub mod periodic;
pub mod publication_service;
pub mod resolution_service;
pub mod submission_service;
