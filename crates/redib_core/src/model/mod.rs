//! Domain model for the access-call portal.
//!
//! # Responsibility
//! - Define canonical records for nodes, calls, applications, evaluations,
//!   communications and publications.
//! - Own the application status machine and the decision enums it depends on.
//!
//! # Invariants
//! - Every record is identified by a stable UUID.
//! - Status and decision values are closed enums; storage strings are mapped
//!   at the repository boundary only.

pub mod application;
pub mod call;
pub mod communication;
pub mod directory;
pub mod evaluation;
pub mod publication;
pub mod status;
