//! Network directory: nodes, their equipment, users and role assignments.
//!
//! # Invariants
//! - Node codes are unique and used as human-facing labels in comments.
//! - A `node_coordinator` role is always bound to exactly one node.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type NodeId = Uuid;
pub type EquipmentId = Uuid;
pub type UserId = Uuid;

/// Equipment-hosting site acting as an independent decision authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub code: String,
    pub name: String,
    pub location: String,
    /// Text publications must carry when they used this node.
    pub acknowledgment_text: String,
    pub is_active: bool,
}

impl Node {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            code: code.into(),
            name: name.into(),
            location: String::new(),
            acknowledgment_text: String::new(),
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub id: EquipmentId,
    pub node_id: NodeId,
    /// e.g. `MRI 7T`, `PET-CT`.
    pub name: String,
    /// e.g. `mri`, `pet_ct`, `cyclotron`.
    pub category: String,
    pub is_active: bool,
}

impl Equipment {
    pub fn new(node_id: NodeId, name: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_id,
            name: name.into(),
            category: category.into(),
            is_active: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub full_name: String,
    /// Used for evaluator conflict-of-interest checks.
    pub organization: Option<String>,
}

impl User {
    pub fn new(email: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            full_name: full_name.into(),
            organization: None,
        }
    }

    /// Display name with email fallback.
    pub fn display_name(&self) -> &str {
        let trimmed = self.full_name.trim();
        if trimmed.is_empty() {
            self.email.as_str()
        } else {
            trimmed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Applicant,
    NodeCoordinator,
    Evaluator,
    /// Network-wide call coordinator.
    Coordinator,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Applicant => "applicant",
            Self::NodeCoordinator => "node_coordinator",
            Self::Evaluator => "evaluator",
            Self::Coordinator => "coordinator",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "applicant" => Some(Self::Applicant),
            "node_coordinator" => Some(Self::NodeCoordinator),
            "evaluator" => Some(Self::Evaluator),
            "coordinator" => Some(Self::Coordinator),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Role assignment; a user may hold several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRole {
    pub id: Uuid,
    pub user_id: UserId,
    pub role: Role,
    /// Set for node-bound roles (`node_coordinator`).
    pub node_id: Option<NodeId>,
    /// Evaluator specialization (`clinical`, `preclinical`, `radiotracers`).
    pub area: Option<String>,
    pub is_active: bool,
}

impl UserRole {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            role,
            node_id: None,
            area: None,
            is_active: true,
        }
    }

    pub fn node_coordinator(user_id: UserId, node_id: NodeId) -> Self {
        Self {
            node_id: Some(node_id),
            ..Self::new(user_id, Role::NodeCoordinator)
        }
    }
}
