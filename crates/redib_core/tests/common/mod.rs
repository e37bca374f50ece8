#![allow(dead_code)]

use redib_core::clock::DAY_MS;
use redib_core::db::open_db_in_memory;
use redib_core::model::call::{Call, CallStatus};
use redib_core::model::directory::{Equipment, Node, Role, User, UserRole};
use redib_core::repo::application_repo::SqliteApplicationRepository;
use redib_core::repo::call_repo::SqliteCallRepository;
use redib_core::repo::directory_repo::SqliteDirectoryRepository;
use redib_core::{Application, ApplicationStatus, RequestedAccess};
use rusqlite::Connection;
use uuid::Uuid;

/// 2025-10-09T08:53:20Z.
pub const NOW: i64 = 1_760_000_000_000;

pub fn portal() -> Connection {
    open_db_in_memory().unwrap()
}

pub fn node(conn: &Connection, code: &str) -> Node {
    let node = Node::new(code, format!("{code} imaging node"));
    SqliteDirectoryRepository::new(conn).create_node(&node).unwrap();
    node
}

pub fn equipment(conn: &Connection, node: &Node, name: &str) -> Equipment {
    let equipment = Equipment::new(node.id, name, "MRI");
    SqliteDirectoryRepository::new(conn)
        .create_equipment(&equipment)
        .unwrap();
    equipment
}

pub fn user(conn: &Connection, email: &str) -> User {
    let user = User::new(email, email.split('@').next().unwrap_or(email));
    SqliteDirectoryRepository::new(conn).create_user(&user).unwrap();
    user
}

pub fn user_in(conn: &Connection, email: &str, organization: &str) -> User {
    let mut user = User::new(email, email);
    user.organization = Some(organization.to_string());
    SqliteDirectoryRepository::new(conn).create_user(&user).unwrap();
    user
}

pub fn node_coordinator(conn: &Connection, node: &Node, email: &str) -> User {
    let user = user(conn, email);
    SqliteDirectoryRepository::new(conn)
        .assign_role(&UserRole::node_coordinator(user.id, node.id))
        .unwrap();
    user
}

pub fn with_role(conn: &Connection, user: &User, role: Role, area: Option<&str>) {
    let mut assignment = UserRole::new(user.id, role);
    assignment.area = area.map(str::to_string);
    SqliteDirectoryRepository::new(conn)
        .assign_role(&assignment)
        .unwrap();
}

/// Open call accepting submissions around `NOW`.
pub fn open_call(conn: &Connection, code: &str) -> Call {
    let mut call = Call::new(code, format!("Access call {code}"), NOW - 10 * DAY_MS, NOW + 20 * DAY_MS);
    call.status = CallStatus::Open;
    call.published_at = Some(NOW - 10 * DAY_MS);
    call.evaluation_deadline = NOW + 40 * DAY_MS;
    SqliteCallRepository::new(conn).create_call(&call).unwrap();
    call
}

pub fn offer(conn: &Connection, call: &Call, equipment: &Equipment, hours: f64) {
    SqliteCallRepository::new(conn)
        .set_allocation(&redib_core::model::call::CallEquipmentAllocation {
            call_id: call.id,
            equipment_id: equipment.id,
            hours_offered: hours,
        })
        .unwrap();
}

/// Draft with requested equipment and every submission checkbox ticked.
pub fn draft(conn: &Connection, call: &Call, applicant: &User, requests: &[(&Equipment, f64)]) -> Application {
    let repo = SqliteApplicationRepository::new(conn);
    let mut application = Application::draft(call.id, applicant.id, "Longitudinal PET-MRI cohort");
    application.project_title = "Neuroinflammation imaging".to_string();
    application.project_code = "PID2024-0001".to_string();
    application.funding_agency = "AEI".to_string();
    application.data_consent = true;
    application.code = repo.create_application(&application).unwrap();
    for (equipment, hours) in requests {
        repo.upsert_requested_access(&RequestedAccess::new(application.id, equipment.id, *hours))
            .unwrap();
    }
    application
}

/// Walks a draft through the status machine up to `evaluated`.
pub fn evaluated(
    conn: &Connection,
    call: &Call,
    applicant: &User,
    requests: &[(&Equipment, f64)],
    competitive: bool,
    score: f64,
) -> Application {
    let repo = SqliteApplicationRepository::new(conn);
    let mut application = draft(conn, call, applicant, requests);
    application.has_competitive_funding = competitive;
    application.submitted_at = Some(NOW - 30 * DAY_MS);
    for status in [
        ApplicationStatus::Submitted,
        ApplicationStatus::UnderFeasibilityReview,
        ApplicationStatus::PendingEvaluation,
        ApplicationStatus::UnderEvaluation,
        ApplicationStatus::Evaluated,
    ] {
        application.status = status;
        if status == ApplicationStatus::Evaluated {
            application.final_score = Some(score);
        }
        repo.update_application(&application).unwrap();
    }
    application
}

pub fn reload(conn: &Connection, id: Uuid) -> Application {
    SqliteApplicationRepository::new(conn)
        .require_application(id)
        .unwrap()
}

/// Two nodes with one scanner and one coordinator each.
pub struct TwoNodes {
    pub node_a: Node,
    pub node_b: Node,
    pub scanner_a: Equipment,
    pub scanner_b: Equipment,
    pub coordinator_a: User,
    pub coordinator_b: User,
    pub applicant: User,
    pub call: Call,
}

pub fn two_nodes(conn: &Connection) -> TwoNodes {
    let node_a = node(conn, "NODE-A");
    let node_b = node(conn, "NODE-B");
    let scanner_a = equipment(conn, &node_a, "3T MRI");
    let scanner_b = equipment(conn, &node_b, "PET-CT");
    let coordinator_a = node_coordinator(conn, &node_a, "coord.a@redib.net");
    let coordinator_b = node_coordinator(conn, &node_b, "coord.b@redib.net");
    let applicant = user(conn, "researcher@uni.es");
    let call = open_call(conn, "COA-2025-01");
    offer(conn, &call, &scanner_a, 100.0);
    offer(conn, &call, &scanner_b, 100.0);
    TwoNodes {
        node_a,
        node_b,
        scanner_a,
        scanner_b,
        coordinator_a,
        coordinator_b,
        applicant,
        call,
    }
}
