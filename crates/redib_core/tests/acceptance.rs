mod common;

use common::{evaluated, portal, reload, two_nodes, user, TwoNodes, NOW};
use redib_core::clock::DAY_MS;
use redib_core::model::communication::EmailKind;
use redib_core::repo::communication_repo::SqliteCommunicationRepository;
use redib_core::service::acceptance_service::{AcceptanceAnswer, AcceptanceService, DeadlineSweepReport};
use redib_core::service::periodic;
use redib_core::{Application, ApplicationStatus, PortalConfig, Resolution, ResolutionService, ValidationError};
use rusqlite::Connection;

/// Accepted at `NOW`; the answer is due `NOW + 10 days` (2025-10-19).
fn accepted(conn: &Connection, f: &TwoNodes) -> Application {
    let app = evaluated(conn, &f.call, &f.applicant, &[(&f.scanner_a, 20.0)], false, 9.0);
    ResolutionService::new(conn)
        .apply_resolution(app.id, Resolution::Accepted, "Welcome", NOW)
        .unwrap()
}

#[test]
fn accepting_sends_handoff_to_applicant_and_node() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = accepted(&conn, &f);
    let service = AcceptanceService::new(&conn);

    let answered = service
        .respond(app.id, f.applicant.id, AcceptanceAnswer::Accept, NOW + DAY_MS)
        .unwrap();

    assert_eq!(answered.status, ApplicationStatus::Accepted);
    assert_eq!(answered.accepted_by_applicant, Some(true));
    assert_eq!(answered.accepted_at, Some(NOW + DAY_MS));
    assert_eq!(answered.handoff_email_sent_at, Some(NOW + DAY_MS));
    let mut recipients: Vec<String> = SqliteCommunicationRepository::new(&conn)
        .for_kind(EmailKind::AccessHandoff)
        .unwrap()
        .into_iter()
        .map(|mail| mail.recipient_email)
        .collect();
    recipients.sort_unstable();
    assert_eq!(recipients, vec!["coord.a@redib.net", "researcher@uni.es"]);

    let err = service
        .respond(app.id, f.applicant.id, AcceptanceAnswer::Accept, NOW + DAY_MS)
        .unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::AlreadyResponded { .. })));
}

#[test]
fn declining_keeps_the_reason() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = accepted(&conn, &f);

    let declined = AcceptanceService::new(&conn)
        .respond(
            app.id,
            f.applicant.id,
            AcceptanceAnswer::Decline {
                reason: " Grant ended ".to_string(),
            },
            NOW + DAY_MS,
        )
        .unwrap();

    assert_eq!(declined.status, ApplicationStatus::DeclinedByApplicant);
    assert_eq!(declined.accepted_by_applicant, Some(false));
    assert_eq!(
        reload(&conn, app.id).resolution_comments,
        "Welcome\n\nDECLINED BY APPLICANT: Grant ended"
    );
}

#[test]
fn only_the_applicant_answers_before_the_deadline() {
    let conn = portal();
    let f = two_nodes(&conn);
    let stranger = user(&conn, "stranger@uni.es");
    let app = accepted(&conn, &f);
    let service = AcceptanceService::new(&conn);

    let err = service
        .respond(app.id, stranger.id, AcceptanceAnswer::Accept, NOW)
        .unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::NotApplicant { .. })));

    let err = service
        .respond(app.id, f.applicant.id, AcceptanceAnswer::Accept, NOW + 10 * DAY_MS + 1)
        .unwrap_err();
    assert!(matches!(
        err.validation(),
        Some(ValidationError::AcceptanceDeadlinePassed { .. })
    ));

    let waitlisted = evaluated(&conn, &f.call, &f.applicant, &[(&f.scanner_b, 5.0)], false, 7.0);
    ResolutionService::new(&conn)
        .apply_resolution(waitlisted.id, Resolution::Pending, "", NOW)
        .unwrap();
    let err = service
        .respond(waitlisted.id, f.applicant.id, AcceptanceAnswer::Accept, NOW)
        .unwrap_err();
    assert!(matches!(
        err.validation(),
        Some(ValidationError::UnexpectedStatus {
            actual: ApplicationStatus::Pending,
            ..
        })
    ));
}

#[test]
fn overdue_acceptance_expires() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = accepted(&conn, &f);

    let report = AcceptanceService::new(&conn)
        .process_acceptance_deadlines(NOW + 11 * DAY_MS, 3)
        .unwrap();

    assert_eq!(
        report,
        DeadlineSweepReport {
            reminders_sent: 0,
            expired: 1
        }
    );
    let expired = reload(&conn, app.id);
    assert_eq!(expired.status, ApplicationStatus::Expired);
    assert_eq!(expired.accepted_by_applicant, Some(false));
    assert_eq!(
        expired.resolution_comments,
        "Welcome\n\nAUTO-EXPIRED: no response by 2025-10-19"
    );
}

#[test]
fn expiry_rereads_the_application_before_writing() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = accepted(&conn, &f);
    let service = AcceptanceService::new(&conn);

    // Answered at the deadline, after a sweep listed it as awaiting.
    service
        .respond(app.id, f.applicant.id, AcceptanceAnswer::Accept, NOW + 10 * DAY_MS)
        .unwrap();
    assert!(!service.expire_if_overdue(app.id, NOW + 10 * DAY_MS + 1).unwrap());

    let kept = reload(&conn, app.id);
    assert_eq!(kept.status, ApplicationStatus::Accepted);
    assert_eq!(kept.accepted_by_applicant, Some(true));
    assert_eq!(kept.accepted_at, Some(NOW + 10 * DAY_MS));
    assert_eq!(kept.handoff_email_sent_at, Some(NOW + 10 * DAY_MS));
    assert_eq!(kept.resolution_comments, "Welcome");
}

#[test]
fn expiry_waits_for_the_deadline() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = accepted(&conn, &f);
    let service = AcceptanceService::new(&conn);

    assert!(!service.expire_if_overdue(app.id, NOW + 10 * DAY_MS).unwrap());
    assert_eq!(reload(&conn, app.id).status, ApplicationStatus::Accepted);

    assert!(service.expire_if_overdue(app.id, NOW + 10 * DAY_MS + 1).unwrap());
    assert_eq!(reload(&conn, app.id).status, ApplicationStatus::Expired);
    assert!(!service.expire_if_overdue(app.id, NOW + 11 * DAY_MS).unwrap());
}

#[test]
fn reminder_is_sent_once_near_the_deadline() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = accepted(&conn, &f);
    let service = AcceptanceService::new(&conn);

    let early = service.process_acceptance_deadlines(NOW + 2 * DAY_MS, 3).unwrap();
    assert_eq!(early, DeadlineSweepReport::default());

    let near = service.process_acceptance_deadlines(NOW + 8 * DAY_MS, 3).unwrap();
    assert_eq!(near.reminders_sent, 1);
    let again = service.process_acceptance_deadlines(NOW + 9 * DAY_MS, 3).unwrap();
    assert_eq!(again.reminders_sent, 0);

    let mails = SqliteCommunicationRepository::new(&conn)
        .for_kind(EmailKind::AcceptanceReminder)
        .unwrap();
    assert_eq!(mails.len(), 1);
    assert!(mails[0].subject.contains("2025-10-19"));
    assert_eq!(reload(&conn, app.id).status, ApplicationStatus::Accepted);
}

#[test]
fn answered_applications_are_left_alone() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = accepted(&conn, &f);
    let service = AcceptanceService::new(&conn);
    service
        .respond(app.id, f.applicant.id, AcceptanceAnswer::Accept, NOW)
        .unwrap();

    let report = service.process_acceptance_deadlines(NOW + 30 * DAY_MS, 3).unwrap();
    assert_eq!(report, DeadlineSweepReport::default());
    assert_eq!(reload(&conn, app.id).status, ApplicationStatus::Accepted);
}

#[test]
fn equipment_completion_by_node_coordinator() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = accepted(&conn, &f);
    let service = AcceptanceService::new(&conn);

    let err = service
        .mark_equipment_completed(app.id, f.scanner_a.id, f.coordinator_a.id, 18.0, NOW)
        .unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::UnexpectedStatus { .. })));

    service
        .respond(app.id, f.applicant.id, AcceptanceAnswer::Accept, NOW)
        .unwrap();
    let err = service
        .mark_equipment_completed(app.id, f.scanner_a.id, f.coordinator_b.id, 18.0, NOW)
        .unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::WrongNodeCoordinator { .. })));
    let err = service
        .mark_equipment_completed(app.id, f.scanner_b.id, f.coordinator_b.id, 1.0, NOW)
        .unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::EquipmentNotRequested(_))));

    let access = service
        .mark_equipment_completed(app.id, f.scanner_a.id, f.coordinator_a.id, 18.0, NOW + DAY_MS)
        .unwrap();
    assert!(access.is_completed);
    assert_eq!(access.completed_by, Some(f.coordinator_a.id));
    assert_eq!(access.actual_hours_used, Some(18.0));
}

#[test]
fn daily_sweep_runs_every_reminder() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = accepted(&conn, &f);
    let config = PortalConfig::default();

    let report = periodic::run_daily(&conn, &config, NOW + 11 * DAY_MS).unwrap();

    assert_eq!(report.acceptance.expired, 1);
    assert_eq!(report.feasibility_reminders, 0);
    assert_eq!(report.evaluation_reminders, 0);
    assert_eq!(reload(&conn, app.id).status, ApplicationStatus::Expired);

    let quiet = periodic::run_daily(&conn, &config, NOW + 12 * DAY_MS).unwrap();
    assert_eq!(quiet, periodic::DailyReport::default());
}
