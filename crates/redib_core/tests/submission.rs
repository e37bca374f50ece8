mod common;

use common::{draft, equipment, node, portal, reload, two_nodes, user, NOW};
use redib_core::clock::DAY_MS;
use redib_core::model::call::{Call, CallStatus};
use redib_core::model::communication::{EmailKind, NotificationPreference};
use redib_core::repo::communication_repo::SqliteCommunicationRepository;
use redib_core::service::call_service::CallService;
use redib_core::service::feasibility_service::FeasibilityService;
use redib_core::service::submission_service::SubmissionService;
use redib_core::{Application, ApplicationStatus, ValidationError};

#[test]
fn publish_opens_call_and_respects_opt_out() {
    let conn = portal();
    let alice = user(&conn, "alice@uni.es");
    let bob = user(&conn, "bob@uni.es");
    let mut prefs = NotificationPreference::all_enabled(bob.id);
    prefs.notify_call_published = false;
    SqliteCommunicationRepository::new(&conn)
        .save_preferences(&prefs)
        .unwrap();
    let service = CallService::new(&conn);
    let call = Call::new("COA-2026-01", "Spring call", NOW, NOW + 30 * DAY_MS);
    service.create_call(&call).unwrap();

    let queued = service.publish(call.id, NOW).unwrap();

    assert_eq!(queued, 1);
    let stored = service.get_call_by_code("COA-2026-01").unwrap().unwrap();
    assert_eq!(stored.status, CallStatus::Open);
    assert_eq!(stored.published_at, Some(NOW));
    let mails = SqliteCommunicationRepository::new(&conn)
        .for_kind(EmailKind::CallPublished)
        .unwrap();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].recipient_email, alice.email);

    let err = service.publish(call.id, NOW).unwrap_err();
    assert!(matches!(
        err.validation(),
        Some(ValidationError::UnexpectedCallStatus {
            expected: CallStatus::Draft,
            actual: CallStatus::Open,
            ..
        })
    ));
    assert_eq!(service.close(call.id).unwrap().status, CallStatus::Closed);
}

#[test]
fn allocations_reject_negative_hours() {
    let conn = portal();
    let f = two_nodes(&conn);
    let service = CallService::new(&conn);

    let err = service
        .set_allocation(f.call.id, f.scanner_a.id, -1.0)
        .unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::InvalidHours(_))));

    service.set_allocation(f.call.id, f.scanner_a.id, 40.0).unwrap();
    assert_eq!(service.total_hours_offered(f.call.id).unwrap(), 140.0);
}

#[test]
fn drafts_get_sequential_codes_per_call() {
    let conn = portal();
    let f = two_nodes(&conn);
    let service = SubmissionService::new(&conn);

    let first = service
        .create_draft(Application::draft(f.call.id, f.applicant.id, "First"))
        .unwrap();
    let second = service
        .create_draft(Application::draft(f.call.id, f.applicant.id, "Second"))
        .unwrap();

    assert_eq!(first.code, "COA-2025-01-001");
    assert_eq!(second.code, "COA-2025-01-002");
    assert_eq!(reload(&conn, second.id).code, second.code);
}

#[test]
fn drafts_need_an_open_call() {
    let conn = portal();
    let applicant = user(&conn, "researcher@uni.es");
    let call = Call::new("COA-2026-02", "Draft call", NOW, NOW + DAY_MS);
    CallService::new(&conn).create_call(&call).unwrap();

    let err = SubmissionService::new(&conn)
        .create_draft(Application::draft(call.id, applicant.id, "Too early"))
        .unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::CallNotOpen { .. })));
}

#[test]
fn submit_opens_one_feasibility_review_per_node() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = draft(&conn, &f.call, &f.applicant, &[(&f.scanner_a, 10.0), (&f.scanner_b, 6.0)]);
    let service = SubmissionService::new(&conn);
    assert_eq!(service.total_hours_requested(app.id).unwrap(), 16.0);

    let submitted = service.submit(app.id, f.applicant.id, NOW).unwrap();

    assert_eq!(submitted.status, ApplicationStatus::UnderFeasibilityReview);
    assert_eq!(submitted.submitted_at, Some(NOW));
    let reviews = FeasibilityService::new(&conn).reviews_for(app.id).unwrap();
    assert_eq!(reviews.len(), 2);
    assert!(reviews.iter().all(|review| review.is_feasible.is_none()));

    let comms = SqliteCommunicationRepository::new(&conn);
    assert_eq!(comms.for_kind(EmailKind::ApplicationReceived).unwrap().len(), 1);
    let requests = comms.for_kind(EmailKind::FeasibilityRequest).unwrap();
    let mut recipients: Vec<&str> = requests.iter().map(|mail| mail.recipient_email.as_str()).collect();
    recipients.sort_unstable();
    assert_eq!(recipients, vec!["coord.a@redib.net", "coord.b@redib.net"]);
}

#[test]
fn submit_checks_ownership_window_and_ethics() {
    let conn = portal();
    let f = two_nodes(&conn);
    let stranger = user(&conn, "stranger@uni.es");
    let service = SubmissionService::new(&conn);

    let app = draft(&conn, &f.call, &f.applicant, &[(&f.scanner_a, 10.0)]);
    let err = service.submit(app.id, stranger.id, NOW).unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::NotApplicant { .. })));

    let err = service
        .submit(app.id, f.applicant.id, NOW + 21 * DAY_MS)
        .unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::SubmissionClosed { .. })));

    let mut animal = draft(&conn, &f.call, &f.applicant, &[(&f.scanner_a, 10.0)]);
    animal.uses_animals = true;
    redib_core::repo::application_repo::SqliteApplicationRepository::new(&conn)
        .update_application(&animal)
        .unwrap();
    let err = service.submit(animal.id, f.applicant.id, NOW).unwrap_err();
    assert_eq!(
        err.validation(),
        Some(&ValidationError::IncompleteApplication("animal ethics approval missing"))
    );

    let empty = draft(&conn, &f.call, &f.applicant, &[]);
    let err = service.submit(empty.id, f.applicant.id, NOW).unwrap_err();
    assert_eq!(
        err.validation(),
        Some(&ValidationError::IncompleteApplication("no equipment requested"))
    );
    assert_eq!(reload(&conn, empty.id).status, ApplicationStatus::Draft);
}

#[test]
fn requested_access_is_editable_only_in_draft() {
    let conn = portal();
    let f = two_nodes(&conn);
    let service = SubmissionService::new(&conn);
    let app = draft(&conn, &f.call, &f.applicant, &[(&f.scanner_a, 10.0)]);

    service.add_requested_access(app.id, f.scanner_b.id, 4.0).unwrap();
    service.remove_requested_access(app.id, f.scanner_a.id).unwrap();
    assert_eq!(service.total_hours_requested(app.id).unwrap(), 4.0);

    service.submit(app.id, f.applicant.id, NOW).unwrap();
    let err = service
        .add_requested_access(app.id, f.scanner_a.id, 2.0)
        .unwrap_err();
    assert!(matches!(
        err.validation(),
        Some(ValidationError::UnexpectedStatus {
            expected: ApplicationStatus::Draft,
            ..
        })
    ));
}

#[test]
fn all_feasible_moves_to_pending_evaluation() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = draft(&conn, &f.call, &f.applicant, &[(&f.scanner_a, 10.0), (&f.scanner_b, 6.0)]);
    SubmissionService::new(&conn).submit(app.id, f.applicant.id, NOW).unwrap();
    let service = FeasibilityService::new(&conn);

    let first = service
        .record_feasibility(app.id, f.node_a.id, f.coordinator_a.id, true, "ok", NOW)
        .unwrap();
    assert_eq!(first.concluded, None);
    assert_eq!(reload(&conn, app.id).status, ApplicationStatus::UnderFeasibilityReview);

    let last = service
        .record_feasibility(app.id, f.node_b.id, f.coordinator_b.id, true, "", NOW)
        .unwrap();
    assert_eq!(last.concluded, Some(ApplicationStatus::PendingEvaluation));
    assert_eq!(last.review.reviewer_id, Some(f.coordinator_b.id));
    assert_eq!(reload(&conn, app.id).status, ApplicationStatus::PendingEvaluation);
}

#[test]
fn one_infeasible_node_rejects_after_all_reviews() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = draft(&conn, &f.call, &f.applicant, &[(&f.scanner_a, 10.0), (&f.scanner_b, 6.0)]);
    SubmissionService::new(&conn).submit(app.id, f.applicant.id, NOW).unwrap();
    let service = FeasibilityService::new(&conn);

    service
        .record_feasibility(app.id, f.node_a.id, f.coordinator_a.id, false, "Coil broken", NOW)
        .unwrap();
    let last = service
        .record_feasibility(app.id, f.node_b.id, f.coordinator_b.id, true, "", NOW)
        .unwrap();

    assert_eq!(last.concluded, Some(ApplicationStatus::RejectedFeasibility));
    assert_eq!(reload(&conn, app.id).status, ApplicationStatus::RejectedFeasibility);
    let mails = SqliteCommunicationRepository::new(&conn)
        .for_kind(EmailKind::FeasibilityRejected)
        .unwrap();
    assert_eq!(mails.len(), 1);
    assert_eq!(mails[0].recipient_email, f.applicant.email);
}

#[test]
fn feasibility_guards() {
    let conn = portal();
    let f = two_nodes(&conn);
    let other = node(&conn, "NODE-C");
    equipment(&conn, &other, "Cyclotron");
    let coordinator_c = common::node_coordinator(&conn, &other, "coord.c@redib.net");
    let app = draft(&conn, &f.call, &f.applicant, &[(&f.scanner_a, 10.0)]);
    let service = FeasibilityService::new(&conn);

    let err = service
        .record_feasibility(app.id, f.node_a.id, f.coordinator_a.id, true, "", NOW)
        .unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::UnexpectedStatus { .. })));

    SubmissionService::new(&conn).submit(app.id, f.applicant.id, NOW).unwrap();
    let err = service
        .record_feasibility(app.id, f.node_a.id, f.coordinator_b.id, true, "", NOW)
        .unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::WrongNodeCoordinator { .. })));

    let err = service
        .record_feasibility(app.id, other.id, coordinator_c.id, true, "", NOW)
        .unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::NodeNotInvolved { .. })));
}

#[test]
fn feasibility_reminders_wait_for_the_interval() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = draft(&conn, &f.call, &f.applicant, &[(&f.scanner_a, 10.0)]);
    SubmissionService::new(&conn)
        .submit(app.id, f.applicant.id, NOW - 8 * DAY_MS)
        .unwrap();
    let service = FeasibilityService::new(&conn);

    assert_eq!(service.send_feasibility_reminders(NOW - 2 * DAY_MS, 7, 7).unwrap(), 0);
    assert_eq!(service.send_feasibility_reminders(NOW, 7, 7).unwrap(), 1);
    assert_eq!(service.send_feasibility_reminders(NOW + DAY_MS, 7, 7).unwrap(), 0);
    assert_eq!(service.send_feasibility_reminders(NOW + 8 * DAY_MS, 7, 7).unwrap(), 1);

    service
        .record_feasibility(app.id, f.node_a.id, f.coordinator_a.id, true, "", NOW + 9 * DAY_MS)
        .unwrap();
    assert_eq!(service.send_feasibility_reminders(NOW + 20 * DAY_MS, 7, 7).unwrap(), 0);
}
