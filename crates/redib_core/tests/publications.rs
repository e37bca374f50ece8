mod common;

use common::{evaluated, portal, two_nodes, user, with_role, TwoNodes, NOW};
use redib_core::clock::DAY_MS;
use redib_core::model::communication::EmailKind;
use redib_core::model::directory::Role;
use redib_core::model::publication::Publication;
use redib_core::repo::communication_repo::SqliteCommunicationRepository;
use redib_core::service::acceptance_service::{AcceptanceAnswer, AcceptanceService};
use redib_core::service::periodic;
use redib_core::service::publication_service::PublicationService;
use redib_core::{Application, PortalConfig, Resolution, ResolutionService, ValidationError};
use rusqlite::Connection;

/// Accepted by the applicant with the hand-off sent at `NOW`.
fn handed_off(conn: &Connection, f: &TwoNodes) -> Application {
    let app = evaluated(conn, &f.call, &f.applicant, &[(&f.scanner_a, 20.0)], false, 9.0);
    ResolutionService::new(conn)
        .apply_resolution(app.id, Resolution::Accepted, "", NOW - DAY_MS)
        .unwrap();
    AcceptanceService::new(conn)
        .respond(app.id, f.applicant.id, AcceptanceAnswer::Accept, NOW)
        .unwrap()
}

#[test]
fn applicant_reports_publication_with_derived_year() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = handed_off(&conn, &f);
    let service = PublicationService::new(&conn);
    let mut publication = Publication::new(app.id, "Microglial PET in early psychosis", 0);
    publication.doi = " 10.1016/j.neuroimage.2025.120001 ".to_string();
    publication.publication_date = Some("2026-02-01".to_string());
    publication.acknowledged = true;

    let stored = service
        .submit_publication(f.applicant.id, publication, NOW + 90 * DAY_MS)
        .unwrap();

    assert_eq!(stored.doi, "10.1016/j.neuroimage.2025.120001");
    assert_eq!(stored.publication_year, Some(2026));
    assert_eq!(stored.reported_by, Some(f.applicant.id));
    assert_eq!(stored.reported_at, NOW + 90 * DAY_MS);
    assert!(!stored.verified);
    let listed = service.publications_for_user(f.applicant.id).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, stored.id);
}

#[test]
fn publication_input_is_validated() {
    let conn = portal();
    let f = two_nodes(&conn);
    let stranger = user(&conn, "stranger@uni.es");
    let app = handed_off(&conn, &f);
    let service = PublicationService::new(&conn);

    let err = service
        .submit_publication(stranger.id, Publication::new(app.id, "Not mine", 0), NOW)
        .unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::NotApplicant { .. })));

    let mut bad_doi = Publication::new(app.id, "Bad DOI", 0);
    bad_doi.doi = "doi:10.1000/x".to_string();
    let err = service.submit_publication(f.applicant.id, bad_doi, NOW).unwrap_err();
    assert_eq!(
        err.validation(),
        Some(&ValidationError::InvalidDoi("doi:10.1000/x".to_string()))
    );

    let mut bad_date = Publication::new(app.id, "Bad date", 0);
    bad_date.publication_date = Some("01/02/2026".to_string());
    let err = service.submit_publication(f.applicant.id, bad_date, NOW).unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::InvalidDate(_))));

    let unanswered = evaluated(&conn, &f.call, &f.applicant, &[(&f.scanner_b, 5.0)], false, 9.0);
    ResolutionService::new(&conn)
        .apply_resolution(unanswered.id, Resolution::Accepted, "", NOW)
        .unwrap();
    let err = service
        .submit_publication(f.applicant.id, Publication::new(unanswered.id, "Too soon", 0), NOW)
        .unwrap_err();
    assert!(matches!(err.validation(), Some(ValidationError::UnexpectedStatus { .. })));
}

#[test]
fn impossible_calendar_dates_are_rejected() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = handed_off(&conn, &f);
    let service = PublicationService::new(&conn);

    for date in ["2024-13-45", "2023-02-29"] {
        let mut publication = Publication::new(app.id, "Impossible date", 0);
        publication.publication_date = Some(date.to_string());
        let err = service
            .submit_publication(f.applicant.id, publication, NOW)
            .unwrap_err();
        assert_eq!(
            err.validation(),
            Some(&ValidationError::InvalidDate(date.to_string()))
        );
    }
    assert!(service.publications_for_user(f.applicant.id).unwrap().is_empty());

    let mut leap = Publication::new(app.id, "Leap day", 0);
    leap.publication_date = Some("2024-02-29".to_string());
    let stored = service.submit_publication(f.applicant.id, leap, NOW).unwrap();
    assert_eq!(stored.publication_year, Some(2024));
}

#[test]
fn only_coordinators_verify() {
    let conn = portal();
    let f = two_nodes(&conn);
    let coordinator = user(&conn, "coordinator@redib.net");
    with_role(&conn, &coordinator, Role::Coordinator, None);
    let app = handed_off(&conn, &f);
    let service = PublicationService::new(&conn);
    let stored = service
        .submit_publication(f.applicant.id, Publication::new(app.id, "Kinetic modelling", 0), NOW)
        .unwrap();

    let err = service
        .verify_publication(stored.id, f.coordinator_a.id, true)
        .unwrap_err();
    assert!(matches!(
        err.validation(),
        Some(ValidationError::MissingRole {
            role: Role::Coordinator,
            ..
        })
    ));

    let verified = service.verify_publication(stored.id, coordinator.id, true).unwrap();
    assert!(verified.verified);
}

#[test]
fn followup_is_sent_once_after_the_handoff_window() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = handed_off(&conn, &f);
    let service = PublicationService::new(&conn);

    assert_eq!(service.send_publication_followups(NOW + 100 * DAY_MS, 180, 7).unwrap(), 0);
    assert_eq!(service.send_publication_followups(NOW + 183 * DAY_MS, 180, 7).unwrap(), 1);
    assert_eq!(service.send_publication_followups(NOW + 184 * DAY_MS, 180, 7).unwrap(), 0);
    assert_eq!(service.send_publication_followups(NOW + 200 * DAY_MS, 180, 7).unwrap(), 0);

    let mails = SqliteCommunicationRepository::new(&conn)
        .for_application(app.id)
        .unwrap();
    let followups = mails
        .iter()
        .filter(|mail| mail.kind == EmailKind::PublicationFollowup)
        .count();
    assert_eq!(followups, 1);
}

#[test]
fn reported_publication_suppresses_followup() {
    let conn = portal();
    let f = two_nodes(&conn);
    let app = handed_off(&conn, &f);
    PublicationService::new(&conn)
        .submit_publication(f.applicant.id, Publication::new(app.id, "Early results", 0), NOW)
        .unwrap();

    let report = periodic::run_weekly(&conn, &PortalConfig::default(), NOW + 183 * DAY_MS).unwrap();
    assert_eq!(report.publication_followups, 0);
}

#[test]
fn weekly_sweep_queues_followups() {
    let conn = portal();
    let f = two_nodes(&conn);
    handed_off(&conn, &f);

    let report = periodic::run_weekly(&conn, &PortalConfig::default(), NOW + 183 * DAY_MS).unwrap();
    assert_eq!(report.publication_followups, 1);
}
