mod common;

use common::{evaluated, two_nodes};
use redib_core::model::application::NodeResolution;
use redib_core::model::communication::EmailKind;
use redib_core::repo::application_repo::SqliteApplicationRepository;
use redib_core::repo::communication_repo::SqliteCommunicationRepository;
use redib_core::{
    open_db, AggregationOutcome, ApplicationStatus, NodeDecision, NodeDecisionRequest,
    NodeResolutionService, Resolution,
};
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use uuid::Uuid;

const NOW: i64 = common::NOW;

fn decide_concurrently(path: &Path, requests: Vec<NodeDecisionRequest>) -> Vec<AggregationOutcome> {
    let barrier = Arc::new(Barrier::new(requests.len()));
    let handles: Vec<_> = requests
        .into_iter()
        .map(|request| {
            let barrier = Arc::clone(&barrier);
            let path = path.to_path_buf();
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                barrier.wait();
                NodeResolutionService::with_email(&conn)
                    .apply_node_resolution(&request, NOW)
                    .unwrap()
                    .outcome
            })
        })
        .collect();
    handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect()
}

#[test]
fn simultaneous_last_decisions_aggregate_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("portal.db");
    let conn = open_db(&path).unwrap();
    let f = two_nodes(&conn);
    let app = evaluated(&conn, &f.call, &f.applicant, &[(&f.scanner_a, 10.0), (&f.scanner_b, 5.0)], false, 9.0);

    let outcomes = decide_concurrently(
        &path,
        vec![
            NodeDecisionRequest::new(app.id, f.node_a.id, f.coordinator_a.id, NodeDecision::Accept),
            NodeDecisionRequest::new(app.id, f.node_b.id, f.coordinator_b.id, NodeDecision::Reject),
        ],
    );

    let aggregated = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, AggregationOutcome::Aggregated(_)))
        .count();
    assert_eq!(aggregated, 1, "outcomes: {outcomes:?}");
    assert!(outcomes.contains(&AggregationOutcome::Pending {
        decided: 1,
        total: 2
    }));

    let stored = common::reload(&conn, app.id);
    assert_eq!(stored.status, ApplicationStatus::Rejected);
    assert_eq!(stored.resolution, Some(Resolution::Rejected));
    let emails = SqliteCommunicationRepository::new(&conn)
        .for_kind(EmailKind::ResolutionRejected)
        .unwrap();
    assert_eq!(emails.len(), 1);
}

#[test]
fn repeated_aggregation_from_many_connections_resolves_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("portal.db");
    let conn = open_db(&path).unwrap();
    let f = two_nodes(&conn);
    let app = evaluated(&conn, &f.call, &f.applicant, &[(&f.scanner_a, 10.0), (&f.scanner_b, 5.0)], false, 9.0);
    let repo = SqliteApplicationRepository::new(&conn);
    for (node_id, reviewer_id) in [(f.node_a.id, f.coordinator_a.id), (f.node_b.id, f.coordinator_b.id)] {
        repo.upsert_node_resolution(&NodeResolution {
            id: Uuid::new_v4(),
            application_id: app.id,
            node_id,
            reviewer_id,
            resolution: Some(NodeDecision::Accept),
            comments: String::new(),
            reviewed_at: Some(NOW),
        })
        .unwrap();
    }

    let workers = 4;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|offset| {
            let barrier = Arc::clone(&barrier);
            let path = path.clone();
            let application_id = app.id;
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                barrier.wait();
                NodeResolutionService::with_email(&conn)
                    .aggregate_application_resolution(application_id, NOW + offset as i64)
                    .unwrap()
            })
        })
        .collect();
    let outcomes: Vec<AggregationOutcome> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();

    let aggregated = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, AggregationOutcome::Aggregated(_)))
        .count();
    let already = outcomes
        .iter()
        .filter(|outcome| **outcome == AggregationOutcome::AlreadyResolved(Resolution::Accepted))
        .count();
    assert_eq!((aggregated, already), (1, workers - 1));

    let stored = common::reload(&conn, app.id);
    assert_eq!(stored.status, ApplicationStatus::Accepted);
    let emails = SqliteCommunicationRepository::new(&conn)
        .for_kind(EmailKind::ResolutionAccepted)
        .unwrap();
    assert_eq!(emails.len(), 1);
}
