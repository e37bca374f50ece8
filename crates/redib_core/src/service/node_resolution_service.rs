//! Distributed multi-node resolution.
//!
//! # Responsibility
//! - Record one node coordinator's decision on an evaluated application.
//! - Aggregate node decisions into the application resolution exactly once.
//! - Provide per-node work queues and summaries.
//!
//! # Invariants
//! - Every write runs inside one `BEGIN IMMEDIATE` transaction, which takes the
//!   database write lock before the application row is read. Concurrent
//!   coordinators are serialized and the later one sees the earlier decision.
//! - Reject is refused for competitive-funding applications before any write.
//! - Node decisions are frozen once the application resolution is set.
//! - Notification runs after commit and never undoes the aggregation.

use crate::clock::days;
use crate::db;
use crate::model::application::{
    Application, ApplicationId, NodeResolution, ACCEPTANCE_WINDOW_DAYS,
};
use crate::model::call::CallId;
use crate::model::directory::{EquipmentId, NodeId, UserId};
use crate::model::status::{ApplicationStatus, NodeDecision, Resolution};
use crate::repo::application_repo::{RequestedAccessDetail, SqliteApplicationRepository};
use crate::repo::directory_repo::SqliteDirectoryRepository;
use crate::service::aggregation::{self, Tally};
use crate::service::error::{ValidationError, WorkflowResult};
use crate::service::notify::{EmailNotifier, Notifier};
use log::{info, warn};
use rusqlite::Connection;
use uuid::Uuid;

/// One coordinator decision as submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDecisionRequest {
    pub application_id: ApplicationId,
    pub node_id: NodeId,
    pub coordinator_id: UserId,
    pub decision: NodeDecision,
    pub comments: String,
    /// Hours this node approves per requested equipment.
    pub approved_hours: Vec<(EquipmentId, f64)>,
}

impl NodeDecisionRequest {
    pub fn new(
        application_id: ApplicationId,
        node_id: NodeId,
        coordinator_id: UserId,
        decision: NodeDecision,
    ) -> Self {
        Self {
            application_id,
            node_id,
            coordinator_id,
            decision,
            comments: String::new(),
            approved_hours: Vec::new(),
        }
    }

    pub fn with_comments(mut self, comments: impl Into<String>) -> Self {
        self.comments = comments.into();
        self
    }

    pub fn with_hours(mut self, equipment_id: EquipmentId, hours: f64) -> Self {
        self.approved_hours.push((equipment_id, hours));
        self
    }
}

/// What the aggregated application looks like after a successful aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationDetails {
    pub resolution: Resolution,
    /// `(node_code, decision)` in node-code order.
    pub node_decisions: Vec<(String, NodeDecision)>,
    pub reason: String,
    pub total_nodes: usize,
    pub resolution_date: i64,
    pub acceptance_deadline: Option<i64>,
}

/// Result of one aggregation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationOutcome {
    /// Some involved node has not decided yet; nothing was written.
    Pending { decided: usize, total: usize },
    Aggregated(AggregationDetails),
    /// Resolution was already set; nothing was written.
    AlreadyResolved(Resolution),
}

impl AggregationOutcome {
    pub fn resolution(&self) -> Option<Resolution> {
        match self {
            Self::Pending { .. } => None,
            Self::Aggregated(details) => Some(details.resolution),
            Self::AlreadyResolved(resolution) => Some(*resolution),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeResolutionResult {
    pub node_resolution: NodeResolution,
    pub outcome: AggregationOutcome,
}

/// Counts for one node's dashboard within one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeResolutionSummary {
    pub total: usize,
    pub awaiting_decision: usize,
    pub resolved_by_this_node: usize,
    pub node_accepted: usize,
    pub node_waitlisted: usize,
    pub node_rejected: usize,
    /// Applications whose final resolution is already set.
    pub fully_resolved: usize,
}

pub struct NodeResolutionService<'conn, N: Notifier> {
    conn: &'conn Connection,
    notifier: N,
    acceptance_window_ms: i64,
}

impl<'conn> NodeResolutionService<'conn, EmailNotifier<'conn>> {
    /// Service that queues resolution emails on the same connection.
    pub fn with_email(conn: &'conn Connection) -> Self {
        Self::new(conn, EmailNotifier::new(conn))
    }
}

impl<'conn, N: Notifier> NodeResolutionService<'conn, N> {
    pub fn new(conn: &'conn Connection, notifier: N) -> Self {
        Self {
            conn,
            notifier,
            acceptance_window_ms: days(ACCEPTANCE_WINDOW_DAYS),
        }
    }

    pub fn with_acceptance_window_days(mut self, window_days: u32) -> Self {
        self.acceptance_window_ms = days(window_days);
        self
    }

    /// Records one node decision and aggregates when it was the last one.
    pub fn apply_node_resolution(
        &self,
        request: &NodeDecisionRequest,
        now_ms: i64,
    ) -> WorkflowResult<NodeResolutionResult> {
        let tx = db::begin_immediate(self.conn)?;
        let directory = SqliteDirectoryRepository::new(&tx);
        let apps = SqliteApplicationRepository::new(&tx);

        let node = directory.require_node(request.node_id)?;
        if !directory.is_active_node_coordinator(request.coordinator_id, node.id)? {
            return Err(ValidationError::WrongNodeCoordinator {
                user_id: request.coordinator_id,
                node_code: node.code,
            }
            .into());
        }

        let application = apps.require_application(request.application_id)?;
        if request.decision == NodeDecision::Reject && application.has_competitive_funding {
            return Err(ValidationError::CompetitiveFundingProtected {
                application_code: application.code,
            }
            .into());
        }
        ensure_open_for_node_decisions(&application)?;

        let requested = apps.requested_access(application.id)?;
        if !requested.iter().any(|detail| detail.node_id == node.id) {
            return Err(ValidationError::NodeNotInvolved {
                node_code: node.code,
            }
            .into());
        }
        let mut approved = Vec::with_capacity(request.approved_hours.len());
        for (equipment_id, hours) in &request.approved_hours {
            if !hours.is_finite() || *hours < 0.0 {
                return Err(ValidationError::InvalidHours(*hours).into());
            }
            let detail = requested
                .iter()
                .find(|detail| detail.access.equipment_id == *equipment_id)
                .ok_or(ValidationError::EquipmentNotRequested(*equipment_id))?;
            if detail.node_id != node.id {
                return Err(ValidationError::EquipmentNotAtNode {
                    equipment_id: *equipment_id,
                    node_code: node.code.clone(),
                }
                .into());
            }
            let mut access = detail.access.clone();
            access.hours_approved = Some(*hours);
            approved.push(access);
        }

        let existing = apps.node_resolution_for(application.id, node.id)?;
        let node_resolution = NodeResolution {
            id: existing.map_or_else(Uuid::new_v4, |row| row.id),
            application_id: application.id,
            node_id: node.id,
            reviewer_id: request.coordinator_id,
            resolution: Some(request.decision),
            comments: request.comments.trim().to_string(),
            reviewed_at: Some(now_ms),
        };
        apps.upsert_node_resolution(&node_resolution)?;
        for access in &approved {
            apps.update_requested_access(access)?;
        }
        info!(
            "event=node_resolution_recorded module=node_resolution status=ok application={} node={} decision={}",
            application.code,
            node.code,
            request.decision
        );

        let outcome = self.aggregate_in_tx(&tx, application.id, now_ms)?;
        tx.commit()?;
        self.notify_if_aggregated(application.id, &outcome);

        Ok(NodeResolutionResult {
            node_resolution,
            outcome,
        })
    }

    /// Re-checks the decided set and aggregates if it is complete.
    ///
    /// Safe to call repeatedly; a resolved application is never rewritten.
    pub fn aggregate_application_resolution(
        &self,
        application_id: ApplicationId,
        now_ms: i64,
    ) -> WorkflowResult<AggregationOutcome> {
        let tx = db::begin_immediate(self.conn)?;
        let outcome = self.aggregate_in_tx(&tx, application_id, now_ms)?;
        tx.commit()?;
        self.notify_if_aggregated(application_id, &outcome);
        Ok(outcome)
    }

    fn aggregate_in_tx(
        &self,
        conn: &Connection,
        application_id: ApplicationId,
        now_ms: i64,
    ) -> WorkflowResult<AggregationOutcome> {
        let apps = SqliteApplicationRepository::new(conn);
        let mut application = apps.require_application(application_id)?;
        if let Some(resolution) = application.resolution {
            return Ok(AggregationOutcome::AlreadyResolved(resolution));
        }

        let involved = apps.involved_nodes(application.id)?;
        let involved_ids: Vec<NodeId> = involved.iter().map(|node| node.node_id).collect();
        let resolutions = apps.node_resolutions(application.id)?;

        let resolution = match aggregation::tally(&involved_ids, &resolutions) {
            Tally::Incomplete { decided, total } => {
                info!(
                    "event=resolution_pending_nodes module=node_resolution status=skipped application={} decided={decided} total={total}",
                    application.code
                );
                return Ok(AggregationOutcome::Pending { decided, total });
            }
            Tally::Complete(resolution) => resolution,
        };

        // Involved nodes are in code order; keep decisions and comments aligned.
        let decided = aggregation::decided_for(&involved_ids, &resolutions);
        let mut node_decisions = Vec::with_capacity(involved.len());
        let mut comments = Vec::with_capacity(involved.len());
        for node in &involved {
            if let Some((row, decision)) = decided.iter().find(|(row, _)| row.node_id == node.node_id) {
                node_decisions.push((node.code.clone(), *decision));
                comments.push((node.code.as_str(), row.comments.as_str()));
            }
        }
        let decisions: Vec<NodeDecision> = node_decisions.iter().map(|(_, decision)| *decision).collect();

        application.resolution = Some(resolution);
        application.resolution_date = Some(now_ms);
        application.resolution_comments = aggregation::join_node_comments(comments);
        application.status = resolution.status();
        application.acceptance_deadline = match resolution {
            Resolution::Accepted => Some(now_ms + self.acceptance_window_ms),
            Resolution::Pending | Resolution::Rejected => None,
        };
        apps.update_application(&application)?;

        let details = AggregationDetails {
            resolution,
            reason: aggregation::aggregation_reason(&decisions),
            node_decisions,
            total_nodes: involved.len(),
            resolution_date: now_ms,
            acceptance_deadline: application.acceptance_deadline,
        };
        info!(
            "event=resolution_aggregated module=node_resolution status=ok application={} resolution={} nodes={}",
            application.code, resolution, details.total_nodes
        );
        Ok(AggregationOutcome::Aggregated(details))
    }

    fn notify_if_aggregated(&self, application_id: ApplicationId, outcome: &AggregationOutcome) {
        if !matches!(outcome, AggregationOutcome::Aggregated(_)) {
            return;
        }
        if let Err(err) = self.notifier.notify_resolution(application_id) {
            warn!(
                "event=notification_failed module=node_resolution status=error application_id={application_id} error={err}"
            );
        }
    }

    /// Evaluated applications still waiting for this node, best score first.
    pub fn applications_awaiting_node(
        &self,
        node_id: NodeId,
        call_id: Option<CallId>,
    ) -> WorkflowResult<Vec<Application>> {
        Ok(SqliteApplicationRepository::new(self.conn).awaiting_node(node_id, call_id)?)
    }

    pub fn resolved_by_node(
        &self,
        node_id: NodeId,
        call_id: Option<CallId>,
    ) -> WorkflowResult<Vec<Application>> {
        Ok(SqliteApplicationRepository::new(self.conn).resolved_by_node(node_id, call_id)?)
    }

    pub fn node_resolution_for(
        &self,
        application_id: ApplicationId,
        node_id: NodeId,
    ) -> WorkflowResult<Option<NodeResolution>> {
        Ok(SqliteApplicationRepository::new(self.conn).node_resolution_for(application_id, node_id)?)
    }

    /// Requested equipment of one application owned by `node_id`.
    pub fn equipment_for_node(
        &self,
        application_id: ApplicationId,
        node_id: NodeId,
    ) -> WorkflowResult<Vec<RequestedAccessDetail>> {
        Ok(SqliteApplicationRepository::new(self.conn)
            .requested_access_for_node(application_id, node_id)?)
    }

    pub fn node_resolution_summary(
        &self,
        node_id: NodeId,
        call_id: CallId,
    ) -> WorkflowResult<NodeResolutionSummary> {
        let apps = SqliteApplicationRepository::new(self.conn);
        let mut summary = NodeResolutionSummary::default();
        for application in apps.requesting_node(node_id, call_id)? {
            summary.total += 1;
            if application.resolution.is_some() {
                summary.fully_resolved += 1;
            }
            let decision = apps
                .node_resolution_for(application.id, node_id)?
                .and_then(|row| row.resolution);
            match decision {
                Some(decision) => {
                    summary.resolved_by_this_node += 1;
                    match decision {
                        NodeDecision::Accept => summary.node_accepted += 1,
                        NodeDecision::Waitlist => summary.node_waitlisted += 1,
                        NodeDecision::Reject => summary.node_rejected += 1,
                    }
                }
                None if application.status == ApplicationStatus::Evaluated => {
                    summary.awaiting_decision += 1;
                }
                None => {}
            }
        }
        Ok(summary)
    }
}

fn ensure_open_for_node_decisions(application: &Application) -> Result<(), ValidationError> {
    if let Some(resolution) = application.resolution {
        return Err(ValidationError::ApplicationAlreadyResolved {
            application_code: application.code.clone(),
            resolution,
        });
    }
    if application.status != ApplicationStatus::Evaluated {
        return Err(ValidationError::UnexpectedStatus {
            application_code: application.code.clone(),
            expected: ApplicationStatus::Evaluated,
            actual: application.status,
        });
    }
    Ok(())
}
