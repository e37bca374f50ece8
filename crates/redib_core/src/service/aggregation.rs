//! Pure multi-node aggregation.
//!
//! # Invariants
//! - Priority is reject > waitlist > accept.
//! - Only decisions from involved nodes count toward completeness.
//! - Recomputed from persisted rows on every call; holds no state.

use crate::model::application::NodeResolution;
use crate::model::directory::NodeId;
use crate::model::status::{NodeDecision, Resolution};
use std::collections::HashMap;

/// Completeness of the per-node decisions of one application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    Incomplete { decided: usize, total: usize },
    Complete(Resolution),
}

/// Final resolution for a fully decided set; `None` for an empty set.
pub fn final_resolution(decisions: impl IntoIterator<Item = NodeDecision>) -> Option<Resolution> {
    let mut any = false;
    let mut waitlisted = false;
    for decision in decisions {
        any = true;
        match decision {
            NodeDecision::Reject => return Some(Resolution::Rejected),
            NodeDecision::Waitlist => waitlisted = true,
            NodeDecision::Accept => {}
        }
    }
    match (any, waitlisted) {
        (false, _) => None,
        (true, true) => Some(Resolution::Pending),
        (true, false) => Some(Resolution::Accepted),
    }
}

/// Decided entries of `resolutions` restricted to `involved` nodes.
pub fn decided_for<'a>(
    involved: &[NodeId],
    resolutions: &'a [NodeResolution],
) -> Vec<(&'a NodeResolution, NodeDecision)> {
    resolutions
        .iter()
        .filter(|resolution| involved.contains(&resolution.node_id))
        .filter_map(|resolution| resolution.resolution.map(|decision| (resolution, decision)))
        .collect()
}

/// Counts decided involved nodes and aggregates once every node decided.
///
/// An application with no involved node never completes.
pub fn tally(involved: &[NodeId], resolutions: &[NodeResolution]) -> Tally {
    let total = involved.len();
    let decided = decided_for(involved, resolutions);
    if total == 0 || decided.len() < total {
        return Tally::Incomplete {
            decided: decided.len(),
            total,
        };
    }
    match final_resolution(decided.iter().map(|(_, decision)| *decision)) {
        Some(resolution) => Tally::Complete(resolution),
        None => Tally::Incomplete { decided: 0, total },
    }
}

/// `[CODE]: comment` blocks, blank-line separated; blank comments skipped.
pub fn join_node_comments<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    entries
        .into_iter()
        .filter(|(_, comment)| !comment.trim().is_empty())
        .map(|(code, comment)| format!("[{code}]: {}", comment.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Human-readable reason for the chosen resolution.
pub fn aggregation_reason(decisions: &[NodeDecision]) -> String {
    let mut counts: HashMap<NodeDecision, usize> = HashMap::new();
    for decision in decisions {
        *counts.entry(*decision).or_default() += 1;
    }
    let rejects = counts.get(&NodeDecision::Reject).copied().unwrap_or(0);
    let waitlists = counts.get(&NodeDecision::Waitlist).copied().unwrap_or(0);
    if rejects > 0 {
        format!("at least one node rejected (rejections: {rejects})")
    } else if waitlists > 0 {
        format!("no rejections but at least one waitlist (waitlists: {waitlists})")
    } else {
        "all nodes accepted".to_string()
    }
}
