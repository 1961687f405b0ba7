//! The canonical aggregated consensus view and its merge contract.
//!
//! [`ConsensusAggregator`] is the single, continuously-overwritten
//! merge target for all incoming telemetry. The ingest task is its
//! only writer; the broadcaster and actuator read it. No history is
//! retained -- [`view`] always reflects the most recent apply.
//!
//! The one non-trivial rule lives here: topology links are merged by
//! `(from, to)` key with replace-on-conflict, and an update carrying
//! an empty link list never erases previously aggregated links
//! ("empty" means "not provided" for this field only).
//!
//! [`view`]: ConsensusAggregator::view

use std::collections::BTreeMap;

use crossroad_types::{ConsensusMetrics, ConsensusPhase, ConsensusUpdate, ConsensusView, Link};
use tracing::debug;

/// Owner of the canonical consensus state.
///
/// Initialized to an idle/empty default at process start; fields are
/// mutated in place as telemetry arrives and are never reset except by
/// messages that explicitly carry idle values.
#[derive(Debug, Clone, Default)]
pub struct ConsensusAggregator {
    phase: ConsensusPhase,
    proposal_dir: String,
    nodes: Vec<String>,
    metrics: ConsensusMetrics,
    /// Keyed storage enforces the at-most-one-link-per-pair invariant
    /// by construction.
    links: BTreeMap<(String, String), f64>,
}

impl ConsensusAggregator {
    /// Create an aggregator in the idle/empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    pub const fn phase(&self) -> ConsensusPhase {
        self.phase
    }

    /// Current proposal direction (`""` when none).
    pub fn proposal_dir(&self) -> &str {
        &self.proposal_dir
    }

    /// Overwrite every field provided by a partial update, except
    /// links. Link merging happens only through [`merge_links`]; a
    /// `links` field on this path is ignored by contract.
    ///
    /// [`merge_links`]: ConsensusAggregator::merge_links
    pub fn apply_update(&mut self, update: &ConsensusUpdate) {
        if let Some(phase) = update.phase {
            self.phase = phase;
        }
        if let Some(ref dir) = update.proposal_dir {
            self.proposal_dir.clone_from(dir);
        }
        if let Some(ref nodes) = update.nodes {
            self.nodes.clone_from(nodes);
        }
        if let Some(metrics) = update.metrics {
            self.metrics = metrics;
        }
        debug!(
            phase = ?self.phase,
            proposal_dir = %self.proposal_dir,
            nodes = self.nodes.len(),
            "Applied consensus update"
        );
    }

    /// Merge a topology link list into the aggregated set by
    /// `(from, to)` key, replacing on conflict.
    ///
    /// An empty list is treated as "not provided" and leaves the set
    /// untouched. Returns the number of links merged.
    pub fn merge_links(&mut self, links: &[Link]) -> usize {
        if links.is_empty() {
            debug!("Ignoring empty topology link list");
            return 0;
        }
        for link in links {
            self.links.insert(link.key(), link.strength);
        }
        debug!(
            merged = links.len(),
            total = self.links.len(),
            "Merged topology links"
        );
        links.len()
    }

    /// A snapshot of the current aggregated view, with links
    /// materialized in key order for the wire.
    pub fn view(&self) -> ConsensusView {
        ConsensusView {
            phase: self.phase,
            proposal_dir: self.proposal_dir.clone(),
            nodes: self.nodes.clone(),
            links: self
                .links
                .iter()
                .map(|((from, to), &strength)| Link {
                    from: from.clone(),
                    to: to.clone(),
                    strength,
                })
                .collect(),
            metrics: self.metrics,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crossroad_types::TelemetryMessage;

    use super::*;

    fn link(from: &str, to: &str, strength: f64) -> Link {
        Link {
            from: from.to_owned(),
            to: to.to_owned(),
            strength,
        }
    }

    #[test]
    fn starts_idle_and_empty() {
        let agg = ConsensusAggregator::new();
        let view = agg.view();
        assert_eq!(view.phase, ConsensusPhase::Idle);
        assert_eq!(view.proposal_dir, "");
        assert!(view.nodes.is_empty());
        assert!(view.links.is_empty());
    }

    #[test]
    fn later_link_replaces_earlier_for_same_pair() {
        let mut agg = ConsensusAggregator::new();
        agg.merge_links(&[link("A", "B", 0.2)]);
        agg.merge_links(&[link("A", "B", 0.9)]);

        let view = agg.view();
        assert_eq!(view.links.len(), 1);
        assert_eq!(view.links[0].from, "A");
        assert_eq!(view.links[0].to, "B");
        assert!((view.links[0].strength - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn link_set_never_contains_duplicate_keys() {
        let mut agg = ConsensusAggregator::new();
        agg.merge_links(&[link("v0", "v1", 0.5), link("v0", "v2", 0.4)]);
        agg.merge_links(&[link("v0", "v1", 0.7), link("v1", "v0", 0.3)]);

        let view = agg.view();
        // (v0,v1) replaced, (v1,v0) is a distinct directed key.
        assert_eq!(view.links.len(), 3);
        let keys: Vec<(&str, &str)> = view
            .links
            .iter()
            .map(|l| (l.from.as_str(), l.to.as_str()))
            .collect();
        assert_eq!(keys, vec![("v0", "v1"), ("v0", "v2"), ("v1", "v0")]);
    }

    #[test]
    fn empty_link_list_does_not_erase_aggregated_links() {
        let mut agg = ConsensusAggregator::new();
        agg.merge_links(&[link("A", "B", 0.8)]);
        let merged = agg.merge_links(&[]);
        assert_eq!(merged, 0);
        assert_eq!(agg.view().links.len(), 1);
    }

    #[test]
    fn partial_update_overwrites_only_provided_fields() {
        let mut agg = ConsensusAggregator::new();
        agg.apply_update(&ConsensusUpdate {
            phase: Some(ConsensusPhase::Prepare),
            proposal_dir: Some(String::from("E")),
            nodes: Some(vec![String::from("v0")]),
            metrics: None,
            links: None,
        });
        agg.apply_update(&ConsensusUpdate {
            phase: Some(ConsensusPhase::Commit),
            ..ConsensusUpdate::default()
        });

        let view = agg.view();
        assert_eq!(view.phase, ConsensusPhase::Commit);
        // Untouched by the second update.
        assert_eq!(view.proposal_dir, "E");
        assert_eq!(view.nodes, vec![String::from("v0")]);
    }

    #[test]
    fn links_on_the_generic_update_path_are_ignored() {
        let mut agg = ConsensusAggregator::new();
        agg.merge_links(&[link("A", "B", 0.8)]);

        // A generic consensus update carrying links must not touch the
        // link set; only the dedicated topology path merges them.
        agg.apply_update(&ConsensusUpdate {
            phase: Some(ConsensusPhase::Commit),
            links: Some(vec![link("C", "D", 0.1)]),
            ..ConsensusUpdate::default()
        });

        let view = agg.view();
        assert_eq!(view.links.len(), 1);
        assert_eq!(view.links[0].from, "A");
    }

    #[test]
    fn wire_messages_drive_the_expected_mutations() {
        let mut agg = ConsensusAggregator::new();

        let topo = TelemetryMessage::parse(
            br#"{"type": "topology_update", "consensus": {"links": [
                {"from": "v0", "to": "v1", "strength": 0.8}]}}"#,
        )
        .unwrap();
        if let TelemetryMessage::TopologyUpdate(update) = topo {
            agg.merge_links(update.links.as_deref().unwrap_or_default());
        }

        let generic = TelemetryMessage::parse(
            br#"{"consensus": {"phase": "commit", "proposal_dir": "N",
                 "nodes": ["v0", "v1"],
                 "metrics": {"decision_latency_ms": 40,
                             "topology_stability_score": 0.9,
                             "throughput_gain_pct": 12.5}}}"#,
        )
        .unwrap();
        if let TelemetryMessage::Consensus(update) = generic {
            agg.apply_update(&update);
        }

        let view = agg.view();
        assert_eq!(view.phase, ConsensusPhase::Commit);
        assert_eq!(view.proposal_dir, "N");
        assert_eq!(view.nodes.len(), 2);
        assert_eq!(view.links.len(), 1);
        assert_eq!(view.metrics.decision_latency_ms, 40);
    }
}
