//! Property-graph library (spec §6): build/serialize/merge/validate a
//! property graph; extract a node sliver by graph node id; diff two
//! service slivers yielding added/removed/modified {interfaces,
//! services}. The real graph library (neo4j-backed ARM/BQM) is out of
//! scope per spec §1 — `StubGraphPlugin` produces the flat `Sliver`
//! view directly from a registered node table instead of walking a
//! graph, and `diff` defers to `Sliver::diff` so there is one diff
//! shape in the crate, not two.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::sliver::SliverDiff;
use crate::model::Sliver;

pub trait GraphPlugin: Send + Sync {
    /// Registers a node's flat sliver view under a graph node id (a
    /// stand-in for "build a property graph" since the real graph
    /// library is out of scope).
    fn register_node(&self, graph_node_id: &str, sliver: Sliver);

    fn node_sliver(&self, graph_node_id: &str) -> Result<Sliver>;

    fn diff(&self, before: &Sliver, after: &Sliver) -> SliverDiff;
}

#[derive(Default)]
pub struct StubGraphPlugin {
    nodes: RwLock<HashMap<String, Sliver>>,
}

impl StubGraphPlugin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphPlugin for StubGraphPlugin {
    fn register_node(&self, graph_node_id: &str, sliver: Sliver) {
        self.nodes.write().expect("graph plugin lock poisoned").insert(graph_node_id.to_string(), sliver);
    }

    fn node_sliver(&self, graph_node_id: &str) -> Result<Sliver> {
        self.nodes
            .read()
            .expect("graph plugin lock poisoned")
            .get(graph_node_id)
            .cloned()
            .ok_or_else(|| Error::NotSupported(format!("unknown graph node {}", graph_node_id)))
    }

    fn diff(&self, before: &Sliver, after: &Sliver) -> SliverDiff {
        before.diff(after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_lookup_round_trips_the_sliver() {
        let plugin = StubGraphPlugin::new();
        plugin.register_node("node-1", Sliver::with_graph_node("node-1"));
        let sliver = plugin.node_sliver("node-1").unwrap();
        assert_eq!(sliver.graph_node_id.as_deref(), Some("node-1"));
        assert!(plugin.node_sliver("node-2").is_err());
    }

    #[test]
    fn diff_reports_added_and_removed_interfaces() {
        let plugin = StubGraphPlugin::new();
        let mut before = Sliver::new();
        before.interfaces.push("eth0".into());
        let mut after = Sliver::new();
        after.interfaces.push("eth1".into());

        let diff = plugin.diff(&before, &after);
        assert_eq!(diff.added_interfaces, vec!["eth1".to_string()]);
        assert_eq!(diff.removed_interfaces, vec!["eth0".to_string()]);
    }
}
