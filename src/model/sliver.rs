//! Sliver descriptor — the per-resource description carried in a
//! `ResourceSet` (spec §3/GLOSSARY). The property-graph library that
//! backs ARM/BQM nodes is out of scope per spec §1; a `Sliver` here is
//! the flat, already-extracted view the kernel actually reasons about
//! (node id, interfaces, services, labels), produced by the `GraphPlugin`
//! trait (`plugins::GraphPlugin::node_sliver`).

use serde::{Deserialize, Serialize};

use crate::model::properties::Label;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliverKind {
    Node,
    NetworkService,
    Component,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Sliver {
    pub graph_node_id: Option<String>,
    pub interfaces: Vec<String>,
    pub services: Vec<String>,
    pub labels: Vec<Label>,
}

impl Sliver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_graph_node(graph_node_id: impl Into<String>) -> Self {
        Sliver { graph_node_id: Some(graph_node_id.into()), ..Default::default() }
    }

    pub fn add_label(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.labels.push(Label { key: key.into(), value: value.into() });
    }
}

/// Result of diffing two service slivers — what the graph library's
/// `diff` operation produces per spec §6.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SliverDiff {
    pub added_interfaces: Vec<String>,
    pub removed_interfaces: Vec<String>,
    pub added_services: Vec<String>,
    pub removed_services: Vec<String>,
    pub modified_services: Vec<String>,
}

impl Sliver {
    /// Diffs `self` (the prior sliver) against `incoming`.
    pub fn diff(&self, incoming: &Sliver) -> SliverDiff {
        let mut diff = SliverDiff::default();

        for iface in &incoming.interfaces {
            if !self.interfaces.contains(iface) {
                diff.added_interfaces.push(iface.clone());
            }
        }
        for iface in &self.interfaces {
            if !incoming.interfaces.contains(iface) {
                diff.removed_interfaces.push(iface.clone());
            }
        }
        for svc in &incoming.services {
            if !self.services.contains(svc) {
                diff.added_services.push(svc.clone());
            }
        }
        for svc in &self.services {
            if !incoming.services.contains(svc) {
                diff.removed_services.push(svc.clone());
            }
        }
        diff
    }
}
