//! Typed config structs per known consumer, with an opaque passthrough
//! only for genuinely user-defined keys (design note §9).
//!
//! Grounded on `fabric_cf/actor/core/util/resource_data.py`: a
//! `ResourceData` in the original is three loosely-typed dictionaries
//! (request/resource/configuration properties). Known fields pulled out
//! of spec §3's ResourceSet ("quantity and label accounting") get real
//! Rust types here; the rest stays an opaque string map.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A resource type tag, e.g. `"VM"`, `"NIC"`, `"Switch"` (spec §3/§4.2).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceType(pub String);

impl ResourceType {
    pub fn new(tag: impl Into<String>) -> Self {
        ResourceType(tag.into())
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A label applied to a concrete sliver (e.g. a PCI/BDF address string),
/// per §4.6's "annotates the returned sliver with PCI/BDF-level labels".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    pub value: String,
}

/// One of the three property bags a `ResourceSet` carries (request,
/// resource, configuration per spec §3). Known keys are promoted to
/// fields; anything else passes through opaquely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyBag {
    pub units: Option<u64>,
    pub labels: Vec<Label>,
    opaque: HashMap<String, String>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.opaque.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.opaque.get(key).map(String::as_str)
    }

    pub fn merge_from(&mut self, incoming: &PropertyBag) {
        if incoming.units.is_some() {
            self.units = incoming.units;
        }
        for label in &incoming.labels {
            if !self.labels.contains(label) {
                self.labels.push(label.clone());
            }
        }
        for (k, v) in &incoming.opaque {
            self.opaque.insert(k.clone(), v.clone());
        }
    }
}
