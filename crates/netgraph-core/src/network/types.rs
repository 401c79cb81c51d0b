//! Model-level network entities: nodes, links, and risk groups.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

/// Scalar attributes attached to nodes, links, and demands.
///
/// Keys are attribute names; values are JSON scalars (or small arrays, e.g.
/// tag lists). A `BTreeMap` keeps serialized output deterministic.
pub type AttrMap = BTreeMap<String, Value>;

/// A network node, identified by a unique name.
///
/// `disabled` is a scenario-level attribute of the base network; it is
/// distinct from per-view *exclusion* (see
/// [`NetworkView`](crate::network::NetworkView)).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Node {
    /// Unique node name.
    pub name: String,
    /// Whether the node is administratively disabled in the base network.
    #[serde(default)]
    pub disabled: bool,
    /// Arbitrary scalar attributes.
    #[serde(default)]
    pub attrs: AttrMap,
    /// Names of the risk groups this node belongs to.
    #[serde(default)]
    pub risk_groups: BTreeSet<String>,
}

impl Node {
    /// Creates an enabled node with no attributes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            disabled: false,
            attrs: AttrMap::new(),
            risk_groups: BTreeSet::new(),
        }
    }

    /// Sets an attribute, consuming and returning the node.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Adds the node to a risk group, consuming and returning the node.
    pub fn with_risk_group(mut self, group: impl Into<String>) -> Self {
        self.risk_groups.insert(group.into());
        self
    }

    /// Marks the node disabled, consuming and returning the node.
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

/// A link between two nodes.
///
/// Links are undirected at the model level. The graph kernel materializes
/// each link as a pair of directed edges sharing capacity and cost; the
/// reverse edge id is derived by [`Link::reverse_edge_id`].
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Link {
    /// Opaque unique link identifier. Left empty, the network assigns
    /// `"<source>|<target>|<n>"` at insertion.
    #[serde(default)]
    pub id: String,
    /// Name of one endpoint.
    pub source: String,
    /// Name of the other endpoint.
    pub target: String,
    /// Link capacity, in abstract units. Must be non-negative.
    pub capacity: f64,
    /// Link cost, used as the SPF weight. Must be non-negative.
    pub cost: f64,
    /// Whether the link is administratively disabled in the base network.
    #[serde(default)]
    pub disabled: bool,
    /// Arbitrary scalar attributes.
    #[serde(default)]
    pub attrs: AttrMap,
    /// Names of the risk groups this link belongs to.
    #[serde(default)]
    pub risk_groups: BTreeSet<String>,
}

impl Link {
    /// Creates an enabled link with a network-assigned id.
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        capacity: f64,
        cost: f64,
    ) -> Self {
        Self {
            id: String::new(),
            source: source.into(),
            target: target.into(),
            capacity,
            cost,
            disabled: false,
            attrs: AttrMap::new(),
            risk_groups: BTreeSet::new(),
        }
    }

    /// Sets an explicit link id, consuming and returning the link.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets an attribute, consuming and returning the link.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    /// Adds the link to a risk group, consuming and returning the link.
    pub fn with_risk_group(mut self, group: impl Into<String>) -> Self {
        self.risk_groups.insert(group.into());
        self
    }

    /// Marks the link disabled, consuming and returning the link.
    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// The directed edge id used for the target→source materialization.
    /// Flow statistics strip the marker again, so results only ever report
    /// the link id itself.
    pub fn reverse_edge_id(&self) -> String {
        format!("{}{}", self.id, crate::graph::REVERSE_EDGE_SUFFIX)
    }
}

/// A named risk group. Nodes and links tagged with the group fail together
/// when a failure policy selects the group as an atomic unit.
#[derive(Debug, Clone, PartialEq, Eq, derive_new::new, serde::Serialize, serde::Deserialize)]
pub struct RiskGroup {
    /// Unique group name.
    pub name: String,
}
