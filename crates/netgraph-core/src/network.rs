//! The materialized network model and the filtered views the engine runs on.
//!
//! A [`Network`] is built once from [nodes](Node), [links](Link), and
//! [risk groups](RiskGroup), and never mutated afterwards. Monte Carlo
//! iterations operate on [`NetworkView`]s, which hide sampled exclusion sets
//! without touching the base.

pub mod types;
pub mod view;

use itertools::Itertools;
use regex::Regex;
use rustc_hash::FxHashMap;

pub use types::{AttrMap, Link, Node, RiskGroup};
pub use view::NetworkView;

use crate::graph::StrictMultiDigraph;

/// Ordered node groups produced by a regex selection: `(label, members)` in
/// encounter order, members sorted by name.
pub type NodeGroups<'a> = Vec<(String, Vec<&'a Node>)>;

/// A collection of uniquely named nodes, uniquely identified links, and risk
/// groups. Insertion order is preserved and meaningful: selections and
/// failure-rule candidate sets scan entities in that order.
#[derive(Debug, Clone, Default)]
pub struct Network {
    nodes: Vec<Node>,
    node_idx: FxHashMap<String, usize>,
    links: Vec<Link>,
    link_idx: FxHashMap<String, usize>,
    risk_groups: Vec<RiskGroup>,
}

impl Network {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a network from node and link lists.
    pub fn from_parts(
        nodes: impl IntoIterator<Item = Node>,
        links: impl IntoIterator<Item = Link>,
    ) -> Result<Self, NetworkError> {
        let mut network = Self::new();
        for node in nodes {
            network.add_node(node)?;
        }
        for link in links {
            network.add_link(link)?;
        }
        Ok(network)
    }

    /// Adds a node. Duplicate names are an error.
    pub fn add_node(&mut self, node: Node) -> Result<(), NetworkError> {
        if self.node_idx.contains_key(&node.name) {
            return Err(NetworkError::DuplicateNode(node.name));
        }
        self.node_idx.insert(node.name.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Adds a link. Both endpoints must already be declared; duplicate link
    /// ids and negative capacity or cost are errors. An empty id is replaced
    /// with a generated `"<source>|<target>|<n>"` id.
    pub fn add_link(&mut self, mut link: Link) -> Result<(), NetworkError> {
        if link.id.is_empty() {
            link.id = format!("{}|{}|{}", link.source, link.target, self.links.len());
        }
        if link.id.ends_with(crate::graph::REVERSE_EDGE_SUFFIX) {
            return Err(NetworkError::ReservedLinkId(link.id));
        }
        for endpoint in [&link.source, &link.target] {
            if !self.node_idx.contains_key(endpoint) {
                return Err(NetworkError::UndeclaredNode {
                    link: link.id,
                    node: endpoint.clone(),
                });
            }
        }
        if self.link_idx.contains_key(&link.id) {
            return Err(NetworkError::DuplicateLink(link.id));
        }
        if link.capacity < 0.0 {
            return Err(NetworkError::NegativeCapacity(link.id));
        }
        if link.cost < 0.0 || !link.cost.is_finite() {
            return Err(NetworkError::InvalidCost(link.id));
        }
        self.link_idx.insert(link.id.clone(), self.links.len());
        self.links.push(link);
        Ok(())
    }

    /// Declares a named risk group. Redeclaring a name is a no-op; groups
    /// referenced only via node/link tags need not be declared at all.
    pub fn add_risk_group(&mut self, group: RiskGroup) {
        if !self.risk_groups.iter().any(|g| g.name == group.name) {
            self.risk_groups.push(group);
        }
    }

    /// Returns the node with the given name, if any.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.node_idx.get(name).map(|&i| &self.nodes[i])
    }

    /// Returns the link with the given id, if any.
    pub fn link(&self, id: &str) -> Option<&Link> {
        self.link_idx.get(id).map(|&i| &self.links[i])
    }

    /// Returns an iterator over all nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Returns an iterator over all links in insertion order.
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.iter()
    }

    /// All risk group names in use: declared ones first, then names that
    /// appear only as entity tags, in encounter order.
    pub fn risk_group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.risk_groups.iter().map(|g| g.name.clone()).collect();
        for tag in self
            .nodes
            .iter()
            .flat_map(|n| n.risk_groups.iter())
            .chain(self.links.iter().flat_map(|l| l.risk_groups.iter()))
        {
            if !names.iter().any(|n| n == tag) {
                names.push(tag.clone());
            }
        }
        names
    }

    /// The nodes and links tagged with a risk group.
    pub fn risk_group_members(&self, group: &str) -> (Vec<&Node>, Vec<&Link>) {
        let nodes = self
            .nodes
            .iter()
            .filter(|n| n.risk_groups.contains(group))
            .collect();
        let links = self
            .links
            .iter()
            .filter(|l| l.risk_groups.contains(group))
            .collect();
        (nodes, links)
    }

    /// Ids of all links between two nodes, in either direction.
    pub fn links_between(&self, a: &str, b: &str) -> Vec<&str> {
        self.links
            .iter()
            .filter(|l| {
                (l.source == a && l.target == b) || (l.source == b && l.target == a)
            })
            .map(|l| l.id.as_str())
            .collect()
    }

    /// Groups nodes whose names match `path`, keyed by the first capture
    /// group when the pattern has one and by the full match otherwise.
    /// Patterns are anchored at the start of the name. Groups come out in
    /// encounter order with members sorted by name.
    pub fn select_node_groups_by_path(&self, path: &str) -> Result<NodeGroups<'_>, NetworkError> {
        select_groups(self.nodes.iter(), path)
    }

    /// Materializes the enabled part of the network for the graph kernel.
    /// Each enabled link whose endpoints are enabled becomes a pair of
    /// directed edges sharing capacity and cost.
    pub fn to_graph(&self) -> StrictMultiDigraph {
        build_graph(
            self.nodes.iter().filter(|n| !n.disabled),
            self.links.iter().filter(|l| !l.disabled),
        )
    }
}

/// Regex-selects groups from an arbitrary node iterator. Shared between the
/// base network and its views.
fn select_groups<'a>(
    nodes: impl Iterator<Item = &'a Node>,
    path: &str,
) -> Result<NodeGroups<'a>, NetworkError> {
    let anchored = format!(r"\A(?:{path})");
    let re = Regex::new(&anchored).map_err(|source| NetworkError::InvalidPattern {
        pattern: path.to_owned(),
        source,
    })?;
    let mut groups: NodeGroups<'a> = Vec::new();
    let mut by_label: FxHashMap<String, usize> = FxHashMap::default();
    for node in nodes {
        let Some(caps) = re.captures(&node.name) else {
            continue;
        };
        let label = caps
            .get(1)
            .unwrap_or_else(|| caps.get(0).expect("capture 0 always exists"))
            .as_str()
            .to_owned();
        match by_label.get(&label) {
            Some(&i) => groups[i].1.push(node),
            None => {
                by_label.insert(label.clone(), groups.len());
                groups.push((label, vec![node]));
            }
        }
    }
    for (_, members) in &mut groups {
        members.sort_by(|a, b| a.name.cmp(&b.name));
    }
    Ok(groups)
}

/// Builds a [`StrictMultiDigraph`] from node/link iterators. Links whose
/// endpoints are not in the node set are dropped; nodes are inserted sorted
/// by name so node indices follow lexicographic order.
fn build_graph<'a>(
    nodes: impl Iterator<Item = &'a Node>,
    links: impl Iterator<Item = &'a Link>,
) -> StrictMultiDigraph {
    let mut graph = StrictMultiDigraph::new();
    let names: Vec<&str> = nodes.map(|n| n.name.as_str()).sorted().collect();
    for name in &names {
        // CORRECTNESS: the network guarantees unique node names.
        graph.add_node(*name).unwrap();
    }
    for link in links {
        if graph.node_index(&link.source).is_none() || graph.node_index(&link.target).is_none()
        {
            continue;
        }
        // CORRECTNESS: link ids are unique, so the two directed ids are too.
        graph
            .add_edge(
                &link.source,
                &link.target,
                link.id.clone(),
                link.cost,
                link.capacity,
            )
            .unwrap();
        graph
            .add_edge(
                &link.target,
                &link.source,
                link.reverse_edge_id(),
                link.cost,
                link.capacity,
            )
            .unwrap();
    }
    graph
}

/// An error type listing the reasons a network description is invalid.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Duplicate node name.
    #[error("duplicate node {0:?}")]
    DuplicateNode(String),

    /// Duplicate link id.
    #[error("duplicate link id {0:?}")]
    DuplicateLink(String),

    /// A link id collides with the reverse-direction edge marker.
    #[error("link id {0:?} ends with the reserved \":rev\" suffix")]
    ReservedLinkId(String),

    /// A link references a node that was never declared.
    #[error("link {link:?} references undeclared node {node:?}")]
    UndeclaredNode {
        /// The offending link id.
        link: String,
        /// The missing node name.
        node: String,
    },

    /// Link capacity is negative.
    #[error("link {0:?} has negative capacity")]
    NegativeCapacity(String),

    /// Link cost is negative or non-finite.
    #[error("link {0:?} has invalid cost")]
    InvalidCost(String),

    /// A selection pattern failed to compile.
    #[error("invalid selection pattern {pattern:?}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// The regex error.
        source: regex::Error,
    },
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;
    use crate::testing;

    #[test]
    fn duplicate_node_fails() {
        let mut network = Network::new();
        network.add_node(Node::new("a")).unwrap();
        assert!(matches!(
            network.add_node(Node::new("a")),
            Err(NetworkError::DuplicateNode(..))
        ));
    }

    #[test]
    fn link_requires_declared_endpoints() {
        let mut network = Network::new();
        network.add_node(Node::new("a")).unwrap();
        assert!(matches!(
            network.add_link(Link::new("a", "zz", 1.0, 1.0)),
            Err(NetworkError::UndeclaredNode { .. })
        ));
    }

    #[test]
    fn duplicate_link_id_fails() {
        let mut network = Network::new();
        network.add_node(Node::new("a")).unwrap();
        network.add_node(Node::new("b")).unwrap();
        network
            .add_link(Link::new("a", "b", 1.0, 1.0).with_id("l"))
            .unwrap();
        assert!(matches!(
            network.add_link(Link::new("a", "b", 1.0, 1.0).with_id("l")),
            Err(NetworkError::DuplicateLink(..))
        ));
    }

    #[test]
    fn reserved_link_id_suffix_fails() {
        let mut network = Network::new();
        network.add_node(Node::new("a")).unwrap();
        network.add_node(Node::new("b")).unwrap();
        assert!(matches!(
            network.add_link(Link::new("a", "b", 1.0, 1.0).with_id("l:rev")),
            Err(NetworkError::ReservedLinkId(..))
        ));
    }

    #[test]
    fn generated_link_ids_are_unique() -> anyhow::Result<()> {
        let mut network = Network::new();
        network.add_node(Node::new("a"))?;
        network.add_node(Node::new("b"))?;
        network.add_link(Link::new("a", "b", 1.0, 1.0))?;
        network.add_link(Link::new("a", "b", 2.0, 1.0))?;
        let ids = network.links_between("a", "b");
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        Ok(())
    }

    #[test]
    fn links_between_ignores_direction() -> anyhow::Result<()> {
        let network = testing::clos_2x2().context("failed to build network")?;
        let forward = network.links_between("S1", "L1");
        let backward = network.links_between("L1", "S1");
        assert_eq!(forward, backward);
        assert_eq!(forward.len(), 1);
        Ok(())
    }

    #[test]
    fn selection_labels_use_first_capture_group() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let groups = network.select_node_groups_by_path(r"(S)\d")?;
        assert_eq!(groups.len(), 1);
        let (label, members) = &groups[0];
        assert_eq!(label, "S");
        let names: Vec<_> = members.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["S1", "S2"]);
        Ok(())
    }

    #[test]
    fn selection_without_groups_uses_full_match() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let groups = network.select_node_groups_by_path(r"S\d")?;
        let labels: Vec<_> = groups.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(labels, vec!["S1", "S2"]);
        Ok(())
    }

    #[test]
    fn selection_groups_nodes_by_capture() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let groups = network.select_node_groups_by_path(r"(\w)\d")?;
        let flattened: Vec<(String, Vec<&str>)> = groups
            .iter()
            .map(|(label, members)| {
                (
                    label.clone(),
                    members.iter().map(|n| n.name.as_str()).collect(),
                )
            })
            .collect();
        insta::assert_yaml_snapshot!(flattened, @r###"
        ---
        - - S
          - - S1
            - S2
        - - L
          - - L1
            - L2
        "###);
        Ok(())
    }

    #[test]
    fn selection_is_anchored_at_the_start() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let groups = network.select_node_groups_by_path(r"1")?;
        assert!(groups.is_empty());
        Ok(())
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let network = Network::new();
        assert!(matches!(
            network.select_node_groups_by_path(r"("),
            Err(NetworkError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn to_graph_materializes_directed_pairs() -> anyhow::Result<()> {
        let network = testing::clos_2x2()?;
        let graph = network.to_graph();
        assert_eq!(graph.nr_nodes(), 4);
        assert_eq!(graph.nr_edges(), 8);
        let l1 = graph.node_index("L1").unwrap();
        assert_eq!(graph.out_edges(l1).count(), 2);
        Ok(())
    }

    #[test]
    fn disabled_entities_are_not_materialized() -> anyhow::Result<()> {
        let mut network = Network::new();
        network.add_node(Node::new("a"))?;
        network.add_node(Node::new("b").disabled())?;
        network.add_node(Node::new("c"))?;
        network.add_link(Link::new("a", "b", 1.0, 1.0))?;
        network.add_link(Link::new("a", "c", 1.0, 1.0).disabled())?;
        let graph = network.to_graph();
        assert_eq!(graph.nr_nodes(), 2);
        assert_eq!(graph.nr_edges(), 0);
        Ok(())
    }

    #[test]
    fn risk_group_names_include_tag_only_groups() -> anyhow::Result<()> {
        let mut network = Network::new();
        network.add_risk_group(RiskGroup::new("declared".to_owned()));
        network.add_node(Node::new("a").with_risk_group("tagged"))?;
        assert_eq!(network.risk_group_names(), vec!["declared", "tagged"]);
        Ok(())
    }

    #[test]
    fn risk_group_members_span_nodes_and_links() -> anyhow::Result<()> {
        let network = testing::risk_group_fabric()?;
        let (nodes, links) = network.risk_group_members("R");
        let names: Vec<_> = nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["L1", "L2"]);
        assert!(links.is_empty());
        Ok(())
    }
}
