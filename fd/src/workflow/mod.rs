//! Workflow definition model
//!
//! A workflow is the static node-and-edge graph produced by the editor and
//! interpreted by the scheduler. It is immutable during a run. Node
//! configuration is free-form JSON validated by each executor, never here.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Module type token of the designated start node.
pub const START_MODULE: &str = "start";

/// One unit of work in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub module_type: String,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

/// Directed edge; `label` drives branch selection and loop-body entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// The static graph: nodes keyed by id plus directed edges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Workflow {
    /// Parse a workflow from the editor's JSON document.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// The designated start node: the unique node with module type `start`.
    pub fn start_node(&self) -> Option<&Node> {
        self.nodes.iter().find(|n| n.module_type == START_MODULE)
    }

    /// Outgoing edges of a node, in definition order.
    pub fn outgoing(&self, node_id: &str) -> Vec<&Edge> {
        self.edges.iter().filter(|e| e.from == node_id).collect()
    }

    /// Select the next node id leaving `node_id`.
    ///
    /// With a branch label, the edge whose label matches wins; a label with
    /// no matching edge falls through to the default (unlabeled) edge. When
    /// several candidates remain (malformed graph) the lexicographically
    /// smallest target id is picked and a warning is logged. `None` means
    /// the graph ends here.
    pub fn next_node(&self, node_id: &str, branch: Option<&str>) -> Option<&str> {
        if let Some(label) = branch {
            let labeled = self
                .edges
                .iter()
                .filter(|e| e.from == node_id && e.label.as_deref() == Some(label));
            if let Some(id) = Self::pick(labeled, node_id) {
                return Some(id);
            }
            // No edge carries the label: fall through to the default edge.
        }
        let default = self.edges.iter().filter(|e| e.from == node_id && e.label.is_none());
        Self::pick(default, node_id)
    }

    fn pick<'a>(candidates: impl Iterator<Item = &'a Edge>, from: &str) -> Option<&'a str> {
        let mut targets: Vec<&'a str> = candidates.map(|e| e.to.as_str()).collect();
        if targets.len() > 1 {
            warn!(
                node_id = %from,
                count = targets.len(),
                "multiple matching edges, picking smallest target id"
            );
        }
        targets.into_iter().min()
    }

    /// Resolve a subflow group id by human-readable name or by id.
    ///
    /// Name lookup takes precedence because group ids change across
    /// import/export. The name of a group is the `name` of any member node
    /// whose config carries `group_name`, or the group node itself.
    pub fn resolve_group(&self, name: &str, group_id: &str) -> Option<String> {
        if !name.is_empty() {
            if let Some(found) = self
                .nodes
                .iter()
                .find(|n| n.group_id.is_some() && n.name.as_deref() == Some(name))
                .and_then(|n| n.group_id.clone())
            {
                return Some(found);
            }
        }
        if !group_id.is_empty() && self.nodes.iter().any(|n| n.group_id.as_deref() == Some(group_id)) {
            return Some(group_id.to_string());
        }
        None
    }

    /// Entry node of a subflow group: the member with no incoming edge from
    /// inside the group.
    pub fn group_entry(&self, group_id: &str) -> Option<&Node> {
        let members: HashSet<&str> = self
            .nodes
            .iter()
            .filter(|n| n.group_id.as_deref() == Some(group_id))
            .map(|n| n.id.as_str())
            .collect();

        let mut entries: Vec<&Node> = self
            .nodes
            .iter()
            .filter(|n| members.contains(n.id.as_str()))
            .filter(|n| {
                !self
                    .edges
                    .iter()
                    .any(|e| e.to == n.id && members.contains(e.from.as_str()))
            })
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries.into_iter().next()
    }

    /// Sanity-check the graph: ids must be unique and edges must reference
    /// existing nodes. Returns the list of problems found (empty = valid).
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut seen = HashMap::new();
        for node in &self.nodes {
            if seen.insert(node.id.as_str(), ()).is_some() {
                problems.push(format!("duplicate node id: {}", node.id));
            }
        }
        for edge in &self.edges {
            if !seen.contains_key(edge.from.as_str()) {
                problems.push(format!("edge from unknown node: {}", edge.from));
            }
            if !seen.contains_key(edge.to.as_str()) {
                problems.push(format!("edge to unknown node: {}", edge.to));
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, module_type: &str) -> Node {
        Node {
            id: id.into(),
            module_type: module_type.into(),
            config: Map::new(),
            name: None,
            group_id: None,
        }
    }

    fn edge(from: &str, to: &str, label: Option<&str>) -> Edge {
        Edge {
            from: from.into(),
            to: to.into(),
            label: label.map(String::from),
        }
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "id": "wf-1",
            "nodes": [
                {"id": "n1", "module_type": "start", "config": {}},
                {"id": "n2", "module_type": "print_log", "config": {"logMessage": "hi"}}
            ],
            "edges": [{"from": "n1", "to": "n2"}]
        }"#;
        let wf = Workflow::from_json(json).unwrap();
        assert_eq!(wf.nodes.len(), 2);
        assert_eq!(wf.start_node().unwrap().id, "n1");
        assert_eq!(wf.node("n2").unwrap().config.get("logMessage"), Some(&json!("hi")));
    }

    #[test]
    fn test_next_node_default_edge() {
        let wf = Workflow {
            id: "w".into(),
            nodes: vec![node("a", "start"), node("b", "print_log")],
            edges: vec![edge("a", "b", None)],
        };
        assert_eq!(wf.next_node("a", None), Some("b"));
        assert_eq!(wf.next_node("b", None), None);
    }

    #[test]
    fn test_next_node_branch_label() {
        let wf = Workflow {
            id: "w".into(),
            nodes: vec![node("c", "conditional"), node("t", "print_log"), node("f", "print_log")],
            edges: vec![edge("c", "t", Some("true")), edge("c", "f", Some("false"))],
        };
        assert_eq!(wf.next_node("c", Some("true")), Some("t"));
        assert_eq!(wf.next_node("c", Some("false")), Some("f"));
    }

    #[test]
    fn test_branch_without_matching_edge_falls_through() {
        let wf = Workflow {
            id: "w".into(),
            nodes: vec![node("c", "conditional"), node("d", "print_log")],
            edges: vec![edge("c", "d", None)],
        };
        assert_eq!(wf.next_node("c", Some("true")), Some("d"));
    }

    #[test]
    fn test_tie_break_picks_smallest_target() {
        let wf = Workflow {
            id: "w".into(),
            nodes: vec![node("a", "start"), node("z", "print_log"), node("b", "print_log")],
            edges: vec![edge("a", "z", None), edge("a", "b", None)],
        };
        assert_eq!(wf.next_node("a", None), Some("b"));
    }

    #[test]
    fn test_resolve_group_name_takes_precedence() {
        let mut n1 = node("g1-entry", "set_variable");
        n1.group_id = Some("g1".into());
        n1.name = Some("upload".into());
        let mut n2 = node("g2-entry", "set_variable");
        n2.group_id = Some("g2".into());

        let wf = Workflow {
            id: "w".into(),
            nodes: vec![n1, n2],
            edges: vec![],
        };
        // Name match wins even when an id is also supplied.
        assert_eq!(wf.resolve_group("upload", "g2"), Some("g1".into()));
        assert_eq!(wf.resolve_group("", "g2"), Some("g2".into()));
        assert_eq!(wf.resolve_group("nope", ""), None);
    }

    #[test]
    fn test_group_entry_ignores_external_edges() {
        let mut a = node("s1", "set_variable");
        a.group_id = Some("g".into());
        let mut b = node("s2", "print_log");
        b.group_id = Some("g".into());
        let caller = node("call", "subflow");

        let wf = Workflow {
            id: "w".into(),
            nodes: vec![a, b, caller],
            edges: vec![edge("call", "s1", None), edge("s1", "s2", None)],
        };
        // s1 has an incoming edge, but from outside the group.
        assert_eq!(wf.group_entry("g").unwrap().id, "s1");
    }

    #[test]
    fn test_validate_reports_problems() {
        let wf = Workflow {
            id: "w".into(),
            nodes: vec![node("a", "start"), node("a", "print_log")],
            edges: vec![edge("a", "ghost", None)],
        };
        let problems = wf.validate();
        assert_eq!(problems.len(), 2);
    }
}
