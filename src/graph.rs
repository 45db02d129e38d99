//! The graph snapshot and the pure reducer that folds change events into it.
//!
//! Everything here is a total function of its arguments: no I/O, no clocks,
//! no ambient state. The watcher and orchestrator stay thin because all of
//! the consistency rules (idempotent upserts, out-of-order protection, safe
//! deletes) live in [`reduce`], where they are unit-testable without a
//! filesystem.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    ops::{Deref, DerefMut},
    path::PathBuf,
};

use crate::{
    event::{ChangeEvent, ChangeKind},
    parse::parse_document,
    paths::{node_id_for_path, NodeId},
};

/// One document node. `id` is invariant once created; every other field is
/// recomputed wholesale from the document body on change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub title: String,
    pub content: String,
    /// Outgoing references in document order, first occurrence wins.
    /// Dangling targets are permitted: a forward reference to a document
    /// that has not materialized yet is not an error.
    pub outgoing_edges: Vec<NodeId>,
    pub summary: String,
    pub color: Option<String>,
}

/// An immutable snapshot: NodeId to Node. There is no separate edge table;
/// edges are a field on the source node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph(pub BTreeMap<NodeId, Node>);

impl Deref for Graph {
    type Target = BTreeMap<NodeId, Node>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Graph {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// The only contextual dependency a reduction needs, passed explicitly into
/// every call rather than read from ambient state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub root_path: PathBuf,
}

/// What changed between two snapshots. Subscribers apply deltas
/// incrementally instead of re-rendering the whole graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDelta {
    /// Full new state of every created or modified node, including nodes
    /// whose only change is a pruned edge list.
    pub upserted: Vec<Node>,
    pub removed: Vec<NodeId>,
}

impl GraphDelta {
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty() && self.removed.is_empty()
    }
}

/// Drop later occurrences of an already present id, preserving document
/// order of first occurrences.
pub fn dedupe_edges(edges: Vec<NodeId>) -> Vec<NodeId> {
    let mut seen = Vec::with_capacity(edges.len());
    for edge in edges {
        if !seen.contains(&edge) {
            seen.push(edge);
        }
    }
    seen
}

/// Fold one change event into a snapshot, producing the next snapshot.
pub fn reduce(graph: &Graph, event: &ChangeEvent, env: &Environment) -> Graph {
    let id = node_id_for_path(&event.absolute_path, &env.root_path);
    match event.kind {
        ChangeKind::Added => apply_added(graph, id, event.content.as_deref().unwrap_or_default()),
        ChangeKind::Changed => {
            apply_changed(graph, id, event.content.as_deref().unwrap_or_default())
        }
        ChangeKind::Deleted => apply_deleted(graph, &id),
    }
}

/// Added arm. An Added event for an id already in the graph delegates to
/// the Changed arm: duplicate notifications from the watcher layer become
/// idempotent upserts.
fn apply_added(graph: &Graph, id: NodeId, content: &str) -> Graph {
    if graph.contains_key(&id) {
        return apply_changed(graph, id, content);
    }
    let outline = parse_document(content);
    let node = Node {
        id: id.clone(),
        title: outline.title,
        content: content.to_string(),
        outgoing_edges: dedupe_edges(outline.outgoing_edges),
        summary: outline.summary,
        color: outline.color,
    };
    let mut next = graph.clone();
    next.insert(id, node);
    next
}

/// Changed arm. A Changed event for an unknown id delegates to the Added
/// arm: out-of-order notifications cannot lose a document. Otherwise the
/// node is replaced wholesale from the new content; only its identity and
/// externally-set display metadata survive.
fn apply_changed(graph: &Graph, id: NodeId, content: &str) -> Graph {
    let Some(existing) = graph.get(&id) else {
        return apply_added(graph, id, content);
    };
    let outline = parse_document(content);
    let node = Node {
        id: id.clone(),
        title: outline.title,
        content: content.to_string(),
        outgoing_edges: dedupe_edges(outline.outgoing_edges),
        summary: outline.summary,
        color: outline.color.or_else(|| existing.color.clone()),
    };
    let mut next = graph.clone();
    next.insert(id, node);
    next
}

/// Deleted arm: remove the node and prune its id from every remaining
/// node's edge list.
fn apply_deleted(graph: &Graph, id: &NodeId) -> Graph {
    let mut next = graph.clone();
    next.remove(id);
    for node in next.values_mut() {
        node.outgoing_edges.retain(|edge| edge != id);
    }
    next
}

/// Compute the delta between two snapshots. Node comparison is by value, so
/// a node whose edges were pruned by a delete shows up as upserted.
pub fn diff(old: &Graph, new: &Graph) -> GraphDelta {
    let mut delta = GraphDelta::default();
    for (id, node) in new.iter() {
        if old.get(id) != Some(node) {
            delta.upserted.push(node.clone());
        }
    }
    for id in old.keys() {
        if !new.contains_key(id) {
            delta.removed.push(id.clone());
        }
    }
    delta
}
