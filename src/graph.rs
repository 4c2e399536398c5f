//! Sequential adjacency between chunks of the same document.
//!
//! Nodes are chunk ids with their content; an undirected edge joins
//! `{base}_{i-1}` and `{base}_{i}`. Edges only ever connect existing nodes,
//! and removing a node removes its edges, so the graph never holds a
//! dangling reference.

use std::collections::{BTreeSet, HashMap};

use crate::models::{chunk_id, parse_chunk_id, DocumentChunk};
use crate::store::chunk_prefix;

#[derive(Debug, Clone, Default)]
struct Node {
    content: String,
    neighbors: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkGraph {
    nodes: HashMap<String, Node>,
}

impl ChunkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from a full store scan.
    pub fn rebuild(chunks: &[DocumentChunk]) -> Self {
        let mut graph = Self::new();
        for chunk in chunks {
            graph.add_chunk(&chunk.id, &chunk.content);
        }
        let ids: Vec<String> = graph.nodes.keys().cloned().collect();
        for id in ids {
            if let Some((base, index)) = parse_chunk_id(&id) {
                if index > 0 {
                    graph.link(&chunk_id(base, index - 1), &id);
                }
            }
        }
        graph
    }

    /// Add a node, or replace its content if it exists. Edges are kept.
    pub fn add_chunk(&mut self, id: &str, content: &str) {
        self.nodes
            .entry(id.to_string())
            .and_modify(|n| n.content = content.to_string())
            .or_insert_with(|| Node {
                content: content.to_string(),
                neighbors: BTreeSet::new(),
            });
    }

    /// Link two existing nodes. Returns `false` and does nothing if either
    /// is missing or both ids are the same.
    pub fn link(&mut self, a: &str, b: &str) -> bool {
        if a == b || !self.nodes.contains_key(a) || !self.nodes.contains_key(b) {
            return false;
        }
        if let Some(node) = self.nodes.get_mut(a) {
            node.neighbors.insert(b.to_string());
        }
        if let Some(node) = self.nodes.get_mut(b) {
            node.neighbors.insert(a.to_string());
        }
        true
    }

    pub fn remove_chunk(&mut self, id: &str) -> bool {
        let Some(node) = self.nodes.remove(id) else {
            return false;
        };
        for neighbor in node.neighbors {
            if let Some(n) = self.nodes.get_mut(&neighbor) {
                n.neighbors.remove(id);
            }
        }
        true
    }

    /// Remove every node of one document. Returns how many were removed.
    pub fn remove_prefix(&mut self, base_id: &str) -> usize {
        let prefix = chunk_prefix(base_id);
        let ids: Vec<String> = self
            .nodes
            .keys()
            .filter(|id| id.starts_with(&prefix))
            .cloned()
            .collect();
        for id in &ids {
            self.remove_chunk(id);
        }
        ids.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn content(&self, id: &str) -> Option<&str> {
        self.nodes.get(id).map(|n| n.content.as_str())
    }

    pub fn neighbors(&self, id: &str) -> Vec<String> {
        self.nodes
            .get(id)
            .map(|n| n.neighbors.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(|n| n.neighbors.len()).sum::<usize>() / 2
    }

    /// Every edge points at an existing node and is mirrored on both ends.
    pub fn is_consistent(&self) -> bool {
        self.nodes.iter().all(|(id, node)| {
            node.neighbors.iter().all(|n| {
                self.nodes
                    .get(n)
                    .is_some_and(|other| other.neighbors.contains(id))
            })
        })
    }
}
