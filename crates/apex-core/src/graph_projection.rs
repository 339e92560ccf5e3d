//! The `graph/get` experimental protocol extension (§6): a
//! JSON-serialisable projection of the whole [`SymbolGraph`], built as a
//! `Background` task that yields between fixed-size batches so it never
//! starves higher-priority work sharing the single controller loop
//! (§5's "no task may hold a reference ... across a suspension point
//! without re-lookup" is honoured here by collecting each batch from a
//! fresh snapshot read rather than holding the graph's lock open).

use apex_symbol_graph::SymbolGraph;
use apex_symbol_types::{Range, ReferenceContext, ReferenceType};
use serde::Serialize;
use std::collections::HashSet;

/// Nodes are yielded in batches of this size.
const NODE_BATCH_SIZE: usize = 100;
/// Distinct files are tallied in batches of this size.
const FILE_BATCH_SIZE: usize = 50;
/// Edges are yielded in batches of this size.
const EDGE_BATCH_SIZE: usize = 100;

/// One graph vertex, wire-shaped for `graph/get`.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNodeView {
    /// The vertex's symbol id.
    pub symbol_id: String,
    /// The owning file's uri.
    pub file_uri: String,
    /// Monotonic update counter.
    pub last_updated: u64,
    /// Incoming edge count.
    pub reference_count: u32,
    /// Insertion-order vertex id.
    pub node_id: u32,
}

/// One graph edge, wire-shaped for `graph/get`. Per §6, the location is
/// always the rehydrated (non-compact) form — this projection never
/// exposes the packed `u64` the graph stores internally.
#[derive(Debug, Clone, Serialize)]
pub struct GraphEdgeView {
    /// Referencing symbol id.
    pub source_id: String,
    /// Referenced symbol id.
    pub target_id: String,
    /// How the source refers to the target.
    pub reference_type: ReferenceType,
    /// Rehydrated use-site location.
    pub location: Range,
    /// Extra reference context, if any.
    pub context: Option<ReferenceContext>,
    /// The source use-site's file.
    pub source_file_uri: String,
    /// The target symbol's file.
    pub target_file_uri: String,
}

/// Summary counts accompanying a projection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphMetadata {
    /// Total vertices projected.
    pub total_nodes: usize,
    /// Total edges projected.
    pub total_edges: usize,
    /// Distinct files touched by the projected vertices.
    pub total_files: usize,
}

/// The full `{nodes, edges, metadata}` projection.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphProjection {
    /// All vertices.
    pub nodes: Vec<GraphNodeView>,
    /// All edges.
    pub edges: Vec<GraphEdgeView>,
    /// Summary counts.
    pub metadata: GraphMetadata,
}

/// Build the full projection, yielding to the scheduler's cooperative
/// driver after every batch of nodes, files, and edges so this
/// `Background`-priority task never monopolises a controller scan
/// (§5's suspension-point requirement).
pub async fn build_projection(graph: &SymbolGraph) -> GraphProjection {
    let mut nodes = Vec::new();
    for batch in graph.project_nodes().chunks(NODE_BATCH_SIZE) {
        for node in batch {
            nodes.push(GraphNodeView {
                symbol_id: node.symbol_id.clone(),
                file_uri: node.file_uri.clone(),
                last_updated: node.last_updated,
                reference_count: node.reference_count,
                node_id: node.node_id,
            });
        }
        tokio::task::yield_now().await;
    }

    let mut seen_files: HashSet<String> = HashSet::new();
    for batch in nodes.chunks(FILE_BATCH_SIZE) {
        for node in batch {
            seen_files.insert(node.file_uri.clone());
        }
        tokio::task::yield_now().await;
    }

    let mut edges = Vec::new();
    for batch in graph.project_edges().chunks(EDGE_BATCH_SIZE) {
        for (edge, location) in batch {
            edges.push(GraphEdgeView {
                source_id: edge.source_id.clone(),
                target_id: edge.target_id.clone(),
                reference_type: edge.reference_type,
                location: *location,
                context: edge.context.clone(),
                source_file_uri: edge.source_file_uri.clone(),
                target_file_uri: edge.target_file_uri.clone(),
            });
        }
        tokio::task::yield_now().await;
    }

    let metadata = GraphMetadata { total_nodes: nodes.len(), total_edges: edges.len(), total_files: seen_files.len() };
    GraphProjection { nodes, edges, metadata }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apex_symbol_table::SymbolDraft;
    use apex_symbol_types::SymbolKind;

    #[tokio::test]
    async fn projection_counts_nodes_edges_and_distinct_files() {
        let graph = SymbolGraph::new();
        let mut table_a = apex_symbol_table::SymbolTable::new("file:///A.cls");
        let class_a = table_a.add_symbol(SymbolDraft::new("A", SymbolKind::Class)).unwrap();
        graph.add_symbol_table("file:///A.cls", table_a);

        let mut table_b = apex_symbol_table::SymbolTable::new("file:///B.cls");
        let class_b = table_b.add_symbol(SymbolDraft::new("B", SymbolKind::Class)).unwrap();
        graph.add_symbol_table("file:///B.cls", table_b);

        graph.add_reference(
            &class_b,
            &class_a,
            ReferenceType::TypeReference,
            Range::new(apex_symbol_types::Position::new(1, 0), apex_symbol_types::Position::new(1, 1)),
            None,
        );

        let projection = build_projection(&graph).await;
        assert_eq!(projection.metadata.total_nodes, 2);
        assert_eq!(projection.metadata.total_edges, 1);
        assert_eq!(projection.metadata.total_files, 2);
        assert_eq!(projection.edges[0].location.start.line, 1);
    }
}
