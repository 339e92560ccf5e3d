//! Cross-file reference graph over parsed Apex symbol tables.
//!
//! `SymbolGraph` never stores symbol data itself — each [`Symbol`] lives
//! in exactly one [`SymbolTable`], owned by the file it was parsed from.
//! The graph holds only indices (by name, by FQN, by file) and
//! [`ReferenceEdge`]s between symbol ids, resolving `getSymbol` queries
//! by delegating back to the owning table. This mirrors the dual
//! qualified/bare-name indexing strategy of a production cross-file
//! workspace index, generalized here from package-qualified names to
//! Apex FQNs, and guarded the same way with `parking_lot` locks so a
//! single `Arc<SymbolGraph>` can be shared as a handle across tasks.

#![deny(unsafe_code)]
#![deny(unreachable_pub)]
#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]
#![warn(rust_2018_idioms)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(
    clippy::too_many_lines,
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

use apex_identity::SymbolId;
use apex_symbol_table::{Symbol, SymbolTable};
use apex_symbol_types::{Range, ReferenceContext, ReferenceType};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::HashSet;

/// A directed edge between two symbols.
#[derive(Debug, Clone)]
pub struct ReferenceEdge {
    /// The referencing symbol's id.
    pub source_id: String,
    /// The referenced symbol's id.
    pub target_id: String,
    /// How the source refers to the target.
    pub reference_type: ReferenceType,
    /// Compact four-`u16` packed location of the use site (§4.3).
    pub location: u64,
    /// Extra context carried by some reference kinds.
    pub context: Option<ReferenceContext>,
    /// The file the use site lives in.
    pub source_file_uri: String,
    /// The file the target symbol lives in.
    pub target_file_uri: String,
}

impl ReferenceEdge {
    /// This edge's location, rehydrated to a [`Range`].
    pub fn rehydrated_location(&self) -> Range {
        Range::from_compact(self.location)
    }
}

/// Graph vertex payload. Carries no symbol data of its own.
#[derive(Debug, Clone)]
pub struct ReferenceNode {
    /// The symbol this vertex represents.
    pub symbol_id: String,
    /// The owning file's uri.
    pub file_uri: String,
    /// Logical update counter, bumped on every mutation touching this
    /// vertex (edges added, symbol re-added). A monotonic counter
    /// rather than a wall-clock timestamp, since only relative ordering
    /// matters here.
    pub last_updated: u64,
    /// Count of incoming edges.
    pub reference_count: u32,
    /// Insertion-order vertex id.
    pub node_id: u32,
}

/// Context used to disambiguate an unqualified name lookup (§3 Entities:
/// `ResolutionContext`).
#[derive(Debug, Clone, Default)]
pub struct ResolutionContext {
    /// The file the lookup originates from.
    pub source_file_uri: Option<String>,
    /// A namespace the caller expects the result to belong to.
    pub expected_namespace: Option<String>,
    /// The innermost scope id open at the use site.
    pub current_scope_id: Option<String>,
    /// Whether the use site requires a static member.
    pub is_static: Option<bool>,
}

/// Result of a confidence-scored name lookup.
#[derive(Debug, Clone)]
pub struct ResolvedSymbol {
    /// The chosen symbol.
    pub symbol: Symbol,
    /// Heuristic confidence in `{1.0, 0.8, 0.7, 0.5}` (§4.3).
    pub confidence: f32,
    /// Whether more than one candidate matched the name.
    pub is_ambiguous: bool,
    /// All candidates that matched the name, including the chosen one.
    pub candidates: Vec<Symbol>,
}

/// A rehydrated, symbol-attached reference, returned by
/// `find_references_to`/`find_references_from`.
#[derive(Debug, Clone)]
pub struct ReferenceResult {
    /// The underlying edge.
    pub edge: ReferenceEdge,
    /// The referencing symbol, if still resolvable.
    pub source: Option<Symbol>,
    /// The referenced symbol, if still resolvable.
    pub target: Option<Symbol>,
}

/// Dependency analysis for one symbol (§4.3 `analyzeDependencies`).
#[derive(Debug, Clone)]
pub struct DependencyAnalysis {
    /// Distinct symbols this symbol refers to.
    pub dependencies: Vec<String>,
    /// Distinct symbols that refer to this symbol.
    pub dependents: Vec<String>,
    /// `dependents.len() * 2 + dependencies.len()`.
    pub impact_score: usize,
    /// Non-trivial strongly-connected components this symbol is a
    /// member of.
    pub circular_dependencies: Vec<Vec<String>>,
}

#[derive(Debug, Clone)]
struct PendingReference {
    source_id: String,
    reference_type: ReferenceType,
    location: u64,
    context: Option<ReferenceContext>,
    source_file_uri: String,
    target_file_uri: String,
}

#[derive(Default)]
struct GraphState {
    tables: FxHashMap<String, SymbolTable>,
    symbol_ids: FxHashSet<String>,
    symbol_file_map: FxHashMap<String, String>,
    fqn_index: FxHashMap<String, Vec<String>>,
    name_index: FxHashMap<String, Vec<String>>,
    nodes: FxHashMap<String, ReferenceNode>,
    next_node_id: u32,
    update_counter: u64,
    edges_out: FxHashMap<String, Vec<ReferenceEdge>>,
    edges_in: FxHashMap<String, Vec<ReferenceEdge>>,
    deferred_references: FxHashMap<String, Vec<PendingReference>>,
}

/// Cross-file reference graph. Cheap to share: clone an `Arc<SymbolGraph>`
/// rather than the graph itself.
#[derive(Default)]
pub struct SymbolGraph {
    state: RwLock<GraphState>,
}

impl SymbolGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a file's symbol table, indexing every
    /// symbol it contains and flushing any deferred references that
    /// targeted them (§4.3 lifecycle).
    pub fn add_symbol_table(&self, file_uri: &str, table: SymbolTable) {
        let mut state = self.state.write();

        if state.tables.contains_key(file_uri) {
            Self::remove_file_locked(&mut state, file_uri);
        }

        let symbol_ids: Vec<String> =
            table.get_all_symbols().iter().map(|s| s.id.as_str().to_string()).collect();
        state.tables.insert(file_uri.to_string(), table);

        for id in symbol_ids {
            Self::index_symbol_locked(&mut state, file_uri, &id);
        }
    }

    fn index_symbol_locked(state: &mut GraphState, file_uri: &str, id: &str) {
        state.update_counter += 1;
        let already_present = state.symbol_ids.contains(id);
        state.symbol_ids.insert(id.to_string());
        state.symbol_file_map.insert(id.to_string(), file_uri.to_string());

        let Some(symbol) = Self::lookup_symbol_in_tables(state, id) else { return };
        let fqn_key = symbol.fqn.to_lowercase();
        let name_key = symbol.name.to_lowercase();

        state.fqn_index.entry(fqn_key).or_default().push(id.to_string());
        state.name_index.entry(name_key).or_default().push(id.to_string());

        if !already_present {
            let node_id = state.next_node_id;
            state.next_node_id += 1;
            state.nodes.insert(
                id.to_string(),
                ReferenceNode {
                    symbol_id: id.to_string(),
                    file_uri: file_uri.to_string(),
                    last_updated: state.update_counter,
                    reference_count: 0,
                    node_id,
                },
            );
        }

        Self::drain_deferred_locked(state, id);
    }

    fn drain_deferred_locked(state: &mut GraphState, target_id: &str) {
        let Some(pending) = state.deferred_references.remove(target_id) else { return };
        for p in pending {
            if state.symbol_ids.contains(&p.source_id) {
                Self::materialize_edge_locked(
                    state,
                    p.source_id,
                    target_id.to_string(),
                    p.reference_type,
                    p.location,
                    p.context,
                    p.source_file_uri,
                    p.target_file_uri,
                );
            }
            // Source still missing: deferred entries are flushed at
            // most once when the target appears, so an unresolved pair
            // is dropped here rather than re-queued.
        }
    }

    fn lookup_symbol_in_tables(state: &GraphState, id: &str) -> Option<Symbol> {
        let file_uri = state.symbol_file_map.get(id)?;
        let table = state.tables.get(file_uri)?;
        table.get_all_symbols_by_id(id).into_iter().next().cloned()
    }

    /// Resolve a symbol by id, delegating to its owning table.
    pub fn get_symbol(&self, symbol_id: &str) -> Option<Symbol> {
        let state = self.state.read();
        Self::lookup_symbol_in_tables(&state, symbol_id)
    }

    /// All symbols with a given bare name (case-insensitive).
    pub fn find_symbol_by_name(&self, name: &str) -> Vec<Symbol> {
        let state = self.state.read();
        state
            .name_index
            .get(&name.to_lowercase())
            .map(|ids| ids.iter().filter_map(|id| Self::lookup_symbol_in_tables(&state, id)).collect())
            .unwrap_or_default()
    }

    /// All symbols with a given FQN (case-insensitive; one-to-many for
    /// overloads).
    pub fn find_symbol_by_fqn(&self, fqn: &str) -> Vec<Symbol> {
        let state = self.state.read();
        state
            .fqn_index
            .get(&fqn.to_lowercase())
            .map(|ids| ids.iter().filter_map(|id| Self::lookup_symbol_in_tables(&state, id)).collect())
            .unwrap_or_default()
    }

    /// All symbols declared in a given file.
    pub fn get_symbols_in_file(&self, uri: &str) -> Vec<Symbol> {
        let state = self.state.read();
        state.tables.get(uri).map(|t| t.get_all_symbols().to_vec()).unwrap_or_default()
    }

    /// Whether a symbol id currently exists in the graph.
    pub fn contains_symbol(&self, symbol_id: &str) -> bool {
        self.state.read().symbol_ids.contains(symbol_id)
    }

    /// Record a reference from `source` to `target`. If either endpoint
    /// does not yet exist, the reference is held in `deferredReferences`
    /// keyed by the target's id and materialised the next time that
    /// target is registered. Idempotent on `(source, target, type,
    /// location)`.
    pub fn add_reference(
        &self,
        source: &SymbolId,
        target: &SymbolId,
        reference_type: ReferenceType,
        location: Range,
        context: Option<ReferenceContext>,
    ) {
        let mut state = self.state.write();
        let source_id = source.as_str().to_string();
        let target_id = target.as_str().to_string();
        let packed = location.to_compact();

        if state.symbol_ids.contains(&source_id) && state.symbol_ids.contains(&target_id) {
            Self::materialize_edge_locked(
                &mut state,
                source_id,
                target_id,
                reference_type,
                packed,
                context,
                source.file_uri().to_string(),
                target.file_uri().to_string(),
            );
        } else {
            state.deferred_references.entry(target_id).or_default().push(PendingReference {
                source_id,
                reference_type,
                location: packed,
                context,
                source_file_uri: source.file_uri().to_string(),
                target_file_uri: target.file_uri().to_string(),
            });
        }
    }

    fn materialize_edge_locked(
        state: &mut GraphState,
        source_id: String,
        target_id: String,
        reference_type: ReferenceType,
        location: u64,
        context: Option<ReferenceContext>,
        source_file_uri: String,
        target_file_uri: String,
    ) {
        let exists = state.edges_out.get(&source_id).is_some_and(|edges| {
            edges.iter().any(|e| {
                e.target_id == target_id && e.reference_type == reference_type && e.location == location
            })
        });
        if exists {
            return;
        }

        let edge = ReferenceEdge {
            source_id: source_id.clone(),
            target_id: target_id.clone(),
            reference_type,
            location,
            context,
            source_file_uri,
            target_file_uri,
        };
        state.edges_out.entry(source_id).or_default().push(edge.clone());
        state.edges_in.entry(target_id.clone()).or_default().push(edge);
        if let Some(node) = state.nodes.get_mut(&target_id) {
            node.reference_count += 1;
            state.update_counter += 1;
            node.last_updated = state.update_counter;
        }
    }

    /// Every edge whose target is `symbol`.
    pub fn find_references_to(&self, symbol_id: &str) -> Vec<ReferenceResult> {
        let state = self.state.read();
        state
            .edges_in
            .get(symbol_id)
            .map(|edges| {
                edges
                    .iter()
                    .map(|e| ReferenceResult {
                        edge: e.clone(),
                        source: Self::lookup_symbol_in_tables(&state, &e.source_id),
                        target: Self::lookup_symbol_in_tables(&state, &e.target_id),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every edge whose source is `symbol`.
    pub fn find_references_from(&self, symbol_id: &str) -> Vec<ReferenceResult> {
        let state = self.state.read();
        state
            .edges_out
            .get(symbol_id)
            .map(|edges| {
                edges
                    .iter()
                    .map(|e| ReferenceResult {
                        edge: e.clone(),
                        source: Self::lookup_symbol_in_tables(&state, &e.source_id),
                        target: Self::lookup_symbol_in_tables(&state, &e.target_id),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Strongly-connected components over `TypeReference`/`Inheritance`
    /// edges, each with more than one member (or a single self-loop).
    pub fn detect_circular_dependencies(&self) -> Vec<Vec<String>> {
        let state = self.state.read();
        Self::tarjan_scc(&state)
    }

    fn tarjan_scc(state: &GraphState) -> Vec<Vec<String>> {
        struct Ctx<'a> {
            state: &'a GraphState,
            index: FxHashMap<String, usize>,
            lowlink: FxHashMap<String, usize>,
            on_stack: FxHashSet<String>,
            stack: Vec<String>,
            next_index: usize,
            sccs: Vec<Vec<String>>,
        }

        fn neighbors(state: &GraphState, id: &str) -> Vec<String> {
            state
                .edges_out
                .get(id)
                .map(|edges| {
                    edges
                        .iter()
                        .filter(|e| e.reference_type.participates_in_cycle_detection())
                        .map(|e| e.target_id.clone())
                        .filter(|t| state.symbol_ids.contains(t))
                        .collect()
                })
                .unwrap_or_default()
        }

        fn strongconnect(ctx: &mut Ctx<'_>, v: &str) {
            ctx.index.insert(v.to_string(), ctx.next_index);
            ctx.lowlink.insert(v.to_string(), ctx.next_index);
            ctx.next_index += 1;
            ctx.stack.push(v.to_string());
            ctx.on_stack.insert(v.to_string());

            let targets = neighbors(ctx.state, v);
            for w in targets {
                if !ctx.index.contains_key(&w) {
                    strongconnect(ctx, &w);
                    let w_low = ctx.lowlink[&w];
                    let v_low = ctx.lowlink[v];
                    ctx.lowlink.insert(v.to_string(), v_low.min(w_low));
                } else if ctx.on_stack.contains(&w) {
                    let w_idx = ctx.index[&w];
                    let v_low = ctx.lowlink[v];
                    ctx.lowlink.insert(v.to_string(), v_low.min(w_idx));
                }
            }

            if ctx.lowlink[v] == ctx.index[v] {
                let mut component = Vec::new();
                loop {
                    let w = ctx.stack.pop().expect("stack non-empty for own SCC root");
                    ctx.on_stack.remove(&w);
                    let is_v = w == v;
                    component.push(w);
                    if is_v {
                        break;
                    }
                }
                let is_cycle = component.len() > 1
                    || component.first().is_some_and(|id| neighbors(ctx.state, id).iter().any(|t| t == id));
                if is_cycle {
                    ctx.sccs.push(component);
                }
            }
        }

        let mut ctx = Ctx {
            state,
            index: FxHashMap::default(),
            lowlink: FxHashMap::default(),
            on_stack: FxHashSet::default(),
            stack: Vec::new(),
            next_index: 0,
            sccs: Vec::new(),
        };

        let ids: Vec<String> = state.symbol_ids.iter().cloned().collect();
        for id in ids {
            if !ctx.index.contains_key(&id) {
                strongconnect(&mut ctx, &id);
            }
        }
        ctx.sccs
    }

    /// Dependency/impact analysis for one symbol.
    pub fn analyze_dependencies(&self, symbol_id: &str) -> DependencyAnalysis {
        let state = self.state.read();
        let dependencies: HashSet<String> = state
            .edges_out
            .get(symbol_id)
            .map(|edges| edges.iter().map(|e| e.target_id.clone()).collect())
            .unwrap_or_default();
        let dependents: HashSet<String> = state
            .edges_in
            .get(symbol_id)
            .map(|edges| edges.iter().map(|e| e.source_id.clone()).collect())
            .unwrap_or_default();
        let impact_score = dependents.len() * 2 + dependencies.len();
        let sccs = Self::tarjan_scc(&state);
        let circular_dependencies: Vec<Vec<String>> =
            sccs.into_iter().filter(|scc| scc.iter().any(|id| id == symbol_id)).collect();

        DependencyAnalysis {
            dependencies: dependencies.into_iter().collect(),
            dependents: dependents.into_iter().collect(),
            impact_score,
            circular_dependencies,
        }
    }

    /// Confidence-scored lookup by bare name, disambiguating with `ctx`
    /// when more than one candidate shares the name (§4.3).
    pub fn lookup_symbol_with_context(
        &self,
        name: &str,
        ctx: Option<&ResolutionContext>,
    ) -> Option<ResolvedSymbol> {
        let candidates = self.find_symbol_by_name(name);
        if candidates.is_empty() {
            return None;
        }
        if candidates.len() == 1 {
            return Some(ResolvedSymbol {
                symbol: candidates[0].clone(),
                confidence: 1.0,
                is_ambiguous: false,
                candidates,
            });
        }

        if let Some(ctx) = ctx {
            if let Some(src) = &ctx.source_file_uri {
                if let Some(sym) = candidates.iter().find(|s| &s.file_uri == src) {
                    return Some(ResolvedSymbol {
                        symbol: sym.clone(),
                        confidence: 0.8,
                        is_ambiguous: true,
                        candidates,
                    });
                }
            }
            if let Some(scope_id) = &ctx.current_scope_id {
                if let Some(sym) =
                    candidates.iter().find(|s| s.parent_id.as_ref().is_some_and(|p| p.as_str() == scope_id))
                {
                    return Some(ResolvedSymbol {
                        symbol: sym.clone(),
                        confidence: 0.7,
                        is_ambiguous: true,
                        candidates,
                    });
                }
            }
        }

        Some(ResolvedSymbol {
            symbol: candidates[0].clone(),
            confidence: 0.5,
            is_ambiguous: true,
            candidates,
        })
    }

    /// Remove a file, its symbols, every edge touching them, and any
    /// deferred entries sourced from or targeting them.
    pub fn remove_file(&self, uri: &str) {
        let mut state = self.state.write();
        Self::remove_file_locked(&mut state, uri);
    }

    fn remove_file_locked(state: &mut GraphState, uri: &str) {
        let Some(table) = state.tables.remove(uri) else { return };
        let ids: Vec<String> = table.get_all_symbols().iter().map(|s| s.id.as_str().to_string()).collect();
        let id_set: FxHashSet<String> = ids.iter().cloned().collect();

        for id in &ids {
            state.symbol_ids.remove(id);
            state.symbol_file_map.remove(id);
            state.nodes.remove(id);

            if let Some(sym) = table.get_all_symbols_by_id(id).into_iter().next() {
                if let Some(bucket) = state.name_index.get_mut(&sym.name.to_lowercase()) {
                    bucket.retain(|i| i != id);
                }
                if let Some(bucket) = state.fqn_index.get_mut(&sym.fqn.to_lowercase()) {
                    bucket.retain(|i| i != id);
                }
            }
        }

        for id in &ids {
            if let Some(out_edges) = state.edges_out.remove(id) {
                for e in out_edges {
                    if let Some(in_bucket) = state.edges_in.get_mut(&e.target_id) {
                        in_bucket.retain(|x| !(x.source_id == e.source_id && x.location == e.location));
                    }
                }
            }
            if let Some(in_edges) = state.edges_in.remove(id) {
                for e in in_edges {
                    if let Some(out_bucket) = state.edges_out.get_mut(&e.source_id) {
                        out_bucket.retain(|x| !(x.target_id == e.target_id && x.location == e.location));
                    }
                    // The source survives this removal (its own file is
                    // untouched); its edge is now dangling rather than
                    // gone, so it goes back into `deferredReferences`
                    // under the removed target's id (§8 E6) and
                    // re-materialises if a file re-adds that symbol.
                    if !id_set.contains(&e.source_id) {
                        state.deferred_references.entry(id.clone()).or_default().push(PendingReference {
                            source_id: e.source_id,
                            reference_type: e.reference_type,
                            location: e.location,
                            context: e.context,
                            source_file_uri: e.source_file_uri,
                            target_file_uri: e.target_file_uri,
                        });
                    }
                }
            }
        }

        for bucket in state.deferred_references.values_mut() {
            bucket.retain(|p| !id_set.contains(&p.source_id));
        }
    }

    /// Wipe all state.
    pub fn clear(&self) {
        *self.state.write() = GraphState::default();
    }

    /// Number of registered files, for observability snapshots.
    pub fn file_count(&self) -> usize {
        self.state.read().tables.len()
    }

    /// Number of registered symbols, for observability snapshots.
    pub fn symbol_count(&self) -> usize {
        self.state.read().symbol_ids.len()
    }

    /// A `{nodes, edges}` projection suitable for the `graph/get`
    /// protocol extension (§6), batched by the caller.
    pub fn project_nodes(&self) -> Vec<ReferenceNode> {
        self.state.read().nodes.values().cloned().collect()
    }

    /// All edges, for the `graph/get` projection. Locations are
    /// returned already rehydrated, per §6's requirement that the
    /// external projection never carries the compact form.
    pub fn project_edges(&self) -> Vec<(ReferenceEdge, Range)> {
        self.state.read().edges_out.values().flatten().map(|e| (e.clone(), e.rehydrated_location())).collect()
    }

    /// Source ids of references deferred against `target_id`.
    #[cfg(test)]
    fn deferred_reference_sources(&self, target_id: &str) -> Vec<String> {
        self.state
            .read()
            .deferred_references
            .get(target_id)
            .map(|pending| pending.iter().map(|p| p.source_id.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apex_identity::generate_symbol_id;
    use apex_symbol_table::SymbolDraft;
    use apex_symbol_types::{Position, SymbolKind};

    fn rng(sl: u32, sc: u32, el: u32, ec: u32) -> Range {
        Range::new(Position::new(sl, sc), Position::new(el, ec))
    }

    fn table_with_class(file_uri: &str, class_name: &str) -> (SymbolTable, SymbolId) {
        let mut table = SymbolTable::new(file_uri);
        let id = table.add_symbol(SymbolDraft::new(class_name, SymbolKind::Class)).unwrap();
        (table, id)
    }

    #[test]
    fn add_symbol_table_and_get_symbol() {
        let graph = SymbolGraph::new();
        let (table, id) = table_with_class("file:///A.cls", "A");
        graph.add_symbol_table("file:///A.cls", table);

        assert!(graph.contains_symbol(id.as_str()));
        let sym = graph.get_symbol(id.as_str()).unwrap();
        assert_eq!(sym.name, "A");
    }

    #[test]
    fn find_by_name_and_fqn_are_case_insensitive() {
        let graph = SymbolGraph::new();
        let (table, _) = table_with_class("file:///A.cls", "MyClass");
        graph.add_symbol_table("file:///A.cls", table);

        assert_eq!(graph.find_symbol_by_name("myclass").len(), 1);
        assert_eq!(graph.find_symbol_by_fqn("MYCLASS").len(), 1);
    }

    #[test]
    fn reference_defers_until_target_registered() {
        let graph = SymbolGraph::new();
        let (table_a, id_a) = table_with_class("file:///A.cls", "A");
        graph.add_symbol_table("file:///A.cls", table_a);

        let unresolved_target = generate_symbol_id("B", SymbolKind::Class, &[], "file:///B.cls");
        graph.add_reference(&id_a, &unresolved_target, ReferenceType::TypeReference, rng(1, 0, 1, 1), None);

        assert!(graph.find_references_from(id_a.as_str()).is_empty());

        let (table_b, id_b) = table_with_class("file:///B.cls", "B");
        graph.add_symbol_table("file:///B.cls", table_b);
        assert_eq!(id_b.as_str(), unresolved_target.as_str());

        let refs = graph.find_references_from(id_a.as_str());
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].edge.target_id, id_b.as_str());

        let incoming = graph.find_references_to(id_b.as_str());
        assert_eq!(incoming.len(), 1);
    }

    #[test]
    fn add_reference_is_idempotent() {
        let graph = SymbolGraph::new();
        let (table_a, id_a) = table_with_class("file:///A.cls", "A");
        let (table_b, id_b) = table_with_class("file:///B.cls", "B");
        graph.add_symbol_table("file:///A.cls", table_a);
        graph.add_symbol_table("file:///B.cls", table_b);

        for _ in 0..3 {
            graph.add_reference(&id_a, &id_b, ReferenceType::TypeReference, rng(1, 0, 1, 1), None);
        }
        assert_eq!(graph.find_references_from(id_a.as_str()).len(), 1);
    }

    #[test]
    fn remove_file_leaves_other_files_intact_but_drops_edges() {
        let graph = SymbolGraph::new();
        let (table_a, id_a) = table_with_class("file:///A.cls", "A");
        let (table_b, id_b) = table_with_class("file:///B.cls", "B");
        graph.add_symbol_table("file:///A.cls", table_a);
        graph.add_symbol_table("file:///B.cls", table_b);
        graph.add_reference(&id_b, &id_a, ReferenceType::TypeReference, rng(1, 0, 1, 1), None);

        graph.remove_file("file:///A.cls");

        assert!(graph.get_symbol(id_a.as_str()).is_none());
        assert!(graph.get_symbol(id_b.as_str()).is_some());
        assert!(graph.find_references_from(id_b.as_str()).is_empty());
        assert!(graph.find_references_to(id_a.as_str()).is_empty());

        let deferred = graph.deferred_reference_sources(id_a.as_str());
        assert_eq!(deferred, vec![id_b.as_str().to_string()]);
    }

    #[test]
    fn detects_two_cycle() {
        let graph = SymbolGraph::new();
        let (table_a, id_a) = table_with_class("file:///A.cls", "A");
        let (table_b, id_b) = table_with_class("file:///B.cls", "B");
        graph.add_symbol_table("file:///A.cls", table_a);
        graph.add_symbol_table("file:///B.cls", table_b);

        graph.add_reference(&id_a, &id_b, ReferenceType::TypeReference, rng(1, 0, 1, 1), None);
        graph.add_reference(&id_b, &id_a, ReferenceType::TypeReference, rng(2, 0, 2, 1), None);

        let sccs = graph.detect_circular_dependencies();
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), 2);
    }

    #[test]
    fn lookup_with_context_prefers_same_file() {
        let graph = SymbolGraph::new();
        let (table_a, _) = table_with_class("file:///A.cls", "Shared");
        let (table_b, _) = table_with_class("file:///B.cls", "Shared");
        graph.add_symbol_table("file:///A.cls", table_a);
        graph.add_symbol_table("file:///B.cls", table_b);

        let ctx = ResolutionContext { source_file_uri: Some("file:///B.cls".into()), ..Default::default() };
        let resolved = graph.lookup_symbol_with_context("Shared", Some(&ctx)).unwrap();
        assert!(resolved.is_ambiguous);
        assert_eq!(resolved.confidence, 0.8);
        assert_eq!(resolved.symbol.file_uri, "file:///B.cls");
    }

    #[test]
    fn lookup_unambiguous_has_full_confidence() {
        let graph = SymbolGraph::new();
        let (table_a, _) = table_with_class("file:///A.cls", "Solo");
        graph.add_symbol_table("file:///A.cls", table_a);

        let resolved = graph.lookup_symbol_with_context("Solo", None).unwrap();
        assert_eq!(resolved.confidence, 1.0);
        assert!(!resolved.is_ambiguous);
    }

    #[test]
    fn analyze_dependencies_computes_impact_score() {
        let graph = SymbolGraph::new();
        let (table_a, id_a) = table_with_class("file:///A.cls", "A");
        let (table_b, id_b) = table_with_class("file:///B.cls", "B");
        let (table_c, id_c) = table_with_class("file:///C.cls", "C");
        graph.add_symbol_table("file:///A.cls", table_a);
        graph.add_symbol_table("file:///B.cls", table_b);
        graph.add_symbol_table("file:///C.cls", table_c);

        graph.add_reference(&id_b, &id_a, ReferenceType::TypeReference, rng(1, 0, 1, 1), None);
        graph.add_reference(&id_c, &id_a, ReferenceType::TypeReference, rng(1, 0, 1, 1), None);
        graph.add_reference(&id_a, &id_b, ReferenceType::TypeReference, rng(1, 0, 1, 1), None);

        let analysis = graph.analyze_dependencies(id_a.as_str());
        assert_eq!(analysis.dependents.len(), 2);
        assert_eq!(analysis.dependencies.len(), 1);
        assert_eq!(analysis.impact_score, 2 * 2 + 1);
    }

    #[test]
    fn clear_wipes_everything() {
        let graph = SymbolGraph::new();
        let (table_a, id_a) = table_with_class("file:///A.cls", "A");
        graph.add_symbol_table("file:///A.cls", table_a);
        graph.clear();
        assert!(graph.get_symbol(id_a.as_str()).is_none());
        assert_eq!(graph.file_count(), 0);
    }
}
