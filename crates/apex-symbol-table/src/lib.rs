//! Per-file symbol table: the authoritative store of parsed symbols,
//! the scope hierarchy, and every reference site found in one file.
//!
//! One `SymbolTable` is built per parsed file and handed to
//! `apex-symbol-graph::SymbolGraph::add_symbol` wholesale; the graph
//! never stores symbol data of its own, only an index pointing back
//! here (§3/§4.3 of the core specification).

use apex_identity::{build_scope_path, compute_fqn, generate_symbol_id, ScopeFrame};
use apex_symbol_types::{
    Annotation, Location, MethodAttributes, Modifiers, Range, ReferenceContext, ReferenceType,
    SymbolKind, TypeAttributes,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use apex_identity::SymbolId;

/// Errors raised by [`SymbolTable`] mutation operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolTableError {
    /// A non-overload duplicate name was declared twice in the same scope.
    #[error("duplicate symbol `{0}` in scope")]
    DuplicateSymbol(String),
    /// `exitScope` was called with no open scope, or a scope kind that
    /// does not introduce its own lexical scope was passed to
    /// `enterScope`.
    #[error("unbalanced scope nesting")]
    UnbalancedScope,
}

/// A fully materialised symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    /// This symbol's identity.
    pub id: SymbolId,
    /// Bare declared name.
    pub name: String,
    /// Symbol classification.
    pub kind: SymbolKind,
    /// Owning file's uri.
    pub file_uri: String,
    /// Lowercased dot-path fully-qualified name.
    pub fqn: String,
    /// Enclosing symbol's id, or `None` for a top-level symbol.
    pub parent_id: Option<SymbolId>,
    /// Declaration and identifier source ranges.
    pub location: Location,
    /// Declared modifiers.
    pub modifiers: Modifiers,
    /// Annotations attached to the declaration.
    pub annotations: Vec<Annotation>,
    /// Namespace in effect at the declaration site, if any.
    pub namespace: Option<String>,
    /// `extends`/`implements` info, present for `Class`/`Interface`/`Enum`.
    pub type_attributes: Option<TypeAttributes>,
    /// Parameters and return type, present for `Method`.
    pub method_attributes: Option<MethodAttributes>,
}

/// Unvalidated symbol data supplied by the caller to [`SymbolTable::add_symbol`].
#[derive(Debug, Clone, Default)]
pub struct SymbolDraft {
    /// Bare declared name.
    pub name: String,
    /// Symbol classification.
    pub kind: Option<SymbolKind>,
    /// Declaration and identifier source ranges.
    pub location: Location,
    /// Declared modifiers.
    pub modifiers: Modifiers,
    /// Annotations attached to the declaration.
    pub annotations: Vec<Annotation>,
    /// Namespace in effect at the declaration site, if any.
    pub namespace: Option<String>,
    /// `extends`/`implements` info, for `Class`/`Interface`/`Enum` drafts.
    pub type_attributes: Option<TypeAttributes>,
    /// Parameters and return type, for `Method` drafts.
    pub method_attributes: Option<MethodAttributes>,
    /// An FQN already computed upstream (e.g. by the parser); when set
    /// and non-empty it is preserved verbatim rather than recomputed.
    pub existing_fqn: Option<String>,
}

impl SymbolDraft {
    /// Start building a draft for the given name and kind.
    pub fn new(name: impl Into<String>, kind: SymbolKind) -> Self {
        Self { name: name.into(), kind: Some(kind), ..Default::default() }
    }
}

/// A single name-usage site recorded by the parser listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeReference {
    /// The name as written at the use site (possibly dotted/qualified).
    pub name: String,
    /// How this use site relates to its target.
    pub reference_type: ReferenceType,
    /// Source location of the use site.
    pub location: Range,
    /// Extra context (enclosing method, static-ness, namespace, ...).
    pub context: ReferenceContext,
}

/// Classification of a scope node (distinct from [`SymbolKind`]: every
/// scope but the file root corresponds to a scope-introducing symbol).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// The whole-file root scope, parent of every top-level symbol.
    File,
    /// `class` body.
    Class,
    /// `interface` body.
    Interface,
    /// `enum` body.
    Enum,
    /// `trigger` body.
    Trigger,
    /// `method` body.
    Method,
    /// A nested lexical block (`if`/`for`/`while`/bare block).
    Block,
}

fn scope_kind_for(kind: SymbolKind) -> Option<ScopeKind> {
    Some(match kind {
        SymbolKind::Class => ScopeKind::Class,
        SymbolKind::Interface => ScopeKind::Interface,
        SymbolKind::Enum => ScopeKind::Enum,
        SymbolKind::Trigger => ScopeKind::Trigger,
        SymbolKind::Method => ScopeKind::Method,
        SymbolKind::Block => ScopeKind::Block,
        _ => return None,
    })
}

/// One node in a file's scope tree.
#[derive(Debug, Clone)]
pub struct Scope {
    /// Scope id, unique within this table.
    pub id: usize,
    /// Parent scope id, `None` only for the file root.
    pub parent: Option<usize>,
    /// What kind of construct introduced this scope.
    pub kind: ScopeKind,
    /// The introducing symbol's name (empty for the file root and for
    /// anonymous blocks).
    pub name: String,
    /// Source range this scope covers.
    pub range: Range,
    /// The symbol this scope belongs to (`None` for the file root).
    pub owner_id: Option<SymbolId>,
    /// Ids of symbols declared directly in this scope.
    pub symbol_ids: Vec<SymbolId>,
}

/// Per-file authoritative store of symbols, scopes, and reference sites.
pub struct SymbolTable {
    file_uri: String,
    symbols: Vec<Symbol>,
    by_name: HashMap<String, Vec<usize>>,
    by_id: HashMap<String, Vec<usize>>,
    scopes: Vec<Scope>,
    scope_stack: Vec<usize>,
    scope_frames: Vec<ScopeFrame>,
    block_counters: HashMap<usize, u32>,
    references: Vec<TypeReference>,
}

impl SymbolTable {
    /// Create an empty table for the given file, with just the file-root
    /// scope.
    pub fn new(file_uri: impl Into<String>) -> Self {
        let file_uri = file_uri.into();
        let root = Scope {
            id: 0,
            parent: None,
            kind: ScopeKind::File,
            name: String::new(),
            range: Range::default(),
            owner_id: None,
            symbol_ids: Vec::new(),
        };
        Self {
            file_uri,
            symbols: Vec::new(),
            by_name: HashMap::new(),
            by_id: HashMap::new(),
            scopes: vec![root],
            scope_stack: vec![0],
            scope_frames: Vec::new(),
            block_counters: HashMap::new(),
            references: Vec::new(),
        }
    }

    /// This table's file uri.
    pub fn file_uri(&self) -> &str {
        &self.file_uri
    }

    fn current_scope_id(&self) -> usize {
        *self.scope_stack.last().expect("scope stack is never empty")
    }

    fn ancestors_for_fqn(&self) -> Vec<(String, SymbolKind)> {
        self.scope_frames
            .iter()
            .filter_map(|f| {
                if f.kind == SymbolKind::Block {
                    None
                } else {
                    Some((f.name.clone(), f.kind))
                }
            })
            .collect()
    }

    /// Insert a new symbol into the current scope.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolTableError::DuplicateSymbol`] if a non-overloaded
    /// duplicate name already exists in the current scope.
    pub fn add_symbol(&mut self, mut draft: SymbolDraft) -> Result<SymbolId, SymbolTableError> {
        let kind = draft.kind.unwrap_or(SymbolKind::Variable);
        let current_scope = self.current_scope_id();

        if kind == SymbolKind::Block {
            // Blocks are identified positionally, not by name: number them
            // left-to-right among siblings of the currently open scope.
            let counter = self.block_counters.entry(current_scope).or_insert(0);
            *counter += 1;
            draft.name = format!("block{counter}");
        } else if kind != SymbolKind::Method {
            let dup = self.scopes[current_scope]
                .symbol_ids
                .iter()
                .any(|existing| existing.name().eq_ignore_ascii_case(&draft.name));
            if dup {
                return Err(SymbolTableError::DuplicateSymbol(draft.name));
            }
        }

        let scope_path = build_scope_path(&self.scope_frames);
        let id = generate_symbol_id(&draft.name, kind, &scope_path, &self.file_uri);

        let parent_id = self.scopes[current_scope].owner_id.clone();
        let ancestors = self.ancestors_for_fqn();
        let fqn = compute_fqn(&draft.name, kind, &ancestors, draft.existing_fqn.as_deref());

        let symbol = Symbol {
            id: id.clone(),
            name: draft.name,
            kind,
            file_uri: self.file_uri.clone(),
            fqn,
            parent_id,
            location: draft.location,
            modifiers: draft.modifiers,
            annotations: draft.annotations,
            namespace: draft.namespace,
            type_attributes: draft.type_attributes,
            method_attributes: draft.method_attributes,
        };

        let idx = self.symbols.len();
        self.by_name.entry(symbol.name.to_lowercase()).or_default().push(idx);
        self.by_id.entry(id.as_str().to_string()).or_default().push(idx);
        self.scopes[current_scope].symbol_ids.push(id.clone());
        self.symbols.push(symbol);

        Ok(id)
    }

    /// Open a new lexical scope owned by `owner_id`, whose declaration
    /// was just added via [`SymbolTable::add_symbol`].
    ///
    /// # Errors
    ///
    /// Returns [`SymbolTableError::UnbalancedScope`] if `kind` does not
    /// introduce a scope.
    pub fn enter_scope(
        &mut self,
        owner_id: SymbolId,
        kind: SymbolKind,
        range: Range,
    ) -> Result<usize, SymbolTableError> {
        let scope_kind = scope_kind_for(kind).ok_or(SymbolTableError::UnbalancedScope)?;
        let parent = self.current_scope_id();

        let name = owner_id.name().to_string();
        let scope_id = self.scopes.len();
        self.scopes.push(Scope {
            id: scope_id,
            parent: Some(parent),
            kind: scope_kind,
            name: name.clone(),
            range,
            owner_id: Some(owner_id),
            symbol_ids: Vec::new(),
        });
        self.scope_stack.push(scope_id);
        self.scope_frames.push(ScopeFrame { kind, name });
        Ok(scope_id)
    }

    /// Close the innermost open scope.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolTableError::UnbalancedScope`] if only the file
    /// root scope remains open.
    pub fn exit_scope(&mut self) -> Result<(), SymbolTableError> {
        if self.scope_stack.len() <= 1 {
            return Err(SymbolTableError::UnbalancedScope);
        }
        self.scope_stack.pop();
        self.scope_frames.pop();
        Ok(())
    }

    /// Case-insensitive lookup walking outward through the currently
    /// open scope chain (innermost first).
    pub fn lookup(&self, name: &str) -> Vec<&Symbol> {
        let mut results = Vec::new();
        for &scope_id in self.scope_stack.iter().rev() {
            for sid in &self.scopes[scope_id].symbol_ids {
                if sid.name().eq_ignore_ascii_case(name) {
                    if let Some(sym) = self.symbol_by_raw_id(sid.as_str()) {
                        results.push(sym);
                    }
                }
            }
        }
        results
    }

    fn symbol_by_raw_id(&self, raw: &str) -> Option<&Symbol> {
        self.by_id.get(raw).and_then(|idxs| idxs.first()).map(|&i| &self.symbols[i])
    }

    /// All symbols parsed from this file, in declaration order.
    pub fn get_all_symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// All reference sites recorded in this file.
    pub fn get_all_references(&self) -> &[TypeReference] {
        &self.references
    }

    /// All symbols matching a given id (overloaded methods share an id).
    pub fn get_all_symbols_by_id(&self, id: &str) -> Vec<&Symbol> {
        self.by_id.get(id).map(|idxs| idxs.iter().map(|&i| &self.symbols[i]).collect()).unwrap_or_default()
    }

    /// All symbols with a given bare name, case-insensitive.
    pub fn get_symbols_by_name(&self, name: &str) -> Vec<&Symbol> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|idxs| idxs.iter().map(|&i| &self.symbols[i]).collect())
            .unwrap_or_default()
    }

    /// Record a use-site emitted by the parser listener.
    pub fn add_reference_site(&mut self, reference: TypeReference) {
        self.references.push(reference);
    }

    /// The scope chain containing `position`, root-first, innermost
    /// last. Used by the resolver to decide whether a use-site resolves
    /// to a local variable (shadowing an outer member) or an enclosing
    /// member.
    pub fn get_scope_hierarchy(&self, position: apex_symbol_types::Position) -> Vec<&Scope> {
        let contains = |r: &Range, p: apex_symbol_types::Position| -> bool {
            (p.line > r.start.line || (p.line == r.start.line && p.column >= r.start.column))
                && (p.line < r.end.line || (p.line == r.end.line && p.column <= r.end.column))
        };

        // Find the deepest scope whose range contains `position`.
        let mut leaf: Option<usize> = None;
        let mut leaf_depth = 0usize;
        for scope in &self.scopes {
            if scope.id == 0 || contains(&scope.range, position) {
                let depth = self.depth_of(scope.id);
                if leaf.is_none() || depth >= leaf_depth {
                    leaf = Some(scope.id);
                    leaf_depth = depth;
                }
            }
        }

        let mut chain = Vec::new();
        let mut cur = leaf;
        while let Some(id) = cur {
            chain.push(&self.scopes[id]);
            cur = self.scopes[id].parent;
        }
        chain.reverse();
        chain
    }

    fn depth_of(&self, mut scope_id: usize) -> usize {
        let mut depth = 0;
        while let Some(parent) = self.scopes[scope_id].parent {
            depth += 1;
            scope_id = parent;
        }
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apex_symbol_types::Position;

    fn rng(sl: u32, sc: u32, el: u32, ec: u32) -> Range {
        Range::new(Position::new(sl, sc), Position::new(el, ec))
    }

    #[test]
    fn add_top_level_class() {
        let mut table = SymbolTable::new("file:///Foo.cls");
        let id = table.add_symbol(SymbolDraft::new("Foo", SymbolKind::Class)).unwrap();
        assert_eq!(id.scope_path(), &[] as &[String]);
        assert_eq!(table.get_all_symbols().len(), 1);
        assert_eq!(table.get_all_symbols()[0].fqn, "foo");
    }

    #[test]
    fn duplicate_field_rejected_but_overloaded_methods_allowed() {
        let mut table = SymbolTable::new("file:///Foo.cls");
        let class_id = table.add_symbol(SymbolDraft::new("Foo", SymbolKind::Class)).unwrap();
        table.enter_scope(class_id, SymbolKind::Class, rng(1, 0, 10, 1)).unwrap();

        table.add_symbol(SymbolDraft::new("bar", SymbolKind::Field)).unwrap();
        let dup = table.add_symbol(SymbolDraft::new("bar", SymbolKind::Field));
        assert!(matches!(dup, Err(SymbolTableError::DuplicateSymbol(_))));

        table.add_symbol(SymbolDraft::new("doIt", SymbolKind::Method)).unwrap();
        let overload = table.add_symbol(SymbolDraft::new("doIt", SymbolKind::Method));
        assert!(overload.is_ok());
    }

    #[test]
    fn nested_class_method_fqn() {
        // public class OuterClass { public class InnerClass { public String innerMethod() {} } }
        let mut table = SymbolTable::new("file:///OuterClass.cls");
        let outer = table.add_symbol(SymbolDraft::new("OuterClass", SymbolKind::Class)).unwrap();
        table.enter_scope(outer, SymbolKind::Class, rng(1, 0, 1, 100)).unwrap();

        let inner = table.add_symbol(SymbolDraft::new("InnerClass", SymbolKind::Class)).unwrap();
        table.enter_scope(inner, SymbolKind::Class, rng(1, 10, 1, 90)).unwrap();

        let method = table.add_symbol(SymbolDraft::new("innerMethod", SymbolKind::Method)).unwrap();

        let inner_sym = table.symbol_by_raw_id(inner.as_str()).unwrap();
        let method_sym = table.symbol_by_raw_id(method.as_str()).unwrap();
        assert_eq!(inner_sym.fqn, "outerclass.innerclass");
        assert_eq!(method_sym.fqn, "outerclass.innerclass.innermethod");
    }

    #[test]
    fn lookup_walks_outward_through_open_scopes() {
        let mut table = SymbolTable::new("file:///Foo.cls");
        let class_id = table.add_symbol(SymbolDraft::new("Foo", SymbolKind::Class)).unwrap();
        table.enter_scope(class_id, SymbolKind::Class, rng(1, 0, 10, 1)).unwrap();
        table.add_symbol(SymbolDraft::new("a", SymbolKind::Field)).unwrap();

        let method_id = table.add_symbol(SymbolDraft::new("m1", SymbolKind::Method)).unwrap();
        table.enter_scope(method_id, SymbolKind::Method, rng(2, 0, 5, 1)).unwrap();

        assert_eq!(table.lookup("a").len(), 1);
        assert_eq!(table.lookup("a")[0].kind, SymbolKind::Field);
    }

    #[test]
    fn block_scopes_are_numbered() {
        let mut table = SymbolTable::new("file:///Foo.cls");
        let class_id = table.add_symbol(SymbolDraft::new("Foo", SymbolKind::Class)).unwrap();
        table.enter_scope(class_id, SymbolKind::Class, rng(1, 0, 10, 1)).unwrap();
        let method_id = table.add_symbol(SymbolDraft::new("m1", SymbolKind::Method)).unwrap();
        let method_scope = table.enter_scope(method_id, SymbolKind::Method, rng(2, 0, 9, 1)).unwrap();

        let block1_owner = table.add_symbol(SymbolDraft::new("m1", SymbolKind::Block)).unwrap();
        table.enter_scope(block1_owner.clone(), SymbolKind::Block, rng(3, 0, 4, 1)).unwrap();
        assert!(block1_owner.as_str().contains("block1"));
        table.exit_scope().unwrap();

        let block2_owner = table.add_symbol(SymbolDraft::new("m1", SymbolKind::Block)).unwrap();
        assert!(block2_owner.as_str().contains("block2"));

        let _ = method_scope;
    }

    #[test]
    fn exit_scope_on_root_is_unbalanced() {
        let mut table = SymbolTable::new("file:///Foo.cls");
        assert!(matches!(table.exit_scope(), Err(SymbolTableError::UnbalancedScope)));
    }

    #[test]
    fn scope_hierarchy_is_innermost_last() {
        let mut table = SymbolTable::new("file:///Foo.cls");
        let class_id = table.add_symbol(SymbolDraft::new("Foo", SymbolKind::Class)).unwrap();
        table.enter_scope(class_id, SymbolKind::Class, rng(1, 0, 20, 1)).unwrap();
        let method_id = table.add_symbol(SymbolDraft::new("m1", SymbolKind::Method)).unwrap();
        table.enter_scope(method_id, SymbolKind::Method, rng(2, 0, 10, 1)).unwrap();

        let hierarchy = table.get_scope_hierarchy(Position::new(5, 0));
        assert_eq!(hierarchy.len(), 3);
        assert_eq!(hierarchy[0].kind, ScopeKind::File);
        assert_eq!(hierarchy[2].kind, ScopeKind::Method);
    }
}
