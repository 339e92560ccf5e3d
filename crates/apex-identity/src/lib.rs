//! Symbol identity: `SymbolId` construction, parsing, and FQN computation.
//!
//! An id has the shape `<file-uri>:<scope-path>:<kind>:<name>`, where
//! `scope-path` is a dot-joined chain of ancestor scope segments. Each
//! non-block ancestor contributes a `<kind>#<name>` segment (the `#`
//! keeps scope-path segments free of `:`, which is reserved as the
//! top-level field separator — the file-uri itself is the only field
//! allowed to contain `:`, from its `scheme://` prefix); block ancestors
//! contribute a bare `blockN` segment, numbered left-to-right among
//! their scope's sibling blocks. Top-level symbols have an empty
//! scope-path field.

use apex_symbol_types::SymbolKind;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Errors raised by identity operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// `parseSymbolId` was given a string that does not have the
    /// `<file-uri>:<scope-path>:<kind>:<name>` shape.
    #[error("malformed symbol id: {0}")]
    MalformedId(String),
}

/// A symbol identity: `<file-uri>:<scope-path>:<kind>:<name>`.
///
/// Equality and hashing are case-insensitive on the trailing `name`
/// field only; the file uri, scope path, and kind compare case-sensitively,
/// per the core specification's identity rules.
#[derive(Debug, Clone)]
pub struct SymbolId {
    raw: String,
    file_uri: String,
    scope_path: Vec<String>,
    kind: SymbolKind,
    name: String,
}

impl SymbolId {
    /// The file uri this symbol belongs to.
    pub fn file_uri(&self) -> &str {
        &self.file_uri
    }

    /// The ancestor scope-path segments, outermost first.
    pub fn scope_path(&self) -> &[String] {
        &self.scope_path
    }

    /// The symbol's kind.
    pub fn kind(&self) -> SymbolKind {
        self.kind
    }

    /// The symbol's bare name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for SymbolId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

impl<'de> Deserialize<'de> for SymbolId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_symbol_id(&raw)
            .map(|p| generate_symbol_id(&p.name, p.kind, &p.scope_path, &p.file_uri))
            .map_err(serde::de::Error::custom)
    }
}

impl PartialEq for SymbolId {
    fn eq(&self, other: &Self) -> bool {
        self.file_uri == other.file_uri
            && self.scope_path == other.scope_path
            && self.kind == other.kind
            && self.name.eq_ignore_ascii_case(&other.name)
    }
}

impl Eq for SymbolId {}

impl std::hash::Hash for SymbolId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.file_uri.hash(state);
        self.scope_path.hash(state);
        self.kind.hash(state);
        for b in self.name.as_bytes() {
            b.to_ascii_lowercase().hash(state);
        }
    }
}

/// One ancestor scope frame, used to build a scope-path segment.
///
/// For `Block` scopes, `name` is expected to already be the positional
/// `blockN` form (left-to-right among sibling blocks) — the symbol
/// table assigns that counter when the block symbol itself is declared,
/// since only it tracks sibling counts.
#[derive(Debug, Clone)]
pub struct ScopeFrame {
    /// The ancestor scope's kind.
    pub kind: SymbolKind,
    /// The ancestor scope's name (already `blockN` for `Block` scopes).
    pub name: String,
}

fn kind_keyword(kind: SymbolKind) -> &'static str {
    match kind {
        SymbolKind::Class => "class",
        SymbolKind::Interface => "interface",
        SymbolKind::Enum => "enum",
        SymbolKind::Trigger => "trigger",
        SymbolKind::Method => "method",
        SymbolKind::Field => "field",
        SymbolKind::Property => "property",
        SymbolKind::Parameter => "parameter",
        SymbolKind::Variable => "variable",
        SymbolKind::Block => "block",
        SymbolKind::Annotation => "annotation",
    }
}

fn kind_from_keyword(s: &str) -> Option<SymbolKind> {
    Some(match s {
        "class" => SymbolKind::Class,
        "interface" => SymbolKind::Interface,
        "enum" => SymbolKind::Enum,
        "trigger" => SymbolKind::Trigger,
        "method" => SymbolKind::Method,
        "field" => SymbolKind::Field,
        "property" => SymbolKind::Property,
        "parameter" => SymbolKind::Parameter,
        "variable" => SymbolKind::Variable,
        "block" => SymbolKind::Block,
        "annotation" => SymbolKind::Annotation,
        _ => return None,
    })
}

fn format_scope_segment(frame: &ScopeFrame) -> String {
    if frame.kind == SymbolKind::Block {
        frame.name.clone()
    } else {
        format!("{}#{}", kind_keyword(frame.kind), frame.name)
    }
}

/// Build the dot-joined scope-path string from ancestor frames,
/// outermost first.
pub fn build_scope_path(frames: &[ScopeFrame]) -> Vec<String> {
    frames.iter().map(format_scope_segment).collect()
}

/// Deterministically generate a `SymbolId` for a symbol.
///
/// `scope_path` is the already-built chain of ancestor segments
/// (see [`build_scope_path`]); pass an empty slice for a top-level
/// symbol.
pub fn generate_symbol_id(
    name: &str,
    kind: SymbolKind,
    scope_path: &[String],
    file_uri: &str,
) -> SymbolId {
    let file_uri = apex_uri::normalize_uri(file_uri);
    let scope_joined = scope_path.join(".");
    let raw = format!("{file_uri}:{scope_joined}:{}:{name}", kind_keyword(kind));
    SymbolId { raw, file_uri, scope_path: scope_path.to_vec(), kind, name: name.to_string() }
}

/// Parsed components of a `SymbolId`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSymbolId {
    /// The owning file's uri.
    pub file_uri: String,
    /// Ancestor scope-path segments, outermost first.
    pub scope_path: Vec<String>,
    /// The symbol's kind.
    pub kind: SymbolKind,
    /// The symbol's bare name.
    pub name: String,
}

/// Parse a `SymbolId` string back into its components.
///
/// # Errors
///
/// Returns [`IdentityError::MalformedId`] if `id` does not have the
/// `<file-uri>:<scope-path>:<kind>:<name>` shape, or if the kind
/// segment is not a recognised keyword.
pub fn parse_symbol_id(id: &str) -> Result<ParsedSymbolId, IdentityError> {
    let parts: Vec<&str> = id.rsplitn(4, ':').collect();
    if parts.len() != 4 {
        return Err(IdentityError::MalformedId(id.to_string()));
    }
    // rsplitn yields parts in reverse order: [name, kind, scope_path, file_uri]
    let name = parts[0];
    let kind_str = parts[1];
    let scope_path_str = parts[2];
    let file_uri = parts[3];

    if name.is_empty() || file_uri.is_empty() {
        return Err(IdentityError::MalformedId(id.to_string()));
    }

    let kind = kind_from_keyword(kind_str)
        .ok_or_else(|| IdentityError::MalformedId(id.to_string()))?;

    let scope_path = if scope_path_str.is_empty() {
        Vec::new()
    } else {
        scope_path_str.split('.').map(str::to_string).collect()
    };

    Ok(ParsedSymbolId { file_uri: file_uri.to_string(), scope_path, kind, name: name.to_string() })
}

/// Compute a symbol's fully-qualified name.
///
/// `ancestors` lists enclosing type/member frames outermost-first (not
/// including `symbol_name` itself); `Block` ancestors are skipped, since
/// blocks are excluded from `fqn` while still appearing in the
/// scope-path (see the core specification's open question on this).
///
/// If `existing_fqn` is `Some` and non-empty, it is returned unchanged —
/// a symbol that already carries an FQN (e.g. assigned by the parser)
/// keeps it rather than being recomputed.
pub fn compute_fqn(
    symbol_name: &str,
    own_kind: SymbolKind,
    ancestors: &[(String, SymbolKind)],
    existing_fqn: Option<&str>,
) -> String {
    if let Some(existing) = existing_fqn {
        if !existing.is_empty() {
            return existing.to_string();
        }
    }

    let mut segments: Vec<String> = ancestors
        .iter()
        .filter(|(_, kind)| !kind.excluded_from_fqn())
        .map(|(name, _)| name.to_lowercase())
        .collect();

    if !own_kind.excluded_from_fqn() {
        segments.push(symbol_name.to_lowercase());
    }

    segments.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_level_symbol_has_empty_scope_path() {
        let id = generate_symbol_id("Foo", SymbolKind::Class, &[], "file:///Foo.cls");
        assert_eq!(id.scope_path(), &[] as &[String]);
        assert_eq!(id.file_uri(), "file:///Foo.cls");
    }

    #[test]
    fn round_trip_generate_parse() {
        let frames = vec![ScopeFrame { kind: SymbolKind::Class, name: "Outer".into() }];
        let scope_path = build_scope_path(&frames);
        let id = generate_symbol_id("bar", SymbolKind::Method, &scope_path, "file:///Outer.cls");
        let parsed = parse_symbol_id(id.as_str()).unwrap();
        assert_eq!(parsed.file_uri, "file:///Outer.cls");
        assert_eq!(parsed.scope_path, scope_path);
        assert_eq!(parsed.kind, SymbolKind::Method);
        assert_eq!(parsed.name, "bar");
    }

    #[test]
    fn block_segments_use_the_precomputed_positional_name() {
        let frames = vec![
            ScopeFrame { kind: SymbolKind::Method, name: "m1".into() },
            ScopeFrame { kind: SymbolKind::Block, name: "block2".into() },
        ];
        let scope_path = build_scope_path(&frames);
        assert_eq!(scope_path, vec!["method#m1".to_string(), "block2".to_string()]);
    }

    #[test]
    fn malformed_id_rejected() {
        assert!(matches!(parse_symbol_id("not-an-id"), Err(IdentityError::MalformedId(_))));
        assert!(matches!(parse_symbol_id(""), Err(IdentityError::MalformedId(_))));
    }

    #[test]
    fn name_equality_is_case_insensitive_rest_is_not() {
        let a = generate_symbol_id("Foo", SymbolKind::Class, &[], "file:///A.cls");
        let b = generate_symbol_id("FOO", SymbolKind::Class, &[], "file:///A.cls");
        let c = generate_symbol_id("Foo", SymbolKind::Class, &[], "file:///a.cls");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn compute_fqn_excludes_blocks_and_lowercases() {
        let ancestors = vec![("OuterClass".to_string(), SymbolKind::Class)];
        let fqn = compute_fqn("innerMethod", SymbolKind::Method, &ancestors, None);
        assert_eq!(fqn, "outerclass.innermethod");
    }

    #[test]
    fn compute_fqn_preserves_existing() {
        let fqn = compute_fqn("ignored", SymbolKind::Method, &[], Some("already.set"));
        assert_eq!(fqn, "already.set");
    }

    #[test]
    fn compute_fqn_is_idempotent_and_lowercase() {
        let ancestors = vec![("Outer".to_string(), SymbolKind::Class)];
        let fqn = compute_fqn("Method", SymbolKind::Method, &ancestors, None);
        assert_eq!(fqn, fqn.to_lowercase());
        let again = compute_fqn("Method", SymbolKind::Method, &ancestors, Some(&fqn));
        assert_eq!(fqn, again);
    }
}
