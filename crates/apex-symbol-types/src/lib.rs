//! Unified Apex symbol taxonomy for language-server tooling.
//!
//! This crate is the single, authoritative definition of the symbol
//! classification, modifier set, and location types shared by the
//! symbol table, symbol graph, resolver, and scheduler crates that make
//! up the Apex language server core.
//!
//! # Design Goals
//!
//! - **Single source of truth**: symbol classification and location
//!   encoding flow through this crate only.
//! - **Wire-shaped**: every public type derives `Serialize`/`Deserialize`
//!   so the `graph/get` projection (see `apex-core`) can hand these out
//!   directly.
//! - **Zero-cost taxonomy**: `SymbolKind` and `ReferenceType` are `Copy`
//!   enums with inline classification methods.

use serde::{Deserialize, Serialize};

/// Classification of an Apex symbol.
///
/// Mirrors the symbol taxonomy used throughout the parser's
/// `SymbolTable` output: every parsed declaration and every nested
/// lexical block is one of these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SymbolKind {
    /// `class Foo { ... }`
    Class,
    /// `interface Foo { ... }`
    Interface,
    /// `enum Foo { ... }`
    Enum,
    /// `trigger Foo on Account (before insert) { ... }`
    Trigger,
    /// Method declaration, including constructors.
    Method,
    /// Instance or static field.
    Field,
    /// Property (`public String name { get; set; }`).
    Property,
    /// Method parameter.
    Parameter,
    /// Local variable declaration.
    Variable,
    /// A lexical block (method body, if/for/while body, inner scope).
    Block,
    /// Annotation usage site (`@IsTest`, `@AuraEnabled`, ...).
    Annotation,
}

impl SymbolKind {
    /// Whether this kind introduces its own lexical scope.
    #[inline]
    pub const fn introduces_scope(self) -> bool {
        matches!(
            self,
            SymbolKind::Class
                | SymbolKind::Interface
                | SymbolKind::Enum
                | SymbolKind::Trigger
                | SymbolKind::Method
                | SymbolKind::Block
        )
    }

    /// Whether this kind is a type-level declaration (contributes to FQN
    /// as an enclosing segment).
    #[inline]
    pub const fn is_type(self) -> bool {
        matches!(self, SymbolKind::Class | SymbolKind::Interface | SymbolKind::Enum)
    }

    /// Whether this kind is excluded from `fqn` while still contributing
    /// to `scopePath` (see §9 Open Question in the core specification).
    #[inline]
    pub const fn excluded_from_fqn(self) -> bool {
        matches!(self, SymbolKind::Block)
    }
}

/// Visibility modifier for a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    /// No explicit modifier, or `private`.
    Private,
    /// `protected`.
    Protected,
    /// `public`.
    Public,
    /// `global`.
    Global,
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Private
    }
}

/// Full modifier set for a declaration.
///
/// Corresponds to the `modifiers` attribute on `Symbol` in the core
/// specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    /// Declared or implied visibility.
    pub visibility: Visibility,
    /// `static`.
    pub is_static: bool,
    /// `final`.
    pub is_final: bool,
    /// `abstract`.
    pub is_abstract: bool,
    /// `virtual`.
    pub is_virtual: bool,
    /// `override`.
    pub is_override: bool,
    /// Method carries `@IsTest` or is inside a `@IsTest` class.
    pub is_test_method: bool,
    /// `webservice`.
    pub is_web_service: bool,
    /// `transient`.
    pub is_transient: bool,
}

/// A single annotation usage (`@AuraEnabled(cacheable=true)`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Annotation name without the leading `@`, e.g. `"IsTest"`.
    pub name: String,
    /// Raw argument text, one entry per `name=value` pair.
    pub arguments: Vec<String>,
}

/// A source position: 1-based line, 0-based column.
///
/// This matches the core specification's location convention exactly
/// (§3 Entities: `Location`) rather than the LSP wire convention
/// (0-based line) — wire conversion is the external transport layer's
/// job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    /// 1-based line number.
    pub line: u32,
    /// 0-based column offset.
    pub column: u32,
}

impl Position {
    /// Construct a new position.
    #[inline]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// A half-open source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Range {
    /// Inclusive start position.
    pub start: Position,
    /// Exclusive end position.
    pub end: Position,
}

impl Range {
    /// Construct a new range.
    #[inline]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    /// Pack this range into a compact `u64` (four `u16` fields).
    ///
    /// Used by `apex-symbol-graph` for `ReferenceEdge::location`, which
    /// the core specification (§4.3) requires to be a compact
    /// four-`u16` encoding. Coordinates above `u16::MAX` saturate rather
    /// than panic or wrap, since precision loss at that scale is
    /// harmless and recoverable by re-resolving.
    ///
    /// # Examples
    ///
    /// ```
    /// use apex_symbol_types::{Position, Range};
    ///
    /// let r = Range::new(Position::new(10, 4), Position::new(10, 9));
    /// let packed = r.to_compact();
    /// assert_eq!(Range::from_compact(packed), r);
    /// ```
    pub fn to_compact(self) -> u64 {
        let sl = self.start.line.min(u16::MAX as u32) as u64;
        let sc = self.start.column.min(u16::MAX as u32) as u64;
        let el = self.end.line.min(u16::MAX as u32) as u64;
        let ec = self.end.column.min(u16::MAX as u32) as u64;
        (sl << 48) | (sc << 32) | (el << 16) | ec
    }

    /// Rehydrate a range previously packed with [`Range::to_compact`].
    pub fn from_compact(packed: u64) -> Self {
        let sl = ((packed >> 48) & 0xFFFF) as u32;
        let sc = ((packed >> 32) & 0xFFFF) as u32;
        let el = ((packed >> 16) & 0xFFFF) as u32;
        let ec = (packed & 0xFFFF) as u32;
        Range::new(Position::new(sl, sc), Position::new(el, ec))
    }
}

/// Declaration location: the span of the whole construct plus the span
/// of just its identifier (used for hover/highlight precision).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Location {
    /// Range covering the entire declaration.
    pub symbol_range: Range,
    /// Range covering just the declared name.
    pub identifier_range: Range,
}

/// The 25 distinct ways one symbol may reference another.
///
/// Numeric-variant taxonomy from the core specification (§3 Entities:
/// `ReferenceEdge`); the numeric values are not exposed in the public
/// API since `ReferenceType` is consumed purely as a typed enum, but
/// [`ReferenceType::discriminant`] recovers them for wire projections
/// that want a stable integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReferenceType {
    /// Instance or static method invocation.
    MethodCall = 0,
    /// Field read/write through `.`.
    FieldAccess = 1,
    /// Bare type name usage (variable declaration type, cast, `instanceof`).
    TypeReference = 2,
    /// `extends` clause.
    Inheritance = 3,
    /// `implements` clause entry.
    InterfaceImplementation = 4,
    /// `new Foo(...)`.
    ConstructorCall = 5,
    /// `Foo.bar` where `bar` is a static field.
    StaticFieldAccess = 6,
    /// `Foo.bar()` where `bar` is a static method.
    StaticMethodCall = 7,
    /// `this.bar` or `foo.bar` instance field access.
    InstanceFieldAccess = 8,
    /// `foo.bar()` instance method call.
    InstanceMethodCall = 9,
    /// Explicit or implicit namespace import.
    Import = 10,
    /// Namespace-qualified reference (`MyNamespace.Foo`).
    NamespaceReference = 11,
    /// Annotation usage site referencing its declaration.
    AnnotationUsage = 12,
    /// Reference only valid in trigger context (`Trigger.new`, `Trigger.oldMap`).
    TriggerContext = 13,
    /// SOQL query referencing an object/field.
    SoqlQuery = 14,
    /// SOSL query referencing an object/field.
    SoslQuery = 15,
    /// `insert` DML statement.
    DmlInsert = 16,
    /// `update` DML statement.
    DmlUpdate = 17,
    /// `delete` DML statement.
    DmlDelete = 18,
    /// `upsert` DML statement.
    DmlUpsert = 19,
    /// `merge` DML statement.
    DmlMerge = 20,
    /// `undelete` DML statement.
    DmlUndelete = 21,
    /// Local variable read/write.
    VariableReference = 22,
    /// Parameter read/write inside a method body.
    ParameterReference = 23,
    /// Method return-type reference.
    ReturnTypeReference = 24,
}

impl ReferenceType {
    /// Stable numeric discriminant, for wire projections.
    #[inline]
    pub const fn discriminant(self) -> u8 {
        self as u8
    }

    /// Whether this reference type participates in circular-dependency
    /// detection (§4.3 `detectCircularDependencies`).
    #[inline]
    pub const fn participates_in_cycle_detection(self) -> bool {
        matches!(self, ReferenceType::TypeReference | ReferenceType::Inheritance)
    }
}

/// Extra context carried by some reference edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceContext {
    /// Enclosing method name at the use site, if any.
    pub method_name: Option<String>,
    /// Argument position, for call-site references.
    pub parameter_index: Option<u16>,
    /// Whether the use site is a static access.
    pub is_static: Option<bool>,
    /// Namespace in effect at the use site.
    pub namespace: Option<String>,
}

/// Extra attributes for `Class`/`Interface`/`Enum` symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAttributes {
    /// `extends` target FQN, if declared.
    pub superclass: Option<String>,
    /// `implements` target FQNs.
    pub interfaces: Vec<String>,
}

/// A method parameter declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// Parameter name.
    pub name: String,
    /// Declared type name (unresolved, as written in source).
    pub type_name: String,
}

/// Extra attributes for `Method` symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodAttributes {
    /// Declared parameters, in order.
    pub parameters: Vec<ParameterInfo>,
    /// Declared return type name (`"void"` for no return value).
    pub return_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_kind_classification() {
        assert!(SymbolKind::Class.introduces_scope());
        assert!(SymbolKind::Method.introduces_scope());
        assert!(!SymbolKind::Field.introduces_scope());

        assert!(SymbolKind::Class.is_type());
        assert!(!SymbolKind::Method.is_type());

        assert!(SymbolKind::Block.excluded_from_fqn());
        assert!(!SymbolKind::Method.excluded_from_fqn());
    }

    #[test]
    fn visibility_defaults_to_private() {
        assert_eq!(Visibility::default(), Visibility::Private);
        assert_eq!(Modifiers::default().visibility, Visibility::Private);
    }

    #[test]
    fn compact_location_round_trips() {
        let r = Range::new(Position::new(1, 0), Position::new(3, 12));
        let packed = r.to_compact();
        assert_eq!(Range::from_compact(packed), r);
    }

    #[test]
    fn compact_location_saturates_above_u16_max() {
        let r = Range::new(Position::new(100_000, 0), Position::new(0, 0));
        let packed = r.to_compact();
        let back = Range::from_compact(packed);
        assert_eq!(back.start.line, u16::MAX as u32);
    }

    #[test]
    fn reference_type_discriminants_are_stable() {
        assert_eq!(ReferenceType::MethodCall.discriminant(), 0);
        assert_eq!(ReferenceType::ReturnTypeReference.discriminant(), 24);
    }

    #[test]
    fn cycle_detection_participation() {
        assert!(ReferenceType::TypeReference.participates_in_cycle_detection());
        assert!(ReferenceType::Inheritance.participates_in_cycle_detection());
        assert!(!ReferenceType::MethodCall.participates_in_cycle_detection());
    }

    proptest::proptest! {
        #[test]
        fn compact_location_round_trips_prop(
            sl in 0u32..=65535, sc in 0u32..=65535,
            el in 0u32..=65535, ec in 0u32..=65535,
        ) {
            let r = Range::new(Position::new(sl, sc), Position::new(el, ec));
            proptest::prop_assert_eq!(Range::from_compact(r.to_compact()), r);
        }
    }
}
