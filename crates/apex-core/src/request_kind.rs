//! The LSP-request sum type described in Design Notes §9: "Dynamic 'any'
//! parameters in handlers become a sum type `RequestKind` with one
//! variant per LSP method; `params` is the typed payload for that
//! variant." Variants and their priority/timeout come straight from the
//! §6 request table; param shapes stop at what the core itself reads
//! (uri/position/query) since full LSP parameter schemas are the wire
//! layer's concern (§1 Non-goals).

use apex_scheduler::Priority;
use apex_symbol_types::Position;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A document-and-position use site, the common shape behind hover,
/// completion, definition, and references requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPositionParams {
    /// The document's uri.
    pub uri: String,
    /// Cursor position within the document.
    pub position: Position,
}

/// A whole-document request with no specific position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentParams {
    /// The document's uri.
    pub uri: String,
}

/// `workspace/symbol`'s free-text query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceSymbolParams {
    /// The search string.
    pub query: String,
}

/// `workspace/batch-load`'s file list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchLoadParams {
    /// Files to parse and register, in submission order.
    pub file_uris: Vec<String>,
}

/// `validator/run-all` takes no parameters of its own.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorRunAllParams;

/// One LSP request kind, carrying its typed parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "params")]
pub enum RequestKind {
    /// `textDocument/hover`.
    Hover(DocumentPositionParams),
    /// `textDocument/completion`.
    Completion(DocumentPositionParams),
    /// `textDocument/signatureHelp`.
    SignatureHelp(DocumentPositionParams),
    /// `textDocument/definition`.
    Definition(DocumentPositionParams),
    /// `textDocument/typeDefinition`.
    TypeDefinition(DocumentPositionParams),
    /// `textDocument/implementation`.
    Implementation(DocumentPositionParams),
    /// `textDocument/documentSymbol`.
    DocumentSymbol(DocumentParams),
    /// `textDocument/foldingRange`.
    FoldingRange(DocumentParams),
    /// `textDocument/codeLens`.
    CodeLens(DocumentParams),
    /// `textDocument/references`.
    References(DocumentPositionParams),
    /// `workspace/symbol`.
    WorkspaceSymbol(WorkspaceSymbolParams),
    /// `workspace/batch-load`.
    WorkspaceBatchLoad(BatchLoadParams),
    /// `validator/run-all`.
    ValidatorRunAll(ValidatorRunAllParams),
}

impl RequestKind {
    /// The request-type string used as the scheduler's metrics breakdown
    /// key, matching LSP method-name conventions.
    pub const fn request_type(&self) -> &'static str {
        match self {
            RequestKind::Hover(_) => "textDocument/hover",
            RequestKind::Completion(_) => "textDocument/completion",
            RequestKind::SignatureHelp(_) => "textDocument/signatureHelp",
            RequestKind::Definition(_) => "textDocument/definition",
            RequestKind::TypeDefinition(_) => "textDocument/typeDefinition",
            RequestKind::Implementation(_) => "textDocument/implementation",
            RequestKind::DocumentSymbol(_) => "textDocument/documentSymbol",
            RequestKind::FoldingRange(_) => "textDocument/foldingRange",
            RequestKind::CodeLens(_) => "textDocument/codeLens",
            RequestKind::References(_) => "textDocument/references",
            RequestKind::WorkspaceSymbol(_) => "workspace/symbol",
            RequestKind::WorkspaceBatchLoad(_) => "workspace/batch-load",
            RequestKind::ValidatorRunAll(_) => "validator/run-all",
        }
    }

    /// This request kind's scheduler priority, from the §6 table.
    pub const fn priority(&self) -> Priority {
        match self {
            RequestKind::Hover(_) | RequestKind::Completion(_) | RequestKind::SignatureHelp(_) => {
                Priority::Immediate
            }
            RequestKind::Definition(_) | RequestKind::TypeDefinition(_) | RequestKind::Implementation(_) => {
                Priority::High
            }
            RequestKind::DocumentSymbol(_) | RequestKind::FoldingRange(_) | RequestKind::CodeLens(_) => {
                Priority::Normal
            }
            RequestKind::References(_) | RequestKind::WorkspaceSymbol(_) => Priority::Low,
            RequestKind::WorkspaceBatchLoad(_) | RequestKind::ValidatorRunAll(_) => Priority::Background,
        }
    }

    /// This variant's parameters, re-serialised without the `kind` tag
    /// so a handler registered under [`RequestKind::request_type`] can
    /// deserialise them directly.
    pub fn params_json(&self) -> serde_json::Value {
        match self {
            RequestKind::Hover(p)
            | RequestKind::Completion(p)
            | RequestKind::SignatureHelp(p)
            | RequestKind::Definition(p)
            | RequestKind::TypeDefinition(p)
            | RequestKind::Implementation(p)
            | RequestKind::References(p) => {
                serde_json::to_value(p).expect("DocumentPositionParams always serialises")
            }
            RequestKind::DocumentSymbol(p) | RequestKind::FoldingRange(p) | RequestKind::CodeLens(p) => {
                serde_json::to_value(p).expect("DocumentParams always serialises")
            }
            RequestKind::WorkspaceSymbol(p) => {
                serde_json::to_value(p).expect("WorkspaceSymbolParams always serialises")
            }
            RequestKind::WorkspaceBatchLoad(p) => {
                serde_json::to_value(p).expect("BatchLoadParams always serialises")
            }
            RequestKind::ValidatorRunAll(p) => {
                serde_json::to_value(p).expect("ValidatorRunAllParams always serialises")
            }
        }
    }

    /// This request kind's default timeout, from the §6 table. `None`
    /// for the `Background` row, which has no deadline.
    pub const fn default_timeout(&self) -> Option<Duration> {
        match self {
            RequestKind::Hover(_) | RequestKind::Completion(_) | RequestKind::SignatureHelp(_) => {
                Some(Duration::from_millis(300))
            }
            RequestKind::Definition(_) | RequestKind::TypeDefinition(_) | RequestKind::Implementation(_) => {
                Some(Duration::from_secs(1))
            }
            RequestKind::DocumentSymbol(_) | RequestKind::FoldingRange(_) | RequestKind::CodeLens(_) => {
                Some(Duration::from_secs(2))
            }
            RequestKind::References(_) | RequestKind::WorkspaceSymbol(_) => Some(Duration::from_secs(5)),
            RequestKind::WorkspaceBatchLoad(_) | RequestKind::ValidatorRunAll(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hover_is_immediate_with_a_300ms_timeout() {
        let kind = RequestKind::Hover(DocumentPositionParams { uri: "file:///A.cls".into(), position: Position::new(1, 0) });
        assert_eq!(kind.priority(), Priority::Immediate);
        assert_eq!(kind.default_timeout(), Some(Duration::from_millis(300)));
        assert_eq!(kind.request_type(), "textDocument/hover");
    }

    #[test]
    fn batch_load_is_background_with_no_timeout() {
        let kind = RequestKind::WorkspaceBatchLoad(BatchLoadParams { file_uris: vec![] });
        assert_eq!(kind.priority(), Priority::Background);
        assert_eq!(kind.default_timeout(), None);
    }
}
