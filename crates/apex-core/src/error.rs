//! Unified core error type and its JSON-RPC error-code mapping (§7).
//!
//! Shaped like the teacher's `JsonRpcError{code,message,data}`
//! (`crates/perl-lsp-protocol/src/jsonrpc.rs`) — that crate itself is
//! wire-layer capability negotiation and stays out of this workspace,
//! but its error-object shape is exactly what §7's "User-facing LSP
//! responses map internal errors to JSON-RPC error codes" needs.

use apex_request_queue::RequestQueueError;
use apex_resource_loader::LoadError;
use apex_scheduler::SchedulerError;
use serde::Serialize;

/// `InvalidParams` per the JSON-RPC 2.0 spec.
pub const INVALID_PARAMS: i32 = -32602;
/// LSP's `RequestCancelled` extension code.
pub const REQUEST_CANCELLED: i32 = -32800;
/// Generic `InternalError`.
pub const INTERNAL_ERROR: i32 = -32603;

/// Every error this core can surface to a caller (§7's taxonomy).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApexError {
    /// A malformed [`apex_identity::SymbolId`] string.
    #[error(transparent)]
    MalformedId(#[from] apex_identity::IdentityError),
    /// A `SymbolTable` invariant was violated by caller input.
    #[error(transparent)]
    SymbolTable(#[from] apex_symbol_table::SymbolTableError),
    /// `submit_request`/`add_symbol_table`/etc. was called with no
    /// matching handler or before initialization.
    #[error("handler not registered for request type {0:?}")]
    HandlerNotRegistered(String),
    /// A request queue submission failed.
    #[error(transparent)]
    RequestQueue(#[from] RequestQueueError),
    /// The scheduler itself rejected or failed a task.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    /// The standard-library resource loader failed or was already
    /// initialised.
    #[error(transparent)]
    ResourceLoader(#[from] LoadError),
}

impl ApexError {
    /// Map this error to the JSON-RPC error code a wire adapter should
    /// send back to the client (§7 "Propagation policy").
    pub fn json_rpc_code(&self) -> i32 {
        match self {
            ApexError::MalformedId(_) | ApexError::SymbolTable(_) | ApexError::HandlerNotRegistered(_) => {
                INVALID_PARAMS
            }
            ApexError::Scheduler(SchedulerError::Timeout(_)) | ApexError::Scheduler(SchedulerError::Cancelled) => {
                REQUEST_CANCELLED
            }
            ApexError::RequestQueue(RequestQueueError::Scheduler(SchedulerError::Timeout(_)))
            | ApexError::RequestQueue(RequestQueueError::Scheduler(SchedulerError::Cancelled)) => REQUEST_CANCELLED,
            _ => INTERNAL_ERROR,
        }
    }

    /// Render this error as a JSON-RPC error object ready to serialise
    /// into a response.
    pub fn to_json_rpc(&self) -> JsonRpcError {
        JsonRpcError { code: self.json_rpc_code(), message: self.to_string(), data: None }
    }
}

/// A JSON-RPC 2.0 error object, shaped like the teacher's
/// `perl-lsp-protocol::jsonrpc::JsonRpcError`.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// One of [`INVALID_PARAMS`], [`REQUEST_CANCELLED`], [`INTERNAL_ERROR`].
    pub code: i32,
    /// Human-readable message, derived from the underlying error's `Display`.
    pub message: String,
    /// Additional structured data; unused today, reserved for future detail.
    pub data: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_request_cancelled() {
        let err = ApexError::Scheduler(SchedulerError::Timeout(std::time::Duration::from_millis(5)));
        assert_eq!(err.json_rpc_code(), REQUEST_CANCELLED);
    }

    #[test]
    fn handler_not_registered_maps_to_invalid_params() {
        let err = ApexError::HandlerNotRegistered("textDocument/hover".to_string());
        assert_eq!(err.json_rpc_code(), INVALID_PARAMS);
    }

    #[test]
    fn bounded_buffer_full_maps_to_internal_error() {
        let err = ApexError::Scheduler(SchedulerError::BoundedBufferFull(apex_scheduler::Priority::Normal));
        assert_eq!(err.json_rpc_code(), INTERNAL_ERROR);
    }
}
