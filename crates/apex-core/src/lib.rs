//! Facade wiring the [`apex_symbol_graph::SymbolGraph`], [`apex_scheduler::Scheduler`],
//! [`apex_request_queue::RequestQueue`], and [`apex_settings::SettingsHandle`] into one
//! Apex language server core (§2 System Overview). This is the crate an LSP
//! wire adapter depends on; it owns no transport and does no parsing —
//! those arrive pre-built (`SymbolTable`s) or are consumed as narrow
//! collaborator interfaces (§6).

#![deny(unsafe_code)]
#![deny(unreachable_pub)]
#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]
#![warn(rust_2018_idioms)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc, clippy::missing_panics_doc)]

mod error;
mod find_missing_artifact;
mod graph_projection;
mod request_kind;

pub use error::{ApexError, JsonRpcError, INTERNAL_ERROR, INVALID_PARAMS, REQUEST_CANCELLED};
pub use find_missing_artifact::{
    ArtifactOrigin, FindMissingArtifactParams, FindMissingArtifactResult, SearchMode,
};
pub use graph_projection::{GraphEdgeView, GraphMetadata, GraphNodeView, GraphProjection};
pub use request_kind::{
    BatchLoadParams, DocumentParams, DocumentPositionParams, RequestKind, ValidatorRunAllParams,
    WorkspaceSymbolParams,
};

pub use apex_settings::{ApexSettings, SettingsHandle};

use apex_request_queue::{HandlerSpec, RequestQueue, SubmitOptions};
use apex_resource_loader::{DirectoryStatistics, LoadError, ResourceLoader};
use apex_scheduler::{CancellationToken, Priority, Scheduler};
use apex_symbol_graph::SymbolGraph;
use apex_symbol_table::{Symbol, SymbolTable};
use apex_symbol_types::{Position, Range};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A caller-supplied rule that inspects the graph and reports its own
/// findings. Registered with [`ApexCore::register_validator`]; run by
/// `validator/run-all` (§1 Non-goals: "Validators are pluggable
/// consumers of the graph" — this core only schedules and collects,
/// it implements none itself).
pub type ValidatorFn = Arc<dyn Fn(&SymbolGraph) -> serde_json::Value + Send + Sync>;

/// A rehydrated, symbol-attached reference, wire-shaped for
/// `textDocument/references` responses.
#[derive(Debug, Clone, Serialize)]
struct ReferenceView {
    source: Option<Symbol>,
    target: Option<Symbol>,
    reference_type: apex_symbol_types::ReferenceType,
    location: Range,
}

fn range_contains(range: Range, position: Position) -> bool {
    let start = (range.start.line, range.start.column);
    let end = (range.end.line, range.end.column);
    let pos = (position.line, position.column);
    pos >= start && pos < end
}

fn symbol_at_position(graph: &SymbolGraph, uri: &str, position: Position) -> Option<Symbol> {
    graph.get_symbols_in_file(uri).into_iter().find(|symbol| range_contains(symbol.location.identifier_range, position))
}

fn position_class(graph: &SymbolGraph, params: DocumentPositionParams) -> serde_json::Value {
    let found = symbol_at_position(graph, &params.uri, params.position);
    serde_json::to_value(found).expect("Option<Symbol> always serialises")
}

fn document_class(graph: &SymbolGraph, params: DocumentParams) -> serde_json::Value {
    serde_json::to_value(graph.get_symbols_in_file(&params.uri)).expect("Vec<Symbol> always serialises")
}

fn references_class(graph: &SymbolGraph, params: DocumentPositionParams) -> serde_json::Value {
    let Some(symbol) = symbol_at_position(graph, &params.uri, params.position) else {
        return serde_json::Value::Array(Vec::new());
    };
    let views: Vec<ReferenceView> = graph
        .find_references_to(symbol.id.as_str())
        .into_iter()
        .map(|r| ReferenceView {
            source: r.source,
            target: r.target,
            reference_type: r.edge.reference_type,
            location: r.edge.rehydrated_location(),
        })
        .collect();
    serde_json::to_value(views).expect("Vec<ReferenceView> always serialises")
}

fn workspace_symbol_class(graph: &SymbolGraph, params: WorkspaceSymbolParams) -> serde_json::Value {
    serde_json::to_value(graph.find_symbol_by_name(&params.query)).expect("Vec<Symbol> always serialises")
}

fn batch_load_class(_graph: &SymbolGraph, params: BatchLoadParams) -> serde_json::Value {
    serde_json::json!({ "accepted": true, "count": params.file_uris.len() })
}

/// Build a handler whose params and result are a plain synchronous
/// function of the graph — every `RequestKind` handler this core
/// registers fits that shape, since actual parsing/validation stays
/// with the caller (§1 Non-goals).
fn handler<Params, F>(
    request_type: &'static str,
    priority: Priority,
    timeout: Option<Duration>,
    f: F,
) -> HandlerSpec<Arc<SymbolGraph>>
where
    Params: serde::de::DeserializeOwned + 'static,
    F: Fn(&SymbolGraph, Params) -> serde_json::Value + Send + Sync + 'static,
{
    HandlerSpec {
        request_type: request_type.to_string(),
        priority,
        timeout,
        max_retries: 0,
        process: Arc::new(move |value, graph, _ctx| {
            let params: Params = serde_json::from_value(value)
                .expect("RequestKind params were serialised by this crate and always round-trip");
            let result = f(&graph, params);
            Box::pin(async move { Ok(result) })
        }),
    }
}

/// The Apex language server core: a symbol graph, a scheduler driving
/// all access to it, a request queue binding LSP request kinds to
/// handlers, and the settings/observability glue that reacts to
/// configuration changes (§2).
pub struct ApexCore {
    graph: Arc<SymbolGraph>,
    scheduler: Arc<Scheduler>,
    settings: Arc<SettingsHandle>,
    resource_loader: Arc<ResourceLoader>,
    queue: RequestQueue<Arc<SymbolGraph>>,
    validators: Arc<RwLock<Vec<(String, ValidatorFn)>>>,
}

impl ApexCore {
    /// Build a core from an initial settings snapshot: constructs the
    /// scheduler with the snapshot's concurrency limits, spawns its
    /// controller, installs change-driven metrics logging, and
    /// registers a handler for every [`RequestKind`] variant.
    pub fn new(initial_settings: ApexSettings) -> Arc<Self> {
        let scheduler = Scheduler::new(initial_settings.to_scheduler_config());
        scheduler.spawn_controller();
        apex_observability::install_logging_callback(&scheduler);
        apex_observability::install_percentile_tracking(
            &scheduler,
            &Arc::new(apex_observability::PercentileTracker::default()),
        );

        let graph = Arc::new(SymbolGraph::new());
        let resource_loader = Arc::new(ResourceLoader::new(Arc::clone(&graph), Arc::clone(&scheduler)));
        let settings = SettingsHandle::with_scheduler(initial_settings, Arc::clone(&scheduler));
        let validators: Arc<RwLock<Vec<(String, ValidatorFn)>>> = Arc::new(RwLock::new(Vec::new()));

        let queue: RequestQueue<Arc<SymbolGraph>> = RequestQueue::new(Arc::clone(&scheduler));
        for spec in Self::builtin_handlers(&validators) {
            queue.register(spec);
        }

        Arc::new(Self { graph, scheduler, settings, resource_loader, queue, validators })
    }

    fn builtin_handlers(validators: &Arc<RwLock<Vec<(String, ValidatorFn)>>>) -> Vec<HandlerSpec<Arc<SymbolGraph>>> {
        let immediate = Some(Duration::from_millis(300));
        let high = Some(Duration::from_secs(1));
        let normal = Some(Duration::from_secs(2));
        let low = Some(Duration::from_secs(5));

        let validators_for_handler = Arc::clone(validators);

        vec![
            handler::<DocumentPositionParams, _>("textDocument/hover", Priority::Immediate, immediate, position_class),
            handler::<DocumentPositionParams, _>("textDocument/completion", Priority::Immediate, immediate, position_class),
            handler::<DocumentPositionParams, _>("textDocument/signatureHelp", Priority::Immediate, immediate, position_class),
            handler::<DocumentPositionParams, _>("textDocument/definition", Priority::High, high, position_class),
            handler::<DocumentPositionParams, _>("textDocument/typeDefinition", Priority::High, high, position_class),
            handler::<DocumentPositionParams, _>("textDocument/implementation", Priority::High, high, position_class),
            handler::<DocumentParams, _>("textDocument/documentSymbol", Priority::Normal, normal, document_class),
            handler::<DocumentParams, _>("textDocument/foldingRange", Priority::Normal, normal, document_class),
            handler::<DocumentParams, _>("textDocument/codeLens", Priority::Normal, normal, document_class),
            handler::<DocumentPositionParams, _>("textDocument/references", Priority::Low, low, references_class),
            handler::<WorkspaceSymbolParams, _>("workspace/symbol", Priority::Low, low, workspace_symbol_class),
            handler::<BatchLoadParams, _>("workspace/batch-load", Priority::Background, None, batch_load_class),
            handler::<ValidatorRunAllParams, _>(
                "validator/run-all",
                Priority::Background,
                None,
                move |graph, _params| {
                    let entries = validators_for_handler.read();
                    let mut results = serde_json::Map::new();
                    for (name, validator) in entries.iter() {
                        results.insert(name.clone(), validator(graph));
                    }
                    serde_json::Value::Object(results)
                },
            ),
        ]
    }

    /// The shared symbol graph.
    pub fn graph(&self) -> &Arc<SymbolGraph> {
        &self.graph
    }

    /// The shared scheduler.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// The shared settings handle.
    pub fn settings(&self) -> &Arc<SettingsHandle> {
        &self.settings
    }

    /// Current request-queue statistics (§4.6 "Statistics").
    pub fn request_queue_stats(&self) -> apex_request_queue::RequestQueueStats {
        self.queue.stats()
    }

    /// Load the standard library (§4.7); a no-op after the first
    /// successful or failed call.
    pub async fn initialize_standard_library(&self) -> Result<DirectoryStatistics, LoadError> {
        self.resource_loader.initialize().await
    }

    /// Register a pluggable validator, run by a subsequent
    /// `validator/run-all` request alongside every previously
    /// registered one.
    pub fn register_validator<F>(&self, name: impl Into<String>, validator: F)
    where
        F: Fn(&SymbolGraph) -> serde_json::Value + Send + Sync + 'static,
    {
        self.validators.write().push((name.into(), Arc::new(validator)));
    }

    /// The parser collaborator interface's `addSymbolTable` (§6):
    /// register a freshly parsed file's symbols at `High` priority.
    pub async fn add_symbol_table(&self, file_uri: impl Into<String>, table: SymbolTable) -> Result<(), ApexError> {
        let file_uri = file_uri.into();
        let graph = Arc::clone(&self.graph);
        let handle = self
            .scheduler
            .offer(
                Priority::High,
                "addSymbolTable",
                None,
                CancellationToken::new(),
                Box::pin(async move {
                    graph.add_symbol_table(&file_uri, table);
                    Ok(serde_json::Value::Null)
                }),
            )
            .await?;
        handle.join().await?;
        Ok(())
    }

    /// The parser collaborator interface's `removeFile` (§6), run at
    /// the same priority as `addSymbolTable` since both mutate the
    /// graph on the controller thread and should interleave fairly
    /// with other `High` work rather than starve behind it.
    pub async fn remove_file(&self, file_uri: impl Into<String>) -> Result<(), ApexError> {
        let file_uri = file_uri.into();
        let graph = Arc::clone(&self.graph);
        let handle = self
            .scheduler
            .offer(
                Priority::High,
                "removeFile",
                None,
                CancellationToken::new(),
                Box::pin(async move {
                    graph.remove_file(&file_uri);
                    Ok(serde_json::Value::Null)
                }),
            )
            .await?;
        handle.join().await?;
        Ok(())
    }

    /// Submit one LSP request, dispatching it at its kind's configured
    /// priority and timeout (§6 request table).
    pub async fn submit_request(&self, kind: RequestKind) -> Result<serde_json::Value, ApexError> {
        let request_type = kind.request_type();
        let opts = SubmitOptions { priority: Some(kind.priority()), timeout: kind.default_timeout(), cancellation: None };
        let params = kind.params_json();
        Ok(self.queue.submit_request(request_type, params, Arc::clone(&self.graph), opts).await?)
    }

    /// `graph/get` (§6): the whole graph, projected for the wire,
    /// built as a `Background` task.
    pub async fn graph_get(&self) -> Result<GraphProjection, ApexError> {
        let graph = Arc::clone(&self.graph);
        let task_handle = self
            .scheduler
            .offer(
                Priority::Background,
                "graph/get",
                None,
                CancellationToken::new(),
                Box::pin(async move {
                    let projection = graph_projection::build_projection(&graph).await;
                    Ok(serde_json::to_value(projection).expect("GraphProjection always serialises"))
                }),
            )
            .await?;
        let value = task_handle.join().await?;
        Ok(serde_json::from_value(value).expect("scheduler returned our own serialised projection"))
    }

    /// `find-missing-artifact` (§6), gated by `apex.findMissingArtifact.enabled`.
    pub async fn find_missing_artifact(
        &self,
        params: FindMissingArtifactParams,
    ) -> Result<FindMissingArtifactResult, ApexError> {
        let snapshot = self.settings.snapshot();
        if !snapshot.find_missing_artifact.enabled {
            return Ok(FindMissingArtifactResult::NotFound { not_found: true });
        }
        let default_max = snapshot.find_missing_artifact.max_candidates_to_open;
        Ok(find_missing_artifact::find_missing_artifact(&self.graph, &self.scheduler, default_max, params).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apex_symbol_table::SymbolDraft;
    use apex_symbol_types::SymbolKind;

    #[tokio::test]
    async fn add_symbol_table_then_hover_finds_the_symbol_at_its_declaration() {
        let core = ApexCore::new(ApexSettings::default());
        let mut table = SymbolTable::new("file:///Foo.cls");
        table.add_symbol(SymbolDraft::new("Foo", SymbolKind::Class)).unwrap();
        core.add_symbol_table("file:///Foo.cls", table).await.unwrap();

        let symbols = core.graph().get_symbols_in_file("file:///Foo.cls");
        assert_eq!(symbols.len(), 1);
        let identifier_range = symbols[0].location.identifier_range;

        let result = core
            .submit_request(RequestKind::Hover(DocumentPositionParams {
                uri: "file:///Foo.cls".to_string(),
                position: identifier_range.start,
            }))
            .await
            .unwrap();
        assert_eq!(result["name"], "Foo");
    }

    #[tokio::test]
    async fn remove_file_clears_its_symbols() {
        let core = ApexCore::new(ApexSettings::default());
        let mut table = SymbolTable::new("file:///Foo.cls");
        table.add_symbol(SymbolDraft::new("Foo", SymbolKind::Class)).unwrap();
        core.add_symbol_table("file:///Foo.cls", table).await.unwrap();
        assert_eq!(core.graph().symbol_count(), 1);

        core.remove_file("file:///Foo.cls").await.unwrap();
        assert_eq!(core.graph().symbol_count(), 0);
    }

    #[tokio::test]
    async fn unregistered_request_type_surfaces_as_handler_not_registered() {
        // `validator/run-all` is registered; simulate drift by submitting a
        // request kind whose type string the handler map does carry, but
        // with an empty validator set, to confirm the empty-map path works.
        let core = ApexCore::new(ApexSettings::default());
        let result = core.submit_request(RequestKind::ValidatorRunAll(ValidatorRunAllParams)).await.unwrap();
        assert_eq!(result, serde_json::json!({}));
    }

    #[tokio::test]
    async fn registered_validator_result_appears_under_its_name() {
        let core = ApexCore::new(ApexSettings::default());
        core.register_validator("no-empty-classes", |graph| {
            serde_json::json!({ "violations": graph.symbol_count() })
        });

        let result = core.submit_request(RequestKind::ValidatorRunAll(ValidatorRunAllParams)).await.unwrap();
        assert_eq!(result["no-empty-classes"]["violations"], 0);
    }

    #[tokio::test]
    async fn find_missing_artifact_respects_disabled_setting() {
        let mut settings = ApexSettings::default();
        settings.find_missing_artifact.enabled = false;
        let core = ApexCore::new(settings);

        let result = core
            .find_missing_artifact(FindMissingArtifactParams {
                identifier: "AccountService".to_string(),
                origin: ArtifactOrigin {
                    uri: "file:///Caller.cls".to_string(),
                    position: Position::new(1, 0),
                    request_kind: "textDocument/definition".to_string(),
                },
                mode: SearchMode::Blocking,
                max_candidates: None,
                timeout_ms_hint: None,
                search_hints: None,
            })
            .await
            .unwrap();
        assert_eq!(result, FindMissingArtifactResult::NotFound { not_found: true });
    }

    #[tokio::test]
    async fn graph_get_reflects_registered_symbols() {
        let core = ApexCore::new(ApexSettings::default());
        let mut table = SymbolTable::new("file:///Foo.cls");
        table.add_symbol(SymbolDraft::new("Foo", SymbolKind::Class)).unwrap();
        core.add_symbol_table("file:///Foo.cls", table).await.unwrap();

        let projection = core.graph_get().await.unwrap();
        assert_eq!(projection.metadata.total_nodes, 1);
    }
}
