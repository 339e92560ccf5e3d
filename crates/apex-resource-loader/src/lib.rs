//! Singleton loader for the Apex standard-library symbol tables
//! (`System`, `Schema`, …), registered with the shared [`SymbolGraph`] at
//! `High` priority so user code can resolve against them (§4.7 of the
//! core specification).

#![deny(unsafe_code)]
#![deny(unreachable_pub)]
#![cfg_attr(test, allow(clippy::panic, clippy::unwrap_used, clippy::expect_used))]
#![warn(rust_2018_idioms)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc, clippy::missing_panics_doc)]

use apex_scheduler::{CancellationToken, Priority, Scheduler};
use apex_symbol_graph::SymbolGraph;
use apex_symbol_table::{SymbolDraft, SymbolTable};
use apex_symbol_types::SymbolKind;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{debug, warn};

/// The standard-library namespace → type-name catalogue. A production
/// loader would deserialise this from an embedded archive; this table
/// stands in for that archive and is looked up by namespace at `phf`
/// speed (teacher's own pattern for static lookup tables).
static STANDARD_LIBRARY: phf::Map<&'static str, &'static [&'static str]> = phf::phf_map! {
    "System" => &["String", "Integer", "Long", "Double", "Boolean", "Decimal", "List", "Map", "Set", "Object", "Exception"],
    "Schema" => &["SObjectType", "SObjectField", "DescribeSObjectResult", "DescribeFieldResult"],
    "Database" => &["SaveResult", "DeleteResult", "UpsertResult", "QueryLocator", "Batchable"],
    "Trigger" => &["TriggerOperation"],
};

/// `getDirectoryStatistics()` result.
#[derive(Debug, Clone)]
pub struct DirectoryStatistics {
    /// Total standard-library symbol tables registered.
    pub total_files: usize,
    /// Namespaces covered, in catalogue order.
    pub namespaces: Vec<String>,
}

/// Errors from [`ResourceLoader::initialize`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// `initialize` was already called (successfully or not) on this loader.
    #[error("resource loader already initialised")]
    AlreadyInitialised,
    /// Registration of a standard-library table with the graph failed.
    #[error("failed to register standard library: {0}")]
    RegistrationFailed(String),
}

/// Observed state of a loader that has attempted initialization.
#[derive(Debug, Clone)]
enum LoaderOutcome {
    Ready(DirectoryStatistics),
    Unavailable(String),
}

/// At-most-once standard-library loader. Safe to share via `Arc` and
/// call `initialize` from multiple callers concurrently — only the first
/// call does any work.
pub struct ResourceLoader {
    graph: Arc<SymbolGraph>,
    scheduler: Arc<Scheduler>,
    outcome: OnceCell<LoaderOutcome>,
}

impl ResourceLoader {
    /// Build a loader bound to a graph and scheduler. Nothing runs until
    /// [`ResourceLoader::initialize`] is called.
    pub fn new(graph: Arc<SymbolGraph>, scheduler: Arc<Scheduler>) -> Self {
        Self { graph, scheduler, outcome: OnceCell::new() }
    }

    /// Load the standard library and register each namespace's table
    /// with the graph at `High` priority. Only the first call does
    /// anything; later calls return `AlreadyInitialised` regardless of
    /// whether the first call succeeded, matching the "unavailable"
    /// failure-state contract — the rest of the system keeps functioning
    /// without standard-library resolution when this returns an error.
    pub async fn initialize(&self) -> Result<DirectoryStatistics, LoadError> {
        if self.outcome.get().is_some() {
            return Err(LoadError::AlreadyInitialised);
        }

        let mut namespaces = Vec::new();
        let mut total_files = 0usize;

        for (namespace, type_names) in STANDARD_LIBRARY.entries() {
            for type_name in *type_names {
                if let Err(message) = self.register_one(namespace, type_name).await {
                    warn!(namespace, type_name, error = %message, "standard library registration failed");
                    let _ = self.outcome.set(LoaderOutcome::Unavailable(message.clone()));
                    return Err(LoadError::RegistrationFailed(message));
                }
                total_files += 1;
            }
            namespaces.push((*namespace).to_string());
        }

        let stats = DirectoryStatistics { total_files, namespaces };
        debug!(total_files = stats.total_files, namespaces = stats.namespaces.len(), "standard library loaded");
        let _ = self.outcome.set(LoaderOutcome::Ready(stats.clone()));
        Ok(stats)
    }

    async fn register_one(&self, namespace: &str, type_name: &str) -> Result<(), String> {
        let file_uri = format!("apexlib://{namespace}/{type_name}");
        let mut table = SymbolTable::new(&file_uri);
        table
            .add_symbol(SymbolDraft::new(type_name, SymbolKind::Class))
            .map_err(|e| format!("{namespace}.{type_name}: {e}"))?;

        let graph = Arc::clone(&self.graph);
        let handle = self
            .scheduler
            .offer(
                Priority::High,
                "resource-loader/register",
                None,
                CancellationToken::new(),
                Box::pin(async move {
                    graph.add_symbol_table(&file_uri, table);
                    Ok(serde_json::Value::Null)
                }),
            )
            .await
            .map_err(|e| format!("{namespace}.{type_name}: {e}"))?;

        handle.join().await.map(|_| ()).map_err(|e| format!("{namespace}.{type_name}: {e}"))
    }

    /// Current directory statistics, if initialization has completed
    /// successfully. `None` before `initialize` runs or after it fails.
    pub fn directory_statistics(&self) -> Option<DirectoryStatistics> {
        match self.outcome.get()? {
            LoaderOutcome::Ready(stats) => Some(stats.clone()),
            LoaderOutcome::Unavailable(_) => None,
        }
    }

    /// Whether the loader is in the "unavailable" failure state.
    pub fn is_unavailable(&self) -> bool {
        matches!(self.outcome.get(), Some(LoaderOutcome::Unavailable(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apex_scheduler::SchedulerConfig;

    fn new_loader() -> ResourceLoader {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.spawn_controller();
        ResourceLoader::new(Arc::new(SymbolGraph::new()), scheduler)
    }

    #[tokio::test]
    async fn initialize_registers_every_catalogued_type() {
        let loader = new_loader();
        let stats = loader.initialize().await.unwrap();

        let expected_total: usize = STANDARD_LIBRARY.values().map(|types| types.len()).sum();
        assert_eq!(stats.total_files, expected_total);
        assert_eq!(stats.namespaces.len(), STANDARD_LIBRARY.len());
        assert!(stats.namespaces.contains(&"System".to_string()));
    }

    #[tokio::test]
    async fn second_initialize_call_is_rejected() {
        let loader = new_loader();
        loader.initialize().await.unwrap();
        assert!(matches!(loader.initialize().await, Err(LoadError::AlreadyInitialised)));
    }

    #[tokio::test]
    async fn graph_can_resolve_standard_library_symbol_after_load() {
        let graph = Arc::new(SymbolGraph::new());
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.spawn_controller();
        let loader = ResourceLoader::new(Arc::clone(&graph), scheduler);

        loader.initialize().await.unwrap();
        assert!(!graph.find_symbol_by_name("String").is_empty());
    }
}
