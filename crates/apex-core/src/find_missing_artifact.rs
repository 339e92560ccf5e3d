//! The `find-missing-artifact` experimental protocol extension (§6):
//! given an identifier a caller could not resolve at a use site, locate
//! the file(s) most likely to define it so the wire layer can open them
//! and retry. Gated by `apex.findMissingArtifact.{enabled,
//! maxCandidatesToOpen,timeoutMsHint}` (§6, surfaced through
//! [`apex_settings::FindMissingArtifactSettings`]).
//!
//! This core never touches a filesystem — it only ever names candidate
//! `file_uri`s already present in the graph's index (workspace files
//! already loaded under a different use site, or standard-library
//! tables) plus whatever `searchHints` the caller offers. "Opened" in
//! the result means "the wire layer should open these", not that this
//! crate opened anything (§1 Non-goals: parsing and transport are
//! out of scope here).

use apex_scheduler::{CancellationToken, Priority, Scheduler, SchedulerError};
use apex_symbol_graph::SymbolGraph;
use apex_symbol_types::Position;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Where the unresolved identifier was used.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactOrigin {
    /// The document the identifier was referenced from.
    pub uri: String,
    /// The use-site position.
    pub position: Position,
    /// The LSP request that triggered the search (for logging only).
    pub request_kind: String,
}

/// Whether the caller waits for an answer or just wants the search
/// kicked off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Run synchronously and return the outcome.
    Blocking,
    /// Submit as a `Background` task and acknowledge immediately.
    Background,
}

/// `find-missing-artifact` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindMissingArtifactParams {
    /// The unresolved name.
    pub identifier: String,
    /// Where it was referenced from.
    pub origin: ArtifactOrigin,
    /// Blocking or background search.
    pub mode: SearchMode,
    /// Caps the candidate list; defaults to the settings value if absent.
    pub max_candidates: Option<usize>,
    /// Client-supplied timeout hint, forwarded but not enforced beyond
    /// `Background` submission bookkeeping.
    pub timeout_ms_hint: Option<u64>,
    /// Caller-suggested candidate uris, considered alongside whatever
    /// the graph already knows about `identifier`.
    pub search_hints: Option<Vec<String>>,
}

/// `find-missing-artifact` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FindMissingArtifactResult {
    /// Candidate files the wire layer should open and retry against.
    Opened {
        /// Candidate file uris, in descending-relevance order.
        opened: Vec<String>,
    },
    /// Nothing in the graph or the supplied hints named `identifier`.
    NotFound {
        /// Always `true`; present only for a stable discriminant on the wire.
        not_found: bool,
    },
    /// `Background` mode's acknowledgement; the search runs detached.
    Accepted {
        /// Always `true`.
        accepted: bool,
    },
}

fn search_once(graph: &SymbolGraph, params: &FindMissingArtifactParams, max_candidates: usize) -> FindMissingArtifactResult {
    let mut candidates: Vec<String> = graph
        .find_symbol_by_name(&params.identifier)
        .into_iter()
        .map(|symbol| symbol.file_uri)
        .filter(|uri| *uri != params.origin.uri)
        .collect();

    candidates.sort();
    candidates.dedup();

    if candidates.is_empty() {
        if let Some(hints) = &params.search_hints {
            candidates = hints.clone();
        }
    }

    if candidates.is_empty() {
        return FindMissingArtifactResult::NotFound { not_found: true };
    }

    candidates.truncate(max_candidates);
    FindMissingArtifactResult::Opened { opened: candidates }
}

/// Run `find-missing-artifact`. `Blocking` mode searches inline and
/// returns the outcome; `Background` mode submits the same search as a
/// `Background`-priority scheduler task and returns `Accepted`
/// immediately, matching §6's "background mode acknowledges only".
pub async fn find_missing_artifact(
    graph: &Arc<SymbolGraph>,
    scheduler: &Arc<Scheduler>,
    default_max_candidates: usize,
    params: FindMissingArtifactParams,
) -> Result<FindMissingArtifactResult, SchedulerError> {
    let max_candidates = params.max_candidates.unwrap_or(default_max_candidates);

    match params.mode {
        SearchMode::Blocking => {
            let graph = Arc::clone(graph);
            let timeout = params.timeout_ms_hint.map(Duration::from_millis);
            let handle = scheduler
                .offer(
                    Priority::Low,
                    "find-missing-artifact",
                    timeout,
                    CancellationToken::new(),
                    Box::pin(async move {
                        let result = search_once(&graph, &params, max_candidates);
                        Ok(serde_json::to_value(result).expect("FindMissingArtifactResult always serialises"))
                    }),
                )
                .await?;

            let value = handle.join().await?;
            Ok(serde_json::from_value(value).expect("scheduler returned our own serialised result"))
        }
        SearchMode::Background => {
            let graph = Arc::clone(graph);
            scheduler
                .offer(
                    Priority::Background,
                    "find-missing-artifact",
                    None,
                    CancellationToken::new(),
                    Box::pin(async move {
                        let _ = search_once(&graph, &params, max_candidates);
                        Ok(serde_json::Value::Null)
                    }),
                )
                .await?;
            Ok(FindMissingArtifactResult::Accepted { accepted: true })
        }
    }
}
