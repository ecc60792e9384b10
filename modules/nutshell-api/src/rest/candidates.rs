use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use schemars::schema_for;
use serde::Serialize;
use uuid::Uuid;

use nutshell_common::CandidateNode;
use nutshell_dedup::MergeOutcome;

use crate::rest::error_response;
use crate::AppState;

#[derive(Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum SubmitResponse {
    Created {
        node_id: Uuid,
    },
    Merged {
        node_id: Uuid,
        similarity: f64,
        mention_count_grew: bool,
        claims_added: usize,
    },
}

/// Ingest one extracted candidate. 201 when a node was created, 200 on merge.
pub async fn api_submit_candidate(
    State(state): State<Arc<AppState>>,
    Json(candidate): Json<CandidateNode>,
) -> impl IntoResponse {
    match state.engine.process(candidate).await {
        Ok(MergeOutcome::Created { node_id }) => {
            (StatusCode::CREATED, Json(SubmitResponse::Created { node_id })).into_response()
        }
        Ok(MergeOutcome::Merged {
            node_id,
            similarity,
            report,
        }) => Json(SubmitResponse::Merged {
            node_id,
            similarity,
            mention_count_grew: report.source_appended,
            claims_added: report.claims_added,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// JSON schema of the candidate payload, for the extraction agent's structured output.
pub async fn api_candidate_schema() -> impl IntoResponse {
    Json(schema_for!(CandidateNode))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nutshell_common::DedupConfig;
    use nutshell_dedup::testing::{candidate, FailingEmbedder, FixedEmbedder};
    use nutshell_dedup::{DedupDeps, DedupEngine, TextEmbedder};
    use nutshell_store::{MemoryNodeStore, NodeStore};

    use super::*;

    fn state(embedder: Arc<dyn TextEmbedder>) -> Arc<AppState> {
        let store: Arc<dyn NodeStore> = Arc::new(MemoryNodeStore::new());
        let config = DedupConfig {
            embed_backoff_base: Duration::from_millis(1),
            ..DedupConfig::default()
        };
        let engine = DedupEngine::new(
            DedupDeps::builder()
                .store(store.clone())
                .embedder(embedder)
                .config(config)
                .build(),
        );
        Arc::new(AppState {
            engine: Arc::new(engine),
            store,
        })
    }

    fn story() -> CandidateNode {
        candidate("Acme ships Model X with open weights", "Model X is out.", "tldr-ai")
    }

    #[tokio::test]
    async fn first_sighting_is_created_then_merged() {
        let state = state(Arc::new(FixedEmbedder::new(16)));

        let first = api_submit_candidate(State(state.clone()), Json(story()))
            .await
            .into_response();
        assert_eq!(first.status(), StatusCode::CREATED);

        let second = api_submit_candidate(State(state), Json(story()))
            .await
            .into_response();
        assert_eq!(second.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_candidate_is_unprocessable() {
        let state = state(Arc::new(FixedEmbedder::new(16)));
        let response = api_submit_candidate(State(state), Json(candidate("", "", "tldr-ai")))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn gateway_outage_is_unavailable_and_parked() {
        let state = state(Arc::new(FailingEmbedder::always(FixedEmbedder::new(16))));
        let response = api_submit_candidate(State(state.clone()), Json(story()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.engine.dead_letters().len(), 1);
    }
}
