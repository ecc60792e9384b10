pub mod candidates;
pub mod dead_letters;

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use nutshell_common::{
    Claim, Discrepancy, IntelligenceNode, NutshellError, SourceRef, VerificationStatus,
};
use nutshell_store::{NodeFilter, UpdateCursor};

use crate::AppState;

const MAX_LIMIT: usize = 500;

// --- Query structs ---

#[derive(Deserialize, Default)]
pub struct NodesQuery {
    tag: Option<String>,
    status: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

impl NodesQuery {
    fn to_filter(&self) -> Result<NodeFilter, NutshellError> {
        let status = self
            .status
            .as_deref()
            .map(str::parse::<VerificationStatus>)
            .transpose()?;
        Ok(NodeFilter {
            tag: self.tag.clone(),
            status,
            created_from: self.from,
            created_to: self.to,
            limit: Some(self.limit.unwrap_or(NodeFilter::DEFAULT_LIMIT).min(MAX_LIMIT)),
        })
    }
}

/// `since` is the `updated_at` of the last node seen, `after` its id.
#[derive(Deserialize, Default)]
pub struct UpdatesQuery {
    since: Option<DateTime<Utc>>,
    after: Option<Uuid>,
    limit: Option<usize>,
}

impl UpdatesQuery {
    fn cursor(&self) -> UpdateCursor {
        UpdateCursor {
            updated_at: self.since.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            id: self.after,
        }
    }
}

// --- Views ---

/// A node as served to readers: everything but the embedding, plus derived counts.
#[derive(Serialize)]
pub struct NodeView {
    id: Uuid,
    headline: String,
    summary: String,
    category: Option<String>,
    tags: Vec<String>,
    relevance_score: u8,
    mention_count: usize,
    first_seen: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    sources: Vec<SourceRef>,
    links: Vec<String>,
    claims: Vec<Claim>,
    verification_status: VerificationStatus,
    discrepancies: Vec<Discrepancy>,
    verification_error: Option<String>,
    verified_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<IntelligenceNode> for NodeView {
    fn from(node: IntelligenceNode) -> Self {
        Self {
            mention_count: node.mention_count(),
            first_seen: node.first_seen(),
            last_seen: node.last_seen(),
            id: node.id,
            headline: node.headline,
            summary: node.summary,
            category: node.category,
            tags: node.tags.into_iter().collect(),
            relevance_score: node.relevance_score,
            sources: node.sources,
            links: node.links,
            claims: node.claims,
            verification_status: node.verification_status,
            discrepancies: node.discrepancies,
            verification_error: node.verification_error,
            verified_at: node.verified_at,
            created_at: node.created_at,
            updated_at: node.updated_at,
        }
    }
}

// --- Helpers ---

pub fn status_for(error: &NutshellError) -> StatusCode {
    match error {
        NutshellError::InvalidCandidate(_) => StatusCode::UNPROCESSABLE_ENTITY,
        NutshellError::Validation(_) => StatusCode::BAD_REQUEST,
        NutshellError::NotFound(_) => StatusCode::NOT_FOUND,
        NutshellError::EmbeddingUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        NutshellError::InvalidTransition { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(error: NutshellError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        warn!(error = %error, "Request failed");
    }
    (status, Json(serde_json::json!({ "error": error.to_string() }))).into_response()
}

fn views(nodes: Vec<IntelligenceNode>) -> Vec<NodeView> {
    nodes.into_iter().map(NodeView::from).collect()
}

// --- Handlers ---

pub async fn api_node_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    match state.store.get(id).await {
        Ok(node) => Json(NodeView::from(node)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn api_nodes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NodesQuery>,
) -> impl IntoResponse {
    let filter = match params.to_filter() {
        Ok(filter) => filter,
        Err(e) => return error_response(e),
    };
    match state.store.list(&filter).await {
        Ok(nodes) => Json(views(nodes)).into_response(),
        Err(e) => error_response(e),
    }
}

/// Nodes created or changed after the `(since, after)` cursor, oldest change
/// first. Readers pass the last node's `updated_at` and `id` to continue.
pub async fn api_node_updates(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UpdatesQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(NodeFilter::DEFAULT_LIMIT).min(MAX_LIMIT);
    match state.store.updated_since(&params.cursor(), limit).await {
        Ok(nodes) => Json(views(nodes)).into_response(),
        Err(e) => error_response(e),
    }
}
