use std::sync::Arc;

use anyhow::Result;
use axum::{
    http::{header, HeaderValue},
    routing::{get, post},
    Router,
};
use tokio::sync::mpsc;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use nutshell_common::{Config, VerificationStatus, VerificationTask};
use nutshell_dedup::{DedupDeps, DedupEngine, HttpEmbedder};
use nutshell_store::{MemoryNodeStore, NodeFilter, NodeLocks, NodeStore, PgNodeStore};
use nutshell_verify::{HttpFetcher, VerificationEngine, VerificationWorker};

mod rest;

pub struct AppState {
    pub engine: Arc<DedupEngine>,
    pub store: Arc<dyn NodeStore>,
}

async fn open_store(config: &Config) -> Result<Arc<dyn NodeStore>> {
    match &config.database_url {
        Some(url) => {
            let store = PgNodeStore::connect(url).await?;
            store.migrate().await?;
            info!("Connected to Postgres node store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, nodes are kept in memory only");
            Ok(Arc::new(MemoryNodeStore::new()))
        }
    }
}

/// Queue every node that still has unverified claims, e.g. after a restart.
async fn resume_pending_verifications(
    store: &dyn NodeStore,
    tx: &mpsc::UnboundedSender<VerificationTask>,
) -> Result<()> {
    let pending = store
        .list(&NodeFilter {
            status: Some(VerificationStatus::Unverified),
            limit: Some(usize::MAX),
            ..Default::default()
        })
        .await?;
    let mut queued = 0;
    for node in pending.into_iter().filter(|n| !n.claims.is_empty()) {
        tx.send(VerificationTask { node_id: node.id })?;
        queued += 1;
    }
    if queued > 0 {
        info!(queued, "Resumed pending verifications");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("nutshell=info".parse()?))
        .init();

    let config = Config::from_env()?;
    config.log_redacted();

    let store = open_store(&config).await?;
    let locks = Arc::new(NodeLocks::new());
    let (tx, rx) = mpsc::unbounded_channel();

    let embedder = HttpEmbedder::new(&config.embedding_api_key, &config.embedding_model)
        .with_base_url(&config.embedding_base_url);
    let engine = DedupEngine::new(
        DedupDeps::builder()
            .store(store.clone())
            .embedder(Arc::new(embedder))
            .locks(locks.clone())
            .config(config.dedup.clone())
            .verification_tx(tx.clone())
            .build(),
    );

    let verifier = VerificationEngine::new(
        store.clone(),
        Arc::new(HttpFetcher::new()),
        locks,
        config.verification.clone(),
    );
    tokio::spawn(VerificationWorker::new(Arc::new(verifier)).run(rx));
    resume_pending_verifications(store.as_ref(), &tx).await?;
    drop(tx);

    let state = Arc::new(AppState {
        engine: Arc::new(engine),
        store,
    });

    let app = Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Ingest
        .route("/api/candidates", post(rest::candidates::api_submit_candidate))
        .route("/api/candidates/schema", get(rest::candidates::api_candidate_schema))
        .route("/api/dead-letters", get(rest::dead_letters::api_dead_letters))
        .route(
            "/api/dead-letters/replay",
            post(rest::dead_letters::api_replay_dead_letters),
        )
        // Presentation reads
        .route("/api/nodes", get(rest::api_nodes))
        .route("/api/nodes/updates", get(rest::api_node_updates))
        .route("/api/nodes/{id}", get(rest::api_node_detail))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Logging layer: method + path + status + latency only
        .layer(
            tower_http::trace::TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                }),
        );

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("Nutshell API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
