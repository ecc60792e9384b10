// Postgres-backed node store.
//
// The full node is kept as a JSONB document; the columns beside it exist for
// filtering. Similarity is scored in Rust over the rows inside the lookback
// window, which the created_at index keeps small.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use nutshell_common::{cosine_similarity, IntelligenceNode, NutshellError, Result};

use crate::store::{rank_hits, NodeFilter, NodeStore, ScoredNode, UpdateCursor};

pub struct PgNodeStore {
    pool: PgPool,
}

fn db_err(e: sqlx::Error) -> NutshellError {
    NutshellError::Store(e.to_string())
}

fn decode(document: serde_json::Value) -> Result<IntelligenceNode> {
    serde_json::from_value(document)
        .map_err(|e| NutshellError::Store(format!("corrupt node document: {e}")))
}

impl PgNodeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await.map_err(db_err)?;
        info!("Connected to Postgres node store");
        Ok(Self::new(pool))
    }

    /// Run the embedded SQL migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| NutshellError::Store(format!("migration failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl NodeStore for PgNodeStore {
    async fn put(&self, node: &IntelligenceNode) -> Result<()> {
        let document = serde_json::to_value(node)
            .map_err(|e| NutshellError::Store(format!("node serialization failed: {e}")))?;
        let tags: Vec<String> = node.tags.iter().cloned().collect();

        sqlx::query(
            r#"
            INSERT INTO intelligence_nodes
                (id, created_at, updated_at, verification_status, tags, embedding, document)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                updated_at = EXCLUDED.updated_at,
                verification_status = EXCLUDED.verification_status,
                tags = EXCLUDED.tags,
                embedding = EXCLUDED.embedding,
                document = EXCLUDED.document
            "#,
        )
        .bind(node.id)
        .bind(node.created_at)
        .bind(node.updated_at)
        .bind(node.verification_status.to_string())
        .bind(&tags)
        .bind(&node.embedding)
        .bind(&document)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        debug!(node_id = %node.id, "Stored node");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<IntelligenceNode> {
        let document = sqlx::query_scalar::<_, serde_json::Value>(
            "SELECT document FROM intelligence_nodes WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?
        .ok_or(NutshellError::NotFound(id))?;

        decode(document)
    }

    async fn nearest(
        &self,
        vector: &[f32],
        k: usize,
        window: chrono::Duration,
    ) -> Result<Vec<ScoredNode>> {
        let cutoff = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let rows = sqlx::query_as::<_, (Uuid, DateTime<Utc>, Vec<f32>)>(
            "SELECT id, created_at, embedding FROM intelligence_nodes WHERE created_at >= $1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        let hits = rows
            .into_iter()
            .map(|(node_id, created_at, embedding)| ScoredNode {
                node_id,
                similarity: cosine_similarity(vector, &embedding),
                created_at,
            })
            .collect();
        Ok(rank_hits(hits, k))
    }

    async fn list(&self, filter: &NodeFilter) -> Result<Vec<IntelligenceNode>> {
        let documents = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT document FROM intelligence_nodes
            WHERE ($1::text IS NULL OR $1 = ANY(tags))
              AND ($2::text IS NULL OR verification_status = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at <= $4)
            ORDER BY created_at DESC
            LIMIT $5
            "#,
        )
        .bind(filter.tag.as_deref())
        .bind(filter.status.map(|s| s.to_string()))
        .bind(filter.created_from)
        .bind(filter.created_to)
        .bind(i64::try_from(filter.effective_limit()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        documents.into_iter().map(decode).collect()
    }

    async fn updated_since(
        &self,
        cursor: &UpdateCursor,
        limit: usize,
    ) -> Result<Vec<IntelligenceNode>> {
        let documents = sqlx::query_scalar::<_, serde_json::Value>(
            r#"
            SELECT document FROM intelligence_nodes
            WHERE updated_at > $1
               OR ($2::uuid IS NOT NULL AND updated_at = $1 AND id > $2)
            ORDER BY updated_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(cursor.updated_at)
        .bind(cursor.id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        documents.into_iter().map(decode).collect()
    }
}
