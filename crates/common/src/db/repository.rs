//! Repository pattern for database operations
//!
//! Provides a clean interface for all data access operations with proper
//! error handling and transaction support. Vector operations go through
//! raw SQL because SeaORM has no native pgvector column type.

use crate::db::models::*;
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, Statement, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// New chunk payload for bulk insertion
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// Graph node payload for the atomic purge-then-insert refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNodeRecord {
    pub concept_id: String,
    pub aliases: Vec<String>,
    pub outbound_links: Vec<String>,
    pub inbound_links: Vec<String>,
    pub metadata: serde_json::Value,
}

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

/// Convert Vec<f32> to the pgvector text format "[1.0,2.0,...]"
fn vector_literal(embedding: &[f32]) -> String {
    format!(
        "[{}]",
        embedding
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(",")
    )
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // Project Operations
    // ========================================================================

    /// Create a new project in `processing` state
    pub async fn create_project(&self, title: String, user_id: Option<Uuid>) -> Result<Project> {
        let now = chrono::Utc::now();

        let project = ProjectActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            title: Set(title),
            status: Set(String::from(ProjectStatus::Processing)),
            project_metadata: Set(serde_json::json!({})),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        project.insert(self.pool.conn()).await.map_err(Into::into)
    }

    /// Find project by ID
    pub async fn find_project_by_id(&self, id: Uuid) -> Result<Option<Project>> {
        ProjectEntity::find_by_id(id)
            .one(self.pool.conn())
            .await
            .map_err(Into::into)
    }

    /// List projects, newest first, optionally scoped to a user
    pub async fn list_projects(&self, user_id: Option<Uuid>) -> Result<Vec<Project>> {
        let mut query = ProjectEntity::find().order_by_desc(ProjectColumn::CreatedAt);

        if let Some(uid) = user_id {
            query = query.filter(ProjectColumn::UserId.eq(uid));
        }

        query.all(self.pool.conn()).await.map_err(Into::into)
    }

    /// Delete project by ID (files, chunks, and nodes cascade)
    pub async fn delete_project(&self, id: Uuid) -> Result<bool> {
        let result = ProjectEntity::delete_by_id(id)
            .exec(self.pool.conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Update project lifecycle status
    pub async fn update_project_status(&self, id: Uuid, status: ProjectStatus) -> Result<()> {
        let project = self
            .find_project_by_id(id)
            .await?
            .ok_or_else(|| AppError::ProjectNotFound { id: id.to_string() })?;

        let mut active: ProjectActiveModel = project.into();
        active.status = Set(String::from(status));
        active.updated_at = Set(chrono::Utc::now().into());
        active.update(self.pool.conn()).await?;

        Ok(())
    }

    /// Read-modify-write the metadata blob inside one transaction.
    /// The closure mutates the typed view; the whole blob is written back.
    pub async fn update_project_metadata<F>(
        &self,
        project_id: Uuid,
        mutate: F,
    ) -> Result<ProjectMetadata>
    where
        F: FnOnce(&mut ProjectMetadata),
    {
        let txn = self.pool.conn().begin().await?;

        let project = ProjectEntity::find_by_id(project_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::ProjectNotFound {
                id: project_id.to_string(),
            })?;

        let mut meta = project.metadata();
        mutate(&mut meta);

        let mut active: ProjectActiveModel = project.into();
        active.project_metadata = Set(meta.to_value());
        active.updated_at = Set(chrono::Utc::now().into());
        active.update(&txn).await?;

        txn.commit().await?;
        Ok(meta)
    }

    // ========================================================================
    // File Operations
    // ========================================================================

    /// Find a file by its blob key within a project (idempotent retries)
    pub async fn find_file_by_key(
        &self,
        project_id: Uuid,
        blob_key: &str,
    ) -> Result<Option<File>> {
        FileEntity::find()
            .filter(FileColumn::ProjectId.eq(project_id))
            .filter(FileColumn::BlobKey.eq(blob_key))
            .one(self.pool.conn())
            .await
            .map_err(Into::into)
    }

    /// Create a file row with empty content
    pub async fn create_file(
        &self,
        project_id: Uuid,
        filename: String,
        blob_key: String,
    ) -> Result<File> {
        let file = FileActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(project_id),
            filename: Set(filename),
            blob_key: Set(blob_key),
            content: Set(String::new()),
            created_at: Set(chrono::Utc::now().into()),
        };

        file.insert(self.pool.conn()).await.map_err(Into::into)
    }

    /// Store extracted markdown. Content only ever grows; a shorter write
    /// against a populated row is rejected as an invariant violation.
    pub async fn set_file_content(&self, file_id: Uuid, content: String) -> Result<()> {
        let file = FileEntity::find_by_id(file_id)
            .one(self.pool.conn())
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource: "file".into(),
                id: file_id.to_string(),
            })?;

        if !file.content.is_empty() && content.len() < file.content.len() {
            return Err(AppError::Internal {
                message: format!("refusing to shorten content of file {}", file_id),
            });
        }

        let mut active: FileActiveModel = file.into();
        active.content = Set(content);
        active.update(self.pool.conn()).await?;

        Ok(())
    }

    /// First file of a project (export cache recreation)
    pub async fn first_file_for_project(&self, project_id: Uuid) -> Result<Option<File>> {
        FileEntity::find()
            .filter(FileColumn::ProjectId.eq(project_id))
            .order_by_asc(FileColumn::CreatedAt)
            .one(self.pool.conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Chunk Operations
    // ========================================================================

    /// Bulk-insert chunks with embeddings via raw SQL (pgvector cast)
    pub async fn create_chunks(&self, file_id: Uuid, chunks: Vec<NewChunk>) -> Result<usize> {
        let count = chunks.len();

        for chunk in chunks {
            let stmt = Statement::from_sql_and_values(
                DbBackend::Postgres,
                r#"
                INSERT INTO chunks (id, file_id, content, embedding, chunk_metadata, created_at)
                VALUES ($1, $2, $3, $4::vector, $5, NOW())
                "#,
                vec![
                    Uuid::new_v4().into(),
                    file_id.into(),
                    chunk.content.into(),
                    vector_literal(&chunk.embedding).into(),
                    chunk.metadata.into(),
                ],
            );

            self.pool.conn().execute(stmt).await?;
        }

        Ok(count)
    }

    /// Count chunks across all files of a project
    pub async fn count_chunks_for_project(&self, project_id: Uuid) -> Result<u64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT COUNT(*)::bigint AS count
            FROM chunks c
            JOIN files f ON c.file_id = f.id
            WHERE f.project_id = $1
            "#,
            vec![project_id.into()],
        );

        let row = self.pool.conn().query_one(stmt).await?;
        let count: i64 = row
            .map(|r| r.try_get_by_index::<i64>(0))
            .transpose()?
            .unwrap_or(0);

        Ok(count as u64)
    }

    /// Top-k chunk contents for a project by cosine distance to the query
    /// vector, nearest first
    pub async fn top_chunks_for_project(
        &self,
        project_id: Uuid,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<String>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT c.content
            FROM chunks c
            JOIN files f ON c.file_id = f.id
            WHERE f.project_id = $1 AND c.embedding IS NOT NULL
            ORDER BY c.embedding <=> $2::vector
            LIMIT $3
            "#,
            vec![
                project_id.into(),
                vector_literal(query).into(),
                (limit as i64).into(),
            ],
        );

        let rows = self.pool.conn().query_all(stmt).await?;

        let contents = rows
            .into_iter()
            .filter_map(|row| row.try_get_by_index::<String>(0).ok())
            .collect();

        Ok(contents)
    }

    // ========================================================================
    // Graph Node Operations
    // ========================================================================

    /// Atomically replace the concept graph of a project: delete all
    /// existing rows, bulk-insert the new set, commit. Readers never see a
    /// partial graph.
    pub async fn replace_graph_nodes(
        &self,
        project_id: Uuid,
        nodes: &[GraphNodeRecord],
    ) -> Result<usize> {
        let txn = self.pool.conn().begin().await?;

        let deleted = GraphNodeEntity::delete_many()
            .filter(GraphNodeColumn::ProjectId.eq(project_id))
            .exec(&txn)
            .await?;

        if deleted.rows_affected > 0 {
            tracing::info!(
                project_id = %project_id,
                purged = deleted.rows_affected,
                "Purged existing graph nodes"
            );
        }

        let now = chrono::Utc::now();
        let models: Vec<GraphNodeActiveModel> = nodes
            .iter()
            .map(|n| GraphNodeActiveModel {
                id: Set(Uuid::new_v4()),
                project_id: Set(project_id),
                concept_id: Set(n.concept_id.clone()),
                content: Set(None),
                aliases: Set(n.aliases.clone()),
                outbound_links: Set(n.outbound_links.clone()),
                inbound_links: Set(n.inbound_links.clone()),
                node_metadata: Set(n.metadata.clone()),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            })
            .collect();

        if !models.is_empty() {
            GraphNodeEntity::insert_many(models).exec(&txn).await?;
        }

        txn.commit().await?;
        Ok(nodes.len())
    }

    /// All nodes of a project
    pub async fn nodes_for_project(&self, project_id: Uuid) -> Result<Vec<GraphNode>> {
        GraphNodeEntity::find()
            .filter(GraphNodeColumn::ProjectId.eq(project_id))
            .order_by_asc(GraphNodeColumn::ConceptId)
            .all(self.pool.conn())
            .await
            .map_err(Into::into)
    }

    /// Nodes still missing a generated note, up to `limit`
    pub async fn missing_content_nodes(
        &self,
        project_id: Uuid,
        limit: u64,
    ) -> Result<Vec<GraphNode>> {
        GraphNodeEntity::find()
            .filter(GraphNodeColumn::ProjectId.eq(project_id))
            .filter(
                GraphNodeColumn::Content
                    .is_null()
                    .or(GraphNodeColumn::Content.eq("")),
            )
            .order_by_asc(GraphNodeColumn::ConceptId)
            .limit(limit)
            .all(self.pool.conn())
            .await
            .map_err(Into::into)
    }

    /// Total node count for a project
    pub async fn count_nodes(&self, project_id: Uuid) -> Result<u64> {
        GraphNodeEntity::find()
            .filter(GraphNodeColumn::ProjectId.eq(project_id))
            .count(self.pool.conn())
            .await
            .map_err(Into::into)
    }

    /// Count of nodes still missing a note
    pub async fn count_missing_content(&self, project_id: Uuid) -> Result<u64> {
        GraphNodeEntity::find()
            .filter(GraphNodeColumn::ProjectId.eq(project_id))
            .filter(
                GraphNodeColumn::Content
                    .is_null()
                    .or(GraphNodeColumn::Content.eq("")),
            )
            .count(self.pool.conn())
            .await
            .map_err(Into::into)
    }

    /// Store a generated note on one node
    pub async fn set_node_content(&self, node_id: Uuid, content: String) -> Result<()> {
        let node = GraphNodeEntity::find_by_id(node_id)
            .one(self.pool.conn())
            .await?
            .ok_or_else(|| AppError::NotFound {
                resource: "graph_node".into(),
                id: node_id.to_string(),
            })?;

        let mut active: GraphNodeActiveModel = node.into();
        active.content = Set(Some(content));
        active.updated_at = Set(chrono::Utc::now().into());
        active.update(self.pool.conn()).await?;

        Ok(())
    }

    /// All concept ids of a project (link validation during note repair)
    pub async fn concept_ids_for_project(&self, project_id: Uuid) -> Result<Vec<String>> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT concept_id FROM graph_nodes WHERE project_id = $1",
            vec![project_id.into()],
        );

        let rows = self.pool.conn().query_all(stmt).await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get_by_index::<String>(0).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_literal() {
        assert_eq!(vector_literal(&[1.0, 2.5, -3.0]), "[1,2.5,-3]");
        assert_eq!(vector_literal(&[]), "[]");
    }
}
