//! Chunk entity with vector embedding

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Structured chunk metadata (`{"headers": [...]}`)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Section titles from document root to the chunk's leaf section
    #[serde(default)]
    pub headers: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "chunks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub file_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub content: String,

    /// pgvector embedding stored as text for SeaORM compatibility.
    /// Actual vector operations are done via raw SQL.
    #[sea_orm(column_type = "Text", nullable)]
    pub embedding: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub chunk_metadata: Json,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    /// Parse embedding from stored text format to Vec<f32>
    pub fn parse_embedding(&self) -> Option<Vec<f32>> {
        self.embedding.as_ref().and_then(|s| {
            // Format: "[1.0,2.0,3.0,...]"
            let inner = s.trim_start_matches('[').trim_end_matches(']');
            inner
                .split(',')
                .map(|v| v.trim().parse::<f32>().ok())
                .collect()
        })
    }

    /// Parse structured metadata
    pub fn metadata(&self) -> ChunkMetadata {
        serde_json::from_value(self.chunk_metadata.clone()).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::file::Entity",
        from = "Column::FileId",
        to = "super::file::Column::Id",
        on_delete = "Cascade"
    )]
    File,
}

impl Related<super::file::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::File.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_embedding() {
        let model = Model {
            id: Uuid::new_v4(),
            file_id: Uuid::new_v4(),
            content: "text".into(),
            embedding: Some("[0.5, -1.25, 3]".into()),
            chunk_metadata: serde_json::json!({"headers": ["Intro"]}),
            created_at: chrono::Utc::now().into(),
        };

        assert_eq!(model.parse_embedding(), Some(vec![0.5, -1.25, 3.0]));
        assert_eq!(model.metadata().headers, vec!["Intro"]);
    }
}
