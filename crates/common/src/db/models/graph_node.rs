//! Graph node entity - one concept per row, unique within a project
//!
//! Links are stored as arrays of concept ids; the inbound side is always
//! derived from outbound edges before persistence, never trusted from
//! upstream extraction.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "graph_nodes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub project_id: Uuid,

    /// Canonical concept id: lowercase, spaces, singular
    pub concept_id: String,

    /// Generated study note (markdown); null until export generation
    #[sea_orm(column_type = "Text", nullable)]
    pub content: Option<String>,

    pub aliases: Vec<String>,

    pub outbound_links: Vec<String>,

    pub inbound_links: Vec<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub node_metadata: Json,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Node has no generated note yet
    pub fn is_missing_content(&self) -> bool {
        self.content.as_deref().map(str::is_empty).unwrap_or(true)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id",
        on_delete = "Cascade"
    )]
    Project,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(content: Option<&str>) -> Model {
        Model {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            concept_id: "neural network".into(),
            content: content.map(String::from),
            aliases: vec!["neural net".into()],
            outbound_links: vec!["backpropagation".into()],
            inbound_links: vec![],
            node_metadata: serde_json::json!({}),
            created_at: chrono::Utc::now().into(),
            updated_at: chrono::Utc::now().into(),
        }
    }

    #[test]
    fn test_missing_content() {
        assert!(node(None).is_missing_content());
        assert!(node(Some("")).is_missing_content());
        assert!(!node(Some("a note")).is_missing_content());
    }
}
