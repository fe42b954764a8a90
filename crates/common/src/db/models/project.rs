//! Project entity with free-form metadata blob
//!
//! `project_metadata` is persisted as JSONB. Recognized keys get a typed
//! view (`ProjectMetadata`); unknown keys pass through untouched.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Project lifecycle status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Processing,
    Complete,
    Failed,
}

impl From<&str> for ProjectStatus {
    fn from(s: &str) -> Self {
        match s {
            "complete" => ProjectStatus::Complete,
            "failed" => ProjectStatus::Failed,
            _ => ProjectStatus::Processing,
        }
    }
}

impl From<ProjectStatus> for String {
    fn from(status: ProjectStatus) -> Self {
        match status {
            ProjectStatus::Processing => "processing".to_string(),
            ProjectStatus::Complete => "complete".to_string(),
            ProjectStatus::Failed => "failed".to_string(),
        }
    }
}

/// Export pipeline state stored under `project_metadata.export`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportState {
    pub status: ExportStatus,
    #[serde(default)]
    pub progress: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Pending,
    Generating,
    Complete,
    Failed,
}

/// Typed view over the metadata blob. Unknown keys survive a
/// parse/serialize round trip via `extra`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ProjectMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_cache_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportState>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ProjectMetadata {
    pub fn from_value(value: &serde_json::Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({}))
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "projects")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Option<Uuid>,

    pub title: String,

    /// processing | complete | failed
    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub project_metadata: Json,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn project_status(&self) -> ProjectStatus {
        ProjectStatus::from(self.status.as_str())
    }

    /// Parse the metadata blob into its typed view
    pub fn metadata(&self) -> ProjectMetadata {
        ProjectMetadata::from_value(&self.project_metadata)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::file::Entity")]
    File,

    #[sea_orm(has_many = "super::graph_node::Entity")]
    GraphNode,
}

impl Related<super::file::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::File.def()
    }
}

impl Related<super::graph_node::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GraphNode.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_round_trip_preserves_unknown_keys() {
        let raw = serde_json::json!({
            "gemini_cache_name": "cachedContents/abc",
            "export": {"status": "generating", "progress": 40},
            "theme": "dark"
        });

        let meta = ProjectMetadata::from_value(&raw);
        assert_eq!(meta.gemini_cache_name.as_deref(), Some("cachedContents/abc"));
        assert_eq!(meta.export.as_ref().unwrap().progress, 40);
        assert_eq!(meta.extra.get("theme").unwrap(), "dark");

        let back = meta.to_value();
        assert_eq!(back.get("theme").unwrap(), "dark");
        assert_eq!(
            back.get("export").unwrap().get("status").unwrap(),
            "generating"
        );
    }

    #[test]
    fn test_status_round_trip() {
        assert_eq!(ProjectStatus::from("complete"), ProjectStatus::Complete);
        assert_eq!(String::from(ProjectStatus::Failed), "failed");
        // unknown statuses default to processing
        assert_eq!(ProjectStatus::from("bogus"), ProjectStatus::Processing);
    }
}
