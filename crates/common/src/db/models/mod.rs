//! SeaORM entity models
//!
//! Database entities for GraphVault: projects, files, chunks, graph nodes.

mod chunk;
mod file;
mod graph_node;
mod project;

pub use project::{
    ActiveModel as ProjectActiveModel, Column as ProjectColumn, Entity as ProjectEntity,
    ExportState, ExportStatus, Model as Project, ProjectMetadata, ProjectStatus,
};

pub use file::{
    ActiveModel as FileActiveModel, Column as FileColumn, Entity as FileEntity, Model as File,
};

pub use chunk::{
    ActiveModel as ChunkActiveModel, ChunkMetadata, Column as ChunkColumn, Entity as ChunkEntity,
    Model as Chunk,
};

pub use graph_node::{
    ActiveModel as GraphNodeActiveModel, Column as GraphNodeColumn, Entity as GraphNodeEntity,
    Model as GraphNode,
};
