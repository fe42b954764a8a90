//! GraphVault export pipeline
//!
//! Drives missing-note batch generation (self-re-enqueueing to stay inside
//! worker time limits), then assembles the markdown vault and uploads the
//! zip artifact.

pub mod note;
pub mod processor;
pub mod repair;
pub mod vault;

pub use note::NoteService;
pub use processor::{ExportProcessor, ExportStep};
pub use repair::repair_note_markdown;
pub use vault::{assemble_vault, format_node_markdown};
