// ABOUTME: Core types shared by every Shipyard package
// ABOUTME: Generated file sets, chat messages, build status, and sandbox identities

pub mod chat;
pub mod files;
pub mod ids;
pub mod status;

pub use chat::{ChatMessage, ChatRole, MessageKind};
pub use files::{validate_file_path, FileSetError, FileSetLimits, GeneratedFileSet};
pub use ids::{SandboxId, ServedOrigin};
pub use status::{BuildStatus, FAILED_LABEL, WAITING_LABEL};
