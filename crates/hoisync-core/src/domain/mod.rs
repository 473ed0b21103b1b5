//! Domain entities and business logic
//!
//! This module contains the core domain types for HoiSync:
//! - Newtypes for identifiers, the server endpoint and the sync watermark
//! - Local asset descriptors
//! - Upload items and persisted upload sessions
//! - Progress records
//! - Server metadata records
//! - Domain-specific error types

pub mod asset;
pub mod errors;
pub mod metadata;
pub mod newtypes;
pub mod progress;
pub mod upload;

// Re-export commonly used types
pub use asset::{AssetDescriptor, AuthorizationStatus, MediaKind};
pub use errors::DomainError;
pub use metadata::{
    index_labels, mime_type_for, CatalogLookup, LabelIndex, MetadataLabel, RemoteMetadataRecord,
};
pub use newtypes::*;
pub use progress::{clamp_rate, ProgressRecord};
pub use upload::{UploadItem, UploadSession, UploadStatus};
