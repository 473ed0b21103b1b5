//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the interfaces the sync engine depends on; their implementations
//! live in adapter crates or, for `IAssetSource`, in the host application.
//!
//! ## Ports Overview
//!
//! - [`IAssetSource`] - Local media library enumeration
//! - [`IRemoteCatalog`] - Server metadata lookups used for dedup
//! - [`IUploadTransport`] - Resumable chunked upload sessions
//! - [`ISettingsStore`], [`IProgressStore`], [`ISessionStore`] - Durable state
//! - [`IMediaSource`] - Thumbnail / full media / video URL capability

pub mod asset_source;
pub mod media_source;
pub mod remote_catalog;
pub mod state_repository;
pub mod upload_transport;

pub use asset_source::IAssetSource;
pub use media_source::IMediaSource;
pub use remote_catalog::{IRemoteCatalog, StatusMessage};
pub use state_repository::{
    IProgressStore, ISessionStore, ISettingsStore, SessionFilter, StoredSession,
};
pub use upload_transport::{IUploadTransport, RetryReport};
