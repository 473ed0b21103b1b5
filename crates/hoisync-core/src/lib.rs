//! HoiSync Core - Domain logic and port definitions
//!
//! This crate contains the hexagonal core of the photo sync engine:
//! - **Domain entities** - `UploadItem`, `UploadSession`, `ProgressRecord`, `RemoteMetadataRecord`
//! - **Port definitions** - Traits for adapters: `IAssetSource`, `IRemoteCatalog`,
//!   `IUploadTransport`, `ISettingsStore`, `IProgressStore`, `ISessionStore`, `IMediaSource`
//! - **Configuration** - YAML-backed [`config::Config`]
//!
//! # Architecture
//!
//! The domain module has no I/O. Ports define the trait interfaces that the
//! cache, api and sync crates implement or consume.

pub mod config;
pub mod domain;
pub mod ports;
