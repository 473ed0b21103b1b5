//! Media capability port
//!
//! Local library assets and server records are both browsable media. Each
//! variant implements this capability; there is no shared base type.

use url::Url;

/// Uniform access to a piece of media regardless of where it lives
#[async_trait::async_trait]
pub trait IMediaSource: Send + Sync {
    /// Small preview image bytes
    async fn thumbnail(&self) -> anyhow::Result<Vec<u8>>;

    /// Full-resolution content
    async fn full_media(&self) -> anyhow::Result<Vec<u8>>;

    /// A URL a player can stream from, for videos only
    fn video_url(&self) -> Option<Url>;

    /// MIME type of the full media
    fn mime_type(&self) -> String;
}
