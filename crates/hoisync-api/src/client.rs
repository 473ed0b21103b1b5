//! Backup server metadata client
//!
//! Every route lives under the configured host and carries the api key as a
//! query parameter: `{host}/{route}[/{parameter}]?api_key={key}`. Responses
//! share one envelope, `{ "message": string?, "body": [..]? }`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use hoisync_api::StorageClient;
//! use hoisync_core::domain::StableId;
//! use hoisync_core::ports::IRemoteCatalog;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = StorageClient::new("https://photos.example.com", "api-key");
//! let lookup = client.get_by_item_id(&StableId::new("IMG_0001")?).await;
//! println!("already uploaded: {}", lookup.is_found());
//! # Ok(())
//! # }
//! ```

use hoisync_core::domain::{
    index_labels, CatalogLookup, LabelIndex, MetadataLabel, RemoteMetadataRecord, ServerEndpoint,
    StableId,
};
use hoisync_core::ports::{IRemoteCatalog, StatusMessage};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::ApiError;

const ROUTE_METADATA: &str = "metadata";
const ROUTE_METADATA_BY_ITEM_ID: &str = "metadata-by-item-id";
const ROUTE_METADATA_BY_ID: &str = "metadata-by-id";
const ROUTE_METADATA_BY_FILEKEY: &str = "metadata-by-filekey";
const ROUTE_FILE: &str = "file";
const ROUTE_THUMBNAIL: &str = "thumbnail";
const ROUTE_LABELS: &str = "labels";

// ============================================================================
// Response types
// ============================================================================

/// Envelope returned by the metadata and label listing routes
#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    message: Option<String>,
    body: Option<Vec<T>>,
}

impl<T> Default for ListResponse<T> {
    fn default() -> Self {
        Self {
            message: None,
            body: None,
        }
    }
}

/// Envelope returned by health, delete and labels
#[derive(Debug, Deserialize)]
struct MessageResponse {
    message: Option<String>,
}

/// Extracts `message` from a JSON body, falling back to the raw text
fn message_of(text: &str) -> String {
    serde_json::from_str::<MessageResponse>(text)
        .ok()
        .and_then(|r| r.message)
        .unwrap_or_else(|| text.trim().to_string())
}

// ============================================================================
// StorageClient
// ============================================================================

/// HTTP client for the backup server's metadata and file routes
///
/// Holds the raw host and key so an unconfigured client can exist; every
/// request is refused locally with [`ApiError::NotConfigured`] until both
/// are set.
#[derive(Debug, Clone)]
pub struct StorageClient {
    client: Client,
    host: String,
    api_key: String,
}

impl StorageClient {
    pub fn new(host: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            host: host.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn from_endpoint(endpoint: &ServerEndpoint) -> Self {
        Self::new(endpoint.host(), endpoint.api_key())
    }

    /// Shares an existing connection pool
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_configured(&self) -> bool {
        !self.host.trim().is_empty() && !self.api_key.trim().is_empty()
    }

    /// Builds `{host}/{route}[/{parameter}]?api_key={key}`
    ///
    /// The parameter is a single percent-encoded path segment, so ids that
    /// contain `/` stay intact.
    pub fn build_url(&self, route: &str, parameter: Option<&str>) -> Result<Url, ApiError> {
        if !self.is_configured() {
            return Err(ApiError::NotConfigured);
        }

        let mut url = Url::parse(&self.host)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ApiError::InvalidUrl(format!("{} cannot be a base", self.host)))?;
            segments.pop_if_empty();
            if !route.is_empty() {
                segments.push(route);
            }
            if let Some(parameter) = parameter {
                segments.push(parameter);
            }
        }
        url.query_pairs_mut().append_pair("api_key", &self.api_key);
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        route: &str,
        parameter: Option<&str>,
    ) -> Result<RequestBuilder, ApiError> {
        let url = self.build_url(route, parameter)?;
        Ok(self.client.request(method, url))
    }

    /// Turns a non-success response into an [`ApiError`]
    async fn check_status(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, message_of(&text)))
    }

    /// GETs a listing route and decodes the envelope
    ///
    /// An empty 200 body decodes to an empty envelope.
    async fn fetch_list<T: DeserializeOwned>(
        &self,
        route: &str,
        parameter: Option<&str>,
    ) -> Result<ListResponse<T>, ApiError> {
        let response = self.request(Method::GET, route, parameter)?.send().await?;
        let response = Self::check_status(response).await?;
        let bytes = response.bytes().await?;

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(ListResponse::default());
        }
        serde_json::from_slice(&bytes).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    async fn lookup(&self, route: &str, parameter: &str) -> CatalogLookup {
        match self
            .fetch_list::<RemoteMetadataRecord>(route, Some(parameter))
            .await
        {
            Ok(envelope) => match envelope.body.and_then(|body| body.into_iter().next()) {
                Some(record) => CatalogLookup::Found(Box::new(record)),
                None => {
                    debug!(
                        route,
                        parameter,
                        message = envelope.message.as_deref().unwrap_or("Unknown"),
                        "No metadata returned"
                    );
                    CatalogLookup::NotFound
                }
            },
            Err(ApiError::NotFound(message)) => {
                debug!(route, parameter, %message, "Metadata not found");
                CatalogLookup::NotFound
            }
            Err(e) => {
                warn!(route, parameter, error = %e, "Metadata lookup failed");
                CatalogLookup::TransientError(e.to_string())
            }
        }
    }

    /// Sends a request and reports `(status, message)` without judging it
    async fn status_message(&self, builder: RequestBuilder) -> Result<StatusMessage, ApiError> {
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<MessageResponse>(&text)
            .ok()
            .and_then(|r| r.message)
            .unwrap_or_else(|| "Unknown".to_string());
        Ok(StatusMessage { status, message })
    }

    async fn download(&self, route: &str, filekey: &str) -> Result<Vec<u8>, ApiError> {
        let response = self.request(Method::GET, route, Some(filekey))?.send().await?;
        let response = Self::check_status(response).await?;
        let bytes = response.bytes().await?;
        debug!(route, filekey, bytes = bytes.len(), "Downloaded media");
        Ok(bytes.to_vec())
    }

    /// Thumbnail bytes of a stored file
    pub async fn download_thumbnail(&self, filekey: &str) -> Result<Vec<u8>, ApiError> {
        self.download(ROUTE_THUMBNAIL, filekey).await
    }

    /// Full content of a stored file
    pub async fn download_file(&self, filekey: &str) -> Result<Vec<u8>, ApiError> {
        self.download(ROUTE_FILE, filekey).await
    }

    /// Streamable URL of a stored file
    pub fn file_url(&self, filekey: &str) -> Result<Url, ApiError> {
        self.build_url(ROUTE_FILE, Some(filekey))
    }
}

// ============================================================================
// IRemoteCatalog implementation
// ============================================================================

#[async_trait::async_trait]
impl IRemoteCatalog for StorageClient {
    async fn health_check(&self) -> bool {
        let builder = match self.request(Method::GET, "", None) {
            Ok(b) => b,
            Err(e) => {
                debug!(error = %e, "Health check skipped");
                return false;
            }
        };

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Health check request failed");
                return false;
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<MessageResponse>(&text) {
            Ok(_) if status.as_u16() == 200 => true,
            Ok(body) => {
                warn!(
                    status = status.as_u16(),
                    message = body.message.as_deref().unwrap_or("Unknown"),
                    "Health check failed"
                );
                false
            }
            Err(e) => {
                warn!(status = status.as_u16(), error = %e, "Health check response malformed");
                false
            }
        }
    }

    async fn get_by_item_id(&self, item_id: &StableId) -> CatalogLookup {
        self.lookup(ROUTE_METADATA_BY_ITEM_ID, item_id.as_str()).await
    }

    async fn get_by_id(&self, id: i64) -> CatalogLookup {
        self.lookup(ROUTE_METADATA_BY_ID, &id.to_string()).await
    }

    async fn get_by_filekey(&self, filekey: &str) -> CatalogLookup {
        self.lookup(ROUTE_METADATA_BY_FILEKEY, filekey).await
    }

    async fn list_metadata(&self) -> anyhow::Result<Vec<RemoteMetadataRecord>> {
        let envelope = self
            .fetch_list::<RemoteMetadataRecord>(ROUTE_METADATA, None)
            .await?;
        let records = envelope.body.unwrap_or_default();
        debug!(count = records.len(), "Listed metadata");
        Ok(records)
    }

    async fn list_labels(&self) -> anyhow::Result<LabelIndex> {
        let envelope = self.fetch_list::<MetadataLabel>(ROUTE_LABELS, None).await?;
        let labels = envelope.body.unwrap_or_default();
        debug!(count = labels.len(), "Listed labels");
        Ok(index_labels(labels))
    }

    async fn delete_record(&self, id: i64) -> anyhow::Result<StatusMessage> {
        let builder = self.request(Method::DELETE, ROUTE_FILE, Some(&id.to_string()))?;
        let result = self.status_message(builder).await?;
        if result.is_success() {
            debug!(id, status = result.status, message = %result.message, "Delete successful");
        } else {
            warn!(id, status = result.status, message = %result.message, "Delete failed");
        }
        Ok(result)
    }

    async fn upload_labels(
        &self,
        item_id: &StableId,
        labels: &[String],
    ) -> anyhow::Result<StatusMessage> {
        let builder = self
            .request(Method::POST, ROUTE_LABELS, Some(item_id.as_str()))?
            .json(labels);
        let result = self.status_message(builder).await?;
        debug!(item_id = %item_id, status = result.status, "Uploaded labels");
        Ok(result)
    }
}
