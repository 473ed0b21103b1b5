//! tus 1.0.0 resumable upload protocol
//!
//! - [`TusClient::create_upload`] - `POST {host}/tus`, returns the upload URL
//! - [`TusClient::probe_offset`] - `HEAD <upload_url>`, returns `Upload-Offset`
//! - [`TusClient::upload_chunk`] - `PATCH <upload_url>` with one chunk
//! - [`TusClient::terminate`] - `DELETE <upload_url>` (termination extension)
//!
//! Callers own retry policy; every method performs exactly one request.
//!
//! ## References
//!
//! - [tus resumable upload protocol 1.0.0](https://tus.io/protocols/resumable-upload)

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hoisync_core::domain::ServerEndpoint;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::debug;
use url::Url;

use crate::ApiError;

pub const TUS_RESUMABLE: &str = "Tus-Resumable";
pub const TUS_VERSION: &str = "1.0.0";
pub const UPLOAD_LENGTH: &str = "Upload-Length";
pub const UPLOAD_OFFSET: &str = "Upload-Offset";
pub const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";

/// Creation route relative to the host
const CREATION_ROUTE: &str = "tus";

/// Serializes metadata as `key base64(value)` pairs joined by commas
pub fn encode_upload_metadata(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{} {}", key, STANDARD.encode(value.as_bytes())))
        .collect::<Vec<_>>()
        .join(",")
}

/// Client for one server's tus endpoint
#[derive(Debug, Clone)]
pub struct TusClient {
    client: Client,
    creation_url: Url,
}

impl TusClient {
    /// Creates a client whose creation endpoint is `{host}/tus`
    pub fn new(host: &str) -> Result<Self, ApiError> {
        let mut creation_url = Url::parse(host.trim_end_matches('/'))?;
        creation_url
            .path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(format!("{} cannot be a base", host)))?
            .pop_if_empty()
            .push(CREATION_ROUTE);
        Ok(Self {
            client: Client::new(),
            creation_url,
        })
    }

    pub fn from_endpoint(endpoint: &ServerEndpoint) -> Result<Self, ApiError> {
        Self::new(endpoint.host())
    }

    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn creation_url(&self) -> &Url {
        &self.creation_url
    }

    fn request(
        &self,
        method: Method,
        url: &str,
        headers: &BTreeMap<String, String>,
    ) -> RequestBuilder {
        headers
            .iter()
            .fold(self.client.request(method, url), |builder, (name, value)| {
                builder.header(name.as_str(), value.as_str())
            })
            .header(TUS_RESUMABLE, TUS_VERSION)
    }

    async fn check_status(response: Response) -> Result<Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, text.trim()))
    }

    fn offset_header(response: &Response) -> Result<u64, ApiError> {
        response
            .headers()
            .get(UPLOAD_OFFSET)
            .ok_or_else(|| ApiError::InvalidResponse("missing Upload-Offset header".into()))?
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| ApiError::InvalidResponse("malformed Upload-Offset header".into()))
    }

    /// Creates an upload of `total_bytes` and returns its absolute URL
    ///
    /// `headers` carries the session's stored `Authorization` and
    /// `Upload-Metadata`. A relative `Location` is resolved against the
    /// creation URL.
    pub async fn create_upload(
        &self,
        total_bytes: u64,
        headers: &BTreeMap<String, String>,
    ) -> Result<String, ApiError> {
        debug!(url = %self.creation_url, total_bytes, "Creating tus upload");

        let response = self
            .request(Method::POST, self.creation_url.as_str(), headers)
            .header(UPLOAD_LENGTH, total_bytes.to_string())
            .header(reqwest::header::CONTENT_LENGTH, "0")
            .send()
            .await?;
        let response = Self::check_status(response).await?;

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::InvalidResponse("missing Location header".into()))?;
        let upload_url = self.creation_url.join(location)?;

        debug!(upload_url = %upload_url, "Upload created");
        Ok(upload_url.to_string())
    }

    /// Asks the server how many bytes of the upload it already has
    pub async fn probe_offset(
        &self,
        upload_url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<u64, ApiError> {
        let response = self
            .request(Method::HEAD, upload_url, headers)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let offset = Self::offset_header(&response)?;
        debug!(upload_url, offset, "Probed upload offset");
        Ok(offset)
    }

    /// Sends `data` at `offset` and returns the server's new offset
    pub async fn upload_chunk(
        &self,
        upload_url: &str,
        headers: &BTreeMap<String, String>,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<u64, ApiError> {
        let chunk_len = data.len();
        debug!(upload_url, offset, chunk_len, "Uploading chunk");

        let response = self
            .request(Method::PATCH, upload_url, headers)
            .header(reqwest::header::CONTENT_TYPE, OFFSET_CONTENT_TYPE)
            .header(UPLOAD_OFFSET, offset.to_string())
            .body(data)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Self::offset_header(&response)
    }

    /// Deletes the upload on the server; an unknown upload is not an error
    pub async fn terminate(
        &self,
        upload_url: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<(), ApiError> {
        let response = self
            .request(Method::DELETE, upload_url, headers)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND || response.status() == StatusCode::GONE {
            return Ok(());
        }
        Self::check_status(response).await?;
        debug!(upload_url, "Upload terminated");
        Ok(())
    }
}
