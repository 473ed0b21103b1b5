//! Integration tests for the tus protocol client

use std::collections::BTreeMap;

use hoisync_api::tus::{encode_upload_metadata, OFFSET_CONTENT_TYPE};
use hoisync_api::ApiError;
use wiremock::matchers::{body_bytes, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

fn session_headers() -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("Authorization".to_string(), "Bearer secret".to_string());
    headers.insert(
        "Upload-Metadata".to_string(),
        encode_upload_metadata(&[("itemId".to_string(), "asset-1".to_string())]),
    );
    headers
}

#[tokio::test]
async fn test_create_upload_resolves_relative_location() {
    let (server, client) = common::setup_tus_mock().await;
    Mock::given(method("POST"))
        .and(path("/tus"))
        .and(header("Tus-Resumable", "1.0.0"))
        .and(header("Upload-Length", "10"))
        .and(header("Authorization", "Bearer secret"))
        .and(header("Upload-Metadata", "itemId YXNzZXQtMQ=="))
        .respond_with(ResponseTemplate::new(201).insert_header("Location", "/tus/abc123"))
        .expect(1)
        .mount(&server)
        .await;

    let upload_url = client.create_upload(10, &session_headers()).await.unwrap();
    assert_eq!(upload_url, format!("{}/tus/abc123", server.uri()));
}

#[tokio::test]
async fn test_create_upload_without_location_is_invalid() {
    let (server, client) = common::setup_tus_mock().await;
    Mock::given(method("POST"))
        .and(path("/tus"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;

    let err = client.create_upload(10, &session_headers()).await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_create_upload_unauthorized_is_permanent() {
    let (server, client) = common::setup_tus_mock().await;
    Mock::given(method("POST"))
        .and(path("/tus"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .mount(&server)
        .await;

    let err = client.create_upload(10, &session_headers()).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_probe_offset() {
    let (server, client) = common::setup_tus_mock().await;
    Mock::given(method("HEAD"))
        .and(path("/tus/abc"))
        .and(header("Tus-Resumable", "1.0.0"))
        .respond_with(ResponseTemplate::new(200).insert_header("Upload-Offset", "4"))
        .mount(&server)
        .await;

    let url = format!("{}/tus/abc", server.uri());
    assert_eq!(client.probe_offset(&url, &session_headers()).await.unwrap(), 4);
}

#[tokio::test]
async fn test_probe_missing_upload_is_not_found() {
    let (server, client) = common::setup_tus_mock().await;
    Mock::given(method("HEAD"))
        .and(path("/tus/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let url = format!("{}/tus/gone", server.uri());
    let err = client.probe_offset(&url, &session_headers()).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn test_upload_chunk_sends_offset_and_body() {
    let (server, client) = common::setup_tus_mock().await;
    Mock::given(method("PATCH"))
        .and(path("/tus/abc"))
        .and(header("Content-Type", OFFSET_CONTENT_TYPE))
        .and(header("Upload-Offset", "4"))
        .and(body_bytes(b"efgh".to_vec()))
        .respond_with(ResponseTemplate::new(204).insert_header("Upload-Offset", "8"))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/tus/abc", server.uri());
    let offset = client
        .upload_chunk(&url, &session_headers(), 4, b"efgh".to_vec())
        .await
        .unwrap();
    assert_eq!(offset, 8);
}

#[tokio::test]
async fn test_upload_chunk_offset_conflict() {
    let (server, client) = common::setup_tus_mock().await;
    Mock::given(method("PATCH"))
        .and(path("/tus/abc"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let url = format!("{}/tus/abc", server.uri());
    let err = client
        .upload_chunk(&url, &session_headers(), 0, vec![0u8; 4])
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_terminate_tolerates_unknown_upload() {
    let (server, client) = common::setup_tus_mock().await;
    Mock::given(method("DELETE"))
        .and(path("/tus/abc"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/tus/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let headers = session_headers();
    client
        .terminate(&format!("{}/tus/abc", server.uri()), &headers)
        .await
        .unwrap();
    client
        .terminate(&format!("{}/tus/gone", server.uri()), &headers)
        .await
        .unwrap();
}
