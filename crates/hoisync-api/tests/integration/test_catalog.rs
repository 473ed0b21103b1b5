//! Integration tests for the metadata client

use hoisync_api::StorageClient;
use hoisync_core::domain::{CatalogLookup, StableId};
use hoisync_core::ports::IRemoteCatalog;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{self, API_KEY};

fn item(id: &str) -> StableId {
    StableId::new(id).unwrap()
}

// ============================================================================
// Health check
// ============================================================================

#[tokio::test]
async fn test_health_check_ok() {
    let (server, client) = common::setup_storage_mock().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .and(query_param("api_key", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": "Hello"
        })))
        .mount(&server)
        .await;

    assert!(client.health_check().await);
}

#[tokio::test]
async fn test_health_check_rejects_error_status() {
    let (server, client) = common::setup_storage_mock().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "message": "Invalid api key"
        })))
        .mount(&server)
        .await;

    assert!(!client.health_check().await);
}

#[tokio::test]
async fn test_health_check_rejects_malformed_body() {
    let (server, client) = common::setup_storage_mock().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    assert!(!client.health_check().await);
}

#[tokio::test]
async fn test_health_check_unconfigured_is_false() {
    let client = StorageClient::new("", "");
    assert!(!client.health_check().await);
}

// ============================================================================
// Lookups
// ============================================================================

#[tokio::test]
async fn test_get_by_item_id_found() {
    let (server, client) = common::setup_storage_mock().await;
    common::mount_metadata_route(
        &server,
        "/metadata-by-item-id/asset-1",
        200,
        serde_json::json!({ "body": [common::metadata_json(7, "asset-1")] }),
    )
    .await;

    let lookup = client.get_by_item_id(&item("asset-1")).await;
    let record = lookup.into_record().expect("record should be found");
    assert_eq!(record.id, 7);
    assert_eq!(record.item_id, "asset-1");
    assert_eq!(record.filekey.as_deref(), Some("key-7"));
}

#[tokio::test]
async fn test_get_by_item_id_encodes_slashes() {
    let (server, client) = common::setup_storage_mock().await;
    common::mount_metadata_route(
        &server,
        "/metadata-by-item-id/ED7A%2FL0%2F001",
        200,
        serde_json::json!({ "body": [common::metadata_json(1, "ED7A/L0/001")] }),
    )
    .await;

    assert!(client.get_by_item_id(&item("ED7A/L0/001")).await.is_found());
}

#[tokio::test]
async fn test_empty_body_is_not_found() {
    let (server, client) = common::setup_storage_mock().await;
    common::mount_metadata_route(
        &server,
        "/metadata-by-item-id/missing",
        200,
        serde_json::json!({ "message": "No metadata", "body": [] }),
    )
    .await;

    assert_eq!(
        client.get_by_item_id(&item("missing")).await,
        CatalogLookup::NotFound
    );
}

#[tokio::test]
async fn test_missing_body_field_is_not_found() {
    let (server, client) = common::setup_storage_mock().await;
    common::mount_metadata_route(
        &server,
        "/metadata-by-item-id/missing",
        200,
        serde_json::json!({ "message": "No metadata" }),
    )
    .await;

    assert_eq!(
        client.get_by_item_id(&item("missing")).await,
        CatalogLookup::NotFound
    );
}

#[tokio::test]
async fn test_zero_length_body_is_not_found() {
    let (server, client) = common::setup_storage_mock().await;
    Mock::given(method("GET"))
        .and(path("/metadata-by-item-id/missing"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    assert_eq!(
        client.get_by_item_id(&item("missing")).await,
        CatalogLookup::NotFound
    );
}

#[tokio::test]
async fn test_404_is_not_found() {
    let (server, client) = common::setup_storage_mock().await;
    common::mount_metadata_route(
        &server,
        "/metadata-by-item-id/missing",
        404,
        serde_json::json!({ "message": "Not found" }),
    )
    .await;

    assert_eq!(
        client.get_by_item_id(&item("missing")).await,
        CatalogLookup::NotFound
    );
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (server, client) = common::setup_storage_mock().await;
    common::mount_metadata_route(
        &server,
        "/metadata-by-item-id/asset-1",
        503,
        serde_json::json!({ "message": "Maintenance" }),
    )
    .await;

    assert!(matches!(
        client.get_by_item_id(&item("asset-1")).await,
        CatalogLookup::TransientError(_)
    ));
}

#[tokio::test]
async fn test_decode_failure_is_transient_not_absent() {
    let (server, client) = common::setup_storage_mock().await;
    Mock::given(method("GET"))
        .and(path("/metadata-by-item-id/asset-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{\"body\": [{\"id\": \"x\"}]}"))
        .mount(&server)
        .await;

    assert!(matches!(
        client.get_by_item_id(&item("asset-1")).await,
        CatalogLookup::TransientError(_)
    ));
}

#[tokio::test]
async fn test_network_failure_is_transient() {
    let client = StorageClient::new("http://127.0.0.1:9", API_KEY);
    assert!(matches!(
        client.get_by_item_id(&item("asset-1")).await,
        CatalogLookup::TransientError(_)
    ));
}

#[tokio::test]
async fn test_unconfigured_lookup_is_transient() {
    let client = StorageClient::new("https://photos.example.com", "");
    assert!(matches!(
        client.get_by_item_id(&item("asset-1")).await,
        CatalogLookup::TransientError(_)
    ));
}

#[tokio::test]
async fn test_get_by_id_and_filekey() {
    let (server, client) = common::setup_storage_mock().await;
    common::mount_metadata_route(
        &server,
        "/metadata-by-id/42",
        200,
        serde_json::json!({ "body": [common::metadata_json(42, "a")] }),
    )
    .await;
    common::mount_metadata_route(
        &server,
        "/metadata-by-filekey/key-42",
        200,
        serde_json::json!({ "body": [common::metadata_json(42, "a")] }),
    )
    .await;

    assert_eq!(client.get_by_id(42).await.record().map(|r| r.id), Some(42));
    assert_eq!(
        client.get_by_filekey("key-42").await.record().map(|r| r.id),
        Some(42)
    );
}

// ============================================================================
// Listing, deletion, labels, downloads
// ============================================================================

#[tokio::test]
async fn test_list_metadata() {
    let (server, client) = common::setup_storage_mock().await;
    common::mount_metadata_route(
        &server,
        "/metadata",
        200,
        serde_json::json!({
            "body": [common::metadata_json(1, "a"), common::metadata_json(2, "b")]
        }),
    )
    .await;

    let records = client.list_metadata().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].item_id, "b");
}

#[tokio::test]
async fn test_list_metadata_error_status() {
    let (server, client) = common::setup_storage_mock().await;
    common::mount_metadata_route(
        &server,
        "/metadata",
        500,
        serde_json::json!({ "message": "db down" }),
    )
    .await;

    assert!(client.list_metadata().await.is_err());
}

#[tokio::test]
async fn test_delete_record_reports_status_and_message() {
    let (server, client) = common::setup_storage_mock().await;
    Mock::given(method("DELETE"))
        .and(path("/file/42"))
        .and(query_param("api_key", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": "Deleted"
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/file/43"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "message": "Not yours"
        })))
        .mount(&server)
        .await;

    let ok = client.delete_record(42).await.unwrap();
    assert!(ok.is_success());
    assert_eq!(ok.message, "Deleted");

    let denied = client.delete_record(43).await.unwrap();
    assert_eq!(denied.status, 403);
    assert!(!denied.is_success());
    assert_eq!(denied.message, "Not yours");
}

#[tokio::test]
async fn test_upload_labels_posts_array() {
    let (server, client) = common::setup_storage_mock().await;
    Mock::given(method("POST"))
        .and(path("/labels/asset-1"))
        .and(body_json(serde_json::json!(["beach", "dog"])))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "message": "Labels saved"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let result = client
        .upload_labels(&item("asset-1"), &["beach".to_string(), "dog".to_string()])
        .await
        .unwrap();
    assert_eq!(result.status, 201);
}

#[tokio::test]
async fn test_list_labels_groups_by_metadata_id() {
    let (server, client) = common::setup_storage_mock().await;
    Mock::given(method("GET"))
        .and(path("/labels"))
        .and(query_param("api_key", API_KEY))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "body": [
                { "id": 1, "metadata_id": 42, "user_id": 7, "labelname": "beach" },
                { "id": 2, "metadata_id": 43, "user_id": 7, "labelname": "dog" },
                { "id": 3, "metadata_id": 42, "user_id": 7, "labelname": "sunset" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let labels = client.list_labels().await.unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels[&42], vec!["beach".to_string(), "sunset".to_string()]);
    assert_eq!(labels[&43], vec!["dog".to_string()]);
}

#[tokio::test]
async fn test_list_labels_without_body_is_empty() {
    let (server, client) = common::setup_storage_mock().await;
    Mock::given(method("GET"))
        .and(path("/labels"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "message": "No labels"
        })))
        .mount(&server)
        .await;

    assert!(client.list_labels().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_labels_error_status() {
    let (server, client) = common::setup_storage_mock().await;
    Mock::given(method("GET"))
        .and(path("/labels"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "message": "Bad key"
        })))
        .mount(&server)
        .await;

    assert!(client.list_labels().await.is_err());
}

#[tokio::test]
async fn test_downloads_return_bytes() {
    let (server, client) = common::setup_storage_mock().await;
    Mock::given(method("GET"))
        .and(path("/thumbnail/key-1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/file/key-1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; 64]))
        .mount(&server)
        .await;

    assert_eq!(client.download_thumbnail("key-1").await.unwrap(), vec![1, 2, 3]);
    assert_eq!(client.download_file("key-1").await.unwrap().len(), 64);

    let url = client.file_url("key-1").unwrap();
    assert_eq!(url.path(), "/file/key-1");
    assert_eq!(url.query(), Some("api_key=test-api-key"));
}
