use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use ongoarr::config::Config;
use ongoarr::db::MemoryStore;
use ongoarr::state::SharedState;
use tower::ServiceExt;

fn spawn_app() -> Router {
    let shared = SharedState::with_store(Config::default(), Arc::new(MemoryStore::new()))
        .expect("Failed to create app state");
    ongoarr::api::router(ongoarr::api::create_app_state(Arc::new(shared), None))
}

async fn post_notifications(app: &Router, payload: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/notifications")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body_json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    (status, body_json)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let body_json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    (status, body_json)
}

const BATCH: &str = r#"{
    "items": [
        { "videoKey": { "myAnimeListId": 21, "dub": "ja", "episode": 1 } },
        { "videoKey": { "myAnimeListId": 21, "dub": "ja", "episode": 3 } },
        { "videoKey": { "myAnimeListId": 5114, "dub": "en", "episode": 2 } }
    ]
}"#;

#[tokio::test]
async fn test_ingest_creates_and_lists_titles() {
    let app = spawn_app();

    let (status, json) = post_notifications(&app, BATCH).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["titles_seen"], 2);
    assert_eq!(json["data"]["created"], 2);
    assert_eq!(json["data"]["episodes_added"], 3);
    assert_eq!(json["data"]["conflicts"], 0);

    let (status, json) = get_json(&app, "/api/titles").await;
    assert_eq!(status, StatusCode::OK);
    let titles = json["data"].as_array().expect("data should be an array");
    assert_eq!(titles.len(), 2);
    // Listed in storage-key order.
    assert_eq!(titles[0]["mal_id"], 21);
    assert_eq!(titles[0]["dub"], "ja");
    assert_eq!(titles[0]["episode_count"], 2);
    assert_eq!(titles[0]["first_episode"], 1);
    assert_eq!(titles[0]["last_episode"], 3);
    assert_eq!(titles[1]["mal_id"], 5114);
    assert_eq!(titles[1]["dub"], "en");
    assert_eq!(titles[1]["episode_count"], 1);
}

#[tokio::test]
async fn test_redelivered_batch_changes_nothing() {
    let app = spawn_app();

    post_notifications(&app, BATCH).await;
    let (status, json) = post_notifications(&app, BATCH).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["created"], 0);
    assert_eq!(json["data"]["episodes_added"], 0);

    let (_, json) = get_json(&app, "/api/titles").await;
    assert_eq!(json["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_ingest_rejects_malformed_payloads() {
    let app = spawn_app();

    let (status, json) = post_notifications(&app, "{ definitely not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert!(
        json["error"]
            .as_str()
            .unwrap()
            .contains("invalid notification payload")
    );

    let bad_key =
        r#"{ "items": [{ "videoKey": { "myAnimeListId": 21, "dub": "", "episode": 2 } }] }"#;
    let (status, json) = post_notifications(&app, bad_key).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);

    // Rejected batches must not leave partial state behind.
    let (_, json) = get_json(&app, "/api/titles").await;
    assert!(json["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_items_field_is_an_empty_batch() {
    let app = spawn_app();

    let (status, json) = post_notifications(&app, "{}").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["titles_seen"], 0);
    assert_eq!(json["data"]["episodes_added"], 0);
}

#[tokio::test]
async fn test_title_detail_and_missing_title() {
    let app = spawn_app();
    post_notifications(&app, BATCH).await;

    let (status, json) = get_json(&app, "/api/titles/21/ja").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["data"]["mal_id"], 21);
    assert_eq!(json["data"]["dub"], "ja");
    assert_eq!(json["data"]["episodes"], serde_json::json!([1, 3]));
    assert!(json["data"]["created_at"].as_str().unwrap().ends_with('Z'));

    let (status, json) = get_json(&app, "/api/titles/21/de").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "Title 21#de not found");

    let (status, json) = get_json(&app, "/api/titles/-1/en").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "title id must be non-negative");
}

#[tokio::test]
async fn test_health_reports_database_ok() {
    let app = spawn_app();

    let (status, json) = get_json(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["status"], "ok");
    assert_eq!(json["data"]["database"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_without_recorder() {
    let app = spawn_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("Metrics not enabled"));
}
