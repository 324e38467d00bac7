//! Object stage over the S3 backend, against an axum stub that speaks just
//! enough of the S3 REST API (path-style HEAD/PUT bucket, PUT/GET/DELETE
//! object).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, head};
use axum::{Json, Router};
use serde_json::json;
use tempfile::TempDir;

use weather_etl::cache::FetchCache;
use weather_etl::config::S3Config;
use weather_etl::error::StorageError;
use weather_etl::fetcher::SourceFetcher;
use weather_etl::models::RunParams;
use weather_etl::pipeline::Pipeline;
use weather_etl::sink::RelationalSink;
use weather_etl::stage::s3::S3Backend;
use weather_etl::stage::ObjectStage;

const BUCKET: &str = "weather";
const ACCESS_KEY: &str = "test-access";

#[derive(Clone, Default)]
struct FakeS3 {
    buckets: Arc<Mutex<HashSet<String>>>,
    objects: Arc<Mutex<HashMap<String, (Vec<u8>, String)>>>,
}

impl FakeS3 {
    fn with_bucket() -> Self {
        let s3 = Self::default();
        s3.buckets.lock().unwrap().insert(BUCKET.to_string());
        s3
    }

    fn has_bucket(&self, bucket: &str) -> bool {
        self.buckets.lock().unwrap().contains(bucket)
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn content_type(&self, key: &str) -> Option<String> {
        self.objects.lock().unwrap().get(key).map(|(_, ct)| ct.clone())
    }
}

fn denied(headers: &HeaderMap, bucket: &str) -> Option<Response> {
    let signed = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with(&format!("AWS4-HMAC-SHA256 Credential={}/", ACCESS_KEY)))
        .unwrap_or(false);
    let has_payload_hash = headers.contains_key("x-amz-content-sha256");

    if !signed || !has_payload_hash || bucket != BUCKET {
        return Some((StatusCode::FORBIDDEN, "<Error><Code>AccessDenied</Code></Error>").into_response());
    }
    None
}

fn no_such_bucket() -> Response {
    (StatusCode::NOT_FOUND, "<Error><Code>NoSuchBucket</Code></Error>").into_response()
}

async fn head_bucket(
    State(s3): State<FakeS3>,
    Path(bucket): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(resp) = denied(&headers, &bucket) {
        return resp;
    }
    if s3.has_bucket(&bucket) {
        StatusCode::OK.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn create_bucket(
    State(s3): State<FakeS3>,
    Path(bucket): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Some(resp) = denied(&headers, &bucket) {
        return resp;
    }
    s3.buckets.lock().unwrap().insert(bucket);
    StatusCode::OK.into_response()
}

async fn put_object(
    State(s3): State<FakeS3>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(resp) = denied(&headers, &bucket) {
        return resp;
    }
    if !s3.has_bucket(&bucket) {
        return no_such_bucket();
    }
    let key = key.trim_start_matches('/').to_string();
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    s3.objects
        .lock()
        .unwrap()
        .insert(key, (body.to_vec(), content_type));
    StatusCode::OK.into_response()
}

async fn get_object(
    State(s3): State<FakeS3>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Some(resp) = denied(&headers, &bucket) {
        return resp;
    }
    if !s3.has_bucket(&bucket) {
        return no_such_bucket();
    }
    let key = key.trim_start_matches('/').to_string();
    match s3.objects.lock().unwrap().get(&key) {
        Some((body, _)) => body.clone().into_response(),
        None => (StatusCode::NOT_FOUND, "<Error><Code>NoSuchKey</Code></Error>").into_response(),
    }
}

async fn delete_object(
    State(s3): State<FakeS3>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Some(resp) = denied(&headers, &bucket) {
        return resp;
    }
    if !s3.has_bucket(&bucket) {
        return no_such_bucket();
    }
    let key = key.trim_start_matches('/').to_string();
    // S3 answers 204 whether or not the key existed.
    s3.objects.lock().unwrap().remove(&key);
    StatusCode::NO_CONTENT.into_response()
}

async fn spawn_fake_s3() -> (String, FakeS3) {
    serve_fake_s3(FakeS3::with_bucket()).await
}

async fn spawn_fake_s3_without_bucket() -> (String, FakeS3) {
    serve_fake_s3(FakeS3::default()).await
}

async fn serve_fake_s3(s3: FakeS3) -> (String, FakeS3) {
    let app = Router::new()
        .route("/{bucket}", head(head_bucket).put(create_bucket))
        .route(
            "/{bucket}/{*key}",
            get(get_object).put(put_object).delete(delete_object),
        )
        .with_state(s3.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), s3)
}

fn s3_config(endpoint: &str, bucket: &str) -> S3Config {
    S3Config {
        bucket: bucket.to_string(),
        region: "eu-central-1".to_string(),
        endpoint_url: Some(endpoint.to_string()),
        access_key: Some(ACCESS_KEY.to_string()),
        secret_key: Some("test-secret".to_string()),
    }
}

#[tokio::test]
async fn test_put_get_delete_through_s3_stage() {
    let (endpoint, s3) = spawn_fake_s3().await;
    let stage = ObjectStage::s3(s3_config(&endpoint, BUCKET));
    let key = "weather/raw/weather_2024-01-01.json";

    stage
        .put(key, br#"{"location":{}}"#.to_vec(), "application/json")
        .await
        .unwrap();
    assert!(stage.is_initialized());
    assert_eq!(s3.keys(), vec![key.to_string()]);
    assert_eq!(s3.content_type(key).as_deref(), Some("application/json"));

    assert_eq!(stage.get(key).await.unwrap(), br#"{"location":{}}"#.to_vec());

    assert!(stage.delete(key).await);
    assert!(s3.keys().is_empty());
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let (endpoint, _s3) = spawn_fake_s3().await;
    let stage = ObjectStage::s3(s3_config(&endpoint, BUCKET));

    let err = stage
        .get("weather/processed/weather_2024-01-01.csv")
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "got {:?}", err);
}

#[tokio::test]
async fn test_rejected_request_is_status_error() {
    let (endpoint, _s3) = spawn_fake_s3().await;
    let stage = ObjectStage::s3(s3_config(&endpoint, "someone-elses-bucket"));

    let err = stage
        .put("weather/raw/weather_2024-01-01.json", b"{}".to_vec(), "application/json")
        .await
        .unwrap_err();
    match err {
        StorageError::Status { status, body, .. } => {
            assert_eq!(status.as_u16(), 403);
            assert!(body.contains("AccessDenied"));
        }
        other => panic!("expected status error, got {:?}", other),
    }

    // Delete failures are swallowed.
    assert!(!stage.delete("weather/raw/weather_2024-01-01.json").await);
}

#[tokio::test]
async fn test_unreachable_store_is_request_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let stage = ObjectStage::s3(s3_config(&endpoint, BUCKET));
    let err = stage.get("weather/raw/weather_2024-01-01.json").await.unwrap_err();
    assert!(matches!(err, StorageError::Request { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_full_run_over_s3_leaves_bucket_empty() {
    let tmp = TempDir::new().unwrap();
    let (endpoint, s3) = spawn_fake_s3().await;

    let api = Router::new().route(
        "/v1/history.json",
        get(|| async {
            Json(json!({
                "location": { "name": "Minsk", "country": "Belarus", "lat": 53.9, "lon": 27.57 },
                "forecast": { "forecastday": [{ "date": "2024-01-01", "day": { "avgtemp_c": -3.2 } }] }
            }))
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let api_url = format!("http://{}/v1/history.json", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, api).await.unwrap();
    });

    let stage = Arc::new(ObjectStage::s3(s3_config(&endpoint, BUCKET)));
    let fetcher = SourceFetcher::new(
        api_url,
        "test-key",
        Duration::from_secs(10),
        Arc::new(FetchCache::new(Duration::from_secs(30))),
    )
    .unwrap();
    let db_path = tmp.path().join("weather.sqlite");
    let pipeline = Pipeline::new(
        stage.clone(),
        fetcher,
        RelationalSink::new(db_path.clone()),
        "weather_raw",
    );

    let summary = pipeline
        .run(&RunParams::parse("2024-01-01", "Minsk").unwrap())
        .await
        .unwrap();

    assert_eq!(summary.rows_loaded, 1);
    assert_eq!(summary.objects_deleted, 2);
    assert!(s3.keys().is_empty());
    assert!(!stage.is_initialized());
    assert_eq!(
        RelationalSink::new(db_path).count_rows("weather_raw").await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_missing_bucket_is_not_reported_as_missing_object() {
    let (endpoint, _s3) = spawn_fake_s3_without_bucket().await;
    let stage = ObjectStage::s3(s3_config(&endpoint, BUCKET));

    let err = stage
        .put("weather/raw/weather_2024-01-01.json", b"{}".to_vec(), "application/json")
        .await
        .unwrap_err();
    assert!(!err.is_not_found(), "got {:?}", err);
    match err {
        StorageError::Status { status, body, .. } => {
            assert_eq!(status.as_u16(), 404);
            assert!(body.contains("NoSuchBucket"));
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ensure_bucket_creates_it_once() {
    let (endpoint, s3) = spawn_fake_s3_without_bucket().await;
    let backend = S3Backend::from_config(&s3_config(&endpoint, BUCKET)).unwrap();

    assert!(backend.ensure_bucket().await.unwrap());
    assert!(s3.has_bucket(BUCKET));
    assert!(!backend.ensure_bucket().await.unwrap());

    let stage = ObjectStage::s3(s3_config(&endpoint, BUCKET));
    stage
        .put("weather/raw/weather_2024-01-01.json", b"{}".to_vec(), "application/json")
        .await
        .unwrap();
    assert_eq!(s3.keys(), vec!["weather/raw/weather_2024-01-01.json".to_string()]);
}

#[tokio::test]
async fn test_ensure_bucket_surfaces_rejection() {
    let (endpoint, _s3) = spawn_fake_s3_without_bucket().await;
    let backend = S3Backend::from_config(&s3_config(&endpoint, "someone-elses-bucket")).unwrap();

    let err = backend.ensure_bucket().await.unwrap_err();
    assert!(
        matches!(&err, StorageError::Status { status, .. } if status.as_u16() == 403),
        "got {:?}",
        err
    );
}

#[tokio::test]
async fn test_cli_init_creates_missing_bucket() {
    let tmp = TempDir::new().unwrap();
    let (endpoint, s3) = spawn_fake_s3_without_bucket().await;

    let config_path = tmp.path().join("weather-etl.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"[db]
path = "{}/weather.sqlite"

[api]
url = "http://127.0.0.1:9/v1/history.json"
key = "unused"

[s3]
bucket = "{}"
endpoint_url = "{}"
access_key = "{}"
secret_key = "test-secret"
"#,
            tmp.path().display(),
            BUCKET,
            endpoint,
            ACCESS_KEY
        ),
    )
    .unwrap();

    let output = tokio::process::Command::new(env!("CARGO_BIN_EXE_weather-etl"))
        .arg("--config")
        .arg(&config_path)
        .arg("init")
        .output()
        .await
        .unwrap();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(output.status.success(), "stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Bucket weather created"), "stdout={}", stdout);
    assert!(s3.has_bucket(BUCKET));
}
