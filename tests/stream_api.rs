use std::sync::Arc;

use actix_web::{http::header, http::StatusCode, test, web, App};

use media_vault::api::configure;
use media_vault::app_state::AppState;
use media_vault::catalog::sqlite_store::SQLiteMediaCatalog;
use media_vault::config::AppConfig;
use media_vault::storage::mock_store::MockMediaStore;

const ARTIFACT_SIZE: usize = 1000;

fn artifact_bytes() -> Vec<u8> {
    (0..ARTIFACT_SIZE).map(|i| (i % 256) as u8).collect()
}

fn app_state() -> web::Data<AppState> {
    let storage = Arc::new(MockMediaStore::new());
    storage.insert_artifact("videos", "1700000000000-abcdef012345.mp4", artifact_bytes());
    storage.insert_artifact("images", "empty.png", Vec::new());
    let catalog = Arc::new(SQLiteMediaCatalog::open_in_memory().unwrap());
    web::Data::new(AppState::with_backends(AppConfig::default(), storage, catalog))
}

const CLIP_URI: &str = "/stream/videos/1700000000000-abcdef012345.mp4";

#[actix_web::test]
async fn test_full_content_without_range() {
    let app = test::init_service(App::new().app_data(app_state()).configure(configure)).await;

    let req = test::TestRequest::get().uri(CLIP_URI).to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get(header::CONTENT_LENGTH).unwrap(), "1000");
    assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "video/mp4");
    assert_eq!(resp.headers().get(header::ACCEPT_RANGES).unwrap(), "bytes");
    let body = test::read_body(resp).await;
    assert_eq!(body.as_ref(), artifact_bytes().as_slice());
}

#[actix_web::test]
async fn test_partial_content() {
    let app = test::init_service(App::new().app_data(app_state()).configure(configure)).await;

    let req = test::TestRequest::get()
        .uri(CLIP_URI)
        .insert_header((header::RANGE, "bytes=0-99"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers().get(header::CONTENT_RANGE).unwrap(), "bytes 0-99/1000");
    assert_eq!(resp.headers().get(header::CONTENT_LENGTH).unwrap(), "100");
    let body = test::read_body(resp).await;
    assert_eq!(body.as_ref(), &artifact_bytes()[..100]);

    let req = test::TestRequest::get()
        .uri(CLIP_URI)
        .insert_header((header::RANGE, "bytes=900-"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers().get(header::CONTENT_RANGE).unwrap(), "bytes 900-999/1000");
    let body = test::read_body(resp).await;
    assert_eq!(body.as_ref(), &artifact_bytes()[900..]);

    let req = test::TestRequest::get()
        .uri(CLIP_URI)
        .insert_header((header::RANGE, "bytes=-10"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    let body = test::read_body(resp).await;
    assert_eq!(body.as_ref(), &artifact_bytes()[990..]);

    let req = test::TestRequest::get()
        .uri(CLIP_URI)
        .insert_header((header::RANGE, "bytes=0-99999999999999999999"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(resp.headers().get(header::CONTENT_RANGE).unwrap(), "bytes 0-999/1000");
}

#[actix_web::test]
async fn test_unsatisfiable_and_malformed_ranges() {
    let app = test::init_service(App::new().app_data(app_state()).configure(configure)).await;

    let req = test::TestRequest::get()
        .uri(CLIP_URI)
        .insert_header((header::RANGE, "bytes=2000-"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(resp.headers().get(header::CONTENT_RANGE).unwrap(), "bytes */1000");
    assert!(test::read_body(resp).await.is_empty());

    let req = test::TestRequest::get()
        .uri(CLIP_URI)
        .insert_header((header::RANGE, "bytes=99999999999999999999-"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(resp.headers().get(header::CONTENT_RANGE).unwrap(), "bytes */1000");

    let req = test::TestRequest::get()
        .uri(CLIP_URI)
        .insert_header((header::RANGE, "bytes=abc-99"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get()
        .uri("/stream/images/empty.png")
        .insert_header((header::RANGE, "bytes=0-"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::RANGE_NOT_SATISFIABLE);
}

#[actix_web::test]
async fn test_missing_artifact_and_record_are_not_found() {
    let app = test::init_service(App::new().app_data(app_state()).configure(configure)).await;

    let req = test::TestRequest::get().uri("/stream/videos/nothing.mp4").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get().uri("/api/media/12345").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}
