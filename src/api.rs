//api.rs
use actix_web::{get, post, web, Either, HttpRequest, HttpResponse};
use serde_json::json;

use crate::app_state::AppState;
use crate::catalog::{ArtifactDescriptor, RecordId};
use crate::error::{MediaError, MediaResult};
use crate::service::merge_coordinator::CompletionRequest;
use crate::service::{
    chunk_service, complete_service, get_media_service, list_media_service, record_download_service,
    register_service, stream_service, ChunkQuery, ListQuery,
};

#[post("/api/upload/chunk")]
pub async fn upload_chunk(
    query: web::Query<ChunkQuery>,
    payload: web::Payload,
    app_state: web::Data<AppState>,
) -> MediaResult<HttpResponse> {
    chunk_service(query.into_inner(), payload, app_state).await
}

/// Accepts the completion fields as JSON or as an urlencoded form.
#[post("/api/upload/complete")]
pub async fn complete_upload(
    body: Either<web::Json<CompletionRequest>, web::Form<CompletionRequest>>,
    app_state: web::Data<AppState>,
) -> MediaResult<HttpResponse> {
    let request = match body {
        Either::Left(json) => json.into_inner(),
        Either::Right(form) => form.into_inner(),
    };
    complete_service(request, app_state).await
}

#[post("/api/upload/register")]
pub async fn register_upload(
    body: web::Json<ArtifactDescriptor>,
    app_state: web::Data<AppState>,
) -> MediaResult<HttpResponse> {
    register_service(body.into_inner(), app_state).await
}

#[get("/stream/{folder}/{file_name}")]
pub async fn stream(
    path: web::Path<(String, String)>,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> MediaResult<HttpResponse> {
    let (folder, file_name) = path.into_inner();
    stream_service(folder, file_name, req, app_state).await
}

#[get("/api/media")]
pub async fn list_media(query: web::Query<ListQuery>, app_state: web::Data<AppState>) -> MediaResult<HttpResponse> {
    list_media_service(query.into_inner(), app_state).await
}

#[get("/api/media/{id}")]
pub async fn get_media(id: web::Path<RecordId>, app_state: web::Data<AppState>) -> MediaResult<HttpResponse> {
    get_media_service(id.into_inner(), app_state).await
}

#[post("/api/media/{id}/downloads")]
pub async fn record_download(id: web::Path<RecordId>, app_state: web::Data<AppState>) -> MediaResult<HttpResponse> {
    record_download_service(id.into_inner(), app_state).await
}

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// JSON extractor settings; malformed bodies are answered like every other
/// validation error.
pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(|err, _req| MediaError::InvalidParameter(err.to_string()).into())
}

/// Register every route on an app or scope
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(upload_chunk)
        .service(complete_upload)
        .service(register_upload)
        .service(stream)
        .service(list_media)
        .service(get_media)
        .service(record_download)
        .service(health);
}
