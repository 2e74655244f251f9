//service/mod.rs
pub mod chunk_receiver;
pub mod merge_coordinator;
pub mod range_server;
pub mod session_lock;


use std::sync::Arc;

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use bytes::BytesMut;
use futures::StreamExt;
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::json;

use crate::app_state::AppState;
use crate::catalog::{ArtifactDescriptor, RecordId};
use crate::error::{MediaError, MediaResult};
use crate::service::chunk_receiver::ChunkReceiver;
use crate::service::merge_coordinator::{CompletedUpload, CompletionRequest};

/// Query string of a chunk upload
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkQuery {
    pub upload_id: Option<String>,
    pub chunk_index: Option<String>,
}

/// Query string of a catalog listing
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub folder: Option<String>,
}

fn completed_response(completed: CompletedUpload) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "mediaId": completed.record_id,
        "media": completed.record,
    }))
}

pub async fn chunk_service(
    query: ChunkQuery,
    mut payload: web::Payload,
    app_state: web::Data<AppState>,
) -> MediaResult<HttpResponse> {
    let token = ChunkReceiver::validate_token(query.upload_id.as_deref())?;
    let index = ChunkReceiver::parse_index(query.chunk_index.as_deref())?;
    debug!("Receiving chunk {} for session {}", index, token);

    let receiver = Arc::clone(&app_state.chunk_receiver);
    let mut bytes = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| {
            warn!("Error reading chunk payload: {}", e);
            MediaError::Internal(format!("error reading payload: {}", e))
        })?;
        bytes.extend_from_slice(&chunk);
        receiver.check_size(bytes.len())?;
    }

    if bytes.is_empty() {
        error!("No data uploaded for chunk {} of session {}", index, token);
        return Err(MediaError::PayloadMissing);
    }

    let data = bytes.freeze();
    let ack_token = token.clone();
    let ack = tokio::task::spawn_blocking(move || {
        log_mdc::insert("upload", &ack_token);
        let result = receiver.receive(&ack_token, index, &data);
        log_mdc::remove("upload");
        result
    })
    .await??;

    Ok(HttpResponse::Ok()
        .insert_header((header::ETAG, format!("\"{}\"", ack.etag)))
        .json(json!({
            "success": true,
            "message": format!("Chunk {} received", index),
            "uploadId": ack.upload_id,
            "chunkIndex": ack.chunk_index,
            "size": ack.size,
            "etag": ack.etag,
        })))
}

pub async fn complete_service(
    request: CompletionRequest,
    app_state: web::Data<AppState>,
) -> MediaResult<HttpResponse> {
    debug!("Completion requested for session {:?}", request.upload_id);
    let completed = app_state.merge_coordinator.complete(request).await?;
    info!(
        "Upload completed as media record {} at {}",
        completed.record_id, completed.record.path
    );
    Ok(completed_response(completed))
}

pub async fn register_service(
    descriptor: ArtifactDescriptor,
    app_state: web::Data<AppState>,
) -> MediaResult<HttpResponse> {
    info!("Retrying catalog registration for {}", descriptor.path);
    let completed = app_state.merge_coordinator.register(descriptor).await?;
    Ok(completed_response(completed))
}

pub async fn stream_service(
    folder: String,
    file_name: String,
    req: HttpRequest,
    app_state: web::Data<AppState>,
) -> MediaResult<HttpResponse> {
    let range = match req.headers().get(header::RANGE) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| MediaError::MalformedRange("range header is not valid ASCII".to_string()))?,
        ),
        None => None,
    };
    app_state.range_server.serve(&folder, &file_name, range).await
}

pub async fn list_media_service(query: ListQuery, app_state: web::Data<AppState>) -> MediaResult<HttpResponse> {
    let catalog = Arc::clone(&app_state.catalog);
    let records =
        tokio::task::spawn_blocking(move || catalog.list_records(query.folder.as_deref())).await??;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "count": records.len(),
        "media": records,
    })))
}

pub async fn get_media_service(id: RecordId, app_state: web::Data<AppState>) -> MediaResult<HttpResponse> {
    let catalog = Arc::clone(&app_state.catalog);
    let record = tokio::task::spawn_blocking(move || catalog.get_record(id))
        .await??
        .ok_or(MediaError::RecordNotFound(id))?;
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "media": record,
    })))
}

pub async fn record_download_service(id: RecordId, app_state: web::Data<AppState>) -> MediaResult<HttpResponse> {
    let catalog = Arc::clone(&app_state.catalog);
    let downloads = tokio::task::spawn_blocking(move || catalog.increment_downloads(id)).await??;
    debug!("Media record {} now has {} downloads", id, downloads);
    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "mediaId": id,
        "downloads": downloads,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use actix_web::http::StatusCode;
    use actix_web::test;

    #[actix_web::test]
    async fn test_stream_service_rejects_non_ascii_range() {
        let app_state = web::Data::new(AppState::new_for_testing());
        let req = test::TestRequest::default()
            .insert_header((header::RANGE, header::HeaderValue::from_bytes(b"bytes=\xff-").unwrap()))
            .to_http_request();

        let result = stream_service("videos".into(), "a.mp4".into(), req, app_state).await;
        assert!(matches!(result, Err(MediaError::MalformedRange(_))));
    }

    #[actix_web::test]
    async fn test_get_media_service_not_found() {
        let app_state = web::Data::new(AppState::new_for_testing());
        let result = get_media_service(42, app_state).await;
        assert!(matches!(result, Err(MediaError::RecordNotFound(42))));
    }

    #[actix_web::test]
    async fn test_list_media_service_empty() {
        let app_state = web::Data::new(AppState::new_for_testing());
        let resp = list_media_service(ListQuery::default(), app_state).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = to_bytes(resp.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["count"], 0);
    }
}
