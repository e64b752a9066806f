//! HTTP handlers for protocol media: key rendering, uploads, manifests,
//! integrity checks and payload download.
//! Payload bodies are streamed out to avoid buffering them in memory.

use crate::{
    errors::AppError,
    models::{
        manifest::{StoredPhoto, VerificationReport},
        storage_path::{ProtocolType, StoragePathVariables},
    },
    services::media_service::{MediaService, PhotoUpload},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio_util::io::ReaderStream;

#[derive(Debug, Serialize)]
pub struct StoragePathResponse {
    pub key: String,
}

/// POST `/storage/path`: render a key without storing anything.
pub async fn storage_path(
    State(service): State<MediaService>,
    Json(vars): Json<StoragePathVariables>,
) -> Result<Json<StoragePathResponse>, AppError> {
    let key = service.organizer().generate_path(&vars)?;
    Ok(Json(StoragePathResponse { key }))
}

/// Raw multipart parts, split into text fields and file payloads.
#[derive(Default)]
struct UploadForm {
    fields: HashMap<String, String>,
    files: HashMap<String, (Option<String>, Bytes)>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            match name.as_str() {
                "original" | "thumb" | "gallery" | "pdf" => {
                    let file_name = field.file_name().map(str::to_string);
                    let bytes = field.bytes().await?;
                    form.files.insert(name, (file_name, bytes));
                }
                _ => {
                    let text = field.text().await?;
                    form.fields.insert(name, text);
                }
            }
        }
        Ok(form)
    }

    fn text(&mut self, field: &'static str) -> Result<String, AppError> {
        self.fields
            .remove(field)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::validation(field, "field is required"))
    }

    fn file(&mut self, field: &'static str) -> Result<(Option<String>, Bytes), AppError> {
        self.files
            .remove(field)
            .ok_or_else(|| AppError::validation(field, "file part is required"))
    }

    fn into_upload(mut self, protocol_id: String) -> Result<PhotoUpload, AppError> {
        let (original_name, original) = self.file("original")?;
        let (_, thumb) = self.file("thumb")?;
        let (_, gallery) = self.file("gallery")?;
        let (_, pdf) = self.file("pdf")?;

        let filename = match self.text("filename") {
            Ok(name) => name,
            Err(err) => original_name.filter(|name| !name.is_empty()).ok_or(err)?,
        };
        let protocol_type = self
            .text("protocol_type")?
            .parse::<ProtocolType>()
            .map_err(|reason| AppError::validation("protocol_type", reason))?;
        let metadata = match self.fields.remove("metadata") {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)
                .map_err(|err| AppError::validation("metadata", err.to_string()))?,
            _ => serde_json::Value::Object(Default::default()),
        };
        let taken_at = match self.fields.remove("taken_at") {
            Some(raw) if !raw.trim().is_empty() => DateTime::parse_from_rfc3339(raw.trim())
                .map_err(|err| AppError::validation("taken_at", err.to_string()))?
                .with_timezone(&Utc),
            _ => Utc::now(),
        };

        Ok(PhotoUpload {
            protocol_id,
            company: self.text("company")?,
            vehicle: self.text("vehicle")?,
            protocol_type,
            category: self.text("category")?,
            filename,
            taken_at,
            metadata,
            original,
            thumb,
            gallery,
            pdf,
        })
    }
}

/// POST `/protocols/{protocol_id}/photos`: multipart upload of one photo and
/// its derivatives. A re-upload of a known original answers with the stored
/// record and `deduplicated: true`.
pub async fn upload_photo(
    State(service): State<MediaService>,
    Path(protocol_id): Path<String>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<StoredPhoto>), AppError> {
    let upload = UploadForm::read(multipart)
        .await?
        .into_upload(protocol_id)?;
    let stored = service.store_photo(upload).await?;
    Ok((StatusCode::CREATED, Json(stored)))
}

/// GET `/protocols/{protocol_id}/photos`
pub async fn list_protocol_photos(
    State(service): State<MediaService>,
    Path(protocol_id): Path<String>,
) -> Result<Json<Vec<StoredPhoto>>, AppError> {
    Ok(Json(service.protocol_photos(&protocol_id).await?))
}

/// GET `/photos/{photo_id}/manifest`
pub async fn get_manifest(
    State(service): State<MediaService>,
    Path(photo_id): Path<String>,
) -> Result<Json<StoredPhoto>, AppError> {
    Ok(Json(service.manifest(&photo_id).await?))
}

/// POST `/photos/{photo_id}/verify`. A failed check is still a 200 and the
/// report says which rendition is wrong.
pub async fn verify_photo(
    State(service): State<MediaService>,
    Path(photo_id): Path<String>,
) -> Result<Json<VerificationReport>, AppError> {
    Ok(Json(service.verify_photo(&photo_id).await?))
}

/// GET `/objects/{*key}`: stream a stored payload.
pub async fn get_object(
    State(service): State<MediaService>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let (file, len) = service.open_object(&key).await?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&key)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    Ok(response)
}

fn content_type_for(key: &str) -> &'static str {
    let extension = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "json" => "application/json",
        _ => "application/octet-stream",
    }
}
