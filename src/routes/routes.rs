//! Defines routes for the media service.
//!
//! ## Structure
//! - **Health**: `GET /healthz`, `GET /readyz`
//! - **Rentals**: `GET /rentals/days?start=&end=`
//! - **Storage keys**: `POST /storage/path`
//! - **Protocol media**
//!   - `POST /protocols/{protocol_id}/photos`: multipart upload
//!   - `GET  /protocols/{protocol_id}/photos`: list manifests
//!   - `GET  /photos/{photo_id}/manifest`
//!   - `POST /photos/{photo_id}/verify`
//!   - `GET  /objects/{*key}`: stream a stored payload
//! - **Cache**: `GET /cache/stats`
//!
//! The wildcard `*key` allows nested keys like `protocols/2025/01/.../front.jpg`.

use crate::{
    handlers::{
        cache_handlers::cache_stats,
        health_handlers::{healthz, readyz},
        media_handlers::{
            get_manifest, get_object, list_protocol_photos, storage_path, upload_photo,
            verify_photo,
        },
        rental_handlers::rental_days,
    },
    services::media_service::MediaService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Uploads carry four renditions, so they get a larger body limit.
const UPLOAD_BODY_LIMIT: usize = 64 * 1024 * 1024;

/// Build the router. Every handler shares the `MediaService` state.
pub fn routes() -> Router<MediaService> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/rentals/days", get(rental_days))
        .route("/storage/path", post(storage_path))
        .route(
            "/protocols/{protocol_id}/photos",
            post(upload_photo)
                .get(list_protocol_photos)
                .layer(DefaultBodyLimit::max(UPLOAD_BODY_LIMIT)),
        )
        .route("/photos/{photo_id}/manifest", get(get_manifest))
        .route("/photos/{photo_id}/verify", post(verify_photo))
        .route("/objects/{*key}", get(get_object))
        .route("/cache/stats", get(cache_stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db,
        services::{
            cache_service::CacheOptions, media_caches::MediaCaches, path_organizer::PathOrganizer,
        },
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "blackrent-test-boundary";

    async fn app() -> (Router, TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        db::run_migrations(&pool).await.expect("migrations apply");
        let service = MediaService::new(
            Arc::new(pool),
            dir.path(),
            PathOrganizer::with_defaults().expect("default template"),
            MediaCaches::new(&CacheOptions::default()),
        );
        (routes().with_state(service), dir)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = app.clone().oneshot(request).await.expect("infallible");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        (status, bytes.to_vec())
    }

    async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let (status, bytes) = send(app, request).await;
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).expect("request")
    }

    fn multipart_body(fields: &[(&str, &str)], files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        for (name, bytes) in files {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn upload_request(protocol_id: &str, category: &str, original: &[u8]) -> Request<Body> {
        let body = multipart_body(
            &[
                ("company", "Black Rent"),
                ("vehicle", "BA-123XY"),
                ("protocol_type", "return"),
                ("category", category),
                ("filename", "front.jpg"),
                ("taken_at", "2025-01-15T09:30:00Z"),
                ("metadata", r#"{"odometer": 120500}"#),
            ],
            &[
                ("original", original),
                ("thumb", b"thumb-bytes"),
                ("gallery", b"gallery-bytes"),
                ("pdf", b"pdf-bytes"),
            ],
        );
        Request::post(format!("/protocols/{protocol_id}/photos"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    #[tokio::test]
    async fn health_endpoints_report_ready() {
        let (app, _dir) = app().await;
        let (status, body) = send_json(&app, get("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send_json(&app, get("/readyz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["sqlite"]["ok"], true);
        assert_eq!(body["checks"]["disk"]["ok"], true);
    }

    #[tokio::test]
    async fn rental_days_endpoint() {
        let (app, _dir) = app().await;
        let (status, body) = send_json(
            &app,
            get("/rentals/days?start=2025-01-10T10:00&end=2025-01-13T10:00"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["days"], 3);

        let (_, body) = send_json(
            &app,
            get("/rentals/days?start=2025-01-10T10:00:00%2B01:00&end=2025-01-11T10:01:00%2B01:00"),
        )
        .await;
        assert_eq!(body["days"], 2);

        let (status, body) = send_json(
            &app,
            get("/rentals/days?start=2025-01-13T10:00&end=2025-01-10T10:00"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");

        let (status, _) = send_json(&app, get("/rentals/days?start=yesterday&end=today")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn storage_path_renders_and_validates() {
        let (app, _dir) = app().await;
        let vars = json!({
            "year": 2025,
            "month": 1,
            "company": "Premium Cars SK",
            "vehicle": "Škoda Octavia",
            "protocolType": "handover",
            "protocolId": "p-7",
            "category": "vehicle_photos",
            "filename": "front left.jpg"
        });
        let request = Request::post("/storage/path")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(vars.to_string()))
            .expect("request");
        let (status, body) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["key"],
            "protocols/2025/01/Premium_Cars/Skoda_Octavia/handover/p-7/vehicle_photos/front_left.jpg"
        );

        let mut bad = vars.clone();
        bad["category"] = json!("selfies");
        let request = Request::post("/storage/path")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bad.to_string()))
            .expect("request");
        let (status, body) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");
    }

    #[tokio::test]
    async fn upload_list_manifest_verify_and_download() {
        let (app, _dir) = app().await;
        let (status, stored) = send_json(&app, upload_request("p-9", "damage_photos", b"original")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(stored["deduplicated"], false);
        assert_eq!(
            stored["keys"]["original"],
            "protocols/2025/01/BlackRent/BA-123XY/return/p-9/damage_photos/front.jpg"
        );
        assert_eq!(stored["manifest"]["metadata"]["odometer"], 120500);
        let photo_id = stored["manifest"]["photoId"]
            .as_str()
            .expect("photo id")
            .to_string();

        let (status, listing) = send_json(&app, get("/protocols/p-9/photos")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listing.as_array().map(Vec::len), Some(1));

        let (status, manifest) = send_json(&app, get(&format!("/photos/{photo_id}/manifest"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(manifest["manifest"]["originalHash"], stored["manifest"]["originalHash"]);

        let verify = Request::post(format!("/photos/{photo_id}/verify"))
            .body(Body::empty())
            .expect("request");
        let (status, report) = send_json(&app, verify).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["ok"], true);

        let key = stored["keys"]["thumb"].as_str().expect("thumb key");
        let (status, bytes) = send(&app, get(&format!("/objects/{key}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bytes, b"thumb-bytes");

        let (status, stats) = send_json(&app, get("/cache/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["manifests"]["name"], "manifests");
    }

    #[tokio::test]
    async fn reupload_is_deduplicated() {
        let (app, _dir) = app().await;
        let (_, first) = send_json(&app, upload_request("p-1", "damage_photos", b"same")).await;
        let (status, second) = send_json(&app, upload_request("p-1", "damage_photos", b"same")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(second["deduplicated"], true);
        assert_eq!(second["manifest"]["photoId"], first["manifest"]["photoId"]);
    }

    #[tokio::test]
    async fn conflicting_upload_is_rejected() {
        let (app, _dir) = app().await;
        send_json(&app, upload_request("p-1", "damage_photos", b"first")).await;
        let (status, body) = send_json(&app, upload_request("p-1", "damage_photos", b"second")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "conflict");
    }

    #[tokio::test]
    async fn invalid_uploads_are_rejected() {
        let (app, _dir) = app().await;
        let (status, body) = send_json(&app, upload_request("p-1", "selfies", b"x")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");

        let request = Request::post("/protocols/p-1/photos")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(&[("company", "BlackRent")], &[])))
            .expect("request");
        let (status, body) = send_json(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid `original`: file part is required");
    }

    #[tokio::test]
    async fn missing_resources_are_not_found() {
        let (app, _dir) = app().await;
        let (status, body) = send_json(&app, get("/photos/nope/manifest")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "not_found");

        let (status, _) = send_json(&app, get("/objects/protocols/none.jpg")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
