use crate::services::{media_caches::MediaCacheStats, media_service::MediaService};
use axum::{Json, extract::State};

/// `GET /cache/stats`: counters and top keys for every media cache.
pub async fn cache_stats(State(service): State<MediaService>) -> Json<MediaCacheStats> {
    Json(service.caches().stats())
}
