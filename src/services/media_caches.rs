//! Per-domain cache instances for protocol media.
//!
//! Manifests never change once written, so they live longer than protocol
//! listings, which grow with every upload. Both are injected into
//! `MediaService` rather than held as globals.

use crate::{
    models::manifest::StoredPhoto,
    services::cache_service::{CacheOptions, CacheService, CacheStats},
};
use serde::Serialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Listings go stale on every upload, so they never outlive this.
const LISTING_TTL: Duration = Duration::from_secs(2 * 60);

/// Something whose change makes cached media data stale.
#[derive(Clone, Copy, Debug)]
pub enum MediaEntity<'a> {
    /// A photo was added to the protocol.
    Protocol(&'a str),
    /// An existing photo changed.
    Photo {
        photo_id: &'a str,
        protocol_id: &'a str,
    },
}

#[derive(Clone)]
pub struct MediaCaches {
    pub manifests: CacheService<StoredPhoto>,
    pub protocol_listings: CacheService<Vec<StoredPhoto>>,
}

#[derive(Serialize, Debug)]
pub struct MediaCacheStats {
    pub manifests: CacheStats,
    pub protocol_listings: CacheStats,
}

impl MediaCaches {
    pub fn new(base: &CacheOptions) -> Self {
        let manifests = CacheService::new(
            "manifests",
            CacheOptions {
                tags: vec!["manifests".into()],
                ..base.clone()
            },
        );
        let protocol_listings = CacheService::new(
            "protocol_listings",
            CacheOptions {
                ttl: base.ttl.min(LISTING_TTL),
                tags: vec!["protocols".into()],
                ..base.clone()
            },
        );
        Self {
            manifests,
            protocol_listings,
        }
    }

    /// Drop every cached value that `entity` makes stale and return how
    /// many entries went.
    pub fn invalidate_related(&self, entity: MediaEntity<'_>) -> usize {
        match entity {
            MediaEntity::Protocol(protocol_id) => self.invalidate_protocol(protocol_id),
            MediaEntity::Photo {
                photo_id,
                protocol_id,
            } => {
                let manifest = usize::from(self.manifests.delete(photo_id));
                manifest + self.invalidate_protocol(protocol_id)
            }
        }
    }

    fn invalidate_protocol(&self, protocol_id: &str) -> usize {
        let tag = protocol_tag(protocol_id);
        let cleared = self.protocol_listings.clear_by_tags(&[tag.as_str()]);
        debug!(protocol_id, cleared, "invalidated protocol caches");
        cleared
    }

    pub fn spawn_sweepers(&self, every: Duration) -> Vec<JoinHandle<()>> {
        vec![
            self.manifests.spawn_sweeper(every),
            self.protocol_listings.spawn_sweeper(every),
        ]
    }

    pub fn stats(&self) -> MediaCacheStats {
        MediaCacheStats {
            manifests: self.manifests.stats(),
            protocol_listings: self.protocol_listings.stats(),
        }
    }
}

pub fn protocol_tag(protocol_id: &str) -> String {
    format!("protocol:{}", protocol_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::cache_service::SetOptions;

    #[tokio::test(start_paused = true)]
    async fn listings_never_outlive_the_listing_ttl() {
        let caches = MediaCaches::new(&CacheOptions::default());
        assert_eq!(caches.manifests.options().ttl, CacheOptions::default().ttl);
        assert_eq!(caches.protocol_listings.options().ttl, LISTING_TTL);

        let short = MediaCaches::new(&CacheOptions {
            ttl: Duration::from_secs(30),
            ..CacheOptions::default()
        });
        assert_eq!(short.protocol_listings.options().ttl, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn protocol_invalidation_leaves_other_protocols() {
        let caches = MediaCaches::new(&CacheOptions::default());
        for id in ["p1", "p2"] {
            caches.protocol_listings.set(
                protocol_tag(id),
                Vec::new(),
                SetOptions::tagged([protocol_tag(id)]),
            );
        }

        assert_eq!(caches.invalidate_related(MediaEntity::Protocol("p1")), 1);
        assert!(!caches.protocol_listings.has(&protocol_tag("p1")));
        assert!(caches.protocol_listings.has(&protocol_tag("p2")));
    }

    #[tokio::test(start_paused = true)]
    async fn photo_invalidation_also_drops_protocol_listing() {
        let caches = MediaCaches::new(&CacheOptions::default());
        caches.protocol_listings.set(
            protocol_tag("p1"),
            Vec::new(),
            SetOptions::tagged([protocol_tag("p1")]),
        );

        let cleared = caches.invalidate_related(MediaEntity::Photo {
            photo_id: "missing",
            protocol_id: "p1",
        });
        assert_eq!(cleared, 1);
        assert!(caches.protocol_listings.is_empty());

        let stats = caches.stats();
        assert_eq!(stats.manifests.name, "manifests");
        assert_eq!(stats.protocol_listings.name, "protocol_listings");
    }
}
