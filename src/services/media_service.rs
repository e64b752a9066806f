//! src/services/media_service.rs
//!
//! MediaService: protocol photo storage backed by SQLite for manifests and
//! local disk for payloads laid out by the path organizer. Reads of manifests
//! and protocol listings go through the injected caches.

use crate::{
    models::{
        manifest::{
            DerivativeCheck, DerivativeKeys, DerivativeKind, ManifestRow, StoredPhoto,
            VerificationReport,
        },
        storage_path::{ProtocolType, StoragePathVariables},
    },
    services::{
        cache_service::SetOptions,
        hashing::{
            DigestAlgorithm, Derivatives, calculate_digest, create_manifest, is_duplicate,
            sha256_hex, verify_integrity,
        },
        media_caches::{MediaCaches, MediaEntity, protocol_tag},
        path_organizer::{PathError, PathOrganizer},
    },
};
use bytes::Bytes;
use chrono::{DateTime, Datelike, Utc};
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MAX_OBJECT_KEY_LEN: usize = 1024;

const MANIFEST_COLUMNS: &str = "photo_id, protocol_id, original_key, thumb_key, gallery_key, \
     pdf_key, original_hash, original_md5, thumb_hash, gallery_hash, pdf_hash, original_size, \
     thumb_size, gallery_size, pdf_size, metadata, created_at";

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("photo `{0}` not found")]
    PhotoNotFound(String),
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("key `{0}` already holds a different photo")]
    KeyConflict(String),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type MediaResult<T> = Result<T, MediaError>;

/// One uploaded photo with its pre-rendered derivatives.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    pub protocol_id: String,
    pub company: String,
    pub vehicle: String,
    pub protocol_type: ProtocolType,
    pub category: String,
    pub filename: String,
    pub taken_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
    pub original: Bytes,
    pub thumb: Bytes,
    pub gallery: Bytes,
    pub pdf: Bytes,
}

impl PhotoUpload {
    fn payload(&self, kind: DerivativeKind) -> &Bytes {
        match kind {
            DerivativeKind::Original => &self.original,
            DerivativeKind::Thumb => &self.thumb,
            DerivativeKind::Gallery => &self.gallery,
            DerivativeKind::Pdf => &self.pdf,
        }
    }

    fn path_variables(&self) -> StoragePathVariables {
        StoragePathVariables {
            year: self.taken_at.year(),
            month: self.taken_at.month(),
            day: Some(self.taken_at.day()),
            company: self.company.clone(),
            vehicle: self.vehicle.clone(),
            protocol_type: self.protocol_type,
            protocol_id: self.protocol_id.clone(),
            category: self.category.clone(),
            filename: self.filename.clone(),
        }
    }
}

/// MediaService provides the protocol photo pipeline:
/// - Store a photo (hash, deduplicate, write payloads, record the manifest)
/// - Look up manifests and per-protocol listings (cached)
/// - Re-verify stored payloads against their manifest
/// - Open a stored payload for streaming
#[derive(Clone)]
pub struct MediaService {
    /// Shared SQLite connection pool used for manifest records.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where payloads are stored.
    pub base_path: PathBuf,

    organizer: Arc<PathOrganizer>,
    caches: MediaCaches,

    /// Held from the dedup check until the manifest row is committed, so two
    /// uploads never claim the same keys or the same original at once.
    store_lock: Arc<Mutex<()>>,
}

impl MediaService {
    pub fn new(
        db: Arc<SqlitePool>,
        base_path: impl Into<PathBuf>,
        organizer: PathOrganizer,
        caches: MediaCaches,
    ) -> Self {
        Self {
            db,
            base_path: base_path.into(),
            organizer: Arc::new(organizer),
            caches,
            store_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn organizer(&self) -> &PathOrganizer {
        &self.organizer
    }

    pub fn caches(&self) -> &MediaCaches {
        &self.caches
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rendered keys always pass; this guards keys that arrive from clients.
    fn ensure_key_safe(&self, key: &str) -> MediaResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(MediaError::InvalidObjectKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(MediaError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(MediaError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Keys for every rendition. Derivatives reuse the original's path with
    /// the kind prefixed to the filename.
    pub fn derivative_keys(&self, vars: &StoragePathVariables) -> MediaResult<DerivativeKeys> {
        let key_for = |kind: DerivativeKind| -> MediaResult<String> {
            let vars = match kind {
                DerivativeKind::Original => vars.clone(),
                other => vars.with_filename(format!("{}_{}", other.as_str(), vars.filename)),
            };
            Ok(self.organizer.generate_path(&vars)?)
        };
        Ok(DerivativeKeys {
            original: key_for(DerivativeKind::Original)?,
            thumb: key_for(DerivativeKind::Thumb)?,
            gallery: key_for(DerivativeKind::Gallery)?,
            pdf: key_for(DerivativeKind::Pdf)?,
        })
    }

    /// Store an uploaded photo.
    ///
    /// - Returns the existing record untouched when the original was seen before.
    /// - Renders every key before touching disk, so validation failures leave no trace.
    /// - Refuses any rendered key that a stored photo already uses for any rendition.
    /// - Never replaces a file on disk, and on failure removes only files it created.
    pub async fn store_photo(&self, upload: PhotoUpload) -> MediaResult<StoredPhoto> {
        let original_hash = sha256_hex(&upload.original);
        let keys = self.derivative_keys(&upload.path_variables())?;

        let _guard = self.store_lock.lock().await;
        if let Some(existing) = self.find_duplicate(&original_hash).await? {
            return Ok(existing);
        }
        if let Some(taken) = self.taken_key(&keys).await? {
            return Err(MediaError::KeyConflict(taken));
        }

        let photo_id = Uuid::new_v4().to_string();
        let manifest = create_manifest(
            photo_id.clone(),
            &upload.original,
            &Derivatives {
                thumb: &upload.thumb,
                gallery: &upload.gallery,
                pdf: &upload.pdf,
            },
            upload.metadata.clone(),
        );

        let mut created = Vec::with_capacity(DerivativeKind::ALL.len());
        for kind in DerivativeKind::ALL {
            match self.write_object(keys.key_of(kind), upload.payload(kind)).await {
                Ok(Some(path)) => created.push(path),
                Ok(None) => {}
                Err(err) => {
                    self.remove_files(&created).await;
                    return Err(err);
                }
            }
        }

        let stored = StoredPhoto {
            protocol_id: upload.protocol_id.clone(),
            manifest,
            keys,
            original_md5: calculate_digest(&upload.original, DigestAlgorithm::Md5),
            deduplicated: false,
        };

        if let Err(err) = self.insert_manifest(&stored).await {
            if is_unique_violation(&err) {
                // Another writer on the same database got there first.
                if let Some(existing) = self.find_duplicate(&original_hash).await? {
                    return Ok(existing);
                }
                self.remove_files(&created).await;
                return Err(MediaError::KeyConflict(stored.keys.original));
            }
            self.remove_files(&created).await;
            return Err(err);
        }

        self.caches
            .invalidate_related(MediaEntity::Protocol(&stored.protocol_id));
        self.caches.manifests.set(
            photo_id.clone(),
            stored.clone(),
            SetOptions::tagged([protocol_tag(&stored.protocol_id)]),
        );

        info!(
            photo_id = %photo_id,
            protocol_id = %stored.protocol_id,
            key = %stored.keys.original,
            bytes = stored.manifest.sizes.original,
            "stored protocol photo"
        );
        Ok(stored)
    }

    /// Manifest for `photo_id`, served from cache when possible.
    pub async fn manifest(&self, photo_id: &str) -> MediaResult<StoredPhoto> {
        self.caches
            .manifests
            .get_or_set(
                photo_id,
                || self.fetch_manifest(photo_id.to_string()),
                SetOptions::default(),
            )
            .await
    }

    /// All photos of a protocol, oldest first.
    pub async fn protocol_photos(&self, protocol_id: &str) -> MediaResult<Vec<StoredPhoto>> {
        let tag = protocol_tag(protocol_id);
        self.caches
            .protocol_listings
            .get_or_set(
                &tag,
                || self.fetch_protocol_photos(protocol_id),
                SetOptions::tagged([tag.clone()]),
            )
            .await
    }

    /// Re-read every stored rendition and compare it with the manifest.
    pub async fn verify_photo(&self, photo_id: &str) -> MediaResult<VerificationReport> {
        let stored = self.manifest(photo_id).await?;

        let mut checks = Vec::with_capacity(DerivativeKind::ALL.len());
        for kind in DerivativeKind::ALL {
            let key = stored.keys.key_of(kind);
            let expected = stored.manifest.hash_of(kind);
            let (actual, ok) = match fs::read(self.base_path.join(key)).await {
                Ok(bytes) => (Some(sha256_hex(&bytes)), verify_integrity(&bytes, expected)),
                Err(err) if err.kind() == ErrorKind::NotFound => (None, false),
                Err(err) => return Err(MediaError::Io(err)),
            };
            if !ok {
                warn!(photo_id, key, kind = kind.as_str(), "integrity check failed");
            }
            checks.push(DerivativeCheck {
                kind,
                key: key.to_string(),
                expected: expected.to_string(),
                actual,
                ok,
            });
        }

        let ok = checks.iter().all(|check| check.ok);
        if !ok {
            // Force the next read back to the database.
            self.caches.invalidate_related(MediaEntity::Photo {
                photo_id,
                protocol_id: &stored.protocol_id,
            });
        }
        Ok(VerificationReport {
            photo_id: photo_id.to_string(),
            ok,
            checks,
        })
    }

    /// Open a stored payload for streaming out, with its length in bytes.
    pub async fn open_object(&self, key: &str) -> MediaResult<(File, u64)> {
        self.ensure_key_safe(key)?;
        let file = File::open(self.base_path.join(key))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    MediaError::ObjectNotFound(key.to_string())
                } else {
                    MediaError::Io(err)
                }
            })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    /// Preload the manifest cache with the most recent photos.
    pub async fn warm_manifest_cache(&self, limit: u32) -> MediaResult<usize> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT photo_id FROM protocol_manifests ORDER BY created_at DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&*self.db)
        .await?;

        let loaded = self
            .caches
            .manifests
            .warm(
                ids.into_iter()
                    .map(|id| (id.clone(), self.fetch_manifest(id))),
            )
            .await;
        Ok(loaded)
    }

    async fn fetch_manifest(&self, photo_id: String) -> MediaResult<StoredPhoto> {
        let row = sqlx::query_as::<_, ManifestRow>(&format!(
            "SELECT {} FROM protocol_manifests WHERE photo_id = ?",
            MANIFEST_COLUMNS
        ))
        .bind(&photo_id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => MediaError::PhotoNotFound(photo_id.clone()),
            other => MediaError::Sqlx(other),
        })?;
        Ok(row.into_stored()?)
    }

    async fn fetch_protocol_photos(&self, protocol_id: &str) -> MediaResult<Vec<StoredPhoto>> {
        let rows = sqlx::query_as::<_, ManifestRow>(&format!(
            "SELECT {} FROM protocol_manifests WHERE protocol_id = ? ORDER BY created_at ASC",
            MANIFEST_COLUMNS
        ))
        .bind(protocol_id)
        .fetch_all(&*self.db)
        .await?;

        rows.into_iter()
            .map(|row| row.into_stored().map_err(MediaError::from))
            .collect()
    }

    async fn find_by_original_hash(&self, original_hash: &str) -> MediaResult<Option<StoredPhoto>> {
        let row = sqlx::query_as::<_, ManifestRow>(&format!(
            "SELECT {} FROM protocol_manifests WHERE original_hash = ? \
             ORDER BY created_at ASC LIMIT 1",
            MANIFEST_COLUMNS
        ))
        .bind(original_hash)
        .fetch_optional(&*self.db)
        .await?;

        row.map(|row| row.into_stored().map_err(MediaError::from))
            .transpose()
    }

    async fn find_duplicate(&self, original_hash: &str) -> MediaResult<Option<StoredPhoto>> {
        let existing = self
            .find_by_original_hash(original_hash)
            .await?
            .filter(|existing| is_duplicate(&existing.manifest.original_hash, original_hash));
        Ok(existing.map(|existing| {
            info!(
                photo_id = %existing.manifest.photo_id,
                protocol_id = %existing.protocol_id,
                "duplicate original, reusing stored photo"
            );
            StoredPhoto {
                deduplicated: true,
                ..existing
            }
        }))
    }

    /// First of `keys` that any stored photo uses for any of its renditions.
    async fn taken_key(&self, keys: &DerivativeKeys) -> MediaResult<Option<String>> {
        let row: Option<(String, String, String, String)> = sqlx::query_as(
            "SELECT original_key, thumb_key, gallery_key, pdf_key FROM protocol_manifests \
             WHERE original_key IN (?1, ?2, ?3, ?4) OR thumb_key IN (?1, ?2, ?3, ?4) \
             OR gallery_key IN (?1, ?2, ?3, ?4) OR pdf_key IN (?1, ?2, ?3, ?4) LIMIT 1",
        )
        .bind(&keys.original)
        .bind(&keys.thumb)
        .bind(&keys.gallery)
        .bind(&keys.pdf)
        .fetch_optional(&*self.db)
        .await?;

        Ok(row.and_then(|(original, thumb, gallery, pdf)| {
            let used = [original, thumb, gallery, pdf];
            DerivativeKind::ALL
                .into_iter()
                .map(|kind| keys.key_of(kind))
                .find(|key| used.iter().any(|taken| taken == key))
                .map(str::to_string)
        }))
    }

    async fn insert_manifest(&self, stored: &StoredPhoto) -> MediaResult<()> {
        let manifest = &stored.manifest;
        let metadata = serde_json::to_string(&manifest.metadata)?;
        sqlx::query(&format!(
            "INSERT INTO protocol_manifests ({}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            MANIFEST_COLUMNS
        ))
        .bind(&manifest.photo_id)
        .bind(&stored.protocol_id)
        .bind(&stored.keys.original)
        .bind(&stored.keys.thumb)
        .bind(&stored.keys.gallery)
        .bind(&stored.keys.pdf)
        .bind(&manifest.original_hash)
        .bind(&stored.original_md5)
        .bind(&manifest.derivative_hashes.thumb)
        .bind(&manifest.derivative_hashes.gallery)
        .bind(&manifest.derivative_hashes.pdf)
        .bind(manifest.sizes.original as i64)
        .bind(manifest.sizes.thumb as i64)
        .bind(manifest.sizes.gallery as i64)
        .bind(manifest.sizes.pdf as i64)
        .bind(metadata)
        .bind(manifest.created_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    /// Write `bytes` under `key`, returning the path when a new file was created.
    ///
    /// - Writes to a temporary sibling file first, flushed and fsynced.
    /// - Publishes it with a hard link, which fails instead of replacing an existing file.
    /// - An existing file with identical content is kept and `None` is returned.
    /// - An existing file with other content is a `KeyConflict`.
    async fn write_object(&self, key: &str, bytes: &[u8]) -> MediaResult<Option<PathBuf>> {
        self.ensure_key_safe(key)?;
        let file_path = self.base_path.join(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            MediaError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        if let Err(err) = write_synced(&mut file, bytes).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(MediaError::Io(err));
        }

        let linked = fs::hard_link(&tmp_path, &file_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        match linked {
            Ok(()) => {
                debug!(key, bytes = bytes.len(), "wrote object");
                Ok(Some(file_path))
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let current = fs::read(&file_path).await?;
                if verify_integrity(&current, &sha256_hex(bytes)) {
                    debug!(key, "identical object already stored");
                    Ok(None)
                } else {
                    warn!(key, "refusing to replace an existing object");
                    Err(MediaError::KeyConflict(key.to_string()))
                }
            }
            Err(err) => Err(MediaError::Io(err)),
        }
    }

    /// Best-effort removal of payloads written before a failure.
    async fn remove_files(&self, paths: &[PathBuf]) {
        for path in paths {
            match fs::remove_file(path).await {
                Ok(_) => debug!("removed partial upload {}", path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => debug!("failed to remove {}: {}", path.display(), err),
            }
        }
    }
}

fn is_unique_violation(err: &MediaError) -> bool {
    match err {
        MediaError::Sqlx(sqlx::Error::Database(db)) => db.is_unique_violation(),
        _ => false,
    }
}

async fn write_synced(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}
