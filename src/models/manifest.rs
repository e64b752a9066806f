//! Integrity manifests for uploaded protocol photos.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// The four stored renditions of a protocol photo.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DerivativeKind {
    Original,
    Thumb,
    Gallery,
    Pdf,
}

impl DerivativeKind {
    pub const ALL: [DerivativeKind; 4] = [
        DerivativeKind::Original,
        DerivativeKind::Thumb,
        DerivativeKind::Gallery,
        DerivativeKind::Pdf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DerivativeKind::Original => "original",
            DerivativeKind::Thumb => "thumb",
            DerivativeKind::Gallery => "gallery",
            DerivativeKind::Pdf => "pdf",
        }
    }
}

/// SHA-256 digests of the derived renditions.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DerivativeHashes {
    pub thumb: String,
    pub gallery: String,
    pub pdf: String,
}

/// Byte lengths of every rendition, original included.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct DerivativeSizes {
    pub original: u64,
    pub thumb: u64,
    pub gallery: u64,
    pub pdf: u64,
}

/// Binds a logical photo to the content digests and sizes of its renditions.
///
/// Created once at ingestion and never mutated. `original_hash` doubles as the
/// deduplication key for repeated uploads.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhotoManifest {
    pub photo_id: String,
    pub original_hash: String,
    pub derivative_hashes: DerivativeHashes,
    pub sizes: DerivativeSizes,
    pub created_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl PhotoManifest {
    pub fn hash_of(&self, kind: DerivativeKind) -> &str {
        match kind {
            DerivativeKind::Original => &self.original_hash,
            DerivativeKind::Thumb => &self.derivative_hashes.thumb,
            DerivativeKind::Gallery => &self.derivative_hashes.gallery,
            DerivativeKind::Pdf => &self.derivative_hashes.pdf,
        }
    }
}

/// Storage keys of every rendition.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DerivativeKeys {
    pub original: String,
    pub thumb: String,
    pub gallery: String,
    pub pdf: String,
}

impl DerivativeKeys {
    pub fn key_of(&self, kind: DerivativeKind) -> &str {
        match kind {
            DerivativeKind::Original => &self.original,
            DerivativeKind::Thumb => &self.thumb,
            DerivativeKind::Gallery => &self.gallery,
            DerivativeKind::Pdf => &self.pdf,
        }
    }
}

/// A manifest together with where its payloads live.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoredPhoto {
    pub protocol_id: String,
    pub manifest: PhotoManifest,
    pub keys: DerivativeKeys,
    /// MD5 of the original, kept only for legacy readers.
    pub original_md5: String,
    /// True when the upload matched an existing original and nothing was written.
    #[serde(default)]
    pub deduplicated: bool,
}

/// Outcome of re-hashing one stored rendition.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DerivativeCheck {
    pub kind: DerivativeKind,
    pub key: String,
    pub expected: String,
    /// `None` when the payload is missing from storage.
    pub actual: Option<String>,
    pub ok: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub photo_id: String,
    pub ok: bool,
    pub checks: Vec<DerivativeCheck>,
}

/// Row layout of the `protocol_manifests` table.
#[derive(Clone, FromRow, Debug)]
pub struct ManifestRow {
    pub photo_id: String,
    pub protocol_id: String,
    pub original_key: String,
    pub thumb_key: String,
    pub gallery_key: String,
    pub pdf_key: String,
    pub original_hash: String,
    pub original_md5: String,
    pub thumb_hash: String,
    pub gallery_hash: String,
    pub pdf_hash: String,
    pub original_size: i64,
    pub thumb_size: i64,
    pub gallery_size: i64,
    pub pdf_size: i64,
    pub metadata: String,
    pub created_at: DateTime<Utc>,
}

impl ManifestRow {
    pub fn into_stored(self) -> Result<StoredPhoto, serde_json::Error> {
        let metadata = serde_json::from_str(&self.metadata)?;
        Ok(StoredPhoto {
            protocol_id: self.protocol_id,
            manifest: PhotoManifest {
                photo_id: self.photo_id,
                original_hash: self.original_hash,
                derivative_hashes: DerivativeHashes {
                    thumb: self.thumb_hash,
                    gallery: self.gallery_hash,
                    pdf: self.pdf_hash,
                },
                sizes: DerivativeSizes {
                    original: self.original_size.max(0) as u64,
                    thumb: self.thumb_size.max(0) as u64,
                    gallery: self.gallery_size.max(0) as u64,
                    pdf: self.pdf_size.max(0) as u64,
                },
                created_at: self.created_at,
                metadata,
            },
            keys: DerivativeKeys {
                original: self.original_key,
                thumb: self.thumb_key,
                gallery: self.gallery_key,
                pdf: self.pdf_key,
            },
            original_md5: self.original_md5,
            deduplicated: false,
        })
    }
}
