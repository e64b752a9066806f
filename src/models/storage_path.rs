//! Inputs for rendering protocol media storage keys.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Which side of a rental the protocol documents.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolType {
    Handover,
    Return,
}

impl ProtocolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolType::Handover => "handover",
            ProtocolType::Return => "return",
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "handover" => Ok(ProtocolType::Handover),
            "return" => Ok(ProtocolType::Return),
            other => Err(format!("unknown protocol type `{}`", other)),
        }
    }
}

/// Allow-listed media categories. Each one maps to its own key prefix.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhotoCategory {
    VehiclePhotos,
    DamagePhotos,
    DocumentPhotos,
    Signatures,
}

impl PhotoCategory {
    pub const ALL: [PhotoCategory; 4] = [
        PhotoCategory::VehiclePhotos,
        PhotoCategory::DamagePhotos,
        PhotoCategory::DocumentPhotos,
        PhotoCategory::Signatures,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoCategory::VehiclePhotos => "vehicle_photos",
            PhotoCategory::DamagePhotos => "damage_photos",
            PhotoCategory::DocumentPhotos => "document_photos",
            PhotoCategory::Signatures => "signatures",
        }
    }
}

impl FromStr for PhotoCategory {
    type Err = ();

    /// Exact match only. Case or whitespace variants are not accepted.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        PhotoCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == value)
            .ok_or(())
    }
}

/// Everything a path template may reference.
///
/// `category` stays a raw string on purpose: it usually comes straight from
/// an upload form and is validated when the path is rendered.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoragePathVariables {
    pub year: i32,
    pub month: u32,
    #[serde(default)]
    pub day: Option<u32>,
    pub company: String,
    pub vehicle: String,
    pub protocol_type: ProtocolType,
    pub protocol_id: String,
    pub category: String,
    pub filename: String,
}

impl StoragePathVariables {
    /// Same variables with a different filename.
    pub fn with_filename(&self, filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..self.clone()
        }
    }
}
