//! Deterministic storage keys for protocol media.
//!
//! A [`PathTemplate`] such as
//! `protocols/{year}/{month}/{company}/{vehicle}/{protocolType}/{protocolId}/{category}/{filename}`
//! is rendered against [`StoragePathVariables`]. Every variable is sanitized
//! before substitution, the category is checked against the allow-list, and
//! over-long keys are shortened by trimming variable components only.
//!
//! Rendering is pure: identical inputs always produce identical keys, which
//! makes re-uploads idempotent.

use crate::models::storage_path::{PhotoCategory, StoragePathVariables};
use std::{collections::HashMap, str::FromStr};
use thiserror::Error;

pub const DEFAULT_TEMPLATE: &str =
    "protocols/{year}/{month}/{company}/{vehicle}/{protocolType}/{protocolId}/{category}/{filename}";
pub const DEFAULT_MAX_PATH_LEN: usize = 512;

/// Components are never shortened below this many characters.
const MIN_COMPONENT_LEN: usize = 8;
/// Longest suffix still treated as a file extension.
const MAX_EXTENSION_LEN: usize = 10;
const UNKNOWN: &str = "unknown";

const DEFAULT_COMPANY_ALIASES: [(&str, &str); 8] = [
    ("blackrent", "BlackRent"),
    ("black rent", "BlackRent"),
    ("blackrent system", "BlackRent"),
    ("abc rent", "ABC_Rent"),
    ("premium cars", "Premium_Cars"),
    ("premium cars sk", "Premium_Cars"),
    ("city rent", "City_Rent"),
    ("city rent s.r.o.", "City_Rent"),
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("category `{0}` is not allowed")]
    InvalidCategory(String),
    #[error("unknown template placeholder `{0}`")]
    UnknownPlaceholder(String),
    #[error("malformed path template: {0}")]
    MalformedTemplate(String),
    #[error("rendered path needs {len} characters but the limit is {max}")]
    PathTooLong { len: usize, max: usize },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Placeholder {
    Year,
    Month,
    Day,
    Company,
    Vehicle,
    ProtocolType,
    ProtocolId,
    Category,
    Filename,
}

impl Placeholder {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "year" => Placeholder::Year,
            "month" => Placeholder::Month,
            "day" => Placeholder::Day,
            "company" => Placeholder::Company,
            "vehicle" => Placeholder::Vehicle,
            "protocolType" => Placeholder::ProtocolType,
            "protocolId" => Placeholder::ProtocolId,
            "category" => Placeholder::Category,
            "filename" => Placeholder::Filename,
            _ => return None,
        })
    }

    /// Free-text components that may be shortened to fit the length limit.
    fn is_truncatable(self) -> bool {
        matches!(
            self,
            Placeholder::Company
                | Placeholder::Vehicle
                | Placeholder::ProtocolId
                | Placeholder::Filename
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Var(Placeholder),
}

/// A parsed path template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse `{name}` placeholders out of `template`.
    ///
    /// Rejects empty or absolute templates, `.`/`..` segments, control
    /// characters, unbalanced braces and unknown placeholder names.
    pub fn parse(template: &str) -> Result<Self, PathError> {
        if template.trim().is_empty() {
            return Err(PathError::MalformedTemplate("template is empty".into()));
        }
        if template.starts_with('/') {
            return Err(PathError::MalformedTemplate(
                "template must be relative".into(),
            ));
        }
        if template.split('/').any(|part| part == ".." || part == ".") {
            return Err(PathError::MalformedTemplate(
                "template must not contain `.` or `..` segments".into(),
            ));
        }
        if template.chars().any(|c| c.is_control() || c == '\\') {
            return Err(PathError::MalformedTemplate(
                "template contains control characters or backslashes".into(),
            ));
        }

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars();
        while let Some(c) = chars.next() {
            match c {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        if inner == '{' {
                            return Err(PathError::MalformedTemplate(
                                "nested `{` in placeholder".into(),
                            ));
                        }
                        name.push(inner);
                    }
                    if !closed {
                        return Err(PathError::MalformedTemplate(format!(
                            "unclosed placeholder `{{{}`",
                            name
                        )));
                    }
                    let placeholder = Placeholder::from_name(name.trim())
                        .ok_or_else(|| PathError::UnknownPlaceholder(name.clone()))?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Var(placeholder));
                }
                '}' => {
                    return Err(PathError::MalformedTemplate(
                        "unmatched `}` in template".into(),
                    ));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }
}

impl FromStr for PathTemplate {
    type Err = PathError;

    fn from_str(template: &str) -> Result<Self, Self::Err> {
        Self::parse(template)
    }
}

/// Renders storage keys from a template and per-upload variables.
#[derive(Clone, Debug)]
pub struct PathOrganizer {
    template: PathTemplate,
    max_len: usize,
    company_aliases: HashMap<String, String>,
}

impl PathOrganizer {
    pub fn new(template: PathTemplate, max_len: usize) -> Self {
        let company_aliases = DEFAULT_COMPANY_ALIASES
            .iter()
            .map(|(alias, canonical)| (alias.to_string(), canonical.to_string()))
            .collect();
        Self {
            template,
            max_len,
            company_aliases,
        }
    }

    /// Default template and length limit.
    pub fn with_defaults() -> Result<Self, PathError> {
        Ok(Self::new(
            PathTemplate::parse(DEFAULT_TEMPLATE)?,
            DEFAULT_MAX_PATH_LEN,
        ))
    }

    /// Register an extra informal company name. The canonical name is
    /// sanitized so it is always path-safe.
    pub fn with_company_alias(mut self, alias: &str, canonical: &str) -> Self {
        self.company_aliases
            .insert(alias_key(alias), sanitize_component(canonical));
        self
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Canonical, path-safe company name. Unmapped names fall back to their
    /// sanitized form.
    pub fn canonical_company(&self, name: &str) -> String {
        self.company_aliases
            .get(&alias_key(name))
            .cloned()
            .unwrap_or_else(|| sanitize_component(name))
    }

    /// Render the storage key for `vars`.
    pub fn generate_path(&self, vars: &StoragePathVariables) -> Result<String, PathError> {
        let category = PhotoCategory::from_str(&vars.category)
            .map_err(|_| PathError::InvalidCategory(vars.category.clone()))?;

        let mut parts: Vec<(String, Option<Placeholder>)> = self
            .template
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => (text.clone(), None),
                Segment::Var(placeholder) => (
                    self.render_var(*placeholder, vars, category),
                    Some(*placeholder),
                ),
            })
            .collect();

        self.fit_to_length(&mut parts)?;

        Ok(parts.into_iter().map(|(text, _)| text).collect())
    }

    fn render_var(
        &self,
        placeholder: Placeholder,
        vars: &StoragePathVariables,
        category: PhotoCategory,
    ) -> String {
        match placeholder {
            Placeholder::Year => format!("{:04}", vars.year),
            Placeholder::Month => two_digits(Some(vars.month), 12),
            Placeholder::Day => two_digits(vars.day, 31),
            Placeholder::Company => self.canonical_company(&vars.company),
            Placeholder::Vehicle => sanitize_component(&vars.vehicle),
            Placeholder::ProtocolType => vars.protocol_type.as_str().to_string(),
            Placeholder::ProtocolId => sanitize_component(&vars.protocol_id),
            Placeholder::Category => category.as_str().to_string(),
            Placeholder::Filename => sanitize_component(&vars.filename),
        }
    }

    /// Shorten the longest variable components until the key fits.
    fn fit_to_length(&self, parts: &mut [(String, Option<Placeholder>)]) -> Result<(), PathError> {
        loop {
            let len: usize = parts.iter().map(|(text, _)| text.len()).sum();
            if len <= self.max_len {
                return Ok(());
            }
            let overflow = len - self.max_len;

            let candidate = parts
                .iter_mut()
                .filter(|(text, placeholder)| match placeholder {
                    Some(Placeholder::Filename) => can_shorten_filename(text),
                    Some(p) => p.is_truncatable() && text.len() > MIN_COMPONENT_LEN,
                    None => false,
                })
                .max_by_key(|(text, _)| text.len());

            let Some((text, placeholder)) = candidate else {
                return Err(PathError::PathTooLong {
                    len,
                    max: self.max_len,
                });
            };

            let keep = text.len().saturating_sub(overflow).max(MIN_COMPONENT_LEN);
            *text = if *placeholder == Some(Placeholder::Filename) {
                shorten_filename(text, keep)
            } else {
                shorten_component(text, keep)
            };
        }
    }
}

/// Make a single path component filesystem- and URL-safe.
///
/// ASCII letters, digits, `-`, `_` and `.` survive with their case intact.
/// Slovak and Czech diacritics fold to their base letter, control characters
/// are dropped and anything else becomes `_`. Separator runs collapse, so
/// `..` and `/` can never survive. An empty result becomes `unknown`.
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let mapped = match ch {
            c if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' => c,
            c if c.is_control() => continue,
            c => fold_diacritic(c).unwrap_or('_'),
        };
        match mapped {
            '.' if out.ends_with('.') => {}
            '.' if out.ends_with('_') => {
                out.pop();
                out.push('.');
            }
            '_' if out.ends_with('_') || out.ends_with('.') => {}
            c => out.push(c),
        }
    }

    let trimmed = out.trim_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        UNKNOWN.to_string()
    } else {
        trimmed.to_string()
    }
}

fn alias_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn two_digits(value: Option<u32>, max: u32) -> String {
    match value {
        Some(v) if (1..=max).contains(&v) => format!("{:02}", v),
        _ => UNKNOWN.to_string(),
    }
}

/// Sanitized components are ASCII, so byte slicing is safe.
fn shorten_component(text: &str, keep: usize) -> String {
    let cut = &text[..keep.min(text.len())];
    let trimmed = cut.trim_end_matches(|c| c == '_' || c == '.');
    if trimmed.is_empty() {
        cut.to_string()
    } else {
        trimmed.to_string()
    }
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && name.len() - pos <= MAX_EXTENSION_LEN => name.split_at(pos),
        _ => (name, ""),
    }
}

fn can_shorten_filename(name: &str) -> bool {
    let (stem, _) = split_extension(name);
    name.len() > MIN_COMPONENT_LEN && stem.len() > 1
}

/// Trim the stem and keep the extension so extension-based tooling still works.
fn shorten_filename(name: &str, keep: usize) -> String {
    let (stem, ext) = split_extension(name);
    let stem_keep = keep
        .saturating_sub(ext.len())
        .max(1)
        .min(stem.len().saturating_sub(1))
        .max(1);
    format!("{}{}", shorten_component(stem, stem_keep), ext)
}

fn fold_diacritic(c: char) -> Option<char> {
    Some(match c {
        'á' | 'ä' | 'à' | 'â' => 'a',
        'Á' | 'Ä' | 'À' | 'Â' => 'A',
        'č' | 'ç' => 'c',
        'Č' | 'Ç' => 'C',
        'ď' => 'd',
        'Ď' => 'D',
        'é' | 'ě' | 'è' | 'ë' => 'e',
        'É' | 'Ě' | 'È' | 'Ë' => 'E',
        'í' | 'î' => 'i',
        'Í' | 'Î' => 'I',
        'ĺ' | 'ľ' => 'l',
        'Ĺ' | 'Ľ' => 'L',
        'ň' => 'n',
        'Ň' => 'N',
        'ó' | 'ô' | 'ö' => 'o',
        'Ó' | 'Ô' | 'Ö' => 'O',
        'ŕ' | 'ř' => 'r',
        'Ŕ' | 'Ř' => 'R',
        'š' => 's',
        'Š' => 'S',
        'ť' => 't',
        'Ť' => 'T',
        'ú' | 'ů' | 'ü' => 'u',
        'Ú' | 'Ů' | 'Ü' => 'U',
        'ý' => 'y',
        'Ý' => 'Y',
        'ž' => 'z',
        'Ž' => 'Z',
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::storage_path::ProtocolType;
    use proptest::prelude::*;

    fn vars() -> StoragePathVariables {
        StoragePathVariables {
            year: 2024,
            month: 9,
            day: Some(8),
            company: "BlackRent System".into(),
            vehicle: "BA-123XY".into(),
            protocol_type: ProtocolType::Handover,
            protocol_id: "5f1c2d9e".into(),
            category: "vehicle_photos".into(),
            filename: "front.jpg".into(),
        }
    }

    fn organizer() -> PathOrganizer {
        PathOrganizer::with_defaults().expect("default template parses")
    }

    #[test]
    fn renders_default_template() {
        let path = organizer().generate_path(&vars()).expect("valid vars");
        assert_eq!(
            path,
            "protocols/2024/09/BlackRent/BA-123XY/handover/5f1c2d9e/vehicle_photos/front.jpg"
        );
    }

    #[test]
    fn rendering_is_idempotent() {
        let organizer = organizer();
        let v = vars();
        assert_eq!(organizer.generate_path(&v), organizer.generate_path(&v));
    }

    #[test]
    fn rejects_unknown_category() {
        let mut v = vars();
        v.category = "not_a_category".into();
        assert_eq!(
            organizer().generate_path(&v),
            Err(PathError::InvalidCategory("not_a_category".into()))
        );
    }

    #[test]
    fn every_allowed_category_renders() {
        let organizer = organizer();
        for category in PhotoCategory::ALL {
            let mut v = vars();
            v.category = category.as_str().into();
            let path = organizer.generate_path(&v).expect("allowed category");
            assert!(path.contains(category.as_str()));
        }
    }

    #[test]
    fn sanitizes_traversal_and_control_characters() {
        let mut v = vars();
        v.vehicle = "../../etc".into();
        v.protocol_id = "abc\0def".into();
        v.filename = "../secret/..\\passwd.jpg".into();
        let path = organizer().generate_path(&v).expect("valid vars");
        assert!(!path.contains("../"));
        assert!(!path.contains('\0'));
        assert!(path.ends_with(".jpg"));
        assert!(path.contains("/abcdef/"));
    }

    #[test]
    fn folds_accents_and_falls_back_to_unknown() {
        assert_eq!(sanitize_component("Škoda Octávia"), "Skoda_Octavia");
        assert_eq!(sanitize_component("Ferrari 🏎"), "Ferrari");
        assert_eq!(sanitize_component("///"), "unknown");
        assert_eq!(sanitize_component(""), "unknown");
        assert_eq!(sanitize_component("my photo (1).jpg"), "my_photo_1.jpg");
    }

    #[test]
    fn maps_known_companies_and_sanitizes_the_rest() {
        let organizer = organizer();
        assert_eq!(organizer.canonical_company("  blackrent "), "BlackRent");
        assert_eq!(organizer.canonical_company("Premium Cars SK"), "Premium_Cars");
        assert_eq!(organizer.canonical_company("Nová Firma s.r.o."), "Nova_Firma_s.r.o");

        let custom = organizer.with_company_alias("Lux Drive", "LuxDrive");
        assert_eq!(custom.canonical_company("lux   drive"), "LuxDrive");
    }

    #[test]
    fn invalid_dates_render_as_unknown() {
        let template = PathTemplate::parse("{year}/{month}/{day}/{filename}").expect("valid");
        let organizer = PathOrganizer::new(template, DEFAULT_MAX_PATH_LEN);
        let mut v = vars();
        v.month = 13;
        v.day = None;
        assert_eq!(
            organizer.generate_path(&v).expect("valid vars"),
            "2024/unknown/unknown/front.jpg"
        );
    }

    #[test]
    fn long_paths_truncate_variables_and_keep_extension() {
        let template = PathTemplate::parse(DEFAULT_TEMPLATE).expect("valid");
        let organizer = PathOrganizer::new(template, 120);
        let mut v = vars();
        v.vehicle = "V".repeat(80);
        v.filename = format!("{}.webp", "f".repeat(60));

        let path = organizer.generate_path(&v).expect("fits after truncation");
        assert!(path.len() <= 120, "{} is {} long", path, path.len());
        assert!(path.starts_with("protocols/2024/09/BlackRent/"));
        assert!(path.contains("/handover/5f1c2d9e/vehicle_photos/"));
        assert!(path.ends_with(".webp"));
    }

    #[test]
    fn reports_paths_that_cannot_fit() {
        let template = PathTemplate::parse(DEFAULT_TEMPLATE).expect("valid");
        let organizer = PathOrganizer::new(template, 40);
        assert!(matches!(
            organizer.generate_path(&vars()),
            Err(PathError::PathTooLong { max: 40, .. })
        ));
    }

    #[test]
    fn template_validation() {
        assert!(matches!(
            PathTemplate::parse("{year}/{colour}"),
            Err(PathError::UnknownPlaceholder(name)) if name == "colour"
        ));
        assert!(matches!(
            PathTemplate::parse("/abs/{year}"),
            Err(PathError::MalformedTemplate(_))
        ));
        assert!(matches!(
            PathTemplate::parse("a/../{year}"),
            Err(PathError::MalformedTemplate(_))
        ));
        assert!(matches!(
            PathTemplate::parse("{year"),
            Err(PathError::MalformedTemplate(_))
        ));
        assert!(matches!(
            PathTemplate::parse("year}"),
            Err(PathError::MalformedTemplate(_))
        ));
    }

    proptest! {
        #[test]
        fn hostile_components_never_escape(vehicle in ".*", protocol_id in ".*", filename in ".*") {
            let organizer = organizer();
            let mut v = vars();
            v.vehicle = vehicle;
            v.protocol_id = protocol_id;
            v.filename = filename;
            let path = organizer.generate_path(&v).expect("default limit is generous");
            prop_assert!(!path.contains("../"));
            prop_assert!(!path.contains('\0'));
            prop_assert!(path.split('/').all(|part| !part.is_empty() && part != ".."));
            prop_assert_eq!(path.split('/').count(), 9);
            prop_assert_eq!(Some(path.clone()), organizer.generate_path(&v).ok());
        }

        #[test]
        fn sanitized_components_are_ascii_and_non_empty(raw in ".*") {
            let clean = sanitize_component(&raw);
            prop_assert!(!clean.is_empty());
            prop_assert!(clean.is_ascii());
            prop_assert!(!clean.contains('/'));
            prop_assert!(!clean.contains(".."));
        }
    }
}
