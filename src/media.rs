//! Media kind inference and artifact naming.

use std::path::Path;
use std::str::FromStr;

use chrono::Utc;
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mov", "webm", "mkv", "avi", "wmv", "flv", "mpeg", "mpg", "3gp",
];

/// Kind of media an artifact holds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
}

impl MediaKind {
    /// Infers the kind from a file name's extension. Anything that is not a
    /// known video container is treated as an image.
    pub fn infer(file_name: &str) -> Self {
        match extension_of(file_name) {
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Video,
            _ => MediaKind::Image,
        }
    }

    /// An explicit `type` field wins over the extension when it names a known kind.
    pub fn resolve(explicit: Option<&str>, file_name: &str) -> Self {
        match explicit.map(str::trim).filter(|s| !s.is_empty()) {
            Some(value) => value.parse().unwrap_or_else(|_| {
                warn!("Ignoring unknown media type '{}', inferring from {}", value, file_name);
                MediaKind::infer(file_name)
            }),
            None => MediaKind::infer(file_name),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        }
    }

    fn fallback_content_type(&self) -> &'static str {
        match self {
            MediaKind::Video => "video/mp4",
            MediaKind::Image => "application/octet-stream",
        }
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "video" => Ok(MediaKind::Video),
            "image" => Ok(MediaKind::Image),
            _ => Err(format!("Unknown media kind: {}", s)),
        }
    }
}

/// Content type to advertise when streaming `file_name`.
pub fn content_type_for(file_name: &str) -> String {
    match mime_guess::from_path(file_name).first() {
        Some(mime) => mime.essence_str().to_string(),
        None => MediaKind::infer(file_name).fallback_content_type().to_string(),
    }
}

/// Lowercased extension without the dot.
pub fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_lowercase())
}

/// Builds a collision-resistant artifact name: millisecond timestamp plus a
/// random suffix, keeping the extension of the declared file name.
pub fn artifact_file_name(declared_file_name: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    let stem = format!("{}-{}", Utc::now().timestamp_millis(), &suffix[..12]);
    match extension_of(declared_file_name) {
        Some(ext) if ext.chars().all(|c| c.is_ascii_alphanumeric()) => format!("{}.{}", stem, ext),
        _ => stem,
    }
}

/// Reduces a client supplied folder to a single safe path segment.
pub fn sanitize_folder(folder: Option<&str>, default_folder: &str) -> String {
    let cleaned: String = folder
        .unwrap_or_default()
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        default_folder.to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_video_and_image() {
        assert_eq!(MediaKind::infer("holiday.MP4"), MediaKind::Video);
        assert_eq!(MediaKind::infer("clip.webm"), MediaKind::Video);
        assert_eq!(MediaKind::infer("photo.jpg"), MediaKind::Image);
        assert_eq!(MediaKind::infer("no_extension"), MediaKind::Image);
    }

    #[test]
    fn test_explicit_type_takes_precedence() {
        assert_eq!(MediaKind::resolve(Some("video"), "poster.png"), MediaKind::Video);
        assert_eq!(MediaKind::resolve(Some("IMAGE"), "movie.mp4"), MediaKind::Image);
        assert_eq!(MediaKind::resolve(Some("audio"), "movie.mp4"), MediaKind::Video);
        assert_eq!(MediaKind::resolve(Some("  "), "photo.gif"), MediaKind::Image);
    }

    #[test]
    fn test_artifact_file_name_keeps_extension() {
        let a = artifact_file_name("My Movie.final.MOV");
        let b = artifact_file_name("My Movie.final.MOV");
        assert!(a.ends_with(".mov"));
        assert_ne!(a, b);
        assert!(!artifact_file_name("README").contains('.'));
        assert!(!artifact_file_name("evil.m/../x").contains('/'));
    }

    #[test]
    fn test_sanitize_folder() {
        assert_eq!(sanitize_folder(Some("holidays-2024"), "uploads"), "holidays-2024");
        assert_eq!(sanitize_folder(Some("../../etc"), "uploads"), "etc");
        assert_eq!(sanitize_folder(Some("a b"), "uploads"), "a_b");
        assert_eq!(sanitize_folder(Some(""), "uploads"), "uploads");
        assert_eq!(sanitize_folder(None, "uploads"), "uploads");
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type_for("a.mp4"), "video/mp4");
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a.unknownext"), "application/octet-stream");
    }
}
