//! Intake normalization: turns an upload that the host has already read
//! (extracted text, raw image bytes, or a link) into an immutable
//! [`FileIngest`]. Text extraction from PDFs happens upstream.

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;

use crate::errors::AppError;
use crate::models::{FileIngest, FileKind};

const SUPPORTED_IMAGE_TYPES: [&str; 4] = ["image/png", "image/jpeg", "image/webp", "image/gif"];

/// An upload as received from the hosting layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RawUpload {
    Text {
        text: String,
    },
    Image {
        #[serde(rename = "contentType")]
        content_type: String,
        /// Base64 encoded image bytes.
        #[serde(rename = "data")]
        data_base64: String,
    },
    Url {
        url: String,
    },
}

/// Normalizes a raw upload, enforcing the size ceiling.
pub fn normalize(upload: &RawUpload, max_bytes: u64) -> Result<FileIngest, AppError> {
    match upload {
        RawUpload::Text { text } => normalize_text(text, max_bytes),
        RawUpload::Image {
            content_type,
            data_base64,
        } => {
            let bytes = general_purpose::STANDARD
                .decode(data_base64.trim())
                .map_err(|e| AppError::Ingest(format!("Image payload is not valid base64: {}", e)))?;
            normalize_image(content_type, &bytes, max_bytes)
        }
        RawUpload::Url { url } => normalize_url(url),
    }
}

pub fn normalize_text(text: &str, max_bytes: u64) -> Result<FileIngest, AppError> {
    let size_bytes = text.len() as u64;
    check_size(size_bytes, max_bytes)?;

    let cleaned = clean_text(text);
    if cleaned.is_empty() {
        return Err(AppError::Ingest("Uploaded text is empty".to_string()));
    }

    Ok(FileIngest {
        kind: FileKind::Text,
        text: Some(cleaned),
        image_data: None,
        size_bytes,
    })
}

pub fn normalize_image(
    content_type: &str,
    bytes: &[u8],
    max_bytes: u64,
) -> Result<FileIngest, AppError> {
    let mime = content_type.trim().to_ascii_lowercase();
    if !SUPPORTED_IMAGE_TYPES.contains(&mime.as_str()) {
        return Err(AppError::Ingest(format!(
            "Unsupported image type '{}'",
            content_type
        )));
    }
    if bytes.is_empty() {
        return Err(AppError::Ingest("Uploaded image is empty".to_string()));
    }

    let size_bytes = bytes.len() as u64;
    check_size(size_bytes, max_bytes)?;

    let data_url = format!(
        "data:{};base64,{}",
        mime,
        general_purpose::STANDARD.encode(bytes)
    );

    Ok(FileIngest {
        kind: FileKind::Image,
        text: None,
        image_data: Some(data_url),
        size_bytes,
    })
}

pub fn normalize_url(url: &str) -> Result<FileIngest, AppError> {
    let parsed = reqwest::Url::parse(url.trim())
        .map_err(|e| AppError::Ingest(format!("Invalid document URL: {}", e)))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::Ingest(format!(
            "Unsupported URL scheme '{}'",
            parsed.scheme()
        )));
    }

    let url = parsed.to_string();
    Ok(FileIngest {
        kind: FileKind::Url,
        size_bytes: url.len() as u64,
        text: Some(url),
        image_data: None,
    })
}

fn check_size(size_bytes: u64, max_bytes: u64) -> Result<(), AppError> {
    if size_bytes > max_bytes {
        tracing::warn!(
            "Rejecting upload of {} bytes (limit {})",
            size_bytes,
            max_bytes
        );
        return Err(AppError::Ingest(format!(
            "File of {} bytes exceeds the {} byte limit",
            size_bytes, max_bytes
        )));
    }
    Ok(())
}

/// Drops invisible characters and trailing whitespace, and collapses runs of
/// blank lines left behind by text extraction.
fn clean_text(text: &str) -> String {
    let stripped = text.replace(['\u{feff}', '\u{200b}', '\0'], "");
    let mut out = String::with_capacity(stripped.len());
    let mut blank_run = 0;
    for line in stripped.lines() {
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_is_cleaned() {
        let ingest = normalize_text("\u{feff}Hospital: Taipei\n\n\n\nDoctor: Lin  \n", 1024).unwrap();
        assert_eq!(ingest.kind, FileKind::Text);
        assert_eq!(ingest.text.as_deref(), Some("Hospital: Taipei\n\nDoctor: Lin"));
    }

    #[test]
    fn test_oversized_text_rejected() {
        let err = normalize_text("abcdef", 3).unwrap_err();
        assert_eq!(err.kind(), "ingest");
    }

    #[test]
    fn test_blank_text_rejected() {
        assert!(normalize_text("  \n\u{200b}\n", 1024).is_err());
    }

    #[test]
    fn test_image_becomes_data_url() {
        let ingest = normalize_image("IMAGE/PNG", &[1, 2, 3], 1024).unwrap();
        assert_eq!(ingest.kind, FileKind::Image);
        assert_eq!(ingest.size_bytes, 3);
        assert_eq!(ingest.image_data.as_deref(), Some("data:image/png;base64,AQID"));
    }

    #[test]
    fn test_unsupported_image_type_rejected() {
        let err = normalize_image("application/pdf", &[1], 1024).unwrap_err();
        assert!(err.to_string().contains("Unsupported image type"));
    }

    #[test]
    fn test_raw_upload_decodes_base64() {
        let upload = RawUpload::Image {
            content_type: "image/jpeg".to_string(),
            data_base64: "AQID".to_string(),
        };
        let ingest = normalize(&upload, 1024).unwrap();
        assert_eq!(ingest.size_bytes, 3);

        let bad = RawUpload::Image {
            content_type: "image/jpeg".to_string(),
            data_base64: "***".to_string(),
        };
        assert!(normalize(&bad, 1024).is_err());
    }

    #[test]
    fn test_url_scheme_checked() {
        assert!(normalize_url("https://example.com/policy.pdf").is_ok());
        assert!(normalize_url("ftp://example.com/policy.pdf").is_err());
        assert!(normalize_url("not a url").is_err());
    }
}
