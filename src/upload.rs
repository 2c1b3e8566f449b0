use base64::Engine;
use bytes::Bytes;

use crate::error::StudioError;

pub const MISSING_IMAGE: &str = "Please select an image first";

/// The product photo the user picked or dropped.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl SourceImage {
    /// Accepts declared `image/*` uploads, or anything whose bytes sniff as a
    /// known image format.
    pub fn new(
        file_name: impl Into<String>,
        content_type: Option<&str>,
        bytes: Bytes,
        max_bytes: usize,
    ) -> Result<Self, StudioError> {
        if bytes.is_empty() {
            return Err(StudioError::Validation(MISSING_IMAGE.to_string()));
        }
        if bytes.len() > max_bytes {
            return Err(StudioError::Validation(format!(
                "Image is too large ({:.2} MB, max {:.0} MB)",
                megabytes(bytes.len()),
                megabytes(max_bytes)
            )));
        }

        let declared = content_type
            .map(|ct| ct.trim().to_ascii_lowercase())
            .filter(|ct| ct.starts_with("image/"));
        let content_type = match declared {
            Some(ct) => ct,
            None => image::guess_format(&bytes)
                .map(|format| format.to_mime_type().to_string())
                .map_err(|_| StudioError::Validation("Only image files are supported".to_string()))?,
        };

        let mut file_name = file_name.into();
        if file_name.trim().is_empty() {
            file_name = "upload".to_string();
        }
        Ok(Self { file_name, content_type, bytes })
    }

    pub fn size_mb(&self) -> f64 {
        megabytes(self.bytes.len())
    }

    pub fn preview_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.content_type,
            base64::engine::general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

fn megabytes(len: usize) -> f64 {
    len as f64 / 1024.0 / 1024.0
}

#[cfg(test)]
pub(crate) const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

#[cfg(test)]
pub(crate) fn png(name: &str) -> SourceImage {
    SourceImage::new(name, Some("image/png"), Bytes::from_static(PNG_MAGIC), 1024).unwrap()
}
