use std::path::Path;

use actix_multipart::form::tempfile::TempFile;

use crate::errors::AppError;

/// URL prefix the media directory is served under.
pub const MEDIA_URL_PREFIX: &str = "/media";

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;

/// Whole multipart body: the image plus the text fields.
pub const MAX_UPLOAD_BYTES: usize = MAX_IMAGE_BYTES + 64 * 1024;

fn image_extension(content_type: &str) -> Option<&'static str> {
    match content_type {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Checks an uploaded image and returns the extension to store it under.
pub fn check_image(file: &TempFile) -> Result<&'static str, String> {
    if file.size > MAX_IMAGE_BYTES {
        return Err(format!(
            "Image must be at most {} MB.",
            MAX_IMAGE_BYTES / (1024 * 1024)
        ));
    }
    file.content_type
        .as_ref()
        .and_then(|mime| image_extension(mime.essence_str()))
        .ok_or_else(|| "Image must be a PNG, JPEG, GIF or WebP file.".to_owned())
}

/// Moves an upload into `dir` under a fresh name and returns the URL it is served at.
pub fn store_image(
    dir: &Path,
    owner_id: i64,
    file: TempFile,
    extension: &str,
) -> Result<String, AppError> {
    let stamp = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();
    let name = format!("{}-{}.{}", owner_id, stamp, extension);
    file.file.persist(dir.join(&name)).map_err(|e| {
        log::error!("Failed to store image {}: {}", name, e.error);
        AppError::IoError(e.error)
    })?;
    log::info!("Stored image {} for user {}", name, owner_id);
    Ok(format!("{}/{}", MEDIA_URL_PREFIX, name))
}
