use std::path::Path;

use thiserror::Error;

pub mod image;

#[derive(Debug, Error)]
pub enum MediaError {
    // the bytes could not be decoded as any image format we know
    #[error("unsupported image format (supported: jpg/png/gif/bmp/tiff/webp): {0}")]
    UnsupportedFormat(String),

    #[error("failed to encode image: {0}")]
    Encode(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// output extension for an edited image
//
// formats we can encode losslessly enough keep their extension, everything
// else is re-encoded as jpeg
pub fn normalize_edit_extension(ext: &str) -> &'static str {
    match ext.trim().trim_start_matches('.').to_lowercase().as_str() {
        "jpg" | "jpeg" => ".jpg",
        "png" => ".png",
        "gif" => ".gif",
        "bmp" => ".bmp",
        "tif" => ".tif",
        "tiff" => ".tiff",
        _ => ".jpg",
    }
}

// mime type for the extensions normalize_edit_extension produces
pub fn mime_for_extension(ext: &str) -> Option<&'static str> {
    match ext.trim().trim_start_matches('.').to_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

// best guess at the mime type of a client filename
pub fn guess_mime(filename: &str) -> String {
    mime_guess::from_path(Path::new(filename))
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_owned()
}
