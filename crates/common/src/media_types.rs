//! File extension to media type resolution

/// Media type reported when an extension is unknown
pub const DEFAULT_MEDIA_TYPE: &str = "application/octet-stream";

const MEDIA_TYPES: &[(&str, &str)] = &[
    // Images
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("bmp", "image/bmp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("webp", "image/webp"),
    ("psd", "image/vnd.adobe.photoshop"),
    ("exr", "image/x-exr"),
    ("dpx", "image/x-dpx"),
    // Video
    ("mp4", "video/mp4"),
    ("m4v", "video/x-m4v"),
    ("mov", "video/quicktime"),
    ("mpg", "video/mpeg"),
    ("mpeg", "video/mpeg"),
    ("webm", "video/webm"),
    ("ogv", "video/ogg"),
    ("avi", "video/x-msvideo"),
    ("mxf", "application/mxf"),
    ("mkv", "video/x-matroska"),
    // Audio
    ("wav", "audio/wav"),
    ("flac", "audio/flac"),
    ("mp3", "audio/mpeg"),
    ("m4a", "audio/mp4"),
    ("ogg", "audio/ogg"),
    ("aac", "audio/aac"),
    // Documents
    ("pdf", "application/pdf"),
    ("json", "application/json"),
    ("txt", "text/plain"),
];

/// Lower-cased extension of a file name, path or URI (without the dot)
pub fn extension_of(name: &str) -> Option<String> {
    let name = name.split(['?', '#']).next().unwrap_or(name);
    let file_name = name.rsplit('/').next().unwrap_or(name);
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Media type for a file name, path or URI
pub fn media_type_for(name: &str) -> &'static str {
    extension_of(name)
        .and_then(|ext| {
            MEDIA_TYPES
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, media_type)| *media_type)
        })
        .unwrap_or(DEFAULT_MEDIA_TYPE)
}

/// Top-level class of a media type ("image", "video", "audio"), if any
pub fn media_class(media_type: &str) -> Option<&str> {
    match media_type.split_once('/') {
        Some((class @ ("image" | "video" | "audio"), _)) => Some(class),
        _ => None,
    }
}
