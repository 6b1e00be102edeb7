//! Key conventions: binary classification and content-type inference.
//!
//! Keys under the reserved binary-asset prefix are treated as binary
//! regardless of extension; everything else is classified by extension.
//! JSON keys bypass the CDN read-through path because they are the keys
//! most sensitive to read-after-write staleness.

/// Reserved prefix for binary assets (images, fonts, archives).
pub const BINARY_ASSET_PREFIX: &str = "assets/";

/// Whether a key should bypass the CDN path.
pub fn is_json_key(key: &str) -> bool {
    key.ends_with(".json")
}

/// Whether a key looks like a binary payload and is subject to the
/// memory-pressure read gate.
pub fn is_binary_key(key: &str) -> bool {
    if key.starts_with(BINARY_ASSET_PREFIX) {
        return true;
    }
    matches!(
        extension(key).as_deref(),
        Some(
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "avif" | "ico" | "pdf" | "zip" | "gz"
                | "woff" | "woff2" | "bin"
        )
    )
}

/// Infer the MIME content type from the key's extension.
pub fn content_type_for_key(key: &str) -> &'static str {
    match extension(key).as_deref() {
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("md") => "text/markdown; charset=utf-8",
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("xml") => "application/xml",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}

fn extension(key: &str) -> Option<String> {
    let name = key.rsplit('/').next().unwrap_or(key);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        // Dotfiles like `.keep` have no extension.
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

// -- Tests --------------------------------------------------------------------
