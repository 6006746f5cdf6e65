use std::path::Path;

/// Prefix marking a file as derived from an upload.
pub const PROCESSED_PREFIX: &str = "processed_";

/// Filesystem limit for a single path component, in bytes.
pub const MAX_FILENAME_LENGTH: usize = 255;

/// Extracts the file extension from a filename and converts it to lowercase.
pub fn get_file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

/// Normalizes an untrusted client filename into a safe storage key.
///
/// Directory components are dropped, whitespace runs become `_` and anything
/// outside `[A-Za-z0-9._-]` is removed. Leading and trailing dots/underscores
/// are trimmed so the result can never be `..` or a hidden file.
/// Returns `None` when nothing usable is left.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    // Both separators count: a Windows client may send `C:\Users\me\cat.png`.
    let basename = filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let cleaned: String = basename
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();

    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        return None;
    }

    Some(truncate_keeping_extension(trimmed, MAX_FILENAME_LENGTH))
}

/// Name of the derived file for a stored upload.
pub fn processed_name(stored_name: &str) -> String {
    format!("{}{}", PROCESSED_PREFIX, stored_name)
}

// Input is ASCII at this point, so byte slicing is safe.
fn truncate_keeping_extension(name: &str, max: usize) -> String {
    let max = max - PROCESSED_PREFIX.len();
    if name.len() <= max {
        return name.to_string();
    }
    match name.rfind('.') {
        Some(dot) if name.len() - dot < max => {
            let ext = &name[dot..];
            format!("{}{}", &name[..max - ext.len()], ext)
        }
        _ => name[..max].to_string(),
    }
}
