use crate::constants::{SERVABLE_EXTENSIONS, SIGNATURE_SNIFF_BYTES};
use crate::error::{OptimizerError, Result, ValidationError};
use crate::formats;
use crate::models::SourceFile;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Checks an upload's declared name and size before it is staged.
///
/// Returns the normalized format tag taken from the filename.
pub fn validate_upload(source: &SourceFile, max_size: u64) -> Result<String> {
    if source.name.is_empty()
        || source.name.contains(['/', '\\', '\0'])
        || source.name == "."
        || source.name == ".."
    {
        return Err(ValidationError::BadFilename(source.name.clone()).into());
    }

    let tag = source
        .extension()
        .filter(|ext| formats::describe(ext).is_some())
        .ok_or_else(|| ValidationError::BadExtension(source.name.clone()))?;

    if source.size == 0 {
        return Err(ValidationError::EmptyFile.into());
    }
    if source.size > max_size {
        return Err(ValidationError::FileTooLarge(source.size, max_size).into());
    }

    Ok(tag)
}

/// Reads the first bytes of a file for signature checks.
pub fn read_head(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).map_err(|_| OptimizerError::FileNotFound(path.to_path_buf()))?;
    let mut head = Vec::with_capacity(SIGNATURE_SNIFF_BYTES);
    file.take(SIGNATURE_SNIFF_BYTES as u64).read_to_end(&mut head)?;
    Ok(head)
}

/// Compares the file's actual bytes with the markers of its declared format.
pub fn check_signature(path: &Path, format: &str) -> Result<()> {
    let head = read_head(path)?;
    if head.is_empty() {
        return Err(ValidationError::EmptyFile.into());
    }
    if !formats::signature_matches(format, &head) {
        return Err(ValidationError::SignatureMismatch(formats::normalize_tag(format)).into());
    }
    Ok(())
}

/// Validates a requested artifact name without touching the filesystem.
///
/// Only the last path segment is considered; it must consist of
/// `[A-Za-z0-9._-]` and end in a servable image extension.
pub fn sanitize_artifact_name(requested: &str) -> Result<String> {
    let basename = requested
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let bad = || OptimizerError::from(ValidationError::BadFilename(requested.to_string()));

    if basename.is_empty() || basename.starts_with('.') || basename.contains("..") {
        return Err(bad());
    }
    if !basename
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(bad());
    }

    let extension = formats::extension_of(Path::new(basename))
        .ok_or_else(|| ValidationError::BadExtension(basename.to_string()))?;
    if !SERVABLE_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ValidationError::BadExtension(basename.to_string()).into());
    }

    Ok(basename.to_string())
}
