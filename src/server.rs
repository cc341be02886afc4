use crate::archive::{self, ArchiveEntry};
use crate::cleanup::DeferredCleanup;
use crate::config::ServiceConfig;
use crate::constants::{ARTIFACT_MAX_AGE_SECS, NOT_MODIFIED_CACHE_CONTROL};
use crate::error::{OptimizerError, Result};
use crate::formats;
use crate::validation;
use chrono::{DateTime, Duration as ChronoDuration, Local, Utc};
use http::header::{
    HeaderMap, HeaderValue, ACCEPT_RANGES, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH,
    CONTENT_RANGE, CONTENT_TYPE, ETAG, EXPIRES, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED,
    PRAGMA, RANGE, X_CONTENT_TYPE_OPTIONS,
};
use http::{Response, StatusCode};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Take};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Response payload, read lazily.
#[derive(Debug)]
pub enum Body {
    Empty,
    Bytes(Cursor<Vec<u8>>),
    File(Take<File>),
}

impl Body {
    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    pub fn into_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Body::Empty => Ok(0),
            Body::Bytes(cursor) => cursor.read(buf),
            Body::File(file) => file.read(buf),
        }
    }
}

/// Outcome of matching a `Range` header against a file size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// No usable range; send the whole file.
    Full,
    /// Inclusive bounds.
    Partial(u64, u64),
    Unsatisfiable,
}

/// Parses `bytes=start-[end]`. Only the first range of a list is honored
/// and anything that does not fit that shape falls back to the full file.
pub fn parse_range(header: &str, size: u64) -> ByteRange {
    let Some(ranges) = header.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    let first = ranges.split(',').next().unwrap_or_default().trim();
    let Some((start, end)) = first.split_once('-') else {
        return ByteRange::Full;
    };
    let Ok(start) = start.trim().parse::<u64>() else {
        return ByteRange::Full;
    };
    let end = match end.trim() {
        "" => size.saturating_sub(1),
        value => match value.parse::<u64>() {
            Ok(end) => end,
            Err(_) => return ByteRange::Full,
        },
    };

    if start > end || start >= size || end >= size {
        ByteRange::Unsatisfiable
    } else {
        ByteRange::Partial(start, end)
    }
}

/// Strong validator: the quoted SHA-256 of the file contents.
pub fn compute_etag(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("\"{}\"", hex::encode(hasher.finalize())))
}

fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(HTTP_DATE_FORMAT).to_string()
}

fn unix_secs(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn header_str<'h>(headers: &'h HeaderMap, name: http::header::HeaderName) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Whether the client's cached copy is still current.
fn is_not_modified(headers: &HeaderMap, etag: &str, modified: SystemTime) -> bool {
    // If-Modified-Since only applies without If-None-Match (RFC 7232 §6)
    if let Some(candidates) = header_str(headers, IF_NONE_MATCH) {
        return candidates
            .split(',')
            .map(str::trim)
            .any(|c| c == etag || c == "*");
    }
    if let Some(since) = header_str(headers, IF_MODIFIED_SINCE) {
        if let Ok(since) = DateTime::parse_from_rfc2822(since.trim()) {
            return since.timestamp() >= unix_secs(modified);
        }
    }
    false
}

/// Filename from an `attachment; filename="..."` disposition header.
pub fn attachment_filename(headers: &HeaderMap) -> Option<String> {
    let value = header_str(headers, CONTENT_DISPOSITION)?;
    let (_, rest) = value.split_once("filename=")?;
    let name = rest.trim().trim_matches('"');
    (!name.is_empty()).then(|| name.to_string())
}

/// Maps an error onto the response the download endpoint sends.
pub fn error_response(error: &OptimizerError) -> Response<Body> {
    let status = error.status_code();
    let mut response = match error {
        OptimizerError::RangeNotSatisfiable(_) => Response::new(Body::Empty),
        other => {
            let message = format!("Download error: {}", other).into_bytes();
            let mut response = Response::new(Body::Bytes(Cursor::new(message)));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            response
        }
    };
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));

    if let OptimizerError::RangeNotSatisfiable(size) = error {
        if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
            response.headers_mut().insert(CONTENT_RANGE, value);
        }
    }
    response
}

/// Hands out derived artifacts from the optimized directory.
pub struct ArtifactServer {
    optimized_dir: PathBuf,
    temp_dir: PathBuf,
    retention: Duration,
    max_archive_size: u64,
    cleanup_delay: Duration,
    cleanup: Arc<DeferredCleanup>,
}

impl ArtifactServer {
    pub fn new(config: &ServiceConfig, cleanup: Arc<DeferredCleanup>) -> Self {
        Self {
            optimized_dir: config.optimized_dir.clone(),
            temp_dir: config.temp_dir.clone(),
            retention: config.retention,
            max_archive_size: config.max_archive_size,
            cleanup_delay: config.archive_cleanup_delay,
            cleanup,
        }
    }

    /// Sanitizes the name and resolves it inside the optimized directory,
    /// refusing anything past the retention window.
    fn locate(&self, requested: &str) -> Result<(String, PathBuf, fs::Metadata)> {
        let filename = validation::sanitize_artifact_name(requested)?;
        let path = self.optimized_dir.join(&filename);
        if !path.is_file() {
            return Err(OptimizerError::NotFound(filename));
        }

        let real_path = path.canonicalize()?;
        let real_root = self.optimized_dir.canonicalize()?;
        if !real_path.starts_with(&real_root) {
            warn!(requested, path = %real_path.display(), "Artifact outside the optimized directory");
            return Err(OptimizerError::AccessDenied(filename));
        }

        let metadata = fs::metadata(&real_path)?;
        let age = SystemTime::now()
            .duration_since(metadata.modified()?)
            .unwrap_or_default();
        if age > self.retention {
            return Err(OptimizerError::Expired(filename));
        }
        Ok((filename, real_path, metadata))
    }

    pub fn serve_single(&self, requested: &str, headers: &HeaderMap) -> Result<Response<Body>> {
        let (filename, path, metadata) = self.locate(requested)?;
        let size = metadata.len();
        let modified = metadata.modified()?;
        let etag = compute_etag(&path)?;

        if is_not_modified(headers, &etag, modified) {
            debug!(file = %filename, "Not modified");
            return Ok(Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .header(CACHE_CONTROL, NOT_MODIFIED_CACHE_CONTROL)
                .header(ETAG, etag.as_str())
                .body(Body::Empty)?);
        }

        let range = header_str(headers, RANGE)
            .map(|value| parse_range(value, size))
            .unwrap_or(ByteRange::Full);
        if range == ByteRange::Unsatisfiable {
            debug!(file = %filename, size, "Unsatisfiable range");
            return Ok(error_response(&OptimizerError::RangeNotSatisfiable(size)));
        }

        let extension = formats::extension_of(&path).unwrap_or_default();
        let builder = Response::builder()
            .header(CONTENT_TYPE, formats::mime_for_extension(&extension))
            .header(
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            )
            .header(X_CONTENT_TYPE_OPTIONS, "nosniff")
            .header(CACHE_CONTROL, format!("public, max-age={}", ARTIFACT_MAX_AGE_SECS))
            .header(ETAG, etag.as_str())
            .header(LAST_MODIFIED, http_date(modified))
            .header("X-Image-Optimized", "true")
            .header(ACCEPT_RANGES, "bytes");

        let mut file = File::open(&path)?;
        let response = match range {
            ByteRange::Partial(start, end) => {
                let length = end - start + 1;
                file.seek(SeekFrom::Start(start))?;
                info!(file = %filename, start, end, "Serving partial artifact");
                builder
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, size))
                    .header(CONTENT_LENGTH, length)
                    .body(Body::File(file.take(length)))?
            }
            _ => {
                info!(file = %filename, size, "Serving artifact");
                builder
                    .status(StatusCode::OK)
                    .header(CONTENT_LENGTH, size)
                    .body(Body::File(file.take(size)))?
            }
        };
        Ok(response)
    }

    /// Bundles the requested artifacts into a temporary archive that is
    /// deleted shortly after being handed out.
    pub fn serve_batch(&self, requested: &[String]) -> Result<Response<Body>> {
        let mut entries = Vec::new();
        let mut seen = HashSet::new();
        for name in requested {
            match self.locate(name) {
                Ok((filename, _, _)) if seen.contains(&filename) => {
                    debug!(requested = %name, "Skipping duplicate batch entry");
                }
                Ok((filename, path, metadata)) => {
                    seen.insert(filename.clone());
                    entries.push(ArchiveEntry {
                        filename,
                        path,
                        size: metadata.len(),
                    });
                }
                Err(e) => debug!(requested = %name, error = %e, "Skipping batch entry"),
            }
        }

        if entries.is_empty() {
            return Err(OptimizerError::NotFound("No valid files found".to_string()));
        }
        let total: u64 = entries.iter().map(|e| e.size).sum();
        if total > self.max_archive_size {
            return Err(OptimizerError::Capacity(total, self.max_archive_size));
        }

        let built = archive::build_archive(&entries, &self.temp_dir, Local::now())?;
        let file = File::open(&built.path)?;
        self.cleanup.schedule(&built.path, self.cleanup_delay);
        info!(
            archive = %built.filename,
            files = built.file_count,
            size = built.size,
            "Serving batch archive"
        );

        let expires = Utc::now() + ChronoDuration::seconds(ARTIFACT_MAX_AGE_SECS as i64);
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/gzip")
            .header(
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", built.filename),
            )
            .header(CONTENT_LENGTH, built.size)
            .header(CACHE_CONTROL, format!("private, max-age={}", ARTIFACT_MAX_AGE_SECS))
            .header(PRAGMA, "private")
            .header(EXPIRES, expires.format(HTTP_DATE_FORMAT).to_string())
            .header("X-Batch-Files", built.file_count)
            .header("X-Compression-Ratio", format!("{}%", built.compression_ratio()))
            .body(Body::File(file.take(built.size)))?)
    }
}
