use crate::capabilities::FormatCapabilitySet;
use crate::constants::{DEFAULT_QUALITY, MAX_QUALITY, MIN_QUALITY};
use crate::error::{OptimizerError, Result};
use crate::formats;
use crate::utils::format_file_size;
use serde::{Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Optimize,
    Convert,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Optimize => write!(f, "optimize"),
            Mode::Convert => write!(f, "convert"),
        }
    }
}

impl FromStr for Mode {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "optimize" => Ok(Mode::Optimize),
            "convert" => Ok(Mode::Convert),
            other => Err(OptimizerError::InvalidRequest(format!(
                "Unknown processing mode: {}",
                other
            ))),
        }
    }
}

/// An uploaded file as handed over by the web layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Client supplied filename.
    pub name: String,
    pub size: u64,
    /// Where the raw bytes currently live.
    pub path: PathBuf,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, size: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            size,
            path: path.into(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let metadata =
            fs::metadata(path).map_err(|_| OptimizerError::FileNotFound(path.to_path_buf()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| OptimizerError::InvalidRequest(format!("{:?} has no filename", path)))?;
        Ok(Self::new(name, metadata.len(), path))
    }

    /// Declared format, taken from the client filename.
    pub fn extension(&self) -> Option<String> {
        formats::extension_of(Path::new(&self.name))
    }

    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingConfig {
    pub quality: u8,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    /// Convert-mode target formats.
    pub targets: Vec<String>,
    pub create_webp: bool,
    pub create_avif: bool,
    pub create_thumbnail: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            quality: DEFAULT_QUALITY,
            max_width: None,
            max_height: None,
            targets: Vec::new(),
            create_webp: false,
            create_avif: false,
            create_thumbnail: false,
        }
    }
}

impl ProcessingConfig {
    pub fn new(quality: Option<u8>) -> Result<Self> {
        let quality = quality.unwrap_or(DEFAULT_QUALITY);
        validate_quality(quality)?;
        Ok(Self {
            quality,
            ..Self::default()
        })
    }

    pub fn with_max_dimensions(mut self, max_width: Option<u32>, max_height: Option<u32>) -> Self {
        self.max_width = max_width.filter(|&w| w > 0);
        self.max_height = max_height.filter(|&h| h > 0);
        self
    }

    pub fn with_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.targets = targets
            .into_iter()
            .map(|t| formats::normalize_tag(t.as_ref()))
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    pub fn with_webp(mut self, enabled: bool) -> Self {
        self.create_webp = enabled;
        self
    }

    pub fn with_avif(mut self, enabled: bool) -> Self {
        self.create_avif = enabled;
        self
    }

    pub fn with_thumbnail(mut self, enabled: bool) -> Self {
        self.create_thumbnail = enabled;
        self
    }

    /// Requested targets the host can write, deduplicated in request order.
    pub fn resolved_targets(&self, caps: &FormatCapabilitySet) -> Vec<String> {
        let mut resolved: Vec<String> = Vec::new();
        for target in &self.targets {
            if caps.output_format(target).is_some() && !resolved.contains(target) {
                resolved.push(target.clone());
            }
        }
        resolved
    }
}

fn validate_quality(quality: u8) -> Result<()> {
    if !(MIN_QUALITY..=MAX_QUALITY).contains(&quality) {
        return Err(OptimizerError::InvalidQuality(quality, MIN_QUALITY, MAX_QUALITY));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ProcessingRequest {
    pub mode: Mode,
    pub files: Vec<SourceFile>,
    pub config: ProcessingConfig,
}

impl ProcessingRequest {
    pub fn new(mode: Mode, files: Vec<SourceFile>, config: ProcessingConfig) -> Self {
        Self {
            mode,
            files,
            config,
        }
    }

    /// Rejects requests that could never produce an artifact.
    pub fn validate(&self, caps: &FormatCapabilitySet) -> Result<()> {
        if self.files.is_empty() {
            return Err(OptimizerError::InvalidRequest("No files uploaded".to_string()));
        }
        validate_quality(self.config.quality)?;

        if self.mode == Mode::Convert {
            if self.config.targets.is_empty() {
                return Err(OptimizerError::InvalidRequest(
                    "No target formats specified for conversion".to_string(),
                ));
            }
            if self.config.resolved_targets(caps).is_empty() {
                return Err(OptimizerError::UnsupportedFormat(self.config.targets.join(", ")));
            }
        }
        Ok(())
    }
}

/// Size reduction of a derivative relative to its source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Savings {
    Percent(f64),
    /// Thumbnails are not comparable with their source.
    Thumbnail,
}

impl Savings {
    pub fn as_percent(&self) -> Option<f64> {
        match self {
            Savings::Percent(p) => Some(*p),
            Savings::Thumbnail => None,
        }
    }
}

impl fmt::Display for Savings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Savings::Percent(p) => write!(f, "{:.1}%", p),
            Savings::Thumbnail => write!(f, "thumbnail"),
        }
    }
}

impl Serialize for Savings {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Savings::Percent(p) => serializer.serialize_f64(*p),
            Savings::Thumbnail => serializer.serialize_str("thumbnail"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSuffix {
    Optimized,
    Converted,
    Thumb,
}

impl ArtifactSuffix {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactSuffix::Optimized => "optimized",
            ArtifactSuffix::Converted => "converted",
            ArtifactSuffix::Thumb => "thumb",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedArtifact {
    pub format: String,
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
    pub savings: Savings,
    pub is_conversion: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub original_name: String,
    pub original_size: u64,
    /// Decoded dimensions, zero when decoding never happened.
    pub width: u32,
    pub height: u32,
    pub success: bool,
    pub artifacts: Vec<DerivedArtifact>,
    pub errors: Vec<String>,
}

impl FileReport {
    pub fn succeeded(
        source: &SourceFile,
        dimensions: (u32, u32),
        artifacts: Vec<DerivedArtifact>,
    ) -> Self {
        Self {
            original_name: source.name.clone(),
            original_size: source.size,
            width: dimensions.0,
            height: dimensions.1,
            success: true,
            artifacts,
            errors: Vec::new(),
        }
    }

    pub fn failed(source: &SourceFile, error: impl ToString) -> Self {
        Self {
            original_name: source.name.clone(),
            original_size: source.size,
            width: 0,
            height: 0,
            success: false,
            artifacts: Vec::new(),
            errors: vec![error.to_string()],
        }
    }

    pub fn best_savings(&self) -> f64 {
        self.artifacts
            .iter()
            .filter_map(|a| a.savings.as_percent())
            .fold(0.0, f64::max)
    }

    pub fn conversions(&self) -> usize {
        self.artifacts.iter().filter(|a| a.is_conversion).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileErrors {
    pub name: String,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    pub total_original_size: u64,
    pub total_optimized_size: u64,
    pub total_original_size_human: String,
    pub total_optimized_size_human: String,
    /// Percentage, one decimal.
    pub total_savings: f64,
    /// Wall-clock seconds.
    pub processing_time: f64,
    pub files_with_errors: Vec<FileErrors>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub summary: BatchSummary,
    pub results: Vec<FileReport>,
}

/// What the UI receives for each derivative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadLink {
    pub format: String,
    pub filename: String,
    pub size: u64,
    pub size_human: String,
    pub savings: Savings,
    pub url: String,
    pub is_conversion: bool,
}

impl DownloadLink {
    pub fn from_artifact(artifact: &DerivedArtifact, url_prefix: &str) -> Self {
        Self {
            format: artifact.format.clone(),
            filename: artifact.filename.clone(),
            size: artifact.size,
            size_human: format_file_size(artifact.size),
            savings: artifact.savings,
            url: format!("{}{}", url_prefix, artifact.filename),
            is_conversion: artifact.is_conversion,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProcessingResponse {
    Single {
        original_name: String,
        original_size: u64,
        original_size_human: String,
        width: u32,
        height: u32,
        mode: Mode,
        results: Vec<DownloadLink>,
        best_savings: f64,
        conversions: usize,
    },
    Batch {
        summary: BatchSummary,
        results: Vec<FileReport>,
        download_links: Vec<DownloadLink>,
        /// Filenames to bundle, present when there is more than one artifact.
        batch_download: Option<Vec<String>>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{Backend, FormatSupport};

    fn caps() -> FormatCapabilitySet {
        FormatCapabilitySet::from_support([
            ("jpg", FormatSupport::new(Some(Backend::Native), Some(Backend::MozJpeg))),
            ("png", FormatSupport::read_write(Backend::Native)),
            ("svg", FormatSupport::new(Some(Backend::Resvg), None)),
        ])
    }

    fn one_file() -> Vec<SourceFile> {
        vec![SourceFile::new("a.jpg", 10, "/tmp/a.jpg")]
    }

    #[test]
    fn test_config_quality_bounds() {
        assert!(ProcessingConfig::new(Some(20)).is_ok());
        assert!(ProcessingConfig::new(Some(100)).is_ok());
        assert!(matches!(
            ProcessingConfig::new(Some(19)),
            Err(OptimizerError::InvalidQuality(19, 20, 100))
        ));
        assert_eq!(ProcessingConfig::new(None).unwrap().quality, 80);
    }

    #[test]
    fn test_convert_requires_resolvable_target() {
        let config = ProcessingConfig::default().with_targets(["heic", "svg"]);
        let request = ProcessingRequest::new(Mode::Convert, one_file(), config);
        assert!(matches!(
            request.validate(&caps()),
            Err(OptimizerError::UnsupportedFormat(_))
        ));

        let empty = ProcessingRequest::new(Mode::Convert, one_file(), ProcessingConfig::default());
        assert!(matches!(
            empty.validate(&caps()),
            Err(OptimizerError::InvalidRequest(_))
        ));

        let config = ProcessingConfig::default().with_targets(["heic", "PNG"]);
        let request = ProcessingRequest::new(Mode::Convert, one_file(), config);
        assert!(request.validate(&caps()).is_ok());
    }

    #[test]
    fn test_no_files_is_fatal() {
        let request = ProcessingRequest::new(Mode::Optimize, vec![], ProcessingConfig::default());
        assert!(matches!(
            request.validate(&caps()),
            Err(OptimizerError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_resolved_targets_dedup_in_order() {
        let config = ProcessingConfig::default().with_targets(["png", ".JPG", "png", "bmp"]);
        assert_eq!(config.resolved_targets(&caps()), vec!["png", "jpg"]);
    }

    #[test]
    fn test_savings_serialization() {
        assert_eq!(serde_json::to_string(&Savings::Percent(12.5)).unwrap(), "12.5");
        assert_eq!(
            serde_json::to_string(&Savings::Thumbnail).unwrap(),
            "\"thumbnail\""
        );
    }

    #[test]
    fn test_download_link_url() {
        let artifact = DerivedArtifact {
            format: "webp".into(),
            filename: "cat_abc_optimized.webp".into(),
            path: PathBuf::from("/srv/optimized/cat_abc_optimized.webp"),
            size: 1536,
            savings: Savings::Percent(40.0),
            is_conversion: false,
        };
        let link = DownloadLink::from_artifact(&artifact, "download?file=");
        assert_eq!(link.url, "download?file=cat_abc_optimized.webp");
        assert_eq!(link.size_human, "1.5 KB");
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("Convert".parse::<Mode>().unwrap(), Mode::Convert);
        assert!("shrink".parse::<Mode>().is_err());
    }
}
