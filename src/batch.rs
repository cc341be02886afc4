use crate::capabilities::FormatCapabilitySet;
use crate::config::ServiceConfig;
use crate::constants::MAX_IMAGE_DIMENSION;
use crate::error::{OptimizerError, Result};
use crate::formats;
use crate::loader::SafeLoader;
use crate::models::{
    BatchReport, BatchSummary, DownloadLink, FileErrors, FileReport, Mode, ProcessingConfig,
    ProcessingRequest, ProcessingResponse, SourceFile,
};
use crate::processing::{SourceInfo, TranscodeEngine};
use crate::utils::{create_progress_bar, format_file_size, panic_message, round1};
use crate::validation;
use glob::glob;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// A copy of an upload in the uploads directory, removed when dropped.
///
/// Removal happens on every exit path, including unwinding.
struct StagedUpload {
    path: PathBuf,
    size: u64,
}

impl StagedUpload {
    fn stage(uploads_dir: &Path, source: &SourceFile, info: &SourceInfo) -> Result<Self> {
        fs::create_dir_all(uploads_dir)
            .map_err(|_| OptimizerError::DirectoryCreationFailed(uploads_dir.to_path_buf()))?;
        if !source.path.is_file() {
            return Err(OptimizerError::FileNotFound(source.path.clone()));
        }

        let path = uploads_dir.join(format!("{}_{}.{}", info.stem, info.unique_id, info.format));
        let size = fs::copy(&source.path, &path)?;
        debug!(path = %path.display(), size, "Staged upload");
        Ok(Self { path, size })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedUpload {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove staged upload");
        }
    }
}

/// Runs uploads through load and transcode, one file at a time.
pub struct BatchProcessor<'a> {
    caps: &'a FormatCapabilitySet,
    config: &'a ServiceConfig,
    show_progress: bool,
}

impl<'a> BatchProcessor<'a> {
    pub fn new(caps: &'a FormatCapabilitySet, config: &'a ServiceConfig) -> Self {
        Self {
            caps,
            config,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// validate → stage → load → transcode → unstage. Never fails; errors
    /// end up in the report.
    pub fn process_file(
        &self,
        source: &SourceFile,
        mode: Mode,
        config: &ProcessingConfig,
    ) -> FileReport {
        match self.try_process_file(source, mode, config) {
            Ok(report) => report,
            Err(e) => {
                warn!(file = %source.name, error = %e, "Processing failed");
                FileReport::failed(source, format!("Processing failed: {}", e))
            }
        }
    }

    fn try_process_file(
        &self,
        source: &SourceFile,
        mode: Mode,
        config: &ProcessingConfig,
    ) -> Result<FileReport> {
        let declared = validation::validate_upload(source, self.config.max_file_size)?;
        let mut info = SourceInfo::new(&source.name, &declared, source.size);

        let staged = StagedUpload::stage(&self.config.uploads_dir, source, &info)?;
        info.original_size = staged.size;

        let img = SafeLoader::new(self.caps)
            .with_limits(self.config.max_file_size, MAX_IMAGE_DIMENSION)
            .load(staged.path(), &declared)?;

        let engine = TranscodeEngine::new(self.caps, &self.config.optimized_dir);
        let artifacts = engine.transcode(&img, &info, mode, config);
        if artifacts.is_empty() {
            return Err(OptimizerError::encode(
                declared,
                "no derivative could be produced",
            ));
        }

        info!(
            file = %source.name,
            derivatives = artifacts.len(),
            "Processed upload"
        );
        Ok(FileReport {
            original_size: staged.size,
            ..FileReport::succeeded(source, img.dimensions(), artifacts)
        })
    }

    /// Processes every file in order. A failing or panicking file is
    /// recorded and the loop moves on.
    pub fn run_batch(
        &self,
        files: &[SourceFile],
        mode: Mode,
        config: &ProcessingConfig,
    ) -> BatchReport {
        let start_time = Instant::now();
        let progress = self
            .show_progress
            .then(|| create_progress_bar(files.len() as u64));

        let mut results = Vec::with_capacity(files.len());
        let mut batch_bytes = 0u64;

        for source in files {
            if let Some(pb) = &progress {
                pb.set_message(source.name.clone());
            }

            batch_bytes = batch_bytes.saturating_add(source.size);
            let report = if batch_bytes > self.config.max_batch_size {
                FileReport::failed(
                    source,
                    OptimizerError::Capacity(batch_bytes, self.config.max_batch_size),
                )
            } else {
                panic::catch_unwind(AssertUnwindSafe(|| {
                    self.process_file(source, mode, config)
                }))
                .unwrap_or_else(|payload| {
                    let message = panic_message(payload);
                    warn!(file = %source.name, error = %message, "Processing panicked");
                    FileReport::failed(source, format!("Unexpected error: {}", message))
                })
            };
            results.push(report);

            if let Some(pb) = &progress {
                pb.inc(1);
            }
        }

        if let Some(pb) = progress {
            pb.finish_with_message("done");
        }

        let summary = summarize(&results, start_time.elapsed());
        info!(
            total = summary.total_files,
            successful = summary.successful,
            failed = summary.failed,
            savings = summary.total_savings,
            "Batch complete"
        );
        BatchReport { summary, results }
    }

    /// Entry point for the web layer: one structured response per request.
    pub fn process_request(&self, request: &ProcessingRequest) -> Result<ProcessingResponse> {
        request.validate(self.caps)?;
        let prefix = &self.config.download_prefix;

        if let [source] = request.files.as_slice() {
            let report = self.try_process_file(source, request.mode, &request.config)?;
            let results = report
                .artifacts
                .iter()
                .map(|a| DownloadLink::from_artifact(a, prefix))
                .collect();
            return Ok(ProcessingResponse::Single {
                original_name: report.original_name.clone(),
                original_size: report.original_size,
                original_size_human: format_file_size(report.original_size),
                width: report.width,
                height: report.height,
                mode: request.mode,
                results,
                best_savings: report.best_savings(),
                conversions: report.conversions(),
            });
        }

        let BatchReport { summary, results } =
            self.run_batch(&request.files, request.mode, &request.config);
        let download_links: Vec<DownloadLink> = results
            .iter()
            .flat_map(|r| r.artifacts.iter())
            .map(|a| DownloadLink::from_artifact(a, prefix))
            .collect();
        let batch_download = (download_links.len() > 1)
            .then(|| download_links.iter().map(|l| l.filename.clone()).collect());

        Ok(ProcessingResponse::Batch {
            summary,
            results,
            download_links,
            batch_download,
        })
    }
}

/// Aggregates per-file reports.
///
/// Sizes only count successful files, and the optimized sum takes each
/// file's first derivative.
pub fn summarize(results: &[FileReport], elapsed: Duration) -> BatchSummary {
    let mut successful = 0;
    let mut total_original_size = 0u64;
    let mut total_optimized_size = 0u64;
    let mut files_with_errors = Vec::new();

    for report in results {
        if report.success {
            successful += 1;
            total_original_size += report.original_size;
            total_optimized_size += report.artifacts.first().map_or(0, |a| a.size);
        } else {
            files_with_errors.push(FileErrors {
                name: report.original_name.clone(),
                errors: report.errors.clone(),
            });
        }
    }

    let total_savings = if total_original_size > 0 {
        round1(
            (total_original_size as f64 - total_optimized_size as f64)
                / total_original_size as f64
                * 100.0,
        )
    } else {
        0.0
    };

    BatchSummary {
        total_files: results.len(),
        successful,
        failed: results.len() - successful,
        total_original_size,
        total_optimized_size,
        total_original_size_human: format_file_size(total_original_size),
        total_optimized_size_human: format_file_size(total_optimized_size),
        total_savings,
        processing_time: (elapsed.as_secs_f64() * 100.0).round() / 100.0,
        files_with_errors,
    }
}

/// Expands a file, directory or glob pattern into image paths.
pub fn collect_image_files(input: &str, recursive: bool) -> Result<Vec<PathBuf>> {
    let mut image_files = Vec::new();
    let input_path = Path::new(input);

    if input_path.is_file() {
        image_files.push(input_path.canonicalize()?);
    } else if input_path.is_dir() {
        let walker = if recursive {
            WalkDir::new(input_path)
        } else {
            WalkDir::new(input_path).max_depth(1)
        };

        for entry in walker
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() && is_image_file(path) {
                if let Ok(canonical_path) = path.canonicalize() {
                    image_files.push(canonical_path);
                }
            }
        }
    } else if let Ok(pattern) = glob(input) {
        for entry in pattern.flatten() {
            if entry.is_file() && is_image_file(&entry) {
                if let Ok(canonical_path) = entry.canonicalize() {
                    image_files.push(canonical_path);
                }
            }
        }
    }

    if image_files.is_empty() {
        return Err(OptimizerError::InvalidRequest(format!(
            "No image files found in {}",
            input
        )));
    }
    image_files.sort();
    Ok(image_files)
}

/// Whether the extension names a format the registry knows.
pub fn is_image_file(path: &Path) -> bool {
    formats::extension_of(path)
        .map(|ext| formats::describe(&ext).is_some())
        .unwrap_or(false)
}
