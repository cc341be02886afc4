pub mod archive;
pub mod batch;
pub mod capabilities;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod constants;
pub mod encoders;
pub mod error;
pub mod formats;
pub mod info;
pub mod loader;
pub mod logger;
pub mod models;
pub mod processing;
pub mod retention;
pub mod server;
pub mod utils;
pub mod validation;

pub use archive::{build_archive, ArchiveEntry, BuiltArchive};
pub use batch::{collect_image_files, is_image_file, summarize, BatchProcessor};
pub use capabilities::{Backend, CapabilityDetector, FormatCapabilitySet, FormatSupport};
pub use cleanup::DeferredCleanup;
pub use config::ServiceConfig;
pub use error::{OptimizerError, Result, ValidationError};
pub use info::{capability_summary, image_info, suggestions, CapabilitySummary, ImageInfo};
pub use loader::{DecodedImage, SafeLoader};
pub use models::{
    BatchSummary, DerivedArtifact, DownloadLink, FileReport, Mode, ProcessingConfig,
    ProcessingRequest, ProcessingResponse, Savings, SourceFile,
};
pub use processing::{fit_dimensions, resize_image, thumbnail_image, SourceInfo, TranscodeEngine};
pub use retention::{PurgeReport, RetentionManager, StorageStats};
pub use server::{parse_range, ArtifactServer, Body, ByteRange};
