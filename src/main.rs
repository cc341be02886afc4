use anyhow::{bail, Context, Result};
use clap::Parser;
use http::header::{HeaderMap, HeaderValue, IF_NONE_MATCH, RANGE};
use http::StatusCode;
use img_depot::cli::{Args, Commands, ProcessArgs};
use img_depot::{
    capability_summary, collect_image_files, image_info, logger, status, suggestions,
    ArtifactServer, BatchProcessor, DeferredCleanup, FormatCapabilitySet, Mode, ProcessingConfig,
    ProcessingRequest, ProcessingResponse, RetentionManager, ServiceConfig, SourceFile,
};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init(args.verbose, args.quiet);

    let mut config = ServiceConfig::from_env();
    if let Some(root) = &args.root {
        config = config.relocate(root);
    }

    match args.command {
        Commands::Optimize {
            process,
            max_width,
            max_height,
            webp,
            avif,
        } => {
            let processing = ProcessingConfig::new(Some(process.quality))?
                .with_max_dimensions(max_width, max_height)
                .with_webp(webp)
                .with_avif(avif)
                .with_thumbnail(process.thumbnail);
            run_processing(&config, Mode::Optimize, &process, processing)?;
        }
        Commands::Convert { process, targets } => {
            let processing = ProcessingConfig::new(Some(process.quality))?
                .with_targets(&targets)
                .with_thumbnail(process.thumbnail);
            run_processing(&config, Mode::Convert, &process, processing)?;
        }
        Commands::Formats { json } => show_formats(json)?,
        Commands::Info { input, json } => show_image_info(&input, json)?,
        Commands::Fetch {
            name,
            range,
            if_none_match,
            output,
        } => fetch(&config, &name, range, if_none_match, output)?,
        Commands::Bundle { names, output } => bundle(&config, &names, &output)?,
        Commands::Purge { hours } => {
            if let Some(hours) = hours {
                config = config.with_retention(Duration::from_secs(hours.saturating_mul(3600)));
            }
            let report = RetentionManager::new(&config).purge(config.retention)?;
            status!(
                "🧹 Removed {} files (uploads: {}, optimized: {}, temp: {})",
                report.total(),
                report.uploads,
                report.optimized,
                report.temp
            );
        }
        Commands::Stats { json } => {
            let stats = RetentionManager::new(&config).storage_stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                status!("📊 Storage:");
                for (label, dir) in [
                    ("uploads", &stats.uploads),
                    ("optimized", &stats.optimized),
                    ("temp", &stats.temp),
                    ("total", &stats.total),
                ] {
                    status!("  {:<10} {:>6} files  {}", label, dir.count, dir.size_human);
                }
            }
        }
    }

    Ok(())
}

fn run_processing(
    config: &ServiceConfig,
    mode: Mode,
    process: &ProcessArgs,
    processing: ProcessingConfig,
) -> Result<()> {
    config.ensure_directories()?;
    let caps = FormatCapabilitySet::detect();

    let mut files = Vec::new();
    for input in &process.inputs {
        for path in collect_image_files(input, process.recursive)? {
            files.push(SourceFile::from_path(&path)?);
        }
    }

    let request = ProcessingRequest::new(mode, files, processing);
    let show_progress = !process.json && !logger::is_quiet() && request.files.len() > 1;
    let response = BatchProcessor::new(&caps, config)
        .with_progress(show_progress)
        .process_request(&request)
        .context("Processing failed")?;

    if process.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

fn print_response(response: &ProcessingResponse) {
    match response {
        ProcessingResponse::Single {
            original_name,
            original_size_human,
            width,
            height,
            mode,
            results,
            best_savings,
            ..
        } => {
            status!(
                "✅ {} {} ({}x{}, {})",
                mode,
                original_name,
                width,
                height,
                original_size_human
            );
            for link in results {
                status!(
                    "  📦 {:<9} {:>10}  {:>8}  {}",
                    link.format,
                    link.size_human,
                    link.savings.to_string(),
                    link.filename
                );
            }
            status!("  🎯 Best savings: {:.1}%", best_savings);
        }
        ProcessingResponse::Batch {
            summary,
            download_links,
            ..
        } => {
            status!("\n📊 Batch Summary:");
            status!("  📁 Files: {}", summary.total_files);
            status!("  ✅ Successful: {}", summary.successful);
            status!("  📊 Original size: {}", summary.total_original_size_human);
            status!("  📊 Optimized size: {}", summary.total_optimized_size_human);
            status!("  🎯 Savings: {:.1}%", summary.total_savings);
            status!("  ⏱️  Time: {:.2}s", summary.processing_time);
            for link in download_links {
                status!("  📦 {}", link.filename);
            }
            if summary.failed > 0 {
                status!("  ⚠️  Failed files: {}", summary.failed);
                for failure in &summary.files_with_errors {
                    status!("    ❌ {}: {}", failure.name, failure.errors.join(", "));
                }
            }
        }
    }
}

fn show_formats(json: bool) -> Result<()> {
    let summary = capability_summary(&FormatCapabilitySet::detect());
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    status!("🎨 {} formats available", summary.total_supported);
    for (tag, detail) in &summary.details {
        let read = if detail.decoder.is_some() { "r" } else { "-" };
        let write = if detail.can_convert_to { "w" } else { "-" };
        status!(
            "  {:<5} {}{}  {:<9} {}",
            tag,
            read,
            write,
            detail.category,
            detail.description
        );
    }
    if !summary.external_programs.is_empty() {
        status!("🔧 External backends: {}", summary.external_programs.join(", "));
    }
    Ok(())
}

fn show_image_info(input: &Path, json: bool) -> Result<()> {
    let caps = FormatCapabilitySet::detect();
    let info = image_info(input, &caps)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    status!("📋 {}", info.path.display());
    status!("  📏 Dimensions: {}x{} pixels", info.width, info.height);
    status!("  📦 File size: {}", info.file_size_human);
    status!("  🎭 Format: {}", info.format);
    status!("  🎨 Color type: {}", info.color_type);
    status!("  🔢 Megapixels: {:.2} MP", info.megapixels);
    status!("  📐 Aspect ratio: {:.2}:1", info.aspect_ratio);
    status!("  💾 Decoded size: {:.2} MiB", info.estimated_memory_mib);
    status!("\n💡 Suggestions:");
    for hint in suggestions(&info, &caps) {
        status!("  {}", hint);
    }
    Ok(())
}

fn fetch(
    config: &ServiceConfig,
    name: &str,
    range: Option<String>,
    if_none_match: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut headers = HeaderMap::new();
    if let Some(range) = range {
        headers.insert(RANGE, HeaderValue::from_str(&range).context("Invalid range")?);
    }
    if let Some(etag) = if_none_match {
        headers.insert(IF_NONE_MATCH, HeaderValue::from_str(&etag).context("Invalid validator")?);
    }

    let cleanup = Arc::new(DeferredCleanup::new()?);
    let server = ArtifactServer::new(config, cleanup);
    let response = server.serve_single(name, &headers)?;

    match response.status() {
        StatusCode::NOT_MODIFIED => {
            status!("✅ Not modified");
            return Ok(());
        }
        StatusCode::RANGE_NOT_SATISFIABLE => {
            bail!("Range not satisfiable for {}", name);
        }
        _ => {}
    }

    let target = output.unwrap_or_else(|| PathBuf::from(name));
    let status_code = response.status();
    let etag = response
        .headers()
        .get(http::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let mut body = response.into_body();
    let mut file =
        File::create(&target).with_context(|| format!("Failed to create {:?}", target))?;
    let written = io::copy(&mut body, &mut file)?;
    status!(
        "📥 {} {} bytes → {} (ETag {})",
        status_code,
        written,
        target.display(),
        etag
    );
    Ok(())
}

fn bundle(config: &ServiceConfig, names: &[String], output: &Path) -> Result<()> {
    config.ensure_directories()?;
    let cleanup = Arc::new(DeferredCleanup::new()?);
    let server = ArtifactServer::new(config, Arc::clone(&cleanup));
    let response = server.serve_batch(names)?;

    let filename = img_depot::server::attachment_filename(response.headers())
        .unwrap_or_else(|| "bundle.tar.gz".to_string());
    let files = response
        .headers()
        .get("X-Batch-Files")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("0")
        .to_string();

    std::fs::create_dir_all(output)?;
    let target = output.join(&filename);
    let mut body = response.into_body();
    let mut file = File::create(&target)?;
    let written = io::copy(&mut body, &mut file)?;
    status!(
        "📦 Bundled {} files into {} ({} bytes)",
        files,
        target.display(),
        written
    );
    Ok(())
}
