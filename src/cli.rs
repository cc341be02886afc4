use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "img-depot",
    about = "Image optimization and conversion with a retention-managed artifact store",
    long_about = "img-depot re-encodes images at reduced size, converts them between formats \
                  and keeps the derived artifacts in a flat store from which they can be fetched \
                  singly (with range and cache validation support) or bundled into an archive. \
                  Formats beyond the compiled-in codecs are enabled when ImageMagick, pdftoppm, \
                  heif-convert or dcraw are found on PATH.",
    version,
    after_help = "EXAMPLES:\n  \
    img-depot optimize photo.jpg -q 75 --max-width 1920 --webp\n  \
    img-depot convert \"./shots/*.png\" --to webp,avif --thumbnail\n  \
    img-depot fetch photo_66f1c2a9b3d4e_optimized.jpg --range bytes=0-1023\n  \
    img-depot purge --hours 24"
)]
pub struct Args {
    #[arg(
        long,
        global = true,
        help = "Storage root holding uploads/, optimized/ and temp/",
        long_help = "Directory under which the uploads, optimized and temp directories live. \
                     Defaults to IMG_DEPOT_ROOT or the current directory."
    )]
    pub root: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Show debug logging")]
    pub verbose: bool,

    #[arg(short = 'Q', long, global = true, help = "Only print errors")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by the optimize and convert commands.
#[derive(ClapArgs, Debug, Clone)]
pub struct ProcessArgs {
    #[arg(
        required = true,
        help = "Input files, directories or glob patterns",
        long_help = "Each input can be a file, a directory or a glob expression. \
                     Examples: './images', '*.jpg', '/path/to/images/*.png'"
    )]
    pub inputs: Vec<String>,

    #[arg(
        short = 'q',
        long,
        default_value_t = 80,
        value_parser = clap::value_parser!(u8).range(20..=100),
        help = "Quality (20-100)"
    )]
    pub quality: u8,

    #[arg(long, help = "Also write a 300x300 JPEG thumbnail")]
    pub thumbnail: bool,

    #[arg(short = 'r', long, help = "Recurse into subdirectories")]
    pub recursive: bool,

    #[arg(long, help = "Print the response as JSON")]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(
        about = "Re-encode images in their own format at reduced size",
        long_about = "Re-encode each image in its source format, optionally resized to fit the \
                      given bounds, with optional WebP and AVIF siblings."
    )]
    Optimize {
        #[command(flatten)]
        process: ProcessArgs,

        #[arg(
            short = 'w',
            long,
            value_parser = clap::value_parser!(u32).range(100..=8000),
            help = "Maximum width in pixels",
            long_help = "Shrink to at most this width, keeping the aspect ratio. \
                         Images are never enlarged."
        )]
        max_width: Option<u32>,

        #[arg(
            short = 'H',
            long,
            value_parser = clap::value_parser!(u32).range(100..=8000),
            help = "Maximum height in pixels"
        )]
        max_height: Option<u32>,

        #[arg(long, help = "Also write a WebP derivative")]
        webp: bool,

        #[arg(long, help = "Also write an AVIF derivative when the host can encode it")]
        avif: bool,
    },

    #[command(
        about = "Convert images into one or more target formats",
        long_about = "Write one derivative per target format. Targets the host cannot encode \
                      are skipped; an icon target without an icon encoder is written as PNG."
    )]
    Convert {
        #[command(flatten)]
        process: ProcessArgs,

        #[arg(
            short = 't',
            long = "to",
            required = true,
            value_delimiter = ',',
            help = "Target formats, comma separated (e.g. webp,png,ico)"
        )]
        targets: Vec<String>,
    },

    #[command(about = "List the formats this host can read and write")]
    Formats {
        #[arg(long, help = "Print as JSON")]
        json: bool,
    },

    #[command(about = "Display image information and processing hints")]
    Info {
        #[arg(help = "Image file path to analyze")]
        input: PathBuf,

        #[arg(long, help = "Print as JSON")]
        json: bool,
    },

    #[command(about = "Fetch a stored artifact by name")]
    Fetch {
        #[arg(help = "Artifact filename")]
        name: String,

        #[arg(long, help = "Range header value, e.g. bytes=0-1023")]
        range: Option<String>,

        #[arg(long, help = "If-None-Match validator")]
        if_none_match: Option<String>,

        #[arg(short = 'o', long, help = "Output file (defaults to the artifact name)")]
        output: Option<PathBuf>,
    },

    #[command(about = "Bundle stored artifacts into a tar.gz archive")]
    Bundle {
        #[arg(required = true, help = "Artifact filenames")]
        names: Vec<String>,

        #[arg(short = 'o', long, help = "Output directory", default_value = ".")]
        output: PathBuf,
    },

    #[command(about = "Delete stored files older than the retention window")]
    Purge {
        #[arg(long, help = "Retention window in hours (default: configured, 24)")]
        hours: Option<u64>,
    },

    #[command(about = "Show file counts and sizes per storage directory")]
    Stats {
        #[arg(long, help = "Print as JSON")]
        json: bool,
    },
}
