use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use cutline::{
    CancelToken, DecoderPool, ExportOpts, ExportStatus, Exporter, FfmpegEncoder,
    FfmpegEncoderOpts, FfmpegOpener, FrameIndex,
};

#[derive(Parser, Debug)]
#[command(name = "cutline", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a summary of a project file.
    Info(InfoArgs),
    /// Render a single frame as a PNG.
    Frame(FrameArgs),
    /// Export a project to MP4 (requires `ffmpeg` on PATH).
    Export(ExportArgs),
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Input project JSON.
    #[arg(long = "in")]
    in_path: PathBuf,
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Input project JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Frame index (0-based).
    #[arg(long)]
    frame: u64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct ExportArgs {
    /// Input project JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// Overwrite output if it already exists.
    #[arg(long, default_value_t = true)]
    overwrite: bool,

    /// Enable frame-level parallelism.
    #[arg(long, default_value_t = false)]
    parallel: bool,

    /// Override worker threads (parallel mode only).
    #[arg(long)]
    threads: Option<usize>,

    /// Frames rendered per parallel chunk.
    #[arg(long, default_value_t = 64)]
    chunk_size: usize,

    /// Disable audio mixing for this export.
    #[arg(long, default_value_t = false)]
    no_audio: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Info(args) => cmd_info(args),
        Command::Frame(args) => cmd_frame(args),
        Command::Export(args) => cmd_export(args),
    }
}

fn cmd_info(args: InfoArgs) -> anyhow::Result<()> {
    let project = cutline::project::persist::load_project(&args.in_path)?;
    let timeline = &project.timeline;

    println!("project:  {}", project.name);
    println!(
        "output:   {}x{} @ {}/{} fps",
        timeline.output.width, timeline.output.height, timeline.output.fps.num,
        timeline.output.fps.den
    );
    println!(
        "duration: {:.3}s ({} frames)",
        timeline.duration_sec(),
        timeline.duration_frames()
    );
    println!("assets:   {}", project.assets.len());
    for track in timeline.tracks() {
        println!(
            "track:    {:?} '{}' with {} clip(s)",
            track.kind,
            track.name,
            track.clips().len()
        );
    }
    Ok(())
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let project = cutline::project::persist::load_project(&args.in_path)?;
    let pool = Arc::new(DecoderPool::new(Arc::new(FfmpegOpener)));
    let mut compositor = cutline::Compositor::new(pool);

    let out = compositor.composite_at(&project, FrameIndex(args.frame))?;
    for failure in &out.failures {
        eprintln!("warning: clip {}: {}", failure.clip.0, failure.error);
    }

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        &args.out,
        &out.frame.data,
        out.frame.width,
        out.frame.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_export(args: ExportArgs) -> anyhow::Result<()> {
    let project = cutline::project::persist::load_project(&args.in_path)?;
    let pool = Arc::new(DecoderPool::new(Arc::new(FfmpegOpener)));
    let exporter = Exporter::new(pool);

    let mut sink = FfmpegEncoder::new(FfmpegEncoderOpts {
        out_path: args.out.clone(),
        overwrite: args.overwrite,
        bg_rgba: [0, 0, 0, 255],
    });
    let opts = ExportOpts {
        parallel: args.parallel,
        threads: args.threads,
        chunk_size: args.chunk_size,
        channel_capacity: 4,
        enable_audio: !args.no_audio,
    };

    let report = exporter.export(&project, &mut sink, &opts, &CancelToken::new())?;
    for failure in &report.failures {
        eprintln!("warning: clip {}: {}", failure.clip.0, failure.error);
    }
    match report.status {
        ExportStatus::Completed => {
            eprintln!("wrote {} ({} frames)", args.out.display(), report.frames_written);
        }
        ExportStatus::Cancelled => {
            eprintln!("export cancelled; no output written");
        }
    }
    Ok(())
}
