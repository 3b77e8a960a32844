use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::atomic::AtomicBool,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "trackmotion", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render an MP4 video (requires `ffmpeg` on PATH).
    Render(RenderArgs),
    /// Render a numbered PNG image sequence.
    Frames(FramesArgs),
}

#[derive(Parser, Debug)]
struct RenderArgs {
    /// Input render job JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output MP4 path.
    #[arg(long)]
    out: PathBuf,

    /// Fail instead of overwriting an existing output file.
    #[arg(long)]
    no_overwrite: bool,
}

#[derive(Parser, Debug)]
struct FramesArgs {
    /// Input render job JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output directory for `frame_NNNNNN.png` files.
    #[arg(long)]
    out_dir: PathBuf,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Render(args) => cmd_render(args),
        Command::Frames(args) => cmd_frames(args),
    }
}

fn read_job_json(path: &Path) -> anyhow::Result<trackmotion::RenderJob> {
    let f = File::open(path).with_context(|| format!("open render job '{}'", path.display()))?;
    let r = BufReader::new(f);
    let job: trackmotion::RenderJob =
        serde_json::from_reader(r).with_context(|| "parse render job JSON")?;
    Ok(job)
}

fn run_job(job: &trackmotion::RenderJob, sink: &mut dyn trackmotion::FrameSink) -> anyhow::Result<()> {
    if job.config.map_tile_url.is_some() {
        tracing::warn!("map_tile_url is set but no tile provider is wired in; map layer skipped");
    }
    trackmotion::render_animation(
        job,
        None,
        sink,
        &mut trackmotion::LogProgress,
        &AtomicBool::new(false),
    )?;
    Ok(())
}

fn cmd_render(args: RenderArgs) -> anyhow::Result<()> {
    let job = read_job_json(&args.in_path)?;
    let mut sink = trackmotion::FfmpegSink::new(&args.out, job.config.background_color)
        .overwrite(!args.no_overwrite);
    run_job(&job, &mut sink)?;
    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_frames(args: FramesArgs) -> anyhow::Result<()> {
    let job = read_job_json(&args.in_path)?;
    let mut sink = trackmotion::PngSequenceSink::new(&args.out_dir);
    run_job(&job, &mut sink)?;
    eprintln!("wrote frames to {}", args.out_dir.display());
    Ok(())
}
