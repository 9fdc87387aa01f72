mod extract;
mod ingest;
mod keyframe;
mod media;
mod plan;
mod utils;

#[cfg(test)]
mod test_support;

use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args as ClapArgs, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::extract::RunFlags;
use crate::keyframe::Manifest;
use crate::plan::{analyze_workflow, execute_plan, DryRunDriver, ReplayService, Screen};
use crate::utils::config::{self, Settings};

#[derive(Parser, Debug)]
#[command(author, version, about = "Keyframe extraction for screen recordings", long_about = None)]
struct Args {
    /// More log output (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file in KEY=VALUE form.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract keyframes from a video, or from every video under a directory.
    Extract(ExtractArgs),
    /// Turn an extraction manifest into a workflow plan using a recorded service reply.
    Plan(PlanArgs),
    /// Write a settings file with the default values.
    InitConfig {
        #[arg(default_value = ".env")]
        path: PathBuf,
    },
}

#[derive(ClapArgs, Debug)]
struct ExtractArgs {
    input: PathBuf,

    /// Output directory for keyframes and the manifest.
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Seconds between sampled frames.
    #[arg(long)]
    sample_rate: Option<f64>,

    /// Scene-change threshold, 0.0 to 1.0.
    #[arg(long)]
    threshold: Option<f64>,

    /// Smallest change that still keeps the final frame.
    #[arg(long)]
    epsilon: Option<f64>,

    #[arg(long)]
    max_width: Option<u32>,

    /// JPEG quality, 1 to 100.
    #[arg(long)]
    quality: Option<u8>,

    /// Decode, select and encode on separate threads.
    #[arg(long)]
    pipelined: bool,

    /// Delete keyframes from earlier runs in the output directory first.
    #[arg(long)]
    clean: bool,
}

impl ExtractArgs {
    fn apply_to(&self, settings: &mut Settings) {
        if let Some(out) = &self.out {
            settings.output_dir = out.clone();
        }
        if let Some(v) = self.sample_rate {
            settings.sample_rate = v;
        }
        if let Some(v) = self.threshold {
            settings.threshold = v;
        }
        if let Some(v) = self.epsilon {
            settings.epsilon = v;
        }
        if let Some(v) = self.max_width {
            settings.max_width = v;
        }
        if let Some(v) = self.quality {
            settings.jpeg_quality = v;
        }
    }
}

#[derive(ClapArgs, Debug)]
struct PlanArgs {
    /// keyframes.json written by `extract`.
    #[arg(short, long)]
    manifest: PathBuf,

    /// File holding the planning service's reply.
    #[arg(short, long)]
    response: PathBuf,

    /// Compile the plan for a WIDTHxHEIGHT screen and log the input events.
    #[arg(long, value_name = "WxH")]
    rehearse: Option<Screen>,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();
}

/// Exit status for an input that was rejected outright.
const EXIT_INVALID_INPUT: u8 = 2;

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Extract(extract_args) => run_extract(extract_args, args.config.as_deref()),
        Command::Plan(plan_args) => run_plan(plan_args).map(|()| ExitCode::SUCCESS),
        Command::InitConfig { path } => {
            config::save_to_env(&path, &Settings::default())?;
            info!(path = %path.display(), "wrote default settings");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn failure_label(err: &anyhow::Error) -> &'static str {
    if extract::is_invalid_input(err) {
        "input rejected"
    } else {
        "extraction failed"
    }
}

fn run_extract(args: ExtractArgs, config: Option<&Path>) -> Result<ExitCode> {
    let mut settings = Settings::load(config)?;
    args.apply_to(&mut settings);
    settings.validate()?;

    let flags = RunFlags {
        pipelined: args.pipelined,
        clean: args.clean,
        progress: std::io::stderr().is_terminal(),
    };

    if args.input.is_dir() {
        let outcomes =
            extract::extract_batch(&args.input, &settings.output_dir, &settings, flags)?;
        let total = outcomes.len();
        let mut failed = 0;
        for (video, outcome) in outcomes {
            match outcome {
                Ok(manifest) => print_summary(&manifest),
                Err(e) => {
                    failed += 1;
                    error!(video = %video.display(), "{}: {e:#}", failure_label(&e));
                }
            }
        }
        if failed > 0 {
            bail!("{failed} of {total} videos failed");
        }
        return Ok(ExitCode::SUCCESS);
    }

    match extract::extract_one(&args.input, &settings.output_dir, &settings, flags) {
        Ok(manifest) => {
            print_summary(&manifest);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if extract::is_invalid_input(&e) => {
            error!(input = %args.input.display(), "{}: {e:#}", failure_label(&e));
            Ok(ExitCode::from(EXIT_INVALID_INPUT))
        }
        Err(e) => Err(e),
    }
}

fn print_summary(manifest: &Manifest) {
    println!(
        "{}: {} keyframes from {} frames ({} sampled)",
        manifest.source.display(),
        manifest.keyframes.len(),
        manifest.frames_decoded,
        manifest.samples
    );
    for keyframe in &manifest.keyframes {
        println!("  {:>9.2}s  {}", keyframe.timestamp, keyframe.path.display());
    }
    if manifest.partial {
        warn!(
            source = %manifest.source.display(),
            error = manifest.decode_error.as_deref().unwrap_or("unknown"),
            "video could only be decoded partially"
        );
    }
}

fn run_plan(args: PlanArgs) -> Result<()> {
    let manifest = Manifest::load(&args.manifest)?;
    let service = ReplayService::new(&args.response);
    let analysis = analyze_workflow(&service, &manifest.keyframes)
        .with_context(|| format!("Failed to plan workflow from {:?}", args.manifest))?;

    for failure in analysis.failed_uploads() {
        if let Err(e) = &failure.result {
            warn!(path = %failure.path.display(), "keyframe skipped: {e}");
        }
    }
    println!("{}", serde_json::to_string_pretty(&analysis.steps)?);

    if let Some(screen) = args.rehearse {
        let mut driver = DryRunDriver::default();
        let steps = execute_plan(&analysis.steps, &screen, &mut driver)?;
        info!(steps, events = driver.events.len(), "rehearsal finished");
    }
    Ok(())
}
