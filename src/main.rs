use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{info, warn};
use parallel_fragments::config::available_cores;
use parallel_fragments::{
    hash_file, CodecKind, Pipeline, PipelineConfig, PipelineStats, DEFAULT_BLOCK_SIZE,
    DEFAULT_POOL_COEFFICIENT,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

const EXTENSION: &str = "frag";

#[derive(Parser, Debug)]
#[command(author, version, about = "Parallel block compressor with bounded memory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compress a file into length-prefixed blocks
    Compress {
        /// Input file
        input: PathBuf,

        /// Output file (defaults to the input with .frag appended)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        run: RunArgs,

        /// Block size in KiB
        #[arg(short, long, default_value_t = (DEFAULT_BLOCK_SIZE / 1024) as u32)]
        block_size: u32,

        /// Block codec
        #[arg(long, default_value_t = CodecKind::Zstd)]
        codec: CodecKind,

        /// Compression level (zstd 1-22, bzip2 1-9)
        #[arg(short = 'z', long, default_value_t = 3)]
        level: i32,
    },
    /// Restore a file written by `compress`
    Decompress {
        /// Input file
        input: PathBuf,

        /// Output file (defaults to the input without .frag, or with .out appended)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },
    /// Print the xxh3-64 digest of each file
    Hash {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Worker threads (default = available cores)
    #[arg(short = 'j', long)]
    jobs: Option<usize>,

    /// Fragments per worker in the buffer ring
    #[arg(long, default_value_t = DEFAULT_POOL_COEFFICIENT)]
    pool_coefficient: usize,

    /// Keep the output file when the run fails
    #[arg(long)]
    keep_partial: bool,

    /// Do not draw a progress bar
    #[arg(long)]
    no_progress: bool,
}

impl RunArgs {
    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            workers: self.jobs.unwrap_or_else(available_cores),
            pool_coefficient: self.pool_coefficient,
            ..PipelineConfig::default()
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Compress {
            input,
            output,
            run,
            block_size,
            codec,
            level,
        } => {
            let output = output.unwrap_or_else(|| compressed_name(&input));
            let config = PipelineConfig {
                block_size: block_size as usize * 1024,
                codec,
                level,
                ..run.config()
            };
            let total = fs::metadata(&input)
                .with_context(|| format!("Failed to stat {}", input.display()))?
                .len();
            let pipeline = attach_progress(Pipeline::new(config), &run, total);
            execute(&run, &output, || pipeline.compress_file(&input, &output))
        }
        Command::Decompress { input, output, run } => {
            let output = output.unwrap_or_else(|| decompressed_name(&input));
            let total = fs::metadata(&input)
                .with_context(|| format!("Failed to stat {}", input.display()))?
                .len();
            let pipeline = attach_progress(Pipeline::new(run.config()), &run, total);
            execute(&run, &output, || pipeline.decompress_file(&input, &output))
        }
        Command::Hash { files } => {
            for path in files {
                let digest = hash_file(&path)
                    .with_context(|| format!("Failed to hash {}", path.display()))?;
                println!("{digest:016x}  {}", path.display());
            }
            Ok(())
        }
    }
}

fn attach_progress(pipeline: Pipeline, run: &RunArgs, total: u64) -> Pipeline {
    if run.no_progress {
        return pipeline;
    }
    let pb = ProgressBar::new(total);
    pb.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
    ) {
        pb.set_style(style);
    }
    pipeline.with_progress(pb)
}

/// Runs one pipeline, removing the output if it fails part way.
fn execute<F>(run: &RunArgs, output: &Path, job: F) -> Result<()>
where
    F: FnOnce() -> parallel_fragments::Result<PipelineStats>,
{
    let existed = output.exists();
    let start = Instant::now();
    match job() {
        Ok(stats) => {
            let elapsed = start.elapsed();
            let mb = stats.bytes_in as f64 / 1024.0 / 1024.0;
            info!(
                "{} -> {} bytes in {:.2?} ({:.2} MB/s, peak {} of {} fragments)",
                stats.bytes_in,
                stats.bytes_out,
                elapsed,
                mb / elapsed.as_secs_f64().max(f64::EPSILON),
                stats.peak_loaded_fragments,
                stats.pool_size
            );
            Ok(())
        }
        Err(e) => {
            if !existed && !run.keep_partial && output.exists() {
                match fs::remove_file(output) {
                    Ok(()) => warn!("removed partial output {}", output.display()),
                    Err(rm) => warn!("could not remove {}: {rm}", output.display()),
                }
            }
            Err(e).with_context(|| format!("Failed to write {}", output.display()))
        }
    }
}

fn compressed_name(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".");
    name.push(EXTENSION);
    PathBuf::from(name)
}

fn decompressed_name(input: &Path) -> PathBuf {
    if input.extension().is_some_and(|ext| ext == EXTENSION) {
        input.with_extension("")
    } else {
        let mut name = input.as_os_str().to_owned();
        name.push(".out");
        PathBuf::from(name)
    }
}
