//! Microgrid simulator CLI.
//!
//! This binary provides a single entry point for simulation runs. It performs:
//! 1. **Configuration:** Loads a JSON config file, or uses the built-in defaults.
//! 2. **Images:** Places raw memory images at given addresses before the run.
//! 3. **Run:** Spawns the configured workload, simulates until idle, prints statistics.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mgsim_core::config::Config;
use mgsim_core::sim::{StopReason, loader};
use mgsim_core::{SimResult, Simulator};

#[derive(Parser, Debug)]
#[command(
    name = "mgsim",
    author,
    version,
    about = "Cycle-accurate microgrid simulator",
    long_about = "Run a built-in workload on a grid of multithreaded cores sharing a flat or \
                  token-coherent (COMA) memory.\n\nLogging is controlled by RUST_LOG.\n\n\
                  Examples:\n  mgsim run\n  mgsim run --config coma.json --max-cycles 100000\n  \
                  mgsim run --image data.bin@0x1000 --stats pipeline,ring"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the configured workload.
    Run {
        /// JSON configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Raw memory image to load first, as FILE@ADDR. May be repeated.
        #[arg(short, long = "image", value_name = "FILE@ADDR")]
        images: Vec<String>,

        /// Cycle limit; overrides `general.max_cycles`.
        #[arg(long)]
        max_cycles: Option<u64>,

        /// Statistics sections to print (summary, pipeline, threads, memory, ring).
        #[arg(long, value_delimiter = ',')]
        stats: Vec<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run {
            config,
            images,
            max_cycles,
            stats,
        } => cmd_run(config, &images, max_cycles, &stats),
    };
    if let Err(e) = result {
        eprintln!("\n[!] FATAL: {e}");
        process::exit(1);
    }
}

/// Builds the simulator, loads images, runs the workload and prints statistics.
///
/// Exits with status 2 if the cycle limit was reached before the grid went idle.
fn cmd_run(
    config_path: Option<PathBuf>,
    images: &[String],
    max_cycles: Option<u64>,
    sections: &[String],
) -> SimResult<()> {
    let config = match &config_path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let limit = max_cycles.unwrap_or(config.general.max_cycles);

    println!(
        "Configuration: {}",
        config_path
            .as_ref()
            .map_or_else(|| "default".to_owned(), |p| p.display().to_string())
    );
    println!(
        "  Memory: {:?} ({} KiB, {}-byte lines)  Cores: {} x {} threads  Workload: {:?}",
        config.memory.kind,
        config.memory.size / 1024,
        config.memory.line_size,
        config.core.cores,
        config.core.threads_per_core,
        config.workload.kind
    );

    let mut sim = Simulator::new(config)?;
    for arg in images {
        let (path, addr) = loader::parse_image_arg(arg)?;
        let bytes = loader::load_image(sim.memory_mut(), &path, addr)?;
        println!("[*] Loaded {} ({bytes} bytes) at {addr}", path.display());
    }
    sim.load_workload()?;

    let outcome = sim.run(limit)?;
    sim.stats().print_sections(sections);

    if outcome.reason == StopReason::CycleLimit {
        eprintln!("[!] Cycle limit of {limit} reached before the grid went idle");
        process::exit(2);
    }
    Ok(())
}
