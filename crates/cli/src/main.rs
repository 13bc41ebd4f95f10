use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use demevo_sim::Simulation;

/// demevo - forward-time population-genetics simulator
#[derive(Parser, Debug)]
#[command(name = "demevo")]
#[command(author, version, about = "Forward-time population-genetics simulator", long_about = None)]
struct Cli {
    /// Simulation script to run
    script: PathBuf,

    /// Random seed (default: drawn from entropy)
    #[arg(short, long)]
    seed: Option<i64>,

    /// Stop after this many generations even if the script continues
    #[arg(short, long)]
    generations: Option<i64>,

    /// Write a full population dump to this file after the run
    #[arg(short, long)]
    dump: Option<PathBuf>,

    /// Show a progress bar on stderr
    #[arg(long)]
    progress: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let source = fs::read_to_string(&cli.script)
        .with_context(|| format!("cannot read script {}", cli.script.display()))?;

    let mut sim = Simulation::new(&source, cli.seed)
        .with_context(|| format!("cannot set up simulation from {}", cli.script.display()))?;

    sim.initialize().context("initialization failed")?;
    eprintln!("// seed: {}", sim.get_seed());

    let bar = if cli.progress {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner} generation {msg}")
                .expect("valid progress template"),
        );
        Some(bar)
    } else {
        None
    };

    let mut steps = 0i64;
    loop {
        if let Some(cap) = cli.generations {
            if steps >= cap {
                break;
            }
        }
        let more = sim
            .run_one_generation()
            .with_context(|| format!("generation {} failed", sim.generation()))?;

        let output = sim.take_output();
        if !output.is_empty() {
            print!("{output}");
            std::io::stdout().flush().ok();
        }
        if let Some(bar) = &bar {
            bar.set_message(sim.generation().to_string());
            bar.tick();
        }
        if !more {
            break;
        }
        steps += 1;
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    if let Some(path) = &cli.dump {
        let mut file = fs::File::create(path)
            .with_context(|| format!("cannot create dump file {}", path.display()))?;
        sim.dump_population(&mut file)
            .context("population dump failed")?;
    }

    eprintln!("// finished at generation {}", sim.generation());
    Ok(())
}
