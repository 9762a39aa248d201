#![warn(clippy::all)]

use anyhow::{Context, Result};
use num_bigint::BigUint;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hashlife::NiceInt;

fn usage() {
    println!("usage : hashlife [-h|--help] [<pattern file name>]");
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut file_name = String::from("pattern.rle");
    let mut got_pattern = false;
    for arg in std::env::args().skip(1) {
        if arg == "-h" || arg == "--help" || got_pattern {
            usage();
            return Ok(());
        }
        file_name = arg;
        got_pattern = true;
    }

    let data = std::fs::read(&file_name).with_context(|| format!("reading '{}'", file_name))?;
    let mut universe =
        hashlife::read_rle(&data).with_context(|| format!("loading '{}'", file_name))?;
    info!(
        population = %universe.population(),
        level = universe.root_level(),
        "loaded '{}'",
        file_name
    );

    // Headless run: keep stepping, growing the step size every few
    // steps the way the interactive driver ramps up.
    let mut generations = BigUint::from(0u32);
    for i in 0u32..24 {
        let log_step = i / 4;
        universe.step(log_step);
        generations += BigUint::from(1u32) << log_step;
        info!(
            log_step,
            generations = %generations,
            level = universe.root_level(),
            population = %universe.population(),
            nodes = %NiceInt::from_usize(universe.store().node_count()),
            "stepped"
        );
    }
    print!("{}", universe.stats());
    Ok(())
}
