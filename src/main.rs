use anyhow::{anyhow, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seismic_wave_propagator::wavefield::COMPONENT_NAMES;
use seismic_wave_propagator::{run_ranks, Config, Medium, SimulationParams};

#[derive(Parser, Debug)]
#[command(name = "seismic-propagate")]
#[command(about = "Propagate elastic waves through a homogeneous 3D medium")]
struct Cli {
    /// Path to the TOML configuration
    config: String,
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    info!("Loading configuration from: {}", cli.config);
    let config = Config::from_file(&cli.config)?;
    config.print_summary();

    let grid = config.grid();
    let params = SimulationParams::from_config(&config);
    let m = &config.medium;
    let outputs = run_ranks(&grid, &params, None, |sub| {
        Ok(Medium::homogeneous(sub.padded(), m.vp, m.vs, m.rho))
    })
    .map_err(|e| anyhow!("Propagation failed: {}", e))?;

    let peak = outputs
        .iter()
        .map(|out| out.wavefield.velocity_magnitude().fold(0.0, |m: f64, &v| m.max(v)))
        .fold(0.0, f64::max);
    let frames: usize = outputs.iter().map(|out| out.diagnostics.slices.len()).sum();
    let stations: usize = outputs.iter().map(|out| out.diagnostics.stations.len()).sum();
    info!(
        "Done: {} steps on {} ranks, final peak |v| = {:.4e} m/s, {} slice frames, {} stations",
        params.nt,
        outputs.len(),
        peak,
        frames,
        stations
    );
    for record in outputs.iter().flat_map(|out| &out.diagnostics.stations) {
        let peaks: Vec<String> = record
            .samples
            .columns()
            .into_iter()
            .zip(COMPONENT_NAMES)
            .map(|(col, name)| {
                let peak = col.fold(0.0, |m: f64, &v| m.max(v.abs()));
                format!("{}={:.3e}", name, peak)
            })
            .collect();
        info!(station = %record.name, "Peaks {}", peaks.join(" "));
    }
    for out in &outputs {
        if let Some(peaks) = &out.diagnostics.peaks {
            let pgv = peaks.pgv.iter().cloned().fold(0.0, f64::max);
            info!(rank = out.sub.rank, "Peak ground velocity {:.4e} m/s", pgv);
        }
    }

    Ok(())
}
