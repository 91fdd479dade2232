//! Locate a source from a survey.
//!
//! Without arguments a grid survey around a source at (0, 60) is simulated.
//! Pass a csv file with x, y and count columns to sample from real data.
//! Set `RUST_LOG=gamma_locate=debug` to follow the step size adaptation.

use std::fs::File;

use anyhow::{Context, Result};
use gamma_locate::{
    grid, pooled_draws, sample_parallel, simulate_series, AdaptiveMetropolisSettings,
    CountRateModel, MeasurementSeries, NoiseSettings, PhysicalConstants, PosteriorSummary,
    SourceParams, SpatialGrid,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

fn load_survey(truth: &SourceParams) -> Result<MeasurementSeries> {
    if let Some(path) = std::env::args().nth(1) {
        let file = File::open(&path).with_context(|| format!("Failed to open {}", path))?;
        return MeasurementSeries::from_csv_reader(file, true)
            .with_context(|| format!("Failed to read measurements from {}", path));
    }

    let model = CountRateModel::point_source();
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let survey = simulate_series(
        &model,
        &grid(-95., 95., -95., 95., 10.),
        truth,
        &NoiseSettings::default(),
        &mut rng,
    )?;
    Ok(survey.to_measurements()?)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let truth = SourceParams::new(0., 60., 100., 10.);
    let series = load_survey(&truth)?;
    let peak = series.peak();
    println!(
        "{} records, peak count {} at ({}, {})",
        series.len(),
        peak.observed,
        peak.x,
        peak.y
    );

    let settings = AdaptiveMetropolisSettings {
        num_samples: 20_000,
        burn_in: 2_000,
        num_chains: 4,
        ..Default::default()
    };
    let outputs = sample_parallel(
        &series,
        CountRateModel::point_source(),
        &PhysicalConstants::default(),
        &settings,
        None,
    )?;
    for output in &outputs {
        println!(
            "chain {}: acceptance {:.3} in {:.2?}",
            output.chain(),
            output.acceptance_rate(),
            output.elapsed()
        );
    }

    let draws = pooled_draws(&outputs);
    let summary = PosteriorSummary::from_draws(&draws).context("No posterior draws")?;
    println!("{:>12} {:>10} {:>10} {:>10} {:>10}", "", "mean", "sd", "q05", "q95");
    for param in summary.parameters() {
        println!(
            "{:>12} {:>10.2} {:>10.2} {:>10.2} {:>10.2}",
            param.name, param.mean, param.sd, param.q05, param.q95
        );
    }

    if let Some(spatial) = SpatialGrid::from_draws(&draws, 50, 50) {
        let mode = spatial.mode();
        println!("most likely position ({:.1}, {:.1})", mode.x, mode.y);
    }
    Ok(())
}
