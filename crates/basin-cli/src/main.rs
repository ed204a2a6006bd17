//! watershed: segment a 3D volume from directories of affinity slices.
//!
//! Reads three directories of per-z affinity slices (x, y and z channels),
//! runs the hysteresis watershed, builds the region graph, optionally
//! merges small regions, and writes one label slice per z plus a
//! parameters sidecar. Per-stage diagnostics go to stdout.
//!
//! # Usage
//!
//! ```text
//! watershed <AFF_X_DIR> <AFF_Y_DIR> <AFF_Z_DIR> <T_LOW> <T_HIGH> <T_S> <MIN_SIZE> [OPTIONS]
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use basin_export::{LabelEncoding, RunMetadata, SliceFormat, SliceNaming};
use basin_io::{AffinityDirs, ReadOptions, read_affinity_graph, write_metadata, write_segmentation};
use basin_pipeline::diagnostics::{Clock, process_with_diagnostics};
use basin_pipeline::{Aggregation, MergeConfig, SegmentationConfig};
use clap::{Parser, ValueEnum};
use flexi_logger::Logger;
use log::{info, warn};

/// Affinity-graph watershed over directories of affinity slices.
///
/// Slices in each directory are taken in sorted path order; the three
/// directories must hold the same number of files.
///
/// Float TIFF slices keep their raw weights. 8-bit and 16-bit integer
/// slices are rescaled to [0, 1], so thresholds always compare against
/// weights in that range (255 in an 8-bit slice is weight 1.0).
#[derive(Parser, Debug)]
#[command(name = "watershed", version, allow_negative_numbers = true)]
struct Cli {
    /// Directory of x-axis affinity slices.
    aff_x_dir: PathBuf,

    /// Directory of y-axis affinity slices.
    aff_y_dir: PathBuf,

    /// Directory of z-axis affinity slices.
    aff_z_dir: PathBuf,

    /// Low watershed threshold: weaker edges never join voxels.
    ///
    /// Compared against float TIFF weights as stored, and against integer
    /// slices after rescaling to [0, 1].
    t_low: f32,

    /// High watershed threshold: edges at least this strong always join voxels.
    t_high: f32,

    /// Merge affinity threshold.
    t_s: f32,

    /// Merge minimum region size in voxels.
    ///
    /// A whole number; fractional forms such as `25.0` are rejected.
    min_size: u64,

    /// Run the size-driven region merge after the watershed.
    #[arg(long)]
    merge: bool,

    /// How crossing voxel-edge weights reduce to one region-pair affinity.
    #[arg(long, value_enum, default_value_t = AggregationArg::Max)]
    aggregation: AggregationArg,

    /// Refuse ordered unions between two components both larger than this.
    #[arg(long)]
    plateau_size_limit: Option<u64>,

    /// Read at most this many z slices.
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    max_slices: Option<usize>,

    /// Directory receiving the label slices and the parameters sidecar.
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,

    /// Label slice container (png, tif).
    #[arg(long, default_value_t = SliceFormat::default())]
    format: SliceFormat,

    /// Label pixel encoding (gray16, rgba, float32; float32 needs tif).
    #[arg(long, default_value_t = LabelEncoding::default())]
    encoding: LabelEncoding,

    /// Output diagnostics as JSON instead of a human-readable report.
    #[arg(long)]
    json: bool,

    /// Log specification, e.g. `info` or `basin_pipeline=debug`.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Full segmentation config as a JSON string.
    ///
    /// When provided, the threshold arguments and the segmentation flags
    /// are ignored. The JSON must be a valid `SegmentationConfig`.
    #[arg(long)]
    config_json: Option<String>,
}

/// Region-pair aggregation selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum AggregationArg {
    /// Strongest crossing edge.
    Max,
    /// Mean over crossing edges.
    Mean,
}

/// Build a [`SegmentationConfig`] from CLI arguments.
fn config_from_cli(cli: &Cli) -> Result<SegmentationConfig, String> {
    let config = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else {
        SegmentationConfig {
            t_low: cli.t_low,
            t_high: cli.t_high,
            plateau_size_limit: cli.plateau_size_limit,
            aggregation: match cli.aggregation {
                AggregationArg::Max => Aggregation::Max,
                AggregationArg::Mean => Aggregation::Mean,
            },
            merge: MergeConfig {
                enabled: cli.merge,
                min_size: cli.min_size,
                affinity_threshold: cli.t_s,
            },
        }
    };
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// [`Clock`] implementation backed by [`std::time::Instant`].
struct StdClock;

impl Clock for StdClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn elapsed(&self, since: &Instant) -> Duration {
        since.elapsed()
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let config = config_from_cli(cli)?;
    if !config.merge.enabled && config.merge != MergeConfig::default() {
        warn!("merge parameters only name the output files unless --merge is set");
    }

    let dirs = AffinityDirs::new(&cli.aff_x_dir, &cli.aff_y_dir, &cli.aff_z_dir);
    let options = ReadOptions {
        max_slices: cli.max_slices,
    };
    let affinity = read_affinity_graph(&dirs, options).map_err(|e| e.to_string())?;

    let (result, diagnostics) =
        process_with_diagnostics(&affinity, &config, &StdClock).map_err(|e| e.to_string())?;

    let naming = SliceNaming::new(&config, cli.format);
    let paths = write_segmentation(&cli.output_dir, &result.segmentation, &naming, cli.encoding)
        .map_err(|e| e.to_string())?;
    let slices = paths
        .iter()
        .filter_map(|p| p.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();
    let metadata = RunMetadata::new(&config, &result, cli.encoding, cli.format, slices);
    let sidecar = write_metadata(&cli.output_dir, &metadata).map_err(|e| e.to_string())?;
    info!("wrote {} slices and {}", paths.len(), sidecar.display());

    if cli.json {
        let json = serde_json::to_string_pretty(&diagnostics)
            .map_err(|e| format!("Error serializing diagnostics: {e}"))?;
        println!("{json}");
    } else {
        println!("{}", diagnostics.report());
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _logger = match Logger::try_with_env_or_str(&cli.log_level)
        .and_then(|logger| logger.log_to_stderr().start())
    {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error initializing logging: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(msg) => {
            eprintln!("Error: {msg}");
            ExitCode::FAILURE
        }
    }
}
