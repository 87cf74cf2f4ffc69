//! chiflow CLI - channel profile analysis from digital elevation models

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use chiflow_algorithms::calibration::{calibrate, Calibration, CalibrationParams};
use chiflow_algorithms::hydrology::{
    chi_grid, convert_rivertools_directions, d8_area_slope, d8_flow, flow_accumulation,
    flow_accumulation_within, flow_length_grid, priority_flood, scaled_relief_grid, D8Params,
    PriorityFloodParams,
};
use chiflow_algorithms::network::{ChannelProfile, ChiParams, FlowNetwork, NodeField};
use chiflow_core::io::{read_grid, write_grid, GRID_EXTENSIONS};
use chiflow_core::{d8, Raster, RasterElement};

// ─── CLI structure ──────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "chiflow")]
#[command(author, version, about = "Channel profile analysis from DEMs", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show information about a grid file
    Info {
        /// Input grid (.tif, .tiff or .asc)
        input: PathBuf,
    },
    /// Fill depressions with priority flood
    Fill {
        /// Input DEM file
        input: PathBuf,
        /// Output file
        output: PathBuf,
        /// Gradient imposed across filled flats, as drop per unit of grid distance
        #[arg(long, default_value = "0.0")]
        agg_slope: f64,
    },
    /// D8 flow direction and drainage area from a filled DEM
    Flow {
        /// Filled DEM file
        input: PathBuf,
        /// Output flow direction (D8 codes: 1,2,4,8,16,32,64,128)
        #[arg(long)]
        direction: PathBuf,
        /// Output drainage area, square metres
        #[arg(long)]
        area: PathBuf,
        /// Output slope towards the receiver
        #[arg(long)]
        slope: Option<PathBuf>,
        /// Unfilled DEM to measure slopes on
        #[arg(long, requires = "slope")]
        raw: Option<PathBuf>,
    },
    /// Drainage area from an existing flow direction grid
    Accumulate {
        /// Input flow direction grid (D8 codes)
        input: PathBuf,
        /// Output drainage area, square metres
        output: PathBuf,
        /// DEM whose no-data cells are excluded from routing
        #[arg(long)]
        dem: Option<PathBuf>,
    },
    /// Convert a RiverTools direction grid to D8 codes
    ConvertRivertools {
        /// Input RiverTools direction grid
        input: PathBuf,
        /// Output file
        output: PathBuf,
    },
    /// Build the flow network above an outlet and export its profile
    Network {
        #[command(flatten)]
        grids: NetworkGrids,
        #[command(flatten)]
        outlet: OutletArgs,
        /// Channel-initiation length scale in metres (A0 = x0²)
        #[arg(long, default_value = "500")]
        x0: f64,
        /// Concavity index
        #[arg(long, default_value = "0.5")]
        theta: f64,
        /// Output chi grid over the network
        #[arg(long)]
        chi: Option<PathBuf>,
        /// Output flow length grid over the network
        #[arg(long)]
        flow_length: Option<PathBuf>,
        /// Output JSON file with the channel profile
        #[arg(long)]
        profile: Option<PathBuf>,
    },
    /// Fit k_s (and θ unless fixed) to the channel profile above an outlet
    Calibrate {
        #[command(flatten)]
        grids: NetworkGrids,
        #[command(flatten)]
        outlet: OutletArgs,
        /// Channel-initiation length scale in metres (A0 = x0²)
        #[arg(long, default_value = "500")]
        x0: f64,
        /// Fixed concavity; searched for when omitted
        #[arg(long)]
        theta: Option<f64>,
        /// JSON file with calibration parameters; overrides --x0 and --theta
        #[arg(long)]
        params: Option<PathBuf>,
        /// Write the JSON report here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Process a `<prefix>_dem` / `<prefix>_dir` pair into chi products
    Batch {
        /// Name prefix shared by input and output grids
        prefix: String,
        /// Channel-initiation length scale in metres (A0 = x0²)
        #[arg(long, default_value = "500")]
        x0: f64,
        /// Concavity index
        #[arg(long, default_value = "0.5")]
        theta: f64,
        /// JSON file with `x0` and `theta`; overrides the flags
        #[arg(long)]
        params: Option<PathBuf>,
        /// Direction grid uses RiverTools codes
        #[arg(long)]
        rivertools: bool,
        /// Output extension: tif or asc
        #[arg(long, default_value = "tif")]
        format: String,
    },
}

/// Grids needed to build a flow network
#[derive(Args)]
struct NetworkGrids {
    /// Flow direction grid (D8 codes)
    #[arg(long)]
    direction: PathBuf,
    /// Drainage area grid, square metres
    #[arg(long)]
    area: PathBuf,
    /// Elevation grid
    #[arg(long)]
    elevation: PathBuf,
}

#[derive(Args)]
struct OutletArgs {
    /// Outlet as "row,col", or "x,y" with --xy
    #[arg(long)]
    outlet: String,
    /// Read the outlet as map coordinates
    #[arg(long)]
    xy: bool,
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install log subscriber")?;
    Ok(())
}

fn spinner(msg: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(pb)
}

fn read_raster<T: RasterElement>(path: &Path) -> Result<Raster<T>> {
    let pb = spinner("Reading grid...")?;
    let raster: Raster<T> = read_grid(path)
        .with_context(|| format!("Failed to read grid {}", path.display()))?;
    pb.finish_and_clear();
    info!("Input: {} x {} ({})", raster.cols(), raster.rows(), path.display());
    Ok(raster)
}

fn read_direction(path: &Path) -> Result<Raster<u8>> {
    let mut direction: Raster<u8> = read_raster(path)?;
    direction.set_nodata(Some(d8::NODATA));
    Ok(direction)
}

fn write_raster<T: RasterElement>(raster: &Raster<T>, path: &Path) -> Result<()> {
    let pb = spinner("Writing output...")?;
    write_grid(raster, path)
        .with_context(|| format!("Failed to write grid {}", path.display()))?;
    pb.finish_and_clear();
    Ok(())
}

fn write_json<S: Serialize>(value: &S, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), value).context("Failed to write JSON")?;
    Ok(())
}

fn read_json<D: serde::de::DeserializeOwned>(path: &Path) -> Result<D> {
    let file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(file).with_context(|| format!("Invalid parameters in {}", path.display()))
}

fn done(name: &str, path: &Path, elapsed: std::time::Duration) {
    println!("{} saved to: {}", name, path.display());
    println!("  Processing time: {:.2?}", elapsed);
}

fn parse_pair<N: std::str::FromStr>(s: &str) -> Result<(N, N)> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != 2 {
        anyhow::bail!("Outlet must be two comma-separated numbers, got: {}", s);
    }
    let a = parts[0].parse().ok().context("Invalid first outlet coordinate")?;
    let b = parts[1].parse().ok().context("Invalid second outlet coordinate")?;
    Ok((a, b))
}

/// Resolve the outlet to a cell of `direction`
fn resolve_outlet(args: &OutletArgs, direction: &Raster<u8>) -> Result<(usize, usize)> {
    if args.xy {
        let (x, y): (f64, f64) = parse_pair(&args.outlet)?;
        direction
            .georef()
            .cell_of(x, y)
            .with_context(|| format!("Outlet ({}, {}) lies outside the grid", x, y))
    } else {
        let (row, col): (usize, usize) = parse_pair(&args.outlet)?;
        let (rows, cols) = direction.shape();
        if row >= rows || col >= cols {
            anyhow::bail!("Outlet ({}, {}) lies outside the {} x {} grid", row, col, rows, cols);
        }
        Ok((row, col))
    }
}

fn load_network(grids: &NetworkGrids, outlet: &OutletArgs) -> Result<FlowNetwork> {
    let direction = read_direction(&grids.direction)?;
    let area: Raster<f64> = read_raster(&grids.area)?;
    let elevation: Raster<f64> = read_raster(&grids.elevation)?;
    let cell = resolve_outlet(outlet, &direction)?;

    let pb = spinner("Building flow network...")?;
    let network = FlowNetwork::build(&direction, &area, &elevation, cell)
        .context("Failed to build flow network")?;
    pb.finish_and_clear();
    info!("Network: {} nodes above outlet ({}, {})", network.len(), cell.0, cell.1);
    Ok(network)
}

/// First `<prefix>_<suffix>.<ext>` that exists, over the supported extensions
fn find_grid(prefix: &str, suffix: &str) -> Option<PathBuf> {
    GRID_EXTENSIONS
        .iter()
        .map(|ext| PathBuf::from(format!("{}_{}.{}", prefix, suffix, ext)))
        .find(|p| p.exists())
}

#[derive(Serialize)]
struct ProfileReport<'a> {
    outlet: (usize, usize),
    nodes: usize,
    x0: f64,
    theta: f64,
    profile: &'a ChannelProfile,
    /// Row, column, area and elevation per channel node
    values: Vec<Vec<f64>>,
}

#[derive(Serialize)]
struct CalibrationReport {
    outlet: (usize, usize),
    nodes: usize,
    x0: f64,
    #[serde(flatten)]
    result: Calibration,
}

// ─── Main ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        // ── Info ─────────────────────────────────────────────────────
        Commands::Info { input } => {
            let raster: Raster<f64> = read_raster(&input)?;
            let (rows, cols) = raster.shape();
            let georef = raster.georef();
            let bounds = georef.bounds();
            let stats = raster.statistics();

            println!("File: {}", input.display());
            println!("Dimensions: {} x {} ({} cells)", cols, rows, raster.len());
            println!("Cell size: {}", raster.cell_size());
            println!(
                "Lower-left centre: ({:.6}, {:.6})",
                georef.xllcenter, georef.yllcenter
            );
            println!(
                "Bounds: ({:.6}, {:.6}) - ({:.6}, {:.6})",
                bounds.0, bounds.1, bounds.2, bounds.3
            );
            if let Some(crs) = &georef.projection {
                println!("CRS: {}", crs.identifier());
            }
            if georef.is_geographic() {
                let (dx, dy) = georef.pixel_dimensions(rows / 2);
                println!("Pixel size at centre row: {:.2} m x {:.2} m", dx, dy);
            }
            if let Some(nodata) = raster.nodata() {
                println!("NoData: {}", nodata);
            }
            println!("\nStatistics:");
            if let Some(min) = stats.min {
                println!("  Min: {:.4}", min);
            }
            if let Some(max) = stats.max {
                println!("  Max: {:.4}", max);
            }
            if let Some(mean) = stats.mean {
                println!("  Mean: {:.4}", mean);
            }
            println!(
                "  Valid cells: {} ({:.1}%)",
                stats.valid_count,
                100.0 * stats.valid_count as f64 / raster.len() as f64
            );
        }

        // ── Hydrology ────────────────────────────────────────────────
        Commands::Fill {
            input,
            output,
            agg_slope,
        } => {
            let dem: Raster<f64> = read_raster(&input)?;
            let start = Instant::now();
            let result = priority_flood(&dem, PriorityFloodParams { agg_slope })
                .context("Failed to fill depressions")?;
            let elapsed = start.elapsed();
            write_raster(&result, &output)?;
            done("Filled DEM", &output, elapsed);
        }

        Commands::Flow {
            input,
            direction,
            area,
            slope,
            raw,
        } => {
            let filled: Raster<f64> = read_raster(&input)?;
            let raw_dem: Option<Raster<f64>> = raw.as_deref().map(read_raster::<f64>).transpose()?;
            let start = Instant::now();
            let routing = match &raw_dem {
                Some(raw_dem) => d8_area_slope(&filled, raw_dem),
                None => d8_flow(
                    &filled,
                    D8Params {
                        compute_slope: slope.is_some(),
                    },
                ),
            }
            .context("Failed to route flow")?;
            let elapsed = start.elapsed();

            write_raster(&routing.direction, &direction)?;
            write_raster(&routing.area, &area)?;
            if let (Some(path), Some(grid)) = (&slope, &routing.slope) {
                write_raster(grid, path)?;
                println!("Slope saved to: {}", path.display());
            }
            println!("Flow direction saved to: {}", direction.display());
            done("Drainage area", &area, elapsed);
        }

        Commands::Accumulate { input, output, dem } => {
            let direction = read_direction(&input)?;
            let start = Instant::now();
            let result = match dem.as_deref() {
                Some(path) => {
                    let dem: Raster<f64> = read_raster(path)?;
                    flow_accumulation_within(&direction, &dem)
                }
                None => flow_accumulation(&direction),
            }
            .context("Failed to accumulate drainage area")?;
            let elapsed = start.elapsed();
            write_raster(&result, &output)?;
            done("Drainage area", &output, elapsed);
        }

        Commands::ConvertRivertools { input, output } => {
            let direction: Raster<u8> = read_raster(&input)?;
            let start = Instant::now();
            let result = convert_rivertools_directions(&direction);
            let elapsed = start.elapsed();
            write_raster(&result, &output)?;
            done("Flow direction", &output, elapsed);
        }

        // ── Network ──────────────────────────────────────────────────
        Commands::Network {
            grids,
            outlet,
            x0,
            theta,
            chi,
            flow_length,
            profile,
        } => {
            let network = load_network(&grids, &outlet)?;
            let params = ChiParams { x0, theta };
            let start = Instant::now();

            if let Some(path) = &chi {
                let grid = network.to_raster(&network.chi(params))?;
                write_raster(&grid, path)?;
                println!("Chi saved to: {}", path.display());
            }
            if let Some(path) = &flow_length {
                let grid = network.to_raster(&network.flow_length())?;
                write_raster(&grid, path)?;
                println!("Flow length saved to: {}", path.display());
            }

            let channel = network.channel_profile(params, network.root().elevation);
            info!(
                "Channel: {} of {} nodes with area >= {:.0} m²",
                channel.len(),
                network.len(),
                params.reference_area()
            );
            if let Some(path) = &profile {
                let report = ProfileReport {
                    outlet: network.root().cell,
                    nodes: network.len(),
                    x0,
                    theta,
                    profile: &channel,
                    values: network.profile_values(
                        x0,
                        &[NodeField::Row, NodeField::Col, NodeField::Area, NodeField::Elevation],
                    ),
                };
                write_json(&report, path)?;
                println!("Profile saved to: {}", path.display());
            }
            println!("  Processing time: {:.2?}", start.elapsed());
        }

        Commands::Calibrate {
            grids,
            outlet,
            x0,
            theta,
            params,
            output,
        } => {
            let params: CalibrationParams = match params.as_deref() {
                Some(path) => read_json(path)?,
                None => CalibrationParams {
                    x0,
                    theta,
                    ..Default::default()
                },
            };
            debug!(?params, "calibration parameters");

            let network = load_network(&grids, &outlet)?;
            let start = Instant::now();
            let result = calibrate(&network, params);
            let elapsed = start.elapsed();

            if result.degenerate {
                warn!("No channel node reaches A0 = {:.0} m²", params.x0 * params.x0);
            } else if !result.converged {
                warn!("Concavity search did not converge; R² reported as 0");
            }

            let report = CalibrationReport {
                outlet: network.root().cell,
                nodes: network.len(),
                x0: params.x0,
                result,
            };
            match &output {
                Some(path) => {
                    write_json(&report, path)?;
                    done("Calibration", path, elapsed);
                }
                None => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    println!("  Processing time: {:.2?}", elapsed);
                }
            }
        }

        // ── Batch ────────────────────────────────────────────────────
        Commands::Batch {
            prefix,
            x0,
            theta,
            params,
            rivertools,
            format,
        } => {
            let params: ChiParams = match params.as_deref() {
                Some(path) => read_json(path)?,
                None => ChiParams { x0, theta },
            };
            let ext = format.to_ascii_lowercase();
            if !GRID_EXTENSIONS.contains(&ext.as_str()) {
                anyhow::bail!("Unknown output format: {}. Use tif or asc.", format);
            }

            let dem_path = find_grid(&prefix, "dem")
                .with_context(|| format!("No elevation grid {}_dem.*", prefix))?;
            let dir_path = find_grid(&prefix, "dir")
                .with_context(|| format!("No flow direction grid {}_dir.*", prefix))?;

            let elevation: Raster<f64> = read_raster(&dem_path)?;
            let mut direction = read_direction(&dir_path)?;
            if rivertools {
                direction = convert_rivertools_directions(&direction);
            }
            direction
                .ensure_same_shape(&elevation)
                .context("Elevation and flow direction grids differ in shape")?;
            if let Some(acc_path) = find_grid(&prefix, "acc") {
                let supplied: Raster<f64> = read_raster(&acc_path)?;
                supplied
                    .ensure_same_shape(&elevation)
                    .context("Accumulation grid differs in shape")?;
                info!("Drainage area is recomputed in square metres; {} is not used", acc_path.display());
            }

            let start = Instant::now();
            let pb = spinner("Computing drainage area...")?;
            let area = flow_accumulation_within(&direction, &elevation)
                .context("Failed to accumulate drainage area")?;
            pb.set_message("Computing chi...");
            let chi = chi_grid(&direction, &area, params).context("Failed to compute chi")?;
            pb.set_message("Computing flow length...");
            let flow_length = flow_length_grid(&direction, &elevation)
                .context("Failed to compute flow length")?;
            pb.set_message("Computing scaled relief...");
            let relief = scaled_relief_grid(&direction, &elevation, &area, params)
                .context("Failed to compute scaled relief")?;
            pb.finish_and_clear();
            let elapsed = start.elapsed();

            let tag = format!("{}_{}", params.x0, params.theta);
            let out = |name: &str| PathBuf::from(format!("{}_{}.{}", prefix, name, ext));
            write_raster(&elevation, &out("elevation"))?;
            write_raster(&direction, &out("flow_direction"))?;
            write_raster(&area, &out("area"))?;
            write_raster(&chi, &out(&format!("ksi_{}", tag)))?;
            write_raster(&flow_length, &out("flow_length"))?;
            let relief_path = out(&format!("relief_{}", tag));
            write_raster(&relief, &relief_path)?;

            println!("Wrote 6 grids with prefix {}", prefix);
            done("Scaled relief", &relief_path, elapsed);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        let (r, c): (usize, usize) = parse_pair("12, 7").unwrap();
        assert_eq!((r, c), (12, 7));
        let (x, y): (f64, f64) = parse_pair("500.5,-20").unwrap();
        assert_eq!((x, y), (500.5, -20.0));
        assert!(parse_pair::<usize>("1;2").is_err());
        assert!(parse_pair::<usize>("a,2").is_err());
    }

    #[test]
    fn test_resolve_outlet() {
        use chiflow_core::GeoReference;
        use std::sync::Arc;

        let g = GeoReference::new(4, 3, 10.0, 5.0, 5.0).unwrap();
        let direction: Raster<u8> = Raster::with_georef(Arc::new(g), 0);

        let by_cell = OutletArgs {
            outlet: "2,3".into(),
            xy: false,
        };
        assert_eq!(resolve_outlet(&by_cell, &direction).unwrap(), (2, 3));

        let by_xy = OutletArgs {
            outlet: "15,25".into(),
            xy: true,
        };
        assert_eq!(resolve_outlet(&by_xy, &direction).unwrap(), (0, 1));

        let outside = OutletArgs {
            outlet: "3,0".into(),
            xy: false,
        };
        assert!(resolve_outlet(&outside, &direction).is_err());
    }

    #[test]
    fn test_cli_parses_batch() {
        let cli = Cli::try_parse_from(["chiflow", "batch", "basin", "--x0", "250", "--format", "asc"])
            .unwrap();
        match cli.command {
            Commands::Batch { prefix, x0, theta, format, .. } => {
                assert_eq!(prefix, "basin");
                assert_eq!(x0, 250.0);
                assert_eq!(theta, 0.5);
                assert_eq!(format, "asc");
            }
            _ => panic!("expected batch"),
        }
    }
}
