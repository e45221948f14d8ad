#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the wind siting toolchain.

mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use indicatif::MultiProgress;
use wind_siting::{LandStore, RegionJob, RegionOutcome, RunSummary, SitingConfig, run_regions};
use wind_siting_database::{DuckStore, land_db, paths};
use wind_siting_osm::{OsmError, parse_neighbour_list, parse_region_list, read_overpass_file};

use crate::progress::{IndicatifProgress, init_logger};

#[derive(Parser)]
#[command(name = "wind_siting", about = "Wind turbine siting admissibility tool")]
struct Cli {
    /// `DuckDB` file to use (default: `data/wind_siting.duckdb`)
    #[arg(long, global = true, env = "WIND_SITING_DB")]
    db: Option<PathBuf>,

    /// TOML file overriding the built-in configuration
    #[arg(long, global = true, env = "WIND_SITING_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RegionSelection {
    /// Comma-separated region ids (default: every region in the database)
    #[arg(long, value_delimiter = ',')]
    regions: Vec<u32>,
}

#[derive(Args)]
struct RunLimits {
    /// Regions processed at the same time (overrides the config)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-region deadline in seconds (overrides the config)
    #[arg(long)]
    deadline_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Import regions, neighbour lists and Overpass extracts
    Import {
        /// Region list, one name per line
        #[arg(long)]
        regions: PathBuf,
        /// Neighbour list, `Name - A; B;` per line
        #[arg(long)]
        neighbours: PathBuf,
        /// Directory holding one `<region name>.json` Overpass extract per region
        #[arg(long)]
        osm_dir: PathBuf,
    },
    /// Classify every unevaluated candidate node
    Evaluate {
        #[command(flatten)]
        selection: RegionSelection,
        #[command(flatten)]
        limits: RunLimits,
    },
    /// Recompute area and power summaries
    Aggregate {
        #[command(flatten)]
        selection: RegionSelection,
        #[command(flatten)]
        limits: RunLimits,
    },
    /// Evaluate, then aggregate
    Run {
        #[command(flatten)]
        selection: RegionSelection,
        #[command(flatten)]
        limits: RunLimits,
        /// Clear all verdicts and summaries first
        #[arg(long)]
        reset: bool,
    },
    /// Print stored summaries as JSON lines
    Summaries {
        /// Only this region
        #[arg(long)]
        region: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = init_logger();
    let cli = Cli::parse();

    let db_path = paths::resolve_db_path(cli.db.as_deref());
    let store = Arc::new(DuckStore::open(&db_path)?);
    log::info!("Using database {}", db_path.display());

    match cli.command {
        Commands::Import {
            regions,
            neighbours,
            osm_dir,
        } => import(&store, &regions, &neighbours, &osm_dir, &multi)?,
        Commands::Evaluate { selection, limits } => {
            let config = load_config(cli.config.as_deref(), &limits)?;
            run(&store, config, selection, RegionJob::EVALUATE, &multi).await?;
        }
        Commands::Aggregate { selection, limits } => {
            let config = load_config(cli.config.as_deref(), &limits)?;
            run(&store, config, selection, RegionJob::AGGREGATE, &multi).await?;
        }
        Commands::Run {
            selection,
            limits,
            reset,
        } => {
            let config = load_config(cli.config.as_deref(), &limits)?;
            if reset {
                store.reset_results()?;
            }
            run(&store, config, selection, RegionJob::FULL, &multi).await?;
        }
        Commands::Summaries { region } => {
            for record in store.summary_records(region)? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
    }

    Ok(())
}

fn load_config(
    path: Option<&Path>,
    limits: &RunLimits,
) -> Result<SitingConfig, Box<dyn std::error::Error>> {
    let mut config = SitingConfig::load(path)?;

    if let Some(concurrency) = limits.concurrency {
        config.max_concurrent_regions = concurrency;
    }
    if let Some(deadline_secs) = limits.deadline_secs {
        config.region_deadline_secs = deadline_secs;
    }
    config.validate()?;

    Ok(config)
}

fn import(
    store: &DuckStore,
    regions_path: &Path,
    neighbours_path: &Path,
    osm_dir: &Path,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();

    let records = parse_region_list(&std::fs::read_to_string(regions_path)?);
    let regions = parse_neighbour_list(&std::fs::read_to_string(neighbours_path)?, &records);
    land_db::insert_regions(&store.connection(), &regions)?;
    log::info!("Imported {} regions", regions.len());

    let progress = IndicatifProgress::steps_bar(multi, "Importing extracts", records.len() as u64);
    let mut total_nodes = 0;

    for record in &records {
        progress.set_message(record.name.clone());
        let path = osm_dir.join(format!("{}.json", record.name));

        match read_overpass_file(&path, record.id) {
            Ok(extract) => {
                let conn = store.connection();
                total_nodes += land_db::insert_nodes(&conn, &extract.nodes)?;
                land_db::insert_ways(&conn, &extract.ways)?;
                log::info!(
                    "{}: {} nodes, {} ways",
                    record.name,
                    extract.nodes.len(),
                    extract.ways.len()
                );
            }
            Err(OsmError::FileNotFound(missing)) => {
                log::warn!("{}: no extract at {missing}, skipping", record.name);
            }
            Err(e) => return Err(e.into()),
        }

        progress.inc(1);
    }

    progress.finish(format!(
        "Imported {total_nodes} nodes in {:.1}s",
        start.elapsed().as_secs_f64()
    ));
    Ok(())
}

async fn run(
    store: &Arc<DuckStore>,
    config: SitingConfig,
    selection: RegionSelection,
    job: RegionJob,
    multi: &MultiProgress,
) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();

    let region_ids = if selection.regions.is_empty() {
        store.region_ids()?
    } else {
        selection.regions
    };

    let progress = IndicatifProgress::regions_bar(multi, "Processing regions");
    let summary = run_regions(store.clone(), Arc::new(config), region_ids, job, progress).await;

    report(&summary);
    log::info!("Finished in {:.1}s", start.elapsed().as_secs_f64());

    let retry = summary.retryable_regions();
    if retry.is_empty() {
        Ok(())
    } else {
        Err(format!("{} regions need another run: {retry:?}", retry.len()).into())
    }
}

fn report(summary: &RunSummary) {
    for outcome in &summary.outcomes {
        match outcome {
            RegionOutcome::Completed {
                region_id,
                evaluation,
                aggregation,
            } => {
                if let Some(evaluation) = evaluation {
                    log::info!(
                        "Region {region_id}: {} evaluated ({} buildable), {} skipped",
                        evaluation.evaluated,
                        evaluation.buildable,
                        evaluation.skipped
                    );
                }
                if let Some(aggregation) = aggregation {
                    log::info!(
                        "Region {region_id}: {} summaries from {} buildable nodes",
                        aggregation.summaries.len(),
                        aggregation.buildable_nodes
                    );
                }
            }
            RegionOutcome::Failed { region_id, error } => {
                log::error!("Region {region_id} failed: {error}");
            }
            RegionOutcome::TimedOut { region_id } => {
                log::warn!("Region {region_id} timed out");
            }
        }
    }
}
