use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use geotwin_engine::config::{ConfigError, PipelineConfig};
use geotwin_engine::store::HttpStore;
use geotwin_engine::trees::TreeTemplate;
use geotwin_engine::{Pipeline, ProjectContext, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Build the digital-twin meshes of one project folder.
#[derive(Parser, Debug)]
#[command(name = "geotwin", version)]
struct Args {
    /// Project folder holding `GeospatialData` and `DigitalTwin`.
    #[arg(long)]
    project: PathBuf,

    /// Project id in the surroundings service.
    #[arg(long)]
    project_id: u64,

    /// Pipeline configuration (JSON). Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    stage: Stage,
}

#[derive(Subcommand, Debug)]
enum Stage {
    /// Post terrain outlines and export the terrain surface.
    Terrain,
    /// Store nearby CityGML buildings and export their meshes.
    Buildings,
    /// Remodel the vegetation layer's trees.
    Trees(TreeArgs),
    /// Buildings, then terrain, then trees.
    All(TreeArgs),
}

#[derive(clap::Args, Debug)]
struct TreeArgs {
    /// Use one STL template for every tree.
    #[arg(long, value_name = "FILE", conflicts_with = "random")]
    template: Option<PathBuf>,

    /// Draw each tree from a folder of STL templates.
    #[arg(long, value_name = "DIR")]
    random: Option<PathBuf>,

    /// Seed for `--random`.
    #[arg(long)]
    seed: Option<u64>,
}

impl TreeArgs {
    fn template(&self) -> Result<TreeTemplate> {
        match (&self.template, &self.random) {
            (Some(file), _) => Ok(TreeTemplate::Named(file.clone())),
            (None, Some(dir)) => Ok(TreeTemplate::Random(dir.clone())),
            (None, None) => Err(ConfigError::Invalid(
                "trees need --template FILE or --random DIR".into(),
            )
            .into()),
        }
    }

    fn rng(&self) -> StdRng {
        self.seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64)
    }
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::default(),
    };
    let store = config
        .store
        .as_ref()
        .map(|store| HttpStore::new(store.base_url.clone(), store.token.clone()))
        .ok_or_else(|| ConfigError::Invalid("no store configured".into()))?;
    let pipeline = Pipeline::new(
        ProjectContext::new(args.project, args.project_id),
        config,
        Arc::new(store),
    );

    match args.stage {
        Stage::Terrain => {
            let summary = pipeline.terrain()?;
            log::info!(
                "terrain done: {} points, {} triangles, {} slices failed",
                summary.points,
                summary.triangles,
                summary.report.failed_buckets.len()
            );
        }
        Stage::Buildings => {
            let summary = pipeline.buildings()?;
            log::info!(
                "buildings done: {} target and {} surrounding triangles, {} buildings with faulty surfaces",
                summary.target_triangles,
                summary.surrounding_triangles,
                summary.faulty.len()
            );
        }
        Stage::Trees(tree_args) => {
            let summary = pipeline.trees(&tree_args.template()?, &mut tree_args.rng())?;
            log::info!(
                "trees done: {} planted, {} failed",
                summary.report.planted.len(),
                summary.report.failed.len()
            );
        }
        Stage::All(tree_args) => {
            let template = tree_args.template()?;
            pipeline.buildings()?;
            pipeline.terrain()?;
            pipeline.trees(&template, &mut tree_args.rng())?;
            log::info!("all stages done for project {}", pipeline.context().project_id);
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run(Args::parse()) {
        eprintln!("geotwin error: {err}");
        std::process::exit(1);
    }
}
