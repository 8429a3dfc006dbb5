use clap::{Parser, ValueEnum};
use env_logger::Env;
use log::{error, info};

use gridroute::errors::PlanError;
use gridroute::grid::Pos;
use gridroute::pathfinding::Heuristic;
use gridroute::planner::{Planner, PlannerConfig, RouteRequest};
use gridroute::scenario::Scenario;
use gridroute::solvers::SolverKind;

#[derive(ValueEnum, Clone, Copy)]
enum SolverName {
    /// Held-Karp, optimal but limited to a few stops.
    Exact,
    /// Ant colony optimization, approximate.
    AntColony,
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario JSON file with the map to plan on.
    scenario: String,

    /// Solver implementation to use to order the stops.
    #[arg(short, long, value_enum)]
    solver: Option<SolverName>,

    /// Use the terrain heuristic with this blend exponent, in [0, 1].
    #[arg(short, long)]
    k: Option<f64>,

    /// Planner config JSON file. Other flags override its values.
    #[arg(long)]
    config: Option<String>,

    /// When using ant-colony, seed for the ants.
    #[arg(long)]
    seed: Option<u64>,

    /// When using ant-colony, number of epochs.
    #[arg(long)]
    epochs: Option<usize>,

    /// When using ant-colony, number of ants per epoch.
    #[arg(long)]
    ants: Option<usize>,

    /// Threads for the distance matrix, 0 for one per core.
    #[arg(long)]
    threads: Option<usize>,

    /// Also draw the nodes explored by a direct start to end search.
    #[arg(long)]
    show_search: bool,
}

fn load_config(cli: &Cli) -> Result<PlannerConfig, PlanError> {
    let mut config: PlannerConfig = match &cli.config {
        Some(filename) => {
            let config_data = std::fs::read_to_string(filename)?;
            info!("Loading planner config from {filename}");
            serde_json::from_str(&config_data)?
        },
        None => {
            info!("Using default planner config.");
            PlannerConfig::default()
        },
    };
    if let Some(solver) = cli.solver {
        config.solver = match solver {
            SolverName::Exact => SolverKind::Exact,
            SolverName::AntColony => SolverKind::AntColony,
        };
    }
    if let Some(k) = cli.k {
        config.heuristic = Heuristic::terrain(k)?;
    }
    if let Some(seed) = cli.seed {
        config.aco.seed = seed;
    }
    if let Some(epochs) = cli.epochs {
        config.aco.epochs = epochs;
    }
    if let Some(ants) = cli.ants {
        config.aco.ants = ants;
    }
    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    Ok(config)
}

fn run(cli: &Cli) -> Result<(), PlanError> {
    let config = load_config(cli)?;
    let mut grid = Scenario::from_file(&cli.scenario)?.build()?;
    let request = RouteRequest::from_grid(&grid)?;
    let mut planner = Planner::new(config)?;

    if cli.show_search {
        let (mut open, mut closed) = (Vec::new(), Vec::new());
        planner.search_observed(&grid, &request.start, &request.end, |snapshot| {
            open = snapshot.open_nodes();
            closed = snapshot.closed_nodes();
        })?;
        info!("Direct search explored {} node(s)", closed.len());
        grid.mark_search(&open, &closed);
    }

    let route = planner.plan(&grid, &request)?;
    grid.mark_route(&route.nodes);
    let order: Vec<Pos> = route.order.iter().map(|&id| grid.pos(id)).collect();
    println!("cost: {}", route.cost);
    println!("stop order: {order:?}");
    print!("{grid}");
    Ok(())
}

fn main() {
    // Load .env file
    dotenvy::dotenv().ok();
    // Init logger with default value of info
    // This can be overriden with RUST_LOG env var
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    if let Err(err) = run(&cli) {
        error!("Error while planning with underlying error:");
        error!("  {}", err);
        std::process::exit(1);
    }
}
