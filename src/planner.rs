use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::ant_colony_optimization::HyperParams;
use crate::distance_matrix::DistanceMatrix;
use crate::errors::PlanError;
use crate::grid::{Grid, NodeId, NodeKind, Pos};
use crate::held_karp::{DEFAULT_MAX_STOPS, MAX_STOPS};
use crate::interrupt::Interrupt;
use crate::pathfinding::{Cost, Heuristic, Path, Pathfinder, SearchSnapshot};
use crate::solvers::{has_unreachable_leg, new_solver, Solver, SolverKind};
use crate::stitching::stitch_route;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PlannerConfig {
    pub heuristic: Heuristic,
    pub solver: SolverKind,
    /// Only used by the ant colony solver.
    pub aco: HyperParams,
    /// Workers for the distance matrix, 0 for one per core.
    pub threads: usize,
    /// Stops beyond which the exact solver refuses to run.
    pub max_exact_stops: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        PlannerConfig {
            heuristic: Heuristic::default(),
            solver: SolverKind::default(),
            aco: HyperParams::default(),
            threads: 0,
            max_exact_stops: DEFAULT_MAX_STOPS,
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<(), PlanError> {
        self.heuristic.validate()?;
        self.aco.validate()?;
        if self.max_exact_stops > MAX_STOPS {
            return Err(PlanError::InvalidConfig(format!(
                "max_exact_stops {} is above the supported {MAX_STOPS}",
                self.max_exact_stops)));
        }
        Ok(())
    }
}

/// Where to go: from `start`, through every stop (in any order), to `end`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    pub start: Pos,
    pub end: Pos,
    #[serde(default)]
    pub stops: Vec<Pos>,
}

impl RouteRequest {
    /// The landmarks placed on the grid, stops in placement order.
    pub fn from_grid(grid: &Grid) -> Result<Self, PlanError> {
        let start = grid.start()
            .ok_or_else(|| PlanError::InvalidRequest("grid has no start".into()))?;
        let end = grid.end()
            .ok_or_else(|| PlanError::InvalidRequest("grid has no end".into()))?;
        Ok(RouteRequest {
            start: grid.pos(start),
            end: grid.pos(end),
            stops: grid.stops().iter().map(|&id| grid.pos(id)).collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Every node from start to end, consecutive nodes are neighbors.
    pub nodes: Vec<NodeId>,
    pub cost: Cost,
    /// Stops in the order the route visits them.
    pub order: Vec<NodeId>,
}

pub struct Planner {
    config: PlannerConfig,
    solver: Box<dyn Solver>,
    interrupt: Interrupt,
}

impl Planner {
    /// Fails on an invalid config, before anything is searched.
    pub fn new(config: PlannerConfig) -> Result<Self, PlanError> {
        config.validate()?;
        let solver = new_solver(config.solver, &config.aco, config.max_exact_stops)?;
        info!("Planner using solver {} and {:?} heuristic", solver.name(), config.heuristic);
        Ok(Planner { config, solver, interrupt: Interrupt::new() })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Handle to cancel a `plan` running on another thread.
    pub fn interrupt(&self) -> Interrupt {
        self.interrupt.clone()
    }

    pub fn plan(&mut self, grid: &Grid, request: &RouteRequest) -> Result<Route, PlanError> {
        let timer = Instant::now();
        let (start, end, stops) = resolve(grid, request)?;

        let route = if stops.is_empty() {
            let path = Pathfinder::new(self.config.heuristic)?
                .shortest_path(grid, start, end, &self.interrupt)?
                .ok_or(PlanError::Infeasible)?;
            Route { nodes: path.steps, cost: path.cost, order: Vec::new() }
        } else {
            let matrix = DistanceMatrix::build(grid, start, end, &stops, self.config.heuristic,
                                               self.config.threads, &self.interrupt)?;
            if has_unreachable_leg(&matrix) {
                warn!("Some stop or the end is walled off, no tour can be feasible");
                return Err(PlanError::Infeasible);
            }
            let tour = self.solver.solve(&matrix, &self.interrupt)?;
            let nodes = stitch_route(&matrix, &tour.order)?;
            let order = tour.order.iter().map(|&v| matrix.node(v)).collect();
            Route { nodes, cost: tour.cost, order }
        };
        debug_assert_eq!(route.nodes.len(), route.cost as usize + 1);
        info!("Planned a route of cost {} through {} stop(s), took {:?}",
              route.cost, route.order.len(), timer.elapsed());
        Ok(route)
    }

    /// Single-pair search that reports every step to `observer`, e.g. to draw
    /// the frontier with `Grid::mark_search`. `Ok(None)` when unreachable.
    pub fn search_observed<F>(
        &self, grid: &Grid, from: &Pos, to: &Pos, observer: F
        ) -> Result<Option<Path>, PlanError>
    where
        F: FnMut(&SearchSnapshot),
    {
        check_adjacency(grid)?;
        let from = walkable_id(grid, from)?;
        let to = walkable_id(grid, to)?;
        let tree = Pathfinder::new(self.config.heuristic)?
            .search_observed(grid, from, to, &self.interrupt, observer)?;
        Ok(tree.map(|tree| tree.path()))
    }
}

fn check_adjacency(grid: &Grid) -> Result<(), PlanError> {
    if grid.is_adjacency_stale() {
        return Err(PlanError::InvalidRequest(
            "obstacles changed since the last build_adjacency".into()));
    }
    Ok(())
}

fn walkable_id(grid: &Grid, pos: &Pos) -> Result<NodeId, PlanError> {
    let node = grid.node_at(pos).ok_or_else(|| PlanError::InvalidRequest(
        format!("{pos:?} is outside the {}x{} grid", grid.rows(), grid.cols())))?;
    if node.kind == NodeKind::Obstacle {
        return Err(PlanError::InvalidRequest(format!("{pos:?} is an obstacle")));
    }
    Ok(node.id)
}

// Node ids for the request. The start may equal the end (a round trip), but
// stops must be distinct from each other and from both.
fn resolve(
    grid: &Grid, request: &RouteRequest
    ) -> Result<(NodeId, NodeId, Vec<NodeId>), PlanError> {
    check_adjacency(grid)?;
    let start = walkable_id(grid, &request.start)?;
    let end = walkable_id(grid, &request.end)?;
    let mut stops: Vec<NodeId> = Vec::with_capacity(request.stops.len());
    for pos in &request.stops {
        let id = walkable_id(grid, pos)?;
        if id == start || id == end || stops.contains(&id) {
            return Err(PlanError::InvalidRequest(
                format!("stop {pos:?} is requested more than once")));
        }
        stops.push(id);
    }
    Ok((start, end, stops))
}

#[cfg(test)]
mod tests {
    use crate::scenario::{parse_map, Scenario};
    use super::*;

    fn plan(grid: &Grid, config: PlannerConfig) -> Result<Route, PlanError> {
        let request = RouteRequest::from_grid(grid)?;
        Planner::new(config)?.plan(grid, &request)
    }

    fn assert_valid_route(grid: &Grid, request: &RouteRequest, route: &Route) {
        assert_eq!(route.nodes.first(), grid.id(&request.start).as_ref());
        assert_eq!(route.nodes.last(), grid.id(&request.end).as_ref());
        for step in route.nodes.windows(2) {
            assert!(grid.neighbors(step[0]).contains(&step[1]));
        }
        assert_eq!(route.nodes.len(), route.cost as usize + 1);
        for pos in &request.stops {
            let id = grid.id(pos).unwrap();
            assert!(route.nodes.contains(&id), "{pos:?} not visited");
            assert!(route.order.contains(&id));
        }
    }

    #[test]
    fn test_plan_with_stops() {
        let grid = Scenario::from_file("./scenarios/walled_garden.json").unwrap()
            .build().unwrap();
        let request = RouteRequest::from_grid(&grid).unwrap();
        let exact = plan(&grid, PlannerConfig::default()).unwrap();
        assert_valid_route(&grid, &request, &exact);

        let config = PlannerConfig { solver: SolverKind::AntColony, ..Default::default() };
        let colony = plan(&grid, config).unwrap();
        assert_valid_route(&grid, &request, &colony);
        assert!(colony.cost >= exact.cost);
    }

    #[test]
    fn test_plan_without_stops() {
        let grid = parse_map(&[
            "S.#.E",
            "..#..",
            "..#..",
            "..#..",
            ".....",
        ], Default::default()).unwrap();
        let route = plan(&grid, PlannerConfig::default()).unwrap();
        assert_eq!(route.cost, 12);
        assert!(route.order.is_empty());
    }

    #[test]
    fn test_walled_off_stop_is_infeasible() {
        let grid = parse_map(&[
            "S.#o",
            "..##",
            "...E",
        ], Default::default()).unwrap();
        assert!(matches!(plan(&grid, PlannerConfig::default()), Err(PlanError::Infeasible)));
        let config = PlannerConfig { solver: SolverKind::AntColony, ..Default::default() };
        assert!(matches!(plan(&grid, config), Err(PlanError::Infeasible)));
    }

    #[test]
    fn test_walled_off_end_is_infeasible() {
        let grid = parse_map(&[
            "S..#.",
            "...#E",
        ], Default::default()).unwrap();
        assert!(matches!(plan(&grid, PlannerConfig::default()), Err(PlanError::Infeasible)));
    }

    #[test]
    fn test_round_trip() {
        let grid = parse_map(&[
            "S..",
            "...",
            "..o",
        ], Default::default()).unwrap();
        let request = RouteRequest {
            start: Pos::new(0, 0),
            end: Pos::new(0, 0),
            stops: vec![Pos::new(2, 2)],
        };
        let route = Planner::new(PlannerConfig::default()).unwrap()
            .plan(&grid, &request).unwrap();
        assert_eq!(route.cost, 8);
        assert_eq!(route.nodes.first(), route.nodes.last());
    }

    #[test]
    fn test_rejects_bad_requests() {
        let mut grid = parse_map(&[
            "S.#",
            "..o",
            "..E",
        ], Default::default()).unwrap();
        let mut planner = Planner::new(PlannerConfig::default()).unwrap();
        let good = RouteRequest::from_grid(&grid).unwrap();
        let bad = [
            RouteRequest { start: Pos::new(9, 9), ..good.clone() },
            RouteRequest { end: Pos::new(0, 2), ..good.clone() },
            RouteRequest { stops: vec![Pos::new(1, 2), Pos::new(1, 2)], ..good.clone() },
            RouteRequest { stops: vec![Pos::new(0, 0)], ..good.clone() },
        ];
        for request in &bad {
            assert!(matches!(planner.plan(&grid, request), Err(PlanError::InvalidRequest(_))),
                    "{request:?}");
        }
        grid.set_obstacle(&Pos::new(1, 0)).unwrap();
        assert!(matches!(planner.plan(&grid, &good), Err(PlanError::InvalidRequest(_))));
        grid.build_adjacency();
        assert!(planner.plan(&grid, &good).is_ok());
        assert!(matches!(RouteRequest::from_grid(&Grid::new(2, 2)),
                         Err(PlanError::InvalidRequest(_))));
    }

    #[test]
    fn test_rejects_bad_config() {
        let configs = [
            PlannerConfig { heuristic: Heuristic::Terrain { k: 1.5 }, ..Default::default() },
            PlannerConfig {
                aco: HyperParams { evaporation_rate: -0.5, ..Default::default() },
                ..Default::default()
            },
            PlannerConfig { max_exact_stops: MAX_STOPS + 1, ..Default::default() },
            // Tables this large would not fit in memory.
            PlannerConfig { max_exact_stops: 24, ..Default::default() },
        ];
        for config in configs {
            assert!(matches!(Planner::new(config), Err(PlanError::InvalidConfig(_))));
        }
        let largest = PlannerConfig { max_exact_stops: MAX_STOPS, ..Default::default() };
        assert!(Planner::new(largest).is_ok());
    }

    #[test]
    fn test_too_many_stops_for_exact_solver() {
        let grid = parse_map(&[
            "So.o.o",
            "......",
            "o.o.oE",
        ], Default::default()).unwrap();
        let config = PlannerConfig { max_exact_stops: 4, ..Default::default() };
        assert!(matches!(plan(&grid, config),
                         Err(PlanError::TooManyStops { stops: 6, max: 4 })));
        let config = PlannerConfig {
            solver: SolverKind::AntColony, max_exact_stops: 4, ..Default::default()
        };
        assert!(plan(&grid, config).is_ok());
    }

    #[test]
    fn test_cancelled_plan() {
        let grid = Scenario::from_file("./scenarios/walled_garden.json").unwrap()
            .build().unwrap();
        let request = RouteRequest::from_grid(&grid).unwrap();
        let mut planner = Planner::new(PlannerConfig::default()).unwrap();
        planner.interrupt().cancel();
        assert!(matches!(planner.plan(&grid, &request), Err(PlanError::Cancelled)));
    }

    #[test]
    fn test_search_observed_marks_grid() {
        let mut grid = parse_map(&[
            "S...",
            ".##.",
            "...E",
        ], Default::default()).unwrap();
        let planner = Planner::new(PlannerConfig::default()).unwrap();
        let mut last = (Vec::new(), Vec::new());
        let path = planner.search_observed(&grid, &Pos::new(0, 0), &Pos::new(2, 3), |snapshot| {
            last = (snapshot.open_nodes(), snapshot.closed_nodes());
        }).unwrap().unwrap();
        assert_eq!(path.cost, 5);
        assert!(!last.1.is_empty());
        grid.mark_search(&last.0, &last.1);
        grid.mark_route(&path.steps);
        let rendered = grid.to_string();
        assert!(rendered.starts_with('S'));
        assert_eq!(rendered.matches('*').count(), 4);
    }

    #[test]
    fn test_config_from_json() {
        let config: PlannerConfig = serde_json::from_str(r#"{
            "heuristic": {"mode": "terrain", "k": 0.5},
            "solver": "ant-colony",
            "aco": {"epochs": 10},
            "threads": 2
        }"#).unwrap();
        assert_eq!(config.heuristic, Heuristic::Terrain { k: 0.5 });
        assert_eq!(config.solver, SolverKind::AntColony);
        assert_eq!(config.aco.epochs, 10);
        assert_eq!(config.aco.ants, 10);
        assert_eq!(config.threads, 2);
        assert_eq!(config.max_exact_stops, DEFAULT_MAX_STOPS);
    }
}
