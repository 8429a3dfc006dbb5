// Stop-order solvers. Each one takes the pairwise distance matrix and picks
// the order in which to visit the stops between the fixed start and end.
//
// ExactSolver is optimal but exponential in the number of stops.
// AntColonySolver is approximate, and scales to many more stops.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::ant_colony_optimization::{Colony, HyperParams};
use crate::distance_matrix::{DistanceMatrix, VertexId};
use crate::errors::PlanError;
use crate::held_karp::{HeldKarp, DEFAULT_MAX_STOPS};
use crate::interrupt::Interrupt;
use crate::pathfinding::{add_costs, Cost, UNREACHABLE};

/// Visiting order of the stops (matrix vertices, start and end excluded), and
/// the total cost of start -> stops -> end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tour {
    pub order: Vec<VertexId>,
    pub cost: Cost,
}

impl Tour {
    /// Cost of visiting `order` between start and end, `UNREACHABLE` if any
    /// leg is.
    pub fn evaluate(matrix: &DistanceMatrix, order: &[VertexId]) -> Cost {
        let vertices = Self::with_endpoints(matrix, order);
        vertices.windows(2)
            .fold(0, |total, leg| add_costs(total, matrix.cost(leg[0], leg[1])))
    }

    /// Start, every stop in order, then end.
    pub fn vertices(&self, matrix: &DistanceMatrix) -> Vec<VertexId> {
        Self::with_endpoints(matrix, &self.order)
    }

    fn with_endpoints(matrix: &DistanceMatrix, order: &[VertexId]) -> Vec<VertexId> {
        let mut vertices = Vec::with_capacity(order.len() + 2);
        vertices.push(matrix.start_vertex());
        vertices.extend_from_slice(order);
        vertices.push(matrix.end_vertex());
        vertices
    }

    /// Checks the tour visits every stop once and that its cost adds up.
    pub fn verify(&self, matrix: &DistanceMatrix) {
        let mut seen = vec![false; matrix.len()];
        for &v in &self.order {
            assert!(matrix.stop_vertices().contains(&v), "{v} is not a stop");
            assert!(!seen[v], "stop {v} visited twice");
            seen[v] = true;
        }
        assert_eq!(self.order.len(), matrix.num_stops(), "not every stop visited");
        let cost = Self::evaluate(matrix, &self.order);
        assert!(cost == self.cost, "Tour would give cost {}, but we got {}",
                cost, self.cost);
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SolverKind {
    /// Held-Karp dynamic program, optimal.
    #[default]
    Exact,
    /// Ant colony optimization, approximate.
    AntColony,
}

pub trait Solver {
    // Name to display for this solver.
    fn name(&self) -> &str;

    // Implementation of the solver.
    fn do_solve(
        &mut self, matrix: &DistanceMatrix, interrupt: &Interrupt
        ) -> Result<Tour, PlanError>;

    // Wrapper to do_solve, to log timing and cost information.
    fn solve(
        &mut self, matrix: &DistanceMatrix, interrupt: &Interrupt
        ) -> Result<Tour, PlanError> {
        let start = Instant::now();
        let tour = self.do_solve(matrix, interrupt);
        info!("Solver {} took {:?}", self.name(), start.elapsed());
        match &tour {
            Ok(tour) => info!("Solver {} found a tour of cost {} through {} stops",
                              self.name(), tour.cost, tour.order.len()),
            Err(err) => warn!("Solver {} did NOT find a tour: {err}", self.name()),
        };
        tour
    }
}

// Solves the stop order exactly with Held-Karp. Memory grows as 2^n, so this
// refuses more than `max_stops` stops.
pub struct ExactSolver {
    held_karp: HeldKarp,
}

// Solve using Ant Colony Optimization to find a solution.
// It runs epochs of sampling and simulating "ants" that leave pheromones on
// short legs.
pub struct AntColonySolver {
    hyperparams: HyperParams,
}

impl ExactSolver {
    pub fn new(max_stops: usize) -> Self {
        ExactSolver { held_karp: HeldKarp::new(max_stops) }
    }
}

impl Default for ExactSolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STOPS)
    }
}

impl Solver for ExactSolver {
    fn name(&self) -> &str {
        "exact"
    }

    fn do_solve(
        &mut self, matrix: &DistanceMatrix, interrupt: &Interrupt
        ) -> Result<Tour, PlanError> {
        self.held_karp.solve(matrix, interrupt)
    }
}

impl AntColonySolver {
    /// Fails on non-physical hyperparams, before anything runs.
    pub fn new(hyperparams: HyperParams) -> Result<Self, PlanError> {
        hyperparams.validate()?;
        Ok(AntColonySolver { hyperparams })
    }
}

impl Default for AntColonySolver {
    fn default() -> Self {
        AntColonySolver { hyperparams: HyperParams::default() }
    }
}

impl Solver for AntColonySolver {
    fn name(&self) -> &str {
        "ant-colony"
    }

    fn do_solve(
        &mut self, matrix: &DistanceMatrix, interrupt: &Interrupt
        ) -> Result<Tour, PlanError> {
        let mut colony = Colony::new(matrix, self.hyperparams.clone())?;
        colony.run(interrupt)
    }
}

pub fn new_solver(
    kind: SolverKind, hyperparams: &HyperParams, max_exact_stops: usize
    ) -> Result<Box<dyn Solver>, PlanError> {
    Ok(match kind {
        SolverKind::Exact => Box::new(ExactSolver::new(max_exact_stops)),
        SolverKind::AntColony => Box::new(AntColonySolver::new(hyperparams.clone())?),
    })
}

/// True when some leg between two required vertices has no path. On a
/// 4-connected grid this means some stop (or the end) is walled off, so no
/// order can work.
pub fn has_unreachable_leg(matrix: &DistanceMatrix) -> bool {
    (0..matrix.len()).any(|from| (0..matrix.len())
        .any(|to| from != to && to != matrix.start_vertex()
             && from != matrix.end_vertex()
             && matrix.cost(from, to) == UNREACHABLE))
}
