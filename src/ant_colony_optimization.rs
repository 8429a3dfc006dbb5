use log::{debug, info};
use rand::{Rng, SeedableRng};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

use crate::distance_matrix::{DistanceMatrix, VertexId};
use crate::errors::PlanError;
use crate::interrupt::Interrupt;
use crate::pathfinding::{add_costs, Cost, UNREACHABLE};
use crate::solvers::Tour;

// Based on the Ant System as described at:
// http://www.scholarpedia.org/article/Ant_colony_optimization
// Every ant deposits on the legs it used, after all of them evaporated.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HyperParams {
    /// Number of rounds of ant simulations to do.
    pub epochs: usize,

    /// 'm' ants that construct solutions at each epoch.
    pub ants: usize,

    /// 'ρ' (rho) used in pheromone (τ) updates, i.e. τ = (1 - ρ) τ + Σ Δτ
    pub evaporation_rate: f64,

    /// 'Q', each ant deposits Δτ = Q / d on every leg of length 'd' it took.
    pub deposit: f64,

    /// 'α' (alpha) applied to the pheromones when sampling: τ^α
    pub pheromone_power: f64,

    /// 'β' (beta) applied to the heuristic η = 1/d when sampling: η^β
    pub heuristic_power: f64,

    /// τ0, pheromone level of every leg before the first epoch.
    pub initial_pheromone: f64,

    /// Seed to use for randomness.
    pub seed: u64,
}

impl Default for HyperParams {
    fn default() -> Self {
        HyperParams {
            epochs: 100,
            ants: 10,
            evaporation_rate: 0.1,
            deposit: 1.0,
            pheromone_power: 1.0,
            heuristic_power: 1.0,
            initial_pheromone: 0.1,
            seed: 42,
        }
    }
}

impl HyperParams {
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.epochs == 0 {
            return Err(invalid("epochs must be at least 1".into()));
        }
        if self.ants == 0 {
            return Err(invalid("ants must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.evaporation_rate) {
            return Err(invalid(format!("evaporation rate {} must be within [0, 1]",
                                       self.evaporation_rate)));
        }
        if !(self.deposit.is_finite() && self.deposit > 0.0) {
            return Err(invalid(format!("deposit {} must be positive", self.deposit)));
        }
        if !(self.pheromone_power.is_finite() && self.pheromone_power >= 0.0) {
            return Err(invalid(format!("pheromone power {} must be non-negative",
                                       self.pheromone_power)));
        }
        if !(self.heuristic_power.is_finite() && self.heuristic_power >= 0.0) {
            return Err(invalid(format!("heuristic power {} must be non-negative",
                                       self.heuristic_power)));
        }
        if !(self.initial_pheromone.is_finite() && self.initial_pheromone > 0.0) {
            return Err(invalid(format!("initial pheromone {} must be positive",
                                       self.initial_pheromone)));
        }
        Ok(())
    }
}

fn invalid(msg: String) -> PlanError {
    PlanError::InvalidConfig(msg)
}

#[derive(Clone, Debug)]
pub struct Ant {
    pub current: VertexId,
    // Vertices after the start, ending with the end vertex once done.
    pub path: Vec<VertexId>,
    pub seen: Vec<bool>,
    /// One unit per move. A finished ant always has `stops + 1` steps, so
    /// ants are ranked by `cost`; the colony only logs this.
    pub steps: u32,
    // Sum of the matrix costs of the legs taken.
    pub cost: Cost,
}

impl Ant {
    pub fn new(num_vertices: usize) -> Self {
        Ant {
            current: 0,
            path: Vec::with_capacity(num_vertices),
            seen: vec![false; num_vertices],
            steps: 0,
            cost: 0,
        }
    }

    pub fn reset(&mut self, start: VertexId) {
        self.current = start;
        self.path.clear();
        self.seen.iter_mut().for_each(|seen| *seen = false);
        self.seen[start] = true;
        self.steps = 0;
        self.cost = 0;
    }

    fn visit(&mut self, vertex: VertexId, matrix: &DistanceMatrix) {
        assert!(!self.seen[vertex], "visiting vertex {vertex} twice");
        self.cost = add_costs(self.cost, matrix.cost(self.current, vertex));
        self.steps += 1;
        self.path.push(vertex);
        self.seen[vertex] = true;
        self.current = vertex;
    }

    // Legs taken, as (from, to).
    fn legs(&self, start: VertexId) -> impl Iterator<Item=(VertexId, VertexId)> + '_ {
        std::iter::once(start).chain(self.path.iter().cloned())
            .zip(self.path.iter().cloned())
    }

    fn to_tour(&self) -> Tour {
        let stops = &self.path[..self.path.len().saturating_sub(1)];
        Tour { order: stops.to_vec(), cost: self.cost }
    }
}

/// Length of a leg for η = 1/d and Δτ = Q/d. Zero-cost legs (a round trip's
/// start -> end, or matrices from `DistanceMatrix::from_costs`) count as one
/// step so neither divides by zero.
#[inline]
fn leg_length(cost: Cost) -> f64 {
    cost.max(1) as f64
}

/// τ for every ordered pair of vertices.
#[derive(Debug, Clone)]
pub struct PheromoneMatrix {
    size: usize,
    // values[from * size + to]
    values: Vec<f64>,
}

impl PheromoneMatrix {
    pub fn new(size: usize, initial: f64) -> Self {
        PheromoneMatrix { size, values: vec![initial; size * size] }
    }

    #[inline]
    pub fn get(&self, from: VertexId, to: VertexId) -> f64 {
        self.values[from * self.size + to]
    }

    /// τ = (1 - ρ) τ + Δτ, for every leg at once.
    pub fn evaporate_add(&mut self, evaporation_rate: f64, deposits: &[f64]) {
        for (tau, delta) in self.values.iter_mut().zip(deposits) {
            *tau = (1.0 - evaporation_rate) * *tau + delta;
        }
    }
}

pub struct Colony<'a> {
    pub hyperparams: HyperParams,
    matrix: &'a DistanceMatrix,
    pheromones: PheromoneMatrix,
    // η^β per leg, 0 for legs that can't be taken.
    eta_pows: Vec<f64>,
    global_best: Option<Ant>,
    rng: SmallRng,
}

impl<'a> Colony<'a> {
    pub fn new(matrix: &'a DistanceMatrix, hyperparams: HyperParams) -> Result<Self, PlanError> {
        hyperparams.validate()?;
        let size = matrix.len();
        let eta_pows = (0..size).flat_map(|from| (0..size).map(move |to| (from, to)))
            .map(|(from, to)| {
                let distance = matrix.cost(from, to);
                if from == to || distance == UNREACHABLE {
                    0.0
                } else {
                    let eta = 1.0 / leg_length(distance);
                    eta.powf(hyperparams.heuristic_power)
                }
            }).collect();
        let seed = hyperparams.seed;
        Ok(Colony {
            pheromones: PheromoneMatrix::new(size, hyperparams.initial_pheromone),
            hyperparams,
            matrix,
            eta_pows,
            global_best: None,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    pub fn pheromones(&self) -> &PheromoneMatrix {
        &self.pheromones
    }

    pub fn run(&mut self, interrupt: &Interrupt) -> Result<Tour, PlanError> {
        for epoch in 0..self.hyperparams.epochs {
            interrupt.check()?;
            self.run_epoch();
            match &self.global_best {
                Some(best) => debug!("ACO epoch #{epoch}/{total}: best global cost {cost}",
                                     epoch = epoch + 1, total = self.hyperparams.epochs,
                                     cost = best.cost),
                None => debug!("ACO epoch #{epoch}/{total}: no ant done yet",
                               epoch = epoch + 1, total = self.hyperparams.epochs),
            }
        }
        // No ant ever made it to the end.
        let best = self.global_best.as_ref().ok_or(PlanError::Infeasible)?;
        info!("[ACO] best cost {} after {} epochs", best.cost, self.hyperparams.epochs);
        Ok(best.to_tour())
    }

    fn run_epoch(&mut self) {
        let ants = self.construct_solutions();
        self.update_trails(&ants);
    }

    fn construct_solutions(&mut self) -> Vec<Ant> {
        // Ants left with only unreachable options are dropped for this epoch.
        let ants: Vec<Ant> = (0..self.hyperparams.ants)
            .filter_map(|_| self.construct_solution())
            .collect();
        // min_by_key keeps the first ant on ties.
        if let Some(local_best) = ants.iter().min_by_key(|ant| ant.cost) {
            debug!("  local best cost: {cost} in {steps} steps ({done}/{total} ants done)",
                   cost = local_best.cost, steps = local_best.steps, done = ants.len(),
                   total = self.hyperparams.ants);
            let improved = match &self.global_best {
                Some(best) => local_best.cost < best.cost,
                None => true,
            };
            if improved {
                self.global_best = Some(local_best.clone());
            }
        }
        ants
    }

    // Stops not seen yet, or the end once every stop is.
    fn options(&self, ant: &Ant) -> Vec<VertexId> {
        let stops: Vec<VertexId> = self.matrix.stop_vertices()
            .filter(|&v| !ant.seen[v]).collect();
        if stops.is_empty() {
            vec![self.matrix.end_vertex()]
        } else {
            stops
        }
    }

    // None when every remaining option is unreachable from where the ant is.
    fn sample_option(&mut self, ant: &Ant) -> Option<VertexId> {
        let size = self.matrix.len();
        let options: Vec<VertexId> = self.options(ant).into_iter()
            .filter(|&to| self.eta_pows[ant.current * size + to] > 0.0)
            .collect();
        if options.is_empty() {
            return None;
        }
        let alpha = self.hyperparams.pheromone_power;
        let weights = options.iter().map(|&to| {
            let tau = self.pheromones.get(ant.current, to);
            tau.powf(alpha) * self.eta_pows[ant.current * size + to]
        });
        match WeightedIndex::new(weights) {
            Ok(distribution) => Some(options[distribution.sample(&mut self.rng)]),
            // Weights all underflowed to 0, any reachable option will do.
            Err(_) => Some(options[self.rng.gen_range(0..options.len())]),
        }
    }

    fn construct_solution(&mut self) -> Option<Ant> {
        let mut ant = Ant::new(self.matrix.len());
        ant.reset(self.matrix.start_vertex());
        while ant.current != self.matrix.end_vertex() {
            let to = self.sample_option(&ant)?;
            ant.visit(to, self.matrix);
        }
        Some(ant)
    }

    fn update_trails(&mut self, ants: &[Ant]) {
        // Reduce all deposits first, then apply them with evaporation.
        let size = self.matrix.len();
        let mut deposits = vec![0.0; size * size];
        let start = self.matrix.start_vertex();
        for ant in ants {
            for (from, to) in ant.legs(start) {
                let distance = leg_length(self.matrix.cost(from, to));
                deposits[from * size + to] += self.hyperparams.deposit / distance;
            }
        }
        self.pheromones.evaporate_add(self.hyperparams.evaporation_rate, &deposits);
    }
}
