use log::{debug, trace};
use priority_queue::PriorityQueue;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::errors::PlanError;
use crate::grid::{manhattan_distance, Grid, NodeId};
use crate::interrupt::Interrupt;

/// Number of unit steps along a path.
pub type Cost = u32;

/// Sentinel for "no path exists".
pub const UNREACHABLE: Cost = Cost::MAX;

/// Sum of two costs where `UNREACHABLE` absorbs everything.
#[inline]
pub fn add_costs(a: Cost, b: Cost) -> Cost {
    if a == UNREACHABLE || b == UNREACHABLE {
        UNREACHABLE
    } else {
        a.checked_add(b).unwrap_or(UNREACHABLE)
    }
}

// Child -> parent, toward the start of the search.
pub type CameFrom = FxHashMap<NodeId, NodeId>;

/// Estimate of the remaining cost used to order the frontier.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "kebab-case", tag = "mode")]
pub enum Heuristic {
    /// Manhattan distance, admissible on a 4-connected unit-cost grid.
    Manhattan,
    /// `|terrain diff|^k * manhattan^(1-k)`. Not admissible for every `k`, so
    /// paths found in this mode may be longer than the shortest one.
    Terrain { k: f64 },
}

impl Default for Heuristic {
    fn default() -> Self {
        Heuristic::Manhattan
    }
}

impl Heuristic {
    pub fn terrain(k: f64) -> Result<Self, PlanError> {
        let heuristic = Heuristic::Terrain { k };
        heuristic.validate()?;
        Ok(heuristic)
    }

    pub fn validate(&self) -> Result<(), PlanError> {
        match self {
            Heuristic::Manhattan => Ok(()),
            Heuristic::Terrain { k } if (0.0..=1.0).contains(k) => Ok(()),
            Heuristic::Terrain { k } => Err(PlanError::InvalidConfig(
                format!("terrain blend k={k} must be within [0, 1]"))),
        }
    }

    pub fn estimate(&self, grid: &Grid, from: NodeId, to: NodeId) -> f64 {
        let manhattan = manhattan_distance(&grid.pos(from), &grid.pos(to)) as f64;
        match self {
            Heuristic::Manhattan => manhattan,
            Heuristic::Terrain { k } => {
                let diff = grid.terrain(from).abs_diff(grid.terrain(to)) as f64;
                diff.powf(*k) * manhattan.powf(1.0 - k)
            },
        }
    }
}

/// Frontier priority: lowest f first, then lowest insertion sequence.
#[derive(Debug, Clone, Copy)]
struct Priority {
    f: f64,
    seq: u64,
}

impl PartialEq for Priority {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Priority {}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    // PriorityQueue pops the max, so both keys are reversed.
    fn cmp(&self, other: &Self) -> Ordering {
        other.f.total_cmp(&self.f).then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Membership {
    Unseen,
    Open,
    Closed,
}

// Per-node search bookkeeping, indexed by node id.
#[derive(Debug, Clone, Copy)]
struct NodeState {
    g: Cost,
    parent: Option<NodeId>,
    membership: Membership,
}

impl Default for NodeState {
    fn default() -> Self {
        NodeState { g: UNREACHABLE, parent: None, membership: Membership::Unseen }
    }
}

/// Read-only view of the search, handed to observers after every step.
pub struct SearchSnapshot<'a> {
    pub current: NodeId,
    states: &'a [NodeState],
}

impl<'a> SearchSnapshot<'a> {
    pub fn is_open(&self, id: NodeId) -> bool {
        self.states[id as usize].membership == Membership::Open
    }

    pub fn is_closed(&self, id: NodeId) -> bool {
        self.states[id as usize].membership == Membership::Closed
    }

    pub fn open_nodes(&self) -> Vec<NodeId> {
        self.collect(Membership::Open)
    }

    pub fn closed_nodes(&self) -> Vec<NodeId> {
        self.collect(Membership::Closed)
    }

    fn collect(&self, membership: Membership) -> Vec<NodeId> {
        self.states.iter().enumerate()
            .filter(|(_, state)| state.membership == membership)
            .map(|(id, _)| id as NodeId)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub steps: Vec<NodeId>,
    pub cost: Cost,
    pub goal: NodeId,
}

/// Result of a successful search: the cost and the parent pointers of every
/// node on the path, enough to rebuild it without searching again.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchTree {
    pub start: NodeId,
    pub goal: NodeId,
    pub cost: Cost,
    pub came_from: CameFrom,
}

impl SearchTree {
    pub fn path(&self) -> Path {
        let mut steps = Vec::with_capacity(self.cost as usize + 1);
        let mut current = self.goal;
        steps.push(current);
        while current != self.start {
            current = self.came_from[&current];
            steps.push(current);
        }
        steps.reverse();
        Path { steps, cost: self.cost, goal: self.goal }
    }
}

pub struct Pathfinder {
    heuristic: Heuristic,
    states: Vec<NodeState>,
    frontier: PriorityQueue<NodeId, Priority>,
}

impl Pathfinder {
    /// Fails on a terrain blend outside `[0, 1]`, before anything is searched.
    pub fn new(heuristic: Heuristic) -> Result<Self, PlanError> {
        heuristic.validate()?;
        Ok(Pathfinder {
            heuristic,
            states: Vec::new(),
            frontier: PriorityQueue::new(),
        })
    }

    pub fn heuristic(&self) -> Heuristic {
        self.heuristic
    }

    /// A* from `start` to `goal`. `Ok(None)` means unreachable; the only error
    /// is `Cancelled`.
    pub fn search(
        &mut self, grid: &Grid, start: NodeId, goal: NodeId,
        interrupt: &Interrupt
        ) -> Result<Option<SearchTree>, PlanError> {
        self.search_observed(grid, start, goal, interrupt, |_| {})
    }

    /// Same as `search`, calling `observer` after every pop/relax step.
    pub fn search_observed<F>(
        &mut self, grid: &Grid, start: NodeId, goal: NodeId,
        interrupt: &Interrupt, mut observer: F
        ) -> Result<Option<SearchTree>, PlanError>
    where
        F: FnMut(&SearchSnapshot),
    {
        debug_assert!(!grid.is_adjacency_stale(),
                      "build_adjacency must run before searching");
        self.states.clear();
        self.states.resize(grid.len(), NodeState::default());
        self.frontier.clear();

        let mut seq: u64 = 0;
        self.states[start as usize].g = 0;
        self.states[start as usize].membership = Membership::Open;
        let f = self.heuristic.estimate(grid, start, goal);
        self.frontier.push(start, Priority { f, seq });

        while let Some((current, _)) = self.frontier.pop() {
            interrupt.check()?;
            self.states[current as usize].membership = Membership::Closed;
            if current == goal {
                return Ok(Some(self.reconstruct(start, goal)));
            }

            let cost = self.states[current as usize].g;
            for &next in grid.neighbors(current) {
                let state = &mut self.states[next as usize];
                if state.membership == Membership::Closed {
                    continue;
                }
                let new_cost = cost + 1;
                if new_cost < state.g {
                    state.g = new_cost;
                    state.parent = Some(current);
                    state.membership = Membership::Open;
                    seq += 1;
                    let f = new_cost as f64 + self.heuristic.estimate(grid, next, goal);
                    // Re-pushing an open node updates its priority in place.
                    self.frontier.push(next, Priority { f, seq });
                }
            }

            observer(&SearchSnapshot { current, states: &self.states });
        }
        trace!("No path from {:?} to {:?}", grid.pos(start), grid.pos(goal));
        Ok(None)
    }

    fn reconstruct(&self, start: NodeId, goal: NodeId) -> SearchTree {
        let mut came_from = CameFrom::default();
        let mut current = goal;
        while current != start {
            let parent = self.states[current as usize].parent
                .expect("closed node other than start without parent");
            came_from.insert(current, parent);
            current = parent;
        }
        let cost = self.states[goal as usize].g;
        debug!("Path {:?} -> {:?} costs {}", start, goal, cost);
        SearchTree { start, goal, cost, came_from }
    }

    pub fn shortest_path(
        &mut self, grid: &Grid, start: NodeId, goal: NodeId,
        interrupt: &Interrupt
        ) -> Result<Option<Path>, PlanError> {
        Ok(self.search(grid, start, goal, interrupt)?.map(|tree| tree.path()))
    }

    /// Cost only, `UNREACHABLE` if there is no path.
    pub fn distance(
        &mut self, grid: &Grid, start: NodeId, goal: NodeId,
        interrupt: &Interrupt
        ) -> Result<Cost, PlanError> {
        Ok(self.search(grid, start, goal, interrupt)?
           .map_or(UNREACHABLE, |tree| tree.cost))
    }
}
