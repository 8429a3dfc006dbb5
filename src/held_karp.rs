// Exact solver for the stop order with the Held-Karp algorithm, on an open
// path from a fixed start to a fixed end (rather than a closed tour).
// See https://en.wikipedia.org/wiki/Held%E2%80%93Karp_algorithm
//
// Essentially, we compute g(S, e), "what's the shortest path from the start
// going through every stop in 'S', ending at stop 'e' (in 'S')". With |S|=1 it
// is the direct cost from the start to 'e', and we get the next size by trying
// every possible before-last stop and picking the smallest.
//
// The answer is g(all stops, e) + cost(e, end) for the 'e' that gives the
// smallest total.

use itertools::Itertools;
use log::debug;

use crate::distance_matrix::{DistanceMatrix, VertexId};
use crate::errors::PlanError;
use crate::interrupt::Interrupt;
use crate::pathfinding::{add_costs, Cost, UNREACHABLE};
use crate::solvers::Tour;

pub const DEFAULT_MAX_STOPS: usize = 16;
// Tables hold n * 2^n entries: at 20 stops, ~84MB for `g` and ~21MB for `p`.
pub const MAX_STOPS: usize = 20;

// Predecessor of the first stop of a path.
const FROM_START: u8 = u8::MAX;

/// Set of stops, bit 'i' for stop index 'i' (matrix vertex i + 1).
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug)]
struct Mask(u32);

impl Mask {
    fn from_set(set: &[usize]) -> Mask {
        let mut mask = 0u32;
        for &v in set {
            mask |= 1 << (v as u32);
        }
        Mask(mask)
    }

    fn single(v: usize) -> Mask {
        Mask(1 << (v as u32))
    }

    fn full(size: usize) -> Mask {
        Mask(((1u64 << size) - 1) as u32)
    }

    fn without(self, v: usize) -> Mask {
        Mask(self.0 & !(1 << (v as u32)))
    }
}

#[inline]
fn stop_vertex(stop: usize) -> VertexId {
    stop + 1
}

pub struct HeldKarp {
    max_stops: usize,
    num_stops: usize,
    /// g(S, e) min cost from the start through all stops in 'S', ending in 'e'.
    /// g[mask * num_stops + e]
    g: Vec<Cost>,
    /// p(S, e) predecessor of 'e' on that path. Used when backtracking.
    /// p[mask * num_stops + e], stop indices fit in a u8 below MAX_STOPS.
    p: Vec<u8>,
}

impl HeldKarp {
    pub fn new(max_stops: usize) -> Self {
        HeldKarp {
            max_stops: max_stops.min(MAX_STOPS),
            num_stops: 0,
            g: Vec::new(),
            p: Vec::new(),
        }
    }

    #[inline]
    fn index(&self, mask: Mask, e: usize) -> usize {
        (mask.0 as usize) * self.num_stops + e
    }

    pub fn solve(
        &mut self, matrix: &DistanceMatrix, interrupt: &Interrupt
        ) -> Result<Tour, PlanError> {
        let n = matrix.num_stops();
        if n > self.max_stops {
            return Err(PlanError::TooManyStops { stops: n, max: self.max_stops });
        }
        let start = matrix.start_vertex();
        let end = matrix.end_vertex();
        if n == 0 {
            let cost = matrix.cost(start, end);
            if cost == UNREACHABLE {
                return Err(PlanError::Infeasible);
            }
            return Ok(Tour { order: Vec::new(), cost });
        }

        self.num_stops = n;
        self.g = vec![UNREACHABLE; n << n];
        self.p = vec![FROM_START; n << n];

        // For |S|=1 (S={k}), smallest cost is the cost of start->k.
        for k in 0..n {
            let idx = self.index(Mask::single(k), k);
            self.g[idx] = matrix.cost(start, stop_vertex(k));
        }

        // For |S|=s, smallest cost depends on |S'|=s-1 values of g(S', m).
        for s in 2..=n {
            interrupt.check()?;
            for set in (0..n).combinations(s) {
                let mask = Mask::from_set(&set);
                for &k in &set {
                    let mask_minus_k = mask.without(k);
                    let best = set.iter().cloned().filter(|&m| m != k).map(|m| {
                        let current_cost = self.g[self.index(mask_minus_k, m)];
                        let m_k_cost = matrix.cost(stop_vertex(m), stop_vertex(k));
                        (add_costs(current_cost, m_k_cost), m)
                    }).min_by_key(|&(cost, _)| cost);
                    if let Some((min_cost, min_stop)) = best {
                        let idx = self.index(mask, k);
                        self.g[idx] = min_cost;
                        self.p[idx] = min_stop as u8;
                    }
                }
            }
            debug!("Held-Karp: subsets of size {s}/{n} done");
        }

        // Find the best path by checking the last leg to the end.
        let full = Mask::full(n);
        let (total_cost, last) = (0..n).map(|k| {
            let current_cost = self.g[self.index(full, k)];
            (add_costs(current_cost, matrix.cost(stop_vertex(k), end)), k)
        }).min_by_key(|&(cost, _)| cost).ok_or(PlanError::Infeasible)?;
        if total_cost == UNREACHABLE {
            return Err(PlanError::Infeasible);
        }

        let order = self.backtrack(full, last).into_iter().map(stop_vertex).collect();
        Ok(Tour { order, cost: total_cost })
    }

    // Follow predecessors from g(S, last) back to the start.
    fn backtrack(&self, set: Mask, last: usize) -> Vec<usize> {
        let mut stops = Vec::with_capacity(self.num_stops);
        let mut mask = set;
        let mut stop = last;
        loop {
            stops.push(stop);
            let prev = self.p[self.index(mask, stop)];
            if prev == FROM_START {
                break;
            }
            mask = mask.without(stop);
            stop = prev as usize;
        }
        stops.reverse();
        stops
    }
}
