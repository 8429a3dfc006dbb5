// Pairwise costs and paths between the start, every stop and the end.
//
// Vertices are indexed {start = 0, stops = 1..=n, end = n + 1}. Both order
// solvers work purely on these indices, and the stitcher turns their answer
// back into grid nodes using the cached parent pointers.

use log::{debug, info, warn};
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

use crate::errors::PlanError;
use crate::grid::{Grid, NodeId};
use crate::interrupt::Interrupt;
use crate::pathfinding::{CameFrom, Cost, Heuristic, Pathfinder, UNREACHABLE};

pub type VertexId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct DistanceEntry {
    pub cost: Cost,
    // Parent pointers for the nodes on the path, toward the pair's first node.
    pub came_from: CameFrom,
}

impl DistanceEntry {
    pub fn unreachable() -> Self {
        DistanceEntry { cost: UNREACHABLE, came_from: CameFrom::default() }
    }

    pub fn diagonal() -> Self {
        DistanceEntry { cost: 0, came_from: CameFrom::default() }
    }

    pub fn is_reachable(&self) -> bool {
        self.cost != UNREACHABLE
    }
}

pub struct DistanceMatrix {
    // Grid node for each vertex.
    nodes: Vec<NodeId>,
    // entries[from * len + to]
    entries: Vec<DistanceEntry>,
}

impl DistanceMatrix {
    /// Searches every ordered pair among `{start} ∪ stops ∪ {end}`, spread over
    /// `threads` workers (0 means one per available core). Unreachable pairs
    /// are stored as `UNREACHABLE`; only an invalid heuristic or cancellation
    /// fails the build.
    pub fn build(
        grid: &Grid, start: NodeId, end: NodeId, stops: &[NodeId],
        heuristic: Heuristic, threads: usize, interrupt: &Interrupt
        ) -> Result<Self, PlanError> {
        let timer = Instant::now();
        let mut nodes = Vec::with_capacity(stops.len() + 2);
        nodes.push(start);
        nodes.extend_from_slice(stops);
        nodes.push(end);
        let len = nodes.len();

        let threads = match threads {
            0 => thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }.min(len);

        // One pathfinder per worker, rejecting a bad heuristic before any search.
        let pathfinders = (0..threads).map(|_| Pathfinder::new(heuristic))
            .collect::<Result<Vec<Pathfinder>, PlanError>>()?;

        let mut entries = vec![DistanceEntry::unreachable(); len * len];
        let mut failure: Option<PlanError> = None;
        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel();
            for (i, mut pathfinder) in pathfinders.into_iter().enumerate() {
                let tx = tx.clone();
                let nodes = &nodes;
                scope.spawn(move || {
                    for source_idx in (i..len).step_by(threads) {
                        let row = Self::search_row(&mut pathfinder, grid, nodes,
                                                   source_idx, interrupt);
                        let stop = row.is_err();
                        // The receiver outlives every worker in this scope.
                        let _ = tx.send((source_idx, row));
                        if stop {
                            break;
                        }
                    }
                });
            }
            drop(tx);  // Drop the last sender, wait until all workers are done.
            while let Ok((source_idx, row)) = rx.recv() {
                match row {
                    Ok(row) => {
                        for (target_idx, entry) in row.into_iter().enumerate() {
                            entries[source_idx * len + target_idx] = entry;
                        }
                    },
                    Err(err) => failure = Some(err),
                }
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }

        let matrix = DistanceMatrix { nodes, entries };
        let unreachable = matrix.unreachable_pairs().len();
        if unreachable > 0 {
            warn!("Distance matrix has {unreachable} unreachable pair(s)");
        }
        info!("Distance matrix built: {len} vertices, {threads} thread(s), took {:?}",
              timer.elapsed());
        Ok(matrix)
    }

    fn search_row(
        pathfinder: &mut Pathfinder, grid: &Grid, nodes: &[NodeId],
        source_idx: VertexId, interrupt: &Interrupt
        ) -> Result<Vec<DistanceEntry>, PlanError> {
        interrupt.check()?;
        let source = nodes[source_idx];
        nodes.iter().enumerate().map(|(target_idx, &target)| {
            if target_idx == source_idx {
                return Ok(DistanceEntry::diagonal());
            }
            let entry = match pathfinder.search(grid, source, target, interrupt)? {
                Some(tree) => DistanceEntry { cost: tree.cost, came_from: tree.came_from },
                None => DistanceEntry::unreachable(),
            };
            debug!("{source_idx} -> {target_idx}: cost {}", entry.cost);
            Ok(entry)
        }).collect()
    }

    /// Matrix without any cached paths, for working on costs alone. Vertex `i`
    /// maps to node id `i`.
    pub fn from_costs(costs: &[Vec<Cost>]) -> Self {
        let len = costs.len();
        assert!(len >= 2, "need at least a start and an end");
        assert!(costs.iter().all(|row| row.len() == len), "matrix must be square");
        let entries = costs.iter().enumerate().flat_map(|(from, row)| {
            row.iter().enumerate().map(move |(to, &cost)| {
                if from == to {
                    DistanceEntry::diagonal()
                } else {
                    DistanceEntry { cost, came_from: CameFrom::default() }
                }
            })
        }).collect();
        DistanceMatrix { nodes: (0..len as NodeId).collect(), entries }
    }

    /// Number of vertices (stops + 2).
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn num_stops(&self) -> usize {
        self.len() - 2
    }

    pub fn start_vertex(&self) -> VertexId {
        0
    }

    pub fn end_vertex(&self) -> VertexId {
        self.len() - 1
    }

    pub fn stop_vertices(&self) -> std::ops::Range<VertexId> {
        1..self.len() - 1
    }

    #[inline]
    pub fn cost(&self, from: VertexId, to: VertexId) -> Cost {
        self.entries[from * self.len() + to].cost
    }

    pub fn entry(&self, from: VertexId, to: VertexId) -> &DistanceEntry {
        &self.entries[from * self.len() + to]
    }

    pub fn node(&self, vertex: VertexId) -> NodeId {
        self.nodes[vertex]
    }

    pub fn unreachable_pairs(&self) -> Vec<(VertexId, VertexId)> {
        (0..self.len())
            .flat_map(|from| (0..self.len()).map(move |to| (from, to)))
            .filter(|&(from, to)| self.cost(from, to) == UNREACHABLE)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::grid::Pos;
    use crate::scenario::parse_map;
    use super::*;

    fn build(grid: &Grid, threads: usize) -> DistanceMatrix {
        DistanceMatrix::build(grid, grid.start().unwrap(), grid.end().unwrap(),
                              grid.stops(), Heuristic::Manhattan, threads,
                              &Interrupt::new()).unwrap()
    }

    #[test]
    fn test_layout_and_diagonal() {
        let grid = parse_map(&[
            "S...",
            ".o..",
            "...o",
            "...E",
        ], Default::default()).unwrap();
        let matrix = build(&grid, 2);
        assert_eq!(matrix.len(), 4);
        assert_eq!(matrix.num_stops(), 2);
        assert_eq!(matrix.node(0), grid.start().unwrap());
        assert_eq!(matrix.node(3), grid.end().unwrap());
        assert_eq!(matrix.stop_vertices(), 1..3);
        for v in 0..4 {
            assert_eq!(matrix.entry(v, v), &DistanceEntry::diagonal());
        }
        // start (0,0) -> stop (1,1)
        assert_eq!(matrix.cost(0, 1), 2);
        // stop (2,3) -> end (3,3)
        assert_eq!(matrix.cost(2, 3), 1);
        assert!(matrix.unreachable_pairs().is_empty());
    }

    #[test]
    fn test_thread_count_does_not_change_result() {
        let grid = parse_map(&[
            "S..#....",
            ".#.#.o#.",
            ".#...#..",
            "o#.##..o",
            "...o...E",
        ], Default::default()).unwrap();
        let single = build(&grid, 1);
        let many = build(&grid, 8);
        for from in 0..single.len() {
            for to in 0..single.len() {
                assert_eq!(single.entry(from, to), many.entry(from, to));
            }
        }
    }

    #[test]
    fn test_cached_paths_follow_parent_pointers() {
        let grid = parse_map(&[
            "S.#..",
            "..#o.",
            ".....",
            "....E",
        ], Default::default()).unwrap();
        let matrix = build(&grid, 0);
        let entry = matrix.entry(0, 1);
        let mut current = matrix.node(1);
        let mut steps = 0;
        while current != matrix.node(0) {
            current = entry.came_from[&current];
            steps += 1;
        }
        assert_eq!(steps, entry.cost);
    }

    #[test]
    fn test_unreachable_pairs_do_not_abort() {
        let grid = parse_map(&[
            "S.#.o",
            "..###",
            "....E",
        ], Default::default()).unwrap();
        let matrix = build(&grid, 2);
        let stop = 1;
        assert_eq!(matrix.cost(0, stop), UNREACHABLE);
        assert_eq!(matrix.cost(stop, 2), UNREACHABLE);
        assert_eq!(matrix.cost(0, 2), 6);
        assert_eq!(matrix.unreachable_pairs(), vec![(0, 1), (1, 0), (1, 2), (2, 1)]);
        assert!(!matrix.entry(0, 1).is_reachable());
    }

    #[test]
    fn test_cancelled_build() {
        let grid = Grid::new(4, 4);
        let interrupt = Interrupt::new();
        interrupt.cancel();
        let stops = [grid.id(&Pos::new(1, 1)).unwrap()];
        let result = DistanceMatrix::build(&grid, 0, 15, &stops, Heuristic::Manhattan,
                                           2, &interrupt);
        assert!(matches!(result, Err(PlanError::Cancelled)));
    }

    #[test]
    fn test_invalid_heuristic_is_rejected_before_searching() {
        let grid = parse_map(&[
            "S.o",
            "..E",
        ], Default::default()).unwrap();
        let result = DistanceMatrix::build(&grid, grid.start().unwrap(), grid.end().unwrap(),
                                           grid.stops(), Heuristic::Terrain { k: 7.5 }, 2,
                                           &Interrupt::new());
        assert!(matches!(result, Err(PlanError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_costs() {
        let matrix = DistanceMatrix::from_costs(&[
            vec![0, 3, 9],
            vec![3, 0, UNREACHABLE],
            vec![9, 4, 0],
        ]);
        assert_eq!(matrix.num_stops(), 1);
        assert_eq!(matrix.cost(0, 1), 3);
        assert_eq!(matrix.cost(1, 2), UNREACHABLE);
        assert_eq!(matrix.unreachable_pairs(), vec![(1, 2)]);
    }
}
