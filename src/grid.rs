use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::PlanError;

pub type NodeId = u32;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Ord, PartialOrd, Copy, Clone)]
pub struct Pos {
    pub row: u16,
    pub col: u16,
}

impl Pos {
    pub fn new(row: u16, col: u16) -> Self {
        Pos { row, col }
    }
}

pub fn manhattan_distance(a: &Pos, b: &Pos) -> u32 {
    ((a.row as i32) - (b.row as i32)).unsigned_abs()
        + ((a.col as i32) - (b.col as i32)).unsigned_abs()
}

/// What a cell currently shows. Independent from its terrain level: a `Free`
/// cell can sit on a hill.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Copy, Clone)]
pub enum NodeKind {
    Start,
    End,
    Obstacle,
    Free,
    Open,
    Closed,
    OnPath,
    Stop,
}

impl NodeKind {
    /// Kinds set by the user (as opposed to search/route presentation marks).
    pub fn is_landmark(&self) -> bool {
        matches!(self, NodeKind::Start | NodeKind::End | NodeKind::Stop)
    }

    fn is_mark(&self) -> bool {
        matches!(self, NodeKind::Open | NodeKind::Closed | NodeKind::OnPath)
    }
}

/// Terrain levels go from 0 to `max_level`, in increments of `step`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Copy, Clone)]
pub struct TerrainConfig {
    pub max_level: u32,
    pub step: u32,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        TerrainConfig { max_level: 50, step: 10 }
    }
}

impl TerrainConfig {
    /// Snaps a level down to a multiple of `step`, within `[0, max_level]`.
    pub fn quantize(&self, level: u32) -> u32 {
        let level = level.min(self.max_level);
        if self.step == 0 {
            level
        } else {
            level - level % self.step
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub pos: Pos,
    pub kind: NodeKind,
    pub terrain: u32,
}

// 4-connected grid, so at most 4 neighbors.
type Neighbors = ArrayVec<NodeId, 4>;

pub struct Grid {
    rows: u16,
    cols: u16,
    terrain_config: TerrainConfig,
    // nodes[row * cols + col], the index is the node id.
    nodes: Vec<Node>,
    neighbors: Vec<Neighbors>,
    start: Option<NodeId>,
    end: Option<NodeId>,
    // In the order they were placed.
    stops: Vec<NodeId>,
    // Set when obstacles changed since the last `build_adjacency`.
    stale_adjacency: bool,
}

impl Grid {
    pub fn new(rows: u16, cols: u16) -> Self {
        Grid::with_terrain(rows, cols, TerrainConfig::default())
    }

    pub fn with_terrain(rows: u16, cols: u16, terrain_config: TerrainConfig) -> Self {
        let nodes: Vec<Node> = (0..rows).flat_map(|row| (0..cols).map(move |col| {
            Node {
                id: (row as NodeId) * (cols as NodeId) + (col as NodeId),
                pos: Pos { row, col },
                kind: NodeKind::Free,
                terrain: 0,
            }
        })).collect();
        let mut grid = Grid {
            rows,
            cols,
            terrain_config,
            neighbors: vec![Neighbors::new(); nodes.len()],
            nodes,
            start: None,
            end: None,
            stops: Vec::new(),
            stale_adjacency: true,
        };
        grid.build_adjacency();
        grid
    }

    pub fn rows(&self) -> u16 {
        self.rows
    }

    pub fn cols(&self) -> u16 {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn terrain_config(&self) -> &TerrainConfig {
        &self.terrain_config
    }

    pub fn within_bounds(&self, pos: &Pos) -> bool {
        pos.row < self.rows && pos.col < self.cols
    }

    /// Bounds-checked lookup of the node id at a position.
    pub fn id(&self, pos: &Pos) -> Option<NodeId> {
        if self.within_bounds(pos) {
            Some((pos.row as NodeId) * (self.cols as NodeId) + (pos.col as NodeId))
        } else {
            None
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    pub fn node_at(&self, pos: &Pos) -> Option<&Node> {
        self.id(pos).map(|id| self.node(id))
    }

    #[inline]
    pub fn pos(&self, id: NodeId) -> Pos {
        self.nodes[id as usize].pos
    }

    #[inline]
    pub fn terrain(&self, id: NodeId) -> u32 {
        self.nodes[id as usize].terrain
    }

    pub fn nodes(&self) -> impl Iterator<Item=&Node> + '_ {
        self.nodes.iter()
    }

    /// Adjacent, in-bounds, non-obstacle nodes. Only valid after
    /// `build_adjacency` ran on the current obstacle layout.
    #[inline]
    pub fn neighbors(&self, id: NodeId) -> &[NodeId] {
        &self.neighbors[id as usize]
    }

    pub fn is_adjacency_stale(&self) -> bool {
        self.stale_adjacency
    }

    pub fn start(&self) -> Option<NodeId> {
        self.start
    }

    pub fn end(&self) -> Option<NodeId> {
        self.end
    }

    pub fn stops(&self) -> &[NodeId] {
        &self.stops
    }

    /// Recomputes every neighbor list from the obstacle layout. Idempotent.
    pub fn build_adjacency(&mut self) {
        const DELTAS: [(i32, i32); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
        for id in 0..self.nodes.len() {
            self.neighbors[id].clear();
            if self.nodes[id].kind == NodeKind::Obstacle {
                continue;
            }
            let pos = self.nodes[id].pos;
            for (dr, dc) in DELTAS {
                let row = pos.row as i32 + dr;
                let col = pos.col as i32 + dc;
                if row < 0 || col < 0 {
                    continue;
                }
                let neighbor = Pos { row: row as u16, col: col as u16 };
                if let Some(neighbor_id) = self.id(&neighbor) {
                    if self.nodes[neighbor_id as usize].kind != NodeKind::Obstacle {
                        self.neighbors[id].push(neighbor_id);
                    }
                }
            }
        }
        self.stale_adjacency = false;
    }

    fn checked_id(&self, pos: &Pos) -> Result<NodeId, PlanError> {
        self.id(pos).ok_or_else(|| PlanError::InvalidRequest(
            format!("{pos:?} is outside the {}x{} grid", self.rows, self.cols)))
    }

    // Forget any landmark role a node had, leaving its kind as-is.
    fn release(&mut self, id: NodeId) {
        if self.start == Some(id) {
            self.start = None;
        }
        if self.end == Some(id) {
            self.end = None;
        }
        self.stops.retain(|&stop| stop != id);
    }

    fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
        let old = self.nodes[id as usize].kind;
        if (old == NodeKind::Obstacle) != (kind == NodeKind::Obstacle) {
            self.stale_adjacency = true;
        }
        self.nodes[id as usize].kind = kind;
    }

    pub fn set_start(&mut self, pos: &Pos) -> Result<NodeId, PlanError> {
        let id = self.checked_id(pos)?;
        if let Some(previous) = self.start {
            self.set_kind(previous, NodeKind::Free);
        }
        self.release(id);
        self.set_kind(id, NodeKind::Start);
        self.start = Some(id);
        Ok(id)
    }

    pub fn set_end(&mut self, pos: &Pos) -> Result<NodeId, PlanError> {
        let id = self.checked_id(pos)?;
        if let Some(previous) = self.end {
            self.set_kind(previous, NodeKind::Free);
        }
        self.release(id);
        self.set_kind(id, NodeKind::End);
        self.end = Some(id);
        Ok(id)
    }

    /// Appends a stop. Placing a stop twice keeps its first position in order.
    pub fn add_stop(&mut self, pos: &Pos) -> Result<NodeId, PlanError> {
        let id = self.checked_id(pos)?;
        if self.stops.contains(&id) {
            return Ok(id);
        }
        self.release(id);
        self.set_kind(id, NodeKind::Stop);
        self.stops.push(id);
        Ok(id)
    }

    pub fn set_obstacle(&mut self, pos: &Pos) -> Result<NodeId, PlanError> {
        let id = self.checked_id(pos)?;
        self.release(id);
        self.set_kind(id, NodeKind::Obstacle);
        Ok(id)
    }

    /// Back to a plain free cell: no role, no terrain.
    pub fn clear_cell(&mut self, pos: &Pos) -> Result<NodeId, PlanError> {
        let id = self.checked_id(pos)?;
        self.release(id);
        self.set_kind(id, NodeKind::Free);
        self.nodes[id as usize].terrain = 0;
        Ok(id)
    }

    pub fn set_terrain(&mut self, pos: &Pos, level: u32) -> Result<u32, PlanError> {
        let id = self.checked_id(pos)?;
        let level = self.terrain_config.quantize(level);
        self.nodes[id as usize].terrain = level;
        Ok(level)
    }

    pub fn raise_terrain(&mut self, pos: &Pos) -> Result<u32, PlanError> {
        let id = self.checked_id(pos)?;
        let level = self.nodes[id as usize].terrain + self.terrain_config.step;
        self.set_terrain(pos, level)
    }

    pub fn lower_terrain(&mut self, pos: &Pos) -> Result<u32, PlanError> {
        let id = self.checked_id(pos)?;
        let level = self.nodes[id as usize].terrain
            .saturating_sub(self.terrain_config.step);
        self.set_terrain(pos, level)
    }

    /// Clears every cell, role and terrain level.
    pub fn reset(&mut self) {
        for node in self.nodes.iter_mut() {
            node.kind = NodeKind::Free;
            node.terrain = 0;
        }
        self.start = None;
        self.end = None;
        self.stops.clear();
        self.build_adjacency();
    }

    /// Removes search and route marks, keeping landmarks and obstacles.
    pub fn clear_marks(&mut self) {
        for node in self.nodes.iter_mut() {
            if node.kind.is_mark() {
                node.kind = NodeKind::Free;
            }
        }
    }

    /// Marks every node of a route as `OnPath`, except landmarks.
    pub fn mark_route(&mut self, route: &[NodeId]) {
        for &id in route {
            let node = &mut self.nodes[id as usize];
            if !node.kind.is_landmark() && node.kind != NodeKind::Obstacle {
                node.kind = NodeKind::OnPath;
            }
        }
    }

    /// Paints an open/closed snapshot from the search engine.
    pub fn mark_search(&mut self, open: &[NodeId], closed: &[NodeId]) {
        let marks = closed.iter().map(|&id| (id, NodeKind::Closed))
            .chain(open.iter().map(|&id| (id, NodeKind::Open)));
        for (id, kind) in marks {
            let node = &mut self.nodes[id as usize];
            if node.kind == NodeKind::Free || node.kind.is_mark() {
                node.kind = kind;
            }
        }
    }
}

impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.rows {
            for col in 0..self.cols {
                let node = &self.nodes[(row as usize) * (self.cols as usize) + (col as usize)];
                let c = match node.kind {
                    NodeKind::Start => 'S',
                    NodeKind::End => 'E',
                    NodeKind::Obstacle => '#',
                    NodeKind::Stop => 'o',
                    NodeKind::Open => '+',
                    NodeKind::Closed => 'x',
                    NodeKind::OnPath => '*',
                    NodeKind::Free if node.terrain > 0 && self.terrain_config.step > 0 => {
                        let level = (node.terrain / self.terrain_config.step).min(9);
                        char::from_digit(level, 10).unwrap_or('?')
                    },
                    NodeKind::Free => '.',
                };
                write!(f, "{c}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_row_major_and_bounds_checked() {
        let grid = Grid::new(3, 4);
        assert_eq!(grid.len(), 12);
        assert_eq!(grid.id(&Pos::new(0, 0)), Some(0));
        assert_eq!(grid.id(&Pos::new(2, 3)), Some(11));
        assert_eq!(grid.id(&Pos::new(3, 0)), None);
        assert_eq!(grid.id(&Pos::new(0, 4)), None);
        assert_eq!(grid.pos(6), Pos::new(1, 2));
    }

    #[test]
    fn test_corner_and_center_neighbors() {
        let grid = Grid::new(3, 3);
        assert_eq!(grid.neighbors(0).len(), 2);
        assert_eq!(grid.neighbors(4).len(), 4);
        assert_eq!(grid.neighbors(4), &[1, 7, 3, 5]);
    }

    #[test]
    fn test_obstacles_have_no_edges() {
        let mut grid = Grid::new(3, 3);
        let wall = grid.set_obstacle(&Pos::new(1, 1)).unwrap();
        assert!(grid.is_adjacency_stale());
        grid.build_adjacency();
        assert!(!grid.is_adjacency_stale());
        assert!(grid.neighbors(wall).is_empty());
        for id in 0..grid.len() as NodeId {
            assert!(!grid.neighbors(id).contains(&wall));
        }
        // Idempotent.
        let before: Vec<Vec<NodeId>> = (0..9).map(|id| grid.neighbors(id).to_vec()).collect();
        grid.build_adjacency();
        let after: Vec<Vec<NodeId>> = (0..9).map(|id| grid.neighbors(id).to_vec()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_terrain_is_quantized_and_capped() {
        let mut grid = Grid::new(2, 2);
        let pos = Pos::new(0, 1);
        assert_eq!(grid.set_terrain(&pos, 27).unwrap(), 20);
        assert_eq!(grid.set_terrain(&pos, 500).unwrap(), 50);
        assert_eq!(grid.raise_terrain(&pos).unwrap(), 50);
        assert_eq!(grid.lower_terrain(&pos).unwrap(), 40);
        grid.set_terrain(&pos, 0).unwrap();
        assert_eq!(grid.lower_terrain(&pos).unwrap(), 0);
    }

    #[test]
    fn test_terrain_and_kind_are_independent() {
        let mut grid = Grid::new(2, 2);
        let pos = Pos::new(1, 1);
        grid.raise_terrain(&pos).unwrap();
        let id = grid.add_stop(&pos).unwrap();
        assert_eq!(grid.node(id).kind, NodeKind::Stop);
        assert_eq!(grid.terrain(id), 10);
        grid.clear_cell(&pos).unwrap();
        assert_eq!(grid.node(id).kind, NodeKind::Free);
        assert_eq!(grid.terrain(id), 0);
        assert!(grid.stops().is_empty());
    }

    #[test]
    fn test_landmarks_move_and_keep_order() {
        let mut grid = Grid::new(3, 3);
        grid.set_start(&Pos::new(0, 0)).unwrap();
        grid.set_start(&Pos::new(0, 1)).unwrap();
        assert_eq!(grid.node(0).kind, NodeKind::Free);
        assert_eq!(grid.start(), Some(1));
        grid.add_stop(&Pos::new(2, 2)).unwrap();
        grid.add_stop(&Pos::new(1, 0)).unwrap();
        grid.add_stop(&Pos::new(2, 2)).unwrap();
        assert_eq!(grid.stops(), &[8, 3]);
        // Turning a stop into the end removes it from the stops.
        grid.set_end(&Pos::new(2, 2)).unwrap();
        assert_eq!(grid.stops(), &[3]);
        assert_eq!(grid.end(), Some(8));
        assert!(grid.set_obstacle(&Pos::new(5, 5)).is_err());
    }

    #[test]
    fn test_marks_skip_landmarks() {
        let mut grid = Grid::new(1, 4);
        grid.set_start(&Pos::new(0, 0)).unwrap();
        grid.set_end(&Pos::new(0, 3)).unwrap();
        grid.mark_search(&[2], &[0, 1]);
        assert_eq!(grid.node(0).kind, NodeKind::Start);
        assert_eq!(grid.node(1).kind, NodeKind::Closed);
        assert_eq!(grid.node(2).kind, NodeKind::Open);
        grid.mark_route(&[0, 1, 2, 3]);
        assert_eq!(grid.to_string(), "S**E\n");
        grid.clear_marks();
        assert_eq!(grid.to_string(), "S..E\n");
    }
}
