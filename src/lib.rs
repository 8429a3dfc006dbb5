pub mod ant_colony_optimization;
pub mod distance_matrix;
pub mod errors;
pub mod grid;
pub mod held_karp;
pub mod interrupt;
pub mod pathfinding;
pub mod planner;
pub mod scenario;
pub mod solvers;
pub mod stitching;
