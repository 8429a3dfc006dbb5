// Turns a stop order into one walkable route, reusing the paths cached while
// building the distance matrix instead of searching again.

use log::debug;

use crate::distance_matrix::{DistanceMatrix, VertexId};
use crate::errors::PlanError;
use crate::grid::NodeId;

/// Nodes of the cached path `from -> to`, in reverse (`to` first, `from` last).
pub fn reconstruct_segment(
    matrix: &DistanceMatrix, from: VertexId, to: VertexId
    ) -> Result<Vec<NodeId>, PlanError> {
    let entry = matrix.entry(from, to);
    if !entry.is_reachable() {
        return Err(PlanError::Infeasible);
    }
    let first = matrix.node(from);
    let mut current = matrix.node(to);
    let mut nodes = Vec::with_capacity(entry.cost as usize + 1);
    nodes.push(current);
    while current != first {
        current = *entry.came_from.get(&current).ok_or(PlanError::Infeasible)?;
        nodes.push(current);
    }
    Ok(nodes)
}

/// Full route `start -> stops (in order) -> end`. Walks the legs from the end
/// back to the start, dropping the node each leg shares with the next one.
pub fn stitch_route(
    matrix: &DistanceMatrix, order: &[VertexId]
    ) -> Result<Vec<NodeId>, PlanError> {
    let mut vertices = Vec::with_capacity(order.len() + 2);
    vertices.push(matrix.start_vertex());
    vertices.extend_from_slice(order);
    vertices.push(matrix.end_vertex());

    let mut route: Vec<NodeId> = Vec::new();
    for leg in vertices.windows(2).rev() {
        let segment = reconstruct_segment(matrix, leg[0], leg[1])?;
        // segment[0] is leg[1], already pushed as the previous leg's last node.
        let skip = if route.is_empty() { 0 } else { 1 };
        route.extend(segment.into_iter().skip(skip));
    }
    route.reverse();
    debug!("Stitched {} legs into {} nodes", vertices.len() - 1, route.len());
    Ok(route)
}
