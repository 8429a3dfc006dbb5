// Scenario files: a grid drawn as text, for the binary, benches and tests.
//
//   S  start          #  obstacle       .  free
//   E  end            o  stop           1-9 free, terrain of digit * step
//
// Stops drawn on the map are ordered by reading order (row by row). A
// scenario can list `stops` explicitly as [row, col] pairs to fix their order
// instead; map stops missing from that list come after it.

use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::errors::PlanError;
use crate::grid::{Grid, Pos, TerrainConfig};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Scenario {
    pub map: Vec<String>,
    #[serde(default)]
    pub stops: Option<Vec<(u16, u16)>>,
    #[serde(default)]
    pub terrain: TerrainConfig,
}

impl Scenario {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PlanError> {
        let data = fs::read_to_string(path.as_ref())?;
        info!("Loading scenario from {}", path.as_ref().display());
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Grid with its adjacency built, ready to plan on.
    pub fn build(&self) -> Result<Grid, PlanError> {
        let rows: Vec<&str> = self.map.iter().map(String::as_str).collect();
        let mut grid = parse_map(&rows, self.terrain)?;
        if let Some(stops) = &self.stops {
            let map_stops: Vec<Pos> = grid.stops().iter().map(|&id| grid.pos(id)).collect();
            for pos in &map_stops {
                grid.clear_cell(pos)?;
            }
            for &(row, col) in stops {
                let pos = Pos::new(row, col);
                if grid.node_at(&pos).map(|node| node.kind.is_landmark()
                                          && !grid.stops().contains(&node.id))
                    .unwrap_or(false) {
                    return Err(PlanError::Scenario(
                        format!("stop {pos:?} is on the start or end")));
                }
                grid.add_stop(&pos)?;
            }
            for pos in &map_stops {
                grid.add_stop(pos)?;
            }
            grid.build_adjacency();
        }
        Ok(grid)
    }
}

/// Parses a text map (see the module doc for the symbols).
pub fn parse_map(rows: &[&str], terrain: TerrainConfig) -> Result<Grid, PlanError> {
    let num_rows = u16::try_from(rows.len())
        .map_err(|_| PlanError::Scenario(format!("{} rows is too many", rows.len())))?;
    let width = rows.first().map_or(0, |row| row.chars().count());
    if num_rows == 0 || width == 0 {
        return Err(PlanError::Scenario("empty map".into()));
    }
    let num_cols = u16::try_from(width)
        .map_err(|_| PlanError::Scenario(format!("{width} columns is too many")))?;

    let mut grid = Grid::with_terrain(num_rows, num_cols, terrain);
    for (row, line) in rows.iter().enumerate() {
        if line.chars().count() != width {
            return Err(PlanError::Scenario(
                format!("row {row} has {} cells, expected {width}", line.chars().count())));
        }
        for (col, c) in line.chars().enumerate() {
            let pos = Pos::new(row as u16, col as u16);
            match c {
                'S' => {
                    if grid.start().is_some() {
                        return Err(PlanError::Scenario(format!("second start at {pos:?}")));
                    }
                    grid.set_start(&pos)?;
                },
                'E' => {
                    if grid.end().is_some() {
                        return Err(PlanError::Scenario(format!("second end at {pos:?}")));
                    }
                    grid.set_end(&pos)?;
                },
                '#' => { grid.set_obstacle(&pos)?; },
                'o' => { grid.add_stop(&pos)?; },
                '.' => {},
                '1'..='9' => {
                    let level = c.to_digit(10).unwrap_or(0) * terrain.step;
                    grid.set_terrain(&pos, level)?;
                },
                _ => return Err(PlanError::Scenario(format!("unknown cell '{c}' at {pos:?}"))),
            }
        }
    }
    grid.build_adjacency();
    Ok(grid)
}

#[cfg(test)]
mod tests {
    use crate::grid::NodeKind;
    use super::*;

    #[test]
    fn test_parse_map() {
        let grid = parse_map(&[
            "S.#o",
            "o3.E",
        ], TerrainConfig::default()).unwrap();
        assert_eq!((grid.rows(), grid.cols()), (2, 4));
        assert_eq!(grid.start(), grid.id(&Pos::new(0, 0)));
        assert_eq!(grid.end(), grid.id(&Pos::new(1, 3)));
        assert_eq!(grid.stops(), &[3, 4]);
        assert_eq!(grid.node_at(&Pos::new(0, 2)).unwrap().kind, NodeKind::Obstacle);
        assert_eq!(grid.node_at(&Pos::new(1, 1)).unwrap().terrain, 30);
        assert!(!grid.is_adjacency_stale());
        assert!(grid.neighbors(1).iter().all(|&id| id != 2));
        assert_eq!(grid.to_string(), "S.#o\no3.E\n");
    }

    #[test]
    fn test_bad_maps() {
        let cases: [&[&str]; 5] = [
            &[],
            &["S..", "..E."],
            &["S.x", "..E"],
            &["S.S", "..E"],
            &["S.E", "..E"],
        ];
        for rows in cases {
            assert!(matches!(parse_map(rows, TerrainConfig::default()),
                             Err(PlanError::Scenario(_))), "{rows:?}");
        }
    }

    #[test]
    fn test_explicit_stop_order() {
        let scenario = Scenario::from_json(r#"{
            "map": [
                "S..o",
                ".o..",
                "o..E"
            ],
            "stops": [[2, 0], [0, 3]]
        }"#).unwrap();
        let grid = scenario.build().unwrap();
        let positions: Vec<Pos> = grid.stops().iter().map(|&id| grid.pos(id)).collect();
        assert_eq!(positions, vec![Pos::new(2, 0), Pos::new(0, 3), Pos::new(1, 1)]);
    }

    #[test]
    fn test_explicit_stop_on_start_is_rejected() {
        let scenario = Scenario::from_json(
            r#"{"map": ["S.", ".E"], "stops": [[0, 0]]}"#).unwrap();
        assert!(matches!(scenario.build(), Err(PlanError::Scenario(_))));
    }

    #[test]
    fn test_terrain_config_from_json() {
        let scenario = Scenario::from_json(
            r#"{"map": ["S2", "9E"], "terrain": {"max_level": 40, "step": 5}}"#).unwrap();
        let grid = scenario.build().unwrap();
        assert_eq!(grid.terrain(1), 10);
        assert_eq!(grid.terrain(2), 40);
    }

    #[test]
    fn test_bundled_scenarios_load() {
        for file in ["./scenarios/walled_garden.json", "./scenarios/terrain.json"] {
            let grid = Scenario::from_file(file).unwrap().build().unwrap();
            assert!(grid.start().is_some(), "{file}");
            assert!(grid.end().is_some(), "{file}");
        }
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(Scenario::from_file("./scenarios/does_not_exist.json"),
                         Err(PlanError::ReadError(_))));
        assert!(matches!(Scenario::from_json("{\"map\": 3}"),
                         Err(PlanError::ParseError(_))));
    }
}
