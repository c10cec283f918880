//! Blueprints - templates of tiles, material costs and build order.

use colony_rules::{ItemKind, Position, Region};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{ColonyError, Result};

/// One tile of a blueprint, relative to the anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilePlacement {
    pub offset: Position,
    /// Materials consumed by this tile.
    pub cost: BTreeMap<ItemKind, u32>,
}

/// A template describing the tiles and resources required to build a structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub tiles: Vec<TilePlacement>,
    /// `(before, after)` pairs over tile indices: `after` may not finish
    /// until `before` has.
    pub build_order: Vec<(usize, usize)>,
}

impl Blueprint {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            tiles: Vec::new(),
            build_order: Vec::new(),
        }
    }

    /// Add a tile with no material cost.
    pub fn with_tile(mut self, offset: Position) -> Self {
        self.tiles.push(TilePlacement {
            offset,
            cost: BTreeMap::new(),
        });
        self
    }

    /// Add a tile consuming `quantity` of `item`.
    pub fn with_costed_tile(mut self, offset: Position, item: ItemKind, quantity: u32) -> Self {
        self.tiles.push(TilePlacement {
            offset,
            cost: BTreeMap::from([(item, quantity)]),
        });
        self
    }

    /// Require tile `before` to be finished before tile `after`.
    pub fn with_dependency(mut self, before: usize, after: usize) -> Self {
        self.build_order.push((before, after));
        self
    }

    /// Chain every tile in index order.
    pub fn sequential(mut self) -> Self {
        self.build_order = (1..self.tiles.len()).map(|i| (i - 1, i)).collect();
        self
    }

    /// Sum of all tile costs.
    pub fn requirements(&self) -> BTreeMap<ItemKind, u32> {
        let mut total = BTreeMap::new();
        for tile in &self.tiles {
            for (item, quantity) in &tile.cost {
                *total.entry(*item).or_default() += quantity;
            }
        }
        total
    }

    /// Region covered when placed at `anchor`.
    pub fn footprint(&self, anchor: Position) -> Region {
        Region::new(
            anchor,
            anchor.offset(extent(self.width), extent(self.height)),
        )
    }

    /// Tiles that must be finished before `tile`.
    pub fn predecessors(&self, tile: usize) -> impl Iterator<Item = usize> + '_ {
        self.build_order
            .iter()
            .filter(move |(_, after)| *after == tile)
            .map(|(before, _)| *before)
    }

    /// Tiles in an order consistent with the build order.
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = (0..self.tiles.len()).map(|i| graph.add_node(i)).collect();
        for &(before, after) in &self.build_order {
            let (Some(&from), Some(&to)) = (nodes.get(before), nodes.get(after)) else {
                return Err(ColonyError::InvalidBlueprint(format!(
                    "{}: build order references missing tile ({} -> {})",
                    self.name, before, after
                )));
            };
            graph.add_edge(from, to, ());
        }
        let sorted = toposort(&graph, None).map_err(|cycle| {
            ColonyError::InvalidBlueprint(format!(
                "{}: build order has a cycle through tile {}",
                self.name,
                graph[cycle.node_id()]
            ))
        })?;
        Ok(sorted.into_iter().map(|node| graph[node]).collect())
    }

    /// Check shape, tile bounds and build order.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ColonyError::InvalidBlueprint(format!(
                "{}: empty size {}x{}",
                self.name, self.width, self.height
            )));
        }
        if self.tiles.is_empty() {
            return Err(ColonyError::InvalidBlueprint(format!("{}: no tiles", self.name)));
        }
        let bounds = self.footprint(Position::default());
        if let Some(tile) = self.tiles.iter().find(|tile| !bounds.contains(tile.offset)) {
            return Err(ColonyError::InvalidBlueprint(format!(
                "{}: tile at {} lies outside {}x{}",
                self.name, tile.offset, self.width, self.height
            )));
        }
        if let Some((before, after)) = self.build_order.iter().find(|(a, b)| a == b) {
            return Err(ColonyError::InvalidBlueprint(format!(
                "{}: tile {} depends on itself ({} -> {})",
                self.name, before, before, after
            )));
        }
        self.topological_order().map(|_| ())
    }
}

/// Offset from the anchor to the far edge of a footprint dimension.
fn extent(size: u32) -> i32 {
    i32::try_from(size.saturating_sub(1)).unwrap_or(i32::MAX)
}
