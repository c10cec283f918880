//! Grid positions, rectangular regions and injectable distance metrics.

use serde::{Deserialize, Serialize};

/// A tile coordinate on the colony grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Translate this position by an offset, saturating at the grid edge.
    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x.saturating_add(dx), self.y.saturating_add(dy))
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// An axis-aligned rectangle of tiles, inclusive on both corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub min: Position,
    pub max: Position,
}

impl Region {
    /// Build a region from any two opposite corners.
    pub fn new(a: Position, b: Position) -> Self {
        Self {
            min: Position::new(a.x.min(b.x), a.y.min(b.y)),
            max: Position::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// A region covering exactly one tile.
    pub fn single(position: Position) -> Self {
        Self::new(position, position)
    }

    pub fn width(&self) -> u32 {
        self.max.x.abs_diff(self.min.x).saturating_add(1)
    }

    pub fn height(&self) -> u32 {
        self.max.y.abs_diff(self.min.y).saturating_add(1)
    }

    pub fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn contains(&self, position: Position) -> bool {
        position.x >= self.min.x
            && position.x <= self.max.x
            && position.y >= self.min.y
            && position.y <= self.max.y
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    /// The tile of this region closest to `position`.
    pub fn nearest_tile(&self, position: Position) -> Position {
        Position::new(
            position.x.clamp(self.min.x, self.max.x),
            position.y.clamp(self.min.y, self.max.y),
        )
    }

    /// Iterate all tiles row by row, starting at `min`.
    pub fn tiles(&self) -> impl Iterator<Item = Position> + '_ {
        (self.min.y..=self.max.y)
            .flat_map(move |y| (self.min.x..=self.max.x).map(move |x| Position::new(x, y)))
    }
}

/// A pure distance function between two grid positions.
///
/// The scheduler never decides how distance is measured; callers inject a
/// metric (straight-line, path cost from a navigation cache, ...) and must
/// use the same one consistently.
pub trait Distance {
    fn distance(&self, from: Position, to: Position) -> f32;
}

impl<F> Distance for F
where
    F: Fn(Position, Position) -> f32,
{
    fn distance(&self, from: Position, to: Position) -> f32 {
        self(from, to)
    }
}

/// Straight-line distance.
#[derive(Debug, Clone, Copy, Default)]
pub struct Euclidean;

impl Distance for Euclidean {
    fn distance(&self, from: Position, to: Position) -> f32 {
        let dx = to.x.abs_diff(from.x) as f32;
        let dy = to.y.abs_diff(from.y) as f32;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Grid step distance without diagonals.
#[derive(Debug, Clone, Copy, Default)]
pub struct Manhattan;

impl Distance for Manhattan {
    fn distance(&self, from: Position, to: Position) -> f32 {
        to.x.abs_diff(from.x) as f32 + to.y.abs_diff(from.y) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_normalizes_corners() {
        let region = Region::new(Position::new(3, 4), Position::new(1, 2));
        assert_eq!(region.min, Position::new(1, 2));
        assert_eq!(region.max, Position::new(3, 4));
        assert_eq!(region.area(), 9);
    }

    #[test]
    fn test_region_tiles_row_major() {
        let region = Region::new(Position::new(0, 0), Position::new(1, 1));
        let tiles: Vec<_> = region.tiles().collect();
        assert_eq!(
            tiles,
            vec![
                Position::new(0, 0),
                Position::new(1, 0),
                Position::new(0, 1),
                Position::new(1, 1),
            ]
        );
    }

    #[test]
    fn test_region_overlap() {
        let a = Region::new(Position::new(0, 0), Position::new(2, 2));
        let b = Region::new(Position::new(2, 2), Position::new(4, 4));
        let c = Region::new(Position::new(3, 0), Position::new(4, 1));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_nearest_tile() {
        let region = Region::new(Position::new(0, 0), Position::new(2, 2));
        assert_eq!(region.nearest_tile(Position::new(5, 1)), Position::new(2, 1));
        assert_eq!(region.nearest_tile(Position::new(1, 1)), Position::new(1, 1));
    }

    #[test]
    fn test_distance_metrics() {
        let from = Position::new(0, 0);
        let to = Position::new(3, 4);
        assert!((Euclidean.distance(from, to) - 5.0).abs() < 0.001);
        assert_eq!(Manhattan.distance(from, to), 7.0);

        let flat = |_: Position, _: Position| 1.5_f32;
        assert_eq!(flat.distance(from, to), 1.5);
    }

    #[test]
    fn test_extreme_coordinates_saturate() {
        let edge = Position::new(i32::MAX - 1, i32::MIN + 1);
        assert_eq!(edge.offset(5, -5), Position::new(i32::MAX, i32::MIN));

        let world = Region::new(Position::new(i32::MIN, 0), Position::new(i32::MAX, 0));
        assert_eq!(world.width(), u32::MAX);
        assert_eq!(world.height(), 1);

        let from = Position::new(i32::MIN, 0);
        let to = Position::new(i32::MAX, 0);
        assert_eq!(Manhattan.distance(from, to), u32::MAX as f32);
        assert!(Euclidean.distance(from, to) > 4.0e9);
    }
}
