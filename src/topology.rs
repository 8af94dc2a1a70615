//! Cartesian decomposition of the global cube over a group of ranks.
//!
//! A [`Topology`] is the identity of one rank within the group; it is built
//! once from the communicator and handed to [`ProcessGrid`], which owns
//! everything derived from it: the process grid dimensions, this rank's
//! coordinate, its neighbors, and the size and offset of its block.

use log::warn;

use crate::error::{Error, Result};
use crate::index_space::Axis;
use crate::io::BlockLayout;
use crate::message::comm::Communicator;
use crate::settings::{Boundary, Settings};




#[derive(Clone, Copy, Debug, PartialEq, Eq)]

/// The rank of this process and the number of processes in the run.
pub struct Topology {
    rank: usize,
    size: usize,
}

impl Topology {
    pub fn new(rank: usize, size: usize) -> Result<Self> {
        if rank >= size {
            return Err(Error::config(format!("rank {} is outside a group of {}", rank, size)));
        }
        Ok(Self { rank, size })
    }

    pub fn from_communicator<C: Communicator>(comm: &C) -> Result<Self> {
        Self::new(comm.rank(), comm.size())
    }
}




#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]

/// One of the six faces of a rank's block. West/east run along x, down/up
/// along y and south/north along z.
pub enum Direction {
    West,
    East,
    Down,
    Up,
    South,
    North,
}

impl Direction {
    pub const ALL: [Direction; 6] = [
        Direction::West,
        Direction::East,
        Direction::Down,
        Direction::Up,
        Direction::South,
        Direction::North,
    ];

    /// Return the (lower, upper) pair of directions along an axis.
    pub fn along(axis: Axis) -> (Direction, Direction) {
        match axis {
            Axis::X => (Direction::West, Direction::East),
            Axis::Y => (Direction::Down, Direction::Up),
            Axis::Z => (Direction::South, Direction::North),
        }
    }

    pub fn axis(self) -> Axis {
        match self {
            Direction::West | Direction::East => Axis::X,
            Direction::Down | Direction::Up => Axis::Y,
            Direction::South | Direction::North => Axis::Z,
        }
    }

    pub fn is_upper(self) -> bool {
        matches!(self, Direction::East | Direction::Up | Direction::North)
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::West => Direction::East,
            Direction::East => Direction::West,
            Direction::Down => Direction::Up,
            Direction::Up => Direction::Down,
            Direction::South => Direction::North,
            Direction::North => Direction::South,
        }
    }
}




#[derive(Clone, Debug)]

/// The process grid as seen from one rank.
pub struct ProcessGrid {
    topology: Topology,
    dims: [usize; 3],
    coords: [usize; 3],
    local_size: [usize; 3],
    global_length: usize,
    boundary: Boundary,
}

impl ProcessGrid {
    /// Decompose the run described by `settings` over the ranks of
    /// `topology`. Fails if the grid edge length is not divisible by the
    /// process count on every axis.
    pub fn new(topology: Topology, settings: &Settings) -> Result<Self> {
        let dims = Self::decompose_with(topology.size, settings.process_dims)?;
        let l = settings.l;

        for axis in Axis::ALL {
            let procs = dims[axis.index()];
            if l % procs != 0 {
                return Err(Error::GridNotDivisible {
                    axis,
                    length: l,
                    procs,
                });
            }
        }

        let coords = Self::unrank(topology.rank, dims);
        let local_size = [l / dims[0], l / dims[1], l / dims[2]];

        Ok(Self {
            topology,
            dims,
            coords,
            local_size,
            global_length: l,
            boundary: settings.boundary,
        })
    }

    /// Factor `procs` into three integers whose product is `procs`, as close
    /// to a cube as possible.
    pub fn decompose(procs: usize) -> Result<[usize; 3]> {
        Self::decompose_with(procs, [0; 3])
    }

    /// Like [`ProcessGrid::decompose`], but non-zero entries of `hints` are
    /// fixed. Among the admissible factorizations, the one with the smallest
    /// spread between largest and smallest factor wins, then the one with the
    /// smallest surface, then the one ordered largest-first.
    pub fn decompose_with(procs: usize, hints: [usize; 3]) -> Result<[usize; 3]> {
        if procs == 0 {
            return Err(Error::Decomposition {
                procs,
                dims: hints,
                msg: "number of processes must be positive".to_string(),
            });
        }

        let admissible = |d: usize, hint: usize| hint == 0 || d == hint;
        let mut best: Option<[usize; 3]> = None;

        for a in divisors(procs) {
            for b in divisors(procs / a) {
                let c = procs / a / b;
                let dims = [a, b, c];

                if !(0..3).all(|n| admissible(dims[n], hints[n])) {
                    continue;
                }
                best = match best {
                    Some(current) if score(current) <= score(dims) => Some(current),
                    _ => Some(dims),
                };
            }
        }

        let dims = best.ok_or_else(|| Error::Decomposition {
            procs,
            dims: hints,
            msg: "requested process dimensions do not factor the process count".to_string(),
        })?;

        if procs > 3 && dims.iter().filter(|&&d| d == 1).count() == 2 {
            warn!(
                "{} processes can only be decomposed as {:?}; communication will be inefficient",
                procs, dims
            );
        }
        Ok(dims)
    }

    fn unrank(rank: usize, dims: [usize; 3]) -> [usize; 3] {
        let [_, npy, npz] = dims;
        [rank / (npz * npy), (rank / npz) % npy, rank % npz]
    }

    /// Return the coordinate of the given rank in the process grid.
    pub fn coordinate_of(&self, rank: usize) -> [usize; 3] {
        Self::unrank(rank, self.dims)
    }

    /// Return the rank at the given coordinate in the process grid.
    pub fn rank_of(&self, coords: [usize; 3]) -> usize {
        let [_, npy, npz] = self.dims;
        (coords[0] * npy + coords[1]) * npz + coords[2]
    }

    /// Return the rank adjacent to this one in the given direction, or `None`
    /// at an open edge of the domain.
    pub fn neighbor(&self, direction: Direction) -> Option<usize> {
        let a = direction.axis().index();
        let n = self.dims[a];
        let c = self.coords[a];

        let c = match (direction.is_upper(), self.boundary) {
            (true, _) if c + 1 < n => c + 1,
            (false, _) if c > 0 => c - 1,
            (true, Boundary::Periodic) => 0,
            (false, Boundary::Periodic) => n - 1,
            (_, Boundary::Open) => return None,
        };

        let mut coords = self.coords;
        coords[a] = c;
        Some(self.rank_of(coords))
    }

    pub fn rank(&self) -> usize {
        self.topology.rank
    }

    pub fn size(&self) -> usize {
        self.topology.size
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn coords(&self) -> [usize; 3] {
        self.coords
    }

    /// Interior size of this rank's block, without ghost cells.
    pub fn local_size(&self) -> [usize; 3] {
        self.local_size
    }

    /// Global index of this rank's first interior cell.
    pub fn offset(&self) -> [usize; 3] {
        [
            self.coords[0] * self.local_size[0],
            self.coords[1] * self.local_size[1],
            self.coords[2] * self.local_size[2],
        ]
    }

    pub fn global_length(&self) -> usize {
        self.global_length
    }

    pub fn boundary(&self) -> Boundary {
        self.boundary
    }

    /// Describe where this rank's block sits in the global array.
    pub fn layout(&self) -> BlockLayout {
        let l = self.global_length;
        BlockLayout {
            rank: self.rank(),
            global: [l, l, l],
            offset: self.offset(),
            count: self.local_size,
        }
    }
}




// ============================================================================
fn divisors(n: usize) -> impl Iterator<Item = usize> {
    (1..=n).filter(move |d| n % d == 0)
}

fn score(dims: [usize; 3]) -> (usize, usize, std::cmp::Reverse<[usize; 3]>) {
    let [a, b, c] = dims;
    let spread = a.max(b).max(c) - a.min(b).min(c);
    let surface = a * b + b * c + c * a;
    (spread, surface, std::cmp::Reverse(dims))
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    fn grid(rank: usize, size: usize, l: usize, boundary: Boundary) -> ProcessGrid {
        let settings = Settings { l, boundary, ..Settings::default() };
        ProcessGrid::new(Topology::new(rank, size).unwrap(), &settings).unwrap()
    }

    #[test]
    fn decompose_is_as_cubic_as_possible() {
        assert_eq!(ProcessGrid::decompose(1).unwrap(), [1, 1, 1]);
        assert_eq!(ProcessGrid::decompose(2).unwrap(), [2, 1, 1]);
        assert_eq!(ProcessGrid::decompose(4).unwrap(), [2, 2, 1]);
        assert_eq!(ProcessGrid::decompose(8).unwrap(), [2, 2, 2]);
        assert_eq!(ProcessGrid::decompose(12).unwrap(), [3, 2, 2]);
        assert_eq!(ProcessGrid::decompose(7).unwrap(), [7, 1, 1]);
        assert_eq!(ProcessGrid::decompose(64).unwrap(), [4, 4, 4]);
    }

    #[test]
    fn decompose_product_equals_process_count() {
        for p in 1..=48 {
            let [a, b, c] = ProcessGrid::decompose(p).unwrap();
            assert_eq!(a * b * c, p);
        }
    }

    #[test]
    fn decompose_respects_fixed_dimensions() {
        assert_eq!(ProcessGrid::decompose_with(8, [0, 0, 8]).unwrap(), [1, 1, 8]);
        assert_eq!(ProcessGrid::decompose_with(12, [0, 3, 0]).unwrap(), [2, 3, 2]);
        assert!(ProcessGrid::decompose_with(8, [3, 0, 0]).is_err());
        assert!(ProcessGrid::decompose(0).is_err());
    }

    #[test]
    fn coordinate_mapping_is_a_bijection() {
        let g = grid(0, 12, 12, Boundary::Open);
        let mut seen = std::collections::HashSet::new();

        for rank in 0..12 {
            let c = g.coordinate_of(rank);
            assert!(c[0] < g.dims()[0] && c[1] < g.dims()[1] && c[2] < g.dims()[2]);
            assert_eq!(g.rank_of(c), rank);
            assert!(seen.insert(c));
        }
    }

    #[test]
    fn rank_outside_the_group_is_a_configuration_error() {
        assert!(Topology::new(2, 2).unwrap_err().is_configuration());
        assert!(Topology::new(0, 0).unwrap_err().is_configuration());
        assert!(Topology::new(1, 2).is_ok());
    }

    #[test]
    fn indivisible_grid_is_a_configuration_error() {
        let settings = Settings { l: 9, ..Settings::default() };
        let err = ProcessGrid::new(Topology::new(0, 2).unwrap(), &settings).unwrap_err();
        assert!(matches!(err, Error::GridNotDivisible { axis: Axis::X, length: 9, procs: 2 }));
    }

    #[test]
    fn two_ranks_split_along_x() {
        let g0 = grid(0, 2, 8, Boundary::Open);
        let g1 = grid(1, 2, 8, Boundary::Open);

        assert_eq!(g0.dims(), [2, 1, 1]);
        assert_eq!(g0.local_size(), [4, 8, 8]);
        assert_eq!(g0.neighbor(Direction::West), None);
        assert_eq!(g0.neighbor(Direction::East), Some(1));
        assert_eq!(g1.neighbor(Direction::West), Some(0));
        assert_eq!(g1.neighbor(Direction::East), None);
        assert_eq!(g1.offset(), [4, 0, 0]);

        for d in [Direction::Down, Direction::Up, Direction::South, Direction::North] {
            assert_eq!(g0.neighbor(d), None);
        }
    }

    #[test]
    fn periodic_neighbors_wrap_around() {
        let g0 = grid(0, 2, 8, Boundary::Periodic);
        assert_eq!(g0.neighbor(Direction::West), Some(1));
        assert_eq!(g0.neighbor(Direction::East), Some(1));
        assert_eq!(g0.neighbor(Direction::Up), Some(0));
    }

    #[test]
    fn single_rank_has_no_open_neighbors() {
        let g = grid(0, 1, 8, Boundary::Open);
        for d in Direction::ALL {
            assert_eq!(g.neighbor(d), None);
        }
    }

    #[test]
    fn local_blocks_tile_the_global_domain() {
        for p in [1, 2, 4, 8] {
            let l = 8;
            let mut owner = vec![None; l * l * l];
            let mut volume = 0;

            for rank in 0..p {
                let g = grid(rank, p, l, Boundary::Open);
                let [sx, sy, sz] = g.local_size();
                let [ox, oy, oz] = g.offset();
                volume += sx * sy * sz;

                for x in ox..ox + sx {
                    for y in oy..oy + sy {
                        for z in oz..oz + sz {
                            let cell = &mut owner[(x * l + y) * l + z];
                            assert!(cell.is_none(), "cell claimed twice");
                            *cell = Some(rank);
                        }
                    }
                }
            }
            assert_eq!(volume, l * l * l);
            assert!(owner.iter().all(Option::is_some));
        }
    }

    #[test]
    fn neighbors_are_mutual() {
        for rank in 0..8 {
            let g = grid(rank, 8, 8, Boundary::Open);
            for d in Direction::ALL {
                if let Some(n) = g.neighbor(d) {
                    let h = grid(n, 8, 8, Boundary::Open);
                    assert_eq!(h.neighbor(d.opposite()), Some(rank));
                }
            }
        }
    }
}
