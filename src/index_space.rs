use core::ops::Range;




/**
 * Identifier for a Cartesian axis. Memory is laid out with `Z` varying
 * fastest, so `X` is the outermost (slowest) axis.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Axis {
    X,
    Y,
    Z,
}




// ============================================================================
impl Axis {

    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /**
     * Return the position of this axis in an `[x, y, z]` triple.
     */
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}




#[derive(Clone, Debug, PartialEq, Eq)]


/**
 * Represents a rectangular region in a discrete 3D index space
 */
pub struct IndexSpace {
    di: Range<i64>,
    dj: Range<i64>,
    dk: Range<i64>,
}




/**
 * Describes a rectangular index space. The index type is signed 64-bit
 * integer, so that ghost zones can sit at index -1.
 */
impl IndexSpace {


    pub fn new(di: Range<i64>, dj: Range<i64>, dk: Range<i64>) -> Self {

        assert!(
            di.start <= di.end && dj.start <= dj.end && dk.start <= dk.end,
            "index space has negative volume");

        Self { di, dj, dk }
    }


    /**
     * Construct an index space starting at zero with the given shape.
     */
    pub fn with_shape(shape: [usize; 3]) -> Self {
        Self::new(0..shape[0] as i64, 0..shape[1] as i64, 0..shape[2] as i64)
    }


    /**
     * Return the number of indexes on each axis.
     */
    pub fn dim(&self) -> [usize; 3] {
        [(self.di.end - self.di.start) as usize,
         (self.dj.end - self.dj.start) as usize,
         (self.dk.end - self.dk.start) as usize]
    }


    /**
     * Return the number of elements in this index space.
     */
    pub fn len(&self) -> usize {
        let [l, m, n] = self.dim();
        l * m * n
    }


    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }


    /**
     * Return the minimum index (inclusive).
     */
    pub fn start(&self) -> (i64, i64, i64) {
        (self.di.start, self.dj.start, self.dk.start)
    }


    /**
     * Return the maximum index (exclusive).
     */
    pub fn end(&self) -> (i64, i64, i64) {
        (self.di.end, self.dj.end, self.dk.end)
    }


    /**
     * Return the range covered on the given axis.
     */
    pub fn range(&self, axis: Axis) -> Range<i64> {
        match axis {
            Axis::X => self.di.clone(),
            Axis::Y => self.dj.clone(),
            Axis::Z => self.dk.clone(),
        }
    }


    /**
     * Determine whether this index space contains the given index.
     */
    pub fn contains(&self, index: (i64, i64, i64)) -> bool {
        self.di.contains(&index.0) && self.dj.contains(&index.1) && self.dk.contains(&index.2)
    }


    /**
     * Determine whether another index space is a subset of this one.
     */
    pub fn contains_space(&self, other: &Self) -> bool {
        other.di.start >= self.di.start && other.di.end <= self.di.end &&
        other.dj.start >= self.dj.start && other.dj.end <= self.dj.end &&
        other.dk.start >= self.dk.start && other.dk.end <= self.dk.end
    }


    /**
     * Expand this index space by the given number of elements on each axis.
     */
    pub fn extend_all(&self, delta: i64) -> Self {
        Self::new(
            self.di.start - delta .. self.di.end + delta,
            self.dj.start - delta .. self.dj.end + delta,
            self.dk.start - delta .. self.dk.end + delta)
    }


    /**
     * Return a copy of this index space with the range on one axis replaced.
     */
    pub fn with_range(&self, axis: Axis, range: Range<i64>) -> Self {
        match axis {
            Axis::X => Self::new(range, self.dj.clone(), self.dk.clone()),
            Axis::Y => Self::new(self.di.clone(), range, self.dk.clone()),
            Axis::Z => Self::new(self.di.clone(), self.dj.clone(), range),
        }
    }


    /**
     * Return the one-element-thick slab of this index space at the given
     * index along an axis. The index need not lie inside this space; that is
     * how ghost faces are addressed.
     */
    pub fn slab(&self, axis: Axis, index: i64) -> Self {
        self.with_range(axis, index..index + 1)
    }


    /**
     * Return the linear offset for the given index, in a row-major memory
     * buffer aligned with the start of this index space.
     */
    pub fn row_major_offset(&self, index: (i64, i64, i64)) -> usize {
        let i = (index.0 - self.di.start) as usize;
        let j = (index.1 - self.dj.start) as usize;
        let k = (index.2 - self.dk.start) as usize;
        let [_, m, n] = self.dim();
        (i * m + j) * n + k
    }


    /**
     * Return the hyperslab that `subspace` occupies in a row-major buffer
     * covering this index space. Panics if `subspace` is not contained.
     */
    pub fn memory_region(&self, subspace: &Self) -> MemoryRegion {
        assert!(
            self.contains_space(subspace),
            "subspace {:?} is outside of {:?}", subspace, self);

        let (i0, j0, k0) = subspace.start();
        let [di, dj, dk] = subspace.dim();

        MemoryRegion {
            start: [(i0 - self.di.start) as usize,
                    (j0 - self.dj.start) as usize,
                    (k0 - self.dk.start) as usize],
            count: [di, dj, dk],
            shape: self.dim(),
        }
    }


    /**
     * Return an iterator which traverses the index space in row-major order
     * (C-like; the final index increases fastest).
     */
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64, i64)> + '_ {
        self.di.clone().flat_map(move |i| {
            self.dj.clone().flat_map(move |j| self.dk.clone().map(move |k| (i, j, k)))
        })
    }
}




#[derive(Clone, Debug, PartialEq, Eq)]


/**
 * A 3D hyperslab within a contiguous row-major buffer.
 */
pub struct MemoryRegion {
    start: [usize; 3],
    count: [usize; 3],
    shape: [usize; 3],
}




// ============================================================================
impl MemoryRegion {

    /**
     * Return the number of elements selected by this region.
     */
    pub fn len(&self) -> usize {
        self.count.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /**
     * Return the number of elements of the enclosing buffer.
     */
    pub fn buffer_len(&self) -> usize {
        self.shape.iter().product()
    }

    /**
     * Iterate over the selected elements of the buffer, in row-major order.
     */
    pub fn iter_slice<'a>(&'a self, slice: &'a [f64]) -> impl Iterator<Item = &'a f64> {
        assert!(slice.len() == self.buffer_len());

        let [s0, s1, s2] = self.start;
        let [c0, c1, c2] = self.count;
        let r = self.shape[2];
        let q = self.shape[1] * r;

        slice[s0 * q .. (s0 + c0) * q]
        .chunks_exact(q).flat_map(move |j| j[s1 * r .. (s1 + c1) * r]
        .chunks_exact(r).flat_map(move |k| k[s2 .. s2 + c2].iter()))
    }

    /**
     * Iterate mutably over the selected elements of the buffer, in row-major
     * order.
     */
    pub fn iter_slice_mut<'a>(&'a self, slice: &'a mut [f64]) -> impl Iterator<Item = &'a mut f64> {
        assert!(slice.len() == self.buffer_len());

        let [s0, s1, s2] = self.start;
        let [c0, c1, c2] = self.count;
        let r = self.shape[2];
        let q = self.shape[1] * r;

        slice[s0 * q .. (s0 + c0) * q]
        .chunks_exact_mut(q).flat_map(move |j| j[s1 * r .. (s1 + c1) * r]
        .chunks_exact_mut(r).flat_map(move |k| k[s2 .. s2 + c2].iter_mut()))
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;

    fn range3d(di: Range<i64>, dj: Range<i64>, dk: Range<i64>) -> IndexSpace {
        IndexSpace::new(di, dj, dk)
    }

    #[test]
    fn row_major_offset_puts_z_fastest() {
        let space = range3d(-1..5, -1..9, -1..9);
        assert_eq!(space.row_major_offset((-1, -1, -1)), 0);
        assert_eq!(space.row_major_offset((-1, -1, 0)), 1);
        assert_eq!(space.row_major_offset((-1, 0, -1)), 10);
        assert_eq!(space.row_major_offset((0, -1, -1)), 100);
        assert_eq!(space.row_major_offset((4, 8, 8)), space.len() - 1);
    }

    #[test]
    fn iter_visits_indexes_in_row_major_order() {
        let space = range3d(0..2, 0..3, 0..4);
        let offsets: Vec<_> = space.iter().map(|index| space.row_major_offset(index)).collect();
        assert_eq!(offsets, (0..24).collect::<Vec<_>>());
    }

    #[test]
    fn slab_can_address_a_ghost_face() {
        let interior = IndexSpace::with_shape([4, 8, 8]);
        let ghost = interior.slab(Axis::X, 4);
        assert_eq!(ghost.dim(), [1, 8, 8]);
        assert!(interior.extend_all(1).contains_space(&ghost));
        assert!(!interior.contains_space(&ghost));
    }

    #[test]
    fn memory_region_selects_the_same_elements_as_iter() {
        let interior = range3d(0..4, 0..3, 0..2);
        let memory = interior.extend_all(1);
        let data: Vec<f64> = (0..memory.len()).map(|n| n as f64).collect();
        let region = memory.memory_region(&interior);

        let selected: Vec<f64> = region.iter_slice(&data).cloned().collect();
        let expected: Vec<f64> = interior.iter().map(|index| data[memory.row_major_offset(index)]).collect();
        assert_eq!(region.len(), interior.len());
        assert_eq!(selected, expected);
    }

    #[test]
    fn memory_region_writes_only_inside_the_selection() {
        let memory = range3d(0..3, 0..3, 0..3);
        let mut data = vec![0.0; memory.len()];
        let region = memory.memory_region(&memory.slab(Axis::Y, 2));

        for x in region.iter_slice_mut(&mut data) {
            *x = 1.0;
        }
        for index in memory.iter() {
            let expected = if index.1 == 2 { 1.0 } else { 0.0 };
            assert_eq!(data[memory.row_major_offset(index)], expected);
        }
    }
}
