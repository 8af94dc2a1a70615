use crate::error::{Error, Result};
use crate::index_space::{IndexSpace, MemoryRegion};
use crate::topology::Direction;




#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]

/**
 * The two chemical species of the Gray-Scott model.
 */
pub enum Species {
    U,
    V,
}




/**
 * The concentrations of U and V on one rank's block, padded with a one-cell
 * ghost layer on every face. Local interior indexes run from 0 to size - 1 on
 * each axis; the ghost cells sit at -1 and at size. Storage is row-major with
 * z fastest, so the cell (x, y, z) lives at
 *
 * ```text
 * (z + 1) + (y + 1) * (sz + 2) + (x + 1) * (sy + 2) * (sz + 2)
 * ```
 *
 * Two generations are held: the current one, read by the stencil, and the
 * next one, written by it. They trade places after every step.
 */
pub struct LocalField {
    interior: IndexSpace,
    memory: IndexSpace,
    u: Vec<f64>,
    v: Vec<f64>,
    u2: Vec<f64>,
    v2: Vec<f64>,
}




/**
 * Read-only view of the current generation, as seen by the stencil.
 */
pub struct Current<'a> {
    pub u: &'a [f64],
    pub v: &'a [f64],
}




/**
 * Mutable view of the next generation, as written by the stencil.
 */
pub struct Next<'a> {
    pub u: &'a mut [f64],
    pub v: &'a mut [f64],
}




// ============================================================================
impl LocalField {


    /**
     * Allocate a field with the given interior size. The current generation
     * starts at the trivial steady state U = 1, V = 0, ghosts included.
     */
    pub fn new(size: [usize; 3]) -> Self {
        let interior = IndexSpace::with_shape(size);
        let memory = interior.extend_all(1);
        let n = memory.len();

        Self {
            interior,
            memory,
            u: vec![1.0; n],
            v: vec![0.0; n],
            u2: vec![0.0; n],
            v2: vec![0.0; n],
        }
    }


    /**
     * Return the interior size (without ghosts).
     */
    pub fn size(&self) -> [usize; 3] {
        self.interior.dim()
    }


    /**
     * Return the index space of the interior cells.
     */
    pub fn interior(&self) -> &IndexSpace {
        &self.interior
    }


    /**
     * Return the index space of the allocated cells, ghosts included.
     */
    pub fn memory(&self) -> &IndexSpace {
        &self.memory
    }


    pub fn data(&self, species: Species) -> &[f64] {
        match species {
            Species::U => &self.u,
            Species::V => &self.v,
        }
    }


    fn data_mut(&mut self, species: Species) -> &mut [f64] {
        match species {
            Species::U => &mut self.u,
            Species::V => &mut self.v,
        }
    }


    pub fn get(&self, species: Species, index: (i64, i64, i64)) -> f64 {
        self.data(species)[self.memory.row_major_offset(index)]
    }


    pub fn set(&mut self, species: Species, index: (i64, i64, i64), value: f64) {
        let n = self.memory.row_major_offset(index);
        self.data_mut(species)[n] = value;
    }


    /**
     * Return a contiguous copy of the interior, in (x, y, z) row-major order.
     * This is the rank's sub-block of the global array, and it does not alias
     * the field, so it can be handed to a writer while the simulation moves on.
     */
    pub fn noghost_copy(&self, species: Species) -> Vec<f64> {
        self.region(&self.interior)
            .iter_slice(self.data(species))
            .cloned()
            .collect()
    }


    pub fn u_noghost(&self) -> Vec<f64> {
        self.noghost_copy(Species::U)
    }


    pub fn v_noghost(&self) -> Vec<f64> {
        self.noghost_copy(Species::V)
    }


    /**
     * Overwrite the interior from a ghost-free array laid out as returned by
     * `noghost_copy`. Ghost cells are left alone; refresh them afterwards.
     */
    pub fn set_from_noghost(&mut self, species: Species, values: &[f64]) -> Result<()> {
        let region = self.region(&self.interior);

        if values.len() != region.len() {
            return Err(Error::SizeMismatch {
                expected: region.len(),
                found: values.len(),
            });
        }
        for (dst, src) in region.iter_slice_mut(self.data_mut(species)).zip(values) {
            *dst = *src;
        }
        Ok(())
    }


    /**
     * Return the interior cells adjacent to the given face: the plane a
     * neighbor in that direction needs as its ghost layer.
     */
    pub fn boundary_plane(&self, direction: Direction) -> IndexSpace {
        let axis = direction.axis();
        let n = self.interior.range(axis);
        let index = if direction.is_upper() { n.end - 1 } else { n.start };
        self.interior.slab(axis, index)
    }


    /**
     * Return the ghost cells on the given face. They cover the face of the
     * interior only; edge and corner ghosts are not needed by a 7-point
     * stencil.
     */
    pub fn ghost_plane(&self, direction: Direction) -> IndexSpace {
        let axis = direction.axis();
        let n = self.interior.range(axis);
        let index = if direction.is_upper() { n.end } else { n.start - 1 };
        self.interior.slab(axis, index)
    }


    /**
     * Pack the boundary plane on the given face into a message buffer: the U
     * values followed by the V values.
     */
    pub fn pack_face(&self, direction: Direction) -> Vec<f64> {
        let region = self.region(&self.boundary_plane(direction));
        let mut buffer = Vec::with_capacity(2 * region.len());
        buffer.extend(region.iter_slice(&self.u));
        buffer.extend(region.iter_slice(&self.v));
        buffer
    }


    /**
     * Unpack a buffer produced by `pack_face` into the ghost plane on the
     * given face.
     */
    pub fn unpack_ghost(&mut self, direction: Direction, buffer: &[f64]) -> Result<()> {
        let region = self.region(&self.ghost_plane(direction));
        let n = region.len();

        if buffer.len() != 2 * n {
            return Err(Error::SizeMismatch {
                expected: 2 * n,
                found: buffer.len(),
            });
        }
        for (dst, src) in region.iter_slice_mut(&mut self.u).zip(&buffer[..n]) {
            *dst = *src;
        }
        for (dst, src) in region.iter_slice_mut(&mut self.v).zip(&buffer[n..]) {
            *dst = *src;
        }
        Ok(())
    }


    /**
     * Copy the boundary plane on the given face into the ghost plane on the
     * same face, for both species.
     */
    pub fn mirror_face(&mut self, direction: Direction) {
        let source = self.region(&self.boundary_plane(direction));
        let target = self.region(&self.ghost_plane(direction));

        for data in [&mut self.u, &mut self.v] {
            let plane: Vec<f64> = source.iter_slice(data.as_slice()).copied().collect();
            for (dst, src) in target.iter_slice_mut(data.as_mut_slice()).zip(plane) {
                *dst = src;
            }
        }
    }


    /**
     * Sum of the interior values of one species.
     */
    pub fn sum(&self, species: Species) -> f64 {
        self.region(&self.interior).iter_slice(self.data(species)).sum()
    }


    /**
     * Split the field into the current generation (read) and the next
     * generation (written).
     */
    pub fn generations(&mut self) -> (Current<'_>, Next<'_>) {
        (
            Current { u: &self.u, v: &self.v },
            Next { u: &mut self.u2, v: &mut self.v2 },
        )
    }


    /**
     * Make the next generation current. The old current generation becomes
     * scratch space for the following step.
     */
    pub fn swap(&mut self) {
        std::mem::swap(&mut self.u, &mut self.u2);
        std::mem::swap(&mut self.v, &mut self.v2);
    }


    fn region(&self, space: &IndexSpace) -> MemoryRegion {
        self.memory.memory_region(space)
    }
}
