use crate::field::LocalField;
use crate::topology::{Direction, ProcessGrid};

/// Fill the ghost faces that halo exchange leaves alone, those at the open
/// edges of the global domain, with a copy of the adjacent interior plane.
/// A ghost equal to its neighbor carries no diffusive flux, so the domain
/// edge acts as a reflecting wall. Faces that have a neighbor rank are not
/// touched; with periodic boundaries there are none to fill.
pub fn apply_no_flux(field: &mut LocalField, grid: &ProcessGrid) {
    for direction in Direction::ALL {
        if grid.neighbor(direction).is_none() {
            field.mirror_face(direction);
        }
    }
}
