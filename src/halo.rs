use log::trace;

use crate::error::Result;
use crate::field::LocalField;
use crate::index_space::Axis;
use crate::message::comm::Communicator;
use crate::message::mailbox::{Mailbox, Tag};
use crate::topology::{Direction, ProcessGrid};

/// Refreshes the ghost faces of a [`LocalField`] from the neighboring ranks.
///
/// Axes are handled one after the other. For each axis, the boundary plane
/// on both faces is packed and posted to the neighbor on that side (sends
/// never block), then the two incoming planes are received and unpacked into
/// the ghost faces. When the call returns, every ghost face that has a
/// neighbor holds that neighbor's current boundary plane. Faces without a
/// neighbor keep whatever they held before; see [`crate::boundary`].
///
/// A neighbor that is this rank itself (periodic boundary with one process
/// along an axis) is served by a local copy.
#[derive(Debug, Default)]
pub struct HaloExchange {
    epoch: u64,
}

impl HaloExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of exchanges performed so far.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn exchange<C: Communicator>(
        &mut self,
        mailbox: &mut Mailbox<C>,
        grid: &ProcessGrid,
        field: &mut LocalField,
    ) -> Result<()> {
        self.epoch += 1;

        for axis in Axis::ALL {
            self.exchange_axis(axis, mailbox, grid, field)?;
        }
        Ok(())
    }

    fn exchange_axis<C: Communicator>(
        &self,
        axis: Axis,
        mailbox: &mut Mailbox<C>,
        grid: &ProcessGrid,
        field: &mut LocalField,
    ) -> Result<()> {
        let rank = grid.rank();
        let (lower, upper) = Direction::along(axis);

        // Data travelling in `direction` leaves through that face.
        for direction in [lower, upper] {
            if let Some(dest) = grid.neighbor(direction) {
                if dest != rank {
                    mailbox.post(dest, Tag::Halo(direction), self.epoch, field.pack_face(direction))?;
                }
            }
        }

        // ... and enters the neighbor through the opposite face.
        for direction in [lower, upper] {
            let face = direction.opposite();

            match grid.neighbor(face) {
                Some(source) if source == rank => {
                    let buffer = field.pack_face(direction);
                    field.unpack_ghost(face, &buffer)?;
                }
                Some(source) => {
                    let buffer = mailbox.take(source, Tag::Halo(direction), self.epoch)?;
                    field.unpack_ghost(face, &buffer)?;
                }
                None => {}
            }
        }
        trace!("[{}] exchanged {:?} faces (epoch {})", rank, axis, self.epoch);
        Ok(())
    }
}
