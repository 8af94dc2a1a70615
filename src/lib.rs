//! Grayscott is a distributed solver for the Gray-Scott reaction-diffusion
//! system on a 3D periodic or closed box. The global L x L x L grid is split
//! into equal blocks over a Cartesian grid of ranks; every rank keeps a
//! one-cell ghost layer around its block, refreshed from its six neighbors
//! after every step, and advances its block with an explicit 7-point stencil.
//!
//! Ranks talk through the [`message::comm::Communicator`] trait, which is
//! implemented for threads within one process ([`message::channel`]) and for
//! separate processes over TCP ([`message::tcp`]). Output goes through the
//! [`io::Writer`] and [`io::Reader`] contracts, so the storage engine can be
//! swapped without touching the numerics.

pub mod boundary;
pub mod driver;
pub mod error;
pub mod field;
pub mod halo;
pub mod index_space;
pub mod io;
pub mod launch;
pub mod message;
pub mod settings;
pub mod stats;
pub mod stepper;
pub mod topology;

pub use error::{Error, Result};
