//! Contracts between the simulation and whatever stores its output.
//!
//! A [`Writer`] receives, once, where this rank's block sits in the global
//! array and the reaction constants of the run, then one ghost-free copy of
//! U and V per output step. A [`Reader`] hands back a step written earlier,
//! either to check that the round trip is lossless or to restart from it.
//!
//! Three engines are provided: [`cbor::CborStore`] keeps one CBOR file per
//! rank and step on disk, [`memory::MemoryStore`] keeps everything in a
//! shared in-memory map, and [`null::NullWriter`] throws the data away.

pub mod cbor;
pub mod memory;
pub mod null;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Where one rank's block sits in the global L x L x L array.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLayout {
    pub rank: usize,
    pub global: [usize; 3],
    pub offset: [usize; 3],
    pub count: [usize; 3],
}

impl BlockLayout {
    /// Number of values in the block.
    pub fn len(&self) -> usize {
        self.count.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Run constants stored once alongside the data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(rename = "F")]
    pub f: f64,
    pub k: f64,
    pub dt: f64,
    #[serde(rename = "Du")]
    pub du: f64,
    #[serde(rename = "Dv")]
    pub dv: f64,
    pub noise: f64,
}

/// One output step of one rank: the iteration it was taken at, and the
/// ghost-free U and V blocks in (x, y, z) row-major order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepData {
    pub iteration: u64,
    pub u: Vec<f64>,
    pub v: Vec<f64>,
}

pub trait Writer {
    fn open(&mut self, name: &str, layout: &BlockLayout, attributes: &Attributes) -> Result<()>;
    fn write(&mut self, iteration: u64, u: &[f64], v: &[f64]) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

pub trait Reader {
    /// Prepare to read the step written at iteration `requested` for the
    /// block described by `layout`.
    fn open(&mut self, name: &str, layout: &BlockLayout, requested: u64) -> Result<()>;

    /// Return the step selected by `open`. The iteration it carries is the
    /// one that was actually found, which the caller checks.
    fn read(&mut self) -> Result<StepData>;

    fn close(&mut self) -> Result<()>;
}
