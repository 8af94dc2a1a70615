use super::{Attributes, BlockLayout, Writer};
use crate::error::Result;

/// A writer that discards everything, for runs that only time the compute
/// and the halo exchange.
#[derive(Debug, Default)]
pub struct NullWriter;

impl NullWriter {
    pub fn new() -> Self {
        Self
    }
}

impl Writer for NullWriter {
    fn open(&mut self, _name: &str, _layout: &BlockLayout, _attributes: &Attributes) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, _iteration: u64, _u: &[f64], _v: &[f64]) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}
