use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use super::{Attributes, BlockLayout, Reader, StepData, Writer};
use crate::error::{Error, Result};

#[derive(Serialize, Deserialize)]
struct Header {
    layout: BlockLayout,
    attributes: Attributes,
}

/// Stores every rank's output in its own directory, one CBOR file per step:
///
/// ```text
/// <name>/rank-00000/header.cbor
/// <name>/rank-00000/step-0000000200.cbor
/// ...
/// ```
///
/// The header records the block layout and the run constants.
#[derive(Debug, Default)]
pub struct CborStore {
    writing: Option<PathBuf>,
    reading: Option<(PathBuf, u64)>,
}

impl CborStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory holding the output of the given rank.
    pub fn rank_dir(name: &str, rank: usize) -> PathBuf {
        Path::new(name).join(format!("rank-{:05}", rank))
    }

    pub fn step_path(dir: &Path, iteration: u64) -> PathBuf {
        dir.join(format!("step-{:010}.cbor", iteration))
    }

    fn header_path(dir: &Path) -> PathBuf {
        dir.join("header.cbor")
    }
}

fn save<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buffer = BufWriter::new(File::create(path)?);
    ciborium::ser::into_writer(value, &mut buffer).map_err(Error::codec)?;
    buffer.flush()?;
    Ok(())
}

fn load<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let buffer = BufReader::new(File::open(path)?);
    ciborium::de::from_reader(buffer).map_err(Error::codec)
}

impl Writer for CborStore {
    fn open(&mut self, name: &str, layout: &BlockLayout, attributes: &Attributes) -> Result<()> {
        let dir = Self::rank_dir(name, layout.rank);
        fs::create_dir_all(&dir)?;

        let header = Header {
            layout: layout.clone(),
            attributes: attributes.clone(),
        };
        save(&Self::header_path(&dir), &header)?;
        debug!("rank {} writing to {}", layout.rank, dir.display());
        self.writing = Some(dir);
        Ok(())
    }

    fn write(&mut self, iteration: u64, u: &[f64], v: &[f64]) -> Result<()> {
        let dir = self
            .writing
            .as_ref()
            .ok_or_else(|| Error::config("CBOR store written before it was opened"))?;

        let data = StepData {
            iteration,
            u: u.to_vec(),
            v: v.to_vec(),
        };
        save(&Self::step_path(dir, iteration), &data)
    }

    fn close(&mut self) -> Result<()> {
        self.writing = None;
        Ok(())
    }
}

impl Reader for CborStore {
    fn open(&mut self, name: &str, layout: &BlockLayout, requested: u64) -> Result<()> {
        let dir = Self::rank_dir(name, layout.rank);
        let header: Header = load(&Self::header_path(&dir))?;

        if header.layout != *layout {
            return Err(Error::config(format!(
                "'{}' holds block {:?} for rank {}, but this run has {:?}",
                name, header.layout, layout.rank, layout
            )));
        }
        self.reading = Some((dir, requested));
        Ok(())
    }

    fn read(&mut self) -> Result<StepData> {
        let (dir, requested) = self
            .reading
            .as_ref()
            .ok_or_else(|| Error::config("CBOR store read before it was opened"))?;

        load(&Self::step_path(dir, *requested))
    }

    fn close(&mut self) -> Result<()> {
        self.reading = None;
        Ok(())
    }
}

#[cfg(test)]
mod test {

    use super::*;

    fn scratch(name: &str) -> String {
        let dir = std::env::temp_dir().join(format!("grayscott-cbor-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir.to_string_lossy().into_owned()
    }

    fn layout() -> BlockLayout {
        BlockLayout { rank: 3, global: [4, 4, 4], offset: [2, 0, 0], count: [2, 2, 1] }
    }

    fn attributes() -> Attributes {
        Attributes { f: 0.04, k: 0.06075, dt: 0.2, du: 0.05, dv: 0.1, noise: 1e-7 }
    }

    #[test]
    fn written_steps_are_read_back_exactly() {
        let name = scratch("round-trip");
        let u = vec![0.1, 0.2, 1.0 / 3.0, f64::MIN_POSITIVE];
        let v = vec![-0.0, 1e300, 0.5, 0.25];

        let mut writer = CborStore::new();
        Writer::open(&mut writer, &name, &layout(), &attributes()).unwrap();
        writer.write(100, &u, &v).unwrap();
        Writer::close(&mut writer).unwrap();

        assert!(CborStore::rank_dir(&name, 3).join("step-0000000100.cbor").exists());

        let mut reader = CborStore::new();
        Reader::open(&mut reader, &name, &layout(), 100).unwrap();
        let step = reader.read().unwrap();
        Reader::close(&mut reader).unwrap();

        assert_eq!(step.iteration, 100);
        assert_eq!(step.u, u);
        assert_eq!(step.v, v);
        let header: Header = load(&CborStore::header_path(&CborStore::rank_dir(&name, 3))).unwrap();
        assert_eq!(header.attributes, attributes());
        fs::remove_dir_all(&name).unwrap();
    }

    #[test]
    fn reader_rejects_a_different_layout() {
        let name = scratch("layout");
        let mut writer = CborStore::new();
        Writer::open(&mut writer, &name, &layout(), &attributes()).unwrap();

        let other = BlockLayout { offset: [0, 0, 0], ..layout() };
        let mut reader = CborStore::new();
        assert!(Reader::open(&mut reader, &name, &other, 0).unwrap_err().is_configuration());
        fs::remove_dir_all(&name).unwrap();
    }

    #[test]
    fn missing_step_is_an_io_error() {
        let name = scratch("missing");
        let mut writer = CborStore::new();
        Writer::open(&mut writer, &name, &layout(), &attributes()).unwrap();

        let mut reader = CborStore::new();
        Reader::open(&mut reader, &name, &layout(), 42).unwrap();
        assert!(matches!(reader.read(), Err(Error::Io(_))));
        fs::remove_dir_all(&name).unwrap();
    }
}
