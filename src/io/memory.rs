use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Attributes, BlockLayout, Reader, StepData, Writer};
use crate::error::{Error, Result};

type Key = (String, usize, u64);

#[derive(Default)]
struct Contents {
    headers: HashMap<(String, usize), (BlockLayout, Attributes)>,
    steps: HashMap<Key, StepData>,
}

/// An in-memory store shared by all of its clones. Each clone keeps its own
/// open stream, so one clone can be handed to every rank as a writer and
/// another as a reader, while all of them see the same steps.
#[derive(Clone, Default)]
pub struct MemoryStore {
    contents: Arc<Mutex<Contents>>,
    writing: Option<(String, BlockLayout)>,
    reading: Option<Key>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a copy of the step written by `rank` at `iteration`, if any.
    pub fn get(&self, name: &str, rank: usize, iteration: u64) -> Option<StepData> {
        let contents = self.contents.lock().ok()?;
        contents.steps.get(&(name.to_string(), rank, iteration)).cloned()
    }

    /// Iterations written by `rank` under `name`, in increasing order.
    pub fn iterations(&self, name: &str, rank: usize) -> Vec<u64> {
        let mut iterations: Vec<_> = match self.contents.lock() {
            Ok(contents) => contents
                .steps
                .keys()
                .filter(|(n, r, _)| n == name && *r == rank)
                .map(|(_, _, i)| *i)
                .collect(),
            Err(_) => Vec::new(),
        };
        iterations.sort_unstable();
        iterations
    }

    pub fn attributes(&self, name: &str, rank: usize) -> Option<Attributes> {
        let contents = self.contents.lock().ok()?;
        contents.headers.get(&(name.to_string(), rank)).map(|(_, a)| a.clone())
    }

    /// Store a step under the given key, replacing what was there. The step
    /// need not match what a writer would have produced for that key.
    pub fn insert(&self, name: &str, rank: usize, iteration: u64, data: StepData) -> Result<()> {
        self.lock()?.steps.insert((name.to_string(), rank, iteration), data);
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Contents>> {
        self.contents
            .lock()
            .map_err(|_| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "memory store was poisoned by a panicking rank",
                ))
            })
    }
}

impl Writer for MemoryStore {
    fn open(&mut self, name: &str, layout: &BlockLayout, attributes: &Attributes) -> Result<()> {
        self.lock()?
            .headers
            .insert((name.to_string(), layout.rank), (layout.clone(), attributes.clone()));
        self.writing = Some((name.to_string(), layout.clone()));
        Ok(())
    }

    fn write(&mut self, iteration: u64, u: &[f64], v: &[f64]) -> Result<()> {
        let (name, layout) = self
            .writing
            .as_ref()
            .ok_or_else(|| Error::config("memory store written before it was opened"))?;

        if u.len() != layout.len() || v.len() != layout.len() {
            return Err(Error::SizeMismatch {
                expected: layout.len(),
                found: u.len().max(v.len()),
            });
        }
        let data = StepData {
            iteration,
            u: u.to_vec(),
            v: v.to_vec(),
        };
        self.lock()?.steps.insert((name.clone(), layout.rank, iteration), data);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.writing = None;
        Ok(())
    }
}

impl Reader for MemoryStore {
    fn open(&mut self, name: &str, layout: &BlockLayout, requested: u64) -> Result<()> {
        self.reading = Some((name.to_string(), layout.rank, requested));
        Ok(())
    }

    fn read(&mut self) -> Result<StepData> {
        let key = self
            .reading
            .as_ref()
            .ok_or_else(|| Error::config("memory store read before it was opened"))?;

        self.lock()?.steps.get(key).cloned().ok_or_else(|| Error::RoundTrip {
            iteration: key.2,
            msg: format!("no step {} for rank {} in '{}'", key.2, key.1, key.0),
        })
    }

    fn close(&mut self) -> Result<()> {
        self.reading = None;
        Ok(())
    }
}

#[cfg(test)]
mod test {

    use super::*;

    fn layout(rank: usize) -> BlockLayout {
        BlockLayout { rank, global: [2, 2, 2], offset: [0, 0, 0], count: [1, 2, 2] }
    }

    fn attributes() -> Attributes {
        Attributes { f: 0.02, k: 0.048, dt: 1.0, du: 0.2, dv: 0.1, noise: 0.0 }
    }

    #[test]
    fn clones_share_written_steps() {
        let store = MemoryStore::new();
        let mut writer = store.clone();
        let mut reader = store.clone();

        Writer::open(&mut writer, "gs", &layout(1), &attributes()).unwrap();
        writer.write(10, &[1.0, 2.0, 3.0, 4.0], &[0.0; 4]).unwrap();
        Writer::close(&mut writer).unwrap();

        Reader::open(&mut reader, "gs", &layout(1), 10).unwrap();
        let step = reader.read().unwrap();
        assert_eq!(step.iteration, 10);
        assert_eq!(step.u, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(store.iterations("gs", 1), vec![10]);
        assert_eq!(store.attributes("gs", 1), Some(attributes()));
    }

    #[test]
    fn missing_step_is_a_round_trip_error() {
        let mut reader = MemoryStore::new();
        Reader::open(&mut reader, "gs", &layout(0), 5).unwrap();
        assert!(reader.read().unwrap_err().is_round_trip());
    }

    #[test]
    fn wrong_block_size_is_rejected() {
        let mut writer = MemoryStore::new();
        Writer::open(&mut writer, "gs", &layout(0), &attributes()).unwrap();
        assert!(writer.write(0, &[1.0; 3], &[1.0; 4]).is_err());
    }

    #[test]
    fn poisoned_store_is_an_io_error() {
        let store = MemoryStore::new();
        let shared = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.contents.lock().unwrap();
            panic!("rank dies holding the store");
        })
        .join();

        let step = StepData { iteration: 0, u: vec![], v: vec![] };
        let err = store.insert("gs", 0, 0, step).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(!err.is_communication());
    }
}
