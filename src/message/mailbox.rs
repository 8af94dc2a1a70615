use std::collections::{HashMap, VecDeque};

use log::debug;
use serde::{Deserialize, Serialize};

use super::{comm::Communicator, util};
use crate::error::{Error, Result};
use crate::topology::Direction;

/// Identifies what a message is for, so that a receive can pick it out of
/// the stream of messages arriving from any peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// Ghost data travelling in the given direction.
    Halo(Direction),
    Reduce,
    Broadcast,
}

/// The unit of transfer. `epoch` counts exchanges (or collectives) on the
/// sending side; the receiver expects the same count on its side, which
/// catches ranks that have fallen out of lockstep.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub source: usize,
    pub tag: Tag,
    pub epoch: u64,
    pub data: Vec<f64>,
}

/// Matched, tagged receives on top of a receive-from-any [`Communicator`].
/// Messages that arrive before anyone asks for them are kept, per source and
/// tag, in arrival order, until a matching `take`. Transports deliver the
/// messages of one sender in order, so the front of each queue is always the
/// oldest outstanding message for that source and tag.
pub struct Mailbox<C> {
    comm: C,
    pending: HashMap<(usize, Tag), VecDeque<Envelope>>,
    collective_epoch: u64,
}

impl<C: Communicator> Mailbox<C> {
    pub fn new(comm: C) -> Self {
        Self {
            comm,
            pending: HashMap::new(),
            collective_epoch: 0,
        }
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    /// Number of messages received but not yet taken.
    pub fn num_pending(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    /// Send `data` to rank `dest`. Never blocks.
    pub fn post(&self, dest: usize, tag: Tag, epoch: u64, data: Vec<f64>) -> Result<()> {
        let envelope = Envelope {
            source: self.comm.rank(),
            tag,
            epoch,
            data,
        };
        let bytes = rmp_serde::encode::to_vec(&envelope).map_err(Error::codec)?;
        self.comm.send(dest, bytes)
    }

    /// Block until the message with the given tag from `source` arrives, and
    /// return its data. The message must belong to `epoch`.
    pub fn take(&mut self, source: usize, tag: Tag, epoch: u64) -> Result<Vec<f64>> {
        if let Some(envelope) = self.pending.get_mut(&(source, tag)).and_then(VecDeque::pop_front) {
            return Self::open(envelope, epoch);
        }
        loop {
            let bytes = self.comm.recv()?;
            let envelope: Envelope = rmp_serde::decode::from_slice(&bytes).map_err(Error::codec)?;

            if envelope.source == source && envelope.tag == tag {
                return Self::open(envelope, epoch);
            }
            debug!(
                "[{}] buffering {:?} from rank {} (epoch {}) while waiting for {:?} from rank {}",
                self.comm.rank(),
                envelope.tag,
                envelope.source,
                envelope.epoch,
                tag,
                source
            );
            self.pending
                .entry((envelope.source, envelope.tag))
                .or_default()
                .push_back(envelope);
        }
    }

    fn open(envelope: Envelope, epoch: u64) -> Result<Vec<f64>> {
        if envelope.epoch != epoch {
            return Err(Error::communication(format!(
                "{:?} message from rank {} belongs to epoch {}, expected epoch {}",
                envelope.tag, envelope.source, envelope.epoch, epoch
            )));
        }
        Ok(envelope.data)
    }

    /// Binomial tree broadcast from rank 0. The value must be `Some` on rank
    /// 0, and it is ignored elsewhere.
    pub fn broadcast(&mut self, value: Option<Vec<f64>>) -> Result<Vec<f64>> {
        self.collective_epoch += 1;
        let epoch = self.collective_epoch;
        let r = self.rank();
        let p = self.size();

        let value = if r == 0 {
            value.ok_or_else(|| Error::communication("broadcast root has no value"))?
        } else {
            // The parent is this rank with its lowest set bit cleared.
            self.take(r & (r - 1), Tag::Broadcast, epoch)?
        };

        for level in (0..util::ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = one << 1;

            if r % two == 0 && r + one < p {
                self.post(r + one, Tag::Broadcast, epoch, value.clone())?;
            }
        }
        Ok(value)
    }

    /// Binomial tree reduce onto rank 0. All ranks return `None` except for
    /// the root.
    pub fn reduce<F>(&mut self, f: F, mut value: Vec<f64>) -> Result<Option<Vec<f64>>>
    where
        F: Fn(Vec<f64>, Vec<f64>) -> Vec<f64>,
    {
        self.collective_epoch += 1;
        let epoch = self.collective_epoch;
        let r = self.rank();
        let p = self.size();

        for level in 0..util::ceil_log2(p) {
            let one = 1 << level;
            let two = one << 1;

            if r % two == 0 {
                if r + one < p {
                    value = f(value, self.take(r + one, Tag::Reduce, epoch)?);
                }
            } else {
                self.post(r - one, Tag::Reduce, epoch, value)?;
                return Ok(None);
            }
        }
        Ok(Some(value))
    }

    /// All-reduce (symmetric fold) over a commutative binary operator.
    pub fn all_reduce<F>(&mut self, f: F, value: Vec<f64>) -> Result<Vec<f64>>
    where
        F: Fn(Vec<f64>, Vec<f64>) -> Vec<f64>,
    {
        let reduced = self.reduce(f, value)?;
        self.broadcast(reduced)
    }

    /// Element-wise global sum.
    pub fn all_reduce_sum(&mut self, value: Vec<f64>) -> Result<Vec<f64>> {
        self.all_reduce(|a, b| a.iter().zip(&b).map(|(x, y)| x + y).collect(), value)
    }

    /// Element-wise global maximum.
    pub fn all_reduce_max(&mut self, value: Vec<f64>) -> Result<Vec<f64>> {
        self.all_reduce(|a, b| a.iter().zip(&b).map(|(x, y)| x.max(*y)).collect(), value)
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::message::channel::ChannelCommunicator;
    use std::thread;

    fn run_group<F, T>(size: usize, f: F) -> Vec<T>
    where
        F: Fn(Mailbox<ChannelCommunicator>) -> T + Send + Sync + Copy + 'static,
        T: Send + 'static,
    {
        let procs: Vec<_> = ChannelCommunicator::group(size)
            .into_iter()
            .map(|comm| thread::spawn(move || f(Mailbox::new(comm))))
            .collect();
        procs.into_iter().map(|p| p.join().unwrap()).collect()
    }

    #[test]
    fn take_matches_out_of_order_messages() {
        let mut group = ChannelCommunicator::group(2).into_iter().map(Mailbox::new);
        let sender = group.next().unwrap();
        let mut receiver = group.next().unwrap();

        sender.post(1, Tag::Halo(Direction::East), 1, vec![1.0]).unwrap();
        sender.post(1, Tag::Halo(Direction::West), 1, vec![2.0]).unwrap();

        assert_eq!(receiver.take(0, Tag::Halo(Direction::West), 1).unwrap(), vec![2.0]);
        assert_eq!(receiver.num_pending(), 1);
        assert_eq!(receiver.take(0, Tag::Halo(Direction::East), 1).unwrap(), vec![1.0]);
        assert_eq!(receiver.num_pending(), 0);
    }

    #[test]
    fn message_from_another_epoch_is_an_error() {
        let mut group = ChannelCommunicator::group(2).into_iter().map(Mailbox::new);
        let sender = group.next().unwrap();
        let mut receiver = group.next().unwrap();

        sender.post(1, Tag::Reduce, 7, vec![]).unwrap();
        assert!(receiver.take(0, Tag::Reduce, 8).unwrap_err().is_communication());
    }

    #[test]
    fn all_reduce_sum_agrees_on_every_rank() {
        for size in [1, 2, 3, 5, 8] {
            let results = run_group(size, |mut mailbox| {
                let r = mailbox.rank() as f64;
                mailbox.all_reduce_sum(vec![r, 1.0]).unwrap()
            });
            let expected = (0..size).sum::<usize>() as f64;
            for result in results {
                assert_eq!(result, vec![expected, size as f64]);
            }
        }
    }

    #[test]
    fn reduce_returns_only_on_the_root() {
        let results = run_group(6, |mut mailbox| {
            let r = mailbox.rank() as f64;
            mailbox.reduce(|a, b| vec![a[0].max(b[0])], vec![r]).unwrap()
        });
        assert_eq!(results[0], Some(vec![5.0]));
        assert!(results[1..].iter().all(Option::is_none));
    }

    #[test]
    fn broadcast_delivers_the_root_value() {
        let results = run_group(7, |mut mailbox| {
            let value = if mailbox.rank() == 0 { Some(vec![42.0, -1.0]) } else { None };
            mailbox.broadcast(value).unwrap()
        });
        assert!(results.iter().all(|v| v == &vec![42.0, -1.0]));
    }

    #[test]
    fn consecutive_collectives_do_not_mix() {
        let results = run_group(4, |mut mailbox| {
            let r = mailbox.rank() as f64;
            let a = mailbox.all_reduce_sum(vec![r]).unwrap();
            let b = mailbox.all_reduce_max(vec![r]).unwrap();
            let c = mailbox.all_reduce_sum(vec![1.0]).unwrap();
            (a[0], b[0], c[0])
        });
        assert!(results.iter().all(|&v| v == (6.0, 3.0, 4.0)));
    }
}
