use std::sync::{Arc, Mutex};

use crossbeam_channel::{select, unbounded, Receiver, Sender};
use log::debug;

use super::comm::Communicator;
use crate::error::{Error, Result};

/// An in-process transport: every rank is a thread, and every rank owns an
/// unbounded inbox channel. Sends never block. Aborting drops the shared
/// abort sender, which disconnects every rank's abort receiver and wakes up
/// anyone blocked in `recv`.
pub struct ChannelCommunicator {
    rank: usize,
    peers: Vec<Sender<Vec<u8>>>,
    inbox: Receiver<Vec<u8>>,
    abort_signal: Receiver<()>,
    abort_handle: AbortHandle,
}

/// Aborts the group a [`ChannelCommunicator`] belongs to, from outside the
/// rank that owns it.
#[derive(Clone)]
pub struct AbortHandle(Arc<Mutex<Option<Sender<()>>>>);

impl AbortHandle {
    /// Disconnect the abort channel. Returns `true` for the call that
    /// actually did it.
    pub fn abort(&self) -> bool {
        match self.0.lock() {
            Ok(mut sender) => sender.take().is_some(),
            Err(_) => false,
        }
    }
}

impl ChannelCommunicator {
    /// Create a fully connected group of `size` communicators, one per rank,
    /// in rank order.
    pub fn group(size: usize) -> Vec<ChannelCommunicator> {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();
        let (abort_sender, abort_signal) = unbounded();
        let abort_handle = AbortHandle(Arc::new(Mutex::new(Some(abort_sender))));

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| ChannelCommunicator {
                rank,
                peers: senders.clone(),
                inbox,
                abort_signal: abort_signal.clone(),
                abort_handle: abort_handle.clone(),
            })
            .collect()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()> {
        let peer = self.peers.get(rank).ok_or_else(|| {
            Error::communication(format!("rank {} is outside a group of {}", rank, self.peers.len()))
        })?;
        peer.send(message)
            .map_err(|_| Error::communication(format!("inbox of rank {} is closed", rank)))
    }

    fn recv(&self) -> Result<Vec<u8>> {
        select! {
            recv(self.inbox) -> message => message.map_err(|_| Error::communication("inbox disconnected")),
            recv(self.abort_signal) -> _ => Err(Error::Aborted),
        }
    }

    fn abort(&self) {
        if self.abort_handle.abort() {
            debug!("rank {} aborted the group", self.rank);
        }
    }
}
