use std::thread;

use core_affinity::{get_core_ids, set_for_current};
use log::error;

use crate::error::{Error, Result};
use crate::message::channel::{AbortHandle, ChannelCommunicator};
use crate::message::comm::Communicator;

/// Aborts the group if the rank thread unwinds, so that a panic on one rank
/// does not leave the others blocked in a receive.
struct AbortOnPanic(AbortHandle);

impl Drop for AbortOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.abort();
        }
    }
}

/// Run `f` once per rank, each on its own thread, with the ranks connected by
/// the channel transport. If `pin_threads` is set, rank `r` is pinned to core
/// `r` modulo the number of cores.
///
/// When a rank fails, the group is aborted, so that the other ranks return
/// [`Error::Aborted`] instead of waiting for messages that will never come.
/// A rank whose thread cannot be spawned aborts the group the same way. On
/// failure the error of the lowest rank that failed with something other
/// than [`Error::Aborted`] is returned, so an abort never hides its cause.
/// On success the per-rank results are returned in rank order.
pub fn run_local<F, T>(ranks: usize, pin_threads: bool, f: F) -> Result<Vec<T>>
where
    F: Fn(ChannelCommunicator) -> Result<T> + Sync,
    T: Send,
{
    if ranks == 0 {
        return Err(Error::config("at least one rank is required"));
    }

    let cores = if pin_threads {
        get_core_ids().unwrap_or_default()
    } else {
        Vec::new()
    };
    let f = &f;

    let results: Vec<Result<T>> = thread::scope(|scope| {
        let handles: Vec<_> = ChannelCommunicator::group(ranks)
            .into_iter()
            .map(|comm| {
                let rank = comm.rank();
                let abort = comm.abort_handle();
                let spawn_failed = abort.clone();
                let core = cores.get(rank % cores.len().max(1)).copied();

                thread::Builder::new()
                    .name(format!("rank-{}", rank))
                    .spawn_scoped(scope, move || {
                        let guard = AbortOnPanic(abort);

                        if let Some(core) = core {
                            set_for_current(core);
                        }
                        let result = f(comm);

                        if let Err(e) = &result {
                            if !matches!(e, Error::Aborted) {
                                error!("rank {} failed: {}", rank, e);
                            }
                            guard.0.abort();
                        }
                        result
                    })
                    .map_err(|e| abandon(rank, &spawn_failed, e))
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| match handle {
                Ok(handle) => handle
                    .join()
                    .unwrap_or_else(|_| Err(Error::communication("rank thread panicked"))),
                Err(e) => Err(Error::Io(e)),
            })
            .collect()
    });

    first_failure(results)
}

/// A rank that never started still leaves its peers waiting for it.
fn abandon(rank: usize, abort: &AbortHandle, e: std::io::Error) -> std::io::Error {
    error!("could not start the thread of rank {}: {}", rank, e);
    abort.abort();
    e
}

fn first_failure<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    if results.iter().all(Result::is_ok) {
        return results.into_iter().collect();
    }
    let mut errors: Vec<Error> = results.into_iter().filter_map(Result::err).collect();
    let root = errors
        .iter()
        .position(|e| !matches!(e, Error::Aborted))
        .unwrap_or(0);
    Err(errors.swap_remove(root))
}
