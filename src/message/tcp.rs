use std::collections::hash_map::{Entry, HashMap};
use std::io::prelude::*;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use super::backoff::{ExponentialBackoff, Retry};
use super::{comm::Communicator, util};
use crate::error::{Error, Result};

const CXN_W_TIMEOUT: Duration = Duration::from_millis(5000);
const ACK_TIMEOUT: Duration = Duration::from_millis(5000);
const RETRY_WAIT: Duration = Duration::from_millis(250);
const RETRY_MAX_WAIT: Duration = Duration::from_millis(5000);
const CONNECT_ATTEMPTS: usize = 20;
const ABORT_CONNECT_ATTEMPTS: usize = 5;

/// Length word reserved for the abort frame, which carries no payload.
const ABORT_FRAME: usize = usize::MAX;

/// What travels between the communicator and its host threads, in either
/// direction.
#[derive(Debug)]
enum Frame {
    Data(Vec<u8>),
    Abort,
}

type Outbound = crossbeam_channel::Sender<(usize, Frame)>;
type Inbound = crossbeam_channel::Receiver<Frame>;
type Failure = Arc<Mutex<Option<String>>>;

/// The threads behind a [`TcpCommunicator`]: one listener accepting
/// connections from peers (plus one reader per accepted connection), and
/// one serial sender that owns a connection to every peer it has written
/// to. Every frame is a little-endian length followed by the payload; the
/// receiver acknowledges a frame by echoing its length. A length of
/// [`ABORT_FRAME`] with no payload tells the receiver that the group is
/// aborted.
struct TcpHost {
    send_thread: Option<thread::JoinHandle<()>>,
}

impl TcpHost {
    fn new(rank: usize, peers: Vec<SocketAddr>, failure: Failure) -> Result<(Self, Outbound, Inbound)> {
        let listener = TcpListener::bind(peers[rank])?;
        info!("Listening to: {}", peers[rank]);

        let (recv_sink, recv_src) = crossbeam_channel::unbounded();
        Self::start_listener(listener, recv_sink);

        let (send_sink, send_src) = crossbeam_channel::unbounded();
        let send_thread = Self::start_serial_sender(peers, send_src, failure);

        Ok((
            TcpHost {
                send_thread: Some(send_thread),
            },
            send_sink,
            recv_src,
        ))
    }

    fn start_serial_sender(
        peers: Vec<SocketAddr>,
        send_src: crossbeam_channel::Receiver<(usize, Frame)>,
        failure: Failure,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let mut table: HashMap<usize, TcpStream> = HashMap::new();
            let mut failed = false;

            for (rank, frame) in send_src {
                match frame {
                    Frame::Data(_) if failed => {}
                    Frame::Data(message) => {
                        if let Err(e) = Self::deliver(&mut table, peers[rank], rank, message.len(), &message, CONNECT_ATTEMPTS) {
                            error!("Failed to send message to {}: {}", peers[rank], e);
                            if let Ok(mut failure) = failure.lock() {
                                failure.get_or_insert_with(|| format!("rank {} at {}: {}", rank, peers[rank], e));
                            }
                            failed = true;
                        }
                    }
                    Frame::Abort => {
                        // A peer that is already gone needs no telling.
                        if let Err(e) = Self::deliver(&mut table, peers[rank], rank, ABORT_FRAME, &[], ABORT_CONNECT_ATTEMPTS) {
                            debug!("Could not notify {} of the abort: {}", peers[rank], e);
                        }
                    }
                }
            }
            debug!("Serial sender shutting down");
        })
    }

    /// Write one frame and wait for its acknowledgement. Only establishing
    /// the connection is retried: once any part of the frame has been
    /// written, the receiver may already have it, so a failure from then on
    /// is final.
    fn deliver(
        table: &mut HashMap<usize, TcpStream>,
        addr: SocketAddr,
        rank: usize,
        header: usize,
        payload: &[u8],
        attempts: usize,
    ) -> std::io::Result<()> {
        let client = match table.entry(rank) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(Self::connect_with_retry(addr, attempts)?),
        };

        let result = Self::write_frame(client, header, payload);
        if result.is_err() {
            table.remove(&rank);
        }
        result
    }

    fn write_frame(client: &mut TcpStream, header: usize, payload: &[u8]) -> std::io::Result<()> {
        client.write_all(&header.to_le_bytes())?;
        client.write_all(payload)?;

        let ack = util::read_usize(client)?;
        if ack != header {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("sent frame {} but receiver acked {}", header, ack),
            ));
        }
        Ok(())
    }

    fn start_listener(listener: TcpListener, recv_sink: crossbeam_channel::Sender<Frame>) {
        thread::spawn(move || {
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => Self::handle_connection(stream, recv_sink.clone()),
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            }
        });
    }

    fn handle_connection(mut stream: TcpStream, recv_sink: crossbeam_channel::Sender<Frame>) {
        let remote = stream.peer_addr().map(|a| a.to_string()).unwrap_or_else(|_| "?".into());
        info!("Receiving connection from {}", remote);

        thread::spawn(move || loop {
            let result = util::read_usize(&mut stream)
                .and_then(|header| match header {
                    ABORT_FRAME => Ok((header, Frame::Abort)),
                    size => util::read_bytes_vec(&mut stream, size).map(|bytes| (header, Frame::Data(bytes))),
                })
                .and_then(|(header, frame)| {
                    recv_sink
                        .send(frame)
                        .map(|()| header)
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
                })
                .and_then(|header| stream.write_all(&header.to_le_bytes()));

            if let Err(e) = result {
                debug!("Connection from {} closed: {}", remote, e);
                break;
            }
        });
    }

    fn connect_with_retry(addr: SocketAddr, attempts: usize) -> std::io::Result<TcpStream> {
        info!("Connecting to {}...", addr);

        ExponentialBackoff::new(RETRY_WAIT, RETRY_MAX_WAIT, 2)
            .take(attempts)
            .retry(
                || -> std::io::Result<TcpStream> {
                    let s = TcpStream::connect(addr)?;
                    s.set_write_timeout(Some(CXN_W_TIMEOUT))?;
                    s.set_read_timeout(Some(ACK_TIMEOUT))?;
                    s.set_nodelay(true)?;
                    Ok(s)
                },
                |e: &std::io::Error, delay| {
                    warn!("Connect to {} failed: {}; retrying in {:?}", addr, e, delay);
                    thread::sleep(delay);
                },
            )
            .unwrap_or_else(|| Err(std::io::Error::new(std::io::ErrorKind::Other, "no connection attempt made")))
    }

    fn join(&mut self) {
        if let Some(handle) = self.send_thread.take() {
            if handle.join().is_err() {
                error!("Serial sender thread panicked");
            }
        }
    }
}

/////////////////////////////////////////////////////

/// A communicator whose ranks are separate processes, possibly on separate
/// hosts, addressed by the socket addresses in `peers` (indexed by rank).
pub struct TcpCommunicator {
    rank: usize,
    num_peers: usize,
    recv_timeout: Option<Duration>,
    failure: Failure,
    aborted: AtomicBool,
    send_sink: Option<Outbound>,
    recv_src: Inbound,
    host: TcpHost,
}

impl TcpCommunicator {
    /// Start listening on `peers[rank]`. Connections to peers are made
    /// lazily on first send. With a `recv_timeout`, a receive that waits
    /// longer than that fails; this is how a rank notices that a peer died.
    pub fn connect(rank: usize, peers: Vec<SocketAddr>, recv_timeout: Option<Duration>) -> Result<Self> {
        if rank >= peers.len() {
            return Err(Error::config(format!(
                "rank {} is outside a group of {} peers",
                rank,
                peers.len()
            )));
        }
        let num_peers = peers.len();
        let failure = Failure::default();
        let (host, send_sink, recv_src) = TcpHost::new(rank, peers, Arc::clone(&failure))?;

        Ok(Self {
            rank,
            num_peers,
            recv_timeout,
            failure,
            aborted: AtomicBool::new(false),
            send_sink: Some(send_sink),
            recv_src,
            host,
        })
    }

    fn check_failure(&self) -> Result<()> {
        match self.failure.lock() {
            Ok(failure) => match failure.as_ref() {
                Some(msg) => Err(Error::communication(format!("send failed: {}", msg))),
                None => Ok(()),
            },
            Err(_) => Err(Error::communication("serial sender state poisoned")),
        }
    }

    fn outbound(&self) -> Result<&Outbound> {
        self.send_sink
            .as_ref()
            .ok_or_else(|| Error::communication("communicator is shut down"))
    }

    fn accept(&self, frame: Frame) -> Result<Vec<u8>> {
        match frame {
            Frame::Data(message) => Ok(message),
            Frame::Abort => {
                self.aborted.store(true, Ordering::SeqCst);
                Err(Error::Aborted)
            }
        }
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.num_peers
    }

    fn send(&self, rank: usize, message: Vec<u8>) -> Result<()> {
        self.check_failure()?;
        if rank >= self.num_peers {
            return Err(Error::communication(format!(
                "rank {} is outside a group of {}",
                rank, self.num_peers
            )));
        }
        self.outbound()?
            .send((rank, Frame::Data(message)))
            .map_err(|_| Error::communication("serial sender is gone"))
    }

    fn recv(&self) -> Result<Vec<u8>> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(Error::Aborted);
        }
        self.check_failure()?;
        let frame = match self.recv_timeout {
            Some(timeout) => self.recv_src.recv_timeout(timeout).map_err(|_| {
                Error::communication(format!("no message received within {:?}", timeout))
            })?,
            None => self
                .recv_src
                .recv()
                .map_err(|_| Error::communication("listener is gone"))?,
        };
        self.accept(frame)
    }

    /// Queue an abort frame to every other rank. The frames go out behind
    /// anything already queued, and dropping the communicator waits for
    /// them to be written.
    fn abort(&self) {
        if self.aborted.swap(true, Ordering::SeqCst) {
            return;
        }
        let outbound = match self.outbound() {
            Ok(outbound) => outbound,
            Err(_) => return,
        };
        for rank in (0..self.num_peers).filter(|&r| r != self.rank) {
            if outbound.send((rank, Frame::Abort)).is_err() {
                warn!("Serial sender is gone; rank {} is not told of the abort", rank);
                break;
            }
        }
        debug!("rank {} aborted the group", self.rank);
    }
}

impl Drop for TcpCommunicator {
    fn drop(&mut self) {
        // Closing the outbound channel lets the serial sender flush what is
        // queued and exit.
        self.send_sink.take();
        self.host.join();
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn free_addr() -> SocketAddr {
        let spare = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).unwrap();
        spare.local_addr().unwrap()
    }

    #[test]
    fn two_ranks_exchange_over_loopback() {
        let peers = vec![free_addr(), free_addr()];
        let timeout = Some(Duration::from_secs(20));

        let procs: Vec<_> = (0..2)
            .map(|rank| {
                let peers = peers.clone();
                thread::spawn(move || {
                    let comm = TcpCommunicator::connect(rank, peers, timeout).unwrap();
                    comm.send(1 - rank, vec![rank as u8; 3]).unwrap();
                    comm.recv().unwrap()
                })
            })
            .collect();

        let received: Vec<_> = procs.into_iter().map(|p| p.join().unwrap()).collect();
        assert_eq!(received, vec![vec![1; 3], vec![0; 3]]);
    }

    #[test]
    fn abort_reaches_a_rank_blocked_in_recv() {
        let peers = vec![free_addr(), free_addr(), free_addr()];
        let timeout = Some(Duration::from_secs(20));

        let procs: Vec<_> = (0..3)
            .map(|rank| {
                let peers = peers.clone();
                thread::spawn(move || {
                    let comm = TcpCommunicator::connect(rank, peers, timeout).unwrap();
                    if rank == 0 {
                        comm.send(1, vec![7; 2]).unwrap();
                        comm.abort();
                        comm.abort();
                        return Vec::new();
                    }
                    let mut received = Vec::new();
                    loop {
                        match comm.recv() {
                            Ok(message) => received.push(Ok(message)),
                            Err(e) => {
                                received.push(Err(matches!(e, Error::Aborted)));
                                break;
                            }
                        }
                    }
                    assert!(matches!(comm.recv(), Err(Error::Aborted)));
                    received
                })
            })
            .collect();

        let received: Vec<_> = procs.into_iter().map(|p| p.join().unwrap()).collect();
        assert!(received[0].is_empty());
        assert_eq!(received[1], vec![Ok(vec![7; 2]), Err(true)]);
        assert_eq!(received[2], vec![Err(true)]);
    }

    #[test]
    fn unacknowledged_frame_is_not_sent_twice() {
        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).unwrap();
        let addr = listener.local_addr().unwrap();

        let receiver = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let size = util::read_usize(&mut stream).unwrap();
            let frame = util::read_bytes_vec(&mut stream, size).unwrap();
            drop(stream);

            listener.set_nonblocking(true).unwrap();
            thread::sleep(Duration::from_millis(500));
            (frame, listener.accept().is_ok())
        });

        let mut table = HashMap::new();
        let result = TcpHost::deliver(&mut table, addr, 1, 3, &[1, 2, 3], CONNECT_ATTEMPTS);
        assert!(result.is_err());
        assert!(table.is_empty());

        let (frame, reconnected) = receiver.join().unwrap();
        assert_eq!(frame, vec![1, 2, 3]);
        assert!(!reconnected);
    }

    #[test]
    fn rank_outside_the_peer_list_is_rejected() {
        assert!(TcpCommunicator::connect(2, vec![free_addr()], None).is_err());
    }
}
