//! # UDP Endpoint
//!
//! Datagram I/O for the node. Each direction runs on its own named thread
//! behind a bounded crossbeam channel:
//!
//! - receive: socket → queue. A full queue drops the datagram (counted).
//! - send: queue → socket. A full queue blocks the caller.
//!
//! The pipelines never touch the socket directly.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

/// Largest datagram the receive thread accepts.
const MAX_DATAGRAM: usize = 65_536;

/// How often the receive thread re-checks the stop flag.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// A datagram transport the node pushes BPP packets through.
pub trait Endpoint {
    fn start(&mut self) -> io::Result<()>;

    /// Stop both directions. Queued outgoing datagrams are flushed first.
    /// Idempotent.
    fn stop(&mut self);

    /// Queue one datagram for the peer; blocks while the send queue is full.
    fn send(&self, data: Bytes) -> io::Result<()>;

    /// Next received datagram; blocks. `None` once the endpoint has stopped
    /// and the queue is drained.
    fn receive(&self) -> Option<Bytes>;
}

pub struct UdpEndpoint {
    bind: SocketAddr,
    peer: Option<SocketAddr>,
    capacity: usize,
    socket: Option<Arc<UdpSocket>>,
    incoming: Option<Receiver<Bytes>>,
    outgoing: Option<Sender<Bytes>>,
    stop: Arc<AtomicBool>,
    overflow: Arc<AtomicU64>,
    threads: Vec<JoinHandle<()>>,
}

impl UdpEndpoint {
    /// `peer` is where [`Endpoint::send`] delivers; `capacity` bounds each
    /// direction's queue.
    pub fn new(bind: SocketAddr, peer: Option<SocketAddr>, capacity: usize) -> Self {
        UdpEndpoint {
            bind,
            peer,
            capacity: capacity.max(1),
            socket: None,
            incoming: None,
            outgoing: None,
            stop: Arc::new(AtomicBool::new(false)),
            overflow: Arc::new(AtomicU64::new(0)),
            threads: Vec::new(),
        }
    }

    /// Create and start in one step.
    pub fn bind(bind: SocketAddr, peer: Option<SocketAddr>, capacity: usize) -> io::Result<Self> {
        let mut endpoint = Self::new(bind, peer, capacity);
        endpoint.start()?;
        Ok(endpoint)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match &self.socket {
            Some(socket) => socket.local_addr(),
            None => Ok(self.bind),
        }
    }

    /// Like [`Endpoint::receive`] but gives up after `timeout`, so a loop
    /// can check its own shutdown flag.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Bytes, RecvTimeoutError> {
        match &self.incoming {
            Some(rx) => rx.recv_timeout(timeout),
            None => Err(RecvTimeoutError::Disconnected),
        }
    }

    /// Datagrams discarded because the receive queue was full.
    pub fn overflow(&self) -> u64 {
        self.overflow.load(Ordering::Relaxed)
    }
}

impl Endpoint for UdpEndpoint {
    fn start(&mut self) -> io::Result<()> {
        if self.socket.is_some() {
            return Ok(());
        }

        let socket = UdpSocket::bind(self.bind)?;
        socket.set_read_timeout(Some(READ_TIMEOUT))?;
        let socket = Arc::new(socket);
        self.stop.store(false, Ordering::Relaxed);

        let (in_tx, in_rx) = bounded(self.capacity);
        let rx_thread = {
            let socket = socket.clone();
            let stop = self.stop.clone();
            let overflow = self.overflow.clone();
            thread::Builder::new()
                .name("bpp-udp-rx".into())
                .spawn(move || recv_loop(&socket, &in_tx, &stop, &overflow))?
        };
        self.threads.push(rx_thread);
        self.incoming = Some(in_rx);

        if let Some(peer) = self.peer {
            let (out_tx, out_rx) = bounded::<Bytes>(self.capacity);
            let socket = socket.clone();
            let tx_thread = thread::Builder::new()
                .name("bpp-udp-tx".into())
                .spawn(move || send_loop(&socket, &out_rx, peer))?;
            self.threads.push(tx_thread);
            self.outgoing = Some(out_tx);
        }

        tracing::debug!(local = %socket.local_addr()?, peer = ?self.peer, "endpoint started");
        self.socket = Some(socket);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        // Closing the queue lets the send thread drain and exit.
        self.outgoing = None;
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("endpoint thread panicked");
            }
        }
        if self.socket.take().is_some() {
            tracing::debug!(overflow = self.overflow(), "endpoint stopped");
        }
    }

    fn send(&self, data: Bytes) -> io::Result<()> {
        let Some(tx) = &self.outgoing else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "endpoint not started or has no destination",
            ));
        };
        tx.send(data)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "send thread exited"))
    }

    fn receive(&self) -> Option<Bytes> {
        self.incoming.as_ref()?.recv().ok()
    }
}

impl Drop for UdpEndpoint {
    fn drop(&mut self) {
        self.stop();
    }
}

fn recv_loop(socket: &UdpSocket, tx: &Sender<Bytes>, stop: &AtomicBool, overflow: &AtomicU64) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    while !stop.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((len, _from)) => match tx.try_send(Bytes::copy_from_slice(&buf[..len])) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    overflow.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => break,
            },
            Err(ref e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => {
                tracing::warn!(error = %e, "udp receive failed");
                break;
            }
        }
    }
}

fn send_loop(socket: &UdpSocket, rx: &Receiver<Bytes>, peer: SocketAddr) {
    for data in rx.iter() {
        if let Err(e) = socket.send_to(&data, peer) {
            tracing::warn!(error = %e, %peer, len = data.len(), "udp send failed");
        }
    }
}
