//! The packet feed behind a stream: arrival notifications plus a
//! non-blocking dequeue of raw payloads.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::{Result, RECV_BUFFER_SIZE};

/// Callback fired once per arrived payload, with the payload's size in
/// bytes. The payload itself is not transferred through the callback;
/// consumers dequeue it later via [`PacketSource::try_next`].
pub type ArrivalHandler = Arc<dyn Fn(usize) + Send + Sync>;

/// An asynchronous, packetized feed.
///
/// Implementations own packet receipt and internal ordering; the stream core
/// only ever observes arrival notifications and pulls whole payloads out in
/// order.
pub trait PacketSource: Send + Sync {
    /// Start producing payloads, firing `on_arrival` for each one.
    /// Starting an already started source is a no-op.
    fn start(&self, on_arrival: ArrivalHandler) -> Result<()>;

    /// Dequeue the next available payload without blocking, or `None` when
    /// nothing has arrived yet.
    fn try_next(&self) -> Option<Vec<u8>>;

    /// Stop producing and release resources. Idempotent.
    fn close(&self);
}

/// How long a blocked `recv_from` may keep the receive thread from
/// observing shutdown.
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// [`PacketSource`] over a bound [`UdpSocket`].
///
/// A dedicated receive thread loops on the socket, enqueues each datagram
/// payload and fires the arrival handler. The socket carries a short read
/// timeout so the thread notices [`close`](PacketSource::close) promptly.
pub struct UdpPacketSource {
    socket: UdpSocket,
    queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl UdpPacketSource {
    /// Bind to a local endpoint. The source does not produce anything until
    /// [`start`](PacketSource::start) is called.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(RECV_POLL_INTERVAL))?;
        log::debug!("packet source bound to {}", socket.local_addr()?);

        Ok(Self {
            socket,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        })
    }

    /// Join a multicast group on the bound socket.
    pub fn join_multicast(&self, group: IpAddr) -> Result<()> {
        match group {
            IpAddr::V4(ip) => self
                .socket
                .join_multicast_v4(&ip, &std::net::Ipv4Addr::UNSPECIFIED)?,
            IpAddr::V6(ip) => self.socket.join_multicast_v6(&ip, 0)?,
        }
        log::debug!("joined multicast group {}", group);
        Ok(())
    }

    /// The local endpoint the source is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

impl PacketSource for UdpPacketSource {
    fn start(&self, on_arrival: ArrivalHandler) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let socket = self.socket.try_clone()?;
        let queue = Arc::clone(&self.queue);
        let running = Arc::clone(&self.running);

        // The blocking receive loop needs its own thread
        let worker = thread::spawn(move || {
            let mut scratch = vec![0u8; RECV_BUFFER_SIZE];
            while running.load(Ordering::SeqCst) {
                match socket.recv_from(&mut scratch) {
                    Ok((received, from)) => {
                        log::trace!("received {} bytes from {}", received, from);
                        queue
                            .lock()
                            .unwrap()
                            .push_back(scratch[..received].to_vec());
                        on_arrival(received);
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            ErrorKind::WouldBlock | ErrorKind::TimedOut
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        log::error!("receive failed: {}", e);
                    }
                }
            }
            log::debug!("packet source receive thread stopped");
        });

        *self.worker.lock().unwrap() = Some(worker);
        Ok(())
    }

    fn try_next(&self) -> Option<Vec<u8>> {
        self.queue.lock().unwrap().pop_front()
    }

    fn close(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(worker) = self.worker.lock().unwrap().take() {
            if worker.join().is_err() {
                log::error!("packet source receive thread panicked");
            }
        }
    }
}

impl Drop for UdpPacketSource {
    fn drop(&mut self) {
        self.close();
    }
}
