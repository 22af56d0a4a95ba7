//! The blocking byte-stream facade over a packet source.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::source::{ArrivalHandler, PacketSource, UdpPacketSource};
use crate::uri::StreamUri;
use crate::{Result, StreamError, AUTO_FLUSH_THRESHOLD};

/// All mutable stream state, guarded by the single mutex in [`Shared`].
#[derive(Debug)]
struct StreamState {
    /// Payload bytes accumulated since the last flush. Grows only by
    /// appending pulled payloads, shrinks only by whole-prefix trims.
    buffer: Vec<u8>,
    /// Consumed prefix of `buffer`. Invariant: `buffer_pos <= buffer.len()`.
    buffer_pos: usize,
    /// Bytes permanently discarded by flushes. Never decreases.
    last_flush_pos: u64,
    /// Arrival counter: total payload bytes ever announced by the source.
    /// This counts *observed* bytes, not buffered bytes — a notification
    /// fires before (and independently of) the payload being pulled into
    /// `buffer`.
    observed_len: u64,
    auto_flush: bool,
    closed: bool,
}

impl StreamState {
    fn available(&self) -> usize {
        self.buffer.len() - self.buffer_pos
    }

    fn position(&self) -> u64 {
        self.last_flush_pos + self.buffer_pos as u64
    }
}

struct Shared {
    state: Mutex<StreamState>,
    /// Signalled (broadcast) by the arrival handler; paired with `state`.
    /// The only blocking wait in the crate happens on this condvar.
    arrived: Condvar,
}

/// A read-only, forward-only byte stream fed by a [`PacketSource`].
///
/// Reads are exact-count: [`read`](UdpStream::read) returns precisely the
/// requested number of bytes or blocks until they have arrived. All state is
/// guarded by a single mutex, so any number of consumer threads may share
/// one stream.
pub struct UdpStream {
    shared: Arc<Shared>,
    source: Arc<dyn PacketSource>,
}

impl UdpStream {
    /// Bind to a local endpoint and start listening, with auto-flush
    /// enabled.
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let source = UdpPacketSource::bind(addr)?;
        Self::from_source(Arc::new(source))
    }

    /// Bind to the given port on the IPv4 wildcard address.
    pub fn bind_port(port: u16) -> Result<Self> {
        Self::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
    }

    /// Open a stream from a `udp://@host:port` connection string.
    ///
    /// The string is validated before any socket is opened. When the host
    /// parses as a multicast address, the group is joined.
    pub fn open(connection: &str) -> Result<Self> {
        let uri = StreamUri::parse(connection)?;

        let bind_ip = match uri.addr {
            Some(IpAddr::V6(_)) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            _ => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        let source = UdpPacketSource::bind(SocketAddr::new(bind_ip, uri.port))?;

        if let Some(addr) = uri.addr {
            if addr.is_multicast() {
                source.join_multicast(addr)?;
            }
        }

        Self::from_source(Arc::new(source))
    }

    /// Build a stream over an already constructed source and subscribe to
    /// its arrival notifications.
    pub fn from_source(source: Arc<dyn PacketSource>) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(StreamState {
                buffer: Vec::new(),
                buffer_pos: 0,
                last_flush_pos: 0,
                observed_len: 0,
                auto_flush: true,
                closed: false,
            }),
            arrived: Condvar::new(),
        });

        // The arrival handler only counts and wakes; payloads are pulled
        // lazily by readers
        let handler: ArrivalHandler = {
            let shared = Arc::clone(&shared);
            Arc::new(move |size| {
                let mut state = shared.state.lock().unwrap();
                state.observed_len += size as u64;
                shared.arrived.notify_all();
            })
        };
        source.start(handler)?;

        Ok(Self { shared, source })
    }

    /// Read exactly `dst.len()` bytes, blocking until they have arrived.
    ///
    /// Runs the auto-flush policy first, then waits for availability. Never
    /// returns a short count; a stream whose source stops producing blocks
    /// indefinitely unless the stream is closed, in which case the reader
    /// wakes with [`StreamError::Closed`]. A zero-length read returns
    /// immediately.
    pub fn read(&self, dst: &mut [u8]) -> Result<usize> {
        let mut state = self.shared.state.lock().unwrap();
        Self::run_auto_flush(&mut state);
        let mut state = self.ensure_available(state, dst.len())?;

        let start = state.buffer_pos;
        dst.copy_from_slice(&state.buffer[start..start + dst.len()]);
        state.buffer_pos += dst.len();
        log::trace!("read {} bytes, position now {}", dst.len(), state.position());

        Ok(dst.len())
    }

    /// Trim the consumed prefix of the buffer.
    ///
    /// The logical position is unchanged; positions before the new flush
    /// point become permanently unreachable.
    pub fn flush(&self) {
        let mut state = self.shared.state.lock().unwrap();
        Self::flush_locked(&mut state);
    }

    /// The logical read position: bytes permanently discarded plus bytes
    /// consumed from the current buffer.
    pub fn position(&self) -> u64 {
        self.shared.state.lock().unwrap().position()
    }

    /// Reposition within currently buffered, unflushed data.
    ///
    /// The target must be strictly greater than the flush position and
    /// strictly less than the *bare physical buffer length*. Note the upper
    /// bound is the raw buffer size, not the logical end of stream and not
    /// even offset by the flush position — once the flush position has
    /// moved past the buffer size, no target is accepted at all. Both
    /// comparisons are strict.
    pub fn set_position(&self, value: u64) -> Result<()> {
        let mut state = self.shared.state.lock().unwrap();
        let low = state.last_flush_pos;
        let high = state.buffer.len() as u64;
        if value <= low || value >= high {
            return Err(StreamError::OutOfRange(format!(
                "target position {} outside ({}, {})",
                value, low, high
            )));
        }
        state.buffer_pos = (value - low) as usize;
        Ok(())
    }

    /// Total payload bytes ever observed as arrived, for the stream's
    /// entire lifetime.
    ///
    /// This is an arrival counter incremented at notification time — it is
    /// not the number of buffered bytes and may run ahead of (or behind)
    /// what a reader can currently consume.
    pub fn length(&self) -> u64 {
        self.shared.state.lock().unwrap().observed_len
    }

    /// Bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.shared.state.lock().unwrap().available()
    }

    pub fn auto_flush(&self) -> bool {
        self.shared.state.lock().unwrap().auto_flush
    }

    pub fn set_auto_flush(&self, enabled: bool) {
        self.shared.state.lock().unwrap().auto_flush = enabled;
    }

    pub fn can_read(&self) -> bool {
        true
    }

    pub fn can_seek(&self) -> bool {
        false
    }

    pub fn can_write(&self) -> bool {
        false
    }

    /// Seeking is rejected: the stream is forward-only.
    pub fn seek(&self, _target: u64) -> Result<u64> {
        Err(StreamError::Unsupported("seek"))
    }

    /// Truncating or extending is rejected: the length only ever grows with
    /// arrivals.
    pub fn set_length(&self, _len: u64) -> Result<()> {
        Err(StreamError::Unsupported("set_length"))
    }

    /// Writing is rejected: the stream is read-only.
    pub fn write(&self, _data: &[u8]) -> Result<usize> {
        Err(StreamError::Unsupported("write"))
    }

    /// Shut the stream down: wake blocked readers and stop the source.
    /// Already-buffered data stays readable; once it runs out, readers fail
    /// with [`StreamError::Closed`]. Idempotent; also run by `Drop`.
    pub fn close(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.closed {
                return;
            }
            state.closed = true;
            self.shared.arrived.notify_all();
        }
        self.source.close();
    }

    /// Block until at least `count` unread bytes are buffered.
    ///
    /// Pulls payloads out of the source while insufficient (the only buffer
    /// growth path), then waits on the condvar. The predicate is re-checked
    /// after every wake: notifications are broadcast and wakeups may be
    /// spurious.
    fn ensure_available<'a>(
        &self,
        mut state: MutexGuard<'a, StreamState>,
        count: usize,
    ) -> Result<MutexGuard<'a, StreamState>> {
        loop {
            if state.available() >= count {
                return Ok(state);
            }
            if let Some(payload) = self.source.try_next() {
                state.buffer.extend_from_slice(&payload);
                continue;
            }
            // Source drained: even a closed stream serves what it already
            // buffered, but it must not strand a reader waiting for more
            if state.closed {
                return Err(StreamError::Closed);
            }
            state = self.shared.arrived.wait(state).unwrap();
        }
    }

    fn run_auto_flush(state: &mut StreamState) {
        if state.auto_flush && state.buffer.len() > AUTO_FLUSH_THRESHOLD {
            log::debug!(
                "buffer grew to {} bytes, auto-flushing",
                state.buffer.len()
            );
            Self::flush_locked(state);
        }
    }

    fn flush_locked(state: &mut StreamState) {
        let consumed = state.buffer_pos;
        state.last_flush_pos += consumed as u64;
        state.buffer = state.buffer.split_off(consumed);
        state.buffer_pos = 0;
        log::trace!(
            "flushed {} consumed bytes, {} retained",
            consumed,
            state.buffer.len()
        );
    }
}

impl Drop for UdpStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl io::Read for UdpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        UdpStream::read(self, buf).map_err(io::Error::from)
    }
}

impl io::Read for &UdpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        UdpStream::read(*self, buf).map_err(io::Error::from)
    }
}

impl io::Write for UdpStream {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream is read-only",
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        UdpStream::flush(self);
        Ok(())
    }
}

impl io::Seek for UdpStream {
    fn seek(&mut self, _pos: io::SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stream is forward-only",
        ))
    }
}

#[cfg(test)]
impl UdpStream {
    pub(crate) fn physical_buffer_len(&self) -> usize {
        self.shared.state.lock().unwrap().buffer.len()
    }

    pub(crate) fn last_flush_position(&self) -> u64 {
        self.shared.state.lock().unwrap().last_flush_pos
    }
}
