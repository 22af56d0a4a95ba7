//! Blocking byte-stream adapter over a packetized UDP feed.
//!
//! Datagrams arrive at irregular intervals and sizes; [`UdpStream`] presents
//! them as an ordinary sequential stream. Reads return exactly the requested
//! number of bytes, blocking until enough payload has arrived. Consumed bytes
//! are trimmed from memory periodically (auto-flush) while the logical read
//! position keeps advancing monotonically.
//!
//! The packet feed itself is abstracted behind [`PacketSource`], so the
//! stream core can be driven by a real socket ([`UdpPacketSource`]) or by a
//! scripted source in tests.

mod errors;
mod source;
mod stream;
mod uri;

pub use errors::{Result, StreamError};
pub use source::{ArrivalHandler, PacketSource, UdpPacketSource};
pub use stream::UdpStream;
pub use uri::StreamUri;

/// Size of the scratch buffer used to receive a single datagram.
pub const RECV_BUFFER_SIZE: usize = 2048;

/// Accumulator size beyond which the next read proactively trims
/// already-consumed bytes.
pub const AUTO_FLUSH_THRESHOLD: usize = 15 * RECV_BUFFER_SIZE;

/// Port assumed by [`UdpStream::open`] when the connection string omits one.
pub const DEFAULT_PORT: u16 = 5004;

/// Connection-string scheme accepted by [`UdpStream::open`].
pub const URI_SCHEME: &str = "udp";
