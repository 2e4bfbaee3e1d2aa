//! # Network Module
//!
//! This module provides the transport abstractions used by the controller, along with their
//! concrete implementations:
//!
//! - [`FrameTransport`]/[`Acceptor`]: reliable, ordered, framed delivery on one connection. Each
//!   frame on a stream is a 4 byte big-endian length followed by that many bytes of body.
//!   Implemented over TCP by [`TcpFrameStream`] and [`TcpAcceptor`].
//! - [`BroadcastTransport`]: unordered, best-effort delivery of frames to any listening peers.
//!   Implemented over UDP broadcast by [`UdpBroadcaster`] and over a ZMQ PUB socket by
//!   [`ZmqPublisher`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod monitored;
mod tcp;
mod udp;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use monitored::{MonitoredSocket, MonitoredSocketError, SocketOptions, ZmqPublisher};
pub use tcp::{TcpAcceptor, TcpFrameStream};
pub use udp::{UdpBroadcaster, UdpReceiver};

// Export zmq
pub use zmq;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum length of the body of a single frame in bytes.
///
/// Also bounds the size of a broadcast datagram.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// One end of a reliable, ordered, framed connection to a peer.
pub trait FrameTransport: Send {
    /// A description of the peer, for logging.
    fn peer(&self) -> String;

    /// Block until a full frame has been read from the peer.
    ///
    /// Returns [`TransportError::Closed`] if the peer closed the connection cleanly between
    /// frames.
    fn read_frame(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Write a full frame to the peer.
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Get a handle which can unblock a pending [`FrameTransport::read_frame`] from another
    /// thread.
    fn interrupter(&self) -> Result<Box<dyn Interrupt>, TransportError>;

    /// Close the underlying transport.
    fn close(&mut self) -> Result<(), TransportError>;
}

/// Unblocks a transport from another thread.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// Accepts incoming connections.
pub trait Acceptor: Send + Sync {
    type Transport: FrameTransport + 'static;

    /// Block until a new peer connects.
    fn accept(&self) -> Result<Self::Transport, TransportError>;

    /// Unblock a pending [`Acceptor::accept`], used during shutdown.
    fn wake(&self) -> Result<(), TransportError>;

    /// The endpoint this acceptor is listening on, for logging.
    fn endpoint(&self) -> String;
}

/// Sends frames to any number of listening peers, with no response expected.
pub trait BroadcastTransport: Send {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("The peer closed the connection")]
    Closed,

    #[error("A frame of {0} bytes exceeds the maximum frame length")]
    FrameTooLarge(usize),

    #[error("Could not resolve the endpoint \"{0}\"")]
    InvalidEndpoint(String),

    #[error("Only {0} of {1} bytes were sent")]
    PartialSend(usize, usize),

    #[error("I/O error: {0}")]
    Io(std::io::Error),

    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not send data on the socket: {0}")]
    SendError(zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

/// A group of broadcast transports acts as a single transport which sends every frame to all of
/// its members.
///
/// Every member is attempted even if an earlier one fails, the first error is returned.
impl BroadcastTransport for Vec<Box<dyn BroadcastTransport>> {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut result = Ok(());

        for transport in self.iter_mut() {
            if let Err(e) = transport.send(frame) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        result
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Io(e)
    }
}

impl From<MonitoredSocketError> for TransportError {
    fn from(e: MonitoredSocketError) -> Self {
        TransportError::SocketError(e)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
