//! # UDP broadcast transport

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::{BroadcastTransport, TransportError, MAX_FRAME_LEN};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Sends every frame as a single datagram to a (usually broadcast) address.
pub struct UdpBroadcaster {
    socket: UdpSocket,

    target: SocketAddr,
}

/// Receives datagrams sent by a [`UdpBroadcaster`].
pub struct UdpReceiver {
    socket: UdpSocket,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl UdpBroadcaster {
    /// Create a new broadcaster.
    ///
    /// ## Arguments
    /// - `bind`: local endpoint to send from, usually `"0.0.0.0:0"`
    /// - `target`: endpoint to send to, such as `"255.255.255.255:8888"`
    pub fn new(bind: &str, target: &str) -> Result<Self, TransportError> {
        let target = resolve(target)?;

        let socket = UdpSocket::bind(bind)?;
        socket.set_broadcast(true)?;

        Ok(Self { socket, target })
    }
}

impl BroadcastTransport for UdpBroadcaster {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }

        let sent = self.socket.send_to(frame, self.target)?;

        match sent == frame.len() {
            true => Ok(()),
            false => Err(TransportError::PartialSend(sent, frame.len())),
        }
    }
}

impl UdpReceiver {
    /// Bind a receiver to the given endpoint, such as `"0.0.0.0:8888"`.
    pub fn bind(endpoint: &str) -> Result<Self, TransportError> {
        Ok(Self {
            socket: UdpSocket::bind(endpoint)?,
        })
    }

    /// The address the receiver is actually bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Block until a datagram arrives, returning its contents and the sender.
    pub fn recv_frame(&self) -> Result<(Vec<u8>, SocketAddr), TransportError> {
        let mut buf = vec![0u8; MAX_FRAME_LEN];
        let (len, from) = self.socket.recv_from(&mut buf)?;
        buf.truncate(len);

        Ok((buf, from))
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn resolve(endpoint: &str) -> Result<SocketAddr, TransportError> {
    endpoint
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| TransportError::InvalidEndpoint(endpoint.to_string()))
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_datagram_to_receiver() -> Result<(), TransportError> {
        let receiver = UdpReceiver::bind("127.0.0.1:0")?;
        let target = receiver.local_addr()?.to_string();

        let mut broadcaster = UdpBroadcaster::new("127.0.0.1:0", &target)?;
        broadcaster.send(b"heartbeat")?;

        let (frame, _) = receiver.recv_frame()?;
        assert_eq!(frame, b"heartbeat".to_vec());

        Ok(())
    }

    #[test]
    fn test_bad_target() {
        assert!(matches!(
            UdpBroadcaster::new("127.0.0.1:0", "not an endpoint"),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }
}
