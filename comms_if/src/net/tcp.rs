//! # TCP framed transport

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    io::{ErrorKind, Read, Write},
    net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream},
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::{Acceptor, FrameTransport, Interrupt, TransportError, MAX_FRAME_LEN};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A TCP stream carrying length-prefixed frames.
pub struct TcpFrameStream {
    stream: TcpStream,

    peer: String,
}

/// Accepts TCP connections, producing a [`TcpFrameStream`] for each.
pub struct TcpAcceptor {
    listener: TcpListener,

    local_addr: SocketAddr,
}

/// Shuts down a cloned handle to a stream, waking any thread blocked reading it.
struct TcpInterrupt(TcpStream);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TcpFrameStream {
    /// Wrap an already connected stream.
    pub fn new(stream: TcpStream) -> Self {
        let peer = match stream.peer_addr() {
            Ok(a) => a.to_string(),
            Err(_) => String::from("<unknown peer>"),
        };

        // Frames are small and latency sensitive, don't let Nagle hold them back
        stream.set_nodelay(true).ok();

        Self { stream, peer }
    }

    /// Connect to a listening peer, such as `"192.168.1.10:10101"`.
    pub fn connect(endpoint: &str) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(endpoint)?;
        Ok(Self::new(stream))
    }
}

impl FrameTransport for TcpFrameStream {
    fn peer(&self) -> String {
        self.peer.clone()
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
        let len = match self.stream.read_u32::<BigEndian>() {
            Ok(l) => l as usize,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Err(TransportError::Closed),
            Err(e) => return Err(TransportError::Io(e)),
        };

        if len > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(len));
        }

        let mut body = vec![0u8; len];
        self.stream.read_exact(&mut body)?;

        Ok(body)
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if frame.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }

        self.stream.write_u32::<BigEndian>(frame.len() as u32)?;
        self.stream.write_all(frame)?;
        self.stream.flush()?;

        Ok(())
    }

    fn interrupter(&self) -> Result<Box<dyn Interrupt>, TransportError> {
        Ok(Box::new(TcpInterrupt(self.stream.try_clone()?)))
    }

    fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(_) => Ok(()),
            // Already shut down by the peer or by an interrupt
            Err(e) if e.kind() == ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

impl Interrupt for TcpInterrupt {
    fn interrupt(&self) {
        self.0.shutdown(Shutdown::Both).ok();
    }
}

impl TcpAcceptor {
    /// Bind a new acceptor to the given endpoint, such as `"0.0.0.0:10101"`.
    ///
    /// Binding to port 0 picks a free port, see [`TcpAcceptor::local_addr`].
    pub fn bind(endpoint: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(endpoint)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address the acceptor is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Acceptor for TcpAcceptor {
    type Transport = TcpFrameStream;

    fn accept(&self) -> Result<Self::Transport, TransportError> {
        let (stream, _) = self.listener.accept()?;
        Ok(TcpFrameStream::new(stream))
    }

    fn wake(&self) -> Result<(), TransportError> {
        // A wildcard bind address can't be connected to on every platform, use loopback instead
        let mut addr = self.local_addr;
        if addr.ip().is_unspecified() {
            addr.set_ip(match addr.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }

        TcpStream::connect(addr)?;
        Ok(())
    }

    fn endpoint(&self) -> String {
        self.local_addr.to_string()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_frames_over_loopback() -> Result<(), TransportError> {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0")?;
        let addr = acceptor.local_addr().to_string();

        let client = thread::spawn(move || -> Result<Vec<u8>, TransportError> {
            let mut stream = TcpFrameStream::connect(&addr)?;
            stream.write_frame(b"ping")?;
            stream.write_frame(b"")?;
            stream.read_frame()
        });

        let mut server = acceptor.accept()?;
        assert_eq!(server.read_frame()?, b"ping".to_vec());
        assert_eq!(server.read_frame()?, Vec::<u8>::new());
        server.write_frame(b"pong")?;

        assert_eq!(client.join().unwrap()?, b"pong".to_vec());

        // Client has gone away, the next read reports a clean close
        assert!(matches!(server.read_frame(), Err(TransportError::Closed)));
        server.close()
    }

    #[test]
    fn test_oversized_frame_rejected() -> Result<(), TransportError> {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0")?;
        let addr = acceptor.local_addr();

        let client = thread::spawn(move || {
            let mut raw = TcpStream::connect(addr).unwrap();
            raw.write_u32::<BigEndian>((MAX_FRAME_LEN + 1) as u32)
                .unwrap();
            raw
        });

        let mut server = acceptor.accept()?;
        let _raw = client.join().unwrap();

        assert!(matches!(
            server.read_frame(),
            Err(TransportError::FrameTooLarge(l)) if l == MAX_FRAME_LEN + 1
        ));
        Ok(())
    }
}
