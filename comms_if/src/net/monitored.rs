//! # Monitored ZMQ sockets
//!
//! ZMQ is used for the optional PUB broadcast transport, which lets ground software subscribe to
//! the controller's broadcasts without needing to be on the same broadcast domain.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, trace, warn};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
};
use zmq::{Context, Socket, SocketEvent, SocketType};

use super::{BroadcastTransport, TransportError};

// ------------------------------------------------------------------------------------------------
// MACROS
// ------------------------------------------------------------------------------------------------

macro_rules! set_sockopts {
    ($socket:expr, $(($opt:ident, $val:expr)),+) => {
        $(
            $socket.$opt($val)
                .map_err(|e| MonitoredSocketError::SocketOptionError(stringify!($opt).into(), e))?;
        )+
    };
}

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Receive timeout on the monitor socket, bounds how long dropping a socket waits for its
/// monitor thread.
const MONITOR_POLL_MS: i32 = 100;

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

/// Number of monitors that are registered. Used to provide unique IDs for each monitor endpoint.
static NUM_MONITORS: AtomicUsize = AtomicUsize::new(0);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A bound zmq socket which is monitored in a background thread, counting the connected peers.
pub struct MonitoredSocket {
    socket: Socket,

    join_handle: Option<thread::JoinHandle<()>>,

    shutdown: Arc<AtomicBool>,

    num_peers: Arc<AtomicUsize>,
}

/// Options which can be set on a monitored socket.
///
/// Most options here correspond to those found in the
/// [`zmq_setsockopt`](http://api.zeromq.org/4-2:zmq-setsockopt) documentation.
pub struct SocketOptions {
    /// `ZMQ_LINGER`: Set linger period for socket shutdown
    pub linger: i32,

    /// `ZMQ_SNDTIMEO`: Maximum time before a send operation returns with `EAGAIN`
    pub send_timeout: i32,

    /// `ZMQ_SNDHWM`: High water mark for outbound messages
    pub send_hwm: i32,

    /// `ZMQ_HEARTBEAT_IVL`: Set interval between sending ZMTP heartbeats
    pub heartbeat_ivl: i32,

    /// `ZMQ_HEARTBEAT_TIMEOUT`: Set timeout for ZMTP heartbeats
    pub heartbeat_timeout: i32,

    /// `ZMQ_HEARTBEAT_TTL`: Set the TTL (time to live) value for ZMTP heartbeats
    pub heartbeat_ttl: i32,
}

/// Broadcast transport over a bound ZMQ PUB socket.
pub struct ZmqPublisher {
    socket: MonitoredSocket,

    // Dropped after the socket, terminating the context only once it is closed
    _ctx: Context,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum MonitoredSocketError {
    #[error("Error creating the socket: {0}")]
    CreateSocketError(zmq::Error),

    #[error("Error enabling monitoring for the socket: {0}")]
    MonitoringEnableError(zmq::Error),

    #[error("Could not bind the socket: {0}")]
    CouldNotBind(zmq::Error),

    #[error("Could not connect the monitor: {0}")]
    MonitorConnectError(zmq::Error),

    #[error("Could not start the monitor thread: {0}")]
    MonitorThreadError(std::io::Error),

    #[error("Could not read event from monitor socket: {0}")]
    EventReadError(zmq::Error),

    #[error("Could not set the {0} socket option: {1}")]
    SocketOptionError(String, zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MonitoredSocket {
    /// Create a new monitored socket bound to the endpoint.
    ///
    /// ## Arguments
    /// - `ctx`: the zmq context which will be used to create the socket
    /// - `socket_type`: the type of zmq socket to create
    /// - `socket_options`: a [`SocketOptions`] struct specifying how to configure the socket
    /// - `endpoint`: a zmq endpoint string, such as `"tcp://*:10103"`
    pub fn new(
        ctx: &Context,
        socket_type: SocketType,
        socket_options: SocketOptions,
        endpoint: &str,
    ) -> Result<Self, MonitoredSocketError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let num_peers = Arc::new(AtomicUsize::new(0));

        let socket = ctx
            .socket(socket_type)
            .map_err(MonitoredSocketError::CreateSocketError)?;

        // Create, enable and connect the monitor
        let monitor_endpoint = format!(
            "inproc://monitor_{}",
            NUM_MONITORS.fetch_add(1, Ordering::Relaxed)
        );
        socket
            .monitor(&monitor_endpoint, SocketEvent::ALL as i32)
            .map_err(MonitoredSocketError::MonitoringEnableError)?;
        let monitor = ctx
            .socket(zmq::PAIR)
            .map_err(MonitoredSocketError::CreateSocketError)?;
        monitor
            .set_rcvtimeo(MONITOR_POLL_MS)
            .map_err(|e| MonitoredSocketError::SocketOptionError("set_rcvtimeo".into(), e))?;
        monitor
            .connect(&monitor_endpoint)
            .map_err(MonitoredSocketError::MonitorConnectError)?;

        socket_options.set(&socket)?;

        socket
            .bind(endpoint)
            .map_err(MonitoredSocketError::CouldNotBind)?;

        let shutdown_clone = shutdown.clone();
        let num_peers_clone = num_peers.clone();

        let join_handle = thread::Builder::new()
            .name(monitor_endpoint.clone())
            .spawn(move || monitor_socket(monitor, monitor_endpoint, shutdown_clone, num_peers_clone))
            .map_err(MonitoredSocketError::MonitorThreadError)?;

        Ok(Self {
            socket,
            join_handle: Some(join_handle),
            shutdown,
            num_peers,
        })
    }

    /// Number of peers currently connected to the socket.
    pub fn num_peers(&self) -> usize {
        self.num_peers.load(Ordering::Relaxed)
    }
}

impl Drop for MonitoredSocket {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        // The monitor polls with a timeout so this join is bounded
        if let Some(jh) = self.join_handle.take() {
            jh.join().ok();
        }
    }
}

impl std::ops::Deref for MonitoredSocket {
    type Target = Socket;

    fn deref(&self) -> &Self::Target {
        &self.socket
    }
}

impl SocketOptions {
    /// Set these options on the given socket.
    pub fn set(&self, socket: &Socket) -> Result<(), MonitoredSocketError> {
        set_sockopts!(
            socket,
            (set_heartbeat_ivl, self.heartbeat_ivl),
            (set_heartbeat_timeout, self.heartbeat_timeout),
            (set_heartbeat_ttl, self.heartbeat_ttl),
            (set_linger, self.linger),
            (set_sndtimeo, self.send_timeout),
            (set_sndhwm, self.send_hwm)
        );

        Ok(())
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        // Defaults for sockopts taken from http://api.zeromq.org/4-2:zmq-setsockopt
        Self {
            heartbeat_ivl: 0,
            heartbeat_timeout: 0,
            heartbeat_ttl: 0,
            linger: 30_000,
            send_timeout: -1,
            send_hwm: 1000,
        }
    }
}

impl ZmqPublisher {
    /// Bind a new publisher to the given endpoint, such as `"tcp://*:10103"`.
    ///
    /// Sends never block, frames published while no subscriber is connected are dropped.
    pub fn bind(ctx: &Context, endpoint: &str) -> Result<Self, TransportError> {
        let options = SocketOptions {
            linger: 1,
            send_timeout: 0,
            send_hwm: 16,
            heartbeat_ivl: 500,
            heartbeat_ttl: 1000,
            heartbeat_timeout: 1000,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::PUB, options, endpoint)?;

        Ok(Self {
            socket,
            _ctx: ctx.clone(),
        })
    }
}

impl ZmqPublisher {
    pub fn num_subscribers(&self) -> usize {
        self.socket.num_peers()
    }
}

impl BroadcastTransport for ZmqPublisher {
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.num_subscribers() == 0 {
            trace!("No subscribers, {} byte frame not published", frame.len());
            return Ok(());
        }

        self.socket
            .send(frame, 0)
            .map_err(TransportError::SendError)
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read an event from a monitor socket.
fn read_event(socket: &Socket) -> Result<SocketEvent, zmq::Error> {
    let msg = socket.recv_msg(0)?;

    if msg.len() < 2 {
        return Err(zmq::Error::EINVAL);
    }
    let event = u16::from_ne_bytes([msg[0], msg[1]]);

    // Each event is followed by the address of the peer, which isn't needed
    if socket.get_rcvmore()? {
        let _ = socket.recv_msg(0)?;
    }

    Ok(SocketEvent::from_raw(event))
}

fn monitor_socket(
    monitor: Socket,
    monitor_endpoint: String,
    shutdown: Arc<AtomicBool>,
    num_peers: Arc<AtomicUsize>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        let event = match read_event(&monitor) {
            Ok(e) => e,
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                warn!("Stopping monitor {}: {}", monitor_endpoint, e);
                break;
            }
        };

        trace!("{}: {:?}", monitor_endpoint, event);

        match event {
            SocketEvent::ACCEPTED => {
                let n = num_peers.fetch_add(1, Ordering::Relaxed) + 1;
                debug!("{}: peer connected, {} connected", monitor_endpoint, n);
            }
            SocketEvent::DISCONNECTED => {
                let n = num_peers
                    .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                        Some(n.saturating_sub(1))
                    })
                    .map_or(0, |n| n.saturating_sub(1));
                debug!("{}: peer disconnected, {} connected", monitor_endpoint, n);
            }
            _ => (),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
