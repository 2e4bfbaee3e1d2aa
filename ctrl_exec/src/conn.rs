//! # Connections
//!
//! A [`ConnectionListener`] accepts peers on one endpoint and starts a [`ConnectionHandler`]
//! thread for each. Handlers serve one request at a time, in order, writing exactly one response
//! for each:
//!
//! - Motor commands are applied straight to the motor setpoints and acknowledged.
//! - On the general channel everything else is dispatched to the provider registry.
//! - On the motor channel everything else is refused with a status message, so that general
//!   traffic can't slow down motor control.
//!
//! A frame which can't be decoded, or any transport error, closes that connection only.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    msg::{FrameError, Message},
    net::{Acceptor, FrameTransport, Interrupt, TransportError},
};
use log::{debug, info, trace, warn};
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{
    provider::{MotorProvider, Registry},
    state::ShutdownSignal,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Time to wait before accepting again after an accept error.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Routes requests to the motor setpoints or to the registry.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<Registry>,

    motors: MotorProvider,
}

/// One accepted peer.
///
/// The transport is closed exactly once, either explicitly or when the connection is dropped.
pub struct Connection<T: FrameTransport> {
    transport: T,

    peer: String,

    role: ConnectionRole,

    state: ConnectionState,
}

/// Serves the requests of one connection.
pub struct ConnectionHandler<T: FrameTransport> {
    conn: Connection<T>,

    dispatcher: Dispatcher,

    shutdown: ShutdownSignal,
}

/// Accepts connections on one endpoint, starting a handler thread for each.
pub struct ConnectionListener<A: Acceptor + 'static> {
    role: ConnectionRole,

    acceptor: Arc<A>,

    handlers: Arc<Mutex<Handlers>>,

    shutdown: ShutdownSignal,

    accept_thread: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Handlers {
    next_id: u64,

    /// Interrupters of the connections which are still open
    interrupters: HashMap<u64, Box<dyn Interrupt>>,

    threads: Vec<JoinHandle<()>>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Requests, queries and commands of any kind
    General,

    /// Motor commands only
    Motor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    Active,
    Closed,
}

#[derive(thiserror::Error, Debug)]
pub enum ConnError {
    #[error("Transport error: {0}")]
    TransportError(#[from] TransportError),

    #[error("Malformed frame: {0}")]
    MalformedFrame(#[from] FrameError),

    #[error("Could not start the {0} thread: {1}")]
    ThreadStartFailed(String, std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRole::General => write!(f, "ConnectionListener"),
            ConnectionRole::Motor => write!(f, "MotorConnectionListener"),
        }
    }
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, motors: MotorProvider) -> Self {
        Self { registry, motors }
    }

    /// Get the response to a message received on a connection with the given role.
    pub fn handle(&self, role: ConnectionRole, msg: &Message) -> Message {
        match (role, msg) {
            (_, Message::Motor(m)) => self.motors.command(*m),
            (ConnectionRole::General, other) => self.registry.dispatch(other),
            (ConnectionRole::Motor, other) => Message::status(format!(
                "[{}] Only motor commands are accepted, {} messages are not supported",
                role,
                other.type_name()
            )),
        }
    }
}

impl<T: FrameTransport> Connection<T> {
    pub fn new(transport: T, role: ConnectionRole) -> Self {
        let peer = transport.peer();

        Self {
            transport,
            peer,
            role,
            state: ConnectionState::Accepted,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Block until the next message arrives.
    pub fn read_message(&mut self) -> Result<Message, ConnError> {
        self.state = ConnectionState::Active;

        let frame = self.transport.read_frame()?;
        trace!("[{}] {} bytes from {}", self.role, frame.len(), self.peer);

        Ok(Message::decode(&frame)?)
    }

    pub fn write_message(&mut self, msg: &Message) -> Result<(), ConnError> {
        let frame = msg.encode()?;
        self.transport.write_frame(&frame)?;

        Ok(())
    }

    /// Close the transport. Closing an already closed connection does nothing.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }

        self.state = ConnectionState::Closed;

        match self.transport.close() {
            Ok(_) => info!("[{}] Connection to {} closed", self.role, self.peer),
            Err(e) => warn!(
                "[{}] Error closing the connection to {}: {}",
                self.role, self.peer, e
            ),
        }
    }
}

impl<T: FrameTransport> Drop for Connection<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T: FrameTransport> ConnectionHandler<T> {
    pub fn new(conn: Connection<T>, dispatcher: Dispatcher, shutdown: ShutdownSignal) -> Self {
        Self {
            conn,
            dispatcher,
            shutdown,
        }
    }

    /// Serve requests until the peer disconnects, an error occurs or shutdown begins.
    ///
    /// The connection is closed on return.
    pub fn run(mut self) {
        info!("[{}] Serving {}", self.conn.role, self.conn.peer);

        while !self.shutdown.is_triggered() {
            match self.serve_one() {
                Ok(_) => (),
                Err(ConnError::TransportError(TransportError::Closed)) => {
                    info!("[{}] {} disconnected", self.conn.role, self.conn.peer);
                    break;
                }
                Err(e) => {
                    warn!(
                        "[{}] Closing the connection to {}: {}",
                        self.conn.role, self.conn.peer, e
                    );
                    break;
                }
            }
        }

        self.conn.close();
    }

    /// Read one request and write its response.
    fn serve_one(&mut self) -> Result<(), ConnError> {
        let request = self.conn.read_message()?;
        debug!("[{}] Request from {}: {:?}", self.conn.role, self.conn.peer, request);

        let response = self.dispatcher.handle(self.conn.role, &request);
        self.conn.write_message(&response)
    }
}

impl<A: Acceptor + 'static> ConnectionListener<A> {
    /// Start accepting connections.
    pub fn start(
        acceptor: A,
        role: ConnectionRole,
        dispatcher: Dispatcher,
        shutdown: ShutdownSignal,
    ) -> Result<Self, ConnError> {
        let acceptor = Arc::new(acceptor);
        let handlers = Arc::new(Mutex::new(Handlers::default()));

        let accept_thread = {
            let acceptor = acceptor.clone();
            let handlers = handlers.clone();
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name(format!("accept_{:?}", role).to_lowercase())
                .spawn(move || accept_loop(&*acceptor, role, dispatcher, handlers, shutdown))
                .map_err(|e| ConnError::ThreadStartFailed(role.to_string(), e))?
        };

        info!("[{}] Listening on {}", role, acceptor.endpoint());

        Ok(Self {
            role,
            acceptor,
            handlers,
            shutdown,
            accept_thread: Some(accept_thread),
        })
    }

    pub fn endpoint(&self) -> String {
        self.acceptor.endpoint()
    }

    /// Interrupt every connection and stop accepting, then wait for every thread to exit.
    ///
    /// This triggers the shutdown signal given to [`ConnectionListener::start`] if it hasn't been
    /// already.
    pub fn stop(mut self) {
        self.stop_threads();
    }

    fn stop_threads(&mut self) {
        let accept_thread = match self.accept_thread.take() {
            Some(t) => t,
            None => return,
        };

        self.shutdown.trigger();

        // Registration checks the shutdown signal under this same lock, so no connection can be
        // added after these are interrupted
        {
            let handlers = lock_handlers(&self.handlers);
            for interrupter in handlers.interrupters.values() {
                interrupter.interrupt();
            }
        }

        match self.acceptor.wake() {
            Ok(_) => {
                if accept_thread.join().is_err() {
                    warn!("[{}] Accept thread panicked", self.role);
                }
            }
            // Joining would block forever, leave the thread to the process exit
            Err(e) => warn!("[{}] Could not wake the accept thread: {}", self.role, e),
        }

        let threads: Vec<_> = lock_handlers(&self.handlers).threads.drain(..).collect();
        for t in threads {
            if t.join().is_err() {
                warn!("[{}] Handler thread panicked", self.role);
            }
        }

        info!("[{}] Stopped", self.role);
    }
}

impl<A: Acceptor + 'static> Drop for ConnectionListener<A> {
    fn drop(&mut self) {
        self.stop_threads();
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn lock_handlers(handlers: &Mutex<Handlers>) -> MutexGuard<Handlers> {
    match handlers.lock() {
        Ok(h) => h,
        Err(p) => p.into_inner(),
    }
}

fn accept_loop<A: Acceptor>(
    acceptor: &A,
    role: ConnectionRole,
    dispatcher: Dispatcher,
    handlers: Arc<Mutex<Handlers>>,
    shutdown: ShutdownSignal,
) {
    loop {
        let transport = match acceptor.accept() {
            Ok(t) => t,
            Err(e) => {
                if shutdown.is_triggered() {
                    break;
                }
                warn!("[{}] Could not accept a connection: {}", role, e);
                if shutdown.wait_timeout(ACCEPT_RETRY_DELAY) {
                    break;
                }
                continue;
            }
        };

        let mut handlers_guard = lock_handlers(&handlers);

        // Includes the connection made by wake()
        if shutdown.is_triggered() {
            drop(Connection::new(transport, role));
            break;
        }

        let interrupter = match transport.interrupter() {
            Ok(i) => i,
            Err(e) => {
                warn!(
                    "[{}] Refusing {}, it can't be interrupted: {}",
                    role,
                    transport.peer(),
                    e
                );
                drop(Connection::new(transport, role));
                continue;
            }
        };

        let id = handlers_guard.next_id;
        handlers_guard.next_id += 1;

        let handler = ConnectionHandler::new(
            Connection::new(transport, role),
            dispatcher.clone(),
            shutdown.clone(),
        );
        let handlers_clone = handlers.clone();

        let spawned = thread::Builder::new()
            .name(format!("conn_{}", id))
            .spawn(move || {
                handler.run();
                lock_handlers(&handlers_clone).interrupters.remove(&id);
            });

        match spawned {
            Ok(jh) => {
                handlers_guard.interrupters.insert(id, interrupter);
                handlers_guard.threads.retain(|t| !t.is_finished());
                handlers_guard.threads.push(jh);
            }
            Err(e) => warn!("[{}] Could not start a handler thread: {}", role, e),
        }
    }

    debug!("[{}] Accept loop stopped", role);
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{provider::Provider, state::ControllerState};
    use comms_if::msg::{MessageTypeQuery, MotorMessage, SystemInfoMessage};
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
        time::Instant,
    };

    /// In memory transport which serves queued frames then reports a closed peer.
    struct Scripted {
        incoming: Vec<Vec<u8>>,
        fail_writes: bool,
        counters: Counters,
    }

    #[derive(Clone, Default)]
    struct Counters {
        written: Arc<Mutex<Vec<Message>>>,
        reads: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
    }

    /// Hands out queued accept results, then blocks until woken.
    struct Queued {
        results: Mutex<Vec<Result<Scripted, TransportError>>>,
        accepts: AtomicUsize,
        woken: ShutdownSignal,
    }

    struct NoInterrupt;

    impl Interrupt for NoInterrupt {
        fn interrupt(&self) {}
    }

    impl FrameTransport for Scripted {
        fn peer(&self) -> String {
            String::from("scripted")
        }

        fn read_frame(&mut self) -> Result<Vec<u8>, TransportError> {
            self.counters.reads.fetch_add(1, Ordering::SeqCst);
            match self.incoming.is_empty() {
                true => Err(TransportError::Closed),
                false => Ok(self.incoming.remove(0)),
            }
        }

        fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            if self.fail_writes {
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "broken pipe",
                )));
            }

            self.counters
                .written
                .lock()
                .unwrap()
                .push(Message::decode(frame).unwrap());
            Ok(())
        }

        fn interrupter(&self) -> Result<Box<dyn Interrupt>, TransportError> {
            Ok(Box::new(NoInterrupt))
        }

        fn close(&mut self) -> Result<(), TransportError> {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Acceptor for Queued {
        type Transport = Scripted;

        fn accept(&self) -> Result<Scripted, TransportError> {
            self.accepts.fetch_add(1, Ordering::SeqCst);

            let next = {
                let mut results = self.results.lock().unwrap();
                match results.is_empty() {
                    true => None,
                    false => Some(results.remove(0)),
                }
            };

            match next {
                Some(r) => r,
                None => {
                    self.woken.wait();
                    Err(TransportError::Closed)
                }
            }
        }

        fn wake(&self) -> Result<(), TransportError> {
            self.woken.trigger();
            Ok(())
        }

        fn endpoint(&self) -> String {
            String::from("queued")
        }
    }

    fn scripted(incoming: Vec<Vec<u8>>) -> (Scripted, Counters) {
        let counters = Counters::default();
        (
            Scripted {
                incoming,
                fail_writes: false,
                counters: counters.clone(),
            },
            counters,
        )
    }

    fn dispatcher(state: Arc<ControllerState>) -> Dispatcher {
        let mut registry = Registry::new();
        registry.register(Provider::SystemInfo(SystemInfoMessage {
            name: "drone".into(),
            version: "0.1.0".into(),
            host: "host".into(),
            os_release: "6.1".into(),
            machine: "x86_64".into(),
        }));

        Dispatcher::new(Arc::new(registry), MotorProvider::new(state, true))
    }

    fn run_scripted(
        role: ConnectionRole,
        incoming: Vec<Vec<u8>>,
        state: Arc<ControllerState>,
    ) -> (Vec<Message>, usize) {
        let (transport, counters) = scripted(incoming);

        ConnectionHandler::new(
            Connection::new(transport, role),
            dispatcher(state),
            ShutdownSignal::new(),
        )
        .run();

        let written = counters.written.lock().unwrap().clone();
        (written, counters.closes.load(Ordering::SeqCst))
    }

    fn frame(msg: Message) -> Vec<u8> {
        msg.encode().unwrap()
    }

    #[test]
    fn test_requests_answered_in_order() {
        let state = Arc::new(ControllerState::new("drone"));

        let (written, closes) = run_scripted(
            ConnectionRole::General,
            vec![
                frame(Message::request(MessageTypeQuery::SystemInformation)),
                frame(Message::Motor(MotorMessage::new(0.5, 0.5))),
                frame(Message::request(MessageTypeQuery::Gps)),
            ],
            state.clone(),
        );

        assert_eq!(written.len(), 3);
        assert!(matches!(written[0], Message::SystemInfo(_)));
        assert_eq!(written[1], Message::Motor(MotorMessage::new(0.5, 0.5)));
        assert_eq!(
            written[2],
            Message::status("[Controller] No provider for gps requests")
        );
        assert_eq!(state.motors(), MotorMessage::new(0.5, 0.5));
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_malformed_frame_closes_connection() {
        let state = Arc::new(ControllerState::new("drone"));

        let (written, closes) = run_scripted(
            ConnectionRole::General,
            vec![
                b"{\"type\":\"Motor\",\"payl".to_vec(),
                frame(Message::Motor(MotorMessage::new(0.5, 0.5))),
            ],
            state.clone(),
        );

        // Nothing after the malformed frame is served
        assert!(written.is_empty());
        assert_eq!(state.motors(), MotorMessage::NEUTRAL);
        assert_eq!(closes, 1);
    }

    #[test]
    fn test_motor_channel_refuses_other_requests() {
        let state = Arc::new(ControllerState::new("drone"));

        let (written, _) = run_scripted(
            ConnectionRole::Motor,
            vec![
                frame(Message::request(MessageTypeQuery::SystemInformation)),
                frame(Message::Motor(MotorMessage::new(-0.5, 0.25))),
            ],
            state.clone(),
        );

        assert_eq!(
            written[0],
            Message::status(
                "[MotorConnectionListener] Only motor commands are accepted, \
                 InformationRequest messages are not supported"
            )
        );
        assert_eq!(written[1], Message::Motor(MotorMessage::new(-0.5, 0.25)));
        assert_eq!(state.motors(), MotorMessage::new(-0.5, 0.25));
    }

    #[test]
    fn test_write_failure_closes_connection() {
        let state = Arc::new(ControllerState::new("drone"));
        let (mut transport, counters) = scripted(vec![
            frame(Message::request(MessageTypeQuery::SystemInformation)),
            frame(Message::Motor(MotorMessage::new(0.5, 0.5))),
        ]);
        transport.fail_writes = true;

        ConnectionHandler::new(
            Connection::new(transport, ConnectionRole::General),
            dispatcher(state.clone()),
            ShutdownSignal::new(),
        )
        .run();

        // Nothing is read after the failed response
        assert_eq!(counters.reads.load(Ordering::SeqCst), 1);
        assert!(counters.written.lock().unwrap().is_empty());
        assert_eq!(state.motors(), MotorMessage::NEUTRAL);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_accept_failure_is_retried() {
        let state = Arc::new(ControllerState::new("drone"));
        let (transport, counters) = scripted(vec![frame(Message::request(
            MessageTypeQuery::SystemInformation,
        ))]);

        let acceptor = Queued {
            results: Mutex::new(vec![
                Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "too many open files",
                ))),
                Ok(transport),
            ]),
            accepts: AtomicUsize::new(0),
            woken: ShutdownSignal::new(),
        };

        let listener = ConnectionListener::start(
            acceptor,
            ConnectionRole::General,
            dispatcher(state),
            ShutdownSignal::new(),
        )
        .unwrap();

        let start = Instant::now();
        while counters.closes.load(Ordering::SeqCst) == 0 && start.elapsed() < Duration::from_secs(5)
        {
            thread::sleep(Duration::from_millis(10));
        }

        assert!(listener.acceptor.accepts.load(Ordering::SeqCst) >= 2);
        listener.stop();

        let written = counters.written.lock().unwrap().clone();
        assert_eq!(written.len(), 1);
        assert!(matches!(written[0], Message::SystemInfo(_)));
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (transport, counters) = scripted(vec![]);
        let mut conn = Connection::new(transport, ConnectionRole::General);

        assert_eq!(conn.state(), ConnectionState::Accepted);
        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        drop(conn);

        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }
}
