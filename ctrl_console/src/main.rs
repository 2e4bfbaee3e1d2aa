//! # Controller Console
//!
//! Issues commands to the drone's controller from the command line. Requests and target messages
//! go to the controller's general endpoint, motor commands to its motor endpoint, and `listen`
//! prints the broadcasts the controller sends.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod cmd;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use color_eyre::{
    eyre::{eyre, Report, WrapErr},
    Result,
};
use comms_if::{
    msg::Message,
    net::{FrameTransport, TcpFrameStream, TransportError, UdpReceiver},
};
use log::{info, warn};
use rustyline::{error::ReadlineError, DefaultEditor};
use std::path::PathBuf;
use structopt::StructOpt;
use util::logger::{console_logger_init, LevelFilter};

use cmd::{Command, Route};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const PROMPT: &str = "Drone $ ";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "ctrl_console", about = "Command line console for the drone's controller")]
struct Args {
    /// Endpoint of the controller's general listener
    #[structopt(long, default_value = "127.0.0.1:5000")]
    general: String,

    /// Endpoint of the controller's motor listener
    #[structopt(long, default_value = "127.0.0.1:5001")]
    motor: String,

    /// Local endpoint broadcasts are received on
    #[structopt(long, default_value = "0.0.0.0:5002")]
    listen: String,

    /// File the command history is kept in
    #[structopt(long, default_value = "data/history.txt", parse(from_os_str))]
    history: PathBuf,
}

/// A connection which is opened when first needed, and again after it fails.
struct LazyConnection {
    endpoint: String,

    stream: Option<TcpFrameStream>,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::from_args();

    console_logger_init(LevelFilter::Info).wrap_err("Failed to initialise logging")?;

    let mut rl = DefaultEditor::new().wrap_err("Failed to start the line editor")?;
    if rl.load_history(&args.history).is_err() {
        info!("No history found at {:?}", args.history);
    }

    let mut general = LazyConnection::new(&args.general);
    let mut motor = LazyConnection::new(&args.motor);

    loop {
        let line = match rl.readline(PROMPT) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).wrap_err("Could not read the command"),
        };

        rl.add_history_entry(line.as_str()).ok();

        let command = match Command::parse(&line) {
            Ok(Some(c)) => c,
            Ok(None) => continue,
            Err(usage) => {
                println!("{}", usage);
                continue;
            }
        };

        match (&command, command.route()) {
            (Command::Quit, _) => break,
            (Command::Listen { count }, _) => listen(&args.listen, *count),
            (_, Some(Route::General(msg))) => print_response(general.request(&msg)),
            (_, Some(Route::Motor(msg))) => print_response(motor.request(&msg)),
            (_, None) => (),
        }
    }

    if let Some(dir) = args.history.parent() {
        std::fs::create_dir_all(dir).ok();
    }
    if let Err(e) = rl.save_history(&args.history) {
        warn!("Could not save the history to {:?}: {}", args.history, e);
    }

    println!("Exiting...");

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LazyConnection {
    fn new(endpoint: &str) -> Self {
        Self {
            endpoint: String::from(endpoint),
            stream: None,
        }
    }

    /// Send a message and wait for the response.
    ///
    /// The connection is dropped on any error, so the next request reconnects.
    fn request(&mut self, msg: &Message) -> Result<Message> {
        let result = self.try_request(msg);

        if result.is_err() {
            self.stream = None;
        }

        result
    }

    fn try_request(&mut self, msg: &Message) -> Result<Message> {
        let stream = match self.stream.take() {
            Some(s) => self.stream.insert(s),
            None => {
                let s = TcpFrameStream::connect(&self.endpoint)
                    .wrap_err_with(|| format!("Could not connect to {}", self.endpoint))?;
                info!("Connected to {}", self.endpoint);
                self.stream.insert(s)
            }
        };

        stream
            .write_frame(&msg.encode()?)
            .wrap_err("Could not send the message")?;

        let frame = stream.read_frame().map_err(|e| match e {
            TransportError::Closed => eyre!("The controller closed the connection"),
            e => Report::new(e),
        })?;

        Message::decode(&frame).wrap_err("The response could not be decoded")
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn print_response(response: Result<Message>) {
    match response {
        Ok(Message::SystemStatus(s)) => println!("{}", s.text),
        Ok(msg) => match serde_json::to_string_pretty(&msg) {
            Ok(s) => println!("{}", s),
            Err(_) => println!("{:?}", msg),
        },
        Err(e) => println!("Error: {:#}", e),
    }
}

fn listen(endpoint: &str, count: usize) {
    let receiver = match UdpReceiver::bind(endpoint) {
        Ok(r) => r,
        Err(e) => {
            println!("Could not listen on {}: {}", endpoint, e);
            return;
        }
    };

    println!("Listening on {} for {} broadcasts", endpoint, count);

    for _ in 0..count {
        match receiver.recv_frame() {
            Ok((frame, from)) => match Message::decode(&frame) {
                Ok(msg) => println!("{} -> {:?}", from, msg),
                Err(e) => println!("{} -> undecodable broadcast: {}", from, e),
            },
            Err(e) => {
                println!("Could not receive: {}", e);
                break;
            }
        }
    }
}
