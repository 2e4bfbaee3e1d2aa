//! # Console commands
//!
//! Each line typed into the console is parsed into a [`Command`] with the same argument parser
//! used for the console's own arguments.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::msg::{Message, MessageTypeQuery, MotorMessage, TargetMessage};
use structopt::{clap::AppSettings, StructOpt};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, PartialEq, StructOpt)]
#[structopt(no_version, global_settings = &[AppSettings::AllowNegativeNumbers])]
pub enum Command {
    /// Request data from the controller: info, status, temperature, compass, gps or motors
    Req { query: MessageTypeQuery },

    /// Set the left and right motor speeds, each between -1 and 1
    Motors { left: f64, right: f64 },

    /// Stop both motors
    Stop,

    /// Set whether entities move on each update, and the update step
    Target {
        #[structopt(parse(try_from_str))]
        to_move: bool,

        step_ms: i64,
    },

    /// Print broadcasts received from the controller
    Listen {
        /// Number of broadcasts to print before returning
        #[structopt(default_value = "10")]
        count: usize,
    },

    /// Exit the console
    #[structopt(alias = "exit")]
    Quit,
}

/// Where a command's message must be sent.
#[derive(Debug, PartialEq)]
pub enum Route {
    General(Message),
    Motor(Message),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Command {
    /// Parse a line typed into the console.
    ///
    /// Blank lines give `Ok(None)`. On error the returned text is the usage to show the operator.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return Ok(None);
        }

        Command::from_iter_safe(std::iter::once("").chain(words))
            .map(Some)
            .map_err(|e| e.message)
    }

    /// The message this command sends, if it sends one.
    pub fn route(&self) -> Option<Route> {
        match self {
            Command::Req { query } => Some(Route::General(Message::request(*query))),
            Command::Motors { left, right } => {
                Some(Route::Motor(Message::Motor(MotorMessage::new(*left, *right))))
            }
            Command::Stop => Some(Route::Motor(Message::Motor(MotorMessage::STOP))),
            Command::Target { to_move, step_ms } => {
                Some(Route::General(Message::Target(TargetMessage {
                    to_move: *to_move,
                    time_step_ms: *step_ms,
                })))
            }
            Command::Listen { .. } | Command::Quit => None,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!(Command::parse("   "), Ok(None));
        assert_eq!(
            Command::parse("req gps"),
            Ok(Some(Command::Req {
                query: MessageTypeQuery::Gps
            }))
        );
        assert_eq!(
            Command::parse("motors -0.5 1"),
            Ok(Some(Command::Motors {
                left: -0.5,
                right: 1.0
            }))
        );
        assert_eq!(
            Command::parse("listen"),
            Ok(Some(Command::Listen { count: 10 }))
        );
        assert_eq!(Command::parse("exit"), Ok(Some(Command::Quit)));

        assert!(Command::parse("req altitude").is_err());
        assert!(Command::parse("motors 0.5").is_err());
        assert!(Command::parse("fly").is_err());
    }

    #[test]
    fn test_routes() {
        assert_eq!(
            Command::Stop.route(),
            Some(Route::Motor(Message::Motor(MotorMessage::STOP)))
        );
        assert_eq!(
            Command::Target {
                to_move: true,
                step_ms: 50
            }
            .route(),
            Some(Route::General(Message::Target(TargetMessage {
                to_move: true,
                time_step_ms: 50
            })))
        );
        assert_eq!(Command::Quit.route(), None);
    }
}
