//! # Information requests

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A request for one category of data held by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InformationRequest {
    /// The category of data being requested
    pub query: MessageTypeQuery,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// All categories of data which can be requested from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageTypeQuery {
    SystemInformation,
    SystemStatus,
    Temperature,
    Compass,
    Gps,
    Motors,
}

/// Error returned when parsing a [`MessageTypeQuery`] from a string.
#[derive(thiserror::Error, Debug)]
#[error("\"{0}\" is not a recognised query, expected one of {1:?}")]
pub struct QueryParseError(String, &'static [&'static str]);

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const QUERY_NAMES: &[&str] = &["info", "status", "temperature", "compass", "gps", "motors"];

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl InformationRequest {
    pub fn new(query: MessageTypeQuery) -> Self {
        Self { query }
    }
}

impl MessageTypeQuery {
    /// Short human readable name, as accepted by the `FromStr` implementation.
    pub fn name(&self) -> &'static str {
        match self {
            MessageTypeQuery::SystemInformation => QUERY_NAMES[0],
            MessageTypeQuery::SystemStatus => QUERY_NAMES[1],
            MessageTypeQuery::Temperature => QUERY_NAMES[2],
            MessageTypeQuery::Compass => QUERY_NAMES[3],
            MessageTypeQuery::Gps => QUERY_NAMES[4],
            MessageTypeQuery::Motors => QUERY_NAMES[5],
        }
    }
}

impl fmt::Display for MessageTypeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for MessageTypeQuery {
    type Err = QueryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" | "system_information" => Ok(MessageTypeQuery::SystemInformation),
            "status" | "system_status" => Ok(MessageTypeQuery::SystemStatus),
            "temperature" | "temp" => Ok(MessageTypeQuery::Temperature),
            "compass" => Ok(MessageTypeQuery::Compass),
            "gps" => Ok(MessageTypeQuery::Gps),
            "motors" => Ok(MessageTypeQuery::Motors),
            _ => Err(QueryParseError(s.to_string(), QUERY_NAMES)),
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
    fn test_query_names_parse_back() {
        for q in [
            MessageTypeQuery::SystemInformation,
            MessageTypeQuery::SystemStatus,
            MessageTypeQuery::Temperature,
            MessageTypeQuery::Compass,
            MessageTypeQuery::Gps,
            MessageTypeQuery::Motors,
        ]
        .iter()
        {
            assert_eq!(q.name().parse::<MessageTypeQuery>().unwrap(), *q);
        }

        assert!("TEMP".parse::<MessageTypeQuery>().is_ok());
        assert!("battery".parse::<MessageTypeQuery>().is_err());
    }

    #[test]
    fn test_query_wire_names() {
        let json = serde_json::to_string(&InformationRequest::new(MessageTypeQuery::SystemStatus))
            .unwrap();
        assert_eq!(json, r#"{"query":"SYSTEM_STATUS"}"#);
    }
}
