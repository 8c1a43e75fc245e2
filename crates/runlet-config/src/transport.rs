//! Transport and framing selection for the request loop.
//!
//! The daemon either talks over its own standard streams or listens on a
//! local socket. Both directions of a transport use the same [`Framing`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use thiserror::Error;

use crate::socket::{SocketEndpoint, SocketParseError};

/// Where requests arrive and responses are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Transport {
    /// Requests on stdin, responses on stdout.
    #[default]
    Stdio,
    /// Requests and responses over accepted socket connections.
    Socket(SocketEndpoint),
}

impl Transport {
    /// Returns the socket endpoint when the transport listens on a socket.
    #[must_use]
    pub const fn socket(&self) -> Option<&SocketEndpoint> {
        match self {
            Self::Stdio => None,
            Self::Socket(endpoint) => Some(endpoint),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => formatter.write_str("stdio"),
            Self::Socket(endpoint) => endpoint.fmt(formatter),
        }
    }
}

impl FromStr for Transport {
    type Err = TransportParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let trimmed = input.trim();
        if trimmed.eq_ignore_ascii_case("stdio") {
            return Ok(Self::Stdio);
        }
        trimmed
            .parse::<SocketEndpoint>()
            .map(Self::Socket)
            .map_err(|source| TransportParseError {
                input: trimmed.to_owned(),
                source,
            })
    }
}

impl TryFrom<String> for Transport {
    type Error = TransportParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Transport> for String {
    fn from(value: Transport) -> Self {
        value.to_string()
    }
}

/// Error raised when a transport string is neither `stdio` nor a socket URL.
#[derive(Debug, Error)]
#[error("invalid transport '{input}': {source}")]
pub struct TransportParseError {
    input: String,
    #[source]
    source: SocketParseError,
}

/// Message framing applied to requests and responses.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Framing {
    /// One JSON document per newline-terminated line.
    #[default]
    Lines,
    /// A four byte big-endian length followed by the JSON payload.
    LengthPrefixed,
}
