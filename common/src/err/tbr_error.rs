use std::fmt::Display;
use std::num::ParseIntError;
use std::str::Utf8Error;
use std::string::FromUtf8Error;
use std::{fmt, io};

/// Error kinds surfaced by the replication core.
#[derive(Debug)]
pub enum TbrError {
    //////////////////////
    // Configuration
    //////////////////////
    /// Malformed server URI or an option that cannot be interpreted before
    /// the handshake has classified the server.
    Config(String),
    ConfigFileParseErr(String),

    //////////////////////
    // Protocol client
    //////////////////////
    /// Server returned ERR during handshake or authentication.
    /// Fatal for the listener, never retried.
    AuthenticationFailed(String),
    /// Server returned ERR for a SET, register or dump command.
    CommandFailed(String),
    /// A packet did not parse under the wire rules.
    ProtocolViolation(String),
    /// Requested binlog coordinates do not exist on the server.
    OutOfRange(String),
    ConnectionError(String),

    //////////////////////
    // Event decoding
    //////////////////////
    /// Byte stream was shorter than the decoder required.
    /// `Needed` carries what kind of data was missing.
    Incomplete(Needed),
    /// Event payload failed to decode. The event is reported as Unknown
    /// and streaming continues.
    MalformedEvent(String),

    //////////////////////
    // Metadata store
    //////////////////////
    /// Metadata read or write failed. Logged and retried on the next
    /// flush interval, never fatal.
    Persistence(String),

    //////////////////////
    // Std conversions
    //////////////////////
    IoError(io::Error),
    Utf8Error(Utf8Error),
    FromUtf8Error(FromUtf8Error),
    ParseIntError(ParseIntError),
}

impl Display for TbrError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> fmt::Result {
        match self {
            TbrError::Config(s)
            | TbrError::ConfigFileParseErr(s)
            | TbrError::AuthenticationFailed(s)
            | TbrError::CommandFailed(s)
            | TbrError::ProtocolViolation(s)
            | TbrError::OutOfRange(s)
            | TbrError::ConnectionError(s)
            | TbrError::MalformedEvent(s)
            | TbrError::Persistence(s) => {
                write!(f, "{}", s)
            }
            TbrError::Incomplete(n) => {
                write!(f, "{}", n)
            }
            TbrError::IoError(err) => {
                write!(f, "{}", err)
            }
            TbrError::Utf8Error(err) => {
                write!(f, "{}", err)
            }
            TbrError::FromUtf8Error(err) => {
                write!(f, "{}", err)
            }
            TbrError::ParseIntError(err) => {
                write!(f, "{}", err)
            }
        }
    }
}

impl std::error::Error for TbrError {}

impl From<io::Error> for TbrError {
    fn from(error: io::Error) -> Self {
        // A closed socket first shows up as a short read.
        if error.kind() == io::ErrorKind::UnexpectedEof {
            return TbrError::Incomplete(Needed::NoEnoughData);
        }
        TbrError::IoError(error)
    }
}

impl From<Utf8Error> for TbrError {
    fn from(error: Utf8Error) -> Self {
        TbrError::Utf8Error(error)
    }
}

impl From<FromUtf8Error> for TbrError {
    fn from(error: FromUtf8Error) -> Self {
        TbrError::FromUtf8Error(error)
    }
}

impl From<ParseIntError> for TbrError {
    fn from(error: ParseIntError) -> Self {
        TbrError::ParseIntError(error)
    }
}

impl TbrError {
    /// True for errors that abort the listener session rather than a
    /// single event.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            TbrError::AuthenticationFailed(_)
                | TbrError::CommandFailed(_)
                | TbrError::ProtocolViolation(_)
                | TbrError::ConnectionError(_)
                | TbrError::IoError(_)
        )
    }
}

/// Detail on missing data when a decoder returned `Incomplete`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Needed {
    /// Needs more data, but we do not know how much
    Unknown,

    NoEnoughData,

    InvalidUtf8,

    InvalidData(String),
}

impl Display for Needed {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> fmt::Result {
        match self {
            Needed::Unknown => {
                write!(f, "Unknown")
            }
            Needed::NoEnoughData => {
                write!(f, "NoEnoughData")
            }
            Needed::InvalidUtf8 => {
                write!(f, "InvalidUtf8")
            }
            Needed::InvalidData(s) => {
                write!(f, "{}", s)
            }
        }
    }
}
