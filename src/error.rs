//! Host errors
//!
//! Every operation of the host returns a [`Error`] on failure. The variants follow what a caller
//! can do about the failure:
//!
//! * resource exhaustion (`OutOfBuffers`, `Busy`) can be retried later
//! * protocol violations (`MalformedPdu`, `Decode`) affect one PDU or transaction, the connection
//!   stays up
//! * `Timeout` resolves a single attribute transaction, `ControllerTimeout` means the controller
//!   stopped answering commands and the host can no longer be used
//! * `ConnectionLost` is the outcome of everything still pending when a connection closes

use crate::{att, hci, l2cap};
use core::fmt::{self, Display, Formatter};

#[derive(Clone, PartialEq)]
pub enum Error {
    /// The packet buffer pool is exhausted
    OutOfBuffers,
    /// A command or transaction slot is already in use
    Busy,
    /// The controller did not respond to a command before the command timeout
    ControllerTimeout,
    /// A L2CAP PDU was malformed or could not be reassembled
    MalformedPdu(l2cap::AclDataError),
    /// An attribute transaction was not answered in time
    Timeout,
    /// The peer responded with an attribute protocol error
    Att(att::pdu::Error),
    /// The controller returned a non-success status
    Hci(hci::error::Error),
    /// The connection closed before the operation completed
    ConnectionLost,
    /// There is no connection with the handle
    UnknownConnection(hci::ConnectionHandle),
    /// A received PDU or event could not be decoded, or was not the expected response
    Decode(String),
    /// An input to an operation was invalid
    InvalidParameter(&'static str),
    /// The controller sink failed to send a packet
    Transport(String),
    /// The host was shut down before the operation completed
    Shutdown,
}

impl Error {
    /// Check if this is the attribute protocol error `AttributeNotFound`
    pub fn is_attribute_not_found(&self) -> bool {
        *self == Error::Att(att::pdu::Error::AttributeNotFound)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Error::OutOfBuffers => f.write_str("out of packet buffers"),
            Error::Busy => f.write_str("busy, an operation is already outstanding"),
            Error::ControllerTimeout => f.write_str("controller did not respond to a command"),
            Error::MalformedPdu(e) => write!(f, "malformed PDU: {}", e),
            Error::Timeout => f.write_str("attribute transaction timed out"),
            Error::Att(e) => write!(f, "attribute protocol error: {}", e),
            Error::Hci(e) => write!(f, "controller error: {}", e),
            Error::ConnectionLost => f.write_str("connection lost"),
            Error::UnknownConnection(h) => write!(f, "no connection with handle {}", h),
            Error::Decode(reason) => write!(f, "decode error: {}", reason),
            Error::InvalidParameter(reason) => write!(f, "invalid parameter: {}", reason),
            Error::Transport(reason) => write!(f, "transport error: {}", reason),
            Error::Shutdown => f.write_str("host shut down"),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl From<crate::buffer::BufferError> for Error {
    fn from(err: crate::buffer::BufferError) -> Self {
        match err {
            crate::buffer::BufferError::OutOfBuffers => Error::OutOfBuffers,
            crate::buffer::BufferError::LengthOfBuffer => Error::MalformedPdu(l2cap::AclDataError::RawDataTooSmall),
        }
    }
}

impl From<l2cap::AclDataError> for Error {
    fn from(err: l2cap::AclDataError) -> Self {
        Error::MalformedPdu(err)
    }
}

impl From<att::TransferFormatError> for Error {
    fn from(err: att::TransferFormatError) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<hci::events::EventError> for Error {
    fn from(err: hci::events::EventError) -> Self {
        Error::Decode(err.to_string())
    }
}
