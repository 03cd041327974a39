//! The Attribute Protocol
//!
//! The Attribute Protocol is used to expose the attributes of a device through Bluetooth. An
//! attribute server holds a table of attributes that a connected client can discover, read, and
//! write. Attributes are addressed by a 16 bit handle and labeled by a [`Uuid`](crate::Uuid) type.
//!
//! The client side of every connection is a [`client::ClientBearer`]. A client may only have one
//! request outstanding at a time, the bearer enforces this and times out requests that are never
//! answered. The server side is a [`server::ServerBearer`] that processes the requests of the peer
//! against an [`server::AttributeTable`].
//!
//! Every PDU is decoded once into a [`pdu::Pdu`] when it is received.

pub mod client;
pub mod pdu;
pub mod server;

use crate::l2cap::ChannelIdentifier;
use crate::Uuid;

pub const L2CAP_CHANNEL_ID: ChannelIdentifier = ChannelIdentifier::AttributeProtocol;

/// The default (and minimum) ATT MTU of a LE-U logical link
pub const MIN_ATT_MTU: u16 = 23;

/// Attribute access permissions
///
/// This host core has no security manager, so there are no encryption, authentication, or
/// authorization restrictions. An attribute is readable, writable, or both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributePermissions {
    /// Readable Access
    Read,
    /// Writeable Access
    Write,
}

pub const FULL_PERMISSIONS: &'static [AttributePermissions] =
    &[AttributePermissions::Read, AttributePermissions::Write];

pub const READ_ONLY: &'static [AttributePermissions] = &[AttributePermissions::Read];

/// An error in the transfer format of a PDU
///
/// `pdu_err` is the error code sent back to the peer when the error is caused by a request.
#[derive(PartialEq, Clone)]
pub struct TransferFormatError {
    pub pdu_err: pdu::Error,
    pub message: String,
}

impl TransferFormatError {
    /// Create a `TransferFormatError` for when the processed bytes does not match the expected
    /// number of bytes
    pub(crate) fn bad_size<D1, D2>(name: &'static str, expected_len: D1, incorrect_len: D2) -> Self
    where
        D1: core::fmt::Display,
        D2: core::fmt::Display,
    {
        TransferFormatError {
            pdu_err: pdu::Error::InvalidAttributeValueLength,
            message: format!(
                "Expected a size of {} bytes for {}, data length is {}",
                expected_len, name, incorrect_len
            ),
        }
    }

    pub(crate) fn bad_min_size<D1, D2>(name: &'static str, min_size: D1, data_len: D2) -> Self
    where
        D1: core::fmt::Display,
        D2: core::fmt::Display,
    {
        TransferFormatError {
            pdu_err: pdu::Error::InvalidAttributeValueLength,
            message: format!(
                "Expected a minimum size of {} bytes for {}, data length is {}",
                min_size, name, data_len
            ),
        }
    }

    /// Create a `TransferFormatError` for a list whose length is not a multiple of its entry size
    pub(crate) fn bad_exact_chunks<D1, D2>(name: &'static str, chunk_size: D1, data_len: D2) -> Self
    where
        D1: core::fmt::Display,
        D2: core::fmt::Display,
    {
        TransferFormatError {
            pdu_err: pdu::Error::InvalidAttributeValueLength,
            message: format!(
                "Cannot split data for {}, data of length {} is not a multiple of {}",
                name, data_len, chunk_size
            ),
        }
    }
}

impl From<String> for TransferFormatError {
    /// Create a `TransferFormatError` with the given message
    ///
    /// The member `pdu_err` will be set to `InvalidPDU`
    fn from(message: String) -> Self {
        TransferFormatError {
            pdu_err: pdu::Error::InvalidPDU,
            message,
        }
    }
}

impl From<&'_ str> for TransferFormatError {
    fn from(msg: &'_ str) -> Self {
        TransferFormatError {
            pdu_err: pdu::Error::InvalidPDU,
            message: msg.into(),
        }
    }
}

impl From<pdu::Error> for TransferFormatError {
    fn from(err: pdu::Error) -> Self {
        TransferFormatError {
            pdu_err: err,
            message: "unspecified".into(),
        }
    }
}

impl core::fmt::Debug for TransferFormatError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Display::fmt(self, f)
    }
}

impl core::fmt::Display for TransferFormatError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{}, {}", self.pdu_err, self.message)
    }
}

/// ATT Protocol try from transmission format
///
/// Structures that implement `TransferFormatTryFrom` can be constructed from the attribute
/// protocol raw transmitted data. The byte slice is only the part of the parameter that belongs to
/// the structure.
pub trait TransferFormatTryFrom {
    fn try_from(raw: &[u8]) -> Result<Self, TransferFormatError>
    where
        Self: Sized;
}

/// ATT Protocol Into transmission format
///
/// Structures that implement `TransferFormatInto` append their transmitted form onto the back of
/// a PDU under construction.
pub trait TransferFormatInto {
    /// Get the length of the transmitted form
    fn len_of_into(&self) -> usize;

    /// Append the transmitted form onto `into`
    fn build_into(&self, into: &mut Vec<u8>);

    /// Convert Self into the transferred bytes
    fn into_bytes(&self) -> Vec<u8> {
        let mut buff = Vec::with_capacity(self.len_of_into());

        self.build_into(&mut buff);

        buff
    }
}

impl TransferFormatTryFrom for u8 {
    fn try_from(raw: &[u8]) -> Result<Self, TransferFormatError> {
        match raw {
            [val] => Ok(*val),
            _ => Err(TransferFormatError::bad_size("u8", 1, raw.len())),
        }
    }
}

impl TransferFormatInto for u8 {
    fn len_of_into(&self) -> usize {
        1
    }

    fn build_into(&self, into: &mut Vec<u8>) {
        into.push(*self)
    }
}

impl TransferFormatTryFrom for u16 {
    fn try_from(raw: &[u8]) -> Result<Self, TransferFormatError> {
        match raw {
            [lo, hi] => Ok(u16::from_le_bytes([*lo, *hi])),
            _ => Err(TransferFormatError::bad_size("u16", 2, raw.len())),
        }
    }
}

impl TransferFormatInto for u16 {
    fn len_of_into(&self) -> usize {
        2
    }

    fn build_into(&self, into: &mut Vec<u8>) {
        into.extend_from_slice(&self.to_le_bytes())
    }
}

impl TransferFormatTryFrom for Uuid {
    fn try_from(raw: &[u8]) -> Result<Self, TransferFormatError> {
        Uuid::try_from_le_slice(raw).ok_or_else(|| {
            TransferFormatError::from(format!(
                "a UUID must be 2 or 16 bytes, received {} bytes",
                raw.len()
            ))
        })
    }
}

impl TransferFormatInto for Uuid {
    fn len_of_into(&self) -> usize {
        self.att_len()
    }

    fn build_into(&self, into: &mut Vec<u8>) {
        self.extend_le(into)
    }
}

impl TransferFormatTryFrom for Vec<u16> {
    fn try_from(raw: &[u8]) -> Result<Self, TransferFormatError> {
        if raw.len() % 2 != 0 {
            return Err(TransferFormatError::bad_exact_chunks("handles", 2, raw.len()));
        }

        Ok(raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect())
    }
}

impl TransferFormatInto for Vec<u16> {
    fn len_of_into(&self) -> usize {
        self.len() * 2
    }

    fn build_into(&self, into: &mut Vec<u8>) {
        self.iter().for_each(|h| h.build_into(into))
    }
}
