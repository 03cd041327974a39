//! Attribute Protocol data units (PDUs)
//!
//! A received PDU is decoded once into the sum type [`Pdu`]. Every variant is one of the PDUs of
//! the Attribute Protocol, *requests* and *commands* are sent by a client, *responses*,
//! *notifications*, and *indications* are sent by a server, and a *confirmation* is sent by a
//! client to acknowledge an indication.

use super::{TransferFormatError, TransferFormatInto, TransferFormatTryFrom};
use crate::Uuid;
use core::convert::TryFrom;

pub const INVALID_HANDLE: u16 = 0;

#[inline]
pub fn is_valid_handle(handle: u16) -> bool {
    handle != INVALID_HANDLE
}

/// The opcodes of the Attribute Protocol
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum PduOpcode {
    ErrorResponse,
    ExchangeMtuRequest,
    ExchangeMtuResponse,
    FindInformationRequest,
    FindInformationResponse,
    FindByTypeValueRequest,
    FindByTypeValueResponse,
    ReadByTypeRequest,
    ReadByTypeResponse,
    ReadRequest,
    ReadResponse,
    ReadBlobRequest,
    ReadBlobResponse,
    ReadMultipleRequest,
    ReadMultipleResponse,
    ReadByGroupTypeRequest,
    ReadByGroupTypeResponse,
    WriteRequest,
    WriteResponse,
    WriteCommand,
    PrepareWriteRequest,
    PrepareWriteResponse,
    ExecuteWriteRequest,
    ExecuteWriteResponse,
    HandleValueNotification,
    HandleValueIndication,
    HandleValueConfirmation,
}

impl PduOpcode {
    /// The bit of a raw opcode that marks a command
    pub const COMMAND_FLAG: u8 = 1 << 6;

    pub fn as_raw(&self) -> u8 {
        match self {
            PduOpcode::ErrorResponse => 0x01,
            PduOpcode::ExchangeMtuRequest => 0x02,
            PduOpcode::ExchangeMtuResponse => 0x03,
            PduOpcode::FindInformationRequest => 0x04,
            PduOpcode::FindInformationResponse => 0x05,
            PduOpcode::FindByTypeValueRequest => 0x06,
            PduOpcode::FindByTypeValueResponse => 0x07,
            PduOpcode::ReadByTypeRequest => 0x08,
            PduOpcode::ReadByTypeResponse => 0x09,
            PduOpcode::ReadRequest => 0x0A,
            PduOpcode::ReadResponse => 0x0B,
            PduOpcode::ReadBlobRequest => 0x0C,
            PduOpcode::ReadBlobResponse => 0x0D,
            PduOpcode::ReadMultipleRequest => 0x0E,
            PduOpcode::ReadMultipleResponse => 0x0F,
            PduOpcode::ReadByGroupTypeRequest => 0x10,
            PduOpcode::ReadByGroupTypeResponse => 0x11,
            PduOpcode::WriteRequest => 0x12,
            PduOpcode::WriteResponse => 0x13,
            PduOpcode::WriteCommand => 0x52,
            PduOpcode::PrepareWriteRequest => 0x16,
            PduOpcode::PrepareWriteResponse => 0x17,
            PduOpcode::ExecuteWriteRequest => 0x18,
            PduOpcode::ExecuteWriteResponse => 0x19,
            PduOpcode::HandleValueNotification => 0x1B,
            PduOpcode::HandleValueIndication => 0x1D,
            PduOpcode::HandleValueConfirmation => 0x1E,
        }
    }

    /// Get the opcode of the response to this request
    ///
    /// `None` is returned if this is not the opcode of a request.
    pub fn response(&self) -> Option<PduOpcode> {
        match self {
            PduOpcode::ExchangeMtuRequest => Some(PduOpcode::ExchangeMtuResponse),
            PduOpcode::FindInformationRequest => Some(PduOpcode::FindInformationResponse),
            PduOpcode::FindByTypeValueRequest => Some(PduOpcode::FindByTypeValueResponse),
            PduOpcode::ReadByTypeRequest => Some(PduOpcode::ReadByTypeResponse),
            PduOpcode::ReadRequest => Some(PduOpcode::ReadResponse),
            PduOpcode::ReadBlobRequest => Some(PduOpcode::ReadBlobResponse),
            PduOpcode::ReadMultipleRequest => Some(PduOpcode::ReadMultipleResponse),
            PduOpcode::ReadByGroupTypeRequest => Some(PduOpcode::ReadByGroupTypeResponse),
            PduOpcode::WriteRequest => Some(PduOpcode::WriteResponse),
            PduOpcode::PrepareWriteRequest => Some(PduOpcode::PrepareWriteResponse),
            PduOpcode::ExecuteWriteRequest => Some(PduOpcode::ExecuteWriteResponse),
            _ => None,
        }
    }

    /// Check if this is the opcode of a response sent by a server to a client request
    pub fn is_response(&self) -> bool {
        match self {
            PduOpcode::ErrorResponse
            | PduOpcode::ExchangeMtuResponse
            | PduOpcode::FindInformationResponse
            | PduOpcode::FindByTypeValueResponse
            | PduOpcode::ReadByTypeResponse
            | PduOpcode::ReadResponse
            | PduOpcode::ReadBlobResponse
            | PduOpcode::ReadMultipleResponse
            | PduOpcode::ReadByGroupTypeResponse
            | PduOpcode::WriteResponse
            | PduOpcode::PrepareWriteResponse
            | PduOpcode::ExecuteWriteResponse => true,
            _ => false,
        }
    }
}

impl TryFrom<u8> for PduOpcode {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0x01 => Ok(PduOpcode::ErrorResponse),
            0x02 => Ok(PduOpcode::ExchangeMtuRequest),
            0x03 => Ok(PduOpcode::ExchangeMtuResponse),
            0x04 => Ok(PduOpcode::FindInformationRequest),
            0x05 => Ok(PduOpcode::FindInformationResponse),
            0x06 => Ok(PduOpcode::FindByTypeValueRequest),
            0x07 => Ok(PduOpcode::FindByTypeValueResponse),
            0x08 => Ok(PduOpcode::ReadByTypeRequest),
            0x09 => Ok(PduOpcode::ReadByTypeResponse),
            0x0A => Ok(PduOpcode::ReadRequest),
            0x0B => Ok(PduOpcode::ReadResponse),
            0x0C => Ok(PduOpcode::ReadBlobRequest),
            0x0D => Ok(PduOpcode::ReadBlobResponse),
            0x0E => Ok(PduOpcode::ReadMultipleRequest),
            0x0F => Ok(PduOpcode::ReadMultipleResponse),
            0x10 => Ok(PduOpcode::ReadByGroupTypeRequest),
            0x11 => Ok(PduOpcode::ReadByGroupTypeResponse),
            0x12 => Ok(PduOpcode::WriteRequest),
            0x13 => Ok(PduOpcode::WriteResponse),
            0x52 => Ok(PduOpcode::WriteCommand),
            0x16 => Ok(PduOpcode::PrepareWriteRequest),
            0x17 => Ok(PduOpcode::PrepareWriteResponse),
            0x18 => Ok(PduOpcode::ExecuteWriteRequest),
            0x19 => Ok(PduOpcode::ExecuteWriteResponse),
            0x1B => Ok(PduOpcode::HandleValueNotification),
            0x1D => Ok(PduOpcode::HandleValueIndication),
            0x1E => Ok(PduOpcode::HandleValueConfirmation),
            raw => Err(raw),
        }
    }
}

impl core::fmt::Display for PduOpcode {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Debug::fmt(self, f)
    }
}

/// Error when converting a u8 to an [`Error`]
///
/// Not all error values are for the ATT protocol, some are application level, and some are
/// defined elsewhere.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorConversionError {
    /// Application level error code
    ApplicationError(u8),
    /// Values that are in the "Reserved for future use" range get put here
    Reserved(u8),
    /// Common profile and service error codes that are from the Core Specification Supplement
    CommonErrorCode(u8),
}

impl core::fmt::Display for ErrorConversionError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            ErrorConversionError::ApplicationError(val) => write!(f, "Application Error: 0x{:X}", val),
            ErrorConversionError::Reserved(val) => {
                write!(f, "Error value is reserved for future use (0x{:X})", val)
            }
            ErrorConversionError::CommonErrorCode(val) => write!(f, "Common error: 0x{:X}", val),
        }
    }
}

/// The ATT Protocol errors
///
/// These are the error codes carried by an *Error Response*.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// Used to represent 0x0000, this should never be used as an error code
    NoError,
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPDU,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    UnlikelyError,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    /// The rest of the error codes are either reserved for future use, used for higher layer
    /// protocols, or a common error code from the core specification.
    Other(ErrorConversionError),
}

impl Error {
    pub fn from_raw(val: u8) -> Error {
        match val {
            0x00 => Error::NoError,
            0x01 => Error::InvalidHandle,
            0x02 => Error::ReadNotPermitted,
            0x03 => Error::WriteNotPermitted,
            0x04 => Error::InvalidPDU,
            0x05 => Error::InsufficientAuthentication,
            0x06 => Error::RequestNotSupported,
            0x07 => Error::InvalidOffset,
            0x08 => Error::InsufficientAuthorization,
            0x09 => Error::PrepareQueueFull,
            0x0A => Error::AttributeNotFound,
            0x0B => Error::AttributeNotLong,
            0x0C => Error::InsufficientEncryptionKeySize,
            0x0D => Error::InvalidAttributeValueLength,
            0x0E => Error::UnlikelyError,
            0x0F => Error::InsufficientEncryption,
            0x10 => Error::UnsupportedGroupType,
            0x11 => Error::InsufficientResources,
            0x12..=0x7F => Error::Other(ErrorConversionError::Reserved(val)),
            0x80..=0x9F => Error::Other(ErrorConversionError::ApplicationError(val)),
            0xA0..=0xDF => Error::Other(ErrorConversionError::Reserved(val)),
            0xE0..=0xFF => Error::Other(ErrorConversionError::CommonErrorCode(val)),
        }
    }

    pub fn get_raw(&self) -> u8 {
        match self {
            Error::NoError => 0x00,
            Error::InvalidHandle => 0x01,
            Error::ReadNotPermitted => 0x02,
            Error::WriteNotPermitted => 0x03,
            Error::InvalidPDU => 0x04,
            Error::InsufficientAuthentication => 0x05,
            Error::RequestNotSupported => 0x06,
            Error::InvalidOffset => 0x07,
            Error::InsufficientAuthorization => 0x08,
            Error::PrepareQueueFull => 0x09,
            Error::AttributeNotFound => 0x0A,
            Error::AttributeNotLong => 0x0B,
            Error::InsufficientEncryptionKeySize => 0x0C,
            Error::InvalidAttributeValueLength => 0x0D,
            Error::UnlikelyError => 0x0E,
            Error::InsufficientEncryption => 0x0F,
            Error::UnsupportedGroupType => 0x10,
            Error::InsufficientResources => 0x11,
            Error::Other(ErrorConversionError::ApplicationError(val))
            | Error::Other(ErrorConversionError::Reserved(val))
            | Error::Other(ErrorConversionError::CommonErrorCode(val)) => *val,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Error::NoError => write!(f, "No Error"),
            Error::InvalidHandle => write!(f, "Invalid attribute handle"),
            Error::ReadNotPermitted => write!(f, "The attribute cannot be read"),
            Error::WriteNotPermitted => write!(f, "The attribute cannot be written"),
            Error::InvalidPDU => write!(f, "The attribute protocol data unit (PDU) was invalid"),
            Error::InsufficientAuthentication => write!(
                f,
                "The attribute requires authentication before it can be read or written"
            ),
            Error::RequestNotSupported => write!(
                f,
                "Attribute server does not support the request received from the client"
            ),
            Error::InvalidOffset => write!(f, "The attribute value byte or word offset was not valid"),
            Error::InsufficientAuthorization => write!(
                f,
                "The attribute requires authorization before it can be read or written"
            ),
            Error::PrepareQueueFull => write!(f, "Too many prepare writes have been queued"),
            Error::AttributeNotFound => write!(f, "No attribute found within the given attribute handle range"),
            Error::AttributeNotLong => write!(f, "The attribute cannot be read using the Read Blob Request"),
            Error::InsufficientEncryptionKeySize => write!(
                f,
                "The Encryption Key Size used for encrypting was insufficient for reading or writing this attribute"
            ),
            Error::InvalidAttributeValueLength => {
                write!(f, "The attribute value length was invalid for the operation")
            }
            Error::UnlikelyError => write!(
                f,
                "The request could not be completed because of an unlikely error"
            ),
            Error::InsufficientEncryption => write!(
                f,
                "The attribute requires encryption before it can be read or written"
            ),
            Error::UnsupportedGroupType => write!(f, "The attribute type is not a supported grouping type"),
            Error::InsufficientResources => write!(f, "Insufficient Resources to complete the request"),
            Error::Other(other) => write!(f, "{}", other),
        }
    }
}

/// A range of attribute handles
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandleRange {
    pub starting_handle: u16,
    pub ending_handle: u16,
}

impl HandleRange {
    /// The range of every attribute handle
    pub const FULL: HandleRange = HandleRange {
        starting_handle: 0x0001,
        ending_handle: 0xFFFF,
    };

    /// Check that the starting handle is valid and not larger than the ending handle
    pub fn is_valid(&self) -> bool {
        is_valid_handle(self.starting_handle) && self.starting_handle <= self.ending_handle
    }

    pub fn contains(&self, handle: u16) -> bool {
        (self.starting_handle..=self.ending_handle).contains(&handle)
    }
}

impl TransferFormatTryFrom for HandleRange {
    fn try_from(raw: &[u8]) -> Result<Self, TransferFormatError> {
        if raw.len() != 4 {
            return Err(TransferFormatError::bad_size("HandleRange", 4, raw.len()));
        }

        Ok(HandleRange {
            starting_handle: u16::from_le_bytes([raw[0], raw[1]]),
            ending_handle: u16::from_le_bytes([raw[2], raw[3]]),
        })
    }
}

impl TransferFormatInto for HandleRange {
    fn len_of_into(&self) -> usize {
        4
    }

    fn build_into(&self, into: &mut Vec<u8>) {
        self.starting_handle.build_into(into);
        self.ending_handle.build_into(into);
    }
}

impl<R> From<R> for HandleRange
where
    R: core::ops::RangeBounds<u16>,
{
    fn from(range: R) -> Self {
        use core::ops::Bound;

        let starting_handle = match range.start_bound() {
            Bound::Included(v) => *v,
            Bound::Excluded(v) => v.saturating_add(1),
            Bound::Unbounded => 1,
        };

        let ending_handle = match range.end_bound() {
            Bound::Included(v) => *v,
            Bound::Excluded(v) => v.saturating_sub(1),
            Bound::Unbounded => 0xFFFF,
        };

        HandleRange {
            starting_handle,
            ending_handle,
        }
    }
}

/// A handle and attribute type pair of a *Find Information Response*
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandleWithType {
    pub handle: u16,
    pub uuid: Uuid,
}

/// A handle and group end handle pair of a *Find By Type Value Response*
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TypeValueResponse {
    pub handle: u16,
    pub group_end_handle: u16,
}

/// An entry of a *Read By Type Response*
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadTypeData {
    pub handle: u16,
    pub value: Vec<u8>,
}

/// An entry of a *Read By Group Type Response*
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadGroupTypeData {
    pub handle: u16,
    pub end_group_handle: u16,
    pub value: Vec<u8>,
}

/// A decoded ATT PDU
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Pdu {
    ErrorResponse {
        request_opcode: u8,
        handle: u16,
        error: Error,
    },
    ExchangeMtuRequest(u16),
    ExchangeMtuResponse(u16),
    FindInformationRequest(HandleRange),
    FindInformationResponse(Vec<HandleWithType>),
    FindByTypeValueRequest {
        range: HandleRange,
        attribute_type: u16,
        value: Vec<u8>,
    },
    FindByTypeValueResponse(Vec<TypeValueResponse>),
    ReadByTypeRequest {
        range: HandleRange,
        attribute_type: Uuid,
    },
    ReadByTypeResponse(Vec<ReadTypeData>),
    ReadRequest(u16),
    ReadResponse(Vec<u8>),
    ReadBlobRequest {
        handle: u16,
        offset: u16,
    },
    ReadBlobResponse(Vec<u8>),
    ReadMultipleRequest(Vec<u16>),
    ReadMultipleResponse(Vec<u8>),
    ReadByGroupTypeRequest {
        range: HandleRange,
        group_type: Uuid,
    },
    ReadByGroupTypeResponse(Vec<ReadGroupTypeData>),
    WriteRequest {
        handle: u16,
        value: Vec<u8>,
    },
    WriteResponse,
    WriteCommand {
        handle: u16,
        value: Vec<u8>,
    },
    PrepareWriteRequest {
        handle: u16,
        offset: u16,
        value: Vec<u8>,
    },
    PrepareWriteResponse {
        handle: u16,
        offset: u16,
        value: Vec<u8>,
    },
    ExecuteWriteRequest {
        execute: bool,
    },
    ExecuteWriteResponse,
    HandleValueNotification {
        handle: u16,
        value: Vec<u8>,
    },
    HandleValueIndication {
        handle: u16,
        value: Vec<u8>,
    },
    HandleValueConfirmation,
    /// A PDU with an opcode this host does not support (such as a signed write command)
    Unsupported {
        opcode: u8,
    },
}

fn handle_and_value(name: &'static str, p: &[u8]) -> Result<(u16, Vec<u8>), TransferFormatError> {
    if p.len() < 2 {
        return Err(TransferFormatError::bad_min_size(name, 2, p.len()));
    }

    Ok((u16::from_le_bytes([p[0], p[1]]), p[2..].to_vec()))
}

fn handle_offset_and_value(name: &'static str, p: &[u8]) -> Result<(u16, u16, Vec<u8>), TransferFormatError> {
    if p.len() < 4 {
        return Err(TransferFormatError::bad_min_size(name, 4, p.len()));
    }

    Ok((
        u16::from_le_bytes([p[0], p[1]]),
        u16::from_le_bytes([p[2], p[3]]),
        p[4..].to_vec(),
    ))
}

impl Pdu {
    /// Get the opcode of this PDU
    ///
    /// An `Unsupported` PDU has no `PduOpcode`, use [`raw_opcode`](Pdu::raw_opcode) for it.
    pub fn opcode(&self) -> Option<PduOpcode> {
        Some(match self {
            Pdu::ErrorResponse { .. } => PduOpcode::ErrorResponse,
            Pdu::ExchangeMtuRequest(_) => PduOpcode::ExchangeMtuRequest,
            Pdu::ExchangeMtuResponse(_) => PduOpcode::ExchangeMtuResponse,
            Pdu::FindInformationRequest(_) => PduOpcode::FindInformationRequest,
            Pdu::FindInformationResponse(_) => PduOpcode::FindInformationResponse,
            Pdu::FindByTypeValueRequest { .. } => PduOpcode::FindByTypeValueRequest,
            Pdu::FindByTypeValueResponse(_) => PduOpcode::FindByTypeValueResponse,
            Pdu::ReadByTypeRequest { .. } => PduOpcode::ReadByTypeRequest,
            Pdu::ReadByTypeResponse(_) => PduOpcode::ReadByTypeResponse,
            Pdu::ReadRequest(_) => PduOpcode::ReadRequest,
            Pdu::ReadResponse(_) => PduOpcode::ReadResponse,
            Pdu::ReadBlobRequest { .. } => PduOpcode::ReadBlobRequest,
            Pdu::ReadBlobResponse(_) => PduOpcode::ReadBlobResponse,
            Pdu::ReadMultipleRequest(_) => PduOpcode::ReadMultipleRequest,
            Pdu::ReadMultipleResponse(_) => PduOpcode::ReadMultipleResponse,
            Pdu::ReadByGroupTypeRequest { .. } => PduOpcode::ReadByGroupTypeRequest,
            Pdu::ReadByGroupTypeResponse(_) => PduOpcode::ReadByGroupTypeResponse,
            Pdu::WriteRequest { .. } => PduOpcode::WriteRequest,
            Pdu::WriteResponse => PduOpcode::WriteResponse,
            Pdu::WriteCommand { .. } => PduOpcode::WriteCommand,
            Pdu::PrepareWriteRequest { .. } => PduOpcode::PrepareWriteRequest,
            Pdu::PrepareWriteResponse { .. } => PduOpcode::PrepareWriteResponse,
            Pdu::ExecuteWriteRequest { .. } => PduOpcode::ExecuteWriteRequest,
            Pdu::ExecuteWriteResponse => PduOpcode::ExecuteWriteResponse,
            Pdu::HandleValueNotification { .. } => PduOpcode::HandleValueNotification,
            Pdu::HandleValueIndication { .. } => PduOpcode::HandleValueIndication,
            Pdu::HandleValueConfirmation => PduOpcode::HandleValueConfirmation,
            Pdu::Unsupported { .. } => return None,
        })
    }

    pub fn raw_opcode(&self) -> u8 {
        match (self, self.opcode()) {
            (Pdu::Unsupported { opcode }, _) => *opcode,
            (_, Some(opcode)) => opcode.as_raw(),
            (_, None) => 0,
        }
    }

    /// Create an *Error Response* to a request
    pub fn error_response(request_opcode: u8, handle: u16, error: Error) -> Self {
        Pdu::ErrorResponse {
            request_opcode,
            handle,
            error,
        }
    }

    /// Decode a PDU
    pub fn try_from_bytes(raw: &[u8]) -> Result<Self, TransferFormatError> {
        let (&raw_opcode, p) = raw
            .split_first()
            .ok_or_else(|| TransferFormatError::from("Pdu with length of zero received"))?;

        let opcode = match PduOpcode::try_from(raw_opcode) {
            Ok(opcode) => opcode,
            Err(opcode) => return Ok(Pdu::Unsupported { opcode }),
        };

        let pdu = match opcode {
            PduOpcode::ErrorResponse => {
                if p.len() != 4 {
                    return Err(TransferFormatError::bad_size("ErrorResponse", 4, p.len()));
                }

                Pdu::ErrorResponse {
                    request_opcode: p[0],
                    handle: u16::from_le_bytes([p[1], p[2]]),
                    error: Error::from_raw(p[3]),
                }
            }
            PduOpcode::ExchangeMtuRequest => Pdu::ExchangeMtuRequest(TransferFormatTryFrom::try_from(p)?),
            PduOpcode::ExchangeMtuResponse => Pdu::ExchangeMtuResponse(TransferFormatTryFrom::try_from(p)?),
            PduOpcode::FindInformationRequest => {
                Pdu::FindInformationRequest(TransferFormatTryFrom::try_from(p)?)
            }
            PduOpcode::FindInformationResponse => {
                let (&format, list) = p
                    .split_first()
                    .ok_or_else(|| TransferFormatError::bad_min_size("FindInformationResponse", 1, 0))?;

                let uuid_len = match format {
                    0x01 => 2,
                    0x02 => 16,
                    _ => return Err(format!("Invalid information data format {:#x}", format).into()),
                };

                if list.len() % (2 + uuid_len) != 0 {
                    return Err(TransferFormatError::bad_exact_chunks(
                        "FindInformationResponse",
                        2 + uuid_len,
                        list.len(),
                    ));
                }

                Pdu::FindInformationResponse(
                    list.chunks_exact(2 + uuid_len)
                        .map(|c| {
                            Ok(HandleWithType {
                                handle: u16::from_le_bytes([c[0], c[1]]),
                                uuid: TransferFormatTryFrom::try_from(&c[2..])?,
                            })
                        })
                        .collect::<Result<_, TransferFormatError>>()?,
                )
            }
            PduOpcode::FindByTypeValueRequest => {
                if p.len() < 6 {
                    return Err(TransferFormatError::bad_min_size("FindByTypeValueRequest", 6, p.len()));
                }

                Pdu::FindByTypeValueRequest {
                    range: TransferFormatTryFrom::try_from(&p[..4])?,
                    attribute_type: u16::from_le_bytes([p[4], p[5]]),
                    value: p[6..].to_vec(),
                }
            }
            PduOpcode::FindByTypeValueResponse => {
                if p.len() % 4 != 0 {
                    return Err(TransferFormatError::bad_exact_chunks("FindByTypeValueResponse", 4, p.len()));
                }

                Pdu::FindByTypeValueResponse(
                    p.chunks_exact(4)
                        .map(|c| TypeValueResponse {
                            handle: u16::from_le_bytes([c[0], c[1]]),
                            group_end_handle: u16::from_le_bytes([c[2], c[3]]),
                        })
                        .collect(),
                )
            }
            PduOpcode::ReadByTypeRequest => {
                if p.len() < 4 {
                    return Err(TransferFormatError::bad_min_size("ReadByTypeRequest", 4, p.len()));
                }

                Pdu::ReadByTypeRequest {
                    range: TransferFormatTryFrom::try_from(&p[..4])?,
                    attribute_type: TransferFormatTryFrom::try_from(&p[4..])?,
                }
            }
            PduOpcode::ReadByTypeResponse => {
                let (&len, list) = p
                    .split_first()
                    .ok_or_else(|| TransferFormatError::bad_min_size("ReadByTypeResponse", 1, 0))?;

                let len = usize::from(len);

                if len < 2 || list.len() % len != 0 {
                    return Err(TransferFormatError::bad_exact_chunks("ReadByTypeResponse", len, list.len()));
                }

                Pdu::ReadByTypeResponse(
                    list.chunks_exact(len)
                        .map(|c| ReadTypeData {
                            handle: u16::from_le_bytes([c[0], c[1]]),
                            value: c[2..].to_vec(),
                        })
                        .collect(),
                )
            }
            PduOpcode::ReadRequest => Pdu::ReadRequest(TransferFormatTryFrom::try_from(p)?),
            PduOpcode::ReadResponse => Pdu::ReadResponse(p.to_vec()),
            PduOpcode::ReadBlobRequest => {
                if p.len() != 4 {
                    return Err(TransferFormatError::bad_size("ReadBlobRequest", 4, p.len()));
                }

                Pdu::ReadBlobRequest {
                    handle: u16::from_le_bytes([p[0], p[1]]),
                    offset: u16::from_le_bytes([p[2], p[3]]),
                }
            }
            PduOpcode::ReadBlobResponse => Pdu::ReadBlobResponse(p.to_vec()),
            PduOpcode::ReadMultipleRequest => {
                let handles: Vec<u16> = TransferFormatTryFrom::try_from(p)?;

                if handles.len() < 2 {
                    return Err(TransferFormatError::bad_min_size("ReadMultipleRequest", 4, p.len()));
                }

                Pdu::ReadMultipleRequest(handles)
            }
            PduOpcode::ReadMultipleResponse => Pdu::ReadMultipleResponse(p.to_vec()),
            PduOpcode::ReadByGroupTypeRequest => {
                if p.len() < 4 {
                    return Err(TransferFormatError::bad_min_size("ReadByGroupTypeRequest", 4, p.len()));
                }

                Pdu::ReadByGroupTypeRequest {
                    range: TransferFormatTryFrom::try_from(&p[..4])?,
                    group_type: TransferFormatTryFrom::try_from(&p[4..])?,
                }
            }
            PduOpcode::ReadByGroupTypeResponse => {
                let (&len, list) = p
                    .split_first()
                    .ok_or_else(|| TransferFormatError::bad_min_size("ReadByGroupTypeResponse", 1, 0))?;

                let len = usize::from(len);

                if len < 4 || list.len() % len != 0 {
                    return Err(TransferFormatError::bad_exact_chunks(
                        "ReadByGroupTypeResponse",
                        len,
                        list.len(),
                    ));
                }

                Pdu::ReadByGroupTypeResponse(
                    list.chunks_exact(len)
                        .map(|c| ReadGroupTypeData {
                            handle: u16::from_le_bytes([c[0], c[1]]),
                            end_group_handle: u16::from_le_bytes([c[2], c[3]]),
                            value: c[4..].to_vec(),
                        })
                        .collect(),
                )
            }
            PduOpcode::WriteRequest => {
                let (handle, value) = handle_and_value("WriteRequest", p)?;

                Pdu::WriteRequest { handle, value }
            }
            PduOpcode::WriteResponse => Pdu::WriteResponse,
            PduOpcode::WriteCommand => {
                let (handle, value) = handle_and_value("WriteCommand", p)?;

                Pdu::WriteCommand { handle, value }
            }
            PduOpcode::PrepareWriteRequest => {
                let (handle, offset, value) = handle_offset_and_value("PrepareWriteRequest", p)?;

                Pdu::PrepareWriteRequest { handle, offset, value }
            }
            PduOpcode::PrepareWriteResponse => {
                let (handle, offset, value) = handle_offset_and_value("PrepareWriteResponse", p)?;

                Pdu::PrepareWriteResponse { handle, offset, value }
            }
            PduOpcode::ExecuteWriteRequest => match <u8 as TransferFormatTryFrom>::try_from(p)? {
                0x00 => Pdu::ExecuteWriteRequest { execute: false },
                0x01 => Pdu::ExecuteWriteRequest { execute: true },
                flags => return Err(format!("Invalid execute write flags {:#x}", flags).into()),
            },
            PduOpcode::ExecuteWriteResponse => Pdu::ExecuteWriteResponse,
            PduOpcode::HandleValueNotification => {
                let (handle, value) = handle_and_value("HandleValueNotification", p)?;

                Pdu::HandleValueNotification { handle, value }
            }
            PduOpcode::HandleValueIndication => {
                let (handle, value) = handle_and_value("HandleValueIndication", p)?;

                Pdu::HandleValueIndication { handle, value }
            }
            PduOpcode::HandleValueConfirmation => Pdu::HandleValueConfirmation,
        };

        Ok(pdu)
    }
}

impl TransferFormatInto for Pdu {
    fn len_of_into(&self) -> usize {
        let parameter = match self {
            Pdu::ErrorResponse { .. } => 4,
            Pdu::ExchangeMtuRequest(_) | Pdu::ExchangeMtuResponse(_) | Pdu::ReadRequest(_) => 2,
            Pdu::FindInformationRequest(_) => 4,
            Pdu::FindInformationResponse(list) => 1 + list.iter().map(|e| 2 + e.uuid.att_len()).sum::<usize>(),
            Pdu::FindByTypeValueRequest { value, .. } => 6 + value.len(),
            Pdu::FindByTypeValueResponse(list) => list.len() * 4,
            Pdu::ReadByTypeRequest { attribute_type: uuid, .. }
            | Pdu::ReadByGroupTypeRequest { group_type: uuid, .. } => 4 + uuid.att_len(),
            Pdu::ReadByTypeResponse(list) => 1 + list.iter().map(|e| 2 + e.value.len()).sum::<usize>(),
            Pdu::ReadResponse(v) | Pdu::ReadBlobResponse(v) | Pdu::ReadMultipleResponse(v) => v.len(),
            Pdu::ReadBlobRequest { .. } => 4,
            Pdu::ReadMultipleRequest(handles) => handles.len_of_into(),
            Pdu::ReadByGroupTypeResponse(list) => 1 + list.iter().map(|e| 4 + e.value.len()).sum::<usize>(),
            Pdu::WriteRequest { value, .. }
            | Pdu::WriteCommand { value, .. }
            | Pdu::HandleValueNotification { value, .. }
            | Pdu::HandleValueIndication { value, .. } => 2 + value.len(),
            Pdu::PrepareWriteRequest { value, .. } | Pdu::PrepareWriteResponse { value, .. } => 4 + value.len(),
            Pdu::ExecuteWriteRequest { .. } => 1,
            Pdu::WriteResponse
            | Pdu::ExecuteWriteResponse
            | Pdu::HandleValueConfirmation
            | Pdu::Unsupported { .. } => 0,
        };

        1 + parameter
    }

    fn build_into(&self, into: &mut Vec<u8>) {
        into.push(self.raw_opcode());

        match self {
            Pdu::ErrorResponse {
                request_opcode,
                handle,
                error,
            } => {
                into.push(*request_opcode);
                handle.build_into(into);
                into.push(error.get_raw());
            }
            Pdu::ExchangeMtuRequest(mtu) | Pdu::ExchangeMtuResponse(mtu) => mtu.build_into(into),
            Pdu::FindInformationRequest(range) => range.build_into(into),
            Pdu::FindInformationResponse(list) => {
                // every entry of the list has the same UUID size
                let format = match list.first().map(|e| e.uuid.att_len()) {
                    Some(16) => 0x02,
                    _ => 0x01,
                };

                into.push(format);

                list.iter().for_each(|e| {
                    e.handle.build_into(into);
                    e.uuid.build_into(into);
                })
            }
            Pdu::FindByTypeValueRequest {
                range,
                attribute_type,
                value,
            } => {
                range.build_into(into);
                attribute_type.build_into(into);
                into.extend_from_slice(value);
            }
            Pdu::FindByTypeValueResponse(list) => list.iter().for_each(|e| {
                e.handle.build_into(into);
                e.group_end_handle.build_into(into);
            }),
            Pdu::ReadByTypeRequest {
                range,
                attribute_type: uuid,
            }
            | Pdu::ReadByGroupTypeRequest { range, group_type: uuid } => {
                range.build_into(into);
                uuid.build_into(into);
            }
            Pdu::ReadByTypeResponse(list) => {
                into.push(list.first().map(|e| 2 + e.value.len() as u8).unwrap_or(2));

                list.iter().for_each(|e| {
                    e.handle.build_into(into);
                    into.extend_from_slice(&e.value);
                })
            }
            Pdu::ReadRequest(handle) => handle.build_into(into),
            Pdu::ReadResponse(v) | Pdu::ReadBlobResponse(v) | Pdu::ReadMultipleResponse(v) => {
                into.extend_from_slice(v)
            }
            Pdu::ReadBlobRequest { handle, offset } => {
                handle.build_into(into);
                offset.build_into(into);
            }
            Pdu::ReadMultipleRequest(handles) => handles.build_into(into),
            Pdu::ReadByGroupTypeResponse(list) => {
                into.push(list.first().map(|e| 4 + e.value.len() as u8).unwrap_or(4));

                list.iter().for_each(|e| {
                    e.handle.build_into(into);
                    e.end_group_handle.build_into(into);
                    into.extend_from_slice(&e.value);
                })
            }
            Pdu::WriteRequest { handle, value }
            | Pdu::WriteCommand { handle, value }
            | Pdu::HandleValueNotification { handle, value }
            | Pdu::HandleValueIndication { handle, value } => {
                handle.build_into(into);
                into.extend_from_slice(value);
            }
            Pdu::PrepareWriteRequest { handle, offset, value }
            | Pdu::PrepareWriteResponse { handle, offset, value } => {
                handle.build_into(into);
                offset.build_into(into);
                into.extend_from_slice(value);
            }
            Pdu::ExecuteWriteRequest { execute } => into.push(if *execute { 0x01 } else { 0x00 }),
            Pdu::WriteResponse
            | Pdu::ExecuteWriteResponse
            | Pdu::HandleValueConfirmation
            | Pdu::Unsupported { .. } => (),
        }
    }
}
