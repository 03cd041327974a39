//! Host Controller Interface Events
//!
//! An event packet received from the controller is decoded exactly once, when it enters the host,
//! into an [`Event`]. Everything above the transport matches on the decoded variant instead of
//! looking at event codes.

use super::error::Error;
use super::opcodes::Opcode;
use super::ConnectionHandle;
use core::convert::TryFrom;
use core::fmt::{self, Display, Formatter};

/// Event decoding errors
#[derive(Clone, PartialEq, Eq)]
pub enum EventError {
    /// The event packet is shorter than its header or its parameters
    TooShort { name: &'static str },
    /// The parameter length field does not match the packet
    LengthMismatch { expected: usize, received: usize },
    /// An invalid connection handle was contained in an event
    InvalidHandle(u16),
    /// A field has a value that is not valid for the event
    InvalidField { name: &'static str, value: u8 },
}

impl Display for EventError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            EventError::TooShort { name } => write!(f, "event {} is too short", name),
            EventError::LengthMismatch { expected, received } => write!(
                f,
                "event parameter length field is {} but {} bytes were received",
                expected, received
            ),
            EventError::InvalidHandle(raw) => write!(f, "invalid connection handle {:#x}", raw),
            EventError::InvalidField { name, value } => write!(f, "invalid value {:#x} for field {}", value, name),
        }
    }
}

impl fmt::Debug for EventError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}

struct RawData<'a> {
    raw_data: &'a [u8],
}

impl<'a> From<&'a [u8]> for RawData<'a> {
    fn from(raw_data: &'a [u8]) -> Self {
        Self { raw_data }
    }
}

/// Implement `TryFrom<RawData>` for an event parameter type
///
/// `$param` is bound to the raw parameter bytes within `$inner`.
macro_rules! impl_try_from_for_raw_packet {
    ( $name:ident, $param:ident, $inner:block ) => {
        impl TryFrom<RawData<'_>> for $name {
            type Error = EventError;

            #[allow(unused_assignments)]
            fn try_from(raw: RawData<'_>) -> Result<Self, Self::Error> {
                const NAME: &'static str = stringify!($name);

                let mut $param = raw.raw_data;

                $inner
            }
        }
    };
}

/// "chews-off" `$size` bytes from the front of `$packet`
///
/// Invoking this with only the packet returns a `u8`, otherwise a slice is returned. The enclosing
/// function returns `EventError::TooShort` if the packet does not contain enough bytes.
macro_rules! chew {
    ( $packet:ident, $size:expr ) => {{
        if $packet.len() < $size {
            return Err(EventError::TooShort { name: NAME });
        }

        let (chewed, rest) = $packet.split_at($size);

        $packet = rest;

        chewed
    }};
    ( $packet:ident ) => {
        chew!($packet, 1)[0]
    };
}

macro_rules! chew_u16 {
    ( $packet:ident ) => {{
        let bytes = chew!($packet, 2);

        u16::from_le_bytes([bytes[0], bytes[1]])
    }};
}

macro_rules! chew_handle {
    ( $packet:ident ) => {{
        let raw = chew_u16!($packet) & 0x0FFF;

        ConnectionHandle::try_from(raw).map_err(|_| EventError::InvalidHandle(raw))?
    }};
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisconnectionCompleteData {
    pub status: Error,
    pub connection_handle: ConnectionHandle,
    pub reason: Error,
}

impl_try_from_for_raw_packet! {
    DisconnectionCompleteData,
    packet,
    {
        Ok(DisconnectionCompleteData {
            status: Error::from(chew!(packet)),
            connection_handle: chew_handle!(packet),
            reason: Error::from(chew!(packet)),
        })
    }
}

/// Command Complete event
///
/// `return_parameter` is everything after the opcode, for most commands the first byte of it
/// is the command's status.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandCompleteData {
    pub number_of_hci_command_packets: u8,
    pub command_opcode: Opcode,
    pub return_parameter: Vec<u8>,
}

impl_try_from_for_raw_packet! {
    CommandCompleteData,
    packet,
    {
        Ok(CommandCompleteData {
            number_of_hci_command_packets: chew!(packet),
            command_opcode: Opcode::from(chew_u16!(packet)),
            return_parameter: packet.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandStatusData {
    pub status: Error,
    pub number_of_hci_command_packets: u8,
    pub command_opcode: Opcode,
}

impl_try_from_for_raw_packet! {
    CommandStatusData,
    packet,
    {
        Ok(CommandStatusData {
            status: Error::from(chew!(packet)),
            number_of_hci_command_packets: chew!(packet),
            command_opcode: Opcode::from(chew_u16!(packet)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HardwareErrorData {
    pub hardware_code: u8,
}

impl_try_from_for_raw_packet! {
    HardwareErrorData,
    packet,
    {
        Ok(HardwareErrorData { hardware_code: chew!(packet) })
    }
}

/// The number of ACL packets the controller has finished with, per connection
#[derive(Debug, Clone, PartialEq)]
pub struct NumberOfCompletedPacketsData {
    pub completed: Vec<(ConnectionHandle, u16)>,
}

impl_try_from_for_raw_packet! {
    NumberOfCompletedPacketsData,
    packet,
    {
        let count = chew!(packet) as usize;

        let mut completed = Vec::with_capacity(count);

        for _ in 0..count {
            let handle = chew_handle!(packet);

            let packets = chew_u16!(packet);

            completed.push((handle, packets));
        }

        Ok(NumberOfCompletedPacketsData { completed })
    }
}

/// The role of the host within a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeRole {
    Central,
    Peripheral,
}

impl TryFrom<u8> for LeRole {
    type Error = EventError;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0x00 => Ok(LeRole::Central),
            0x01 => Ok(LeRole::Peripheral),
            value => Err(EventError::InvalidField { name: "role", value }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeConnectionCompleteData {
    pub status: Error,
    pub connection_handle: ConnectionHandle,
    pub role: LeRole,
    pub peer_address_type: u8,
    pub peer_address: [u8; 6],
    /// Connection interval, in units of 1.25ms
    pub connection_interval: u16,
    pub peripheral_latency: u16,
    /// Supervision timeout, in units of 10ms
    pub supervision_timeout: u16,
    pub central_clock_accuracy: u8,
}

impl_try_from_for_raw_packet! {
    LeConnectionCompleteData,
    packet,
    {
        let status = Error::from(chew!(packet));

        // A failed connection has no valid handle or role
        let connection_handle = if status == Error::NoError {
            chew_handle!(packet)
        } else {
            chew!(packet, 2);

            ConnectionHandle::MIN
        };

        let raw_role = chew!(packet);

        let role = if status == Error::NoError {
            LeRole::try_from(raw_role)?
        } else {
            LeRole::Central
        };

        Ok(LeConnectionCompleteData {
            status,
            connection_handle,
            role,
            peer_address_type: chew!(packet),
            peer_address: {
                let mut address = [0u8; 6];
                address.copy_from_slice(chew!(packet, 6));
                address
            },
            connection_interval: chew_u16!(packet),
            peripheral_latency: chew_u16!(packet),
            supervision_timeout: chew_u16!(packet),
            central_clock_accuracy: chew!(packet),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeConnectionUpdateCompleteData {
    pub status: Error,
    pub connection_handle: ConnectionHandle,
    pub connection_interval: u16,
    pub peripheral_latency: u16,
    pub supervision_timeout: u16,
}

impl_try_from_for_raw_packet! {
    LeConnectionUpdateCompleteData,
    packet,
    {
        Ok(LeConnectionUpdateCompleteData {
            status: Error::from(chew!(packet)),
            connection_handle: chew_handle!(packet),
            connection_interval: chew_u16!(packet),
            peripheral_latency: chew_u16!(packet),
            supervision_timeout: chew_u16!(packet),
        })
    }
}

/// LE Meta event sub events
#[derive(Debug, Clone, PartialEq)]
pub enum LeMetaData {
    ConnectionComplete(LeConnectionCompleteData),
    ConnectionUpdateComplete(LeConnectionUpdateCompleteData),
    Unknown { subevent_code: u8, parameter: Vec<u8> },
}

impl LeMetaData {
    const CONNECTION_COMPLETE: u8 = 0x01;
    const CONNECTION_UPDATE_COMPLETE: u8 = 0x03;
}

impl_try_from_for_raw_packet! {
    LeMetaData,
    packet,
    {
        let subevent_code = chew!(packet);

        match subevent_code {
            LeMetaData::CONNECTION_COMPLETE => Ok(LeMetaData::ConnectionComplete(
                LeConnectionCompleteData::try_from(RawData::from(packet))?,
            )),
            LeMetaData::CONNECTION_UPDATE_COMPLETE => Ok(LeMetaData::ConnectionUpdateComplete(
                LeConnectionUpdateCompleteData::try_from(RawData::from(packet))?,
            )),
            _ => Ok(LeMetaData::Unknown { subevent_code, parameter: packet.to_vec() }),
        }
    }
}

/// A decoded HCI event
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    DisconnectionComplete(DisconnectionCompleteData),
    CommandComplete(CommandCompleteData),
    CommandStatus(CommandStatusData),
    HardwareError(HardwareErrorData),
    NumberOfCompletedPackets(NumberOfCompletedPacketsData),
    LeMeta(LeMetaData),
    /// An event this host does not process
    Unknown { event_code: u8, parameter: Vec<u8> },
}

impl Event {
    pub const DISCONNECTION_COMPLETE: u8 = 0x05;
    pub const COMMAND_COMPLETE: u8 = 0x0E;
    pub const COMMAND_STATUS: u8 = 0x0F;
    pub const HARDWARE_ERROR: u8 = 0x10;
    pub const NUMBER_OF_COMPLETED_PACKETS: u8 = 0x13;
    pub const LE_META: u8 = 0x3E;

    /// Decode an event packet
    ///
    /// The packet is the event code, the parameter length, and the parameters.
    pub fn try_from_packet(packet: &[u8]) -> Result<Self, EventError> {
        if packet.len() < 2 {
            return Err(EventError::TooShort { name: "header" });
        }

        let event_code = packet[0];

        let len = packet[1] as usize;

        let parameter = &packet[2..];

        if parameter.len() != len {
            return Err(EventError::LengthMismatch {
                expected: len,
                received: parameter.len(),
            });
        }

        let raw = RawData::from(parameter);

        Ok(match event_code {
            Self::DISCONNECTION_COMPLETE => Event::DisconnectionComplete(TryFrom::try_from(raw)?),
            Self::COMMAND_COMPLETE => Event::CommandComplete(TryFrom::try_from(raw)?),
            Self::COMMAND_STATUS => Event::CommandStatus(TryFrom::try_from(raw)?),
            Self::HARDWARE_ERROR => Event::HardwareError(TryFrom::try_from(raw)?),
            Self::NUMBER_OF_COMPLETED_PACKETS => Event::NumberOfCompletedPackets(TryFrom::try_from(raw)?),
            Self::LE_META => Event::LeMeta(TryFrom::try_from(raw)?),
            _ => Event::Unknown {
                event_code,
                parameter: parameter.to_vec(),
            },
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn command_complete() {
        let packet = [0x0E, 0x04, 0x01, 0x03, 0x0C, 0x00];

        let expected = Event::CommandComplete(CommandCompleteData {
            number_of_hci_command_packets: 1,
            command_opcode: Opcode::RESET,
            return_parameter: vec![0x00],
        });

        assert_eq!(Ok(expected), Event::try_from_packet(&packet));
    }

    #[test]
    fn le_connection_complete() {
        let packet = [
            0x3E, 0x13, 0x01, 0x00, 0x05, 0x00, 0x01, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x18, 0x00, 0x00, 0x00,
            0xC8, 0x00, 0x01,
        ];

        match Event::try_from_packet(&packet) {
            Ok(Event::LeMeta(LeMetaData::ConnectionComplete(data))) => {
                assert_eq!(Error::NoError, data.status);
                assert_eq!(5, data.connection_handle.get_raw_handle());
                assert_eq!(LeRole::Peripheral, data.role);
                assert_eq!([0x11, 0x22, 0x33, 0x44, 0x55, 0x66], data.peer_address);
                assert_eq!(0x18, data.connection_interval);
                assert_eq!(0xC8, data.supervision_timeout);
            }
            other => panic!("unexpected decode {:?}", other),
        }
    }

    #[test]
    fn short_and_mismatched_packets() {
        assert_eq!(
            Err(EventError::LengthMismatch { expected: 4, received: 2 }),
            Event::try_from_packet(&[0x05, 0x04, 0x00, 0x05])
        );

        assert_eq!(
            Err(EventError::TooShort {
                name: "DisconnectionCompleteData"
            }),
            Event::try_from_packet(&[0x05, 0x02, 0x00, 0x05])
        );
    }

    #[test]
    fn number_of_completed_packets() {
        let packet = [0x13, 0x09, 0x02, 0x05, 0x00, 0x02, 0x00, 0x06, 0x00, 0x01, 0x00];

        let expected = vec![
            (ConnectionHandle::try_from(5).unwrap(), 2),
            (ConnectionHandle::try_from(6).unwrap(), 1),
        ];

        match Event::try_from_packet(&packet) {
            Ok(Event::NumberOfCompletedPackets(data)) => assert_eq!(expected, data.completed),
            other => panic!("unexpected decode {:?}", other),
        }
    }

    #[test]
    fn unknown_event_is_kept() {
        assert_eq!(
            Ok(Event::Unknown {
                event_code: 0xFF,
                parameter: vec![1, 2]
            }),
            Event::try_from_packet(&[0xFF, 0x02, 1, 2])
        );
    }
}
