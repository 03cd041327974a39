//! HCI ACL data packet header
//!
//! An ACL data packet is a 4 byte header followed by the payload. The header contains the
//! connection handle (12 bits), the packet boundary flag (2 bits), the broadcast flag (2 bits), and
//! the length of the payload. The header is pushed onto and popped off the front of a
//! [`PacketChain`] so the payload is never moved.
//!
//! # LE-U Logical Link
//! For a LE-U logical link the packet boundary flag is either `FirstNonFlushable` or
//! `ContinuingFragment` when sent by the host, and the broadcast flag is always `NoBroadcast`.
//! Controllers may still use `FirstAutoFlushable` for start fragments sent to the host.

use super::ConnectionHandle;
use crate::buffer::PacketChain;
use crate::l2cap::AclDataError;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclPacketBoundary {
    FirstNonFlushable,
    ContinuingFragment,
    FirstAutoFlushable,
    CompleteL2capPdu,
}

impl AclPacketBoundary {
    /// Get the value shifted into the place of the packet boundary flag
    fn get_shifted_val(&self) -> u16 {
        (match self {
            AclPacketBoundary::FirstNonFlushable => 0x0,
            AclPacketBoundary::ContinuingFragment => 0x1,
            AclPacketBoundary::FirstAutoFlushable => 0x2,
            AclPacketBoundary::CompleteL2capPdu => 0x3,
        }) << 12
    }

    /// Get the flag from the first 16 bits of the header (in host byte order)
    fn from_shifted_val(val: u16) -> Self {
        match (val >> 12) & 3 {
            0x0 => AclPacketBoundary::FirstNonFlushable,
            0x1 => AclPacketBoundary::ContinuingFragment,
            0x2 => AclPacketBoundary::FirstAutoFlushable,
            _ => AclPacketBoundary::CompleteL2capPdu,
        }
    }

    /// Check if this flag starts a new L2CAP PDU
    pub fn is_start(&self) -> bool {
        !matches!(self, AclPacketBoundary::ContinuingFragment)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclBroadcastFlag {
    /// Point-to-point message
    NoBroadcast,
    /// Broadcast to all active peripherals
    ActivePeripheralBroadcast,
}

impl AclBroadcastFlag {
    fn get_shifted_val(&self) -> u16 {
        (match self {
            AclBroadcastFlag::NoBroadcast => 0x0,
            AclBroadcastFlag::ActivePeripheralBroadcast => 0x1,
        }) << 14
    }

    fn try_from_shifted_val(val: u16) -> Result<Self, AclDataError> {
        match (val >> 14) & 3 {
            0x0 => Ok(AclBroadcastFlag::NoBroadcast),
            0x1 => Ok(AclBroadcastFlag::ActivePeripheralBroadcast),
            _ => Err(AclDataError::InvalidBroadcastFlag),
        }
    }
}

/// The header of a HCI ACL data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclHeader {
    pub connection_handle: ConnectionHandle,
    pub packet_boundary_flag: AclPacketBoundary,
    pub broadcast_flag: AclBroadcastFlag,
    pub data_length: u16,
}

impl AclHeader {
    /// The size of the header of a HCI ACL data packet
    pub const SIZE: usize = 4;

    pub fn to_bytes(&self) -> [u8; 4] {
        let first_2_bytes = self.connection_handle.get_raw_handle()
            | self.packet_boundary_flag.get_shifted_val()
            | self.broadcast_flag.get_shifted_val();

        let mut bytes = [0u8; 4];

        bytes[..2].copy_from_slice(&first_2_bytes.to_le_bytes());

        bytes[2..].copy_from_slice(&self.data_length.to_le_bytes());

        bytes
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Result<Self, AclDataError> {
        let first_2_bytes = u16::from_le_bytes([bytes[0], bytes[1]]);

        let connection_handle = ConnectionHandle::try_from(first_2_bytes & 0xFFF)
            .map_err(|_| AclDataError::InvalidConnectionHandle)?;

        Ok(AclHeader {
            connection_handle,
            packet_boundary_flag: AclPacketBoundary::from_shifted_val(first_2_bytes),
            broadcast_flag: AclBroadcastFlag::try_from_shifted_val(first_2_bytes)?,
            data_length: u16::from_le_bytes([bytes[2], bytes[3]]),
        })
    }

    /// Push this header onto the front of `packet`
    pub fn push(&self, packet: &mut PacketChain) -> Result<(), Error> {
        packet.prepend(&self.to_bytes())?;

        Ok(())
    }

    /// Pop the header off of the front of `packet`
    ///
    /// The length field of the header must match the number of bytes that remain in the packet.
    pub fn pop(packet: &mut PacketChain) -> Result<Self, Error> {
        let mut bytes = [0u8; 4];

        packet
            .copy_front(&mut bytes)
            .map_err(|_| AclDataError::RawDataTooSmall)?;

        let header = Self::from_bytes(bytes)?;

        packet.adjust_front(Self::SIZE)?;

        if usize::from(header.data_length) != packet.len() {
            return Err(AclDataError::PayloadLengthIncorrect.into());
        }

        Ok(header)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::BufferPool;

    #[test]
    fn header_layout() {
        let header = AclHeader {
            connection_handle: ConnectionHandle::try_from(0x0123).unwrap(),
            packet_boundary_flag: AclPacketBoundary::ContinuingFragment,
            broadcast_flag: AclBroadcastFlag::NoBroadcast,
            data_length: 27,
        };

        assert_eq!([0x23, 0x11, 27, 0], header.to_bytes());
        assert_eq!(Ok(header), AclHeader::from_bytes(header.to_bytes()));
    }

    #[test]
    fn push_then_pop() {
        let pool = BufferPool::new(32, 4, 8);

        let mut packet = pool.allocate_with(&[1, 2, 3]).unwrap();

        let header = AclHeader {
            connection_handle: ConnectionHandle::try_from(5).unwrap(),
            packet_boundary_flag: AclPacketBoundary::FirstNonFlushable,
            broadcast_flag: AclBroadcastFlag::NoBroadcast,
            data_length: 3,
        };

        header.push(&mut packet).unwrap();

        assert_eq!(7, packet.len());
        assert_eq!(Ok(header), AclHeader::pop(&mut packet));
        assert_eq!(vec![1, 2, 3], packet.to_vec());
    }

    #[test]
    fn bad_length_field() {
        let pool = BufferPool::new(32, 4, 0);

        let mut packet = pool.allocate_with(&[0x05, 0x00, 0x09, 0x00, 1, 2]).unwrap();

        assert_eq!(
            Err(Error::MalformedPdu(AclDataError::PayloadLengthIncorrect)),
            AclHeader::pop(&mut packet)
        );
    }
}
