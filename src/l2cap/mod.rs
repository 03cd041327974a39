//! Logical Link Control and Adaption protocol (L2CAP)
//!
//! Only the LE-U logical link is supported. Every L2CAP PDU sent over the link is a *Basic* frame, a
//! 4 byte header (payload length and channel identifier) followed by the payload. A frame larger
//! than the controller's ACL data length is fragmented into multiple HCI ACL data packets, and the
//! fragments received from the controller are reassembled per connection by a [`Reassembler`].

pub mod signaling;

use crate::buffer::PacketChain;
use crate::hci::acl::{AclBroadcastFlag, AclHeader, AclPacketBoundary};
use crate::hci::{ConnectionHandle, ControllerSink, Transport};
use crate::Error;

/// The minimum MTU of a LE-U logical link
pub const LE_MIN_MTU: usize = 23;

/// Channel Identifier
///
/// Channel Identifiers are used by the L2CAP to associate the data with a given channel. These are
/// the channel identifiers of the LE-U name space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChannelIdentifier {
    /// Channel for the Attribute Protocol
    ///
    /// All GATT data is sent through this channel.
    AttributeProtocol,
    /// LE signaling channel
    LowEnergySignaling,
    /// Security Manager Protocol
    SecurityManagerProtocol,
    /// Dynamically allocated channel identifiers
    DynamicallyAllocated(u16),
}

impl ChannelIdentifier {
    pub const DYNAMIC_BOUNDS: core::ops::RangeInclusive<u16> = 0x0040..=0x007F;

    /// Convert to the numerical value
    pub fn to_val(&self) -> u16 {
        match self {
            ChannelIdentifier::AttributeProtocol => 0x4,
            ChannelIdentifier::LowEnergySignaling => 0x5,
            ChannelIdentifier::SecurityManagerProtocol => 0x6,
            ChannelIdentifier::DynamicallyAllocated(val) => *val,
        }
    }

    pub fn try_from_raw(val: u16) -> Result<Self, AclDataError> {
        match val {
            0x4 => Ok(ChannelIdentifier::AttributeProtocol),
            0x5 => Ok(ChannelIdentifier::LowEnergySignaling),
            0x6 => Ok(ChannelIdentifier::SecurityManagerProtocol),
            _ if Self::DYNAMIC_BOUNDS.contains(&val) => Ok(ChannelIdentifier::DynamicallyAllocated(val)),
            _ => Err(AclDataError::InvalidChannelId),
        }
    }
}

/// Acl Data Errors
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum AclDataError {
    /// Raw data is too small for an ACL frame
    RawDataTooSmall,
    /// Specified payload length didn't match the actual payload length
    PayloadLengthIncorrect,
    /// Invalid Channel Id
    InvalidChannelId,
    /// Expected a start fragment
    ExpectedStartFragment,
    /// The connection handle field is out of range
    InvalidConnectionHandle,
    /// The broadcast flag uses a reserved value
    InvalidBroadcastFlag,
    /// More bytes were received than the L2CAP length of the PDU
    ReassemblyOverflow,
}

impl core::fmt::Display for AclDataError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            AclDataError::RawDataTooSmall => write!(f, "Raw data is too small for an ACL frame"),
            AclDataError::PayloadLengthIncorrect => write!(
                f,
                "Specified payload length didn't match the actual payload length"
            ),
            AclDataError::InvalidChannelId => write!(f, "Invalid Channel Id"),
            AclDataError::ExpectedStartFragment => write!(
                f,
                "Expected start fragment, received a continuation fragment"
            ),
            AclDataError::InvalidConnectionHandle => write!(f, "Invalid connection handle"),
            AclDataError::InvalidBroadcastFlag => write!(f, "Invalid broadcast flag"),
            AclDataError::ReassemblyOverflow => write!(
                f,
                "Fragments contain more data than the length of the L2CAP PDU"
            ),
        }
    }
}

impl core::fmt::Debug for AclDataError {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::Display::fmt(self, f)
    }
}

/// The header of a basic L2CAP frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicHeader {
    pub length: u16,
    pub channel_id: ChannelIdentifier,
}

impl BasicHeader {
    pub const SIZE: usize = 4;

    pub fn to_bytes(&self) -> [u8; 4] {
        let mut bytes = [0u8; 4];

        bytes[..2].copy_from_slice(&self.length.to_le_bytes());

        bytes[2..].copy_from_slice(&self.channel_id.to_val().to_le_bytes());

        bytes
    }

    /// Pop the basic header off the front of a complete frame
    fn pop(frame: &mut PacketChain) -> Result<Self, Error> {
        let mut bytes = [0u8; 4];

        frame
            .copy_front(&mut bytes)
            .map_err(|_| AclDataError::RawDataTooSmall)?;

        let length = u16::from_le_bytes([bytes[0], bytes[1]]);

        let channel_id = ChannelIdentifier::try_from_raw(u16::from_le_bytes([bytes[2], bytes[3]]))?;

        frame.adjust_front(Self::SIZE)?;

        if usize::from(length) != frame.len() {
            return Err(AclDataError::PayloadLengthIncorrect.into());
        }

        Ok(BasicHeader { length, channel_id })
    }
}

/// A complete basic L2CAP frame with its header removed
#[derive(Debug)]
pub struct BasicFrame {
    pub channel_id: ChannelIdentifier,
    pub payload: PacketChain,
}

/// Fragment a L2CAP PDU into HCI ACL data packets
///
/// The basic header is pushed in front of `payload`, then the frame is cut into packets of at most
/// `max_fragment_len` bytes. Every packet has its HCI ACL header, the first is marked as a start
/// fragment and the rest as continuing fragments. Either every fragment is returned or none is.
pub fn fragment(
    handle: ConnectionHandle,
    channel_id: ChannelIdentifier,
    mut payload: PacketChain,
    max_fragment_len: usize,
) -> Result<Vec<PacketChain>, Error> {
    if max_fragment_len == 0 {
        return Err(Error::InvalidParameter("fragment length cannot be zero"));
    }

    let length = u16::try_from(payload.len())
        .map_err(|_| Error::InvalidParameter("L2CAP payload is larger than 65535 bytes"))?;

    payload.prepend(&BasicHeader { length, channel_id }.to_bytes())?;

    let mut fragments = Vec::with_capacity(payload.len() / max_fragment_len + 1);

    let mut remaining = payload;

    while remaining.len() > max_fragment_len {
        fragments.push(remaining.split_front(max_fragment_len)?);
    }

    fragments.push(remaining);

    for (i, fragment) in fragments.iter_mut().enumerate() {
        let packet_boundary_flag = if i == 0 {
            AclPacketBoundary::FirstNonFlushable
        } else {
            AclPacketBoundary::ContinuingFragment
        };

        let data_length = u16::try_from(fragment.len())
            .map_err(|_| Error::InvalidParameter("fragment length is larger than 65535 bytes"))?;

        let header = AclHeader {
            connection_handle: handle,
            packet_boundary_flag,
            broadcast_flag: AclBroadcastFlag::NoBroadcast,
            data_length,
        };

        header.push(fragment)?;
    }

    Ok(fragments)
}

/// Send a L2CAP PDU over a connection
///
/// The fragments of the PDU are handed to the transport in order. The transport holds them back
/// while the controller has no free ACL buffers.
pub fn send_pdu<S>(
    transport: &mut Transport,
    sink: &mut S,
    handle: ConnectionHandle,
    channel_id: ChannelIdentifier,
    payload: PacketChain,
) -> Result<(), Error>
where
    S: ControllerSink,
{
    let fragments = fragment(handle, channel_id, payload, transport.acl_max_data_len())?;

    log::trace!(
        "sending {} fragment(s) on channel {:?} of connection {}",
        fragments.len(),
        channel_id,
        handle
    );

    fragments
        .into_iter()
        .try_for_each(|fragment| transport.send_acl(sink, handle, fragment))
}

struct Partial {
    /// Unknown until the length field of the basic header is received
    total: Option<usize>,
    frame: PacketChain,
}

impl Partial {
    fn update_total(&mut self) {
        if self.total.is_none() {
            self.total = self
                .frame
                .read_u16(0)
                .ok()
                .map(|length| usize::from(length) + BasicHeader::SIZE);
        }
    }
}

/// Reassembly of received fragments
///
/// There is one `Reassembler` per connection. Fragments are appended to the frame under
/// reassembly without copying.
#[derive(Default)]
pub struct Reassembler {
    partial: Option<Partial>,
}

impl Reassembler {
    pub fn new() -> Self {
        Reassembler::default()
    }

    /// Check if a frame is partially received
    pub fn is_active(&self) -> bool {
        self.partial.is_some()
    }

    /// Process a received fragment
    ///
    /// `fragment` is the data of a HCI ACL packet with the HCI header already removed. A complete
    /// frame is returned once all of its fragments are received.
    ///
    /// # Error
    /// `MalformedPdu` if this is a continuing fragment and no frame is under reassembly, or the
    /// fragments do not add up to the length in the basic header. The frame under reassembly is
    /// discarded, the next start fragment begins a new frame.
    pub fn on_acl_fragment(
        &mut self,
        boundary: AclPacketBoundary,
        fragment: PacketChain,
    ) -> Result<Option<BasicFrame>, Error> {
        if boundary.is_start() {
            if let Some(stale) = self.partial.take() {
                log::warn!(
                    "start fragment received while {} bytes of a L2CAP PDU were reassembled, discarding them",
                    stale.frame.len(),
                );
            }

            self.partial = Some(Partial {
                total: None,
                frame: fragment,
            });
        } else {
            match self.partial.as_mut() {
                Some(partial) => partial.frame.concat(fragment),
                None => return Err(AclDataError::ExpectedStartFragment.into()),
            }
        }

        let mut partial = match self.partial.take() {
            Some(partial) => partial,
            None => return Ok(None),
        };

        partial.update_total();

        match partial.total {
            Some(total) if partial.frame.len() == total => {
                let mut frame = partial.frame;

                let header = BasicHeader::pop(&mut frame)?;

                Ok(Some(BasicFrame {
                    channel_id: header.channel_id,
                    payload: frame,
                }))
            }
            Some(total) if partial.frame.len() > total => {
                log::warn!(
                    "received {} bytes for a L2CAP PDU of {} bytes",
                    partial.frame.len(),
                    total
                );

                Err(AclDataError::ReassemblyOverflow.into())
            }
            _ => {
                self.partial = Some(partial);

                Ok(None)
            }
        }
    }

    /// Drop the frame under reassembly
    pub fn clear(&mut self) {
        self.partial = None;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::buffer::BufferPool;
    use quickcheck_macros::quickcheck;

    fn handle() -> ConnectionHandle {
        ConnectionHandle::try_from(5).unwrap()
    }

    /// Strip the ACL header off of a fragment the way the host does for received packets
    fn receive(reassembler: &mut Reassembler, mut fragment: PacketChain) -> Result<Option<BasicFrame>, Error> {
        let header = AclHeader::pop(&mut fragment)?;

        reassembler.on_acl_fragment(header.packet_boundary_flag, fragment)
    }

    #[test]
    fn fragment_flags_and_sizes() {
        let pool = BufferPool::new(16, 32, 8);

        let payload = pool.allocate_with(&(0..40).collect::<Vec<u8>>()).unwrap();

        let fragments = fragment(handle(), ChannelIdentifier::AttributeProtocol, payload, 27).unwrap();

        assert_eq!(2, fragments.len());

        let first = fragments[0].to_vec();
        let second = fragments[1].to_vec();

        assert_eq!(&[0x05, 0x00, 27, 0, 40, 0, 0x04, 0x00], &first[..8]);
        assert_eq!(&[0x05, 0x10, 17, 0], &second[..4]);
        assert_eq!(4 + 27, first.len());
        assert_eq!(4 + 17, second.len());
    }

    #[test]
    fn continuation_without_start() {
        let pool = BufferPool::new(32, 4, 8);

        let mut reassembler = Reassembler::new();

        let fragment = pool.allocate_with(&[1, 2, 3]).unwrap();

        assert_eq!(
            Err(Error::MalformedPdu(AclDataError::ExpectedStartFragment)),
            reassembler
                .on_acl_fragment(AclPacketBoundary::ContinuingFragment, fragment)
                .map(|_| ())
        );
        assert_eq!(0, pool.in_use());
    }

    #[test]
    fn overflow_is_discarded() {
        let pool = BufferPool::new(32, 4, 8);

        let mut reassembler = Reassembler::new();

        let start = pool.allocate_with(&[3, 0, 4, 0, 1]).unwrap();
        let too_long = pool.allocate_with(&[2, 3, 4]).unwrap();

        assert!(reassembler
            .on_acl_fragment(AclPacketBoundary::FirstAutoFlushable, start)
            .unwrap()
            .is_none());

        assert_eq!(
            Err(Error::MalformedPdu(AclDataError::ReassemblyOverflow)),
            reassembler
                .on_acl_fragment(AclPacketBoundary::ContinuingFragment, too_long)
                .map(|_| ())
        );
        assert!(!reassembler.is_active());
        assert_eq!(0, pool.in_use());
    }

    #[test]
    fn new_start_replaces_stale_frame() {
        let pool = BufferPool::new(32, 8, 8);

        let mut reassembler = Reassembler::new();

        let stale = pool.allocate_with(&[10, 0, 4, 0, 1, 2]).unwrap();
        let fresh = pool.allocate_with(&[2, 0, 4, 0, 7, 8]).unwrap();

        assert!(reassembler
            .on_acl_fragment(AclPacketBoundary::FirstNonFlushable, stale)
            .unwrap()
            .is_none());

        let frame = reassembler
            .on_acl_fragment(AclPacketBoundary::FirstNonFlushable, fresh)
            .unwrap()
            .unwrap();

        assert_eq!(ChannelIdentifier::AttributeProtocol, frame.channel_id);
        assert_eq!(vec![7, 8], frame.payload.to_vec());
    }

    #[quickcheck]
    fn reassembly_round_trip(payload: Vec<u8>, fragment_len: u8) -> bool {
        let max_fragment_len = usize::from(fragment_len).max(1);

        let payload = &payload[..payload.len().min(512)];

        let pool = BufferPool::new(32, 1024, 8);

        let chain = pool.allocate_with(payload).unwrap();

        let fragments = fragment(handle(), ChannelIdentifier::AttributeProtocol, chain, max_fragment_len).unwrap();

        let count = fragments.len();

        let mut reassembler = Reassembler::new();

        let mut received = None;

        for (i, fragment) in fragments.into_iter().enumerate() {
            match receive(&mut reassembler, fragment).unwrap() {
                Some(frame) if i + 1 == count => received = Some(frame),
                Some(_) => return false,
                None => (),
            }
        }

        let same = match received {
            Some(frame) => frame.payload.to_vec() == payload && frame.payload.len() == payload.len(),
            None => false,
        };

        same && pool.in_use() == 0
    }
}
