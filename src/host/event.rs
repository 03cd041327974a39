//! Events reported to the application

use crate::conn::{ConnectionTiming, PeerAddress};
use crate::hci::events::{Event, LeRole};
use crate::hci::{self, ConnectionHandle};
use crate::l2cap::AclDataError;

/// Something that happened that the application did not ask for
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Connected {
        handle: ConnectionHandle,
        role: LeRole,
        peer: PeerAddress,
    },
    Disconnected {
        handle: ConnectionHandle,
        reason: hci::error::Error,
    },
    /// A notification sent by the server of the peer
    Notification {
        handle: ConnectionHandle,
        attribute: u16,
        value: Vec<u8>,
    },
    /// An indication sent by the server of the peer, it was confirmed
    Indication {
        handle: ConnectionHandle,
        attribute: u16,
        value: Vec<u8>,
    },
    /// The client of the peer wrote to an attribute of the local server
    AttributeWritten {
        handle: ConnectionHandle,
        attribute: u16,
    },
    MtuExchanged {
        handle: ConnectionHandle,
        mtu: u16,
    },
    ConnectionParametersUpdated {
        handle: ConnectionHandle,
        timing: ConnectionTiming,
    },
    /// A received L2CAP PDU was dropped
    MalformedPdu {
        handle: Option<ConnectionHandle>,
        error: AclDataError,
    },
    HardwareError {
        code: u8,
    },
    /// The controller stopped answering commands
    ControllerTimeout,
    /// An event the host does not process
    Unhandled(Event),
}
