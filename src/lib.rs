//! A Bluetooth Low Energy Host
//!
//! ble-host implements the host side of a Bluetooth LE stack, from the Host Controller Interface
//! up to the Generic Attribute Profile. The controller is reached through a
//! [`ControllerSink`](hci::ControllerSink) for packets sent to it and a [`HostSender`] for packets
//! received from it, how the packets travel (UART, USB, a shared memory ring) is left to the
//! application.
//!
//! The layers, from the bottom up:
//!
//! * [`buffer`], a fixed pool of packet buffers shared by every layer
//! * [`hci`], the command and ACL data flow control with the controller
//! * [`l2cap`], fragmentation and reassembly of PDUs, and the LE signaling channel
//! * [`att`], the attribute protocol client and server
//! * [`gatt`], the discovery, read, and write procedures, and notifications and indications
//! * [`conn`], the connections and the state kept for each of them
//! * [`host`], the [`Host`] tying them together
//!
//! ```
//! # use ble_host::{Host, HostConfig};
//! # use ble_host::buffer::PacketChain;
//! # use ble_host::hci::ControllerSink;
//! # struct Uart;
//! # impl ControllerSink for Uart {
//! #     type Error = std::io::Error;
//! #     fn send_command(&mut self, _: PacketChain) -> Result<(), Self::Error> { Ok(()) }
//! #     fn send_acl(&mut self, _: PacketChain) -> Result<(), Self::Error> { Ok(()) }
//! # }
//! let mut host = Host::new(HostConfig::default(), Uart).unwrap();
//!
//! let sender = host.sender();
//!
//! // a Hardware Error event, as read from the controller
//! sender.send_event(&[0x10, 0x01, 0x03]).unwrap();
//!
//! host.process(std::time::Instant::now()).unwrap();
//!
//! assert_eq!(Some(ble_host::HostEvent::HardwareError { code: 3 }), host.next_event());
//! ```

pub mod att;
pub mod buffer;
pub mod config;
pub mod conn;
pub mod diag;
mod error;
pub mod gatt;
pub mod hci;
pub mod host;
pub mod l2cap;
mod pending;
mod uuid;

pub use config::HostConfig;
pub use error::Error;
pub use host::{Host, HostEvent, HostSender};
pub use pending::Pending;
pub use uuid::Uuid;
