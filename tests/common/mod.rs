//! A simulated link between two hosts
//!
//! Both controllers are played by the test. ACL data sent by one host is handed to the other host
//! as it was sent, and the sending host is told the packets completed right after.

#![allow(dead_code)]

use ble_host::att::server::AttributeTable;
use ble_host::buffer::PacketChain;
use ble_host::hci::events::LeRole;
use ble_host::hci::opcodes::Opcode;
use ble_host::hci::{ConnectionHandle, ControllerSink};
use ble_host::{Host, HostConfig, HostEvent};
use std::time::Instant;

pub const RAW_HANDLE: u16 = 5;

pub fn init_logger() {
    let _ = simplelog::TestLogger::init(simplelog::LevelFilter::Trace, simplelog::Config::default());
}

pub fn handle() -> ConnectionHandle {
    ConnectionHandle::try_from(RAW_HANDLE).unwrap()
}

/// A controller that keeps every packet sent to it
#[derive(Default)]
pub struct RecordingSink {
    pub commands: Vec<Vec<u8>>,
    pub acl: Vec<Vec<u8>>,
}

impl ControllerSink for RecordingSink {
    type Error = std::convert::Infallible;

    fn send_command(&mut self, packet: PacketChain) -> Result<(), Self::Error> {
        self.commands.push(packet.to_vec());

        Ok(())
    }

    fn send_acl(&mut self, packet: PacketChain) -> Result<(), Self::Error> {
        self.acl.push(packet.to_vec());

        Ok(())
    }
}

pub fn connection_complete(role: LeRole) -> Vec<u8> {
    let handle = RAW_HANDLE.to_le_bytes();

    let role = match role {
        LeRole::Central => 0,
        LeRole::Peripheral => 1,
    };

    vec![
        0x3E, 19, 0x01, 0x00, handle[0], handle[1], role, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x18, 0x00,
        0x00, 0x00, 0x48, 0x00, 0x00,
    ]
}

pub fn connection_update_complete(interval: u16, latency: u16, timeout: u16) -> Vec<u8> {
    let mut event = vec![0x3E, 10, 0x03, 0x00];

    event.extend_from_slice(&RAW_HANDLE.to_le_bytes());
    event.extend_from_slice(&interval.to_le_bytes());
    event.extend_from_slice(&latency.to_le_bytes());
    event.extend_from_slice(&timeout.to_le_bytes());

    event
}

pub fn disconnection_complete(reason: u8) -> Vec<u8> {
    let handle = RAW_HANDLE.to_le_bytes();

    vec![0x05, 4, 0x00, handle[0], handle[1], reason]
}

pub fn number_of_completed_packets(count: u16) -> Vec<u8> {
    let handle = RAW_HANDLE.to_le_bytes();

    let count = count.to_le_bytes();

    vec![0x13, 5, 1, handle[0], handle[1], count[0], count[1]]
}

pub fn command_complete(opcode: Opcode, status: u8) -> Vec<u8> {
    let raw = opcode.to_raw().to_le_bytes();

    vec![0x0E, 4, 1, raw[0], raw[1], status]
}

pub fn command_status(opcode: Opcode, status: u8) -> Vec<u8> {
    let raw = opcode.to_raw().to_le_bytes();

    vec![0x0F, 4, status, 1, raw[0], raw[1]]
}

pub fn events<S: ControllerSink>(host: &mut Host<S>) -> Vec<HostEvent> {
    std::iter::from_fn(|| host.next_event()).collect()
}

/// Hand the ACL data sent by `from` to `to`
fn forward(from: &mut Host<RecordingSink>, to: &mut Host<RecordingSink>, now: Instant) -> usize {
    let packets: Vec<Vec<u8>> = from.sink_mut().acl.drain(..).collect();

    for packet in packets.iter() {
        to.sender().send_acl(packet).unwrap();
    }

    if !packets.is_empty() {
        let completed = number_of_completed_packets(packets.len() as u16);

        from.sender().send_event(&completed).unwrap();
    }

    from.process(now).unwrap();
    to.process(now).unwrap();

    packets.len()
}

/// Two hosts with an established connection, `RAW_HANDLE` on both sides
pub struct Link {
    pub central: Host<RecordingSink>,
    pub peripheral: Host<RecordingSink>,
    pub now: Instant,
}

impl Link {
    /// Connect two hosts, the peripheral serves `table`
    ///
    /// The events of the connection (and of the MTU exchange that follows it) are discarded.
    pub fn new(table: AttributeTable) -> Self {
        Self::with_config(HostConfig::default(), table)
    }

    pub fn with_config(central_config: HostConfig, table: AttributeTable) -> Self {
        init_logger();

        let central = Host::new(central_config, RecordingSink::default()).unwrap();

        let mut peripheral = Host::new(HostConfig::default(), RecordingSink::default()).unwrap();

        peripheral.set_attribute_table(table);

        let mut link = Link {
            central,
            peripheral,
            now: Instant::now(),
        };

        link.central
            .sender()
            .send_event(&connection_complete(LeRole::Central))
            .unwrap();
        link.peripheral
            .sender()
            .send_event(&connection_complete(LeRole::Peripheral))
            .unwrap();

        link.pump();

        events(&mut link.central);
        events(&mut link.peripheral);

        link
    }

    /// Exchange ACL data until neither host has anything more to send
    pub fn pump(&mut self) {
        self.central.process(self.now).unwrap();
        self.peripheral.process(self.now).unwrap();

        while forward(&mut self.central, &mut self.peripheral, self.now)
            + forward(&mut self.peripheral, &mut self.central, self.now)
            != 0
        {}
    }
}
