//! The host
//!
//! [`Host`] ties the layers together. It owns the packet buffer pool, the HCI transport, the
//! connection manager, and the attribute table of the local GATT server. The host is cooperative,
//! nothing happens until [`process`](Host::process) is called. Every call drains the packets the
//! controller sent (in the order they were received), and then checks the timeouts of commands,
//! attribute transactions, and indications against the time passed to it.
//!
//! Packets from the controller are handed to the host through a [`HostSender`], which may be used
//! from any thread. Packets for the controller are handed to the [`ControllerSink`] of the host.
//!
//! ```text
//!  controller ──HostSender──▶ inbound queue ──process──▶ HCI ─▶ L2CAP ─▶ ATT / signaling
//!                                                                │
//!  controller ◀──ControllerSink── HCI transport ◀──── fragments ◀┘
//! ```
//!
//! Operations that need an answer from the controller or the peer return a
//! [`Pending`](crate::Pending) that resolves during a later call to `process`. Things the
//! application did not ask for are reported as [`HostEvent`]s.

mod event;

pub use event::HostEvent;

use crate::att::pdu::{Pdu, PduOpcode};
use crate::att::server::AttributeTable;
use crate::att::{TransferFormatInto, MIN_ATT_MTU};
use crate::buffer::{BufferPool, PacketChain};
use crate::config::HostConfig;
use crate::conn::{Connection, ConnectionManager, ConnectionState, ConnectionTiming, PeerAddress};
use crate::diag::{Counter, HostCounters};
use crate::gatt::characteristic::ClientConfiguration;
use crate::gatt::client::{
    Characteristic, Descriptor, DiscoverCharacteristics, DiscoverDescriptors, DiscoverPrimaryServices,
    ExchangeMtu, Procedure, Read, ReadMultiple, Service, Write,
};
use crate::gatt::server as gatt_server;
use crate::hci::acl::AclHeader;
use crate::hci::events::{
    DisconnectionCompleteData, Event, LeConnectionCompleteData, LeConnectionUpdateCompleteData, LeMetaData,
    LeRole,
};
use crate::hci::opcodes::Opcode;
use crate::hci::{self, CommandReturn, ConnectionHandle, ControllerSink, Transport};
use crate::l2cap::signaling::{ConnectionParameters, RejectReason, Signal};
use crate::l2cap::{self, BasicFrame, ChannelIdentifier};
use crate::pending::{self, Pending, Resolver};
use crate::{Error, Uuid};
use futures::channel::mpsc;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

/// Scan interval used while creating a connection, 60ms
const CONNECT_SCAN_INTERVAL: u16 = 0x0060;

/// Scan window used while creating a connection, 30ms
const CONNECT_SCAN_WINDOW: u16 = 0x0030;

enum Inbound {
    Event(PacketChain),
    Acl(PacketChain),
}

/// The receiving side of the controller transport
///
/// Every packet is copied into buffers of the host's pool before it is queued. A `HostSender` can
/// be cloned and sent to the thread reading from the controller.
#[derive(Clone)]
pub struct HostSender {
    sender: mpsc::UnboundedSender<Inbound>,
    pool: BufferPool,
}

impl HostSender {
    /// Queue a HCI event packet (event code, parameter length, and parameters)
    ///
    /// # Error
    /// * `OutOfBuffers` if the pool has no room for the packet
    /// * `Shutdown` if the host is shut down or dropped
    pub fn send_event(&self, packet: &[u8]) -> Result<(), Error> {
        let packet = self.pool.allocate_with(packet)?;

        self.send(Inbound::Event(packet))
    }

    /// Queue a HCI ACL data packet, including its HCI ACL header
    ///
    /// # Error
    /// * `OutOfBuffers` if the pool has no room for the packet
    /// * `Shutdown` if the host is shut down or dropped
    pub fn send_acl(&self, packet: &[u8]) -> Result<(), Error> {
        let packet = self.pool.allocate_with(packet)?;

        self.send(Inbound::Acl(packet))
    }

    fn send(&self, inbound: Inbound) -> Result<(), Error> {
        self.sender.unbounded_send(inbound).map_err(|_| Error::Shutdown)
    }
}

/// The ACL buffers of the controller
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferSize {
    pub acl_max_data_len: usize,
    pub acl_buffers: usize,
}

/// What to do once the outstanding command resolves
enum Followup {
    Connect,
    Disconnect(ConnectionHandle),
    ConnectionUpdate(ConnectionHandle),
    ReadBufferSize(Resolver<BufferSize>),
}

struct Command {
    pending: Pending<CommandReturn>,
    followup: Followup,
}

struct Controller<S> {
    pool: BufferPool,
    transport: Transport,
    sink: S,
}

impl<S: ControllerSink> Controller<S> {
    fn send_command(&mut self, opcode: Opcode, parameter: &[u8], now: Instant) -> Result<Pending<CommandReturn>, Error> {
        self.transport
            .send_command(&mut self.sink, &self.pool, opcode, parameter, now)
    }

    fn send_pdu(&mut self, handle: ConnectionHandle, channel_id: ChannelIdentifier, pdu: &[u8]) -> Result<(), Error> {
        let payload = self.pool.allocate_with(pdu)?;

        l2cap::send_pdu(&mut self.transport, &mut self.sink, handle, channel_id, payload)
    }
}

fn connection_update_parameter(handle: ConnectionHandle, parameters: &ConnectionParameters) -> Vec<u8> {
    let mut parameter = Vec::with_capacity(14);

    parameter.extend_from_slice(&handle.get_raw_handle().to_le_bytes());
    parameter.extend_from_slice(&parameters.interval_min.to_le_bytes());
    parameter.extend_from_slice(&parameters.interval_max.to_le_bytes());
    parameter.extend_from_slice(&parameters.latency.to_le_bytes());
    parameter.extend_from_slice(&parameters.timeout.to_le_bytes());
    // minimum and maximum connection event length
    parameter.extend_from_slice(&[0; 4]);

    parameter
}

/// A Bluetooth LE host
pub struct Host<S: ControllerSink> {
    config: HostConfig,
    controller: Controller<S>,
    connections: ConnectionManager,
    table: AttributeTable,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    inbound_sender: mpsc::UnboundedSender<Inbound>,
    command: Option<Command>,
    events: VecDeque<HostEvent>,
    counters: Arc<HostCounters>,
    now: Instant,
    shut_down: bool,
}

impl<S: ControllerSink> Host<S> {
    /// Create a new `Host`
    ///
    /// # Error
    /// The configuration is invalid
    pub fn new(config: HostConfig, sink: S) -> Result<Self, Error> {
        config.validate()?;

        let pool = BufferPool::new(config.block_size, config.block_count, config.headroom);

        let transport = Transport::new(config.command_timeout(), config.acl_max_data_len, config.acl_buffers);

        let counters = Arc::new(HostCounters::default());

        let connections = ConnectionManager::new(&config, counters.clone());

        let (inbound_sender, inbound) = mpsc::unbounded();

        log::debug!(
            "host created with {} blocks of {} bytes",
            config.block_count,
            config.block_size
        );

        Ok(Host {
            config,
            controller: Controller { pool, transport, sink },
            connections,
            table: AttributeTable::default(),
            inbound,
            inbound_sender,
            command: None,
            events: VecDeque::new(),
            counters,
            now: Instant::now(),
            shut_down: false,
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn pool(&self) -> &BufferPool {
        &self.controller.pool
    }

    pub fn counters(&self) -> Arc<HostCounters> {
        self.counters.clone()
    }

    pub fn sink(&self) -> &S {
        &self.controller.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.controller.sink
    }

    /// Get a sender for packets from the controller
    pub fn sender(&self) -> HostSender {
        HostSender {
            sender: self.inbound_sender.clone(),
            pool: self.controller.pool.clone(),
        }
    }

    pub fn set_attribute_table(&mut self, table: AttributeTable) {
        self.table = table
    }

    pub fn attribute_table(&self) -> &AttributeTable {
        &self.table
    }

    pub fn attribute_table_mut(&mut self) -> &mut AttributeTable {
        &mut self.table
    }

    pub fn connection(&self, handle: ConnectionHandle) -> Result<&Connection, Error> {
        self.connections.get(handle)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> + '_ {
        self.connections.iter()
    }

    /// Take the next event
    pub fn next_event(&mut self) -> Option<HostEvent> {
        self.events.pop_front()
    }

    /// The earliest time `process` has a timeout to check
    pub fn next_deadline(&self) -> Option<Instant> {
        self.connections
            .iter()
            .filter_map(Connection::next_deadline)
            .chain(self.controller.transport.next_deadline())
            .min()
    }

    /// The time a request sent now has its timeout counted from
    ///
    /// The application may send long after the last call to `process`, so the time of that call
    /// is only used when it is ahead of the system clock.
    fn clock(&self) -> Instant {
        self.now.max(Instant::now())
    }

    fn check_running(&self) -> Result<(), Error> {
        if self.shut_down {
            Err(Error::Shutdown)
        } else {
            Ok(())
        }
    }

    /// Process everything received from the controller and check the timeouts
    ///
    /// `now` is the current time, it must not go backwards between calls.
    ///
    /// # Error
    /// * `ControllerTimeout` when the controller did not answer a command in time. The host can
    ///   no longer send commands and should be shut down.
    /// * `Transport` if the controller sink failed
    /// * `Shutdown` if the host was shut down
    pub fn process(&mut self, now: Instant) -> Result<(), Error> {
        self.check_running()?;

        self.now = now;

        while let Ok(Some(inbound)) = self.inbound.try_next() {
            match inbound {
                Inbound::Event(packet) => self.on_event(packet)?,
                Inbound::Acl(packet) => self.on_acl(packet)?,
            }
        }

        self.check_timeouts()
    }

    fn check_timeouts(&mut self) -> Result<(), Error> {
        let now = self.now;

        let command = self.controller.transport.check_timeout(now);

        self.check_command();

        if let Err(e) = command {
            self.counters.increment(Counter::CommandTimeouts);

            self.events.push_back(HostEvent::ControllerTimeout);

            return Err(e);
        }

        for handle in self.connections.handles() {
            let connection = self.connections.get_mut(handle)?;

            if connection.indication.check_timeout(now) {
                self.counters.increment(Counter::AttTimeouts);
            }

            if let Some(timeout) = connection.client.check_timeout(now) {
                self.counters.increment(Counter::AttTimeouts);

                self.advance_procedure(handle, Err(timeout));
            }
        }

        Ok(())
    }

    /// Shut down the host
    ///
    /// Everything pending is resolved with `Shutdown` and every queued packet is freed.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }

        log::info!("shutting down the host");

        self.shut_down = true;

        self.inbound.close();

        while let Ok(Some(_)) = self.inbound.try_next() {}

        self.connections.close_all(Error::Shutdown);

        self.controller.transport.shutdown();

        self.check_command();
    }

    /// Follow up on the outstanding command of the host once it resolved
    fn check_command(&mut self) {
        let outcome = match self.command.as_mut().and_then(|c| c.pending.try_take()) {
            Some(outcome) => outcome,
            None => return,
        };

        let followup = match self.command.take() {
            Some(command) => command.followup,
            None => return,
        };

        match (followup, outcome) {
            (Followup::Connect, Err(e)) => self.connections.fail_connect(e),
            (Followup::Disconnect(handle), Err(e)) => self.connections.fail_disconnect(handle, e),
            (Followup::ConnectionUpdate(handle), Err(e)) => {
                if let Ok(connection) = self.connections.get_mut(handle) {
                    connection.fail_parameter_update(e)
                }
            }
            (Followup::ReadBufferSize(resolver), outcome) => {
                resolver.resolve(outcome.and_then(|ret| self.apply_buffer_size(ret)))
            }
            // the outcome is reported by a later event
            (_, Ok(_)) => (),
        }
    }

    fn apply_buffer_size(&mut self, ret: CommandReturn) -> Result<BufferSize, Error> {
        let parameter = match ret {
            CommandReturn::Complete { return_parameter, .. } if return_parameter.len() >= 3 => return_parameter,
            _ => return Err(Error::Decode("invalid return parameter of LE Read Buffer Size".into())),
        };

        let size = BufferSize {
            acl_max_data_len: usize::from(u16::from_le_bytes([parameter[0], parameter[1]])),
            acl_buffers: usize::from(parameter[2]),
        };

        if size.acl_max_data_len != 0 && size.acl_buffers != 0 {
            self.controller
                .transport
                .set_acl_buffers(size.acl_max_data_len, size.acl_buffers);
        } else {
            log::info!("controller has no dedicated LE ACL buffers, keeping the configured sizes");
        }

        Ok(size)
    }

    fn issue_command(&mut self, opcode: Opcode, parameter: &[u8], followup: Followup) -> Result<(), Error> {
        self.check_command();

        let pending = self.controller.send_command(opcode, parameter, self.clock())?;

        self.command = Some(Command { pending, followup });

        Ok(())
    }

    fn on_event(&mut self, packet: PacketChain) -> Result<(), Error> {
        let raw = packet.to_vec();

        drop(packet);

        let event = match Event::try_from_packet(&raw) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("dropped HCI event: {}", e);

                return Ok(());
            }
        };

        let Controller { transport, sink, .. } = &mut self.controller;

        let event = transport.process_event(sink, event);

        self.check_command();

        match event? {
            None => (),
            Some(Event::DisconnectionComplete(data)) => self.on_disconnection_complete(data)?,
            Some(Event::LeMeta(LeMetaData::ConnectionComplete(data))) => self.on_connection_complete(data),
            Some(Event::LeMeta(LeMetaData::ConnectionUpdateComplete(data))) => self.on_connection_update_complete(data),
            Some(Event::HardwareError(data)) => {
                log::error!("controller hardware error {:#x}", data.hardware_code);

                self.events.push_back(HostEvent::HardwareError {
                    code: data.hardware_code,
                })
            }
            Some(other) => self.events.push_back(HostEvent::Unhandled(other)),
        }

        Ok(())
    }

    fn on_disconnection_complete(&mut self, data: DisconnectionCompleteData) -> Result<(), Error> {
        let handle = data.connection_handle;

        if data.status != hci::error::Error::NoError {
            log::warn!("disconnecting {} failed: {}", handle, data.status);

            self.connections.fail_disconnect(handle, Error::Hci(data.status));

            return Ok(());
        }

        if self.connections.on_disconnection_complete(handle) {
            self.events.push_back(HostEvent::Disconnected {
                handle,
                reason: data.reason,
            });
        }

        let Controller { transport, sink, .. } = &mut self.controller;

        transport.remove_connection(sink, handle)
    }

    fn on_connection_complete(&mut self, data: LeConnectionCompleteData) {
        let handle = match self.connections.on_connection_complete(&data) {
            Some(handle) => handle,
            None => return,
        };

        self.events.push_back(HostEvent::Connected {
            handle,
            role: data.role,
            peer: PeerAddress {
                address_type: data.peer_address_type,
                address: data.peer_address,
            },
        });

        let preferred_mtu = self.config.preferred_mtu;

        if data.role == LeRole::Central && preferred_mtu > MIN_ATT_MTU {
            if let Err(e) = self.start_procedure(handle, ExchangeMtu::new(preferred_mtu)) {
                log::warn!("could not exchange the ATT MTU of {}: {}", handle, e);
            }
        }
    }

    fn on_connection_update_complete(&mut self, data: LeConnectionUpdateCompleteData) {
        let handle = data.connection_handle;

        match self.connections.get_mut(handle) {
            Ok(connection) => {
                if let Some(timing) = connection.on_update_complete(&data) {
                    self.events
                        .push_back(HostEvent::ConnectionParametersUpdated { handle, timing })
                }
            }
            Err(_) => log::warn!("connection update of unknown connection {}", handle),
        }
    }

    fn on_malformed(&mut self, handle: Option<ConnectionHandle>, err: Error) {
        self.counters.increment(Counter::MalformedPdus);

        match err {
            Error::MalformedPdu(error) => {
                log::warn!("dropped malformed PDU: {}", error);

                self.events.push_back(HostEvent::MalformedPdu { handle, error })
            }
            other => log::warn!("dropped ACL data: {}", other),
        }
    }

    fn on_acl(&mut self, mut packet: PacketChain) -> Result<(), Error> {
        let header = match AclHeader::pop(&mut packet) {
            Ok(header) => header,
            Err(e) => {
                self.on_malformed(None, e);

                return Ok(());
            }
        };

        let handle = header.connection_handle;

        let connection = match self.connections.get_mut(handle) {
            Ok(connection) => connection,
            Err(_) => {
                log::warn!("dropped ACL data of unknown connection {}", handle);

                return Ok(());
            }
        };

        match connection
            .reassembler
            .on_acl_fragment(header.packet_boundary_flag, packet)
        {
            Ok(Some(frame)) => self.on_frame(handle, frame),
            Ok(None) => Ok(()),
            Err(e) => {
                self.on_malformed(Some(handle), e);

                Ok(())
            }
        }
    }

    fn on_frame(&mut self, handle: ConnectionHandle, frame: BasicFrame) -> Result<(), Error> {
        let BasicFrame { channel_id, payload } = frame;

        let pdu = payload.to_vec();

        drop(payload);

        match channel_id {
            ChannelIdentifier::AttributeProtocol => self.on_att(handle, &pdu),
            ChannelIdentifier::LowEnergySignaling => self.on_signal(handle, &pdu),
            other => {
                log::debug!("dropped PDU for unsupported channel {:?} of {}", other, handle);

                Ok(())
            }
        }
    }

    fn send_or_log(&mut self, handle: ConnectionHandle, channel_id: ChannelIdentifier, pdu: &[u8]) {
        if let Err(e) = self.controller.send_pdu(handle, channel_id, pdu) {
            log::warn!("could not send a PDU on {:?} of {}: {}", channel_id, handle, e)
        }
    }

    fn on_att(&mut self, handle: ConnectionHandle, pdu: &[u8]) -> Result<(), Error> {
        let opcode = match pdu.first() {
            Some(raw) => PduOpcode::try_from(*raw).ok(),
            None => {
                log::warn!("dropped empty ATT PDU of {}", handle);

                self.counters.increment(Counter::MalformedPdus);

                return Ok(());
            }
        };

        match opcode {
            Some(opcode) if opcode.is_response() => self.on_att_response(handle, pdu),
            Some(PduOpcode::HandleValueNotification) | Some(PduOpcode::HandleValueIndication) => {
                self.on_att_server_message(handle, pdu);

                Ok(())
            }
            Some(PduOpcode::HandleValueConfirmation) => {
                self.connections.get_mut(handle)?.indication.on_confirmation();

                Ok(())
            }
            _ => self.on_att_request(handle, pdu),
        }
    }

    fn on_att_response(&mut self, handle: ConnectionHandle, pdu: &[u8]) -> Result<(), Error> {
        let preferred_mtu = self.config.preferred_mtu;

        let connection = self.connections.get_mut(handle)?;

        let outcome = match Pdu::try_from_bytes(pdu) {
            Ok(response) => connection.client.on_response(response),
            Err(e) => {
                self.counters.increment(Counter::MalformedPdus);

                connection.client.on_malformed_response(e).map(Err)
            }
        };

        let outcome = match outcome {
            Some(outcome) => outcome,
            None => return Ok(()),
        };

        if let Ok(Pdu::ExchangeMtuResponse(server_mtu)) = &outcome {
            let mtu = (*server_mtu).min(preferred_mtu).max(MIN_ATT_MTU);

            connection.set_mtu(mtu);

            self.events.push_back(HostEvent::MtuExchanged { handle, mtu });
        }

        self.advance_procedure(handle, outcome);

        Ok(())
    }

    fn advance_procedure(&mut self, handle: ConnectionHandle, outcome: Result<Pdu, Error>) {
        let now = self.now;

        let connection = match self.connections.get_mut(handle) {
            Ok(connection) => connection,
            Err(_) => return,
        };

        if let Some(request) = connection.advance_procedure(outcome, now) {
            if let Err(e) = self
                .controller
                .send_pdu(handle, ChannelIdentifier::AttributeProtocol, &request)
            {
                log::warn!("could not send the next request of the procedure on {}: {}", handle, e);

                connection.abort_procedure(e);
            }
        }
    }

    fn on_att_server_message(&mut self, handle: ConnectionHandle, pdu: &[u8]) {
        match Pdu::try_from_bytes(pdu) {
            Ok(Pdu::HandleValueNotification { handle: attribute, value }) => {
                self.events.push_back(HostEvent::Notification {
                    handle,
                    attribute,
                    value,
                })
            }
            Ok(Pdu::HandleValueIndication { handle: attribute, value }) => {
                let confirmation = Pdu::HandleValueConfirmation.into_bytes();

                self.send_or_log(handle, ChannelIdentifier::AttributeProtocol, &confirmation);

                self.events.push_back(HostEvent::Indication {
                    handle,
                    attribute,
                    value,
                })
            }
            Ok(other) => log::warn!("unexpected ATT PDU {:#x} from {}", other.raw_opcode(), handle),
            Err(e) => {
                log::warn!("dropped malformed ATT PDU from {}: {}", handle, e);

                self.counters.increment(Counter::MalformedPdus);
            }
        }
    }

    fn on_att_request(&mut self, handle: ConnectionHandle, pdu: &[u8]) -> Result<(), Error> {
        let connection = self.connections.get_mut(handle)?;

        let mtu = connection.mtu();

        let processed = connection.server.process_raw(&mut self.table, pdu, mtu);

        if let Some(mtu) = processed.mtu {
            connection.set_mtu(mtu);

            self.events.push_back(HostEvent::MtuExchanged { handle, mtu });
        }

        if let Some(response) = processed.response {
            self.send_or_log(handle, ChannelIdentifier::AttributeProtocol, &response.into_bytes());
        }

        for attribute in processed.written {
            self.events
                .push_back(HostEvent::AttributeWritten { handle, attribute });
        }

        Ok(())
    }

    fn on_signal(&mut self, handle: ConnectionHandle, pdu: &[u8]) -> Result<(), Error> {
        let signal = match Signal::try_from_bytes(pdu) {
            Ok(signal) => signal,
            Err(e) => {
                log::warn!("dropped signaling command from {}: {}", handle, e);

                self.counters.increment(Counter::MalformedPdus);

                return Ok(());
            }
        };

        let connection = self.connections.get_mut(handle)?;

        let mut requested = None;

        let mut reply = match signal {
            Signal::ConnectionParameterUpdateRequest { identifier, parameters } => {
                if connection.role() == LeRole::Central {
                    let acceptable = parameters.is_valid()
                        && self
                            .config
                            .accepts_interval(parameters.interval_min, parameters.interval_max);

                    log::debug!("{} requested {:?}, acceptable: {}", handle, parameters, acceptable);

                    if acceptable {
                        // answered once the update command is issued
                        requested = Some((identifier, parameters));

                        None
                    } else {
                        Some(Signal::ConnectionParameterUpdateResponse {
                            identifier,
                            accepted: false,
                        })
                    }
                } else {
                    Some(Signal::CommandReject {
                        identifier,
                        reason: RejectReason::CommandNotUnderstood,
                    })
                }
            }
            Signal::ConnectionParameterUpdateResponse { identifier, accepted } => {
                if connection.signal_request != Some(identifier) {
                    log::warn!("unexpected connection parameter update response from {}", handle);
                } else if !accepted {
                    connection.fail_parameter_update(Error::Hci(
                        hci::error::Error::UnacceptableConnectionParameters,
                    ));
                }

                None
            }
            Signal::CommandReject { identifier, reason } => {
                log::debug!("{} rejected signaling command {}: {:?}", handle, identifier, reason);

                if connection.signal_request == Some(identifier) {
                    connection.fail_parameter_update(Error::Hci(hci::error::Error::UnsupportedRemoteFeature));
                }

                None
            }
            Signal::Unsupported { code, identifier } => {
                log::debug!("{} sent unsupported signaling command {:#x}", handle, code);

                Some(Signal::CommandReject {
                    identifier,
                    reason: RejectReason::CommandNotUnderstood,
                })
            }
        };

        if let Some((identifier, parameters)) = requested {
            let parameter = connection_update_parameter(handle, &parameters);

            let accepted = match self.issue_command(
                Opcode::LE_CONNECTION_UPDATE,
                &parameter,
                Followup::ConnectionUpdate(handle),
            ) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("rejected the parameters requested by {}, could not update them: {}", handle, e);

                    false
                }
            };

            reply = Some(Signal::ConnectionParameterUpdateResponse { identifier, accepted });
        }

        if let Some(reply) = reply {
            let reply = reply.to_bytes()?;

            self.send_or_log(handle, ChannelIdentifier::LowEnergySignaling, &reply);
        }

        Ok(())
    }

    /// Send a command to the controller
    ///
    /// The host only has one command outstanding at a time, `Busy` is returned while another
    /// command (including one sent by the host itself) is outstanding.
    pub fn send_command(&mut self, opcode: Opcode, parameter: &[u8]) -> Result<Pending<CommandReturn>, Error> {
        self.check_running()?;

        self.check_command();

        let now = self.clock();

        self.controller.send_command(opcode, parameter, now)
    }

    /// Read the size and number of the LE ACL buffers of the controller
    ///
    /// The flow control of the host is updated with the sizes read.
    pub fn read_buffer_size(&mut self) -> Result<Pending<BufferSize>, Error> {
        self.check_running()?;

        let (resolver, pending) = pending::pending();

        self.issue_command(Opcode::LE_READ_BUFFER_SIZE, &[], Followup::ReadBufferSize(resolver))?;

        Ok(pending)
    }

    /// Create a connection to a peer as the central
    ///
    /// The returned `Pending` resolves with the handle of the connection once it is established.
    ///
    /// # Error
    /// * `Busy` if a connection is already being created, the maximum number of connections is
    ///   reached, or a command is outstanding
    /// * `InvalidParameter` if the connection parameters are out of range
    pub fn connect(&mut self, peer: PeerAddress, parameters: ConnectionParameters) -> Result<Pending<ConnectionHandle>, Error> {
        self.check_running()?;

        if !parameters.is_valid() {
            return Err(Error::InvalidParameter("connection parameters are out of range"));
        }

        self.connections.check_can_connect()?;

        let mut parameter = Vec::with_capacity(25);

        parameter.extend_from_slice(&CONNECT_SCAN_INTERVAL.to_le_bytes());
        parameter.extend_from_slice(&CONNECT_SCAN_WINDOW.to_le_bytes());
        // the filter accept list is not used
        parameter.push(0);
        parameter.push(peer.address_type);
        parameter.extend_from_slice(&peer.address);
        // own address is public
        parameter.push(0);
        parameter.extend_from_slice(&parameters.interval_min.to_le_bytes());
        parameter.extend_from_slice(&parameters.interval_max.to_le_bytes());
        parameter.extend_from_slice(&parameters.latency.to_le_bytes());
        parameter.extend_from_slice(&parameters.timeout.to_le_bytes());
        parameter.extend_from_slice(&[0; 4]);

        self.issue_command(Opcode::LE_CREATE_CONNECTION, &parameter, Followup::Connect)?;

        Ok(self.connections.begin_connect(peer))
    }

    /// Cancel the connection being created
    ///
    /// The `Pending` of [`connect`](Host::connect) resolves with the error status the controller
    /// reports for the cancelled connection.
    pub fn cancel_connect(&mut self) -> Result<Pending<CommandReturn>, Error> {
        self.check_running()?;

        if !self.connections.is_connecting() {
            return Err(Error::InvalidParameter("no connection is being created"));
        }

        self.send_command(Opcode::LE_CREATE_CONNECTION_CANCEL, &[])
    }

    /// Disconnect a connection
    ///
    /// The returned `Pending` resolves once the controller reports the disconnection.
    pub fn disconnect(&mut self, handle: ConnectionHandle, reason: hci::error::Error) -> Result<Pending<()>, Error> {
        self.check_running()?;

        if self.connections.get(handle)?.state() != ConnectionState::Connected {
            return Err(Error::Busy);
        }

        let raw_handle = handle.get_raw_handle().to_le_bytes();

        let parameter = [raw_handle[0], raw_handle[1], u8::from(reason)];

        self.issue_command(Opcode::DISCONNECT, &parameter, Followup::Disconnect(handle))?;

        self.connections.begin_disconnect(handle)
    }

    /// Update the parameters of a connection
    ///
    /// As the central the controller is asked to update the connection. As the peripheral the
    /// update is requested from the central over the LE signaling channel. The returned `Pending`
    /// resolves with the parameters the controller reports once the update is applied.
    pub fn update_connection_parameters(
        &mut self,
        handle: ConnectionHandle,
        parameters: ConnectionParameters,
    ) -> Result<Pending<ConnectionTiming>, Error> {
        self.check_running()?;

        if !parameters.is_valid() {
            return Err(Error::InvalidParameter("connection parameters are out of range"));
        }

        let connection = self.connections.get(handle)?;

        if connection.state() != ConnectionState::Connected || connection.is_parameter_update_pending() {
            return Err(Error::Busy);
        }

        match connection.role() {
            LeRole::Central => {
                let parameter = connection_update_parameter(handle, &parameters);

                self.issue_command(
                    Opcode::LE_CONNECTION_UPDATE,
                    &parameter,
                    Followup::ConnectionUpdate(handle),
                )?;
            }
            LeRole::Peripheral => {
                let connection = self.connections.get_mut(handle)?;

                let identifier = connection.next_signal_identifier();

                let request = Signal::ConnectionParameterUpdateRequest { identifier, parameters }.to_bytes()?;

                self.controller
                    .send_pdu(handle, ChannelIdentifier::LowEnergySignaling, &request)?;

                connection.signal_request = Some(identifier);
            }
        }

        self.connections.get_mut(handle)?.begin_parameter_update()
    }

    fn start_procedure<P>(&mut self, handle: ConnectionHandle, procedure: P) -> Result<Pending<P::Output>, Error>
    where
        P: Procedure + 'static,
    {
        self.check_running()?;

        let now = self.clock();

        let connection = self.connections.get_mut(handle)?;

        let (pending, request) = connection.start_procedure(procedure, now)?;

        if let Some(request) = request {
            if let Err(e) = self
                .controller
                .send_pdu(handle, ChannelIdentifier::AttributeProtocol, &request)
            {
                connection.abort_procedure(e.clone());

                return Err(e);
            }
        }

        Ok(pending)
    }

    /// Discover every primary service of the peer's server
    pub fn discover_primary_services(&mut self, handle: ConnectionHandle) -> Result<Pending<Vec<Service>>, Error> {
        self.start_procedure(handle, DiscoverPrimaryServices::all())
    }

    /// Discover the primary services of the peer's server with the type `uuid`
    pub fn discover_primary_services_by_uuid(
        &mut self,
        handle: ConnectionHandle,
        uuid: Uuid,
    ) -> Result<Pending<Vec<Service>>, Error> {
        self.start_procedure(handle, DiscoverPrimaryServices::by_uuid(uuid))
    }

    pub fn discover_characteristics(
        &mut self,
        handle: ConnectionHandle,
        service: &Service,
    ) -> Result<Pending<Vec<Characteristic>>, Error> {
        self.start_procedure(handle, DiscoverCharacteristics::new(service))
    }

    pub fn discover_descriptors(
        &mut self,
        handle: ConnectionHandle,
        characteristic: &Characteristic,
    ) -> Result<Pending<Vec<Descriptor>>, Error> {
        self.start_procedure(handle, DiscoverDescriptors::new(characteristic))
    }

    /// Read the value of an attribute, however long it is
    pub fn read(&mut self, handle: ConnectionHandle, attribute: u16) -> Result<Pending<Vec<u8>>, Error> {
        self.start_procedure(handle, Read::new(attribute))
    }

    pub fn read_multiple(&mut self, handle: ConnectionHandle, attributes: Vec<u16>) -> Result<Pending<Vec<u8>>, Error> {
        self.start_procedure(handle, ReadMultiple::new(attributes))
    }

    /// Write the value of an attribute
    ///
    /// A value that does not fit within a *Write Request* is written with prepared writes.
    pub fn write(&mut self, handle: ConnectionHandle, attribute: u16, value: Vec<u8>) -> Result<Pending<()>, Error> {
        self.start_procedure(handle, Write::new(attribute, value))
    }

    /// Write the value of a client characteristic configuration descriptor
    pub fn subscribe(
        &mut self,
        handle: ConnectionHandle,
        client_configuration_handle: u16,
        configuration: &[ClientConfiguration],
    ) -> Result<Pending<()>, Error> {
        self.start_procedure(
            handle,
            Write::client_configuration(client_configuration_handle, configuration),
        )
    }

    /// Exchange the ATT MTU, the `Pending` resolves to the MTU of the connection
    pub fn exchange_mtu(&mut self, handle: ConnectionHandle) -> Result<Pending<u16>, Error> {
        let preferred_mtu = self.config.preferred_mtu;

        self.start_procedure(handle, ExchangeMtu::new(preferred_mtu))
    }

    /// Write an attribute without a response
    ///
    /// The value must fit within a single *Write Command*.
    pub fn write_without_response(&mut self, handle: ConnectionHandle, attribute: u16, value: Vec<u8>) -> Result<(), Error> {
        self.check_running()?;

        let connection = self.connections.get(handle)?;

        connection.check_connected()?;

        let command = Pdu::WriteCommand {
            handle: attribute,
            value,
        };

        if command.len_of_into() > usize::from(connection.mtu()) {
            return Err(Error::InvalidParameter("value does not fit within the ATT MTU"));
        }

        self.controller
            .send_pdu(handle, ChannelIdentifier::AttributeProtocol, &command.into_bytes())
    }

    /// Notify the peer of the value of a local attribute
    pub fn notify(&mut self, handle: ConnectionHandle, attribute: u16, value: Vec<u8>) -> Result<(), Error> {
        self.check_running()?;

        let connection = self.connections.get(handle)?;

        connection.check_connected()?;

        let notification = gatt_server::notification(attribute, value, connection.mtu())?;

        self.controller
            .send_pdu(handle, ChannelIdentifier::AttributeProtocol, &notification.into_bytes())
    }

    /// Indicate the value of a local attribute to the peer
    ///
    /// The returned `Pending` resolves once the peer confirms the indication.
    ///
    /// # Error
    /// `Busy` if the last indication on the connection is not yet confirmed
    pub fn indicate(&mut self, handle: ConnectionHandle, attribute: u16, value: Vec<u8>) -> Result<Pending<()>, Error> {
        self.check_running()?;

        let now = self.clock();

        let connection = self.connections.get_mut(handle)?;

        connection.check_connected()?;

        let indication = gatt_server::indication(attribute, value, connection.mtu())?;

        let pending = connection.indication.begin(attribute, now)?;

        if let Err(e) = self
            .controller
            .send_pdu(handle, ChannelIdentifier::AttributeProtocol, &indication.into_bytes())
        {
            connection.indication.abort(e.clone());

            return Err(e);
        }

        Ok(pending)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::conn::test::connection_complete;
    use crate::hci::test::RecordingSink;
    use std::time::Duration;

    fn host() -> Host<RecordingSink> {
        Host::new(HostConfig::default(), RecordingSink::default()).unwrap()
    }

    fn le_meta_connection_complete(raw_handle: u16, role: LeRole) -> Vec<u8> {
        let data = connection_complete(raw_handle, role);

        let mut event = vec![0x3E, 19, 0x01, 0x00];

        event.extend_from_slice(&raw_handle.to_le_bytes());
        event.push(if role == LeRole::Central { 0 } else { 1 });
        event.push(data.peer_address_type);
        event.extend_from_slice(&data.peer_address);
        event.extend_from_slice(&data.connection_interval.to_le_bytes());
        event.extend_from_slice(&data.peripheral_latency.to_le_bytes());
        event.extend_from_slice(&data.supervision_timeout.to_le_bytes());
        event.push(0);

        event
    }

    fn command_status(opcode: Opcode, status: u8) -> Vec<u8> {
        let raw = opcode.to_raw().to_le_bytes();

        vec![0x0F, 4, status, 1, raw[0], raw[1]]
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = HostConfig {
            max_connections: 0,
            ..HostConfig::default()
        };

        assert!(Host::new(config, RecordingSink::default()).is_err());
    }

    #[test]
    fn connect_as_central() {
        let mut host = host();

        let now = Instant::now();

        let parameters = ConnectionParameters {
            interval_min: 0x18,
            interval_max: 0x28,
            latency: 0,
            timeout: 0x1F4,
        };

        let peer = PeerAddress {
            address_type: 0,
            address: [1, 2, 3, 4, 5, 6],
        };

        let mut pending = host.connect(peer, parameters).unwrap();

        assert_eq!(1, host.sink().commands.len());
        assert_eq!(3 + 25, host.sink().commands[0].len());
        assert_eq!(Err(Error::Busy), host.connect(peer, parameters).map(|_| ()));

        let sender = host.sender();

        sender
            .send_event(&command_status(Opcode::LE_CREATE_CONNECTION, 0))
            .unwrap();
        sender
            .send_event(&le_meta_connection_complete(5, LeRole::Central))
            .unwrap();

        host.process(now).unwrap();

        let handle = ConnectionHandle::try_from(5).unwrap();

        assert_eq!(Some(Ok(handle)), pending.try_take());

        match host.next_event() {
            Some(HostEvent::Connected { handle: h, role, peer: p }) => {
                assert_eq!((handle, LeRole::Central, peer), (h, role, p))
            }
            other => panic!("unexpected event {:?}", other),
        }

        // the MTU is exchanged right after connecting
        let request = host.sink().acl.last().unwrap().clone();

        assert_eq!(&[0x02, 0x00, 0x01], &request[8..11]);
        assert!(host.connection(handle).unwrap().is_procedure_running());
    }

    #[test]
    fn failed_create_connection_command() {
        let mut host = host();

        let peer = PeerAddress {
            address_type: 0,
            address: [0; 6],
        };

        let parameters = ConnectionParameters {
            interval_min: 0x18,
            interval_max: 0x18,
            latency: 0,
            timeout: 0x100,
        };

        let mut pending = host.connect(peer, parameters).unwrap();

        host.sender()
            .send_event(&command_status(Opcode::LE_CREATE_CONNECTION, 0x0C))
            .unwrap();

        host.process(Instant::now()).unwrap();

        assert_eq!(
            Some(Err(Error::Hci(hci::error::Error::CommandDisallowed))),
            pending.try_take()
        );
        assert!(host.connect(peer, parameters).is_ok());
    }

    #[test]
    fn controller_timeout_is_fatal() {
        let mut host = host();

        let mut pending = host.read_buffer_size().unwrap();

        let now = Instant::now();

        assert_eq!(Ok(()), host.process(now));
        assert_eq!(
            Err(Error::ControllerTimeout),
            host.process(now + host.config().command_timeout())
        );
        assert_eq!(Some(Err(Error::ControllerTimeout)), pending.try_take());
        assert_eq!(Some(HostEvent::ControllerTimeout), host.next_event());
        assert_eq!(1, host.counters().get(Counter::CommandTimeouts));
        assert_eq!(
            Err(Error::ControllerTimeout),
            host.send_command(Opcode::RESET, &[]).map(|_| ())
        );
    }

    #[test]
    fn command_timeout_starts_when_sent() {
        let mut host = host();

        let timeout = host.config().command_timeout();

        // the host was last processed long before the command is sent
        let idle = Instant::now().checked_sub(3 * timeout).unwrap();

        host.process(idle).unwrap();

        let mut pending = host.read_buffer_size().unwrap();

        let sent = Instant::now();

        assert_eq!(Ok(()), host.process(idle + timeout + Duration::from_millis(1)));
        assert_eq!(None, pending.try_take());
        assert_eq!(Err(Error::ControllerTimeout), host.process(sent + timeout));
        assert_eq!(Some(Err(Error::ControllerTimeout)), pending.try_take());
    }

    #[test]
    fn read_buffer_size_updates_flow_control() {
        let mut host = host();

        let mut pending = host.read_buffer_size().unwrap();

        let raw = Opcode::LE_READ_BUFFER_SIZE.to_raw().to_le_bytes();

        host.sender()
            .send_event(&[0x0E, 7, 1, raw[0], raw[1], 0x00, 0xFB, 0x00, 0x04])
            .unwrap();

        host.process(Instant::now()).unwrap();

        let size = BufferSize {
            acl_max_data_len: 251,
            acl_buffers: 4,
        };

        assert_eq!(Some(Ok(size)), pending.try_take());
        assert_eq!(251, host.controller.transport.acl_max_data_len());
    }

    #[test]
    fn shutdown_resolves_everything() {
        let mut host = host();

        let sender = host.sender();

        sender
            .send_event(&le_meta_connection_complete(1, LeRole::Peripheral))
            .unwrap();

        host.process(Instant::now()).unwrap();

        let handle = ConnectionHandle::try_from(1).unwrap();

        let mut read = host.read(handle, 3).unwrap();

        sender.send_event(&[0x10, 1, 0]).unwrap();

        host.shutdown();

        assert_eq!(Some(Err(Error::Shutdown)), read.try_take());
        assert_eq!(Err(Error::Shutdown), sender.send_event(&[0x10, 1, 0]));
        assert_eq!(Err(Error::Shutdown), host.process(Instant::now()));
        assert_eq!(0, host.pool().in_use());
    }
}
