//! The Host Controller Interface (HCI)
//!
//! The HCI is the boundary between the host and the controller. Commands are sent to the controller
//! one at a time, every command occupies the single command slot of the [`Transport`] until the
//! controller answers it with a *Command Complete* or *Command Status* event. Events that are not
//! answers to a command are handed back to the host for dispatching to the connection manager and
//! L2CAP.
//!
//! ACL data packets are sent through the transport as well, where they are held back whenever the
//! controller has no free ACL buffers.

pub mod acl;
pub mod error;
pub mod events;
pub mod opcodes;

use crate::buffer::{BufferPool, PacketChain};
use crate::pending::{self, Pending, Resolver};
use crate::Error;
use core::fmt::{self, Debug, Display};
use events::Event;
use opcodes::Opcode;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// A connection handle
///
/// Connection handles are assigned by the controller when a connection is created. A handle is
/// unique among the active connections.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct ConnectionHandle {
    handle: u16,
}

impl ConnectionHandle {
    pub const MIN: ConnectionHandle = ConnectionHandle { handle: 0 };
    pub const MAX: ConnectionHandle = ConnectionHandle { handle: 0x0EFF };

    pub fn get_raw_handle(&self) -> u16 {
        self.handle
    }
}

impl TryFrom<u16> for ConnectionHandle {
    type Error = &'static str;

    /// Create a `ConnectionHandle` from a raw value
    ///
    /// # Error
    /// The raw value is greater than the maximum handle value.
    fn try_from(raw: u16) -> Result<Self, Self::Error> {
        if raw <= Self::MAX.handle {
            Ok(ConnectionHandle { handle: raw })
        } else {
            Err("raw value larger than the maximum connection handle")
        }
    }
}

impl Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#05x}", self.handle)
    }
}

/// The sending half of the controller transport
///
/// The host hands every outbound packet to the sink, fully formatted. A command packet is the
/// opcode, the parameter length, and the parameters. An ACL packet includes its HCI ACL header.
/// Any framing below the HCI (such as the UART packet indicator) is up to the implementation.
///
/// The sink takes ownership of the packet, dropping it returns its buffers to the pool.
pub trait ControllerSink {
    type Error: Debug + Display;

    fn send_command(&mut self, packet: PacketChain) -> Result<(), Self::Error>;

    fn send_acl(&mut self, packet: PacketChain) -> Result<(), Self::Error>;
}

/// The successful outcome of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandReturn {
    /// The command completed, this contains the return parameter after the status
    Complete { opcode: Opcode, return_parameter: Vec<u8> },
    /// The controller accepted the command, the outcome is reported by a later event
    Status { opcode: Opcode },
}

struct CommandSlot {
    opcode: Opcode,
    deadline: Instant,
    resolver: Resolver<CommandReturn>,
}

/// ACL data flow control
///
/// The controller has a fixed number of ACL data buffers. A packet sent to the controller holds a
/// buffer until the controller reports it as completed through a *Number Of Completed Packets*
/// event.
struct AclFlow {
    max_data_len: usize,
    total: usize,
    free: usize,
    queue: VecDeque<(ConnectionHandle, PacketChain)>,
    in_flight: HashMap<ConnectionHandle, usize>,
}

impl AclFlow {
    fn sent(&mut self, handle: ConnectionHandle) {
        self.free -= 1;

        *self.in_flight.entry(handle).or_insert(0) += 1;
    }

    fn completed(&mut self, handle: ConnectionHandle, count: u16) {
        let in_flight = self.in_flight.entry(handle).or_insert(0);

        let count = usize::from(count).min(*in_flight);

        *in_flight -= count;

        self.free = (self.free + count).min(self.total);
    }
}

/// The HCI transport
///
/// This is the command slot and ACL flow control of the host. It does not own the sink or the
/// buffer pool, both are provided by the host on every call.
pub struct Transport {
    slot: Option<CommandSlot>,
    command_credits: u8,
    command_timeout: Duration,
    faulted: bool,
    acl: AclFlow,
}

impl Transport {
    /// Create a new `Transport`
    ///
    /// `acl_max_data_len` and `acl_packets` are the ACL buffer size and count of the controller.
    pub fn new(command_timeout: Duration, acl_max_data_len: usize, acl_packets: usize) -> Self {
        Transport {
            slot: None,
            command_credits: 1,
            command_timeout,
            faulted: false,
            acl: AclFlow {
                max_data_len: acl_max_data_len,
                total: acl_packets,
                free: acl_packets,
                queue: VecDeque::new(),
                in_flight: HashMap::new(),
            },
        }
    }

    /// Check if a command is outstanding
    pub fn is_command_pending(&self) -> bool {
        self.slot.is_some()
    }

    /// Check if the controller has stopped responding to commands
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    /// The largest ACL payload the controller accepts in one packet
    pub fn acl_max_data_len(&self) -> usize {
        self.acl.max_data_len
    }

    /// The number of ACL packets waiting for a free controller buffer
    pub fn queued_acl_packets(&self) -> usize {
        self.acl.queue.len()
    }

    /// Set the ACL buffer size and count of the controller
    ///
    /// This is usually done with the return of the *LE Read Buffer Size* command.
    pub fn set_acl_buffers(&mut self, max_data_len: usize, packets: usize) {
        let in_flight: usize = self.acl.in_flight.values().sum();

        self.acl.max_data_len = max_data_len;
        self.acl.total = packets;
        self.acl.free = packets.saturating_sub(in_flight);
    }

    /// Send a command to the controller
    ///
    /// The returned `Pending` resolves when the controller answers the command, or with
    /// `ControllerTimeout` if it never does.
    ///
    /// # Error
    /// * `Busy` when a command is already outstanding (or the controller has no room for another
    ///   command). The caller must try again after the outstanding command resolves.
    /// * `ControllerTimeout` after a previous command timed out.
    /// * `InvalidParameter` if `parameter` is longer than 255 bytes.
    pub fn send_command<S>(
        &mut self,
        sink: &mut S,
        pool: &BufferPool,
        opcode: Opcode,
        parameter: &[u8],
        now: Instant,
    ) -> Result<Pending<CommandReturn>, Error>
    where
        S: ControllerSink,
    {
        if self.faulted {
            return Err(Error::ControllerTimeout);
        }

        if self.slot.is_some() || self.command_credits == 0 {
            return Err(Error::Busy);
        }

        if parameter.len() > usize::from(u8::MAX) {
            return Err(Error::InvalidParameter("command parameter is longer than 255 bytes"));
        }

        let mut packet = pool.allocate()?;

        packet.append(&opcode.to_raw().to_le_bytes())?;
        packet.append(&[parameter.len() as u8])?;
        packet.append(parameter)?;

        sink.send_command(packet)
            .map_err(|e| Error::Transport(e.to_string()))?;

        log::trace!("sent command {:?}", opcode);

        self.command_credits -= 1;

        let (resolver, pending) = pending::pending();

        self.slot = Some(CommandSlot {
            opcode,
            deadline: now + self.command_timeout,
            resolver,
        });

        Ok(pending)
    }

    /// Process a decoded event
    ///
    /// Command Complete and Command Status events that answer the outstanding command resolve it.
    /// Number Of Completed Packets events return ACL buffers and release queued packets. Every
    /// other event is returned for the host to dispatch.
    pub fn process_event<S>(&mut self, sink: &mut S, event: Event) -> Result<Option<Event>, Error>
    where
        S: ControllerSink,
    {
        match event {
            Event::CommandComplete(data) => {
                self.command_credits = data.number_of_hci_command_packets;

                let outcome = match data.return_parameter.split_first() {
                    Some((&status, rest)) => error::Error::from(status)
                        .ok_or_else(Error::Hci)
                        .map(|_| CommandReturn::Complete {
                            opcode: data.command_opcode,
                            return_parameter: rest.to_vec(),
                        }),
                    None => Ok(CommandReturn::Complete {
                        opcode: data.command_opcode,
                        return_parameter: Vec::new(),
                    }),
                };

                self.resolve_command(data.command_opcode, outcome);

                Ok(None)
            }
            Event::CommandStatus(data) => {
                self.command_credits = data.number_of_hci_command_packets;

                let outcome = data.status.ok_or_else(Error::Hci).map(|_| CommandReturn::Status {
                    opcode: data.command_opcode,
                });

                self.resolve_command(data.command_opcode, outcome);

                Ok(None)
            }
            Event::NumberOfCompletedPackets(data) => {
                for (handle, count) in data.completed {
                    self.acl.completed(handle, count);
                }

                self.flush_acl(sink)?;

                Ok(None)
            }
            other => Ok(Some(other)),
        }
    }

    fn resolve_command(&mut self, opcode: Opcode, outcome: Result<CommandReturn, Error>) {
        if opcode == Opcode::NOP {
            return;
        }

        match self.slot.take() {
            Some(slot) if slot.opcode == opcode => {
                log::trace!("command {:?} resolved", opcode);

                slot.resolver.resolve(outcome)
            }
            Some(slot) => {
                log::warn!(
                    "controller answered command {:?}, but the outstanding command is {:?}",
                    opcode,
                    slot.opcode
                );

                self.slot = Some(slot);
            }
            None => log::warn!("controller answered command {:?} that was never sent", opcode),
        }
    }

    /// Check the command timeout
    ///
    /// If the outstanding command has passed its deadline it is resolved with `ControllerTimeout`
    /// and the transport becomes faulted. A faulted transport refuses every further command.
    pub fn check_timeout(&mut self, now: Instant) -> Result<(), Error> {
        match self.slot.take() {
            Some(slot) if slot.deadline <= now => {
                log::error!("controller did not answer command {:?}", slot.opcode);

                slot.resolver.resolve(Err(Error::ControllerTimeout));

                self.faulted = true;

                Err(Error::ControllerTimeout)
            }
            slot => {
                self.slot = slot;

                Ok(())
            }
        }
    }

    /// The deadline of the outstanding command
    pub fn next_deadline(&self) -> Option<Instant> {
        self.slot.as_ref().map(|slot| slot.deadline)
    }

    /// Send an ACL data packet, or queue it until the controller has a free buffer
    pub fn send_acl<S>(&mut self, sink: &mut S, handle: ConnectionHandle, packet: PacketChain) -> Result<(), Error>
    where
        S: ControllerSink,
    {
        self.acl.queue.push_back((handle, packet));

        self.flush_acl(sink)
    }

    fn flush_acl<S>(&mut self, sink: &mut S) -> Result<(), Error>
    where
        S: ControllerSink,
    {
        while self.acl.free > 0 {
            let (handle, packet) = match self.acl.queue.pop_front() {
                Some(queued) => queued,
                None => break,
            };

            sink.send_acl(packet)
                .map_err(|e| Error::Transport(e.to_string()))?;

            self.acl.sent(handle);
        }

        Ok(())
    }

    /// Remove every trace of a closed connection
    ///
    /// Queued packets of the connection are freed and the controller buffers it held are counted
    /// as free again (the controller flushes them on disconnection).
    pub fn remove_connection<S>(&mut self, sink: &mut S, handle: ConnectionHandle) -> Result<(), Error>
    where
        S: ControllerSink,
    {
        let before = self.acl.queue.len();

        self.acl.queue.retain(|(queued, _)| *queued != handle);

        if before != self.acl.queue.len() {
            log::debug!(
                "dropped {} queued ACL packets of connection {}",
                before - self.acl.queue.len(),
                handle
            );
        }

        if let Some(in_flight) = self.acl.in_flight.remove(&handle) {
            self.acl.free = (self.acl.free + in_flight).min(self.acl.total);
        }

        self.flush_acl(sink)
    }

    /// Reject the outstanding command and drop every queued packet
    pub fn shutdown(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.resolver.resolve(Err(Error::Shutdown));
        }

        self.acl.queue.clear();
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use events::{CommandCompleteData, CommandStatusData, NumberOfCompletedPacketsData};

    /// A controller sink that records every packet sent to it
    #[derive(Default)]
    pub struct RecordingSink {
        pub commands: Vec<Vec<u8>>,
        pub acl: Vec<Vec<u8>>,
    }

    impl ControllerSink for RecordingSink {
        type Error = core::convert::Infallible;

        fn send_command(&mut self, packet: PacketChain) -> Result<(), Self::Error> {
            self.commands.push(packet.to_vec());

            Ok(())
        }

        fn send_acl(&mut self, packet: PacketChain) -> Result<(), Self::Error> {
            self.acl.push(packet.to_vec());

            Ok(())
        }
    }

    fn transport() -> (Transport, RecordingSink, BufferPool) {
        (
            Transport::new(Duration::from_secs(2), 27, 2),
            RecordingSink::default(),
            BufferPool::new(64, 8, 8),
        )
    }

    fn complete(opcode: Opcode, return_parameter: Vec<u8>) -> Event {
        Event::CommandComplete(CommandCompleteData {
            number_of_hci_command_packets: 1,
            command_opcode: opcode,
            return_parameter,
        })
    }

    #[test]
    fn command_packet_format() {
        let (mut transport, mut sink, pool) = transport();

        let _pending = transport
            .send_command(&mut sink, &pool, Opcode::DISCONNECT, &[0x05, 0x00, 0x13], Instant::now())
            .unwrap();

        assert_eq!(vec![vec![0x06, 0x04, 0x03, 0x05, 0x00, 0x13]], sink.commands);
    }

    #[test]
    fn second_command_is_busy() {
        let (mut transport, mut sink, pool) = transport();

        let now = Instant::now();

        let mut first = transport
            .send_command(&mut sink, &pool, Opcode::RESET, &[], now)
            .unwrap();

        assert_eq!(
            Err(Error::Busy),
            transport
                .send_command(&mut sink, &pool, Opcode::from(0x2006), &[0; 15], now)
                .map(|_| ())
        );

        assert_eq!(
            Ok(None),
            transport.process_event(&mut sink, complete(Opcode::RESET, vec![0x00]))
        );

        assert_eq!(
            Some(Ok(CommandReturn::Complete {
                opcode: Opcode::RESET,
                return_parameter: Vec::new()
            })),
            first.try_take()
        );

        assert!(transport
            .send_command(&mut sink, &pool, Opcode::from(0x2006), &[0; 15], now)
            .is_ok());
    }

    #[test]
    fn error_status_resolves_with_code() {
        let (mut transport, mut sink, pool) = transport();

        let mut pending = transport
            .send_command(&mut sink, &pool, Opcode::LE_CREATE_CONNECTION, &[0; 25], Instant::now())
            .unwrap();

        let status = Event::CommandStatus(CommandStatusData {
            status: error::Error::CommandDisallowed,
            number_of_hci_command_packets: 1,
            command_opcode: Opcode::LE_CREATE_CONNECTION,
        });

        transport.process_event(&mut sink, status).unwrap();

        assert_eq!(
            Some(Err(Error::Hci(error::Error::CommandDisallowed))),
            pending.try_take()
        );
        assert!(!transport.is_command_pending());
    }

    #[test]
    fn timeout_is_fatal() {
        let (mut transport, mut sink, pool) = transport();

        let now = Instant::now();

        let mut pending = transport
            .send_command(&mut sink, &pool, Opcode::RESET, &[], now)
            .unwrap();

        assert_eq!(Ok(()), transport.check_timeout(now + Duration::from_secs(1)));
        assert_eq!(
            Err(Error::ControllerTimeout),
            transport.check_timeout(now + Duration::from_secs(2))
        );
        assert_eq!(Some(Err(Error::ControllerTimeout)), pending.try_take());
        assert!(transport.is_faulted());
        assert_eq!(
            Err(Error::ControllerTimeout),
            transport
                .send_command(&mut sink, &pool, Opcode::RESET, &[], now)
                .map(|_| ())
        );
    }

    #[test]
    fn acl_waits_for_controller_buffers() {
        let (mut transport, mut sink, pool) = transport();

        let handle = ConnectionHandle::try_from(1).unwrap();

        for i in 0..3u8 {
            let packet = pool.allocate_with(&[i]).unwrap();

            transport.send_acl(&mut sink, handle, packet).unwrap();
        }

        assert_eq!(2, sink.acl.len());
        assert_eq!(1, transport.queued_acl_packets());

        let completed = Event::NumberOfCompletedPackets(NumberOfCompletedPacketsData {
            completed: vec![(handle, 1)],
        });

        transport.process_event(&mut sink, completed).unwrap();

        assert_eq!(vec![vec![0], vec![1], vec![2]], sink.acl);
        assert_eq!(0, transport.queued_acl_packets());
    }

    #[test]
    fn removed_connection_frees_queue() {
        let (mut transport, mut sink, pool) = transport();

        let handle = ConnectionHandle::try_from(5).unwrap();

        for _ in 0..4 {
            let packet = pool.allocate_with(&[0xAA]).unwrap();

            transport.send_acl(&mut sink, handle, packet).unwrap();
        }

        assert_eq!(2, pool.in_use());

        transport.remove_connection(&mut sink, handle).unwrap();

        assert_eq!(0, pool.in_use());
        assert_eq!(0, transport.queued_acl_packets());
    }
}
