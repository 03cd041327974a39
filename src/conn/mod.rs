//! Connection manager
//!
//! The connection manager keeps a record for every open connection, keyed by the connection
//! handle the controller assigned. A record owns everything that is per connection: the L2CAP
//! reassembler, both attribute protocol bearers, the running GATT client procedure, and the
//! indication slot of the GATT server.
//!
//! ```text
//! Connecting --connection complete--> Connected --disconnect--> Disconnecting
//!                                         |                          |
//!                                         +---disconnection complete-+--> Closed
//! ```
//!
//! When a connection closes its record is removed. Every operation that was still pending on the
//! connection is resolved with `ConnectionLost` and every buffer the record held is returned to
//! the pool.

use crate::att::client::{ClientBearer, TransactionState};
use crate::att::pdu::Pdu;
use crate::att::server::ServerBearer;
use crate::config::HostConfig;
use crate::diag::{Counter, HostCounters};
use crate::gatt::client::{self, ActiveProcedure, Procedure};
use crate::gatt::server::IndicationSlot;
use crate::hci::events::{LeConnectionCompleteData, LeConnectionUpdateCompleteData, LeRole};
use crate::hci::{self, ConnectionHandle};
use crate::l2cap::Reassembler;
use crate::pending::{self, Pending, Resolver};
use crate::Error;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnecting,
    Closed,
}

/// The address of a peer device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    /// The LE address type (public, random, etc.)
    pub address_type: u8,
    pub address: [u8; 6],
}

/// The connection parameters in use
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionTiming {
    /// Connection interval, in units of 1.25ms
    pub interval: u16,
    pub latency: u16,
    /// Supervision timeout, in units of 10ms
    pub supervision_timeout: u16,
}

/// A connection
pub struct Connection {
    handle: ConnectionHandle,
    role: LeRole,
    peer: PeerAddress,
    state: ConnectionState,
    timing: ConnectionTiming,
    pub(crate) reassembler: Reassembler,
    pub(crate) client: ClientBearer,
    pub(crate) server: ServerBearer,
    procedure: Option<Box<dyn ActiveProcedure>>,
    pub(crate) indication: IndicationSlot,
    disconnect: Option<Resolver<()>>,
    parameter_update: Option<Resolver<ConnectionTiming>>,
    /// The identifier of the parameter update request sent on the signaling channel
    pub(crate) signal_request: Option<u8>,
    last_signal_identifier: u8,
}

impl Connection {
    fn new(data: &LeConnectionCompleteData, att_timeout: Duration, server_mtu: u16, prepare_queue_limit: usize) -> Self {
        let mut server = ServerBearer::new(server_mtu);

        server.set_prepare_queue_limit(prepare_queue_limit);

        Connection {
            handle: data.connection_handle,
            role: data.role,
            peer: PeerAddress {
                address_type: data.peer_address_type,
                address: data.peer_address,
            },
            state: ConnectionState::Connected,
            timing: ConnectionTiming {
                interval: data.connection_interval,
                latency: data.peripheral_latency,
                supervision_timeout: data.supervision_timeout,
            },
            reassembler: Reassembler::new(),
            client: ClientBearer::new(att_timeout),
            server,
            procedure: None,
            indication: IndicationSlot::new(att_timeout),
            disconnect: None,
            parameter_update: None,
            signal_request: None,
            last_signal_identifier: 0,
        }
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    pub fn role(&self) -> LeRole {
        self.role
    }

    pub fn peer(&self) -> PeerAddress {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn timing(&self) -> ConnectionTiming {
        self.timing
    }

    /// The ATT MTU of the connection
    pub fn mtu(&self) -> u16 {
        self.client.mtu()
    }

    pub(crate) fn set_mtu(&mut self, mtu: u16) {
        log::debug!("ATT MTU of connection {} is {}", self.handle, mtu);

        self.client.set_mtu(mtu)
    }

    /// Check if a GATT client procedure is running
    pub fn is_procedure_running(&self) -> bool {
        self.procedure.is_some()
    }

    /// The earliest deadline of the connection's outstanding transaction and indication
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.client.deadline(), self.indication.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub(crate) fn next_signal_identifier(&mut self) -> u8 {
        // zero is not a valid identifier
        self.last_signal_identifier = self.last_signal_identifier.checked_add(1).unwrap_or(1);

        self.last_signal_identifier
    }

    pub(crate) fn check_connected(&self) -> Result<(), Error> {
        match self.state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnecting => Err(Error::InvalidParameter("the connection is disconnecting")),
            _ => Err(Error::ConnectionLost),
        }
    }

    /// Start a GATT client procedure
    ///
    /// The first request of the procedure is returned for sending, it is already the outstanding
    /// transaction of the client bearer. No request is returned when the procedure finished
    /// without one.
    ///
    /// # Error
    /// `Busy` if a procedure is already running on the connection
    pub(crate) fn start_procedure<P>(&mut self, procedure: P, now: Instant) -> Result<(Pending<P::Output>, Option<Vec<u8>>), Error>
    where
        P: Procedure + 'static,
    {
        self.check_connected()?;

        if self.procedure.is_some() || self.client.state() == TransactionState::RequestSent {
            return Err(Error::Busy);
        }

        match client::start(procedure, self.mtu()) {
            (None, pending) => Ok((pending, None)),
            (Some((active, request)), pending) => match self.client.send_request(&request, now) {
                Ok(raw) => {
                    self.procedure = Some(active);

                    Ok((pending, Some(raw)))
                }
                Err(e) => {
                    active.fail(e.clone());

                    Err(e)
                }
            },
        }
    }

    /// Advance the running procedure with the outcome of its transaction
    ///
    /// The next request of the procedure is returned for sending.
    pub(crate) fn advance_procedure(&mut self, outcome: Result<Pdu, Error>, now: Instant) -> Option<Vec<u8>> {
        let mtu = self.mtu();

        let procedure = match self.procedure.as_mut() {
            Some(procedure) => procedure,
            None => {
                log::debug!("dropped transaction outcome, no procedure is running on {}", self.handle);

                return None;
            }
        };

        let request = match procedure.advance(outcome, mtu) {
            Some(request) => request,
            None => {
                self.procedure = None;

                return None;
            }
        };

        match self.client.send_request(&request, now) {
            Ok(raw) => Some(raw),
            Err(e) => {
                self.abort_procedure(e);

                None
            }
        }
    }

    /// End the running procedure with an error
    pub(crate) fn abort_procedure(&mut self, err: Error) {
        self.client.close();

        if let Some(procedure) = self.procedure.take() {
            log::debug!("procedure on connection {} failed: {}", self.handle, err);

            procedure.fail(err)
        }
    }

    pub(crate) fn begin_parameter_update(&mut self) -> Result<Pending<ConnectionTiming>, Error> {
        if self.parameter_update.is_some() {
            return Err(Error::Busy);
        }

        let (resolver, pending) = pending::pending();

        self.parameter_update = Some(resolver);

        Ok(pending)
    }

    pub(crate) fn is_parameter_update_pending(&self) -> bool {
        self.parameter_update.is_some()
    }

    pub(crate) fn fail_parameter_update(&mut self, err: Error) {
        self.signal_request = None;

        if let Some(resolver) = self.parameter_update.take() {
            resolver.resolve(Err(err))
        }
    }

    /// Process a *LE Connection Update Complete* event
    ///
    /// The new parameters are returned if the update succeeded.
    pub(crate) fn on_update_complete(&mut self, data: &LeConnectionUpdateCompleteData) -> Option<ConnectionTiming> {
        self.signal_request = None;

        if data.status != hci::error::Error::NoError {
            log::info!("connection update of {} failed: {}", self.handle, data.status);

            self.fail_parameter_update(Error::Hci(data.status));

            return None;
        }

        self.timing = ConnectionTiming {
            interval: data.connection_interval,
            latency: data.peripheral_latency,
            supervision_timeout: data.supervision_timeout,
        };

        if let Some(resolver) = self.parameter_update.take() {
            resolver.resolve(Ok(self.timing))
        }

        Some(self.timing)
    }

    fn close(mut self, err: Error) {
        self.state = ConnectionState::Closed;

        self.reassembler.clear();
        self.server.clear();

        self.abort_procedure(err.clone());

        self.indication.close(err.clone());

        self.fail_parameter_update(err.clone());

        if let Some(resolver) = self.disconnect.take() {
            resolver.resolve(Err(err))
        }
    }
}

struct PendingConnect {
    peer: PeerAddress,
    resolver: Resolver<ConnectionHandle>,
}

/// The connections of the host
pub struct ConnectionManager {
    connections: BTreeMap<ConnectionHandle, Connection>,
    connecting: Option<PendingConnect>,
    max_connections: usize,
    att_timeout: Duration,
    server_mtu: u16,
    prepare_queue_limit: usize,
    counters: Arc<HostCounters>,
}

impl ConnectionManager {
    pub fn new(config: &HostConfig, counters: Arc<HostCounters>) -> Self {
        ConnectionManager {
            connections: BTreeMap::new(),
            connecting: None,
            max_connections: config.max_connections,
            att_timeout: config.att_timeout(),
            server_mtu: config.preferred_mtu,
            prepare_queue_limit: config.prepare_queue_limit,
            counters,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn is_connecting(&self) -> bool {
        self.connecting.is_some()
    }

    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.connections.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> + '_ {
        self.connections.values()
    }

    pub fn get(&self, handle: ConnectionHandle) -> Result<&Connection, Error> {
        self.connections.get(&handle).ok_or(Error::UnknownConnection(handle))
    }

    pub(crate) fn get_mut(&mut self, handle: ConnectionHandle) -> Result<&mut Connection, Error> {
        self.connections.get_mut(&handle).ok_or(Error::UnknownConnection(handle))
    }

    /// Check that another connection can be created
    ///
    /// # Error
    /// `Busy` if a connection is already being created or the maximum number of connections is
    /// reached
    pub fn check_can_connect(&self) -> Result<(), Error> {
        if self.connecting.is_some() || self.connections.len() >= self.max_connections {
            Err(Error::Busy)
        } else {
            Ok(())
        }
    }

    /// Register the connection being created by the controller
    pub(crate) fn begin_connect(&mut self, peer: PeerAddress) -> Pending<ConnectionHandle> {
        let (resolver, pending) = pending::pending();

        if let Some(stale) = self.connecting.replace(PendingConnect { peer, resolver }) {
            stale.resolver.resolve(Err(Error::Busy))
        }

        pending
    }

    /// Fail the connection being created
    pub(crate) fn fail_connect(&mut self, err: Error) {
        if let Some(connect) = self.connecting.take() {
            log::info!("connecting to {:x?} failed: {}", connect.peer.address, err);

            connect.resolver.resolve(Err(err))
        }
    }

    /// Process a *LE Connection Complete* event
    ///
    /// The handle of the new connection is returned. A failed status fails the connection being
    /// created by this host.
    pub(crate) fn on_connection_complete(&mut self, data: &LeConnectionCompleteData) -> Option<ConnectionHandle> {
        if data.status != hci::error::Error::NoError {
            self.fail_connect(Error::Hci(data.status));

            return None;
        }

        let handle = data.connection_handle;

        if data.role == LeRole::Central {
            match self.connecting.take() {
                Some(connect) => connect.resolver.resolve(Ok(handle)),
                None => log::warn!("connection {} as central was not created by this host", handle),
            }
        }

        let connection = Connection::new(data, self.att_timeout, self.server_mtu, self.prepare_queue_limit);

        if let Some(stale) = self.connections.insert(handle, connection) {
            log::warn!("controller reused the handle {} of an open connection", handle);

            stale.close(Error::ConnectionLost);
        }

        log::info!("connection {} established as {:?}", handle, data.role);

        self.counters.increment(Counter::ConnectionsEstablished);

        Some(handle)
    }

    /// Mark a connection as disconnecting
    ///
    /// The returned `Pending` resolves when the controller reports the disconnection.
    pub(crate) fn begin_disconnect(&mut self, handle: ConnectionHandle) -> Result<Pending<()>, Error> {
        let connection = self.get_mut(handle)?;

        connection.check_connected()?;

        let (resolver, pending) = pending::pending();

        connection.state = ConnectionState::Disconnecting;
        connection.disconnect = Some(resolver);

        Ok(pending)
    }

    /// Return a disconnecting connection to connected because the disconnect failed
    pub(crate) fn fail_disconnect(&mut self, handle: ConnectionHandle, err: Error) {
        if let Ok(connection) = self.get_mut(handle) {
            if connection.state == ConnectionState::Disconnecting {
                connection.state = ConnectionState::Connected;
            }

            if let Some(resolver) = connection.disconnect.take() {
                resolver.resolve(Err(err))
            }
        }
    }

    /// Remove a closed connection
    ///
    /// Everything pending on the connection is failed with `ConnectionLost`, except the
    /// disconnect requested by this host which succeeds. `false` is returned if there was no
    /// connection with the handle.
    pub(crate) fn on_disconnection_complete(&mut self, handle: ConnectionHandle) -> bool {
        match self.connections.remove(&handle) {
            Some(mut connection) => {
                log::info!("connection {} closed", handle);

                if let Some(resolver) = connection.disconnect.take() {
                    resolver.resolve(Ok(()))
                }

                connection.close(Error::ConnectionLost);

                self.counters.increment(Counter::Disconnections);

                true
            }
            None => {
                log::warn!("disconnection of unknown connection {}", handle);

                false
            }
        }
    }

    /// Close every connection
    pub(crate) fn close_all(&mut self, err: Error) {
        self.fail_connect(err.clone());

        for (_, connection) in core::mem::take(&mut self.connections) {
            connection.close(err.clone())
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::gatt::client::{DiscoverPrimaryServices, ExchangeMtu};

    pub fn connection_complete(raw_handle: u16, role: LeRole) -> LeConnectionCompleteData {
        LeConnectionCompleteData {
            status: hci::error::Error::NoError,
            connection_handle: ConnectionHandle::try_from(raw_handle).unwrap(),
            role,
            peer_address_type: 0,
            peer_address: [1, 2, 3, 4, 5, 6],
            connection_interval: 0x0018,
            peripheral_latency: 0,
            supervision_timeout: 0x0048,
            central_clock_accuracy: 0,
        }
    }

    fn manager() -> ConnectionManager {
        ConnectionManager::new(&HostConfig::default(), Arc::new(HostCounters::default()))
    }

    fn handle(raw: u16) -> ConnectionHandle {
        ConnectionHandle::try_from(raw).unwrap()
    }

    #[test]
    fn connect_resolves_with_handle() {
        let mut manager = manager();

        let peer = PeerAddress {
            address_type: 0,
            address: [1, 2, 3, 4, 5, 6],
        };

        let mut pending = manager.begin_connect(peer);

        assert_eq!(Err(Error::Busy), manager.check_can_connect());

        manager.on_connection_complete(&connection_complete(5, LeRole::Central));

        assert_eq!(Some(Ok(handle(5))), pending.try_take());
        assert_eq!(ConnectionState::Connected, manager.get(handle(5)).unwrap().state());
        assert_eq!(Ok(()), manager.check_can_connect());
    }

    #[test]
    fn failed_connect() {
        let mut manager = manager();

        let mut pending = manager.begin_connect(PeerAddress {
            address_type: 1,
            address: [0; 6],
        });

        let mut data = connection_complete(0, LeRole::Central);

        data.status = hci::error::Error::ConnectionFailedToBeEstablished;

        assert_eq!(None, manager.on_connection_complete(&data));
        assert_eq!(
            Some(Err(Error::Hci(hci::error::Error::ConnectionFailedToBeEstablished))),
            pending.try_take()
        );
        assert!(manager.is_empty());
    }

    #[test]
    fn close_fails_everything_pending() {
        let mut manager = manager();

        let now = Instant::now();

        manager.on_connection_complete(&connection_complete(5, LeRole::Central));

        let connection = manager.get_mut(handle(5)).unwrap();

        let (mut discovery, request) = connection.start_procedure(DiscoverPrimaryServices::all(), now).unwrap();

        assert!(request.is_some());
        assert_eq!(
            Some(Error::Busy),
            connection.start_procedure(ExchangeMtu::new(100), now).err()
        );

        let mut indication = connection.indication.begin(3, now).unwrap();

        let mut disconnect = manager.begin_disconnect(handle(5)).unwrap();

        assert!(manager.on_disconnection_complete(handle(5)));

        assert_eq!(Some(Err(Error::ConnectionLost)), discovery.try_take());
        assert_eq!(Some(Err(Error::ConnectionLost)), indication.try_take());
        assert_eq!(Some(Ok(())), disconnect.try_take());
        assert_eq!(Some(Error::UnknownConnection(handle(5))), manager.get(handle(5)).err());
        assert!(!manager.on_disconnection_complete(handle(5)));
    }

    #[test]
    fn disconnect_twice() {
        let mut manager = manager();

        manager.on_connection_complete(&connection_complete(1, LeRole::Peripheral));

        let _disconnect = manager.begin_disconnect(handle(1)).unwrap();

        assert!(manager.begin_disconnect(handle(1)).is_err());

        manager.fail_disconnect(handle(1), Error::Hci(hci::error::Error::CommandDisallowed));

        assert_eq!(ConnectionState::Connected, manager.get(handle(1)).unwrap().state());
    }

    #[test]
    fn signal_identifiers_skip_zero() {
        let mut manager = manager();

        manager.on_connection_complete(&connection_complete(1, LeRole::Peripheral));

        let connection = manager.get_mut(handle(1)).unwrap();

        connection.last_signal_identifier = u8::MAX;

        assert_eq!(1, connection.next_signal_identifier());
    }
}
