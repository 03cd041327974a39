//! GATT client procedures
//!
//! Every client procedure is a state machine that produces attribute protocol requests and
//! consumes their outcomes. A procedure is started with [`Procedure::start`], and each outcome of
//! the request it returned is fed back with [`Procedure::on_outcome`] until the procedure is done.
//!
//! ```text
//! start ──Request──▶ (transaction) ──outcome──▶ on_outcome ──Request──▶ ...
//!                                                   │
//!                                                   └──Done(result)
//! ```
//!
//! The procedures do not send anything themselves, the host owns the connection's client bearer
//! and runs one procedure per connection at a time.
//!
//! # Discovery
//! Discovery procedures search a handle range. A response only carries entries of one length, so a
//! short response does not mean the search is over. After every response the procedure continues
//! after its last handle, discovery is finished once the end of the range is reached or the server
//! responds with `AttributeNotFound`.

use super::characteristic::{ClientConfiguration, Declaration, Properties};
use super::{CHARACTERISTIC_TYPE, PRIMARY_SERVICE_TYPE};
use crate::att::pdu::{self, HandleRange, Pdu};
use crate::att::{TransferFormatInto, TransferFormatTryFrom, MIN_ATT_MTU};
use crate::pending::{self, Pending, Resolver};
use crate::{Error, Uuid};

/// The largest value of an attribute
pub const MAX_ATTRIBUTE_LEN: usize = 512;

/// The next step of a procedure
#[derive(Debug, PartialEq)]
pub enum Step<T> {
    /// Send this request and feed its outcome back to the procedure
    Request(Pdu),
    /// The procedure is finished
    Done(Result<T, Error>),
}

/// A GATT client procedure
pub trait Procedure {
    type Output;

    /// Start the procedure
    fn start(&mut self, mtu: u16) -> Step<Self::Output>;

    /// Process the outcome of the last request
    ///
    /// `mtu` is the ATT MTU of the connection at the time the outcome was received.
    fn on_outcome(&mut self, outcome: Result<Pdu, Error>, mtu: u16) -> Step<Self::Output>;
}

/// A started procedure with its output type erased
pub(crate) trait ActiveProcedure {
    /// Advance the procedure with the outcome of its last request
    ///
    /// The next request is returned, or `None` once the procedure is finished and its result was
    /// delivered.
    fn advance(&mut self, outcome: Result<Pdu, Error>, mtu: u16) -> Option<Pdu>;

    /// End the procedure with an error
    fn fail(self: Box<Self>, err: Error);
}

struct Driver<P: Procedure> {
    procedure: P,
    resolver: Option<Resolver<P::Output>>,
}

impl<P: Procedure> ActiveProcedure for Driver<P> {
    fn advance(&mut self, outcome: Result<Pdu, Error>, mtu: u16) -> Option<Pdu> {
        match self.procedure.on_outcome(outcome, mtu) {
            Step::Request(pdu) => Some(pdu),
            Step::Done(result) => {
                if let Some(resolver) = self.resolver.take() {
                    resolver.resolve(result)
                }

                None
            }
        }
    }

    fn fail(self: Box<Self>, err: Error) {
        if let Some(resolver) = self.resolver {
            resolver.resolve(Err(err))
        }
    }
}

/// Start a procedure
///
/// The active procedure and its first request are returned, unless the procedure finished
/// without sending anything (its result is already in the `Pending`).
pub(crate) fn start<P>(mut procedure: P, mtu: u16) -> (Option<(Box<dyn ActiveProcedure>, Pdu)>, Pending<P::Output>)
where
    P: Procedure + 'static,
{
    let (resolver, pending) = pending::pending();

    match procedure.start(mtu) {
        Step::Request(request) => {
            let driver = Driver {
                procedure,
                resolver: Some(resolver),
            };

            (Some((Box::new(driver), request)), pending)
        }
        Step::Done(outcome) => {
            resolver.resolve(outcome);

            (None, pending)
        }
    }
}

fn unexpected<T>(pdu: &Pdu) -> Step<T> {
    Step::Done(Err(Error::Decode(format!(
        "procedure received unexpected PDU {:#x}",
        pdu.raw_opcode()
    ))))
}

/// The position of a discovery within its handle range
#[derive(Clone, Copy, Debug)]
struct Cursor {
    next: u16,
    end: u16,
}

impl Cursor {
    fn new(start: u16, end: u16) -> Self {
        Cursor { next: start, end }
    }

    fn range(&self) -> HandleRange {
        HandleRange {
            starting_handle: self.next,
            ending_handle: self.end,
        }
    }

    fn is_empty(&self) -> bool {
        self.next == pdu::INVALID_HANDLE || self.next > self.end
    }

    /// Move the cursor past the last handle of a response
    ///
    /// `Ok(true)` is returned if the discovery should continue.
    fn advance(&mut self, last: u16) -> Result<bool, Error> {
        if last < self.next {
            return Err(Error::Decode(format!(
                "discovery response ended at handle {:#x}, before the start of the search {:#x}",
                last, self.next
            )));
        }

        if last >= self.end {
            return Ok(false);
        }

        self.next = last + 1;

        Ok(true)
    }
}

/// A service discovered on a server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Service {
    pub handle: u16,
    pub end_handle: u16,
    pub uuid: Uuid,
}

/// Discover the primary services of a server
pub struct DiscoverPrimaryServices {
    uuid: Option<Uuid>,
    cursor: Cursor,
    found: Vec<Service>,
}

impl DiscoverPrimaryServices {
    /// Discover all primary services
    pub fn all() -> Self {
        DiscoverPrimaryServices {
            uuid: None,
            cursor: Cursor::new(1, 0xFFFF),
            found: Vec::new(),
        }
    }

    /// Discover the primary services with a specific UUID
    pub fn by_uuid(uuid: Uuid) -> Self {
        DiscoverPrimaryServices {
            uuid: Some(uuid),
            ..Self::all()
        }
    }

    fn request(&self) -> Pdu {
        match self.uuid {
            None => Pdu::ReadByGroupTypeRequest {
                range: self.cursor.range(),
                group_type: PRIMARY_SERVICE_TYPE,
            },
            Some(uuid) => Pdu::FindByTypeValueRequest {
                range: self.cursor.range(),
                attribute_type: 0x2800,
                value: uuid.into_bytes(),
            },
        }
    }

    fn next(&mut self, last: u16) -> Step<Vec<Service>> {
        match self.cursor.advance(last) {
            Ok(true) => Step::Request(self.request()),
            Ok(false) => Step::Done(Ok(core::mem::take(&mut self.found))),
            Err(e) => Step::Done(Err(e)),
        }
    }
}

impl Procedure for DiscoverPrimaryServices {
    type Output = Vec<Service>;

    fn start(&mut self, _: u16) -> Step<Self::Output> {
        Step::Request(self.request())
    }

    fn on_outcome(&mut self, outcome: Result<Pdu, Error>, _: u16) -> Step<Self::Output> {
        match (outcome, self.uuid) {
            (Ok(Pdu::ReadByGroupTypeResponse(entries)), None) => {
                let last = match entries.last() {
                    Some(entry) => entry.end_group_handle,
                    None => return Step::Done(Ok(core::mem::take(&mut self.found))),
                };

                for entry in entries.iter() {
                    let uuid = match <Uuid as TransferFormatTryFrom>::try_from(&entry.value) {
                        Ok(uuid) => uuid,
                        Err(e) => return Step::Done(Err(e.into())),
                    };

                    self.found.push(Service {
                        handle: entry.handle,
                        end_handle: entry.end_group_handle,
                        uuid,
                    })
                }

                self.next(last)
            }
            (Ok(Pdu::FindByTypeValueResponse(entries)), Some(uuid)) => {
                let last = match entries.last() {
                    Some(entry) => entry.group_end_handle,
                    None => return Step::Done(Ok(core::mem::take(&mut self.found))),
                };

                self.found.extend(entries.iter().map(|entry| Service {
                    handle: entry.handle,
                    end_handle: entry.group_end_handle,
                    uuid,
                }));

                self.next(last)
            }
            (Err(e), _) if e.is_attribute_not_found() => Step::Done(Ok(core::mem::take(&mut self.found))),
            (Err(e), _) => Step::Done(Err(e)),
            (Ok(other), _) => unexpected(&other),
        }
    }
}

/// A characteristic discovered on a server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Characteristic {
    pub declaration_handle: u16,
    pub value_handle: u16,
    pub properties: Vec<Properties>,
    pub uuid: Uuid,
    /// The last handle of the characteristic
    pub end_handle: u16,
}

/// Discover all characteristics of a service
pub struct DiscoverCharacteristics {
    cursor: Cursor,
    found: Vec<Characteristic>,
}

impl DiscoverCharacteristics {
    pub fn new(service: &Service) -> Self {
        DiscoverCharacteristics {
            cursor: Cursor::new(service.handle.saturating_add(1), service.end_handle),
            found: Vec::new(),
        }
    }

    fn request(&self) -> Pdu {
        Pdu::ReadByTypeRequest {
            range: self.cursor.range(),
            attribute_type: CHARACTERISTIC_TYPE,
        }
    }

    /// The end of a characteristic is the handle before the next declaration
    fn finish(&mut self) -> Step<Vec<Characteristic>> {
        let mut found = core::mem::take(&mut self.found);

        let next_declarations: Vec<u16> = found.iter().skip(1).map(|c| c.declaration_handle).collect();

        for (characteristic, next) in found.iter_mut().zip(next_declarations) {
            characteristic.end_handle = next - 1;
        }

        Step::Done(Ok(found))
    }
}

impl Procedure for DiscoverCharacteristics {
    type Output = Vec<Characteristic>;

    fn start(&mut self, _: u16) -> Step<Self::Output> {
        if self.cursor.is_empty() {
            Step::Done(Ok(Vec::new()))
        } else {
            Step::Request(self.request())
        }
    }

    fn on_outcome(&mut self, outcome: Result<Pdu, Error>, _: u16) -> Step<Self::Output> {
        match outcome {
            Ok(Pdu::ReadByTypeResponse(entries)) => {
                let last = match entries.last() {
                    Some(entry) => entry.handle,
                    None => return self.finish(),
                };

                for entry in entries.iter() {
                    let declaration = match <Declaration as TransferFormatTryFrom>::try_from(&entry.value) {
                        Ok(declaration) => declaration,
                        Err(e) => return Step::Done(Err(e.into())),
                    };

                    self.found.push(Characteristic {
                        declaration_handle: entry.handle,
                        value_handle: declaration.value_handle,
                        properties: declaration.properties,
                        uuid: declaration.uuid,
                        end_handle: self.cursor.end,
                    })
                }

                match self.cursor.advance(last) {
                    Ok(true) => Step::Request(self.request()),
                    Ok(false) => self.finish(),
                    Err(e) => Step::Done(Err(e)),
                }
            }
            Err(e) if e.is_attribute_not_found() => self.finish(),
            Err(e) => Step::Done(Err(e)),
            Ok(other) => unexpected(&other),
        }
    }
}

/// A characteristic descriptor discovered on a server
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Descriptor {
    pub handle: u16,
    pub uuid: Uuid,
}

/// Discover all descriptors of a characteristic
pub struct DiscoverDescriptors {
    cursor: Cursor,
    found: Vec<Descriptor>,
}

impl DiscoverDescriptors {
    pub fn new(characteristic: &Characteristic) -> Self {
        DiscoverDescriptors {
            cursor: Cursor::new(characteristic.value_handle.saturating_add(1), characteristic.end_handle),
            found: Vec::new(),
        }
    }
}

impl Procedure for DiscoverDescriptors {
    type Output = Vec<Descriptor>;

    fn start(&mut self, _: u16) -> Step<Self::Output> {
        if self.cursor.is_empty() {
            Step::Done(Ok(Vec::new()))
        } else {
            Step::Request(Pdu::FindInformationRequest(self.cursor.range()))
        }
    }

    fn on_outcome(&mut self, outcome: Result<Pdu, Error>, _: u16) -> Step<Self::Output> {
        match outcome {
            Ok(Pdu::FindInformationResponse(entries)) => {
                let last = match entries.last() {
                    Some(entry) => entry.handle,
                    None => return Step::Done(Ok(core::mem::take(&mut self.found))),
                };

                self.found.extend(entries.iter().map(|entry| Descriptor {
                    handle: entry.handle,
                    uuid: entry.uuid,
                }));

                match self.cursor.advance(last) {
                    Ok(true) => Step::Request(Pdu::FindInformationRequest(self.cursor.range())),
                    Ok(false) => Step::Done(Ok(core::mem::take(&mut self.found))),
                    Err(e) => Step::Done(Err(e)),
                }
            }
            Err(e) if e.is_attribute_not_found() => Step::Done(Ok(core::mem::take(&mut self.found))),
            Err(e) => Step::Done(Err(e)),
            Ok(other) => unexpected(&other),
        }
    }
}

/// Read the value of a characteristic or descriptor
///
/// A value that fills the read response is followed up with read blob requests until the whole
/// value is read.
pub struct Read {
    handle: u16,
    value: Vec<u8>,
}

impl Read {
    pub fn new(handle: u16) -> Self {
        Read {
            handle,
            value: Vec::new(),
        }
    }
}

impl Procedure for Read {
    type Output = Vec<u8>;

    fn start(&mut self, _: u16) -> Step<Self::Output> {
        if pdu::is_valid_handle(self.handle) {
            Step::Request(Pdu::ReadRequest(self.handle))
        } else {
            Step::Done(Err(Error::InvalidParameter("attribute handle 0 is invalid")))
        }
    }

    fn on_outcome(&mut self, outcome: Result<Pdu, Error>, mtu: u16) -> Step<Self::Output> {
        let part = match outcome {
            Ok(Pdu::ReadResponse(part)) | Ok(Pdu::ReadBlobResponse(part)) => part,
            // the previous part was the exact end of the value
            Err(Error::Att(pdu::Error::AttributeNotLong)) | Err(Error::Att(pdu::Error::InvalidOffset))
                if !self.value.is_empty() =>
            {
                return Step::Done(Ok(core::mem::take(&mut self.value)))
            }
            Err(e) => return Step::Done(Err(e)),
            Ok(other) => return unexpected(&other),
        };

        let more = part.len() == usize::from(mtu) - 1;

        self.value.extend_from_slice(&part);

        if more && self.value.len() < MAX_ATTRIBUTE_LEN {
            Step::Request(Pdu::ReadBlobRequest {
                handle: self.handle,
                offset: self.value.len() as u16,
            })
        } else {
            Step::Done(Ok(core::mem::take(&mut self.value)))
        }
    }
}

/// Read the values of multiple attributes with one request
///
/// The values are concatenated in the response, the client must know their lengths to split them.
pub struct ReadMultiple {
    handles: Vec<u16>,
}

impl ReadMultiple {
    pub fn new(handles: Vec<u16>) -> Self {
        ReadMultiple { handles }
    }
}

impl Procedure for ReadMultiple {
    type Output = Vec<u8>;

    fn start(&mut self, mtu: u16) -> Step<Self::Output> {
        if self.handles.len() < 2 {
            Step::Done(Err(Error::InvalidParameter("read multiple requires at least two handles")))
        } else if 1 + 2 * self.handles.len() > usize::from(mtu) {
            Step::Done(Err(Error::InvalidParameter("too many handles for the ATT MTU")))
        } else {
            Step::Request(Pdu::ReadMultipleRequest(self.handles.clone()))
        }
    }

    fn on_outcome(&mut self, outcome: Result<Pdu, Error>, _: u16) -> Step<Self::Output> {
        match outcome {
            Ok(Pdu::ReadMultipleResponse(values)) => Step::Done(Ok(values)),
            Err(e) => Step::Done(Err(e)),
            Ok(other) => unexpected(&other),
        }
    }
}

#[derive(Debug)]
enum WriteState {
    Init,
    Writing,
    Preparing { offset: usize, len: usize },
    Cancelling(Error),
    Executing,
}

/// Write the value of a characteristic or descriptor
///
/// A value too large for a write request is written with prepared writes followed by an execute
/// write. Every prepared part echoed back by the server is checked against what was sent, on a
/// mismatch (or any error) the prepared writes are cancelled.
pub struct Write {
    handle: u16,
    value: Vec<u8>,
    state: WriteState,
}

impl Write {
    pub fn new(handle: u16, value: Vec<u8>) -> Self {
        Write {
            handle,
            value,
            state: WriteState::Init,
        }
    }

    /// Write the client characteristic configuration descriptor
    pub fn client_configuration(handle: u16, configuration: &[ClientConfiguration]) -> Self {
        Write::new(handle, configuration.to_vec().into_bytes())
    }

    fn prepare(&mut self, offset: usize, mtu: u16) -> Step<()> {
        if offset == self.value.len() {
            self.state = WriteState::Executing;

            return Step::Request(Pdu::ExecuteWriteRequest { execute: true });
        }

        let len = (usize::from(mtu) - 5).min(self.value.len() - offset);

        self.state = WriteState::Preparing { offset, len };

        Step::Request(Pdu::PrepareWriteRequest {
            handle: self.handle,
            offset: offset as u16,
            value: self.value[offset..offset + len].to_vec(),
        })
    }

    fn cancel(&mut self, err: Error) -> Step<()> {
        self.state = WriteState::Cancelling(err);

        Step::Request(Pdu::ExecuteWriteRequest { execute: false })
    }
}

impl Procedure for Write {
    type Output = ();

    fn start(&mut self, mtu: u16) -> Step<Self::Output> {
        if !pdu::is_valid_handle(self.handle) {
            return Step::Done(Err(Error::InvalidParameter("attribute handle 0 is invalid")));
        }

        if self.value.len() > MAX_ATTRIBUTE_LEN {
            return Step::Done(Err(Error::InvalidParameter("value is longer than 512 bytes")));
        }

        if self.value.len() <= usize::from(mtu) - 3 {
            self.state = WriteState::Writing;

            Step::Request(Pdu::WriteRequest {
                handle: self.handle,
                value: self.value.clone(),
            })
        } else {
            log::trace!("writing {} bytes to {:#x} with prepared writes", self.value.len(), self.handle);

            self.prepare(0, mtu)
        }
    }

    fn on_outcome(&mut self, outcome: Result<Pdu, Error>, mtu: u16) -> Step<Self::Output> {
        match core::mem::replace(&mut self.state, WriteState::Init) {
            WriteState::Writing | WriteState::Executing => match outcome {
                Ok(Pdu::WriteResponse) | Ok(Pdu::ExecuteWriteResponse) => Step::Done(Ok(())),
                Err(e) => Step::Done(Err(e)),
                Ok(other) => unexpected(&other),
            },
            WriteState::Preparing { offset, len } => match outcome {
                Ok(Pdu::PrepareWriteResponse {
                    handle,
                    offset: echoed_offset,
                    value,
                }) => {
                    if handle == self.handle
                        && usize::from(echoed_offset) == offset
                        && value[..] == self.value[offset..offset + len]
                    {
                        self.prepare(offset + len, mtu)
                    } else {
                        log::warn!("prepared write to {:#x} was not echoed back correctly", self.handle);

                        self.cancel(Error::Decode("prepared write response does not match the request".into()))
                    }
                }
                Err(e @ Error::Att(_)) => self.cancel(e),
                Err(e) => Step::Done(Err(e)),
                Ok(other) => self.cancel(Error::Decode(format!(
                    "expected a prepare write response, received {:#x}",
                    other.raw_opcode()
                ))),
            },
            WriteState::Cancelling(err) => {
                if let Err(e) = outcome {
                    log::debug!("cancelling prepared writes failed: {}", e);
                }

                Step::Done(Err(err))
            }
            WriteState::Init => Step::Done(Err(Error::InvalidParameter("write procedure was not started"))),
        }
    }
}

/// Exchange the ATT MTU with the server
///
/// The output is the MTU used by the connection afterwards.
pub struct ExchangeMtu {
    client_mtu: u16,
}

impl ExchangeMtu {
    pub fn new(client_mtu: u16) -> Self {
        ExchangeMtu { client_mtu }
    }
}

impl Procedure for ExchangeMtu {
    type Output = u16;

    fn start(&mut self, _: u16) -> Step<Self::Output> {
        if self.client_mtu < MIN_ATT_MTU {
            Step::Done(Err(Error::InvalidParameter("ATT MTU must be at least 23")))
        } else {
            Step::Request(Pdu::ExchangeMtuRequest(self.client_mtu))
        }
    }

    fn on_outcome(&mut self, outcome: Result<Pdu, Error>, _: u16) -> Step<Self::Output> {
        match outcome {
            Ok(Pdu::ExchangeMtuResponse(server_mtu)) => {
                Step::Done(Ok(self.client_mtu.min(server_mtu).max(MIN_ATT_MTU)))
            }
            Err(e) => Step::Done(Err(e)),
            Ok(other) => unexpected(&other),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::att::client::{ClientBearer, TRANSACTION_TIMEOUT};
    use crate::att::server::{Attribute, AttributeTable, ServerBearer};
    use crate::att::{FULL_PERMISSIONS, READ_ONLY};
    use crate::gatt::ServerBuilder;
    use quickcheck_macros::quickcheck;
    use std::time::Instant;

    /// Run a procedure against a server, returning the result and the number of requests sent
    fn run<P: Procedure>(mut procedure: P, table: &mut AttributeTable, mtu: u16) -> (Result<P::Output, Error>, usize) {
        let mut client = ClientBearer::new(TRANSACTION_TIMEOUT);

        let mut server = ServerBearer::new(mtu);

        client.set_mtu(mtu);

        let now = Instant::now();

        let mut requests = 0;

        let mut step = procedure.start(mtu);

        loop {
            match step {
                Step::Done(result) => return (result, requests),
                Step::Request(request) => {
                    requests += 1;

                    let raw = client.send_request(&request, now).unwrap();

                    let response = server.process_raw(table, &raw, mtu).response.unwrap();

                    let response = Pdu::try_from_bytes(&response.into_bytes()).unwrap();

                    let outcome = client.on_response(response).unwrap();

                    step = procedure.on_outcome(outcome, mtu);
                }
            }
        }
    }

    fn services(count: usize) -> AttributeTable {
        let mut builder = ServerBuilder::new();

        for i in 0..count {
            builder
                .new_service(Uuid::from_u16(0x1800 + i as u16), true)
                .add_characteristic(Uuid::from_u16(0x2A00 + i as u16))
                .set_properties(&[Properties::Read])
                .set_value(vec![i as u8])
                .complete_characteristic()
                .finish_service();
        }

        builder.make_table()
    }

    #[test]
    fn empty_server_has_no_services() {
        let (result, requests) = run(DiscoverPrimaryServices::all(), &mut AttributeTable::new(), 23);

        assert_eq!(Ok(vec![]), result);
        assert_eq!(1, requests);
    }

    /// Discovery visits every service once and terminates
    #[quickcheck]
    fn discovery_terminates(count: u8) -> bool {
        let count = usize::from(count % 40);

        let (result, requests) = run(DiscoverPrimaryServices::all(), &mut services(count), 23);

        let found = result.unwrap();

        // every service has 3 attributes
        let ranges_ok = found
            .iter()
            .enumerate()
            .all(|(i, s)| s.handle == 3 * i as u16 + 1 && s.end_handle == 3 * i as u16 + 3);

        // 3 services fit a response at the minimum MTU, the last request finds nothing
        found.len() == count && ranges_ok && requests <= count / 3 + 2
    }

    #[test]
    fn discovery_continues_past_a_change_of_uuid_length() {
        let custom_service = Uuid::from_u128(0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E);

        let custom_characteristic = Uuid::from_u128(0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E);

        let mut builder = ServerBuilder::new();

        builder
            .new_service(Uuid::from_u16(0x1800), true)
            .add_characteristic(Uuid::from_u16(0x2A00))
            .set_properties(&[Properties::Read])
            .complete_characteristic()
            .add_characteristic(custom_characteristic)
            .set_properties(&[Properties::Read])
            .complete_characteristic()
            .finish_service();

        builder
            .new_service(custom_service, true)
            .add_characteristic(custom_characteristic)
            .set_properties(&[Properties::Write])
            .complete_characteristic()
            .finish_service();

        let mut table = builder.make_table();

        let (services, requests) = run(DiscoverPrimaryServices::all(), &mut table, 23);

        let services = services.unwrap();

        assert_eq!(
            vec![(1, 5, Uuid::from_u16(0x1800)), (6, 8, custom_service)],
            services
                .iter()
                .map(|s| (s.handle, s.end_handle, s.uuid))
                .collect::<Vec<_>>()
        );
        assert_eq!(3, requests);

        let (characteristics, _) = run(DiscoverCharacteristics::new(&services[0]), &mut table, 23);

        assert_eq!(
            vec![(2, 3, Uuid::from_u16(0x2A00)), (4, 5, custom_characteristic)],
            characteristics
                .unwrap()
                .iter()
                .map(|c| (c.declaration_handle, c.end_handle, c.uuid))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn discover_by_uuid() {
        let (result, _) = run(
            DiscoverPrimaryServices::by_uuid(Uuid::from_u16(0x1803)),
            &mut services(8),
            23,
        );

        let expected = Service {
            handle: 10,
            end_handle: 12,
            uuid: Uuid::from_u16(0x1803),
        };

        assert_eq!(Ok(vec![expected]), result);
    }

    #[test]
    fn discover_characteristics_and_descriptors() {
        let mut builder = ServerBuilder::new();

        builder
            .new_service(Uuid::from_u16(0x180D), true)
            .add_characteristic(Uuid::from_u16(0x2A37))
            .set_properties(&[Properties::Notify])
            .complete_characteristic()
            .add_characteristic(Uuid::from_u16(0x2A38))
            .set_properties(&[Properties::Read])
            .set_user_description("location")
            .complete_characteristic()
            .finish_service();

        let mut table = builder.make_table();

        let (services, _) = run(DiscoverPrimaryServices::all(), &mut table, 23);

        let service = services.unwrap()[0];

        let (characteristics, _) = run(DiscoverCharacteristics::new(&service), &mut table, 23);

        let characteristics = characteristics.unwrap();

        assert_eq!(2, characteristics.len());
        assert_eq!((2, 3, 4), {
            let c = &characteristics[0];
            (c.declaration_handle, c.value_handle, c.end_handle)
        });
        assert_eq!((5, 6, 7), {
            let c = &characteristics[1];
            (c.declaration_handle, c.value_handle, c.end_handle)
        });

        let (descriptors, _) = run(DiscoverDescriptors::new(&characteristics[0]), &mut table, 23);

        assert_eq!(
            Ok(vec![Descriptor {
                handle: 4,
                uuid: super::super::CLIENT_CHARACTERISTIC_CONFIGURATION_TYPE
            }]),
            descriptors
        );
    }

    #[test]
    fn long_read() {
        let mut table = AttributeTable::new();

        let value: Vec<u8> = (0..50).collect();

        table.push(Attribute::new(Uuid::from_u16(0x2A00), READ_ONLY, value.clone()));

        let (result, requests) = run(Read::new(1), &mut table, 23);

        assert_eq!(Ok(value), result);
        assert_eq!(3, requests);
    }

    #[test]
    fn read_exact_multiple_of_mtu() {
        let mut table = AttributeTable::new();

        let value = vec![7u8; 44];

        table.push(Attribute::new(Uuid::from_u16(0x2A00), READ_ONLY, value.clone()));

        let (result, requests) = run(Read::new(1), &mut table, 23);

        assert_eq!(Ok(value), result);
        assert_eq!(3, requests);
    }

    #[test]
    fn long_write() {
        let mut table = AttributeTable::new();

        table.push(Attribute::new(Uuid::from_u16(0x2A00), FULL_PERMISSIONS, vec![]));

        let value: Vec<u8> = (0..40).collect();

        let (result, requests) = run(Write::new(1, value.clone()), &mut table, 23);

        assert_eq!(Ok(()), result);
        // 3 prepared writes of at most 18 bytes and the execute write
        assert_eq!(4, requests);
        assert_eq!(&value[..], table.get(1).unwrap().get_value());
    }

    #[test]
    fn failed_long_write_is_cancelled() {
        let mut table = AttributeTable::new();

        table.push(Attribute::new(Uuid::from_u16(0x2A00), READ_ONLY, vec![]));

        let (result, requests) = run(Write::new(1, vec![1; 30]), &mut table, 23);

        assert_eq!(Err(Error::Att(pdu::Error::WriteNotPermitted)), result);
        assert_eq!(2, requests);
    }

    #[test]
    fn read_multiple_needs_two_handles() {
        let mut procedure = ReadMultiple::new(vec![1]);

        assert!(matches!(procedure.start(23), Step::Done(Err(Error::InvalidParameter(_)))));
    }

    #[test]
    fn exchange_mtu() {
        let (result, _) = run(ExchangeMtu::new(100), &mut AttributeTable::new(), 64);

        assert_eq!(Ok(64), result);
    }
}
