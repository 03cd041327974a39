//! Attribute Server
//!
//! The attributes of the server are kept in an [`AttributeTable`]. Handles are assigned in the
//! order attributes are pushed to the table, so attributes are always in a consecutive order
//! starting from handle 1.
//!
//! Every connection has its own [`ServerBearer`] to hold the per connection state of the server,
//! the queue of prepared writes. The bearer processes every request and command sent by the
//! client and produces the response to send back.
//!
//! # Data Blobbing
//! A value that does not fit within a single response is truncated to the largest size the MTU
//! allows. The client then reads the rest of the value with *Read Blob Requests*.

use super::pdu::{
    self, HandleRange, HandleWithType, Pdu, ReadGroupTypeData, ReadTypeData, TypeValueResponse,
};
use super::AttributePermissions;
use crate::Uuid;

/// The attribute types that group other attributes (primary and secondary service declarations)
pub const GROUPING_TYPES: [Uuid; 2] = [Uuid::from_u16(0x2800), Uuid::from_u16(0x2801)];

/// The most attributes a table holds, one for every valid handle
pub const MAX_ATTRIBUTES: usize = 0xFFFF;

/// The default limit of the prepared write queue
pub const DEFAULT_PREPARE_QUEUE_LIMIT: usize = 32;

/// An Attribute
///
/// An attribute contains an attribute type, permissions for accessing the attribute, and the
/// value. The handle of an attribute is its position within the [`AttributeTable`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribute {
    ty: Uuid,
    permissions: Vec<AttributePermissions>,
    value: Vec<u8>,
}

impl Attribute {
    /// Create an Attribute
    ///
    /// The input 'permissions' will have all duplicates removed.
    pub fn new(attribute_type: Uuid, permissions: &[AttributePermissions], value: Vec<u8>) -> Self {
        let mut permissions = permissions.to_vec();

        permissions.sort();
        permissions.dedup();

        Attribute {
            ty: attribute_type,
            permissions,
            value,
        }
    }

    pub fn get_uuid(&self) -> &Uuid {
        &self.ty
    }

    pub fn get_permissions(&self) -> &[AttributePermissions] {
        &self.permissions
    }

    pub fn get_value(&self) -> &[u8] {
        &self.value
    }

    pub fn set_value(&mut self, value: Vec<u8>) {
        self.value = value
    }

    pub fn is_readable(&self) -> bool {
        self.permissions.contains(&AttributePermissions::Read)
    }

    pub fn is_writable(&self) -> bool {
        self.permissions.contains(&AttributePermissions::Write)
    }
}

/// The attributes of a server
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AttributeTable {
    attributes: Vec<Attribute>,
}

impl AttributeTable {
    pub fn new() -> Self {
        AttributeTable::default()
    }

    /// Push an attribute onto the table
    ///
    /// The handle of the attribute is returned. Once the table holds [`MAX_ATTRIBUTES`] there is
    /// no handle left to give, the attribute is dropped and the invalid handle 0 is returned.
    pub fn push(&mut self, attribute: Attribute) -> u16 {
        if self.attributes.len() >= MAX_ATTRIBUTES {
            log::error!("attribute table is full, dropped attribute of type {}", attribute.get_uuid());

            return pdu::INVALID_HANDLE;
        }

        self.attributes.push(attribute);

        self.last_handle()
    }

    /// The handle of the last attribute, 0 if the table is empty
    pub fn last_handle(&self) -> u16 {
        u16::try_from(self.attributes.len()).unwrap_or(u16::MAX)
    }

    /// The handle the next pushed attribute gets, 0 if the table is full
    pub fn next_handle(&self) -> u16 {
        self.last_handle().checked_add(1).unwrap_or(pdu::INVALID_HANDLE)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn get(&self, handle: u16) -> Option<&Attribute> {
        usize::from(handle)
            .checked_sub(1)
            .and_then(|index| self.attributes.get(index))
    }

    pub fn get_mut(&mut self, handle: u16) -> Option<&mut Attribute> {
        usize::from(handle)
            .checked_sub(1)
            .and_then(move |index| self.attributes.get_mut(index))
    }

    /// Iterate over the handles and attributes within `range`
    pub fn iter_range(&self, range: HandleRange) -> impl Iterator<Item = (u16, &Attribute)> + '_ {
        self.attributes
            .iter()
            .enumerate()
            .map(|(index, attribute)| (index as u16 + 1, attribute))
            .skip_while(move |(handle, _)| *handle < range.starting_handle)
            .take_while(move |(handle, _)| *handle <= range.ending_handle)
    }

    /// Get the last handle of the group started by the attribute at `handle`
    ///
    /// A group lasts until the next grouping attribute or the end of the table.
    pub fn group_end(&self, handle: u16) -> u16 {
        self.iter_range(HandleRange {
            starting_handle: handle.saturating_add(1),
            ending_handle: 0xFFFF,
        })
        .find(|(_, attribute)| GROUPING_TYPES.contains(attribute.get_uuid()))
        .map(|(next, _)| next - 1)
        .unwrap_or_else(|| self.last_handle())
    }
}

/// The result of processing a client PDU
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Processed {
    /// The response to send to the client
    pub response: Option<Pdu>,
    /// The handles of the attributes whose value was written
    pub written: Vec<u16>,
    /// The new MTU of the connection, if it was exchanged
    pub mtu: Option<u16>,
}

impl Processed {
    fn respond(response: Pdu) -> Self {
        Processed {
            response: Some(response),
            ..Default::default()
        }
    }
}

#[derive(Debug)]
struct PreparedWrite {
    handle: u16,
    offset: u16,
    value: Vec<u8>,
}

/// The server side of the attribute protocol for one connection
pub struct ServerBearer {
    server_mtu: u16,
    prepare_queue: Vec<PreparedWrite>,
    prepare_queue_limit: usize,
}

impl ServerBearer {
    /// Create a new `ServerBearer`
    ///
    /// `server_mtu` is the MTU this server answers an *Exchange MTU Request* with.
    pub fn new(server_mtu: u16) -> Self {
        ServerBearer {
            server_mtu,
            prepare_queue: Vec::new(),
            prepare_queue_limit: DEFAULT_PREPARE_QUEUE_LIMIT,
        }
    }

    pub fn set_prepare_queue_limit(&mut self, limit: usize) {
        self.prepare_queue_limit = limit
    }

    /// Drop every prepared write
    pub fn clear(&mut self) {
        self.prepare_queue.clear()
    }

    /// Process a raw PDU sent by the client
    ///
    /// PDUs that cannot be decoded are answered with an error response (unless they are
    /// commands, which are never answered).
    pub fn process_raw(&mut self, table: &mut AttributeTable, raw: &[u8], mtu: u16) -> Processed {
        match Pdu::try_from_bytes(raw) {
            Ok(pdu) => self.process(table, pdu, mtu),
            Err(e) => {
                let opcode = raw.first().copied().unwrap_or_default();

                log::warn!("received an invalid ATT PDU ({:#x}): {}", opcode, e);

                if opcode & pdu::PduOpcode::COMMAND_FLAG != 0 {
                    Processed::default()
                } else {
                    Processed::respond(Pdu::error_response(opcode, 0, e.pdu_err))
                }
            }
        }
    }

    /// Process a decoded request or command sent by the client
    ///
    /// Responses, notifications, indications, and confirmations are not processed by the server.
    pub fn process(&mut self, table: &mut AttributeTable, request: Pdu, mtu: u16) -> Processed {
        let opcode = request.raw_opcode();

        let mtu = usize::from(mtu);

        let outcome = match request {
            Pdu::ExchangeMtuRequest(client_mtu) => {
                let mtu = client_mtu.min(self.server_mtu).max(super::MIN_ATT_MTU);

                log::debug!("exchanged ATT MTU, client {}, server {}", client_mtu, self.server_mtu);

                return Processed {
                    response: Some(Pdu::ExchangeMtuResponse(self.server_mtu)),
                    written: Vec::new(),
                    mtu: Some(mtu),
                };
            }
            Pdu::FindInformationRequest(range) => self.find_information(table, range, mtu),
            Pdu::FindByTypeValueRequest {
                range,
                attribute_type,
                value,
            } => self.find_by_type_value(table, range, attribute_type, &value, mtu),
            Pdu::ReadByTypeRequest { range, attribute_type } => {
                self.read_by_type(table, range, attribute_type, mtu)
            }
            Pdu::ReadRequest(handle) => self.read(table, handle, 0, mtu).map(Pdu::ReadResponse),
            Pdu::ReadBlobRequest { handle, offset } => {
                self.read(table, handle, offset, mtu).map(Pdu::ReadBlobResponse)
            }
            Pdu::ReadMultipleRequest(handles) => self.read_multiple(table, &handles, mtu),
            Pdu::ReadByGroupTypeRequest { range, group_type } => {
                self.read_by_group_type(table, range, group_type, mtu)
            }
            Pdu::WriteRequest { handle, value } => {
                return match self.write(table, handle, value) {
                    Ok(()) => Processed {
                        response: Some(Pdu::WriteResponse),
                        written: vec![handle],
                        mtu: None,
                    },
                    Err(e) => Processed::respond(Pdu::error_response(opcode, handle, e)),
                }
            }
            Pdu::WriteCommand { handle, value } => {
                return match self.write(table, handle, value) {
                    Ok(()) => Processed {
                        written: vec![handle],
                        ..Default::default()
                    },
                    Err(e) => {
                        log::debug!("write command to handle {:#x} ignored: {}", handle, e);

                        Processed::default()
                    }
                }
            }
            Pdu::PrepareWriteRequest { handle, offset, value } => self.prepare_write(table, handle, offset, value),
            Pdu::ExecuteWriteRequest { execute } => {
                return match self.execute_write(table, execute) {
                    Ok(written) => Processed {
                        response: Some(Pdu::ExecuteWriteResponse),
                        written,
                        mtu: None,
                    },
                    Err((handle, e)) => Processed::respond(Pdu::error_response(opcode, handle, e)),
                }
            }
            Pdu::Unsupported { opcode } if opcode & pdu::PduOpcode::COMMAND_FLAG != 0 => {
                log::debug!("ignoring unsupported ATT command {:#x}", opcode);

                return Processed::default();
            }
            Pdu::Unsupported { opcode } => {
                log::debug!("unsupported ATT request {:#x}", opcode);

                Err((0, pdu::Error::RequestNotSupported))
            }
            other => {
                log::debug!("PDU {:?} is not processed by the server", other.opcode());

                return Processed::default();
            }
        };

        match outcome {
            Ok(response) => Processed::respond(response),
            Err((handle, e)) => Processed::respond(Pdu::error_response(opcode, handle, e)),
        }
    }

    fn find_information(
        &self,
        table: &AttributeTable,
        range: HandleRange,
        mtu: usize,
    ) -> Result<Pdu, (u16, pdu::Error)> {
        check_range(&range)?;

        let mut entries: Vec<HandleWithType> = Vec::new();

        for (handle, attribute) in table.iter_range(range) {
            let uuid = *attribute.get_uuid();

            let format_len = entries.first().map(|e| e.uuid.att_len()).unwrap_or(uuid.att_len());

            if uuid.att_len() != format_len || 2 + (entries.len() + 1) * (2 + format_len) > mtu {
                break;
            }

            entries.push(HandleWithType { handle, uuid });
        }

        if entries.is_empty() {
            Err((range.starting_handle, pdu::Error::AttributeNotFound))
        } else {
            Ok(Pdu::FindInformationResponse(entries))
        }
    }

    fn find_by_type_value(
        &self,
        table: &AttributeTable,
        range: HandleRange,
        attribute_type: u16,
        value: &[u8],
        mtu: usize,
    ) -> Result<Pdu, (u16, pdu::Error)> {
        check_range(&range)?;

        let attribute_type = Uuid::from_u16(attribute_type);

        let max = mtu.saturating_sub(1) / 4;

        let found: Vec<TypeValueResponse> = table
            .iter_range(range)
            .filter(|(_, attribute)| *attribute.get_uuid() == attribute_type && attribute.get_value() == value)
            .map(|(handle, attribute)| TypeValueResponse {
                handle,
                group_end_handle: if GROUPING_TYPES.contains(attribute.get_uuid()) {
                    table.group_end(handle)
                } else {
                    handle
                },
            })
            .take(max)
            .collect();

        if found.is_empty() {
            Err((range.starting_handle, pdu::Error::AttributeNotFound))
        } else {
            Ok(Pdu::FindByTypeValueResponse(found))
        }
    }

    fn read_by_type(
        &self,
        table: &AttributeTable,
        range: HandleRange,
        attribute_type: Uuid,
        mtu: usize,
    ) -> Result<Pdu, (u16, pdu::Error)> {
        check_range(&range)?;

        // the length field of the response is one byte
        let max_value_len = mtu.saturating_sub(4).min(253);

        let mut entries: Vec<ReadTypeData> = Vec::new();

        for (handle, attribute) in table.iter_range(range) {
            if *attribute.get_uuid() != attribute_type {
                continue;
            }

            if !attribute.is_readable() {
                if entries.is_empty() {
                    return Err((handle, pdu::Error::ReadNotPermitted));
                }

                break;
            }

            let value = &attribute.get_value()[..attribute.get_value().len().min(max_value_len)];

            let entry_len = entries.first().map(|e| e.value.len()).unwrap_or(value.len());

            if value.len() != entry_len || 2 + (entries.len() + 1) * (2 + entry_len) > mtu {
                break;
            }

            entries.push(ReadTypeData {
                handle,
                value: value.to_vec(),
            });
        }

        if entries.is_empty() {
            Err((range.starting_handle, pdu::Error::AttributeNotFound))
        } else {
            Ok(Pdu::ReadByTypeResponse(entries))
        }
    }

    fn read_by_group_type(
        &self,
        table: &AttributeTable,
        range: HandleRange,
        group_type: Uuid,
        mtu: usize,
    ) -> Result<Pdu, (u16, pdu::Error)> {
        check_range(&range)?;

        if !GROUPING_TYPES.contains(&group_type) {
            return Err((range.starting_handle, pdu::Error::UnsupportedGroupType));
        }

        let max_value_len = mtu.saturating_sub(6).min(251);

        let mut entries: Vec<ReadGroupTypeData> = Vec::new();

        for (handle, attribute) in table.iter_range(range) {
            if *attribute.get_uuid() != group_type {
                continue;
            }

            let value = &attribute.get_value()[..attribute.get_value().len().min(max_value_len)];

            let entry_len = entries.first().map(|e| e.value.len()).unwrap_or(value.len());

            if value.len() != entry_len || 2 + (entries.len() + 1) * (4 + entry_len) > mtu {
                break;
            }

            entries.push(ReadGroupTypeData {
                handle,
                end_group_handle: table.group_end(handle),
                value: value.to_vec(),
            });
        }

        if entries.is_empty() {
            Err((range.starting_handle, pdu::Error::AttributeNotFound))
        } else {
            Ok(Pdu::ReadByGroupTypeResponse(entries))
        }
    }

    fn readable<'a>(&self, table: &'a AttributeTable, handle: u16) -> Result<&'a Attribute, (u16, pdu::Error)> {
        match table.get(handle) {
            None => Err((handle, pdu::Error::AttributeNotFound)),
            Some(attribute) if !attribute.is_readable() => Err((handle, pdu::Error::ReadNotPermitted)),
            Some(attribute) => Ok(attribute),
        }
    }

    fn read(&self, table: &AttributeTable, handle: u16, offset: u16, mtu: usize) -> Result<Vec<u8>, (u16, pdu::Error)> {
        let value = self.readable(table, handle)?.get_value();

        let offset = usize::from(offset);

        if offset > value.len() {
            return Err((handle, pdu::Error::InvalidOffset));
        }

        let end = value.len().min(offset + mtu.saturating_sub(1));

        Ok(value[offset..end].to_vec())
    }

    fn read_multiple(&self, table: &AttributeTable, handles: &[u16], mtu: usize) -> Result<Pdu, (u16, pdu::Error)> {
        let mut values = Vec::new();

        for handle in handles {
            values.extend_from_slice(self.readable(table, *handle)?.get_value());
        }

        values.truncate(mtu.saturating_sub(1));

        Ok(Pdu::ReadMultipleResponse(values))
    }

    fn writable<'a>(&self, table: &'a mut AttributeTable, handle: u16) -> Result<&'a mut Attribute, pdu::Error> {
        match table.get_mut(handle) {
            None => Err(pdu::Error::AttributeNotFound),
            Some(attribute) if !attribute.is_writable() => Err(pdu::Error::WriteNotPermitted),
            Some(attribute) => Ok(attribute),
        }
    }

    fn write(&self, table: &mut AttributeTable, handle: u16, value: Vec<u8>) -> Result<(), pdu::Error> {
        self.writable(table, handle)?.set_value(value);

        log::trace!("attribute {:#x} written", handle);

        Ok(())
    }

    fn prepare_write(
        &mut self,
        table: &mut AttributeTable,
        handle: u16,
        offset: u16,
        value: Vec<u8>,
    ) -> Result<Pdu, (u16, pdu::Error)> {
        self.writable(table, handle).map_err(|e| (handle, e))?;

        if self.prepare_queue.len() >= self.prepare_queue_limit {
            return Err((handle, pdu::Error::PrepareQueueFull));
        }

        self.prepare_queue.push(PreparedWrite {
            handle,
            offset,
            value: value.clone(),
        });

        Ok(Pdu::PrepareWriteResponse { handle, offset, value })
    }

    /// Execute (or cancel) the prepared writes
    ///
    /// The writes for each attribute are assembled in the order they were prepared, every offset
    /// must be within the value assembled so far. The queue is cleared whatever the outcome.
    fn execute_write(&mut self, table: &mut AttributeTable, execute: bool) -> Result<Vec<u16>, (u16, pdu::Error)> {
        let queue = core::mem::take(&mut self.prepare_queue);

        if !execute {
            log::trace!("cancelled {} prepared writes", queue.len());

            return Ok(Vec::new());
        }

        let mut assembled: Vec<(u16, Vec<u8>)> = Vec::new();

        for write in queue {
            let index = match assembled.iter().position(|(handle, _)| *handle == write.handle) {
                Some(index) => index,
                None => {
                    let current = table
                        .get(write.handle)
                        .map(|attribute| attribute.get_value().to_vec())
                        .ok_or((write.handle, pdu::Error::AttributeNotFound))?;

                    assembled.push((write.handle, current));

                    assembled.len() - 1
                }
            };

            let value = &mut assembled[index].1;

            let offset = usize::from(write.offset);

            if offset > value.len() {
                return Err((write.handle, pdu::Error::InvalidOffset));
            }

            value.truncate(offset);
            value.extend_from_slice(&write.value);
        }

        let mut written = Vec::with_capacity(assembled.len());

        for (handle, value) in assembled {
            self.write(table, handle, value).map_err(|e| (handle, e))?;

            written.push(handle);
        }

        Ok(written)
    }
}

fn check_range(range: &HandleRange) -> Result<(), (u16, pdu::Error)> {
    if range.is_valid() {
        Ok(())
    } else {
        Err((range.starting_handle, pdu::Error::InvalidHandle))
    }
}
