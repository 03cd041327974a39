//! GATT characteristics
//!
//! A characteristic is made up of a declaration attribute, a value attribute, and then any number
//! of descriptor attributes. The declaration contains the properties of the characteristic, the
//! handle of the value attribute, and the type of the value.

use super::{CHARACTERISTIC_TYPE, CLIENT_CHARACTERISTIC_CONFIGURATION_TYPE, USER_DESCRIPTION_TYPE};
use crate::att::server::Attribute;
use crate::att::{self, AttributePermissions, TransferFormatInto};
use crate::Uuid;

/// Characteristic Properties
///
/// These are the properties that are part of the Characteristic Declaration
#[derive(Clone, Copy, PartialEq, PartialOrd, Eq, Ord, Debug, Hash)]
pub enum Properties {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrite,
    ExtendedProperties,
}

impl Properties {
    const ALL: [Properties; 8] = [
        Properties::Broadcast,
        Properties::Read,
        Properties::WriteWithoutResponse,
        Properties::Write,
        Properties::Notify,
        Properties::Indicate,
        Properties::AuthenticatedSignedWrite,
        Properties::ExtendedProperties,
    ];

    fn to_val(&self) -> u8 {
        match *self {
            Properties::Broadcast => 1 << 0,
            Properties::Read => 1 << 1,
            Properties::WriteWithoutResponse => 1 << 2,
            Properties::Write => 1 << 3,
            Properties::Notify => 1 << 4,
            Properties::Indicate => 1 << 5,
            Properties::AuthenticatedSignedWrite => 1 << 6,
            Properties::ExtendedProperties => 1 << 7,
        }
    }

    pub fn slice_to_bit_field(properties: &[Self]) -> u8 {
        properties.iter().fold(0u8, |u, p| u | p.to_val())
    }

    pub fn from_bit_field(field: u8) -> Vec<Self> {
        Self::ALL
            .iter()
            .filter(|p| field & p.to_val() != 0)
            .copied()
            .collect()
    }
}

/// The value of a characteristic declaration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    pub properties: Vec<Properties>,
    pub value_handle: u16,
    pub uuid: Uuid,
}

impl att::TransferFormatTryFrom for Declaration {
    fn try_from(raw: &[u8]) -> Result<Self, att::TransferFormatError> {
        // the UUID conversion checks for a 2 or 16 byte UUID
        if raw.len() >= 5 {
            Ok(Declaration {
                properties: Properties::from_bit_field(raw[0]),
                value_handle: att::TransferFormatTryFrom::try_from(&raw[1..3])?,
                uuid: att::TransferFormatTryFrom::try_from(&raw[3..])?,
            })
        } else {
            Err(att::TransferFormatError::bad_min_size("Declaration", 5, raw.len()))
        }
    }
}

impl att::TransferFormatInto for Declaration {
    fn len_of_into(&self) -> usize {
        3 + self.uuid.att_len()
    }

    fn build_into(&self, into: &mut Vec<u8>) {
        into.push(Properties::slice_to_bit_field(&self.properties));

        self.value_handle.build_into(into);

        self.uuid.build_into(into);
    }
}

/// Client Characteristic Configuration
///
/// These are the bits of the client characteristic configuration descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientConfiguration {
    Notification,
    Indication,
}

impl ClientConfiguration {
    pub fn to_bits(config: &[ClientConfiguration]) -> u16 {
        config.iter().fold(0u16, |bits, cfg| {
            bits | match cfg {
                ClientConfiguration::Notification => 1 << 0,
                ClientConfiguration::Indication => 1 << 1,
            }
        })
    }

    /// Convert from the descriptor bits
    ///
    /// Reserved bits are ignored
    pub fn from_bits(bits: u16) -> Vec<ClientConfiguration> {
        let mut config = Vec::new();

        if bits & 1 != 0 {
            config.push(ClientConfiguration::Notification)
        }

        if bits & 2 != 0 {
            config.push(ClientConfiguration::Indication)
        }

        config
    }
}

impl att::TransferFormatTryFrom for Vec<ClientConfiguration> {
    fn try_from(raw: &[u8]) -> Result<Self, att::TransferFormatError> {
        <u16 as att::TransferFormatTryFrom>::try_from(raw).map(ClientConfiguration::from_bits)
    }
}

impl att::TransferFormatInto for Vec<ClientConfiguration> {
    fn len_of_into(&self) -> usize {
        2
    }

    fn build_into(&self, into: &mut Vec<u8>) {
        ClientConfiguration::to_bits(self).build_into(into)
    }
}

/// A characteristic under construction
///
/// This is created by [`ServiceBuilder::add_characteristic`](super::ServiceBuilder::add_characteristic)
/// and returns back to the service builder with `complete_characteristic`.
pub struct CharacteristicBuilder<'a> {
    service_builder: super::ServiceBuilder<'a>,
    uuid: Uuid,
    properties: Vec<Properties>,
    value: Vec<u8>,
    value_permissions: Option<&'static [AttributePermissions]>,
    user_description: Option<String>,
}

impl<'a> CharacteristicBuilder<'a> {
    pub(super) fn new(service_builder: super::ServiceBuilder<'a>, uuid: Uuid) -> Self {
        CharacteristicBuilder {
            service_builder,
            uuid,
            properties: Vec::new(),
            value: Vec::new(),
            value_permissions: None,
            user_description: None,
        }
    }

    pub fn set_properties(mut self, properties: &[Properties]) -> Self {
        let mut properties = properties.to_vec();

        properties.sort();
        properties.dedup();

        self.properties = properties;
        self
    }

    pub fn set_value(mut self, value: Vec<u8>) -> Self {
        self.value = value;
        self
    }

    /// Set the permissions of the value attribute
    ///
    /// When not set, the permissions are derived from the properties.
    pub fn set_permissions(mut self, permissions: &'static [AttributePermissions]) -> Self {
        self.value_permissions = Some(permissions);
        self
    }

    pub fn set_user_description<D: Into<String>>(mut self, description: D) -> Self {
        self.user_description = Some(description.into());
        self
    }

    fn derived_permissions(&self) -> Vec<AttributePermissions> {
        let mut permissions = Vec::new();

        if self.properties.contains(&Properties::Read) {
            permissions.push(AttributePermissions::Read)
        }

        if self.properties.contains(&Properties::Write)
            || self.properties.contains(&Properties::WriteWithoutResponse)
        {
            permissions.push(AttributePermissions::Write)
        }

        permissions
    }

    /// Push the attributes of the characteristic onto the attribute table
    ///
    /// A client characteristic configuration descriptor is added when the characteristic can
    /// notify or indicate.
    pub fn complete_characteristic(mut self) -> super::ServiceBuilder<'a> {
        let value_permissions = self
            .value_permissions
            .map(|p| p.to_vec())
            .unwrap_or_else(|| self.derived_permissions());

        let table = self.service_builder.table();

        let declaration = Declaration {
            properties: self.properties.clone(),
            value_handle: table.last_handle().checked_add(2).unwrap_or(att::pdu::INVALID_HANDLE),
            uuid: self.uuid,
        };

        let declaration_handle = table.push(Attribute::new(
            CHARACTERISTIC_TYPE,
            att::READ_ONLY,
            declaration.into_bytes(),
        ));

        let value_handle = table.push(Attribute::new(
            self.uuid,
            &value_permissions,
            core::mem::take(&mut self.value),
        ));

        let client_configuration_handle = if self.properties.contains(&Properties::Notify)
            || self.properties.contains(&Properties::Indicate)
        {
            Some(table.push(Attribute::new(
                CLIENT_CHARACTERISTIC_CONFIGURATION_TYPE,
                att::FULL_PERMISSIONS,
                vec![0, 0],
            )))
        } else {
            None
        };

        if let Some(description) = self.user_description.take() {
            table.push(Attribute::new(
                USER_DESCRIPTION_TYPE,
                att::READ_ONLY,
                description.into_bytes(),
            ));
        }

        let end_handle = table.last_handle();

        log::trace!(
            "characteristic {} added at handles {:#x}..={:#x}",
            self.uuid,
            declaration_handle,
            end_handle
        );

        self.service_builder.characteristics.push(Characteristic {
            uuid: self.uuid,
            declaration_handle,
            value_handle,
            client_configuration_handle,
            end_handle,
        });

        self.service_builder
    }
}

/// A characteristic of a local service
///
/// This is mainly useful for getting the handle to the characteristic value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Characteristic {
    pub uuid: Uuid,
    pub declaration_handle: u16,
    pub value_handle: u16,
    pub client_configuration_handle: Option<u16>,
    pub end_handle: u16,
}
