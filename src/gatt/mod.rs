//! Generic Attribute Profile
//!
//! GATT structures the attributes of a server into services, characteristics, and descriptors.
//!
//! The server side is built with a [`ServerBuilder`]. Services are added one at a time, and each
//! service is constructed by adding characteristics to it. The result is the
//! [`AttributeTable`](crate::att::server::AttributeTable) the host answers requests from.
//!
//! ```
//! use ble_host::gatt::{characteristic::Properties, ServerBuilder};
//! use ble_host::Uuid;
//!
//! let mut server_builder = ServerBuilder::new();
//!
//! let battery = server_builder
//!     .new_service(Uuid::from_u16(0x180F), true)
//!     .add_characteristic(Uuid::from_u16(0x2A19))
//!     .set_properties(&[Properties::Read, Properties::Notify])
//!     .set_value(vec![100])
//!     .complete_characteristic()
//!     .finish_service();
//!
//! let table = server_builder.make_table();
//!
//! assert_eq!(Some(4), battery.characteristics[0].client_configuration_handle);
//! assert_eq!(4, table.len());
//! ```
//!
//! The client side procedures are in [`client`], they are started through the
//! [`Host`](crate::host::Host).

pub mod characteristic;
pub mod client;
pub mod server;

use crate::att::server::{Attribute, AttributeTable};
use crate::att::{self, TransferFormatInto};
use crate::Uuid;
use characteristic::{Characteristic, CharacteristicBuilder};

pub const PRIMARY_SERVICE_TYPE: Uuid = Uuid::from_u16(0x2800);

pub const SECONDARY_SERVICE_TYPE: Uuid = Uuid::from_u16(0x2801);

pub const CHARACTERISTIC_TYPE: Uuid = Uuid::from_u16(0x2803);

pub const USER_DESCRIPTION_TYPE: Uuid = Uuid::from_u16(0x2901);

pub const CLIENT_CHARACTERISTIC_CONFIGURATION_TYPE: Uuid = Uuid::from_u16(0x2902);

/// Construct a new service
///
/// The service declaration is pushed to the attribute table when the builder is created.
pub struct ServiceBuilder<'a> {
    server_builder: &'a mut ServerBuilder,
    uuid: Uuid,
    is_primary: bool,
    handle: u16,
    characteristics: Vec<Characteristic>,
}

impl<'a> ServiceBuilder<'a> {
    fn new(server_builder: &'a mut ServerBuilder, uuid: Uuid, is_primary: bool) -> Self {
        let service_type = if is_primary {
            PRIMARY_SERVICE_TYPE
        } else {
            SECONDARY_SERVICE_TYPE
        };

        let handle = server_builder
            .table
            .push(Attribute::new(service_type, att::READ_ONLY, uuid.into_bytes()));

        ServiceBuilder {
            server_builder,
            uuid,
            is_primary,
            handle,
            characteristics: Vec::new(),
        }
    }

    fn table(&mut self) -> &mut AttributeTable {
        &mut self.server_builder.table
    }

    /// Start adding a characteristic to the service
    pub fn add_characteristic(self, uuid: Uuid) -> CharacteristicBuilder<'a> {
        CharacteristicBuilder::new(self, uuid)
    }

    /// Finish the service
    pub fn finish_service(self) -> Service {
        let end_handle = self.server_builder.table.last_handle();

        log::debug!(
            "service {} uses handles {:#x}..={:#x}",
            self.uuid,
            self.handle,
            end_handle
        );

        Service {
            uuid: self.uuid,
            is_primary: self.is_primary,
            handle: self.handle,
            end_handle,
            characteristics: self.characteristics,
        }
    }
}

/// A service of the local server
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    pub uuid: Uuid,
    pub is_primary: bool,
    /// The handle of the service declaration
    pub handle: u16,
    /// The last handle of the service
    pub end_handle: u16,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    /// Find a characteristic of the service by its type
    pub fn characteristic(&self, uuid: Uuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Construct the attribute table of a server
#[derive(Default)]
pub struct ServerBuilder {
    table: AttributeTable,
}

impl ServerBuilder {
    pub fn new() -> Self {
        ServerBuilder::default()
    }

    /// Start a new service
    pub fn new_service(&mut self, uuid: Uuid, is_primary: bool) -> ServiceBuilder<'_> {
        ServiceBuilder::new(self, uuid, is_primary)
    }

    pub fn make_table(self) -> AttributeTable {
        self.table
    }
}

#[cfg(test)]
mod test {
    use super::characteristic::Properties;
    use super::*;

    #[test]
    fn characteristic_handles() {
        let mut builder = ServerBuilder::new();

        let first = builder
            .new_service(Uuid::from_u16(0x180A), true)
            .add_characteristic(Uuid::from_u16(0x2A29))
            .set_properties(&[Properties::Read])
            .set_value(b"bo-tie".to_vec())
            .set_user_description("manufacturer")
            .complete_characteristic()
            .finish_service();

        let second = builder
            .new_service(Uuid::from_u16(0x180F), true)
            .add_characteristic(Uuid::from_u16(0x2A19))
            .set_properties(&[Properties::Read, Properties::Indicate])
            .complete_characteristic()
            .finish_service();

        let table = builder.make_table();

        assert_eq!((1, 4), (first.handle, first.end_handle));
        assert_eq!((5, 8), (second.handle, second.end_handle));

        let battery_level = second.characteristic(Uuid::from_u16(0x2A19)).unwrap();

        assert_eq!(7, battery_level.value_handle);
        assert_eq!(Some(8), battery_level.client_configuration_handle);

        assert_eq!(vec![0x22u8, 0x07, 0x00, 0x19, 0x2A], table.get(6).unwrap().get_value());
        assert!(!table.get(7).unwrap().is_writable());
        assert!(table.get(8).unwrap().is_writable());
    }
}
