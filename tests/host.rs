mod common;

use ble_host::att::pdu::Error as AttError;
use ble_host::att::server::AttributeTable;
use ble_host::conn::{ConnectionState, ConnectionTiming};
use ble_host::diag::Counter;
use ble_host::gatt::characteristic::{ClientConfiguration, Properties};
use ble_host::gatt::{self, ServerBuilder};
use ble_host::hci::opcodes::Opcode;
use ble_host::l2cap::signaling::ConnectionParameters;
use ble_host::l2cap::AclDataError;
use ble_host::{Error, HostConfig, HostEvent, Uuid};
use common::*;
use std::time::Instant;

const BATTERY_SERVICE: Uuid = Uuid::from_u16(0x180F);
const BATTERY_LEVEL: Uuid = Uuid::from_u16(0x2A19);
const DEVICE_INFORMATION: Uuid = Uuid::from_u16(0x180A);
const MODEL_NUMBER: Uuid = Uuid::from_u16(0x2A24);

fn server() -> (AttributeTable, gatt::Service, gatt::Service) {
    let mut builder = ServerBuilder::new();

    let battery = builder
        .new_service(BATTERY_SERVICE, true)
        .add_characteristic(BATTERY_LEVEL)
        .set_properties(&[Properties::Read, Properties::Notify, Properties::Indicate])
        .set_value(vec![100])
        .complete_characteristic()
        .finish_service();

    let information = builder
        .new_service(DEVICE_INFORMATION, true)
        .add_characteristic(MODEL_NUMBER)
        .set_properties(&[Properties::Read, Properties::Write])
        .set_value(b"model".to_vec())
        .complete_characteristic()
        .finish_service();

    (builder.make_table(), battery, information)
}

#[test]
fn discovery_and_read() {
    let (table, battery, information) = server();

    let mut link = Link::new(table);

    let handle = handle();

    assert_eq!(256, link.central.connection(handle).unwrap().mtu());
    assert_eq!(256, link.peripheral.connection(handle).unwrap().mtu());

    let mut services = link.central.discover_primary_services(handle).unwrap();

    link.pump();

    let services = services.try_take().unwrap().unwrap();

    assert_eq!(2, services.len());
    assert_eq!((battery.handle, BATTERY_SERVICE), (services[0].handle, services[0].uuid));
    assert_eq!(
        (information.handle, DEVICE_INFORMATION),
        (services[1].handle, services[1].uuid)
    );

    let mut characteristics = link.central.discover_characteristics(handle, &services[0]).unwrap();

    link.pump();

    let characteristics = characteristics.try_take().unwrap().unwrap();

    assert_eq!(1, characteristics.len());
    assert_eq!(BATTERY_LEVEL, characteristics[0].uuid);
    assert_eq!(battery.characteristics[0].value_handle, characteristics[0].value_handle);

    let mut descriptors = link.central.discover_descriptors(handle, &characteristics[0]).unwrap();

    link.pump();

    let descriptors = descriptors.try_take().unwrap().unwrap();

    assert!(descriptors
        .iter()
        .any(|d| Some(d.handle) == battery.characteristics[0].client_configuration_handle));

    let mut level = link.central.read(handle, characteristics[0].value_handle).unwrap();

    link.pump();

    assert_eq!(Some(Ok(vec![100])), level.try_take());
}

#[test]
fn discover_service_by_uuid() {
    let (table, _, information) = server();

    let mut link = Link::new(table);

    let mut services = link
        .central
        .discover_primary_services_by_uuid(handle(), DEVICE_INFORMATION)
        .unwrap();

    link.pump();

    let services = services.try_take().unwrap().unwrap();

    assert_eq!(1, services.len());
    assert_eq!(information.handle, services[0].handle);
    assert_eq!(information.end_handle, services[0].end_handle);
}

#[test]
fn read_of_missing_attribute() {
    let (table, _, _) = server();

    let mut link = Link::new(table);

    let mut read = link.central.read(handle(), 0x0042).unwrap();

    link.pump();

    let err = read.try_take().unwrap().unwrap_err();

    assert!(err.is_attribute_not_found());
    assert_eq!(Error::Att(AttError::AttributeNotFound), err);
    assert_eq!(
        ConnectionState::Connected,
        link.central.connection(handle()).unwrap().state()
    );
}

#[test]
fn long_write_then_long_read() {
    let (table, _, information) = server();

    let mut link = Link::new(table);

    let value_handle = information.characteristics[0].value_handle;

    let value: Vec<u8> = (0..400u16).map(|v| v as u8).collect();

    let mut write = link.central.write(handle(), value_handle, value.clone()).unwrap();

    link.pump();

    assert_eq!(Some(Ok(())), write.try_take());
    assert_eq!(
        value.as_slice(),
        link.peripheral.attribute_table().get(value_handle).unwrap().get_value()
    );
    assert!(events(&mut link.peripheral).contains(&HostEvent::AttributeWritten {
        handle: handle(),
        attribute: value_handle,
    }));

    let mut read = link.central.read(handle(), value_handle).unwrap();

    link.pump();

    assert_eq!(Some(Ok(value)), read.try_take());
}

#[test]
fn procedures_run_one_at_a_time() {
    let (table, _, _) = server();

    let mut link = Link::new(table);

    let _first = link.central.read(handle(), 3).unwrap();

    assert_eq!(Err(Error::Busy), link.central.read(handle(), 3).map(|_| ()));

    link.pump();

    assert!(link.central.read(handle(), 3).is_ok());
}

#[test]
fn subscribe_then_notify() {
    let (table, battery, _) = server();

    let mut link = Link::new(table);

    let characteristic = battery.characteristics[0];

    let client_configuration_handle = characteristic.client_configuration_handle.unwrap();

    let mut subscribe = link
        .central
        .subscribe(handle(), client_configuration_handle, &[ClientConfiguration::Notification])
        .unwrap();

    link.pump();

    assert_eq!(Some(Ok(())), subscribe.try_take());
    assert_eq!(
        &[1, 0],
        link.peripheral
            .attribute_table()
            .get(client_configuration_handle)
            .unwrap()
            .get_value()
    );

    link.peripheral
        .notify(handle(), characteristic.value_handle, vec![99])
        .unwrap();

    link.pump();

    assert_eq!(
        vec![HostEvent::Notification {
            handle: handle(),
            attribute: characteristic.value_handle,
            value: vec![99],
        }],
        events(&mut link.central)
    );
}

#[test]
fn indication_is_confirmed() {
    let (table, battery, _) = server();

    let mut link = Link::new(table);

    let value_handle = battery.characteristics[0].value_handle;

    let mut indication = link.peripheral.indicate(handle(), value_handle, vec![42]).unwrap();

    assert_eq!(
        Err(Error::Busy),
        link.peripheral.indicate(handle(), value_handle, vec![43]).map(|_| ())
    );

    link.pump();

    assert_eq!(Some(Ok(())), indication.try_take());
    assert_eq!(
        vec![HostEvent::Indication {
            handle: handle(),
            attribute: value_handle,
            value: vec![42],
        }],
        events(&mut link.central)
    );

    assert!(link.peripheral.indicate(handle(), value_handle, vec![43]).is_ok());
}

#[test]
fn write_without_response() {
    let (table, _, information) = server();

    let mut link = Link::new(table);

    let value_handle = information.characteristics[0].value_handle;

    link.central
        .write_without_response(handle(), value_handle, b"other".to_vec())
        .unwrap();

    link.pump();

    assert_eq!(
        b"other",
        link.peripheral.attribute_table().get(value_handle).unwrap().get_value()
    );

    assert_eq!(
        Err(Error::InvalidParameter("value does not fit within the ATT MTU")),
        link.central.write_without_response(handle(), value_handle, vec![0; 300])
    );
}

#[test]
fn disconnection_during_discovery() {
    let (table, _, _) = server();

    // a single controller buffer keeps the fragments of the notification below queued
    let config = HostConfig {
        acl_buffers: 1,
        ..HostConfig::default()
    };

    let mut link = Link::with_config(config, table);

    let now = link.now;

    link.central.notify(handle(), 3, vec![7; 100]).unwrap();

    let mut services = link.central.discover_primary_services(handle()).unwrap();

    // the start of a PDU that never completes
    link.central
        .sender()
        .send_acl(&[0x05, 0x20, 0x06, 0x00, 0x20, 0x00, 0x04, 0x00, 0x0A, 0x03])
        .unwrap();

    link.central.process(now).unwrap();

    assert!(link.central.pool().in_use() > 0);

    link.central.sender().send_event(&disconnection_complete(0x13)).unwrap();

    link.central.process(now).unwrap();

    assert_eq!(Some(Err(Error::ConnectionLost)), services.try_take());
    assert_eq!(0, link.central.pool().in_use());
    assert!(link.central.connection(handle()).is_err());
    assert_eq!(
        vec![HostEvent::Disconnected {
            handle: handle(),
            reason: ble_host::hci::error::Error::RemoteUserTerminatedConnection,
        }],
        events(&mut link.central)
    );
    assert_eq!(1, link.central.counters().get(Counter::Disconnections));
}

#[test]
fn continuation_without_start() {
    let (table, _, _) = server();

    let mut link = Link::new(table);

    // continuing fragment flag set on the first packet of the connection
    link.central
        .sender()
        .send_acl(&[0x05, 0x10, 0x03, 0x00, 0x01, 0x02, 0x03])
        .unwrap();

    link.pump();

    assert_eq!(
        vec![HostEvent::MalformedPdu {
            handle: Some(handle()),
            error: AclDataError::ExpectedStartFragment,
        }],
        events(&mut link.central)
    );
    assert_eq!(1, link.central.counters().get(Counter::MalformedPdus));
    assert_eq!(
        ConnectionState::Connected,
        link.central.connection(handle()).unwrap().state()
    );

    let mut read = link.central.read(handle(), 3).unwrap();

    link.pump();

    assert_eq!(Some(Ok(vec![100])), read.try_take());
}

#[test]
fn one_command_at_a_time() {
    init_logger();

    let mut host = ble_host::Host::new(HostConfig::default(), RecordingSink::default()).unwrap();

    let now = std::time::Instant::now();

    let mut reset = host.send_command(Opcode::RESET, &[]).unwrap();

    assert_eq!(
        Err(Error::Busy),
        host.send_command(Opcode::from(0x2006), &[0; 15]).map(|_| ())
    );

    host.sender()
        .send_event(&command_complete(Opcode::RESET, 0))
        .unwrap();

    host.process(now).unwrap();

    assert!(reset.try_take().unwrap().is_ok());
    assert!(host.send_command(Opcode::from(0x2006), &[0; 15]).is_ok());
}

#[test]
fn peripheral_requests_parameter_update() {
    let (table, _, _) = server();

    let mut link = Link::new(table);

    let parameters = ConnectionParameters {
        interval_min: 0x10,
        interval_max: 0x20,
        latency: 0,
        timeout: 0x200,
    };

    let mut update = link
        .peripheral
        .update_connection_parameters(handle(), parameters)
        .unwrap();

    link.pump();

    let command = link.central.sink().commands.last().unwrap().clone();

    assert_eq!(&[0x13, 0x20, 14], &command[..3]);

    link.central
        .sender()
        .send_event(&command_status(Opcode::LE_CONNECTION_UPDATE, 0))
        .unwrap();

    for host in [&mut link.central, &mut link.peripheral] {
        host.sender()
            .send_event(&connection_update_complete(0x20, 0, 0x200))
            .unwrap();

        host.process(link.now).unwrap();
    }

    let timing = ConnectionTiming {
        interval: 0x20,
        latency: 0,
        supervision_timeout: 0x200,
    };

    assert_eq!(Some(Ok(timing)), update.try_take());
    assert_eq!(
        vec![HostEvent::ConnectionParametersUpdated {
            handle: handle(),
            timing,
        }],
        events(&mut link.central)
    );
}

#[test]
fn peer_parameter_update_outside_of_bounds() {
    let (table, _, _) = server();

    let config = HostConfig {
        accepted_interval_min: 0x10,
        ..HostConfig::default()
    };

    let mut link = Link::with_config(config, table);

    // faster than the central accepts
    let parameters = ConnectionParameters {
        interval_min: 0x06,
        interval_max: 0x06,
        latency: 0,
        timeout: 0x20,
    };

    let mut update = link
        .peripheral
        .update_connection_parameters(handle(), parameters)
        .unwrap();

    link.pump();

    assert_eq!(
        Some(Err(Error::Hci(
            ble_host::hci::error::Error::UnacceptableConnectionParameters
        ))),
        update.try_take()
    );
    assert!(link.central.sink().commands.is_empty());
}

#[test]
fn parameter_update_rejected_while_a_command_is_outstanding() {
    let (table, _, _) = server();

    let mut link = Link::new(table);

    let _size = link.central.read_buffer_size().unwrap();

    let parameters = ConnectionParameters {
        interval_min: 0x10,
        interval_max: 0x20,
        latency: 0,
        timeout: 0x200,
    };

    let mut update = link
        .peripheral
        .update_connection_parameters(handle(), parameters)
        .unwrap();

    link.pump();

    // the central could not issue the update so it must not accept it
    assert_eq!(
        Some(Err(Error::Hci(
            ble_host::hci::error::Error::UnacceptableConnectionParameters
        ))),
        update.try_take()
    );
    assert_eq!(1, link.central.sink().commands.len());

    link.central
        .sender()
        .send_event(&command_complete(Opcode::LE_READ_BUFFER_SIZE, 0))
        .unwrap();

    let _update = link
        .peripheral
        .update_connection_parameters(handle(), parameters)
        .unwrap();

    link.pump();

    assert_eq!(2, link.central.sink().commands.len());
    assert_eq!(&[0x13, 0x20, 14], &link.central.sink().commands[1][..3]);
}

#[test]
fn unanswered_request_times_out() {
    let (table, _, _) = server();

    let mut link = Link::new(table);

    let timeout = link.central.config().att_timeout();

    let mut read = link.central.read(handle(), 3).unwrap();

    let sent = Instant::now();

    // the request is left with the controller until after the timeout
    link.central.process(sent + timeout).unwrap();

    assert_eq!(Some(Err(Error::Timeout)), read.try_take());
    assert_eq!(1, link.central.counters().get(Counter::AttTimeouts));
    assert_eq!(
        ConnectionState::Connected,
        link.central.connection(handle()).unwrap().state()
    );

    // the late response has no request to answer
    link.now = sent + timeout;

    link.pump();

    assert!(events(&mut link.central).is_empty());

    let mut read = link.central.read(handle(), 3).unwrap();

    link.pump();

    assert_eq!(Some(Ok(vec![100])), read.try_take());
}

#[test]
fn unconfirmed_indication_times_out() {
    let (table, battery, _) = server();

    let mut link = Link::new(table);

    let value_handle = battery.characteristics[0].value_handle;

    let timeout = link.peripheral.config().att_timeout();

    let mut indication = link.peripheral.indicate(handle(), value_handle, vec![1]).unwrap();

    let sent = Instant::now();

    link.peripheral.process(sent + timeout).unwrap();

    assert_eq!(Some(Err(Error::Timeout)), indication.try_take());
    assert_eq!(1, link.peripheral.counters().get(Counter::AttTimeouts));

    // the late confirmation is dropped
    link.now = sent + timeout;

    link.pump();

    let mut indication = link.peripheral.indicate(handle(), value_handle, vec![2]).unwrap();

    link.pump();

    assert_eq!(Some(Ok(())), indication.try_take());
    assert_eq!(1, link.peripheral.counters().get(Counter::AttTimeouts));
}
