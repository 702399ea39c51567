use domain::{AlarmStatus, AlarmType, ConnectionType, DataPoint, Device, ProtocolKind, Quality};

#[test]
fn protocol_kind_parses_aliases_case_insensitive() {
    assert_eq!(ProtocolKind::parse("MODBUS_TCP"), Some(ProtocolKind::ModbusTcp));
    assert_eq!(ProtocolKind::parse("modbus_rtu"), Some(ProtocolKind::ModbusRtu));
    assert_eq!(ProtocolKind::parse("Modbus_Ascii"), Some(ProtocolKind::ModbusAscii));
    assert_eq!(ProtocolKind::parse("S7"), Some(ProtocolKind::Siemens));
    assert_eq!(ProtocolKind::parse("siemens"), Some(ProtocolKind::Siemens));
    assert_eq!(ProtocolKind::parse("FINS"), Some(ProtocolKind::Omron));
    assert_eq!(ProtocolKind::parse("profinet"), None);
}

#[test]
fn connection_type_defaults_to_tcp() {
    assert_eq!(ConnectionType::parse("serial"), ConnectionType::Serial);
    assert_eq!(ConnectionType::parse("TCP"), ConnectionType::Tcp);
    assert_eq!(ConnectionType::parse(""), ConnectionType::Tcp);
}

#[test]
fn data_point_scale_defaults() {
    let mut point = DataPoint::new(1, 1, "temp", "40001", "int16");
    assert_eq!(point.apply_scale(12.0), 12.0);

    point.scale = Some(0.1);
    point.offset = Some(-5.0);
    assert!((point.apply_scale(250.0) - 20.0).abs() < 1e-9);
}

#[test]
fn device_new_is_enabled_tcp() {
    let device = Device::new(7, "plc", "omron");
    assert!(device.enabled);
    assert_eq!(device.protocol_kind(), Some(ProtocolKind::Omron));
    assert_eq!(device.connection_kind(), ConnectionType::Tcp);
}

#[test]
fn alarm_enums_round_trip_strings() {
    assert_eq!(AlarmType::parse("high"), Some(AlarmType::High));
    assert_eq!(AlarmType::Low.as_str(), "LOW");
    assert_eq!(AlarmStatus::parse("ACTIVE"), Some(AlarmStatus::Active));
    assert_eq!(AlarmStatus::Acknowledged.as_str(), "acknowledged");
    assert_eq!(Quality::from_u8(0), Quality::Bad);
    assert_eq!(Quality::Good.as_u8(), 1);
}
