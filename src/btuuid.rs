//! `Uuid` extensions for Bluetooth UUIDs and the assigned numbers this crate knows names for

use uuid::Uuid;

/// This is the Bluetooth Base UUID. It is used with 16-bit and 32-bit UUIDs
/// [defined](https://www.bluetooth.com/specifications/assigned-numbers/) by the Bluetooth SIG.
pub const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Const function to create a 16-bit Bluetooth UUID
pub const fn bluetooth_uuid_from_u16(uuid: u16) -> Uuid {
    Uuid::from_u128(((uuid as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// Const function to create a 32-bit Bluetooth UUID
pub const fn bluetooth_uuid_from_u32(uuid: u32) -> Uuid {
    Uuid::from_u128(((uuid as u128) << 96) | BLUETOOTH_BASE_UUID)
}

/// Extension trait for [uuid::Uuid] with helper methods for dealing with Bluetooth 16-bit and 32-bit UUIDs
pub trait BluetoothUuidExt: private::Sealed + Sized {
    /// Creates a 16-bit Bluetooth UUID
    fn from_u16(uuid: u16) -> Self;

    /// Creates a 32-bit Bluetooth UUID
    fn from_u32(uuid: u32) -> Self;

    /// Creates a UUID from its big-endian octets, or `None` if `bytes.len()` is not one of 2, 4, or 16.
    fn try_from_bluetooth_bytes(bytes: &[u8]) -> Option<Self>;

    /// Returns `true` if self is a valid 16-bit Bluetooth UUID
    fn is_u16_uuid(&self) -> bool;

    /// Returns `true` if self is a valid 32-bit Bluetooth UUID
    fn is_u32_uuid(&self) -> bool;

    /// Tries to convert self into a 16-bit Bluetooth UUID
    fn try_to_u16(&self) -> Option<u16>;

    /// Returns a slice of octets representing the UUID: 2 octets for a 16-bit Bluetooth UUID, 4 for a 32-bit one
    /// and 16 otherwise.
    fn as_bluetooth_bytes(&self) -> &[u8];

    /// The short string form: `180f` for 16-bit UUIDs, the hyphenated form for everything else.
    fn to_short_string(&self) -> String;
}

impl BluetoothUuidExt for Uuid {
    fn from_u16(uuid: u16) -> Self {
        bluetooth_uuid_from_u16(uuid)
    }

    fn from_u32(uuid: u32) -> Self {
        bluetooth_uuid_from_u32(uuid)
    }

    fn try_from_bluetooth_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            2 => bytes.try_into().ok().map(|x| Self::from_u16(u16::from_be_bytes(x))),
            4 => bytes.try_into().ok().map(|x| Self::from_u32(u32::from_be_bytes(x))),
            16 => bytes.try_into().ok().map(Self::from_bytes),
            _ => None,
        }
    }

    fn is_u16_uuid(&self) -> bool {
        let u = self.as_u128();
        (u & ((1 << 96) - 1)) == BLUETOOTH_BASE_UUID && (((u >> 96) as u32) & 0xffff0000) == 0
    }

    fn is_u32_uuid(&self) -> bool {
        let u = self.as_u128();
        (u & ((1 << 96) - 1)) == BLUETOOTH_BASE_UUID
    }

    fn try_to_u16(&self) -> Option<u16> {
        let u = self.as_u128();
        self.is_u16_uuid().then(|| (u >> 96) as u16)
    }

    fn as_bluetooth_bytes(&self) -> &[u8] {
        let bytes = self.as_bytes();
        if self.is_u16_uuid() {
            &bytes[2..4]
        } else if self.is_u32_uuid() {
            &bytes[0..4]
        } else {
            &bytes[..]
        }
    }

    fn to_short_string(&self) -> String {
        match self.try_to_u16() {
            Some(short) => format!("{short:04x}"),
            None => self.hyphenated().to_string(),
        }
    }
}

mod private {
    use uuid::Uuid;

    pub trait Sealed {}

    impl Sealed for Uuid {}
}

macro_rules! assigned_numbers {
    ($(#[$meta:meta])* $module:ident { $($name:ident = $value:literal => $label:literal,)* }) => {
        $(#[$meta])*
        pub mod $module {
            #![allow(missing_docs)]

            use uuid::Uuid;

            use super::bluetooth_uuid_from_u16;

            $(pub const $name: Uuid = bluetooth_uuid_from_u16($value);)*

            pub(crate) const NAMES: &[(Uuid, &str)] = &[$(($name, $label),)*];
        }
    };
}

assigned_numbers! {
    /// Bluetooth GATT Service 16-bit UUIDs
    services {
        GENERIC_ACCESS = 0x1800 => "Generic Access",
        GENERIC_ATTRIBUTE = 0x1801 => "Generic Attribute",
        IMMEDIATE_ALERT = 0x1802 => "Immediate Alert",
        LINK_LOSS = 0x1803 => "Link Loss",
        TX_POWER = 0x1804 => "Tx Power",
        CURRENT_TIME = 0x1805 => "Current Time",
        HEALTH_THERMOMETER = 0x1809 => "Health Thermometer",
        DEVICE_INFORMATION = 0x180A => "Device Information",
        HEART_RATE = 0x180D => "Heart Rate",
        BATTERY = 0x180F => "Battery",
        BLOOD_PRESSURE = 0x1810 => "Blood Pressure",
        HUMAN_INTERFACE_DEVICE = 0x1812 => "Human Interface Device",
        RUNNING_SPEED_AND_CADENCE = 0x1814 => "Running Speed and Cadence",
        CYCLING_SPEED_AND_CADENCE = 0x1816 => "Cycling Speed and Cadence",
        ENVIRONMENTAL_SENSING = 0x181A => "Environmental Sensing",
    }
}

assigned_numbers! {
    /// Bluetooth GATT Characteristic 16-bit UUIDs
    characteristics {
        DEVICE_NAME = 0x2A00 => "Device Name",
        APPEARANCE = 0x2A01 => "Appearance",
        PERIPHERAL_PREFERRED_CONNECTION_PARAMETERS = 0x2A04 => "Peripheral Preferred Connection Parameters",
        SERVICE_CHANGED = 0x2A05 => "Service Changed",
        ALERT_LEVEL = 0x2A06 => "Alert Level",
        TX_POWER_LEVEL = 0x2A07 => "Tx Power Level",
        BATTERY_LEVEL = 0x2A19 => "Battery Level",
        MODEL_NUMBER_STRING = 0x2A24 => "Model Number String",
        SERIAL_NUMBER_STRING = 0x2A25 => "Serial Number String",
        FIRMWARE_REVISION_STRING = 0x2A26 => "Firmware Revision String",
        HARDWARE_REVISION_STRING = 0x2A27 => "Hardware Revision String",
        SOFTWARE_REVISION_STRING = 0x2A28 => "Software Revision String",
        MANUFACTURER_NAME_STRING = 0x2A29 => "Manufacturer Name String",
        HEART_RATE_MEASUREMENT = 0x2A37 => "Heart Rate Measurement",
        BODY_SENSOR_LOCATION = 0x2A38 => "Body Sensor Location",
        HEART_RATE_CONTROL_POINT = 0x2A39 => "Heart Rate Control Point",
        TEMPERATURE = 0x2A6E => "Temperature",
    }
}

assigned_numbers! {
    /// Bluetooth GATT Descriptor 16-bit UUIDs
    descriptors {
        CHARACTERISTIC_EXTENDED_PROPERTIES = 0x2900 => "Characteristic Extended Properties",
        CHARACTERISTIC_USER_DESCRIPTION = 0x2901 => "Characteristic User Description",
        CLIENT_CHARACTERISTIC_CONFIGURATION = 0x2902 => "Client Characteristic Configuration",
        SERVER_CHARACTERISTIC_CONFIGURATION = 0x2903 => "Server Characteristic Configuration",
        CHARACTERISTIC_PRESENTATION_FORMAT = 0x2904 => "Characteristic Presentation Format",
        CHARACTERISTIC_AGGREGATE_FORMAT = 0x2905 => "Characteristic Aggregate Format",
        VALID_RANGE = 0x2906 => "Valid Range",
        REPORT_REFERENCE = 0x2908 => "Report Reference",
    }
}

/// The SIG-assigned name of `uuid`, if it is one of the assigned numbers above.
pub fn assigned_name(uuid: &Uuid) -> Option<&'static str> {
    services::NAMES
        .iter()
        .chain(characteristics::NAMES)
        .chain(descriptors::NAMES)
        .find(|(assigned, _)| assigned == uuid)
        .map(|(_, name)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_uuid_round_trip() {
        let battery = Uuid::from_u16(0x180f);
        assert_eq!(battery, services::BATTERY);
        assert!(battery.is_u16_uuid());
        assert_eq!(battery.try_to_u16(), Some(0x180f));
        assert_eq!(battery.as_bluetooth_bytes(), &[0x18, 0x0f]);
        assert_eq!(battery.to_short_string(), "180f");
    }

    #[test]
    fn vendor_uuid_is_not_short() {
        let nus = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
        assert!(!nus.is_u16_uuid());
        assert!(!nus.is_u32_uuid());
        assert_eq!(nus.as_bluetooth_bytes().len(), 16);
        assert_eq!(nus.to_short_string(), "6e400001-b5a3-f393-e0a9-e50e24dcca9e");
    }

    #[test]
    fn from_bytes_rejects_odd_lengths() {
        assert_eq!(Uuid::try_from_bluetooth_bytes(&[0x2a, 0x19]), Some(characteristics::BATTERY_LEVEL));
        assert_eq!(Uuid::try_from_bluetooth_bytes(&[0x2a, 0x19, 0x00]), None);
    }

    #[test]
    fn assigned_names() {
        assert_eq!(assigned_name(&services::HEART_RATE), Some("Heart Rate"));
        assert_eq!(
            assigned_name(&descriptors::CLIENT_CHARACTERISTIC_CONFIGURATION),
            Some("Client Characteristic Configuration")
        );
        assert_eq!(assigned_name(&Uuid::from_u16(0xfeed)), None);
    }
}
