//! Bluetooth UUIDs
//!
//! Attribute types, service types, and characteristic types are all UUIDs. Bluetooth maps a
//! range of the 128 bit UUID space onto 16 and 32 bit *shortened* values so that commonly used
//! identifiers (the assigned numbers) are cheap to transfer. A [`Uuid`] always stores the full 128
//! bit value; the shortened forms are derived from it.

use core::convert::TryFrom;

/// Universally Unique Identifier
///
/// ```
/// # use ble_host::Uuid;
/// let primary_service = Uuid::from_u16(0x2800);
///
/// assert!(primary_service.can_be_16_bit());
///
/// // The mapped region does not begin at zero
/// assert!(!Uuid::from_u128(0x2800).can_be_16_bit());
/// ```
///
/// ## Conversion
/// A UUID can be converted to and from a [uuid::Uuid](https://github.com/uuid-rs/uuid) when the
/// feature `uuid-crate` is enabled.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, serde::Serialize, serde::Deserialize)]
pub struct Uuid {
    value: u128,
}

impl Uuid {
    /// The Bluetooth Base UUID (Vol 3, Part B, Section 2.5.1)
    const BLUETOOTH_BASE_UUID: u128 = 0x0000000000001000800000805F9B34FB;

    pub const fn from_u16(v: u16) -> Self {
        Uuid {
            value: ((v as u128) << 96) | Self::BLUETOOTH_BASE_UUID,
        }
    }

    pub const fn from_u32(v: u32) -> Self {
        Uuid {
            value: ((v as u128) << 96) | Self::BLUETOOTH_BASE_UUID,
        }
    }

    pub const fn from_u128(v: u128) -> Self {
        Uuid { value: v }
    }

    /// Returns true if the UUID is within the 16 bit shortened range
    pub fn can_be_16_bit(&self) -> bool {
        self.value & !(0xFFFFu128 << 96) == Self::BLUETOOTH_BASE_UUID
    }

    /// Returns true if the UUID is within the 32 bit shortened range
    pub fn can_be_32_bit(&self) -> bool {
        self.value & !(0xFFFF_FFFFu128 << 96) == Self::BLUETOOTH_BASE_UUID
    }

    /// The number of bytes this UUID occupies within an attribute PDU
    ///
    /// The attribute protocol only transfers 16 bit and 128 bit UUIDs, a 32 bit shortened UUID is
    /// sent in its full form.
    pub fn att_len(&self) -> usize {
        if self.can_be_16_bit() {
            2
        } else {
            16
        }
    }

    /// Append the attribute protocol format of this UUID (little endian, 2 or 16 bytes)
    pub fn extend_le(&self, into: &mut Vec<u8>) {
        match u16::try_from(*self) {
            Ok(short) => into.extend_from_slice(&short.to_le_bytes()),
            Err(_) => into.extend_from_slice(&self.value.to_le_bytes()),
        }
    }

    /// Create a UUID from the attribute protocol format
    ///
    /// The slice must be either 2 or 16 bytes long.
    pub fn try_from_le_slice(raw: &[u8]) -> Option<Self> {
        match raw.len() {
            2 => Some(Uuid::from_u16(u16::from_le_bytes([raw[0], raw[1]]))),
            16 => {
                let mut bytes = [0u8; 16];

                bytes.copy_from_slice(raw);

                Some(Uuid::from_u128(u128::from_le_bytes(bytes)))
            }
            _ => None,
        }
    }

    fn display_with<F16, F32, F128>(
        &self,
        f: &mut core::fmt::Formatter,
        fmt_16: F16,
        fmt_32: F32,
        fmt_128: F128,
    ) -> core::fmt::Result
    where
        F16: FnOnce(&u16, &mut core::fmt::Formatter) -> core::fmt::Result,
        F32: FnOnce(&u32, &mut core::fmt::Formatter) -> core::fmt::Result,
        F128: FnOnce(&u128, &mut core::fmt::Formatter) -> core::fmt::Result,
    {
        if let Ok(v) = u16::try_from(*self) {
            fmt_16(&v, f)?;

            write!(f, " (16b)")
        } else if let Ok(v) = u32::try_from(*self) {
            fmt_32(&v, f)?;

            write!(f, " (32b)")
        } else {
            fmt_128(&self.value, f)?;

            write!(f, " (128b)")
        }
    }
}

impl core::fmt::Debug for Uuid {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::LowerHex::fmt(self, f)
    }
}

impl core::fmt::Display for Uuid {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        core::fmt::LowerHex::fmt(self, f)
    }
}

impl core::fmt::LowerHex for Uuid {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        self.display_with(
            f,
            |v, f| core::fmt::LowerHex::fmt(v, f),
            |v, f| core::fmt::LowerHex::fmt(v, f),
            |v, f| core::fmt::LowerHex::fmt(v, f),
        )
    }
}

impl core::fmt::UpperHex for Uuid {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        self.display_with(
            f,
            |v, f| core::fmt::UpperHex::fmt(v, f),
            |v, f| core::fmt::UpperHex::fmt(v, f),
            |v, f| core::fmt::UpperHex::fmt(v, f),
        )
    }
}

impl From<u16> for Uuid {
    fn from(v: u16) -> Uuid {
        Uuid::from_u16(v)
    }
}

impl From<u32> for Uuid {
    fn from(v: u32) -> Uuid {
        Uuid::from_u32(v)
    }
}

impl From<u128> for Uuid {
    fn from(v: u128) -> Uuid {
        Uuid::from_u128(v)
    }
}

impl From<Uuid> for u128 {
    fn from(uuid: Uuid) -> u128 {
        uuid.value
    }
}

impl TryFrom<Uuid> for u16 {
    type Error = ();

    /// Convert into the 16 bit shortened form. Whether the value is an assigned number is not
    /// checked.
    fn try_from(uuid: Uuid) -> Result<u16, ()> {
        if uuid.can_be_16_bit() {
            Ok((uuid.value >> 96) as u16)
        } else {
            Err(())
        }
    }
}

impl TryFrom<Uuid> for u32 {
    type Error = ();

    fn try_from(uuid: Uuid) -> Result<u32, ()> {
        if uuid.can_be_32_bit() {
            Ok((uuid.value >> 96) as u32)
        } else {
            Err(())
        }
    }
}

#[cfg(feature = "uuid-crate")]
impl From<uuid::Uuid> for Uuid {
    fn from(uuid: uuid::Uuid) -> Uuid {
        Uuid::from_u128(u128::from_be_bytes(*uuid.as_bytes()))
    }
}

#[cfg(feature = "uuid-crate")]
impl From<Uuid> for uuid::Uuid {
    fn from(uuid: Uuid) -> uuid::Uuid {
        uuid::Uuid::from_bytes(uuid.value.to_be_bytes())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn shortened_forms() {
        let uuid = Uuid::from_u16(0x1234);

        assert!(uuid.can_be_16_bit());
        assert!(uuid.can_be_32_bit());
        assert_eq!(0x0000123400001000800000805F9B34FB, u128::from(uuid));
        assert_eq!(Ok(0x1234u16), u16::try_from(uuid));

        let uuid = Uuid::from_u32(0x12345678);

        assert!(!uuid.can_be_16_bit());
        assert_eq!(Err(()), u16::try_from(uuid));
        assert_eq!(Ok(0x12345678u32), u32::try_from(uuid));
        assert_eq!(16, uuid.att_len());
    }

    #[test]
    fn att_format() {
        let mut short = Vec::new();

        Uuid::from_u16(0x2803).extend_le(&mut short);

        assert_eq!(vec![0x03, 0x28], short);
        assert_eq!(Some(Uuid::from_u16(0x2803)), Uuid::try_from_le_slice(&short));

        let full_val = 0x68d82662_0305_4e6f_a679_6be1475f5e04u128;

        let mut full = Vec::new();

        Uuid::from_u128(full_val).extend_le(&mut full);

        assert_eq!(full_val.to_le_bytes().to_vec(), full);
        assert_eq!(Some(Uuid::from_u128(full_val)), Uuid::try_from_le_slice(&full));
        assert_eq!(None, Uuid::try_from_le_slice(&full[..3]));
    }

    #[test]
    fn formatting() {
        assert_eq!("2800 (16b)", format!("{:x}", Uuid::from_u16(0x2800)));
        assert_eq!("0xABCD (16b)", format!("{:#X}", Uuid::from_u16(0xabcd)));
        assert_eq!("abcdef (32b)", format!("{:x}", Uuid::from_u32(0xabcdef)));
    }
}
