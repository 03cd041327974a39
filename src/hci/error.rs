//! Controller status codes
//!
//! These are the controller error codes listed in Vol 1, Part F of the Bluetooth Core
//! Specification. Only the codes an LE host core can receive are named, everything else is kept
//! as `Other`.

use core::fmt::{self, Display, Formatter};

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Error {
    NoError,
    UnknownHciCommand,
    UnknownConnectionIdentifier,
    HardwareFailure,
    PageTimeout,
    AuthenticationFailure,
    PinOrKeyMissing,
    MemoryCapacityExceeded,
    ConnectionTimeout,
    ConnectionLimitExceeded,
    ConnectionAlreadyExists,
    CommandDisallowed,
    ConnectionRejectedDueToLimitedResources,
    ConnectionAcceptTimeoutExceeded,
    UnsupportedFeatureOrParameterValue,
    InvalidHciCommandParameters,
    RemoteUserTerminatedConnection,
    RemoteDeviceTerminatedConnectionDueToLowResources,
    RemoteDeviceTerminatedConnectionDueToPowerOff,
    ConnectionTerminatedByLocalHost,
    UnsupportedRemoteFeature,
    InvalidLlParameters,
    UnspecifiedError,
    LlResponseTimeout,
    LlProcedureCollision,
    InstantPassed,
    ControllerBusy,
    UnacceptableConnectionParameters,
    AdvertisingTimeout,
    ConnectionTerminatedDueToMicFailure,
    ConnectionFailedToBeEstablished,
    /// A status code that is not named above
    Other(u8),
}

impl Error {
    /// Convert into a `Result`, `NoError` is `Ok`
    pub fn ok_or_else<F, E>(self, err: F) -> Result<(), E>
    where
        F: FnOnce(Self) -> E,
    {
        if let Error::NoError = self {
            Ok(())
        } else {
            Err(err(self))
        }
    }
}

impl From<u8> for Error {
    fn from(raw: u8) -> Self {
        match raw {
            0x00 => Error::NoError,
            0x01 => Error::UnknownHciCommand,
            0x02 => Error::UnknownConnectionIdentifier,
            0x03 => Error::HardwareFailure,
            0x04 => Error::PageTimeout,
            0x05 => Error::AuthenticationFailure,
            0x06 => Error::PinOrKeyMissing,
            0x07 => Error::MemoryCapacityExceeded,
            0x08 => Error::ConnectionTimeout,
            0x09 => Error::ConnectionLimitExceeded,
            0x0B => Error::ConnectionAlreadyExists,
            0x0C => Error::CommandDisallowed,
            0x0D => Error::ConnectionRejectedDueToLimitedResources,
            0x10 => Error::ConnectionAcceptTimeoutExceeded,
            0x11 => Error::UnsupportedFeatureOrParameterValue,
            0x12 => Error::InvalidHciCommandParameters,
            0x13 => Error::RemoteUserTerminatedConnection,
            0x14 => Error::RemoteDeviceTerminatedConnectionDueToLowResources,
            0x15 => Error::RemoteDeviceTerminatedConnectionDueToPowerOff,
            0x16 => Error::ConnectionTerminatedByLocalHost,
            0x1A => Error::UnsupportedRemoteFeature,
            0x1E => Error::InvalidLlParameters,
            0x1F => Error::UnspecifiedError,
            0x22 => Error::LlResponseTimeout,
            0x23 => Error::LlProcedureCollision,
            0x28 => Error::InstantPassed,
            0x3A => Error::ControllerBusy,
            0x3B => Error::UnacceptableConnectionParameters,
            0x3C => Error::AdvertisingTimeout,
            0x3D => Error::ConnectionTerminatedDueToMicFailure,
            0x3E => Error::ConnectionFailedToBeEstablished,
            other => Error::Other(other),
        }
    }
}

impl From<Error> for u8 {
    fn from(err: Error) -> u8 {
        match err {
            Error::NoError => 0x00,
            Error::UnknownHciCommand => 0x01,
            Error::UnknownConnectionIdentifier => 0x02,
            Error::HardwareFailure => 0x03,
            Error::PageTimeout => 0x04,
            Error::AuthenticationFailure => 0x05,
            Error::PinOrKeyMissing => 0x06,
            Error::MemoryCapacityExceeded => 0x07,
            Error::ConnectionTimeout => 0x08,
            Error::ConnectionLimitExceeded => 0x09,
            Error::ConnectionAlreadyExists => 0x0B,
            Error::CommandDisallowed => 0x0C,
            Error::ConnectionRejectedDueToLimitedResources => 0x0D,
            Error::ConnectionAcceptTimeoutExceeded => 0x10,
            Error::UnsupportedFeatureOrParameterValue => 0x11,
            Error::InvalidHciCommandParameters => 0x12,
            Error::RemoteUserTerminatedConnection => 0x13,
            Error::RemoteDeviceTerminatedConnectionDueToLowResources => 0x14,
            Error::RemoteDeviceTerminatedConnectionDueToPowerOff => 0x15,
            Error::ConnectionTerminatedByLocalHost => 0x16,
            Error::UnsupportedRemoteFeature => 0x1A,
            Error::InvalidLlParameters => 0x1E,
            Error::UnspecifiedError => 0x1F,
            Error::LlResponseTimeout => 0x22,
            Error::LlProcedureCollision => 0x23,
            Error::InstantPassed => 0x28,
            Error::ControllerBusy => 0x3A,
            Error::UnacceptableConnectionParameters => 0x3B,
            Error::AdvertisingTimeout => 0x3C,
            Error::ConnectionTerminatedDueToMicFailure => 0x3D,
            Error::ConnectionFailedToBeEstablished => 0x3E,
            Error::Other(raw) => raw,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Error::NoError => f.write_str("NoError"),
            Error::UnknownHciCommand => f.write_str("UnknownHciCommand"),
            Error::UnknownConnectionIdentifier => f.write_str("UnknownConnectionIdentifier"),
            Error::HardwareFailure => f.write_str("HardwareFailure"),
            Error::PageTimeout => f.write_str("PageTimeout"),
            Error::AuthenticationFailure => f.write_str("AuthenticationFailure"),
            Error::PinOrKeyMissing => f.write_str("PinOrKeyMissing"),
            Error::MemoryCapacityExceeded => f.write_str("MemoryCapacityExceeded"),
            Error::ConnectionTimeout => f.write_str("ConnectionTimeout"),
            Error::ConnectionLimitExceeded => f.write_str("ConnectionLimitExceeded"),
            Error::ConnectionAlreadyExists => f.write_str("ConnectionAlreadyExists"),
            Error::CommandDisallowed => f.write_str("CommandDisallowed"),
            Error::ConnectionRejectedDueToLimitedResources => {
                f.write_str("ConnectionRejectedDueToLimitedResources")
            }
            Error::ConnectionAcceptTimeoutExceeded => f.write_str("ConnectionAcceptTimeoutExceeded"),
            Error::UnsupportedFeatureOrParameterValue => f.write_str("UnsupportedFeatureOrParameterValue"),
            Error::InvalidHciCommandParameters => f.write_str("InvalidHciCommandParameters"),
            Error::RemoteUserTerminatedConnection => f.write_str("RemoteUserTerminatedConnection"),
            Error::RemoteDeviceTerminatedConnectionDueToLowResources => {
                f.write_str("RemoteDeviceTerminatedConnectionDueToLowResources")
            }
            Error::RemoteDeviceTerminatedConnectionDueToPowerOff => {
                f.write_str("RemoteDeviceTerminatedConnectionDueToPowerOff")
            }
            Error::ConnectionTerminatedByLocalHost => f.write_str("ConnectionTerminatedByLocalHost"),
            Error::UnsupportedRemoteFeature => f.write_str("UnsupportedRemoteFeature"),
            Error::InvalidLlParameters => f.write_str("InvalidLlParameters"),
            Error::UnspecifiedError => f.write_str("UnspecifiedError"),
            Error::LlResponseTimeout => f.write_str("LlResponseTimeout"),
            Error::LlProcedureCollision => f.write_str("LlProcedureCollision"),
            Error::InstantPassed => f.write_str("InstantPassed"),
            Error::ControllerBusy => f.write_str("ControllerBusy"),
            Error::UnacceptableConnectionParameters => f.write_str("UnacceptableConnectionParameters"),
            Error::AdvertisingTimeout => f.write_str("AdvertisingTimeout"),
            Error::ConnectionTerminatedDueToMicFailure => f.write_str("ConnectionTerminatedDueToMicFailure"),
            Error::ConnectionFailedToBeEstablished => f.write_str("ConnectionFailedToBeEstablished"),
            Error::Other(raw) => write!(f, "Unknown status code ({:#04x})", raw),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}
