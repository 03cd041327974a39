//! LE signaling channel
//!
//! Only the signaling commands a LE host core needs are supported, the connection parameter update
//! request and response. Every other command received is answered with a command reject.

use crate::Error;

/// Signaling command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalCode {
    CommandReject,
    ConnectionParameterUpdateRequest,
    ConnectionParameterUpdateResponse,
}

impl SignalCode {
    pub fn to_val(&self) -> u8 {
        match self {
            SignalCode::CommandReject => 0x01,
            SignalCode::ConnectionParameterUpdateRequest => 0x12,
            SignalCode::ConnectionParameterUpdateResponse => 0x13,
        }
    }
}

/// The reason of a command reject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    CommandNotUnderstood,
    SignalingMtuExceeded,
    InvalidCidInRequest,
    Other(u16),
}

impl From<u16> for RejectReason {
    fn from(raw: u16) -> Self {
        match raw {
            0x0000 => RejectReason::CommandNotUnderstood,
            0x0001 => RejectReason::SignalingMtuExceeded,
            0x0002 => RejectReason::InvalidCidInRequest,
            other => RejectReason::Other(other),
        }
    }
}

impl From<RejectReason> for u16 {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::CommandNotUnderstood => 0x0000,
            RejectReason::SignalingMtuExceeded => 0x0001,
            RejectReason::InvalidCidInRequest => 0x0002,
            RejectReason::Other(other) => other,
        }
    }
}

/// Connection parameters
///
/// The interval fields are in units of 1.25ms and the supervision timeout is in units of 10ms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConnectionParameters {
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub timeout: u16,
}

impl ConnectionParameters {
    /// Check that the values are within the ranges allowed for a LE connection
    pub fn is_valid(&self) -> bool {
        let interval = 0x0006..=0x0C80;

        interval.contains(&self.interval_min)
            && interval.contains(&self.interval_max)
            && self.interval_min <= self.interval_max
            && self.latency <= 0x01F3
            && (0x000A..=0x0C80).contains(&self.timeout)
            // the supervision timeout must be larger than the effective interval
            && u32::from(self.timeout) * 4 > (1 + u32::from(self.latency)) * u32::from(self.interval_max)
    }

    fn extend(&self, v: &mut Vec<u8>) {
        v.extend_from_slice(&self.interval_min.to_le_bytes());
        v.extend_from_slice(&self.interval_max.to_le_bytes());
        v.extend_from_slice(&self.latency.to_le_bytes());
        v.extend_from_slice(&self.timeout.to_le_bytes());
    }
}

/// A decoded signaling command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    CommandReject {
        identifier: u8,
        reason: RejectReason,
    },
    ConnectionParameterUpdateRequest {
        identifier: u8,
        parameters: ConnectionParameters,
    },
    ConnectionParameterUpdateResponse {
        identifier: u8,
        accepted: bool,
    },
    /// A command that is not supported by this host
    Unsupported { code: u8, identifier: u8 },
}

impl Signal {
    const HEADER_SIZE: usize = 4;

    pub fn identifier(&self) -> u8 {
        match self {
            Signal::CommandReject { identifier, .. }
            | Signal::ConnectionParameterUpdateRequest { identifier, .. }
            | Signal::ConnectionParameterUpdateResponse { identifier, .. }
            | Signal::Unsupported { identifier, .. } => *identifier,
        }
    }

    /// Decode a signaling command
    ///
    /// The LE signaling channel carries exactly one command per L2CAP PDU.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < Self::HEADER_SIZE {
            return Err(Error::Decode("signaling command is too short".into()));
        }

        let code = bytes[0];

        let identifier = bytes[1];

        let length = usize::from(u16::from_le_bytes([bytes[2], bytes[3]]));

        let data = &bytes[Self::HEADER_SIZE..];

        if data.len() != length {
            return Err(Error::Decode(format!(
                "signaling length field is {}, but {} bytes were received",
                length,
                data.len()
            )));
        }

        let field = |index: usize| -> Result<u16, Error> {
            data.get(index * 2..index * 2 + 2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]))
                .ok_or_else(|| Error::Decode("signaling command is too short".into()))
        };

        match code {
            0x01 => Ok(Signal::CommandReject {
                identifier,
                reason: field(0)?.into(),
            }),
            0x12 => Ok(Signal::ConnectionParameterUpdateRequest {
                identifier,
                parameters: ConnectionParameters {
                    interval_min: field(0)?,
                    interval_max: field(1)?,
                    latency: field(2)?,
                    timeout: field(3)?,
                },
            }),
            0x13 => Ok(Signal::ConnectionParameterUpdateResponse {
                identifier,
                accepted: field(0)? == 0,
            }),
            code => Ok(Signal::Unsupported { code, identifier }),
        }
    }

    /// Encode the signaling command
    ///
    /// An `Unsupported` signal has no data, it cannot be sent.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let (code, identifier, data) = match self {
            Signal::CommandReject { identifier, reason } => (
                SignalCode::CommandReject,
                *identifier,
                u16::from(*reason).to_le_bytes().to_vec(),
            ),
            Signal::ConnectionParameterUpdateRequest { identifier, parameters } => {
                let mut data = Vec::with_capacity(8);

                parameters.extend(&mut data);

                (SignalCode::ConnectionParameterUpdateRequest, *identifier, data)
            }
            Signal::ConnectionParameterUpdateResponse { identifier, accepted } => {
                let result: u16 = if *accepted { 0 } else { 1 };

                (
                    SignalCode::ConnectionParameterUpdateResponse,
                    *identifier,
                    result.to_le_bytes().to_vec(),
                )
            }
            Signal::Unsupported { .. } => {
                return Err(Error::InvalidParameter("an unsupported signal cannot be sent"))
            }
        };

        let mut v = Vec::with_capacity(Self::HEADER_SIZE + data.len());

        v.push(code.to_val());
        v.push(identifier);
        v.extend_from_slice(&(data.len() as u16).to_le_bytes());
        v.extend_from_slice(&data);

        Ok(v)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parameter_update_request() {
        let raw = [0x12, 0x07, 0x08, 0x00, 0x18, 0x00, 0x28, 0x00, 0x00, 0x00, 0xF4, 0x01];

        let signal = Signal::try_from_bytes(&raw).unwrap();

        let expected = Signal::ConnectionParameterUpdateRequest {
            identifier: 7,
            parameters: ConnectionParameters {
                interval_min: 0x18,
                interval_max: 0x28,
                latency: 0,
                timeout: 0x1F4,
            },
        };

        assert_eq!(expected, signal);
        assert_eq!(raw.to_vec(), signal.to_bytes().unwrap());
    }

    #[test]
    fn unknown_code_is_unsupported() {
        let raw = [0x14, 0x02, 0x00, 0x00];

        assert_eq!(
            Signal::Unsupported { code: 0x14, identifier: 2 },
            Signal::try_from_bytes(&raw).unwrap()
        );
    }

    #[test]
    fn reject_encoding() {
        let reject = Signal::CommandReject {
            identifier: 9,
            reason: RejectReason::CommandNotUnderstood,
        };

        assert_eq!(vec![0x01, 0x09, 0x02, 0x00, 0x00, 0x00], reject.to_bytes().unwrap());
    }

    #[test]
    fn parameter_validation() {
        let mut parameters = ConnectionParameters {
            interval_min: 0x18,
            interval_max: 0x28,
            latency: 0,
            timeout: 0x1F4,
        };

        assert!(parameters.is_valid());

        parameters.interval_min = 0x30;

        assert!(!parameters.is_valid());
    }
}
