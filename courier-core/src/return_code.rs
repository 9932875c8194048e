//! MQTT 3.1.1 acknowledgment return codes.

use core::fmt;

use crate::error::Error;

/// CONNACK return code (byte 4 of the packet).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectReturnCode {
    #[default]
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUserNameOrPassword,
    NotAuthorized,
}

impl ConnectReturnCode {
    pub fn get_code(&self) -> u8 {
        match self {
            ConnectReturnCode::Accepted => 0x00,
            ConnectReturnCode::UnacceptableProtocolVersion => 0x01,
            ConnectReturnCode::IdentifierRejected => 0x02,
            ConnectReturnCode::ServerUnavailable => 0x03,
            ConnectReturnCode::BadUserNameOrPassword => 0x04,
            ConnectReturnCode::NotAuthorized => 0x05,
        }
    }

    pub fn is_accepted(&self) -> bool {
        *self == ConnectReturnCode::Accepted
    }
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = Error;

    fn try_from(code: u8) -> crate::Result<Self> {
        match code {
            0x00 => Ok(ConnectReturnCode::Accepted),
            0x01 => Ok(ConnectReturnCode::UnacceptableProtocolVersion),
            0x02 => Ok(ConnectReturnCode::IdentifierRejected),
            0x03 => Ok(ConnectReturnCode::ServerUnavailable),
            0x04 => Ok(ConnectReturnCode::BadUserNameOrPassword),
            0x05 => Ok(ConnectReturnCode::NotAuthorized),
            _ => Err(Error::BadResponse {
                packet_id: None,
                reason: "CONNACK return code out of range",
            }),
        }
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            ConnectReturnCode::Accepted => "Connection accepted",
            ConnectReturnCode::UnacceptableProtocolVersion => "Unacceptable protocol version",
            ConnectReturnCode::IdentifierRejected => "Identifier rejected",
            ConnectReturnCode::ServerUnavailable => "Server unavailable",
            ConnectReturnCode::BadUserNameOrPassword => "Bad user name or password",
            ConnectReturnCode::NotAuthorized => "Not authorized",
        };

        write!(f, "{}", description)
    }
}

/// SUBACK per-filter return code. QoS 2 grants are not accepted because the
/// engine never requests QoS 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeReturnCode {
    GrantedQoS0,
    GrantedQoS1,
    Failure,
}

impl SubscribeReturnCode {
    pub fn get_code(&self) -> u8 {
        match self {
            SubscribeReturnCode::GrantedQoS0 => 0x00,
            SubscribeReturnCode::GrantedQoS1 => 0x01,
            SubscribeReturnCode::Failure => 0x80,
        }
    }

    pub fn is_failure(&self) -> bool {
        *self == SubscribeReturnCode::Failure
    }
}

impl TryFrom<u8> for SubscribeReturnCode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, u8> {
        match code {
            0x00 => Ok(SubscribeReturnCode::GrantedQoS0),
            0x01 => Ok(SubscribeReturnCode::GrantedQoS1),
            0x80 => Ok(SubscribeReturnCode::Failure),
            other => Err(other),
        }
    }
}
