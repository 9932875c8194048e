use std::{fmt, sync::Arc};

use crate::{client::MqttConnection, error::Result, info::PublishInfo};

/// Kind of request an operation carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Connect,
    PublishToServer,
    PubAck,
    Subscribe,
    Unsubscribe,
    PingReq,
    Disconnect,
}

impl OperationType {
    /// Whether the operation stays queued until the server acknowledges it.
    pub(crate) fn awaits_response(self, qos1: bool) -> bool {
        match self {
            OperationType::Connect | OperationType::Subscribe | OperationType::Unsubscribe => true,
            OperationType::PublishToServer => qos1,
            _ => false,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Connect => "CONNECT",
            OperationType::PublishToServer => "PUBLISH",
            OperationType::PubAck => "PUBACK",
            OperationType::Subscribe => "SUBSCRIBE",
            OperationType::Unsubscribe => "UNSUBSCRIBE",
            OperationType::PingReq => "PINGREQ",
            OperationType::Disconnect => "DISCONNECT",
        };

        write!(f, "{}", name)
    }
}

/// Reason passed to the disconnect callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The application called disconnect.
    DisconnectCalled,

    /// The server sent something that is not valid MQTT.
    BadPacketReceived,

    /// No PINGRESP arrived in time.
    KeepAliveTimeout,

    /// The network interface failed or reached end of stream.
    ConnectionLost,
}

/// Delivered to an operation's completion callback.
#[derive(Debug, Clone)]
pub struct CallbackParam {
    pub connection: MqttConnection,
    pub operation: OperationType,
    pub result: Result<()>,
}

/// Delivered to a subscription callback for each matching PUBLISH.
#[derive(Debug, Clone)]
pub struct PublishCallbackParam {
    pub connection: MqttConnection,
    /// The registered filter that matched.
    pub topic_filter: Arc<str>,
    pub message: PublishInfo,
}

/// Delivered to the disconnect callback, once per connection.
#[derive(Debug, Clone)]
pub struct DisconnectCallbackParam {
    pub connection: MqttConnection,
    pub reason: DisconnectReason,
}
